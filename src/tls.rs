use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use tracing::info;

use crate::config::Config;

/// Build the TLS acceptor from `CUSTODY_TLS_CERT` / `CUSTODY_TLS_KEY`.
/// `Ok(None)` means plaintext connections only.
pub fn load_tls_acceptor(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (Path::new(c), Path::new(k)),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both CUSTODY_TLS_CERT and CUSTODY_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    server_config.alpn_protocols = vec![b"postgresql".to_vec()];
    info!("TLS enabled with certificate {}", cert_path.display());

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_when_unconfigured() {
        assert!(load_tls_acceptor(&Config::default()).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_rejected() {
        let config = Config {
            tls_cert: Some("/tmp/cert.pem".into()),
            ..Config::default()
        };
        let err = load_tls_acceptor(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn missing_files_surface_io_error() {
        let config = Config {
            tls_cert: Some("/nonexistent/custody-cert.pem".into()),
            tls_key: Some("/nonexistent/custody-key.pem".into()),
            ..Config::default()
        };
        let err = load_tls_acceptor(&config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
