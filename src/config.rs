use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `CUSTODY_*` environment variables.
/// Unset or unparsable values fall back to their defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub statement_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".to_string(),
            data_dir: PathBuf::from("./data"),
            password: "custody".to_string(),
            max_connections: 256,
            compact_threshold: 1000,
            statement_timeout: Duration::from_millis(30_000),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            port: parsed(lookup("CUSTODY_PORT")).unwrap_or(defaults.port),
            bind: lookup("CUSTODY_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("CUSTODY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("CUSTODY_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(lookup("CUSTODY_MAX_CONNECTIONS"))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(lookup("CUSTODY_COMPACT_THRESHOLD"))
                .unwrap_or(defaults.compact_threshold),
            statement_timeout: parsed(lookup("CUSTODY_STATEMENT_TIMEOUT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.statement_timeout),
            metrics_port: parsed(lookup("CUSTODY_METRICS_PORT")),
            tls_cert: lookup("CUSTODY_TLS_CERT"),
            tls_key: lookup("CUSTODY_TLS_KEY"),
        }
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
