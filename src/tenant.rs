use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::catalog::Catalog;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One isolated custody domain: the assignment engine plus the catalog it
/// checks references against.
pub struct Tenant {
    pub engine: Engine,
    pub catalog: Arc<Catalog>,
}

impl Tenant {
    pub fn open(data_dir: &std::path::Path, name: &str) -> io::Result<Self> {
        let catalog = Arc::new(Catalog::open(
            &data_dir.join(format!("{name}.catalog.wal")),
        )?);
        let engine = Engine::new(data_dir.join(format!("{name}.wal")), catalog.clone())?;
        Ok(Self { engine, catalog })
    }
}

/// Manages per-tenant state. Each tenant gets its own engine, catalog, WALs and compactor.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    tenants: DashMap<String, Arc<Tenant>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            tenants: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily open the tenant for the given database name.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Tenant>> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        if let Some(existing) = self.tenants.get(&safe_name) {
            return Ok(existing.value().clone());
        }
        if self.tenants.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let opened = match self.tenants.entry(safe_name) {
            Entry::Occupied(entry) => return Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let opened = Arc::new(Tenant::open(&self.data_dir, entry.key())?);
                info!("opened tenant {}", entry.key());
                entry.insert(opened.clone());
                opened
            }
        };

        let threshold = self.compact_threshold;
        let compacting = opened.clone();
        tokio::spawn(async move {
            compactor::run_compactor(compacting, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenants.len() as f64);
        Ok(opened)
    }
}
