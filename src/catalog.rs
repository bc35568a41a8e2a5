use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::Mutex;
use tracing::debug;
use ulid::Ulid;

use crate::engine::{EngineError, WalWriter};
use crate::limits::MAX_CATALOG_IDS;
use crate::model::CatalogEvent;
use crate::wal::Wal;

/// Existence checks against the item catalog and the person directory.
/// The assignment engine consults this at write time and for query subjects;
/// it never enforces referential integrity beyond these calls.
#[async_trait]
pub trait ReferenceChecker: Send + Sync {
    async fn resource_exists(&self, resource_id: Ulid) -> bool;
    async fn assignee_exists(&self, assignee_id: Ulid) -> bool;
}

/// Registry of known item and person ids, persisted in its own WAL.
pub struct Catalog {
    items: DashSet<Ulid>,
    persons: DashSet<Ulid>,
    wal: WalWriter<CatalogEvent>,
    /// Serializes check, append and apply so the sets only ever reflect
    /// records that reached the log.
    write_lock: Mutex<()>,
}

#[derive(Clone, Copy)]
enum Kind {
    Item,
    Person,
}

impl Catalog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let records = Wal::<CatalogEvent>::replay(path)?;
        let catalog = Self {
            items: DashSet::new(),
            persons: DashSet::new(),
            wal: WalWriter::spawn(Wal::open(path)?),
            write_lock: Mutex::new(()),
        };
        for record in &records {
            catalog.apply(record);
        }
        Ok(catalog)
    }

    fn apply(&self, record: &CatalogEvent) {
        match record {
            CatalogEvent::ItemRegistered { id } => {
                self.items.insert(*id);
            }
            CatalogEvent::ItemRetired { id } => {
                self.items.remove(id);
            }
            CatalogEvent::PersonRegistered { id } => {
                self.persons.insert(*id);
            }
            CatalogEvent::PersonRetired { id } => {
                self.persons.remove(id);
            }
        }
    }

    fn set(&self, kind: Kind) -> &DashSet<Ulid> {
        match kind {
            Kind::Item => &self.items,
            Kind::Person => &self.persons,
        }
    }

    /// Returns `false` when the id was already registered.
    async fn register(&self, kind: Kind, id: Ulid) -> Result<bool, EngineError> {
        let _write = self.write_lock.lock().await;
        let set = self.set(kind);
        if set.contains(&id) {
            return Ok(false);
        }
        if set.len() >= MAX_CATALOG_IDS {
            return Err(EngineError::LimitExceeded("too many catalog ids"));
        }
        let record = match kind {
            Kind::Item => CatalogEvent::ItemRegistered { id },
            Kind::Person => CatalogEvent::PersonRegistered { id },
        };
        self.wal.append(record.clone()).await?;
        self.apply(&record);
        Ok(true)
    }

    /// Returns `false` when the id was not registered.
    async fn retire(&self, kind: Kind, id: Ulid) -> Result<bool, EngineError> {
        let _write = self.write_lock.lock().await;
        if !self.set(kind).contains(&id) {
            return Ok(false);
        }
        let record = match kind {
            Kind::Item => CatalogEvent::ItemRetired { id },
            Kind::Person => CatalogEvent::PersonRetired { id },
        };
        self.wal.append(record.clone()).await?;
        self.apply(&record);
        debug!("retired {id}; existing assignments keep referencing it");
        Ok(true)
    }

    pub async fn register_item(&self, id: Ulid) -> Result<bool, EngineError> {
        self.register(Kind::Item, id).await
    }

    pub async fn retire_item(&self, id: Ulid) -> Result<bool, EngineError> {
        self.retire(Kind::Item, id).await
    }

    pub async fn register_person(&self, id: Ulid) -> Result<bool, EngineError> {
        self.register(Kind::Person, id).await
    }

    pub async fn retire_person(&self, id: Ulid) -> Result<bool, EngineError> {
        self.retire(Kind::Person, id).await
    }

    pub fn list_items(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.items.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn list_persons(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.persons.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }

    /// Rewrite the catalog WAL as one registration per live id.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _write = self.write_lock.lock().await;
        let records: Vec<CatalogEvent> = self
            .list_items()
            .into_iter()
            .map(|id| CatalogEvent::ItemRegistered { id })
            .chain(
                self.list_persons()
                    .into_iter()
                    .map(|id| CatalogEvent::PersonRegistered { id }),
            )
            .collect();
        self.wal.compact(records).await
    }
}

#[async_trait]
impl ReferenceChecker for Catalog {
    async fn resource_exists(&self, resource_id: Ulid) -> bool {
        self.items.contains(&resource_id)
    }

    async fn assignee_exists(&self, assignee_id: Ulid) -> bool {
        self.persons.contains(&assignee_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("custody_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn register_and_check() {
        let catalog = Catalog::open(&test_wal_path("register.wal")).unwrap();
        let item = Ulid::new();
        let person = Ulid::new();

        assert!(catalog.register_item(item).await.unwrap());
        assert!(catalog.register_person(person).await.unwrap());

        assert!(catalog.resource_exists(item).await);
        assert!(catalog.assignee_exists(person).await);
        // kinds are separate namespaces
        assert!(!catalog.resource_exists(person).await);
        assert!(!catalog.assignee_exists(item).await);
    }

    #[tokio::test]
    async fn register_twice_is_soft() {
        let catalog = Catalog::open(&test_wal_path("register_twice.wal")).unwrap();
        let item = Ulid::new();
        assert!(catalog.register_item(item).await.unwrap());
        assert!(!catalog.register_item(item).await.unwrap());
        assert_eq!(catalog.list_items(), vec![item]);
    }

    #[tokio::test]
    async fn retire_missing_returns_false() {
        let catalog = Catalog::open(&test_wal_path("retire_missing.wal")).unwrap();
        assert!(!catalog.retire_person(Ulid::new()).await.unwrap());
    }

    #[tokio::test]
    async fn replay_restores_registry() {
        let path = test_wal_path("replay.wal");
        let kept = Ulid::new();
        let retired = Ulid::new();
        let person = Ulid::new();
        {
            let catalog = Catalog::open(&path).unwrap();
            catalog.register_item(kept).await.unwrap();
            catalog.register_item(retired).await.unwrap();
            catalog.register_person(person).await.unwrap();
            catalog.retire_item(retired).await.unwrap();
        }

        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.list_items(), vec![kept]);
        assert_eq!(catalog.list_persons(), vec![person]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_reach_the_log() {
        let path = test_wal_path("concurrent.wal");
        let catalog = Arc::new(Catalog::open(&path).unwrap());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                let id = Ulid::new();
                assert!(catalog.register_item(id).await.unwrap());
                id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();

        assert_eq!(catalog.appends_since_compact().await, 32);
        let reopened = Catalog::open(&path).unwrap();
        assert_eq!(reopened.list_items(), ids);
    }

    #[tokio::test]
    async fn compact_keeps_live_ids() {
        let path = test_wal_path("compact.wal");
        let item = Ulid::new();
        let person = Ulid::new();
        {
            let catalog = Catalog::open(&path).unwrap();
            for _ in 0..5 {
                let churn = Ulid::new();
                catalog.register_item(churn).await.unwrap();
                catalog.retire_item(churn).await.unwrap();
            }
            catalog.register_item(item).await.unwrap();
            catalog.register_person(person).await.unwrap();
            assert_eq!(catalog.appends_since_compact().await, 12);

            catalog.compact().await.unwrap();
            assert_eq!(catalog.appends_since_compact().await, 0);
        }

        assert_eq!(Wal::<CatalogEvent>::replay(&path).unwrap().len(), 2);
        let catalog = Catalog::open(&path).unwrap();
        assert!(catalog.resource_exists(item).await);
        assert!(catalog.assignee_exists(person).await);
    }
}
