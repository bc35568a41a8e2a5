mod conflict;
mod error;
mod holders;
mod mutations;
mod queries;
mod store;
mod writer;

pub use error::{EngineError, ErrorKind};
pub use holders::{Holding, rank_by_recency};
pub use store::{AssignmentStore, SharedLane};
pub use writer::WalWriter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::catalog::ReferenceChecker;
use crate::model::*;
use crate::wal::Wal;

/// Assignment history engine for one tenant.
///
/// Every write holds the target lane's write lock from the overlap check
/// through the WAL append and the in-memory apply, so two writers on the
/// same resource are serialized and writers on different resources never
/// contend.
pub struct Engine {
    pub(super) store: AssignmentStore,
    pub(super) wal: WalWriter<Event>,
    pub(super) checker: Arc<dyn ReferenceChecker>,
    /// Writers hold this shared; compaction holds it exclusively so the
    /// snapshot it writes can't miss an event that is appended but not yet applied.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, checker: Arc<dyn ReferenceChecker>) -> io::Result<Self> {
        let events = Wal::<Event>::replay(&wal_path)?;
        let wal = WalWriter::spawn(Wal::open(&wal_path)?);

        let store = AssignmentStore::new();
        for event in &events {
            store.replay(event);
        }

        Ok(Self {
            store,
            wal,
            checker,
            commit_gate: RwLock::new(()),
        })
    }

    /// The commit point. Cancellation is honored up to here and ignored after.
    pub(super) async fn commit(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.wal.append(event.clone()).await
    }

    pub(super) async fn enter_commit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            gate = self.commit_gate.read() => Ok(gate),
        }
    }

    pub(super) async fn write_lane(
        &self,
        lane: SharedLane,
        cancel: &CancellationToken,
    ) -> Result<OwnedRwLockWriteGuard<ResourceLane>, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            guard = lane.write_owned() => Ok(guard),
        }
    }

    pub(super) async fn read_lane(
        &self,
        lane: SharedLane,
        cancel: &CancellationToken,
    ) -> Result<OwnedRwLockReadGuard<ResourceLane>, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            guard = lane.read_owned() => Ok(guard),
        }
    }

    /// Lookup assignment → resource, then write-lock that lane.
    /// Retries if the record moved lanes while we waited for the lock;
    /// `None` means the assignment does not exist.
    pub(super) async fn resolve_assignment_write(
        &self,
        id: &Ulid,
        cancel: &CancellationToken,
    ) -> Result<Option<(Ulid, OwnedRwLockWriteGuard<ResourceLane>)>, EngineError> {
        loop {
            let Some(resource_id) = self.store.resource_for(id) else {
                return Ok(None);
            };
            let guard = self
                .write_lane(self.store.lane_or_create(resource_id), cancel)
                .await?;
            if guard.contains(*id) {
                return Ok(Some((resource_id, guard)));
            }
            drop(guard);
            if self.store.resource_for(id) == Some(resource_id) {
                return Ok(None);
            }
        }
    }
}