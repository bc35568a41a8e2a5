use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::model::*;

use super::holders::rank_by_recency;
use super::{Engine, EngineError};

/// Newest first. Equal starts fall back to id so the order is total.
fn sort_newest_first(assignments: &mut [Assignment]) {
    assignments.sort_by(|a, b| b.valid_from.cmp(&a.valid_from).then(a.id.cmp(&b.id)));
}

impl Engine {
    pub async fn get_assignment(
        &self,
        id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<Option<Assignment>, EngineError> {
        loop {
            let Some(resource_id) = self.store.resource_for(&id) else {
                return Ok(None);
            };
            let Some(lane) = self.store.lane(&resource_id) else {
                return Ok(None);
            };
            let guard = self.read_lane(lane, cancel).await?;
            if let Some(a) = guard.get(id) {
                return Ok(Some(a.clone()));
            }
            drop(guard);
            // Still indexed to the same lane but absent: deleted under us.
            if self.store.resource_for(&id) == Some(resource_id) {
                return Ok(None);
            }
        }
    }

    /// Every assignment in the tenant, newest first.
    ///
    /// All lanes are read-locked together before anything is copied, so a
    /// record moving between resources is seen exactly once. A lane created
    /// while the locks were being taken restarts the scan.
    pub async fn list_all(&self, cancel: &CancellationToken) -> Result<Vec<Assignment>, EngineError> {
        loop {
            let lanes = self.store.lanes_in_lock_order();
            let mut guards = Vec::with_capacity(lanes.len());
            for lane in lanes {
                guards.push(self.read_lane(lane, cancel).await?);
            }
            if self.store.lane_count() != guards.len() {
                continue;
            }
            let mut all: Vec<Assignment> = guards
                .iter()
                .flat_map(|g| g.assignments.iter().cloned())
                .collect();
            drop(guards);
            sort_newest_first(&mut all);
            return Ok(all);
        }
    }

    /// Full custody history of one resource, newest first.
    ///
    /// An unknown resource is `NotFound`; a known resource that was never
    /// assigned yields an empty list.
    pub async fn list_for_resource(
        &self,
        resource_id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<Vec<Assignment>, EngineError> {
        if !self.checker.resource_exists(resource_id).await {
            return Err(EngineError::NotFound(resource_id));
        }
        let Some(lane) = self.store.lane(&resource_id) else {
            return Ok(Vec::new());
        };
        let guard = self.read_lane(lane, cancel).await?;
        let mut history = guard.assignments.clone();
        drop(guard);
        sort_newest_first(&mut history);
        Ok(history)
    }

    /// Distinct resources the assignee has ever held, most recently
    /// assigned first. Resources that have since left the catalog are skipped.
    pub async fn list_resources_for_assignee(
        &self,
        assignee_id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<Vec<HeldResource>, EngineError> {
        if !self.checker.assignee_exists(assignee_id).await {
            return Err(EngineError::NotFound(assignee_id));
        }
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let ranked = rank_by_recency(&self.store.holdings_for(&assignee_id));
        let mut held = Vec::with_capacity(ranked.len());
        for entry in ranked {
            if self.checker.resource_exists(entry.resource_id).await {
                held.push(entry);
            }
        }
        Ok(held)
    }
}
