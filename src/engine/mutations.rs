use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_interval};
use super::{Engine, EngineError};

impl Engine {
    /// Write-time reference and interval validation shared by create and update.
    async fn validate_write(
        &self,
        resource_id: Ulid,
        assignee_id: Ulid,
        interval: &Interval,
    ) -> Result<(), EngineError> {
        if !self.checker.resource_exists(resource_id).await {
            return Err(EngineError::ResourceNotFound(resource_id));
        }
        if !self.checker.assignee_exists(assignee_id).await {
            return Err(EngineError::AssigneeNotFound(assignee_id));
        }
        validate_interval(interval)
    }

    pub async fn create_assignment(
        &self,
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
        cancel: &CancellationToken,
    ) -> Result<Assignment, EngineError> {
        let interval = Interval::new(valid_from, valid_until);
        self.validate_write(resource_id, assignee_id, &interval).await?;

        let _gate = self.enter_commit(cancel).await?;
        let mut guard = self
            .write_lane(self.store.lane_or_create(resource_id), cancel)
            .await?;
        if guard.len() >= MAX_ASSIGNMENTS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many assignments on resource"));
        }
        check_no_overlap(&guard, &interval, None)?;

        let assignment = Assignment {
            id: Ulid::new(),
            resource_id,
            assignee_id,
            valid_from,
            valid_until,
        };
        self.commit(&Event::created(&assignment), cancel).await?;
        self.store.insert(&mut guard, assignment.clone());
        debug!(
            "assignment {} created: resource {resource_id} → assignee {assignee_id}",
            assignment.id
        );
        Ok(assignment)
    }

    /// Replace all four fields of an assignment. `Ok(false)` when `id` is unknown.
    pub async fn update_assignment(
        &self,
        id: Ulid,
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        if self.store.resource_for(&id).is_none() {
            debug!("update of unknown assignment {id}");
            return Ok(false);
        }
        let interval = Interval::new(valid_from, valid_until);
        self.validate_write(resource_id, assignee_id, &interval).await?;

        let _gate = self.enter_commit(cancel).await?;
        loop {
            let Some(current) = self.store.resource_for(&id) else {
                return Ok(false);
            };

            // Moving between resources locks both lanes, lowest id first.
            let (mut source, mut target) = if current == resource_id {
                let source = self
                    .write_lane(self.store.lane_or_create(current), cancel)
                    .await?;
                (source, None)
            } else {
                let source_lane = self.store.lane_or_create(current);
                let target_lane = self.store.lane_or_create(resource_id);
                if current < resource_id {
                    let source = self.write_lane(source_lane, cancel).await?;
                    let target = self.write_lane(target_lane, cancel).await?;
                    (source, Some(target))
                } else {
                    let target = self.write_lane(target_lane, cancel).await?;
                    let source = self.write_lane(source_lane, cancel).await?;
                    (source, Some(target))
                }
            };

            if !source.contains(id) {
                drop(target);
                drop(source);
                if self.store.resource_for(&id) == Some(current) {
                    return Ok(false);
                }
                continue;
            }

            let check_lane: &ResourceLane = target.as_deref().unwrap_or(&*source);
            if target.is_some() && check_lane.len() >= MAX_ASSIGNMENTS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many assignments on resource"));
            }
            check_no_overlap(check_lane, &interval, Some(id))?;

            let event = Event::AssignmentUpdated {
                id,
                previous_resource_id: current,
                resource_id,
                assignee_id,
                valid_from,
                valid_until,
            };
            self.commit(&event, cancel).await?;
            self.store.replace(
                &mut source,
                target.as_deref_mut(),
                Assignment {
                    id,
                    resource_id,
                    assignee_id,
                    valid_from,
                    valid_until,
                },
            );
            debug!("assignment {id} updated");
            return Ok(true);
        }
    }

    /// Remove an assignment. Neighbouring intervals are left untouched.
    pub async fn delete_assignment(
        &self,
        id: Ulid,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        let _gate = self.enter_commit(cancel).await?;
        let Some((resource_id, mut guard)) = self.resolve_assignment_write(&id, cancel).await?
        else {
            debug!("delete of unknown assignment {id}");
            return Ok(false);
        };
        let event = Event::AssignmentDeleted { id, resource_id };
        self.commit(&event, cancel).await?;
        self.store.remove(&mut guard, id);
        debug!("assignment {id} deleted from resource {resource_id}");
        Ok(true)
    }

    /// Compact the WAL by rewriting it with one creation event per live assignment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for lane in self.store.lanes() {
            let guard = lane.read().await;
            events.extend(guard.assignments.iter().map(Event::created));
        }
        let live = events.len();
        self.wal.compact(events).await?;
        info!("compacted assignment WAL to {live} records");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
