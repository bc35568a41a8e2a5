use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::holders::Holding;

pub type SharedLane = Arc<RwLock<ResourceLane>>;

/// In-memory assignment state: one lock-guarded lane per resource plus
/// reverse indexes. Lanes are never removed once created, so an `Arc`
/// handed out here stays the authoritative lane for its resource.
///
/// Mutating methods take the lane guard(s) from the caller, which must
/// already hold them in write mode.
pub struct AssignmentStore {
    lanes: DashMap<Ulid, SharedLane>,
    /// Reverse lookup: assignment id → resource id
    assignment_to_resource: DashMap<Ulid, Ulid>,
    /// Assignee → every assignment they hold or held
    by_assignee: DashMap<Ulid, Vec<Holding>>,
}

impl Default for AssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentStore {
    pub fn new() -> Self {
        Self {
            lanes: DashMap::new(),
            assignment_to_resource: DashMap::new(),
            by_assignee: DashMap::new(),
        }
    }

    // ── Lanes ────────────────────────────────────────────────

    pub fn lane(&self, resource_id: &Ulid) -> Option<SharedLane> {
        self.lanes.get(resource_id).map(|e| e.value().clone())
    }

    pub fn lane_or_create(&self, resource_id: Ulid) -> SharedLane {
        self.lanes
            .entry(resource_id)
            .or_insert_with(|| Arc::new(RwLock::new(ResourceLane::new(resource_id))))
            .value()
            .clone()
    }

    pub fn lanes(&self) -> Vec<SharedLane> {
        self.lanes.iter().map(|e| e.value().clone()).collect()
    }

    /// Every lane in ascending resource id order, the order multi-lane
    /// writers lock in.
    pub fn lanes_in_lock_order(&self) -> Vec<SharedLane> {
        let mut lanes: Vec<(Ulid, SharedLane)> = self
            .lanes
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        lanes.sort_unstable_by_key(|(id, _)| *id);
        lanes.into_iter().map(|(_, lane)| lane).collect()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn resource_for(&self, assignment_id: &Ulid) -> Option<Ulid> {
        self.assignment_to_resource
            .get(assignment_id)
            .map(|e| *e.value())
    }

    pub fn holdings_for(&self, assignee_id: &Ulid) -> Vec<Holding> {
        self.by_assignee
            .get(assignee_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn add_holding(&self, a: &Assignment) {
        self.by_assignee
            .entry(a.assignee_id)
            .or_default()
            .push(Holding {
                assignment_id: a.id,
                resource_id: a.resource_id,
                valid_from: a.valid_from,
            });
    }

    fn drop_holding(&self, assignee_id: Ulid, assignment_id: Ulid) {
        if let Some(mut held) = self.by_assignee.get_mut(&assignee_id) {
            held.retain(|h| h.assignment_id != assignment_id);
        }
        self.by_assignee
            .remove_if(&assignee_id, |_, held| held.is_empty());
    }

    // ── Mutation ─────────────────────────────────────────────

    pub fn insert(&self, lane: &mut ResourceLane, assignment: Assignment) {
        debug_assert_eq!(lane.resource_id, assignment.resource_id);
        self.assignment_to_resource
            .insert(assignment.id, assignment.resource_id);
        self.add_holding(&assignment);
        lane.insert(assignment);
    }

    pub fn remove(&self, lane: &mut ResourceLane, id: Ulid) -> Option<Assignment> {
        let removed = lane.remove(id)?;
        self.assignment_to_resource.remove(&id);
        self.drop_holding(removed.assignee_id, id);
        Some(removed)
    }

    /// Replace a record in place, or move it to `target` when its resource
    /// changes. The id → resource index is overwritten, never cleared, so
    /// lookups racing the move always find one of the two lanes.
    pub fn replace(
        &self,
        source: &mut ResourceLane,
        target: Option<&mut ResourceLane>,
        updated: Assignment,
    ) -> Option<Assignment> {
        let previous = source.remove(updated.id)?;
        let holding = Holding {
            assignment_id: updated.id,
            resource_id: updated.resource_id,
            valid_from: updated.valid_from,
        };
        if previous.assignee_id == updated.assignee_id {
            if let Some(mut held) = self.by_assignee.get_mut(&updated.assignee_id)
                && let Some(slot) = held.iter_mut().find(|h| h.assignment_id == updated.id)
            {
                *slot = holding;
            }
        } else {
            self.add_holding(&updated);
            self.drop_holding(previous.assignee_id, updated.id);
        }
        self.assignment_to_resource
            .insert(updated.id, updated.resource_id);
        match target {
            Some(lane) => lane.insert(updated),
            None => source.insert(updated),
        }
        Some(previous)
    }

    // ── Replay ───────────────────────────────────────────────

    /// Apply a WAL event during startup. Nothing else holds the lanes yet,
    /// so `try_write` always succeeds.
    pub fn replay(&self, event: &Event) {
        match event {
            Event::AssignmentCreated {
                id,
                resource_id,
                assignee_id,
                valid_from,
                valid_until,
            } => {
                let lane = self.lane_or_create(*resource_id);
                let mut guard = lane.try_write().expect("replay: uncontended write");
                self.insert(
                    &mut guard,
                    Assignment {
                        id: *id,
                        resource_id: *resource_id,
                        assignee_id: *assignee_id,
                        valid_from: *valid_from,
                        valid_until: *valid_until,
                    },
                );
            }
            Event::AssignmentUpdated {
                id,
                previous_resource_id,
                resource_id,
                assignee_id,
                valid_from,
                valid_until,
            } => {
                let updated = Assignment {
                    id: *id,
                    resource_id: *resource_id,
                    assignee_id: *assignee_id,
                    valid_from: *valid_from,
                    valid_until: *valid_until,
                };
                let source = self.lane_or_create(*previous_resource_id);
                let mut source_guard = source.try_write().expect("replay: uncontended write");
                if previous_resource_id == resource_id {
                    self.replace(&mut source_guard, None, updated);
                } else {
                    let target = self.lane_or_create(*resource_id);
                    let mut target_guard =
                        target.try_write().expect("replay: uncontended write");
                    self.replace(&mut source_guard, Some(&mut target_guard), updated);
                }
            }
            Event::AssignmentDeleted { id, resource_id } => {
                let lane = self.lane_or_create(*resource_id);
                let mut guard = lane.try_write().expect("replay: uncontended write");
                self.remove(&mut guard, *id);
            }
        }
    }
}
