use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Closed custody interval `[from, until]`. `until = None` means still ongoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub from: Ms,
    pub until: Option<Ms>,
}

impl Interval {
    pub fn new(from: Ms, until: Option<Ms>) -> Self {
        Self { from, until }
    }

    /// `until` is absent or not before `from`.
    pub fn is_well_formed(&self) -> bool {
        self.until.is_none_or(|u| u >= self.from)
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        overlaps(self.from, self.until, other.from, other.until)
    }
}

/// Closed-endpoint intersection test. An absent `until` acts as +infinity,
/// so touching endpoints overlap and two open intervals always overlap.
pub fn overlaps(a_from: Ms, a_until: Option<Ms>, b_from: Ms, b_until: Option<Ms>) -> bool {
    b_until.is_none_or(|bu| a_from <= bu) && a_until.is_none_or(|au| b_from <= au)
}

/// One continuous period during which a resource is held by an assignee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub assignee_id: Ulid,
    pub valid_from: Ms,
    pub valid_until: Option<Ms>,
}

impl Assignment {
    pub fn interval(&self) -> Interval {
        Interval::new(self.valid_from, self.valid_until)
    }

    /// Derived predicate for callers; the engine itself never consults it.
    pub fn is_active_at(&self, now: Ms) -> bool {
        self.valid_until.is_none_or(|u| u >= now)
    }
}

/// All assignments of a single resource, sorted by `valid_from`.
#[derive(Debug, Clone)]
pub struct ResourceLane {
    pub resource_id: Ulid,
    pub assignments: Vec<Assignment>,
}

impl ResourceLane {
    pub fn new(resource_id: Ulid) -> Self {
        Self {
            resource_id,
            assignments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by valid_from.
    pub fn insert(&mut self, assignment: Assignment) {
        let pos = self
            .assignments
            .binary_search_by_key(&assignment.valid_from, |a| a.valid_from)
            .unwrap_or_else(|e| e);
        self.assignments.insert(pos, assignment);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Assignment> {
        let pos = self.assignments.iter().position(|a| a.id == id)?;
        Some(self.assignments.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Assignments whose interval intersects `query`.
    /// Binary search skips everything starting after `query.until`.
    pub fn overlapping(&self, query: &Interval) -> impl Iterator<Item = &Assignment> {
        let right_bound = match query.until {
            Some(until) => self.assignments.partition_point(|a| a.valid_from <= until),
            None => self.assignments.len(),
        };
        self.assignments[..right_bound]
            .iter()
            .filter(move |a| a.valid_until.is_none_or(|u| u >= query.from))
    }
}

/// Assignment WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AssignmentCreated {
        id: Ulid,
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
    },
    AssignmentUpdated {
        id: Ulid,
        previous_resource_id: Ulid,
        resource_id: Ulid,
        assignee_id: Ulid,
        valid_from: Ms,
        valid_until: Option<Ms>,
    },
    AssignmentDeleted {
        id: Ulid,
        resource_id: Ulid,
    },
}

impl Event {
    pub fn created(a: &Assignment) -> Self {
        Event::AssignmentCreated {
            id: a.id,
            resource_id: a.resource_id,
            assignee_id: a.assignee_id,
            valid_from: a.valid_from,
            valid_until: a.valid_until,
        }
    }
}

/// Catalog WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    ItemRegistered { id: Ulid },
    ItemRetired { id: Ulid },
    PersonRegistered { id: Ulid },
    PersonRetired { id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// One row of the holder recency view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldResource {
    pub resource_id: Ulid,
    /// Start of the most recent assignment of this resource to the assignee.
    pub last_assigned_from: Ms,
}
