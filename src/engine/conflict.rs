use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_interval(interval: &Interval) -> Result<(), EngineError> {
    let in_range = |t: Ms| (MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t);
    if !in_range(interval.from) || interval.until.is_some_and(|u| !in_range(u)) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    match interval.until {
        Some(until) if !interval.is_well_formed() => Err(EngineError::InvalidInterval {
            valid_from: interval.from,
            valid_until: until,
        }),
        _ => Ok(()),
    }
}

/// Reject `candidate` if any assignment on the lane intersects it.
/// `exclude` skips the record being replaced by an update.
pub(crate) fn check_no_overlap(
    lane: &ResourceLane,
    candidate: &Interval,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let hit = lane
        .overlapping(candidate)
        .find(|a| Some(a.id) != exclude);
    match hit {
        Some(existing) => {
            metrics::counter!(crate::observability::ASSIGNMENT_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict {
                resource_id: lane.resource_id,
                existing: existing.id,
            })
        }
        None => Ok(()),
    }
}
