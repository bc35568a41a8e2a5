use std::collections::HashMap;

use ulid::Ulid;

use crate::model::{HeldResource, Ms};

/// Assignee-side index entry: one assignment seen from the holder's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holding {
    pub assignment_id: Ulid,
    pub resource_id: Ulid,
    pub valid_from: Ms,
}

/// Holder recency view.
///
/// Partitions holdings by resource, keeps the latest `valid_from` of each
/// partition, and orders the distinct resources newest first. Ended
/// assignments count the same as ongoing ones. Ties fall back to resource id.
pub fn rank_by_recency(holdings: &[Holding]) -> Vec<HeldResource> {
    let mut latest: HashMap<Ulid, Ms> = HashMap::new();
    for h in holdings {
        latest
            .entry(h.resource_id)
            .and_modify(|from| *from = (*from).max(h.valid_from))
            .or_insert(h.valid_from);
    }

    let mut ranked: Vec<HeldResource> = latest
        .into_iter()
        .map(|(resource_id, last_assigned_from)| HeldResource {
            resource_id,
            last_assigned_from,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.last_assigned_from
            .cmp(&a.last_assigned_from)
            .then(a.resource_id.cmp(&b.resource_id))
    });
    ranked
}
