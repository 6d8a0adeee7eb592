//! Replication Scheduler
//!
//! Each server tick picks the entities worth sending, orders them so parents
//! precede children, and packs them greedily into list messages that fit the
//! delivery mode's payload ceiling.

use tracing::{trace, warn};

use super::server_registry::ServerRegistry;
use crate::network::protocol::{
    EntityState, EntityStateList, NetworkId, ENTITY_STATE_LIST_HEADER_LEN,
};

/// Selection and packing policy.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationScheduler {
    /// Skip entities whose transform is bitwise unchanged since the last tick
    pub only_send_changes: bool,
    /// Ceiling for unreliable list messages
    pub unreliable_ceiling: usize,
    /// Ceiling for reliable list messages
    pub reliable_ceiling: usize,
}

impl ReplicationScheduler {
    /// Per-tick delta: changed entities (or all, if change filtering is off),
    /// packed under the unreliable ceiling.
    pub fn flush(&self, registry: &mut ServerRegistry, now: f32) -> Vec<EntityStateList> {
        let states = self.collect(registry, now, false);
        pack(states, self.unreliable_ceiling)
    }

    /// Every entity regardless of change, packed under the unreliable
    /// ceiling. Periodic refreshes repair deltas lost in transit.
    pub fn refresh(&self, registry: &mut ServerRegistry, now: f32) -> Vec<EntityStateList> {
        let states = self.collect(registry, now, true);
        pack(states, self.unreliable_ceiling)
    }

    /// Every entity regardless of change, packed under the reliable ceiling.
    pub fn full_snapshot(&self, registry: &mut ServerRegistry, now: f32) -> Vec<EntityStateList> {
        let states = self.collect(registry, now, true);
        pack(states, self.reliable_ceiling)
    }

    /// Selected states sorted by ascending hierarchy depth. Ties keep
    /// network id order.
    pub fn collect(&self, registry: &mut ServerRegistry, now: f32, full: bool) -> Vec<EntityState> {
        let mut selected: Vec<(usize, EntityState)> = Vec::new();
        let depths: Vec<(NetworkId, usize)> = registry
            .ids()
            .into_iter()
            .map(|id| (id, registry.hierarchy_depth(id)))
            .collect();

        for (id, depth) in depths {
            let Some(entity) = registry.get_mut(id) else {
                continue;
            };
            if full || !self.only_send_changes || entity.has_changed() {
                entity.last_update = now;
                selected.push((depth, entity.to_state(now)));
            }
        }

        selected.sort_by_key(|(depth, _)| *depth);
        selected.into_iter().map(|(_, state)| state).collect()
    }
}

/// Greedy first-fit packing.
///
/// States are appended in order; a state that would push the batch past
/// `ceiling` closes the batch and opens the next one. A state that cannot fit
/// even in an empty batch is dropped with a warning.
pub fn pack(states: Vec<EntityState>, ceiling: usize) -> Vec<EntityStateList> {
    let mut batches = Vec::new();
    let mut current: Vec<EntityState> = Vec::new();
    let mut len = ENTITY_STATE_LIST_HEADER_LEN;

    for state in states {
        let framed = state.framed_len();
        if ENTITY_STATE_LIST_HEADER_LEN + framed > ceiling {
            warn!(
                network_id = state.instance_id,
                bytes = framed,
                ceiling,
                "Entity state exceeds payload ceiling; dropped"
            );
            continue;
        }
        if len + framed > ceiling {
            trace!(entities = current.len(), bytes = len, "Flushing batch");
            batches.push(EntityStateList::new(std::mem::take(&mut current)));
            len = ENTITY_STATE_LIST_HEADER_LEN;
        }
        len += framed;
        current.push(state);
    }

    if !current.is_empty() {
        batches.push(EntityStateList::new(current));
    }
    batches
}
