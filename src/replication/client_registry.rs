//! Client Entity Registry
//!
//! Local proxies mirroring the server's entities. Proxies are created lazily
//! from the first state message that can be resolved, and never from a
//! message whose parent or root is unknown: those are dropped, and the next
//! periodic send repairs the gap.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::interpolation::{Interpolator, Snapshot};
use super::template::{EntityTemplate, TemplateCatalog};
use crate::core::transform::Transform;
use crate::game::behaviour::{BehaviourRegistry, BehaviourTable};
use crate::network::protocol::{EntityState, NetworkId, ResourceId};
use crate::network::router::Role;

/// Process-local proxy handle.
pub type LocalId = u32;

/// Client-side mirror of one server entity (or a not-yet-bound template child).
#[derive(Debug)]
pub struct Proxy {
    /// Local handle
    pub local_id: LocalId,
    /// Bound network id; `None` for template children not yet seen on the wire
    pub network_id: Option<NetworkId>,
    /// Template root id or `-(1+i)`
    pub resource_id: ResourceId,
    /// Display name
    pub name: String,
    /// Local parent
    pub parent: Option<LocalId>,
    /// Flat child array created with a root, in template order. A slot is
    /// emptied when its bound child is destroyed.
    pub template_children: Vec<Option<LocalId>>,
    /// Latest accepted authoritative transform
    pub state: Transform,
    /// Smoothed transform for rendering
    pub render: Transform,
    /// Server time of the latest accepted update
    pub last_update: f32,
    /// Snapshot buffer
    pub interpolator: Interpolator,
    /// Ordinal-indexed behaviours
    pub behaviours: BehaviourTable,
    has_state: bool,
}

impl Proxy {
    fn new(local_id: LocalId, resource_id: ResourceId, name: String, behaviours: BehaviourTable) -> Self {
        Self {
            local_id,
            network_id: None,
            resource_id,
            name,
            parent: None,
            template_children: Vec::new(),
            state: Transform::IDENTITY,
            render: Transform::IDENTITY,
            last_update: 0.0,
            interpolator: Interpolator::default(),
            behaviours,
            has_state: false,
        }
    }
}

/// Why a state message was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The parent network id is not known yet
    MissingParent(NetworkId),
    /// The root of a child message is not known yet
    MissingRoot(NetworkId),
    /// No template with this id
    UnknownTemplate(ResourceId),
    /// The root's template has no such child
    ChildOutOfRange {
        /// Root network id
        root: NetworkId,
        /// Requested child index
        index: usize,
    },
    /// The child slot is already bound to another network id
    ChildAlreadyBound {
        /// Network id already bound
        bound: NetworkId,
    },
    /// The child slot's entity was already destroyed
    ChildDestroyed {
        /// Root network id
        root: NetworkId,
        /// Requested child index
        index: usize,
    },
    /// Resource id zero is never valid
    InvalidResourceId,
}

/// Result of ingesting one state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A template was instantiated and its root bound
    Spawned(LocalId),
    /// A template child was bound to its network id
    Bound(LocalId),
    /// A known proxy was updated
    Applied(LocalId),
    /// Older than the proxy's latest update; ignored
    Stale(LocalId),
    /// Could not be resolved
    Dropped(DropReason),
}

impl ApplyOutcome {
    /// Proxy touched by the message, if any.
    pub fn local_id(&self) -> Option<LocalId> {
        match *self {
            ApplyOutcome::Spawned(id)
            | ApplyOutcome::Bound(id)
            | ApplyOutcome::Applied(id)
            | ApplyOutcome::Stale(id) => Some(id),
            ApplyOutcome::Dropped(_) => None,
        }
    }
}

/// Proxy arena plus network id index.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    proxies: BTreeMap<LocalId, Proxy>,
    by_network: BTreeMap<NetworkId, LocalId>,
    next_local: LocalId,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one entity state.
    pub fn apply_state(
        &mut self,
        state: &EntityState,
        catalog: &TemplateCatalog,
        behaviours: &BehaviourRegistry,
        tick_interval: f32,
    ) -> ApplyOutcome {
        let (local_id, created) = match self.by_network.get(&state.instance_id) {
            Some(local_id) => (*local_id, None),
            None => match self.materialize(state, catalog, behaviours) {
                Ok(outcome) => match outcome {
                    ApplyOutcome::Spawned(id) | ApplyOutcome::Bound(id) => (id, Some(outcome)),
                    other => return other,
                },
                Err(reason) => {
                    warn!(
                        network_id = state.instance_id,
                        resource_id = state.resource_id,
                        ?reason,
                        "Dropping unresolved entity state"
                    );
                    return ApplyOutcome::Dropped(reason);
                }
            },
        };

        let parent_local = state.parent().and_then(|p| self.by_network.get(&p).copied());
        let Some(proxy) = self.proxies.get_mut(&local_id) else {
            self.by_network.remove(&state.instance_id);
            return ApplyOutcome::Dropped(DropReason::MissingRoot(state.root_instance_id));
        };

        if proxy.has_state && state.time < proxy.last_update {
            return ApplyOutcome::Stale(local_id);
        }

        proxy.last_update = state.time;
        proxy.state = state.transform;
        if proxy.name != state.name {
            proxy.name.clone_from(&state.name);
        }
        proxy.interpolator.push(
            Snapshot {
                time: state.time,
                transform: state.transform,
            },
            tick_interval,
        );
        if !proxy.has_state {
            proxy.render = state.transform;
            proxy.has_state = true;
        }

        // Reparent on every accepted update. An unknown parent keeps the
        // current attachment.
        match (state.has_parent, parent_local) {
            (true, Some(parent)) if parent != local_id => proxy.parent = Some(parent),
            (true, _) => {}
            (false, _) => proxy.parent = None,
        }

        created.unwrap_or(ApplyOutcome::Applied(local_id))
    }

    fn materialize(
        &mut self,
        state: &EntityState,
        catalog: &TemplateCatalog,
        behaviours: &BehaviourRegistry,
    ) -> Result<ApplyOutcome, DropReason> {
        if let Some(parent) = state.parent() {
            if !self.by_network.contains_key(&parent) {
                return Err(DropReason::MissingParent(parent));
            }
        }

        if state.resource_id > 0 {
            let template = catalog
                .get(state.resource_id)
                .ok_or(DropReason::UnknownTemplate(state.resource_id))?;
            let root = self.instantiate(template, behaviours);
            self.bind(root, state.instance_id);
            debug!(network_id = state.instance_id, template = %template.name, "Spawned proxy");
            return Ok(ApplyOutcome::Spawned(root));
        }

        let index = EntityTemplate::child_index(state.resource_id).ok_or(DropReason::InvalidResourceId)?;
        let root_local = *self
            .by_network
            .get(&state.root_instance_id)
            .ok_or(DropReason::MissingRoot(state.root_instance_id))?;
        let slot = self
            .proxies
            .get(&root_local)
            .and_then(|root| root.template_children.get(index).copied())
            .ok_or(DropReason::ChildOutOfRange {
                root: state.root_instance_id,
                index,
            })?;
        let child_local = slot.ok_or(DropReason::ChildDestroyed {
            root: state.root_instance_id,
            index,
        })?;
        if let Some(bound) = self.proxies.get(&child_local).and_then(|c| c.network_id) {
            return Err(DropReason::ChildAlreadyBound { bound });
        }
        self.bind(child_local, state.instance_id);
        Ok(ApplyOutcome::Bound(child_local))
    }

    fn allocate(&mut self) -> LocalId {
        let id = self.next_local;
        self.next_local += 1;
        id
    }

    fn instantiate(&mut self, template: &EntityTemplate, behaviours: &BehaviourRegistry) -> LocalId {
        let root_id = self.allocate();
        let root_table = behaviours.create_table(&template.behaviours, Role::Client);
        let mut root = Proxy::new(root_id, template.resource_id, template.name.clone(), root_table);

        for (index, child) in template.children.iter().enumerate() {
            let id = self.allocate();
            let table = behaviours.create_table(&child.behaviours, Role::Client);
            let mut proxy = Proxy::new(id, EntityTemplate::child_resource_id(index), child.name.clone(), table);
            proxy.parent = Some(
                child
                    .parent
                    .and_then(|p| root.template_children.get(p).copied().flatten())
                    .unwrap_or(root_id),
            );
            proxy.state = child.local;
            proxy.render = child.local;
            root.template_children.push(Some(id));
            self.proxies.insert(id, proxy);
        }

        self.proxies.insert(root_id, root);
        root_id
    }

    fn bind(&mut self, local_id: LocalId, network_id: NetworkId) {
        if let Some(proxy) = self.proxies.get_mut(&local_id) {
            proxy.network_id = Some(network_id);
            self.by_network.insert(network_id, local_id);
        }
    }

    /// Remove a proxy and its unbound template children. Bound children
    /// survive, detached to the root. Returns the removed local ids.
    pub fn destroy(&mut self, network_id: NetworkId) -> Option<Vec<LocalId>> {
        let local_id = self.by_network.remove(&network_id)?;
        let proxy = self.proxies.remove(&local_id)?;

        let mut removed = vec![local_id];
        for child in proxy.template_children.into_iter().flatten() {
            let unbound = self
                .proxies
                .get(&child)
                .is_some_and(|c| c.network_id.is_none());
            if unbound {
                self.proxies.remove(&child);
                removed.push(child);
            }
        }

        for other in self.proxies.values_mut() {
            if other.parent.is_some_and(|p| removed.contains(&p)) {
                other.parent = None;
            }
            for slot in other.template_children.iter_mut() {
                if slot.is_some_and(|c| removed.contains(&c)) {
                    *slot = None;
                }
            }
        }
        debug!(network_id, removed = removed.len(), "Destroyed proxy");
        Some(removed)
    }

    /// Drop everything (local disconnect).
    pub fn clear(&mut self) {
        self.proxies.clear();
        self.by_network.clear();
    }

    /// Advance interpolation for every bound proxy.
    pub fn update_render(&mut self, dt: f32, tick_interval: f32, interpolate: bool) {
        for proxy in self.proxies.values_mut() {
            if !proxy.has_state {
                continue;
            }
            if interpolate {
                if let Some((transform, _)) = proxy.interpolator.sample(dt, tick_interval) {
                    proxy.render = transform;
                }
            } else {
                proxy.render = proxy.state;
            }
        }
    }

    /// Render transform composed up the parent chain.
    pub fn world_transform(&self, local_id: LocalId) -> Option<Transform> {
        let mut proxy = self.proxies.get(&local_id)?;
        let mut world = proxy.render;
        let mut hops = 0;
        while let Some(parent) = proxy.parent {
            hops += 1;
            if hops > self.proxies.len() {
                break;
            }
            let Some(next) = self.proxies.get(&parent) else {
                break;
            };
            world = next.render.mul_transform(&world);
            proxy = next;
        }
        Some(world)
    }

    /// Proxy by local id.
    pub fn get(&self, local_id: LocalId) -> Option<&Proxy> {
        self.proxies.get(&local_id)
    }

    /// Mutable proxy by local id.
    pub fn get_mut(&mut self, local_id: LocalId) -> Option<&mut Proxy> {
        self.proxies.get_mut(&local_id)
    }

    /// Local id bound to a network id.
    pub fn local_id(&self, network_id: NetworkId) -> Option<LocalId> {
        self.by_network.get(&network_id).copied()
    }

    /// Proxy by network id.
    pub fn by_network(&self, network_id: NetworkId) -> Option<&Proxy> {
        self.local_id(network_id).and_then(|l| self.proxies.get(&l))
    }

    /// Mutable proxy by network id.
    pub fn by_network_mut(&mut self, network_id: NetworkId) -> Option<&mut Proxy> {
        let local_id = self.local_id(network_id)?;
        self.proxies.get_mut(&local_id)
    }

    /// Bound network ids in order.
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.by_network.keys().copied().collect()
    }

    /// Number of bound proxies.
    pub fn bound_len(&self) -> usize {
        self.by_network.len()
    }

    /// All proxies, bound or not.
    pub fn iter(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values()
    }

    /// Mutable access to all proxies.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Proxy> {
        self.proxies.values_mut()
    }
}
