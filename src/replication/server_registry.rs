//! Server Entity Registry
//!
//! The authoritative set of live replicated entities, keyed by network id.
//! Only the server's tick mutates it. Network ids are server-local instance
//! ids handed out from a monotonically increasing counter.

use std::collections::BTreeMap;

use tracing::debug;

use super::template::EntityTemplate;
use super::ReplicationError;
use crate::core::transform::Transform;
use crate::game::behaviour::{BehaviourRegistry, BehaviourTable};
use crate::network::protocol::{EntityState, NetworkId, ResourceId};
use crate::network::router::Role;

/// An authoritative replicated entity.
#[derive(Debug)]
pub struct ServerEntity {
    /// Authoritative identity
    pub network_id: NetworkId,
    /// Template root id, or `-(1+i)` for the i-th template child
    pub resource_id: ResourceId,
    /// Network id of the hierarchy root (self for roots)
    pub root_id: NetworkId,
    /// Current parent
    pub parent: Option<NetworkId>,
    /// Display name
    pub name: String,
    /// Parent-local transform
    pub transform: Transform,
    /// Server time of the last snapshot taken of this entity
    pub last_update: f32,
    /// Ordinal-indexed behaviours
    pub behaviours: BehaviourTable,
    cached: Option<Transform>,
}

impl ServerEntity {
    /// Create an entity with no behaviours.
    pub fn new(network_id: NetworkId, resource_id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            network_id,
            resource_id,
            root_id: network_id,
            parent: None,
            name: name.into(),
            transform: Transform::IDENTITY,
            last_update: 0.0,
            behaviours: BehaviourTable::default(),
            cached: None,
        }
    }

    /// Snapshot for the wire, stamped with `time`.
    pub fn to_state(&self, time: f32) -> EntityState {
        EntityState {
            time,
            has_parent: self.parent.is_some(),
            resource_id: self.resource_id,
            instance_id: self.network_id,
            root_instance_id: self.root_id,
            parent_instance_id: self.parent.unwrap_or(0),
            transform: self.transform,
            name: self.name.clone(),
        }
    }

    /// True if the transform differs bitwise from the previous check.
    /// Updates the cache either way.
    pub fn has_changed(&mut self) -> bool {
        let changed = self
            .cached
            .map_or(true, |cached| !cached.bit_eq(&self.transform));
        self.cached = Some(self.transform);
        changed
    }

    /// Forget the cached transform so the next check reports a change.
    pub fn touch(&mut self) {
        self.cached = None;
    }
}

/// Authoritative entity storage.
#[derive(Debug)]
pub struct ServerRegistry {
    entities: BTreeMap<NetworkId, ServerEntity>,
    next_id: NetworkId,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl ServerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next network id.
    pub fn allocate_id(&mut self) -> NetworkId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Store an entity under its network id, replacing any previous holder.
    pub fn insert(&mut self, entity: ServerEntity) -> Option<ServerEntity> {
        if entity.network_id >= self.next_id {
            self.next_id = entity.network_id + 1;
        }
        self.entities.insert(entity.network_id, entity)
    }

    /// Remove and return an entity.
    pub fn remove(&mut self, network_id: NetworkId) -> Option<ServerEntity> {
        self.entities.remove(&network_id)
    }

    /// Entity by id.
    pub fn get(&self, network_id: NetworkId) -> Option<&ServerEntity> {
        self.entities.get(&network_id)
    }

    /// Mutable entity by id.
    pub fn get_mut(&mut self, network_id: NetworkId) -> Option<&mut ServerEntity> {
        self.entities.get_mut(&network_id)
    }

    /// True if the id is registered.
    pub fn contains(&self, network_id: NetworkId) -> bool {
        self.entities.contains_key(&network_id)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ServerEntity> {
        self.entities.values()
    }

    /// Mutable entities in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ServerEntity> {
        self.entities.values_mut()
    }

    /// Registered ids in order.
    pub fn ids(&self) -> Vec<NetworkId> {
        self.entities.keys().copied().collect()
    }

    /// Build every member of a template hierarchy. Nothing is registered;
    /// the caller inserts the returned entities root first.
    pub fn instantiate(
        &mut self,
        template: &EntityTemplate,
        transform: Transform,
        parent: Option<NetworkId>,
        behaviours: &BehaviourRegistry,
    ) -> Vec<ServerEntity> {
        let root_id = self.allocate_id();
        let mut root = ServerEntity::new(root_id, template.resource_id, template.name.clone());
        root.parent = parent;
        root.transform = transform;
        root.behaviours = behaviours.create_table(&template.behaviours, Role::Server);

        let mut child_ids = Vec::with_capacity(template.children.len());
        let mut members = vec![root];
        for (index, child) in template.children.iter().enumerate() {
            let id = self.allocate_id();
            child_ids.push(id);

            let mut entity = ServerEntity::new(id, EntityTemplate::child_resource_id(index), child.name.clone());
            entity.root_id = root_id;
            // Catalog validation guarantees parents precede children.
            entity.parent = Some(child.parent.and_then(|p| child_ids.get(p).copied()).unwrap_or(root_id));
            entity.transform = child.local;
            entity.behaviours = behaviours.create_table(&child.behaviours, Role::Server);
            members.push(entity);
        }

        debug!(
            template = %template.name,
            root = root_id,
            members = members.len(),
            "Instantiated template"
        );
        members
    }

    /// Distance to the topmost ancestor. Unknown parents end the walk.
    pub fn hierarchy_depth(&self, network_id: NetworkId) -> usize {
        let mut depth = 0;
        let mut current = self.get(network_id).and_then(|e| e.parent);
        while let Some(parent) = current {
            if depth > self.entities.len() {
                break;
            }
            depth += 1;
            current = self.get(parent).and_then(|e| e.parent);
        }
        depth
    }

    /// `network_id` and every descendant, deepest first.
    pub fn subtree_deepest_first(&self, network_id: NetworkId) -> Vec<NetworkId> {
        let mut ordered = vec![network_id];
        let mut cursor = 0;
        while cursor < ordered.len() {
            let current = ordered[cursor];
            ordered.extend(
                self.entities
                    .values()
                    .filter(|e| e.parent == Some(current) && e.network_id != network_id)
                    .map(|e| e.network_id),
            );
            cursor += 1;
            if ordered.len() > self.entities.len() + 1 {
                break;
            }
        }
        ordered.reverse();
        ordered
    }

    /// Reparent an entity, refusing unknown parents and cycles.
    pub fn set_parent(
        &mut self,
        network_id: NetworkId,
        parent: Option<NetworkId>,
    ) -> Result<(), ReplicationError> {
        if !self.contains(network_id) {
            return Err(ReplicationError::UnknownEntityReference(network_id));
        }
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(ReplicationError::UnknownEntityReference(parent));
            }
            let mut current = Some(parent);
            while let Some(ancestor) = current {
                if ancestor == network_id {
                    return Err(ReplicationError::HierarchyCycle {
                        child: network_id,
                        parent,
                    });
                }
                current = self.get(ancestor).and_then(|e| e.parent);
            }
        }
        if let Some(entity) = self.get_mut(network_id) {
            entity.parent = parent;
        }
        Ok(())
    }
}
