//! Spawn Templates
//!
//! Content-defined records describing what a spawn creates. A template is a
//! root plus a flat array of child records; each child names its parent by
//! index into that array (`None` = the root), so there are no back-pointers.
//!
//! Resource ids are positive for roots. The i-th child of any root is
//! addressed on the wire as `-(1+i)` and resolved against its root.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::hash::{Fingerprint, FingerprintHasher};
use crate::core::transform::Transform;
use crate::network::protocol::ResourceId;

/// Name a behaviour factory is registered under.
pub type BehaviourKind = String;

/// Template loading failures. All are fatal: the session must not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Two templates claim the same resource id.
    #[error("resource id {resource_id} assigned to both '{first}' and '{second}'")]
    DuplicateIdentityAssignment {
        /// Contested id
        resource_id: ResourceId,
        /// Template already holding it
        first: String,
        /// Template that tried to claim it
        second: String,
    },

    /// Root resource ids must be positive.
    #[error("template '{name}' has non-positive resource id {resource_id}")]
    InvalidResourceId {
        /// Template name
        name: String,
        /// Offending id
        resource_id: ResourceId,
    },

    /// A child must name an earlier child (or the root) as parent.
    #[error("template '{template}' child {child} names parent {parent}, which does not precede it")]
    InvalidChildParent {
        /// Template name
        template: String,
        /// Child index
        child: usize,
        /// Parent index
        parent: usize,
    },

    /// Catalog JSON did not parse.
    #[error("catalog JSON: {0}")]
    Json(String),
}

/// One non-root member of a template hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildTemplate {
    /// Display name
    pub name: String,
    /// Index of the parent child record; `None` attaches to the root
    #[serde(default)]
    pub parent: Option<usize>,
    /// Local transform at spawn
    #[serde(default)]
    pub local: Transform,
    /// Behaviour kinds in ordinal order
    #[serde(default)]
    pub behaviours: Vec<BehaviourKind>,
}

impl ChildTemplate {
    /// A child attached directly to the root.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            local: Transform::IDENTITY,
            behaviours: Vec::new(),
        }
    }

    /// Attach under another child.
    pub fn under(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Set the spawn-time local transform.
    pub fn at(mut self, local: Transform) -> Self {
        self.local = local;
        self
    }

    /// Append a behaviour.
    pub fn with_behaviour(mut self, kind: impl Into<BehaviourKind>) -> Self {
        self.behaviours.push(kind.into());
        self
    }
}

/// A spawnable hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityTemplate {
    /// Positive id, or 0 to have one assigned at load
    #[serde(default)]
    pub resource_id: ResourceId,
    /// Display name of the root
    pub name: String,
    /// Root behaviour kinds in ordinal order
    #[serde(default)]
    pub behaviours: Vec<BehaviourKind>,
    /// Flat child array
    #[serde(default)]
    pub children: Vec<ChildTemplate>,
}

impl EntityTemplate {
    /// An unnumbered template with no children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            resource_id: 0,
            name: name.into(),
            behaviours: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Request a specific resource id.
    pub fn with_id(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = resource_id;
        self
    }

    /// Append a child record.
    pub fn with_child(mut self, child: ChildTemplate) -> Self {
        self.children.push(child);
        self
    }

    /// Append a root behaviour.
    pub fn with_behaviour(mut self, kind: impl Into<BehaviourKind>) -> Self {
        self.behaviours.push(kind.into());
        self
    }

    /// Wire resource id of the i-th child.
    #[inline]
    pub fn child_resource_id(index: usize) -> ResourceId {
        -(1 + index as ResourceId)
    }

    /// Child index addressed by a negative resource id.
    pub fn child_index(resource_id: ResourceId) -> Option<usize> {
        if resource_id >= 0 {
            return None;
        }
        let index = resource_id.checked_neg()?.checked_sub(1)?;
        usize::try_from(index).ok()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for (child, record) in self.children.iter().enumerate() {
            if let Some(parent) = record.parent {
                if parent >= child {
                    return Err(CatalogError::InvalidChildParent {
                        template: self.name.clone(),
                        child,
                        parent,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every spawnable template, keyed by resource id.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<ResourceId, EntityTemplate>,
}

impl TemplateCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template that already carries its id.
    pub fn insert(&mut self, template: EntityTemplate) -> Result<ResourceId, CatalogError> {
        let id = template.resource_id;
        if id <= 0 {
            return Err(CatalogError::InvalidResourceId {
                name: template.name,
                resource_id: id,
            });
        }
        if let Some(existing) = self.templates.get(&id) {
            return Err(CatalogError::DuplicateIdentityAssignment {
                resource_id: id,
                first: existing.name.clone(),
                second: template.name,
            });
        }
        template.validate()?;
        self.templates.insert(id, template);
        Ok(id)
    }

    /// Assemble a catalog, assigning ids where needed.
    ///
    /// Drafts keep a positive id nobody before them claimed. Drafts with a
    /// zero, negative or already-claimed id receive the next free id above
    /// the current maximum, in draft order.
    pub fn build(drafts: Vec<EntityTemplate>) -> Result<Self, CatalogError> {
        let mut taken = BTreeSet::new();
        let mut keep = Vec::with_capacity(drafts.len());
        let mut reassign = Vec::new();

        for draft in drafts {
            if draft.resource_id > 0 && taken.insert(draft.resource_id) {
                keep.push(draft);
            } else {
                reassign.push(draft);
            }
        }

        let mut next = taken.iter().next_back().copied().unwrap_or(0) + 1;
        for mut draft in reassign {
            info!(
                template = %draft.name,
                old = draft.resource_id,
                new = next,
                "Assigned resource id"
            );
            draft.resource_id = next;
            next += 1;
            keep.push(draft);
        }

        let mut catalog = Self::new();
        for template in keep {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    /// Parse a JSON array of templates and [`build`](Self::build) it.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let drafts: Vec<EntityTemplate> =
            serde_json::from_str(json).map_err(|e| CatalogError::Json(e.to_string()))?;
        Self::build(drafts)
    }

    /// Template by root resource id.
    pub fn get(&self, resource_id: ResourceId) -> Option<&EntityTemplate> {
        self.templates.get(&resource_id)
    }

    /// Templates in id order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityTemplate> {
        self.templates.values()
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Digest of ids, names, child layout and behaviour kinds.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = FingerprintHasher::for_catalog();
        h.update_u32(self.templates.len() as u32);
        for template in self.templates.values() {
            h.update_i32(template.resource_id);
            h.update_str(&template.name);
            h.update_u32(template.behaviours.len() as u32);
            for kind in &template.behaviours {
                h.update_str(kind);
            }
            h.update_u32(template.children.len() as u32);
            for child in &template.children {
                h.update_str(&child.name);
                h.update_i32(child.parent.map_or(-1, |p| p as i32));
                h.update_u32(child.behaviours.len() as u32);
                for kind in &child.behaviours {
                    h.update_str(kind);
                }
            }
        }
        h.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_resource_ids() {
        assert_eq!(EntityTemplate::child_resource_id(0), -1);
        assert_eq!(EntityTemplate::child_resource_id(4), -5);
        assert_eq!(EntityTemplate::child_index(-1), Some(0));
        assert_eq!(EntityTemplate::child_index(-5), Some(4));
        assert_eq!(EntityTemplate::child_index(0), None);
        assert_eq!(EntityTemplate::child_index(3), None);
        assert_eq!(EntityTemplate::child_index(i32::MIN), None);
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let mut catalog = TemplateCatalog::new();
        catalog.insert(EntityTemplate::new("Crate").with_id(5)).unwrap();
        let err = catalog
            .insert(EntityTemplate::new("Barrel").with_id(5))
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateIdentityAssignment {
                resource_id: 5,
                first: "Crate".into(),
                second: "Barrel".into(),
            }
        );
    }

    #[test]
    fn test_insert_rejects_unassigned_id() {
        let mut catalog = TemplateCatalog::new();
        assert!(matches!(
            catalog.insert(EntityTemplate::new("Crate")),
            Err(CatalogError::InvalidResourceId { resource_id: 0, .. })
        ));
    }

    #[test]
    fn test_build_assigns_free_ids() {
        let catalog = TemplateCatalog::build(vec![
            EntityTemplate::new("A").with_id(3),
            EntityTemplate::new("B"),
            EntityTemplate::new("C").with_id(3),
            EntityTemplate::new("D").with_id(7),
            EntityTemplate::new("E").with_id(-2),
        ])
        .unwrap();

        let names: Vec<_> = catalog
            .iter()
            .map(|t| (t.resource_id, t.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![(3, "A"), (7, "D"), (8, "B"), (9, "C"), (10, "E")]
        );
    }

    #[test]
    fn test_child_parent_must_precede() {
        let bad = EntityTemplate::new("Rig")
            .with_id(1)
            .with_child(ChildTemplate::new("Arm").under(1))
            .with_child(ChildTemplate::new("Hand"));
        assert!(matches!(
            TemplateCatalog::new().insert(bad),
            Err(CatalogError::InvalidChildParent { child: 0, parent: 1, .. })
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"resource_id": 5, "name": "Player", "behaviours": ["player_movement"],
             "children": [{"name": "Camera"}, {"name": "Weapon", "parent": 0}]},
            {"name": "Crate"}
        ]"#;
        let catalog = TemplateCatalog::from_json_str(json).unwrap();
        let player = catalog.get(5).unwrap();
        assert_eq!(player.children.len(), 2);
        assert_eq!(player.children[1].parent, Some(0));
        assert_eq!(catalog.get(6).unwrap().name, "Crate");
    }

    #[test]
    fn test_fingerprint_tracks_layout() {
        let a = TemplateCatalog::build(vec![EntityTemplate::new("Player")
            .with_id(5)
            .with_child(ChildTemplate::new("Camera"))])
        .unwrap();
        let b = TemplateCatalog::build(vec![EntityTemplate::new("Player").with_id(5)]).unwrap();

        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
