//! Replication Module
//!
//! Entity state flowing from the authoritative server to client proxies.
//!
//! ## Module Structure
//!
//! - `template`: Spawn templates and the resource id catalog
//! - `server_registry`: Authoritative entity storage
//! - `scheduler`: Per-tick selection and MTU-bounded packing
//! - `client_registry`: Proxies, lazy instantiation, child binding
//! - `interpolation`: Two-snapshot render smoothing

pub mod client_registry;
pub mod interpolation;
pub mod scheduler;
pub mod server_registry;
pub mod template;

use thiserror::Error;

use crate::network::protocol::{NetworkId, ResourceId};

pub use client_registry::{ApplyOutcome, ClientRegistry, DropReason, LocalId, Proxy};
pub use interpolation::{Interpolator, SamplePhase, Snapshot};
pub use scheduler::ReplicationScheduler;
pub use server_registry::{ServerEntity, ServerRegistry};
pub use template::{BehaviourKind, CatalogError, ChildTemplate, EntityTemplate, TemplateCatalog};

/// Registry and dispatch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    /// No live entity with this network id.
    #[error("unknown entity {0}")]
    UnknownEntityReference(NetworkId),

    /// The entity has no behaviour at this ordinal.
    #[error("entity {network_id} has no behaviour at index {index}")]
    UnknownBehaviour {
        /// Target entity
        network_id: NetworkId,
        /// Requested ordinal
        index: i32,
    },

    /// No template registered under this resource id.
    #[error("unknown template {0}")]
    UnknownTemplate(ResourceId),

    /// Reparenting would create a cycle.
    #[error("parenting {child} under {parent} creates a cycle")]
    HierarchyCycle {
        /// Entity being moved
        child: NetworkId,
        /// Requested parent
        parent: NetworkId,
    },
}
