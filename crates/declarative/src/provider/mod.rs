//! Provider abstraction for the cloud control plane.
//!
//! The [`Provider`] trait is the only way the engine touches the outside
//! world. It mirrors the CRUD surface every resource kind shares, which
//! keeps the engine independent of any particular cloud SDK:
//! - a real API client in production
//! - [`MemoryProvider`] for tests and local simulation

pub mod memory;

pub use memory::{Call, Inventory, MemoryProvider, Operation};

use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::kind::ResourceKind;
use crate::model::{Attributes, Outputs};

/// Provider-side view of an existing resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Provider-assigned identifier
    pub id: String,
    /// Attributes as last applied
    pub attributes: Attributes,
    pub outputs: Outputs,
}

/// Result of looking a resource up by key
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    NotFound,
    Found(CurrentState),
}

impl Lookup {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// CRUD operations against the control plane.
///
/// Implementations must be safe to call from several worker threads at
/// once; the engine provisions independent nodes concurrently.
pub trait Provider: Send + Sync {
    /// Find a resource of `kind` by its lookup key.
    fn lookup(&self, kind: ResourceKind, key: &str) -> ProviderResult<Lookup>;

    /// Create a resource addressable by `key` afterwards.
    fn create(&self, kind: ResourceKind, key: &str, attrs: &Attributes)
    -> ProviderResult<CurrentState>;

    /// Update a resource in place.
    fn update(&self, kind: ResourceKind, id: &str, attrs: &Attributes) -> ProviderResult<Outputs>;

    /// Delete a resource.
    fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()>;
}
