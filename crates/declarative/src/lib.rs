//! # Declarative
//!
//! Declarative provisioning of CDN edge stacks.
//!
//! This crate provides the core pieces for declaring a desired topology of
//! edge resources, resolving what already exists, and converging the
//! provider to match.
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: A named resource of one [`ResourceKind`] whose fields
//!   may reference other nodes' outputs
//! - **DependencyGraph**: Validated, acyclic order over the nodes
//! - **Reconcile**: Create, no-op, update or replace, decided per node
//! - **Executor**: Runs the graph with bounded parallelism and reports a
//!   [`ProvisioningOutcome`] per node
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use declarative::{
//!     BucketSpec, DesiredState, ExecuteOptions, MemoryProvider, ProvisioningOutcome,
//!     ReconcileContext, ResourceNode, ResourceSpec, execute,
//! };
//!
//! let desired = DesiredState::new(vec![ResourceNode::new(
//!     "site",
//!     ResourceSpec::Bucket(BucketSpec {
//!         bucket_name: "site.example.com".into(),
//!     }),
//! )]);
//!
//! let ctx = ReconcileContext::new(Arc::new(MemoryProvider::new()));
//! let report = execute(&desired, &ctx, &ExecuteOptions::default())?;
//! assert_eq!(report.outcome("site"), Some(&ProvisioningOutcome::Created));
//! # Ok::<(), declarative::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`Provider`]: CRUD access to the cloud control plane
//! - [`ProgressCallback`]: Receives node state transitions
//! - [`RetryCallback`]: Observes retries of provider calls
//!
//! This allows the crate to be used without hard dependencies on a
//! particular cloud SDK or UI framework.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod kind;
pub mod model;
pub mod provider;
pub mod reconcile;
pub mod resolver;
pub mod retry;
pub mod routing;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{
    CancellationToken, LogProgress, NoProgress, ProgressCallback, ReconcileContext,
    ResolvedAttributes,
};
pub use error::{Error, ProviderError, ProviderResult, Result};
pub use executor::{execute, plan};
pub use graph::DependencyGraph;
pub use kind::{KindSpec, ResourceKind};
pub use model::{
    AccessIdentitySpec, Attributes, BucketSpec, CertificateSpec, ContentSpec, DesiredState,
    DistributionSpec, DnsRecordSpec, OutputRef, Outputs, RenderError, ResourceNode, ResourceSpec,
    ZoneSpec,
};
pub use provider::{CurrentState, Lookup, MemoryProvider, Provider};
pub use reconcile::{AttributeChange, Decision, reconcile};
pub use retry::{RetryCallback, RetryConfig};
pub use routing::{
    AllowedMethods, Behavior, OriginSource, OriginSpec, RoutingRule, RoutingTable, compile,
};
pub use state::{StateRecord, StateSnapshot};
pub use types::{
    DeletedResource, ExecuteOptions, ExecuteSummary, NodeReport, NodeState, Plan, PlannedAction,
    PlannedChange, ProvisioningOutcome, Removal, RetainedResource, RunReport, RunStatus,
    SkipReason,
};
