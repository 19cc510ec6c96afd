//! Core types for provisioning runs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::kind::ResourceKind;
use crate::reconcile::AttributeChange;
use crate::retry::RetryConfig;
use crate::state::StateSnapshot;

/// Lifecycle of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Resolving,
    Reconciling,
    Executing,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    /// Whether the node reached a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Reconciling => "reconciling",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a node was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed or was skipped itself
    BlockedBy(String),
    /// The run was cancelled before the node started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockedBy(node) => write!(f, "blocked by {node}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final outcome of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    Created,
    Updated { changed: Vec<String> },
    /// Created anew because an immutable field changed
    Replaced { previous_id: String },
    Unchanged,
    Failed { reason: String },
    Skipped { reason: SkipReason },
}

impl ProvisioningOutcome {
    /// Whether the node ended in [`NodeState::Succeeded`]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    /// Whether the run changed provider state for this node
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated { .. } | Self::Replaced { .. }
        )
    }

    /// Terminal node state this outcome corresponds to
    pub fn state(&self) -> NodeState {
        match self {
            Self::Failed { .. } => NodeState::Failed,
            Self::Skipped { .. } => NodeState::Skipped,
            _ => NodeState::Succeeded,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated { .. } => "updated",
            Self::Replaced { .. } => "replaced",
            Self::Unchanged => "unchanged",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Per-node entry of a [`RunReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub name: String,
    pub kind: ResourceKind,
    pub outcome: ProvisioningOutcome,
    /// Provider id after the run, if the resource exists
    pub id: Option<String>,
}

/// Why a resource was removed from the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    /// Superseded by a replacement
    Replaced,
    /// No longer declared
    Orphaned,
}

/// A resource deleted at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub id: String,
    pub removal: Removal,
}

/// A resource the run meant to delete but kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub id: String,
    pub reason: String,
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Process exit code conventionally used for this status
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Failed => 1,
            Self::Cancelled => 130,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// One entry per node, in execution order
    pub nodes: Vec<NodeReport>,
    pub deleted: Vec<DeletedResource>,
    pub retained: Vec<RetainedResource>,
    /// State to persist for the next run
    pub state: StateSnapshot,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&ProvisioningOutcome> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| &n.outcome)
    }

    pub fn summary(&self) -> ExecuteSummary {
        let mut summary = ExecuteSummary::default();
        for node in &self.nodes {
            summary.add_result(&node.outcome);
        }
        summary.deleted = self.deleted.len();
        summary
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Outcome counts of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deleted: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// No node failed or was skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of nodes processed
    pub fn total(&self) -> usize {
        self.created + self.updated + self.replaced + self.unchanged + self.failed + self.skipped
    }

    pub fn add_result(&mut self, outcome: &ProvisioningOutcome) {
        match outcome {
            ProvisioningOutcome::Created => self.created += 1,
            ProvisioningOutcome::Updated { .. } => self.updated += 1,
            ProvisioningOutcome::Replaced { .. } => self.replaced += 1,
            ProvisioningOutcome::Unchanged => self.unchanged += 1,
            ProvisioningOutcome::Failed { .. } => self.failed += 1,
            ProvisioningOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Worker threads provisioning independent nodes
    pub jobs: usize,
    pub retry: RetryConfig,
    /// Deadline for a single provider call
    pub call_timeout: Duration,
    /// How long a retried create waits for a timed-out earlier create
    pub settle_timeout: Duration,
    /// Delete recorded resources that are no longer declared
    pub prune: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(60),
            settle_timeout: Duration::from_secs(300),
            prune: false,
        }
    }
}

/// What a run would do to one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Create,
    Update { changes: Vec<AttributeChange> },
    Replace { fields: Vec<String> },
    NoOp,
    /// Inputs depend on outputs that only exist after an upstream change
    Deferred { waiting_on: String },
    /// The node cannot be provisioned as declared
    Blocked { reason: String },
}

impl PlannedAction {
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update { .. } | Self::Replace { .. } | Self::Deferred { .. }
        )
    }
}

/// One entry of a [`Plan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub name: String,
    pub kind: ResourceKind,
    pub action: PlannedAction,
}

/// Preview of a run, computed from lookups only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// In execution order
    pub changes: Vec<PlannedChange>,
    /// Recorded resources that are no longer declared
    pub orphans: Vec<String>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.action.is_change())
    }

    pub fn action(&self, name: &str) -> Option<&PlannedAction> {
        self.changes
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.action)
    }
}
