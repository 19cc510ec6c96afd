//! Error types for graph construction, validation and provider calls.
//!
//! Errors in [`Error`] are fatal for a run and are always raised before any
//! provider side effect. Errors in [`ProviderError`] are scoped to a single
//! node: the engine turns them into a failed outcome and skips dependents.

use std::time::Duration;
use thiserror::Error;

use crate::kind::ResourceKind;

/// Errors that abort a run before provisioning starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two nodes share a logical name
    #[error("duplicate resource name: {name}")]
    DuplicateNode { name: String },

    /// A reference or explicit dependency names a node that is not declared
    #[error("{node} references unknown resource '{target}'")]
    DanglingReference { node: String, target: String },

    /// A reference names an output the target kind never produces
    #[error("{node} references '{target}.{output}', but {kind} resources have no output '{output}'")]
    UnknownOutput {
        node: String,
        target: String,
        kind: ResourceKind,
        output: String,
    },

    /// The reference graph contains a cycle
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency {
        /// Node sequence of the cycle, first node repeated at the end
        cycle: Vec<String>,
    },

    /// Default-rule or rule-shape problems in a routing table
    #[error("routing table of {distribution}: {message}")]
    RoutingConfig {
        distribution: String,
        message: String,
    },

    /// Two non-default rules share a path pattern
    #[error("routing table of {distribution}: duplicate path pattern '{pattern}'")]
    DuplicatePattern {
        distribution: String,
        pattern: String,
    },

    /// A rule targets an origin the distribution does not declare
    #[error("routing table of {distribution}: rule targets unknown origin '{origin}'")]
    UnknownOrigin {
        distribution: String,
        origin: String,
    },

    /// A node's declared attributes violate a kind-specific constraint
    #[error("invalid resource {node}: {message}")]
    InvalidNode { node: String, message: String },

    /// The engine could not set up its worker pool
    #[error("engine runtime error: {message}")]
    Runtime { message: String },
}

impl Error {
    /// Whether this error came from routing table validation.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::RoutingConfig { .. } | Self::DuplicatePattern { .. } | Self::UnknownOrigin { .. }
        )
    }
}

/// Result type for graph construction and validation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a [`Provider`](crate::provider::Provider) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Throttling, 5xx, connection resets and similar
    #[error("transient provider error: {message}")]
    Transient { message: String },

    /// The call did not return within its deadline
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The addressed resource does not exist
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },

    /// The provider refused the request (validation, quota, permissions)
    #[error("provider rejected request: {message}")]
    Rejected { message: String },
}

impl ProviderError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_provider_error_retryable() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::rejected("bad name").is_retryable());
        assert!(
            !ProviderError::NotFound {
                kind: ResourceKind::Bucket,
                id: "b".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_routing_errors_classified() {
        let err = Error::UnknownOrigin {
            distribution: "cdn".into(),
            origin: "nope".into(),
        };
        assert!(err.is_routing());
        assert!(
            !Error::DuplicateNode {
                name: "cdn".into()
            }
            .is_routing()
        );
    }
}
