//! Reconciliation context and callback traits
//!
//! A [`ReconcileContext`] carries everything one run shares across worker
//! threads: the provider handle, the table of resolved outputs, the
//! cancellation token and the progress sink. It is passed explicitly; the
//! engine holds no global state.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{OutputRef, Outputs};
use crate::provider::Provider;
use crate::state::StateSnapshot;
use crate::types::{NodeState, ProvisioningOutcome};

/// Cooperative cancellation flag, cheap to clone and share
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Nodes already executing run to completion.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outputs published by nodes that finished successfully.
///
/// Each node publishes once; later attempts to publish under the same name
/// are refused. Readers see either nothing or the complete output set.
#[derive(Debug, Default)]
pub struct ResolvedAttributes {
    inner: RwLock<HashMap<String, Arc<Outputs>>>,
}

impl ResolvedAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the outputs of `node`. Returns false if it already published.
    pub fn publish(&self, node: &str, outputs: Outputs) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.contains_key(node) {
            return false;
        }
        inner.insert(node.to_string(), Arc::new(outputs));
        true
    }

    pub fn get(&self, node: &str) -> Option<Arc<Outputs>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }

    /// Value of a referenced output, if its node has published it
    pub fn resolve(&self, reference: &OutputRef) -> Option<Value> {
        self.get(&reference.node)?.get(&reference.output).cloned()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of everything published so far
    pub fn snapshot(&self) -> BTreeMap<String, Outputs> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Outputs::clone(v)))
            .collect()
    }
}

/// Progress callback for provisioning runs
///
/// Called from worker threads, hence `Sync` and `&self`.
pub trait ProgressCallback: Sync {
    /// A layer of mutually independent nodes is about to run
    fn on_layer_start(&self, index: usize, nodes: &[&str]);

    /// A node moved to a new state
    fn on_node_state(&self, node: &str, state: NodeState);

    /// A node reached its final outcome
    fn on_node_complete(&self, node: &str, outcome: &ProvisioningOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_layer_start(&self, _index: usize, _nodes: &[&str]) {}
    fn on_node_state(&self, _node: &str, _state: NodeState) {}
    fn on_node_complete(&self, _node: &str, _outcome: &ProvisioningOutcome) {}
}

/// Logs node progress through the `log` facade
pub struct LogProgress;

impl ProgressCallback for LogProgress {
    fn on_layer_start(&self, index: usize, nodes: &[&str]) {
        log::debug!("Layer {}: {}", index + 1, nodes.join(", "));
    }

    fn on_node_state(&self, node: &str, state: NodeState) {
        log::trace!("{node}: {state}");
    }

    fn on_node_complete(&self, node: &str, outcome: &ProvisioningOutcome) {
        match outcome {
            ProvisioningOutcome::Failed { reason } => log::error!("{node}: {reason}"),
            ProvisioningOutcome::Skipped { reason } => log::warn!("{node}: skipped ({reason})"),
            other => log::info!("{node}: {}", other.label()),
        }
    }
}

/// Everything one provisioning run shares.
///
/// The resolved-attributes table belongs to a single run: create a fresh
/// context for every run.
pub struct ReconcileContext<'a> {
    provider: Arc<dyn Provider>,
    resolved: ResolvedAttributes,
    cancel: CancellationToken,
    progress: &'a dyn ProgressCallback,
    previous: StateSnapshot,
}

impl ReconcileContext<'static> {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            resolved: ResolvedAttributes::new(),
            cancel: CancellationToken::new(),
            progress: &NoProgress,
            previous: StateSnapshot::new(),
        }
    }
}

impl<'a> ReconcileContext<'a> {
    /// Report progress to `progress` instead of discarding it
    pub fn with_progress<'b>(self, progress: &'b dyn ProgressCallback) -> ReconcileContext<'b> {
        ReconcileContext {
            provider: self.provider,
            resolved: self.resolved,
            cancel: self.cancel,
            progress,
            previous: self.previous,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// State recorded by the previous run
    pub fn with_previous_state(mut self, snapshot: StateSnapshot) -> Self {
        self.previous = snapshot;
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn resolved(&self) -> &ResolvedAttributes {
        &self.resolved
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn progress(&self) -> &'a dyn ProgressCallback {
        self.progress
    }

    pub fn previous(&self) -> &StateSnapshot {
        &self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_publish_once() {
        let table = ResolvedAttributes::new();
        let mut outputs = Outputs::new();
        outputs.insert("arn".into(), json!("arn:1"));
        assert!(table.publish("cert", outputs.clone()));
        assert!(!table.publish("cert", Outputs::new()));
        assert_eq!(
            table.resolve(&OutputRef::new("cert", "arn")),
            Some(json!("arn:1"))
        );
        assert_eq!(table.resolve(&OutputRef::new("cert", "domain_name")), None);
        assert_eq!(table.resolve(&OutputRef::new("zone", "zone_id")), None);
    }

    #[test]
    fn test_concurrent_publishers() {
        let table = ResolvedAttributes::new();
        thread::scope(|s| {
            for i in 0..8 {
                let table = &table;
                s.spawn(move || {
                    let mut outputs = Outputs::new();
                    outputs.insert("id".into(), json!(i));
                    table.publish(&format!("node{i}"), outputs);
                });
            }
        });
        assert_eq!(table.len(), 8);
        assert_eq!(table.snapshot()["node3"]["id"], 3);
    }

    #[test]
    fn test_cancellation_token_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
