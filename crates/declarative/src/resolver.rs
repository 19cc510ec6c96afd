//! State resolver
//!
//! Finds the provider-side resource behind a node. Nodes recorded by a
//! previous run are looked up under their recorded key first, so renaming a
//! bucket finds the old bucket (and reconciles to a replacement) instead of
//! looking like a brand-new resource.

use std::sync::Arc;
use std::time::Duration;

use crate::context::ReconcileContext;
use crate::error::ProviderResult;
use crate::model::{Attributes, ResourceNode};
use crate::provider::{Lookup, Provider};
use crate::retry::{InFlight, LogRetries, RetryConfig, with_deadline, with_retry};

/// Where a node's resource lives, if anywhere
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Key derived from the desired attributes
    pub desired_key: String,
    /// Key the lookup was answered under
    pub found_key: String,
    pub lookup: Lookup,
}

/// Run a single provider call under a deadline.
pub(crate) fn call<T, F>(provider: &Arc<dyn Provider>, timeout: Duration, f: F) -> ProviderResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Provider) -> ProviderResult<T> + Send + 'static,
{
    let provider = Arc::clone(provider);
    with_deadline(timeout, move || f(provider.as_ref()))
}

/// Start a provider call without waiting for it.
pub(crate) fn spawn<T, F>(provider: &Arc<dyn Provider>, f: F) -> ProviderResult<InFlight<T>>
where
    T: Send + 'static,
    F: FnOnce(&dyn Provider) -> ProviderResult<T> + Send + 'static,
{
    let provider = Arc::clone(provider);
    InFlight::spawn(move || f(provider.as_ref()))
}

/// Look `key` up, retrying transient failures.
pub(crate) fn lookup(
    ctx: &ReconcileContext<'_>,
    retry: &RetryConfig,
    timeout: Duration,
    node: &ResourceNode,
    key: &str,
) -> ProviderResult<Lookup> {
    let kind = node.kind();
    with_retry(retry, Some(&LogRetries(&node.name)), |_| {
        let key = key.to_string();
        call(ctx.provider(), timeout, move |p| p.lookup(kind, &key))
    })
}

/// Resolve the current state of `node` given its rendered attributes.
pub fn resolve(
    ctx: &ReconcileContext<'_>,
    retry: &RetryConfig,
    timeout: Duration,
    node: &ResourceNode,
    desired: &Attributes,
) -> ProviderResult<Resolution> {
    let kind = node.kind();
    let desired_key = (kind.spec().lookup_key)(&node.name, desired);
    let recorded = ctx
        .previous()
        .record_of(&node.name, kind)
        .map(|r| r.lookup_key.clone());

    if let Some(recorded) = recorded.filter(|k| *k != desired_key) {
        log::debug!("{}: looking up recorded key '{recorded}'", node.name);
        let found = lookup(ctx, retry, timeout, node, &recorded)?;
        if found.is_found() {
            return Ok(Resolution {
                desired_key,
                found_key: recorded,
                lookup: found,
            });
        }
    }

    let found = lookup(ctx, retry, timeout, node, &desired_key)?;
    Ok(Resolution {
        found_key: desired_key.clone(),
        desired_key,
        lookup: found,
    })
}
