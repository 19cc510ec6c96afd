//! Provisioning engine - runs the dependency graph with bounded parallelism
//!
//! Nodes are grouped into layers of mutually independent nodes. Each layer
//! runs on a rayon pool of `jobs` threads; a node only starts once every
//! node it depends on has succeeded and published its outputs. A failed
//! node marks its transitive dependents as skipped, while unrelated
//! branches keep going.
//!
//! Validation and graph construction happen before the first provider call:
//! an invalid topology never causes side effects.

use rayon::prelude::*;
use std::collections::HashMap;

use crate::context::{ReconcileContext, ResolvedAttributes};
use crate::error::{Error, ProviderError, ProviderResult, Result};
use crate::graph::DependencyGraph;
use crate::kind::ResourceKind;
use crate::model::{Attributes, DesiredState, RenderError, ResourceNode};
use crate::provider::{CurrentState, Lookup};
use crate::reconcile::{Decision, reconcile};
use crate::resolver::{self, call};
use crate::retry::{InFlight, LogRetries, with_retry};
use crate::state::StateRecord;
use crate::types::{
    DeletedResource, ExecuteOptions, NodeReport, NodeState, Plan, PlannedAction, PlannedChange,
    ProvisioningOutcome, Removal, RetainedResource, RunReport, RunStatus, SkipReason,
};

/// A successful provider-side change (or confirmation) for one node
struct Applied {
    outcome: ProvisioningOutcome,
    /// Key the resource is now addressable under
    key: String,
    current: CurrentState,
    /// Old resource to delete once dependents have moved over
    superseded: Option<String>,
}

/// Per-node result collected by the engine
struct NodeResult {
    name: String,
    kind: ResourceKind,
    outcome: ProvisioningOutcome,
    applied: Option<Applied>,
}

impl NodeResult {
    fn skipped(node: &ResourceNode, reason: SkipReason) -> Self {
        Self {
            name: node.name.clone(),
            kind: node.kind(),
            outcome: ProvisioningOutcome::Skipped { reason },
            applied: None,
        }
    }
}

/// Provision `desired` and report every node's outcome.
///
/// Returns `Err` only for problems found before provisioning starts
/// (invalid topology, routing, worker pool setup). Provider failures are
/// reported per node in the [`RunReport`].
pub fn execute(
    desired: &DesiredState,
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
) -> Result<RunReport> {
    desired.validate()?;
    let graph = DependencyGraph::build(&desired.resources)?;
    let nodes: HashMap<&str, &ResourceNode> = desired
        .resources
        .iter()
        .map(|n| (n.name.as_str(), n))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.jobs.max(1))
        .build()
        .map_err(|e| Error::Runtime {
            message: format!("failed to create thread pool: {e}"),
        })?;

    let layers = graph.layers();
    log::info!(
        "Provisioning {} resources in {} layers ({} jobs)",
        graph.len(),
        layers.len(),
        opts.jobs.max(1)
    );

    let declared_kind = |name: &str| nodes.get(name).map(|n| n.kind());
    let displaced: Vec<(String, StateRecord)> = ctx
        .previous()
        .orphans(declared_kind)
        .into_iter()
        .filter(|(name, _)| nodes.contains_key(name))
        .map(|(name, record)| (name.to_string(), record.clone()))
        .collect();
    check_displaced(&displaced, opts.prune)?;

    let mut state = ctx.previous().clone();
    let mut results: HashMap<String, NodeResult> = HashMap::with_capacity(graph.len());
    let mut deleted = Vec::new();
    let mut retained = Vec::new();

    // A name reused for another kind frees the old resource first
    for (name, record) in displaced {
        if ctx.cancellation().is_cancelled() {
            break;
        }
        if record.kind.spec().read_only {
            log::debug!("{name}: forgetting unmanaged {}", record.kind);
            state.remove(&name);
            continue;
        }
        match delete(ctx, opts, &name, record.kind, &record.id) {
            Ok(()) => {
                log::info!(
                    "{name}: deleted {} {} recorded under this name",
                    record.kind,
                    record.id
                );
                state.remove(&name);
                deleted.push(DeletedResource {
                    name,
                    kind: record.kind,
                    id: record.id,
                    removal: Removal::Orphaned,
                });
            }
            Err(e) => {
                let result = NodeResult {
                    name: name.clone(),
                    kind: declared_kind(name.as_str()).unwrap_or(record.kind),
                    outcome: ProvisioningOutcome::Failed {
                        reason: format!(
                            "could not delete {} {} recorded under this name: {e}",
                            record.kind, record.id
                        ),
                    },
                    applied: None,
                };
                report_complete(ctx, &result);
                results.insert(name.clone(), result);
                retained.push(RetainedResource {
                    name,
                    kind: record.kind,
                    id: record.id,
                    reason: format!("delete failed: {e}"),
                });
            }
        }
    }

    for (index, layer) in layers.iter().enumerate() {
        let mut ready = Vec::with_capacity(layer.len());
        for &name in layer {
            let Some(&node) = nodes.get(name) else {
                continue;
            };
            if results.contains_key(name) {
                continue;
            }
            let skip = if ctx.cancellation().is_cancelled() {
                Some(SkipReason::Cancelled)
            } else {
                graph
                    .dependencies(name)
                    .into_iter()
                    .find(|dep| results.get(*dep).is_none_or(|r| !r.outcome.is_success()))
                    .map(|blocker| SkipReason::BlockedBy(blocker.to_string()))
            };

            if let Some(reason) = skip {
                let result = NodeResult::skipped(node, reason);
                report_complete(ctx, &result);
                results.insert(result.name.clone(), result);
            } else {
                ready.push(node);
            }
        }

        if ready.is_empty() {
            continue;
        }

        let names: Vec<&str> = ready.iter().map(|n| n.name.as_str()).collect();
        ctx.progress().on_layer_start(index, &names);

        let finished: Vec<NodeResult> = pool.install(|| {
            ready
                .par_iter()
                .map(|node| run_node(node, ctx, opts))
                .collect()
        });

        for result in finished {
            results.insert(result.name.clone(), result);
        }
    }

    let order = graph.order();
    let cancelled = results.values().any(|r| {
        matches!(
            r.outcome,
            ProvisioningOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        )
    });
    let status = if cancelled {
        RunStatus::Cancelled
    } else if results.values().all(|r| r.outcome.is_success()) {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    };

    for &name in &order {
        let Some(result) = results.get(name) else {
            continue;
        };
        if let Some(applied) = &result.applied {
            let depends_on = graph
                .dependencies(name)
                .into_iter()
                .map(str::to_string)
                .collect();
            state.insert(
                name,
                StateRecord::new(
                    result.kind,
                    applied.current.id.clone(),
                    applied.key.clone(),
                    graph.position(name).unwrap_or_default(),
                    depends_on,
                    &applied.current.outputs,
                ),
            );
        }
    }

    // Superseded resources go once everything reading from them succeeded,
    // dependents first
    for &name in order.iter().rev() {
        let Some(result) = results.get(name) else {
            continue;
        };
        let Some(old_id) = result.applied.as_ref().and_then(|a| a.superseded.as_ref()) else {
            continue;
        };

        let blocked = graph
            .transitive_dependents(name)
            .into_iter()
            .find(|d| results.get(*d).is_none_or(|r| !r.outcome.is_success()));

        if let Some(blocked) = blocked {
            log::warn!("{name}: keeping replaced resource {old_id}, {blocked} did not succeed");
            retained.push(RetainedResource {
                name: name.to_string(),
                kind: result.kind,
                id: old_id.clone(),
                reason: format!("dependent {blocked} did not succeed"),
            });
            continue;
        }

        match delete(ctx, opts, name, result.kind, old_id) {
            Ok(()) => {
                log::info!("{name}: deleted replaced resource {old_id}");
                deleted.push(DeletedResource {
                    name: name.to_string(),
                    kind: result.kind,
                    id: old_id.clone(),
                    removal: Removal::Replaced,
                });
            }
            Err(e) => retained.push(RetainedResource {
                name: name.to_string(),
                kind: result.kind,
                id: old_id.clone(),
                reason: format!("delete failed: {e}"),
            }),
        }
    }

    if opts.prune && status == RunStatus::Succeeded {
        let orphans: Vec<(String, StateRecord)> = state
            .orphans(declared_kind)
            .into_iter()
            .map(|(name, record)| (name.to_string(), record.clone()))
            .collect();

        for (name, record) in orphans {
            if record.kind.spec().read_only {
                log::debug!("{name}: forgetting unmanaged {}", record.kind);
                state.remove(&name);
                continue;
            }
            match delete(ctx, opts, &name, record.kind, &record.id) {
                Ok(()) => {
                    log::info!("{name}: deleted orphaned {} {}", record.kind, record.id);
                    state.remove(&name);
                    deleted.push(DeletedResource {
                        name,
                        kind: record.kind,
                        id: record.id,
                        removal: Removal::Orphaned,
                    });
                }
                Err(e) => retained.push(RetainedResource {
                    name,
                    kind: record.kind,
                    id: record.id,
                    reason: format!("delete failed: {e}"),
                }),
            }
        }
    }

    let nodes = order
        .iter()
        .filter_map(|&name| results.remove(name))
        .map(|r| NodeReport {
            id: r.applied.as_ref().map(|a| a.current.id.clone()),
            name: r.name,
            kind: r.kind,
            outcome: r.outcome,
        })
        .collect();

    let report = RunReport {
        status,
        nodes,
        deleted,
        retained,
        state,
    };
    let summary = report.summary();
    log::info!(
        "Run {:?}: {} created, {} updated, {} replaced, {} unchanged, {} failed, {} skipped",
        status,
        summary.created,
        summary.updated,
        summary.replaced,
        summary.unchanged,
        summary.failed,
        summary.skipped
    );
    Ok(report)
}

/// Without pruning, reusing a name for another kind would leave the old
/// resource behind untracked.
fn check_displaced(displaced: &[(String, StateRecord)], prune: bool) -> Result<()> {
    if prune {
        return Ok(());
    }
    match displaced.iter().find(|(_, r)| !r.kind.spec().read_only) {
        Some((name, record)) => Err(Error::InvalidNode {
            node: name.clone(),
            message: format!(
                "name is recorded as {} {}; enable prune to delete it before reusing the name",
                record.kind, record.id
            ),
        }),
        None => Ok(()),
    }
}

/// Run one node through its state machine
fn run_node(node: &ResourceNode, ctx: &ReconcileContext<'_>, opts: &ExecuteOptions) -> NodeResult {
    let result = if ctx.cancellation().is_cancelled() {
        NodeResult::skipped(node, SkipReason::Cancelled)
    } else {
        match provision(node, ctx, opts) {
            Ok(applied) => {
                if !ctx
                    .resolved()
                    .publish(&node.name, applied.current.outputs.clone())
                {
                    log::warn!("{}: outputs were already published", node.name);
                }
                NodeResult {
                    name: node.name.clone(),
                    kind: node.kind(),
                    outcome: applied.outcome.clone(),
                    applied: Some(applied),
                }
            }
            Err(reason) => NodeResult {
                name: node.name.clone(),
                kind: node.kind(),
                outcome: ProvisioningOutcome::Failed { reason },
                applied: None,
            },
        }
    };

    report_complete(ctx, &result);
    result
}

fn report_complete(ctx: &ReconcileContext<'_>, result: &NodeResult) {
    let progress = ctx.progress();
    progress.on_node_state(&result.name, result.outcome.state());
    progress.on_node_complete(&result.name, &result.outcome);
}

/// Resolve, reconcile and execute one node. `Err` carries the failure reason.
fn provision(
    node: &ResourceNode,
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
) -> std::result::Result<Applied, String> {
    let progress = ctx.progress();
    let kind = node.kind();
    let spec = kind.spec();

    progress.on_node_state(&node.name, NodeState::Resolving);
    let desired = node
        .spec
        .render(&node.name, &|r| ctx.resolved().resolve(r))
        .map_err(|e| e.to_string())?;
    let resolution = resolver::resolve(ctx, &opts.retry, opts.call_timeout, node, &desired)
        .map_err(|e| format!("lookup failed: {e}"))?;

    progress.on_node_state(&node.name, NodeState::Reconciling);
    let decision = reconcile(kind, &desired, &resolution.lookup);
    log::debug!("{}: {:?}", node.name, decision);

    progress.on_node_state(&node.name, NodeState::Executing);
    match (decision, resolution.lookup) {
        (Decision::Create, _) | (_, Lookup::NotFound) if spec.read_only => {
            Err(format!("{kind} '{}' not found", resolution.desired_key))
        }
        (Decision::Create, _) | (_, Lookup::NotFound) => {
            let current = create(ctx, opts, node, &resolution.desired_key, &desired, None)?;
            Ok(Applied {
                outcome: ProvisioningOutcome::Created,
                key: resolution.desired_key,
                current,
                superseded: None,
            })
        }
        (Decision::NoOp, Lookup::Found(current)) => Ok(Applied {
            outcome: ProvisioningOutcome::Unchanged,
            key: resolution.found_key,
            current,
            superseded: None,
        }),
        (Decision::Update { changes }, Lookup::Found(current)) => {
            let outputs = update(ctx, opts, node, &current.id, &desired)?;
            Ok(Applied {
                outcome: ProvisioningOutcome::Updated {
                    changed: changes.into_iter().map(|c| c.field).collect(),
                },
                key: resolution.found_key,
                current: CurrentState {
                    id: current.id,
                    attributes: desired,
                    outputs,
                },
                superseded: None,
            })
        }
        (Decision::Replace { fields }, Lookup::Found(old)) => {
            log::info!(
                "{}: replacing {} ({} changed)",
                node.name,
                old.id,
                fields.join(", ")
            );
            let same_key = resolution
                .desired_key
                .eq_ignore_ascii_case(&resolution.found_key);

            let superseded = if spec.unique_key && same_key {
                // the key is taken until the old resource is gone
                delete(ctx, opts, &node.name, kind, &old.id)
                    .map_err(|e| format!("delete before replace failed: {e}"))?;
                None
            } else {
                Some(old.id.clone())
            };

            let current = create(
                ctx,
                opts,
                node,
                &resolution.desired_key,
                &desired,
                Some(&old.id),
            )?;
            Ok(Applied {
                outcome: ProvisioningOutcome::Replaced {
                    previous_id: old.id,
                },
                key: resolution.desired_key,
                current,
                superseded,
            })
        }
    }
}

/// Create with retries.
///
/// A create that overran its deadline may still succeed remotely, so it is
/// never repeated blindly: the next attempt first waits for that call to
/// finish and adopts its result, then looks the key up before creating.
fn create(
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
    node: &ResourceNode,
    key: &str,
    desired: &Attributes,
    replacing: Option<&str>,
) -> std::result::Result<CurrentState, String> {
    let kind = node.kind();
    let mut in_flight: Option<InFlight<CurrentState>> = None;
    with_retry(&opts.retry, Some(&LogRetries(&node.name)), |attempt| {
        if let Some(earlier) = in_flight.take() {
            match earlier.wait(opts.settle_timeout) {
                Some(Ok(created)) => {
                    log::debug!("{}: earlier create finished late as {}", node.name, created.id);
                    return Ok(created);
                }
                Some(Err(e)) => log::debug!("{}: earlier create failed: {e}", node.name),
                None => {
                    in_flight = Some(earlier);
                    return Err(ProviderError::Timeout(opts.settle_timeout));
                }
            }
        }
        if attempt > 0 {
            let k = key.to_string();
            if let Lookup::Found(existing) =
                call(ctx.provider(), opts.call_timeout, move |p| p.lookup(kind, &k))?
                && replacing != Some(existing.id.as_str())
            {
                log::debug!("{}: earlier create went through as {}", node.name, existing.id);
                return Ok(existing);
            }
        }
        let k = key.to_string();
        let attrs = desired.clone();
        let started = resolver::spawn(ctx.provider(), move |p| p.create(kind, &k, &attrs))?;
        match started.wait(opts.call_timeout) {
            Some(result) => result,
            None => {
                in_flight = Some(started);
                Err(ProviderError::Timeout(opts.call_timeout))
            }
        }
    })
    .map_err(|e| format!("create failed: {e}"))
}

fn update(
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
    node: &ResourceNode,
    id: &str,
    desired: &Attributes,
) -> std::result::Result<crate::model::Outputs, String> {
    let kind = node.kind();
    with_retry(&opts.retry, Some(&LogRetries(&node.name)), |_| {
        let id = id.to_string();
        let attrs = desired.clone();
        call(ctx.provider(), opts.call_timeout, move |p| {
            p.update(kind, &id, &attrs)
        })
    })
    .map_err(|e| format!("update failed: {e}"))
}

/// Delete with retries; a resource that is already gone counts as deleted.
fn delete(
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
    name: &str,
    kind: ResourceKind,
    id: &str,
) -> ProviderResult<()> {
    with_retry(&opts.retry, Some(&LogRetries(name)), |_| {
        let id = id.to_string();
        match call(ctx.provider(), opts.call_timeout, move |p| p.delete(kind, &id)) {
            Err(ProviderError::NotFound { .. }) => Ok(()),
            other => other,
        }
    })
}

/// Preview what [`execute`] would do, using lookups only.
///
/// Nodes whose inputs depend on outputs that only exist after an upstream
/// create or replacement are reported as [`PlannedAction::Deferred`].
pub fn plan(
    desired: &DesiredState,
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
) -> Result<Plan> {
    desired.validate()?;
    let graph = DependencyGraph::build(&desired.resources)?;

    // what the run would publish, as far as it is known up front
    let known = ResolvedAttributes::new();
    let mut changes = Vec::with_capacity(graph.len());

    for name in graph.order() {
        let Some(node) = desired.node(name) else {
            continue;
        };
        let action = plan_node(node, &known, ctx, opts);
        changes.push(PlannedChange {
            name: node.name.clone(),
            kind: node.kind(),
            action,
        });
    }

    let declared_kind = |name: &str| desired.node(name).map(ResourceNode::kind);
    let orphans: Vec<(String, StateRecord)> = ctx
        .previous()
        .orphans(declared_kind)
        .into_iter()
        .map(|(name, record)| (name.to_string(), record.clone()))
        .collect();
    let displaced: Vec<_> = orphans
        .iter()
        .filter(|(name, _)| graph.contains(name))
        .cloned()
        .collect();
    check_displaced(&displaced, opts.prune)?;
    let orphans = orphans.into_iter().map(|(name, _)| name).collect();

    Ok(Plan { changes, orphans })
}

fn plan_node(
    node: &ResourceNode,
    known: &ResolvedAttributes,
    ctx: &ReconcileContext<'_>,
    opts: &ExecuteOptions,
) -> PlannedAction {
    let kind = node.kind();
    let desired = match node.spec.render(&node.name, &|r| known.resolve(r)) {
        Ok(desired) => desired,
        Err(RenderError::Unresolved(r)) => {
            return PlannedAction::Deferred { waiting_on: r.node };
        }
        Err(e) => {
            return PlannedAction::Blocked {
                reason: e.to_string(),
            };
        }
    };

    let resolution = match resolver::resolve(ctx, &opts.retry, opts.call_timeout, node, &desired) {
        Ok(resolution) => resolution,
        Err(e) => {
            return PlannedAction::Blocked {
                reason: format!("lookup failed: {e}"),
            };
        }
    };

    match (reconcile(kind, &desired, &resolution.lookup), resolution.lookup) {
        (Decision::Create, _) | (_, Lookup::NotFound) if kind.spec().read_only => {
            PlannedAction::Blocked {
                reason: format!("{kind} '{}' not found", resolution.desired_key),
            }
        }
        (Decision::Create, _) | (_, Lookup::NotFound) => PlannedAction::Create,
        (Decision::NoOp, Lookup::Found(current)) => {
            known.publish(&node.name, current.outputs);
            PlannedAction::NoOp
        }
        (Decision::Update { changes }, Lookup::Found(current)) => {
            // in-place updates keep identifying outputs
            known.publish(&node.name, current.outputs);
            PlannedAction::Update { changes }
        }
        (Decision::Replace { fields }, Lookup::Found(_)) => PlannedAction::Replace { fields },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::model::{
        AccessIdentitySpec, BucketSpec, ContentSpec, DnsRecordSpec, OutputRef, ResourceSpec,
        ZoneSpec,
    };
    use crate::provider::{MemoryProvider, Operation, Provider};
    use crate::retry::RetryConfig;
    use crate::state::StateSnapshot;
    use std::sync::Arc;
    use std::time::Duration;

    fn opts() -> ExecuteOptions {
        ExecuteOptions {
            jobs: 4,
            retry: RetryConfig::new(3, Duration::from_millis(1), 1.0),
            call_timeout: Duration::from_secs(5),
            settle_timeout: Duration::from_secs(5),
            prune: false,
        }
    }

    fn bucket(name: &str, bucket_name: &str) -> ResourceNode {
        ResourceNode::new(
            name,
            ResourceSpec::Bucket(BucketSpec {
                bucket_name: bucket_name.into(),
            }),
        )
    }

    fn identity(name: &str) -> ResourceNode {
        ResourceNode::new(
            name,
            ResourceSpec::AccessIdentity(AccessIdentitySpec::default()),
        )
    }

    fn deployment(name: &str, bucket: &str, fingerprint: &str) -> ResourceNode {
        ResourceNode::new(
            name,
            ResourceSpec::ContentDeployment(ContentSpec {
                source: "./site".into(),
                bucket: OutputRef::new(bucket, "bucket_name"),
                destination_prefix: String::new(),
                fingerprint: Some(fingerprint.into()),
            }),
        )
    }

    fn zone(name: &str, domain: &str) -> ResourceNode {
        ResourceNode::new(
            name,
            ResourceSpec::ZoneReference(ZoneSpec {
                domain_name: domain.into(),
                private_zone: false,
            }),
        )
    }

    /// `www.example.com` in `zone`, aliased to the `site` bucket
    fn www_record(zone: &str) -> ResourceNode {
        ResourceNode::new(
            "www",
            ResourceSpec::DnsRecord(DnsRecordSpec {
                record_name: "www.example.com".into(),
                zone: OutputRef::new(zone, "zone_id"),
                target: OutputRef::new("site", "regional_domain_name"),
            }),
        )
    }

    fn record_stack(zone: &str) -> DesiredState {
        DesiredState::new(vec![
            self::zone("primary", "example.com"),
            self::zone("secondary", "example.net"),
            bucket("site", "site.example.com"),
            www_record(zone),
        ])
    }

    fn zoned_provider() -> Arc<MemoryProvider> {
        let provider = Arc::new(MemoryProvider::new());
        provider.seed_zone("example.com");
        provider.seed_zone("example.net");
        provider
    }

    fn run(
        provider: &Arc<MemoryProvider>,
        desired: &DesiredState,
        previous: StateSnapshot,
        opts: &ExecuteOptions,
    ) -> RunReport {
        let provider: Arc<dyn Provider> = provider.clone();
        let ctx = ReconcileContext::new(provider).with_previous_state(previous);
        execute(desired, &ctx, opts).unwrap()
    }

    #[test]
    fn test_execute_empty_state() {
        let provider = Arc::new(MemoryProvider::new());
        let report = run(&provider, &DesiredState::default(), StateSnapshot::new(), &opts());
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.summary().total(), 0);
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_outputs_flow_downstream() {
        let provider = Arc::new(MemoryProvider::new());
        let desired = DesiredState::new(vec![
            deployment("deploy", "site", "abc"),
            bucket("site", "site.example.com"),
        ]);
        let report = run(&provider, &desired, StateSnapshot::new(), &opts());

        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.outcome("site"), Some(&ProvisioningOutcome::Created));
        assert_eq!(report.outcome("deploy"), Some(&ProvisioningOutcome::Created));
        let inventory = provider.inventory();
        let deployed = inventory
            .resources
            .values()
            .find(|r| r.kind == ResourceKind::ContentDeployment)
            .unwrap();
        assert_eq!(deployed.attributes["bucket_name"], "site.example.com");
        assert_eq!(report.state.len(), 2);
    }

    #[test]
    fn test_rerun_is_unchanged() {
        let provider = Arc::new(MemoryProvider::new());
        let desired = DesiredState::new(vec![
            bucket("site", "site.example.com"),
            deployment("deploy", "site", "abc"),
        ]);
        let first = run(&provider, &desired, StateSnapshot::new(), &opts());
        let mutations = provider.mutations().len();

        let second = run(&provider, &desired, first.state, &opts());
        assert!(
            second
                .nodes
                .iter()
                .all(|n| n.outcome == ProvisioningOutcome::Unchanged)
        );
        assert_eq!(provider.mutations().len(), mutations);
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let provider = Arc::new(MemoryProvider::new());
        provider.reject(ResourceKind::Bucket, "site.example.com", "bucket name taken");
        let desired = DesiredState::new(vec![
            bucket("site", "site.example.com"),
            deployment("deploy", "site", "abc"),
            identity("oai"),
        ]);
        let report = run(&provider, &desired, StateSnapshot::new(), &opts());

        assert_eq!(report.status, RunStatus::Failed);
        assert!(matches!(
            report.outcome("site"),
            Some(ProvisioningOutcome::Failed { reason }) if reason.contains("bucket name taken")
        ));
        assert_eq!(
            report.outcome("deploy"),
            Some(&ProvisioningOutcome::Skipped {
                reason: SkipReason::BlockedBy("site".into())
            })
        );
        assert_eq!(report.outcome("oai"), Some(&ProvisioningOutcome::Created));
        assert_eq!(provider.calls_for(Operation::Lookup, "deploy"), 0);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_cycle_makes_no_provider_calls() {
        let provider = Arc::new(MemoryProvider::new());
        let desired = DesiredState::new(vec![identity("a").after("b"), identity("b").after("a")]);
        let ctx = ReconcileContext::new(provider.clone());
        let err = execute(&desired, &ctx, &opts()).unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_cancelled_run_skips_everything() {
        let provider = Arc::new(MemoryProvider::new());
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ReconcileContext::new(provider.clone()).with_cancellation(token);
        let desired = DesiredState::new(vec![identity("a"), identity("b")]);

        let report = execute(&desired, &ctx, &opts()).unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.exit_code(), 130);
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_fingerprint_change_updates_in_place() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![
            bucket("site", "site.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());

        let v2 = DesiredState::new(vec![
            bucket("site", "site.example.com"),
            deployment("deploy", "site", "v2"),
        ]);
        let second = run(&provider, &v2, first.state, &opts());
        assert_eq!(
            second.outcome("deploy"),
            Some(&ProvisioningOutcome::Updated {
                changed: vec!["fingerprint".into()]
            })
        );
        assert_eq!(second.outcome("site"), Some(&ProvisioningOutcome::Unchanged));
    }

    #[test]
    fn test_bucket_rename_replaces_after_dependents() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![
            bucket("site", "old.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());
        let old_id = first.state.get("site").unwrap().id.clone();

        let v2 = DesiredState::new(vec![
            bucket("site", "new.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let second = run(&provider, &v2, first.state, &opts());

        assert_eq!(
            second.outcome("site"),
            Some(&ProvisioningOutcome::Replaced {
                previous_id: old_id.clone()
            })
        );
        assert!(matches!(
            second.outcome("deploy"),
            Some(ProvisioningOutcome::Updated { .. })
        ));
        assert_eq!(second.deleted.len(), 1);
        assert_eq!(second.deleted[0].id, old_id);
        assert_eq!(provider.inventory().count(ResourceKind::Bucket), 1);
        assert_eq!(second.state.get("site").unwrap().lookup_key, "new.example.com");
    }

    #[test]
    fn test_replaced_resource_retained_when_dependent_fails() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![
            bucket("site", "old.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());

        provider.reject(ResourceKind::ContentDeployment, "deploy", "upload denied");
        let v2 = DesiredState::new(vec![
            bucket("site", "new.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let second = run(&provider, &v2, first.state, &opts());

        assert!(second.deleted.is_empty());
        assert_eq!(second.retained.len(), 1);
        assert_eq!(provider.inventory().count(ResourceKind::Bucket), 2);
    }

    #[test]
    fn test_timed_out_create_is_not_duplicated() {
        let provider = Arc::new(MemoryProvider::new());
        provider.stall(
            Operation::Create,
            ResourceKind::AccessIdentity,
            "oai",
            Duration::from_millis(150),
        );
        let opts = ExecuteOptions {
            retry: RetryConfig::new(3, Duration::from_millis(300), 1.0),
            call_timeout: Duration::from_millis(50),
            ..opts()
        };
        let desired = DesiredState::new(vec![identity("oai")]);
        let report = run(&provider, &desired, StateSnapshot::new(), &opts);

        assert_eq!(report.outcome("oai"), Some(&ProvisioningOutcome::Created));
        assert_eq!(provider.calls_for(Operation::Create, "oai"), 1);
        assert_eq!(provider.inventory().count(ResourceKind::AccessIdentity), 1);
    }

    #[test]
    fn test_create_outlasting_deadline_and_backoff_is_adopted() {
        let provider = Arc::new(MemoryProvider::new());
        provider.stall(
            Operation::Create,
            ResourceKind::AccessIdentity,
            "oai",
            Duration::from_millis(400),
        );
        let opts = ExecuteOptions {
            retry: RetryConfig::new(3, Duration::from_millis(10), 1.0),
            call_timeout: Duration::from_millis(50),
            ..opts()
        };
        let desired = DesiredState::new(vec![identity("oai")]);
        let report = run(&provider, &desired, StateSnapshot::new(), &opts);

        assert_eq!(report.outcome("oai"), Some(&ProvisioningOutcome::Created));
        assert_eq!(provider.calls_for(Operation::Create, "oai"), 1);
        assert_eq!(provider.inventory().count(ResourceKind::AccessIdentity), 1);
        let recorded = report.state.get("oai").unwrap();
        assert_eq!(provider.inventory().resources.keys().next(), Some(&recorded.id));
    }

    #[test]
    fn test_create_still_running_after_settle_fails_without_duplicate() {
        let provider = Arc::new(MemoryProvider::new());
        provider.stall(
            Operation::Create,
            ResourceKind::AccessIdentity,
            "oai",
            Duration::from_millis(400),
        );
        let opts = ExecuteOptions {
            retry: RetryConfig::new(3, Duration::from_millis(10), 1.0),
            call_timeout: Duration::from_millis(20),
            settle_timeout: Duration::from_millis(20),
            ..opts()
        };
        let desired = DesiredState::new(vec![identity("oai")]);
        let report = run(&provider, &desired, StateSnapshot::new(), &opts);

        assert!(matches!(
            report.outcome("oai"),
            Some(ProvisioningOutcome::Failed { .. })
        ));
        assert_eq!(provider.calls_for(Operation::Create, "oai"), 1);
    }

    #[test]
    fn test_prune_deletes_orphans() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![identity("keep"), identity("drop")]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());

        let v2 = DesiredState::new(vec![identity("keep")]);
        let without_prune = run(&provider, &v2, first.state.clone(), &opts());
        assert!(without_prune.deleted.is_empty());
        assert!(without_prune.state.get("drop").is_some());

        let pruning = ExecuteOptions {
            prune: true,
            ..opts()
        };
        let pruned = run(&provider, &v2, first.state, &pruning);
        assert_eq!(pruned.deleted.len(), 1);
        assert_eq!(pruned.deleted[0].removal, Removal::Orphaned);
        assert!(pruned.state.get("drop").is_none());
        assert_eq!(provider.inventory().count(ResourceKind::AccessIdentity), 1);
    }

    #[test]
    fn test_kind_change_deletes_old_resource_under_prune() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![bucket("site", "site.example.com")]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());
        let old_id = first.state.get("site").unwrap().id.clone();

        let pruning = ExecuteOptions {
            prune: true,
            ..opts()
        };
        let v2 = DesiredState::new(vec![identity("site")]);
        let second = run(&provider, &v2, first.state, &pruning);

        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(second.outcome("site"), Some(&ProvisioningOutcome::Created));
        assert_eq!(second.deleted.len(), 1);
        assert_eq!(second.deleted[0].id, old_id);
        assert_eq!(second.deleted[0].kind, ResourceKind::Bucket);
        assert_eq!(second.deleted[0].removal, Removal::Orphaned);
        assert_eq!(provider.inventory().count(ResourceKind::Bucket), 0);
        assert_eq!(
            second.state.get("site").unwrap().kind,
            ResourceKind::AccessIdentity
        );
    }

    #[test]
    fn test_kind_change_without_prune_is_rejected() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![bucket("site", "site.example.com")]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());
        let mutations = provider.mutations().len();

        let v2 = DesiredState::new(vec![identity("site")]);
        let handle: Arc<dyn Provider> = provider.clone();
        let ctx = ReconcileContext::new(handle).with_previous_state(first.state);

        let err = execute(&v2, &ctx, &opts()).unwrap_err();
        assert!(matches!(err, Error::InvalidNode { ref node, .. } if node == "site"), "{err}");
        assert_eq!(provider.mutations().len(), mutations);

        let pruning = ExecuteOptions {
            prune: true,
            ..opts()
        };
        let preview = plan(&v2, &ctx, &pruning).unwrap();
        assert_eq!(preview.orphans, vec!["site".to_string()]);
        assert_eq!(preview.action("site"), Some(&PlannedAction::Create));
    }

    #[test]
    fn test_unique_key_replacement_deletes_first() {
        let provider = zoned_provider();
        let first = run(&provider, &record_stack("primary"), StateSnapshot::new(), &opts());
        assert_eq!(first.status, RunStatus::Succeeded);
        let old_id = first.state.get("www").unwrap().id.clone();

        let second = run(&provider, &record_stack("secondary"), first.state, &opts());

        assert_eq!(
            second.outcome("www"),
            Some(&ProvisioningOutcome::Replaced {
                previous_id: old_id
            })
        );
        assert!(second.deleted.is_empty());
        assert!(second.retained.is_empty());
        assert_eq!(provider.inventory().count(ResourceKind::DnsRecord), 1);

        let mutations: Vec<Operation> = provider
            .mutations()
            .iter()
            .filter(|c| c.kind == ResourceKind::DnsRecord)
            .map(|c| c.operation)
            .collect();
        assert_eq!(
            mutations,
            [Operation::Create, Operation::Delete, Operation::Create]
        );
    }

    #[test]
    fn test_rejected_recreate_recovers_on_next_run() {
        let provider = zoned_provider();
        let first = run(&provider, &record_stack("primary"), StateSnapshot::new(), &opts());
        provider.reject_once(
            Operation::Create,
            ResourceKind::DnsRecord,
            "www.example.com",
            "record set limit reached",
        );

        let second = run(&provider, &record_stack("secondary"), first.state, &opts());
        assert_eq!(second.status, RunStatus::Failed);
        assert!(matches!(
            second.outcome("www"),
            Some(ProvisioningOutcome::Failed { .. })
        ));
        assert_eq!(provider.inventory().count(ResourceKind::DnsRecord), 0);

        let third = run(&provider, &record_stack("secondary"), second.state, &opts());
        assert_eq!(third.status, RunStatus::Succeeded);
        assert_eq!(third.outcome("www"), Some(&ProvisioningOutcome::Created));
        assert_eq!(provider.inventory().count(ResourceKind::DnsRecord), 1);
    }

    #[test]
    fn test_bucket_name_case_change_is_unchanged() {
        let provider = Arc::new(MemoryProvider::new());
        let v1 = DesiredState::new(vec![bucket("site", "site.example.com")]);
        let first = run(&provider, &v1, StateSnapshot::new(), &opts());

        let v2 = DesiredState::new(vec![bucket("site", "Site.Example.com")]);
        let second = run(&provider, &v2, first.state, &opts());

        assert_eq!(second.outcome("site"), Some(&ProvisioningOutcome::Unchanged));
        assert_eq!(provider.inventory().count(ResourceKind::Bucket), 1);
    }

    #[test]
    fn test_plan_defers_unknown_inputs() {
        let provider = Arc::new(MemoryProvider::new());
        let desired = DesiredState::new(vec![
            bucket("site", "site.example.com"),
            deployment("deploy", "site", "v1"),
        ]);
        let ctx = ReconcileContext::new(provider.clone());
        let plan = plan(&desired, &ctx, &opts()).unwrap();

        assert_eq!(plan.action("site"), Some(&PlannedAction::Create));
        assert_eq!(
            plan.action("deploy"),
            Some(&PlannedAction::Deferred {
                waiting_on: "site".into()
            })
        );
        assert!(plan.has_changes());
        assert!(provider.mutations().is_empty());
    }
}
