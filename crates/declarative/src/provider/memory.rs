//! In-memory control plane
//!
//! Behaves like a small, well-mannered cloud: resources get generated ids
//! and outputs, lookups are case-insensitive on the key, and every call is
//! recorded. Faults (permanent rejections, transient failures, latency) can
//! be injected per resource key. The whole inventory serializes, so a CLI
//! can persist it between runs as a local simulated provider.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::{CurrentState, Lookup, Provider};
use crate::error::{ProviderError, ProviderResult};
use crate::kind::ResourceKind;
use crate::model::{Attributes, CDN_CERTIFICATE_REGION, Outputs};

/// Provider operation, as recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Lookup,
    Create,
    Update,
    Delete,
}

impl Operation {
    fn mutates(self) -> bool {
        !matches!(self, Self::Lookup)
    }
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub kind: ResourceKind,
    /// Lookup key of the addressed resource
    pub key: String,
}

/// A stored resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    pub kind: ResourceKind,
    pub key: String,
    pub attributes: Attributes,
    pub outputs: Outputs,
}

/// Everything the simulated control plane holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Resources by provider id
    #[serde(default)]
    pub resources: BTreeMap<String, StoredResource>,
    #[serde(default)]
    next_id: u64,
}

impl Inventory {
    /// Newest resource of `kind` stored under `key`
    fn find(&self, kind: ResourceKind, key: &str) -> Option<(&String, &StoredResource)> {
        self.resources
            .iter()
            .rev()
            .find(|(_, r)| r.kind == kind && r.key.eq_ignore_ascii_case(key))
    }

    fn allocate_id(&mut self, kind: ResourceKind) -> String {
        self.next_id += 1;
        let prefix = match kind {
            ResourceKind::ZoneReference => "Z",
            ResourceKind::Certificate => "cert-",
            ResourceKind::Bucket => "bkt-",
            ResourceKind::ContentDeployment => "dep-",
            ResourceKind::AccessIdentity => "E",
            ResourceKind::Distribution => "D",
            ResourceKind::DnsRecord => "rr-",
        };
        format!("{prefix}{:06}", self.next_id)
    }

    /// Number of stored resources of a kind
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.resources.values().filter(|r| r.kind == kind).count()
    }
}

#[derive(Default)]
struct Faults {
    /// Keys whose mutations are always rejected
    rejected: HashMap<(ResourceKind, String), String>,
    /// Keys whose next N calls fail transiently
    transient: HashMap<(ResourceKind, String), u32>,
    /// One-shot rejections of the next call of an operation on a key
    rejected_once: HashMap<(Operation, ResourceKind, String), String>,
    /// One-shot delays for the next call of an operation on a key
    stalls: HashMap<(Operation, ResourceKind, String), Duration>,
    latency: Option<Duration>,
}

/// Thread-safe in-memory [`Provider`]
#[derive(Default)]
pub struct MemoryProvider {
    inventory: Mutex<Inventory>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously saved inventory
    pub fn from_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            ..Self::default()
        }
    }

    /// Snapshot of the current inventory
    pub fn inventory(&self) -> Inventory {
        lock(&self.inventory).clone()
    }

    /// Insert a pre-existing resource, e.g. a hosted zone managed elsewhere.
    /// Returns its id.
    pub fn seed(&self, kind: ResourceKind, key: &str, attributes: Attributes) -> String {
        let mut inventory = lock(&self.inventory);
        let id = inventory.allocate_id(kind);
        let outputs = simulate_outputs(kind, &id, key, &attributes);
        inventory.resources.insert(
            id.clone(),
            StoredResource {
                kind,
                key: key.to_string(),
                attributes,
                outputs,
            },
        );
        id
    }

    /// Seed a public hosted zone for `domain`
    pub fn seed_zone(&self, domain: &str) -> String {
        let mut attrs = Attributes::new();
        attrs.insert("domain_name".into(), json!(domain.to_lowercase()));
        attrs.insert("private_zone".into(), json!(false));
        self.seed(ResourceKind::ZoneReference, domain, attrs)
    }

    /// Reject every create/update/delete addressed at `key`
    pub fn reject(&self, kind: ResourceKind, key: &str, message: &str) {
        lock(&self.faults)
            .rejected
            .insert((kind, key.to_lowercase()), message.to_string());
    }

    /// Reject the next `operation` on `key`, once
    pub fn reject_once(&self, operation: Operation, kind: ResourceKind, key: &str, message: &str) {
        lock(&self.faults)
            .rejected_once
            .insert((operation, kind, key.to_lowercase()), message.to_string());
    }

    /// Fail the next `times` calls addressed at `key` with a transient error
    pub fn fail_transiently(&self, kind: ResourceKind, key: &str, times: u32) {
        lock(&self.faults)
            .transient
            .insert((kind, key.to_lowercase()), times);
    }

    /// Delay the next `operation` on `key` by `duration`. The call still
    /// succeeds, however long the caller waited for it.
    pub fn stall(&self, operation: Operation, kind: ResourceKind, key: &str, duration: Duration) {
        lock(&self.faults)
            .stalls
            .insert((operation, kind, key.to_lowercase()), duration);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.faults).latency = Some(latency);
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Calls that changed (or tried to change) provider state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation.mutates())
            .collect()
    }

    /// Calls of one operation addressed at `key`
    pub fn calls_for(&self, operation: Operation, key: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.operation == operation && c.key.eq_ignore_ascii_case(key))
            .count()
    }

    fn key_of(&self, id: &str) -> Option<String> {
        lock(&self.inventory).resources.get(id).map(|r| r.key.clone())
    }

    /// Record the call, apply latency and injected faults
    fn enter(&self, operation: Operation, kind: ResourceKind, key: &str) -> ProviderResult<()> {
        lock(&self.calls).push(Call {
            operation,
            kind,
            key: key.to_string(),
        });

        let delay = {
            let mut faults = lock(&self.faults);
            let fault_key = (kind, key.to_lowercase());

            if let Some(remaining) = faults.transient.get_mut(&fault_key)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(ProviderError::transient(format!(
                    "throttled while calling {operation:?} on {kind} '{key}'"
                )));
            }

            if operation.mutates()
                && let Some(message) = faults.rejected.get(&fault_key)
            {
                return Err(ProviderError::rejected(message.clone()));
            }

            let once_key = (operation, fault_key.0, fault_key.1);
            if let Some(message) = faults.rejected_once.remove(&once_key) {
                return Err(ProviderError::rejected(message));
            }

            let stall = faults.stalls.remove(&once_key);
            faults.latency.unwrap_or_default() + stall.unwrap_or_default()
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }
}

impl Provider for MemoryProvider {
    fn lookup(&self, kind: ResourceKind, key: &str) -> ProviderResult<Lookup> {
        self.enter(Operation::Lookup, kind, key)?;
        let inventory = lock(&self.inventory);
        Ok(match inventory.find(kind, key) {
            Some((id, stored)) => Lookup::Found(CurrentState {
                id: id.clone(),
                attributes: stored.attributes.clone(),
                outputs: stored.outputs.clone(),
            }),
            None => Lookup::NotFound,
        })
    }

    fn create(
        &self,
        kind: ResourceKind,
        key: &str,
        attrs: &Attributes,
    ) -> ProviderResult<CurrentState> {
        self.enter(Operation::Create, kind, key)?;
        if kind.spec().read_only {
            return Err(ProviderError::rejected(format!("{kind} resources cannot be created")));
        }

        let mut inventory = lock(&self.inventory);
        if kind.spec().unique_key && inventory.find(kind, key).is_some() {
            return Err(ProviderError::rejected(format!("{kind} '{key}' already exists")));
        }

        let id = inventory.allocate_id(kind);
        let outputs = simulate_outputs(kind, &id, key, attrs);
        inventory.resources.insert(
            id.clone(),
            StoredResource {
                kind,
                key: key.to_string(),
                attributes: attrs.clone(),
                outputs: outputs.clone(),
            },
        );
        log::trace!("memory provider: created {kind} '{key}' as {id}");

        Ok(CurrentState {
            id,
            attributes: attrs.clone(),
            outputs,
        })
    }

    fn update(&self, kind: ResourceKind, id: &str, attrs: &Attributes) -> ProviderResult<Outputs> {
        let key = self.key_of(id).unwrap_or_else(|| id.to_string());
        self.enter(Operation::Update, kind, &key)?;

        let mut inventory = lock(&self.inventory);
        let stored = inventory
            .resources
            .get_mut(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| ProviderError::NotFound {
                kind,
                id: id.to_string(),
            })?;

        stored.attributes = attrs.clone();
        stored.outputs = simulate_outputs(kind, id, &key, attrs);
        Ok(stored.outputs.clone())
    }

    fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()> {
        let key = self.key_of(id).unwrap_or_else(|| id.to_string());
        self.enter(Operation::Delete, kind, &key)?;

        let mut inventory = lock(&self.inventory);
        match inventory.resources.get(id) {
            Some(r) if r.kind == kind => {
                inventory.resources.remove(id);
                Ok(())
            }
            _ => Err(ProviderError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }
}

/// Outputs a real control plane would report for a resource
fn simulate_outputs(kind: ResourceKind, id: &str, key: &str, attrs: &Attributes) -> Outputs {
    let attr = |name: &str| attrs.get(name).cloned().unwrap_or(Value::Null);

    let value = match kind {
        ResourceKind::ZoneReference => json!({
            "zone_id": id,
            "domain_name": attr("domain_name"),
        }),
        ResourceKind::Certificate => {
            let region = attrs
                .get("region")
                .and_then(Value::as_str)
                .unwrap_or(CDN_CERTIFICATE_REGION);
            json!({
                "arn": format!("arn:aws:acm:{region}:000000000000:certificate/{id}"),
                "domain_name": attr("domain_name"),
            })
        }
        ResourceKind::Bucket => json!({
            "bucket_name": key,
            "arn": format!("arn:aws:s3:::{key}"),
            "regional_domain_name": format!("{key}.s3.{CDN_CERTIFICATE_REGION}.amazonaws.com"),
        }),
        ResourceKind::ContentDeployment => json!({
            "fingerprint": attr("fingerprint"),
            "bucket_name": attr("bucket_name"),
        }),
        ResourceKind::AccessIdentity => json!({
            "id": id,
            "canonical_user_id": format!("{:0>64}", id.to_lowercase()),
        }),
        ResourceKind::Distribution => json!({
            "id": id,
            "domain_name": format!("{}.cloudfront.net", id.to_lowercase()),
            "arn": format!("arn:aws:cloudfront::000000000000:distribution/{id}"),
        }),
        ResourceKind::DnsRecord => json!({ "fqdn": format!("{key}.") }),
    };

    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Outputs::new(),
    }
}
