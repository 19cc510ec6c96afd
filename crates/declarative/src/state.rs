//! Recorded state of previous runs
//!
//! The snapshot maps each logical name to what the last successful
//! provisioning of that node left behind. It is what lets the engine find a
//! resource whose natural key was changed (so the change becomes a
//! replacement rather than a second resource) and what orphan pruning
//! works from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kind::ResourceKind;
use crate::model::Outputs;

/// What the engine knows about one provisioned node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub kind: ResourceKind,
    /// Provider-assigned identifier
    pub id: String,
    /// Key the resource was last found or created under
    pub lookup_key: String,
    /// Position in the execution order of the run that recorded it
    pub position: usize,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub outputs: Outputs,
}

impl StateRecord {
    pub fn new(
        kind: ResourceKind,
        id: impl Into<String>,
        lookup_key: impl Into<String>,
        position: usize,
        depends_on: Vec<String>,
        outputs: &Outputs,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            lookup_key: lookup_key.into(),
            position,
            depends_on,
            updated_at: Utc::now(),
            // TOML has no null
            outputs: outputs
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Recorded state of every managed node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub resources: BTreeMap<String, StateRecord>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&StateRecord> {
        self.resources.get(name)
    }

    /// Record for `name`, only if it was recorded as the same kind
    pub fn record_of(&self, name: &str, kind: ResourceKind) -> Option<&StateRecord> {
        self.resources.get(name).filter(|r| r.kind == kind)
    }

    pub fn insert(&mut self, name: impl Into<String>, record: StateRecord) {
        self.resources.insert(name.into(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<StateRecord> {
        self.resources.remove(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Records no longer declared under the same name and kind, dependents
    /// first. `declared` maps a name to the kind it is declared as.
    pub fn orphans(
        &self,
        declared: impl Fn(&str) -> Option<ResourceKind>,
    ) -> Vec<(&str, &StateRecord)> {
        let mut orphans: Vec<_> = self
            .resources
            .iter()
            .filter(|(name, record)| declared(name) != Some(record.kind))
            .map(|(name, record)| (name.as_str(), record))
            .collect();
        orphans.sort_by(|a, b| b.1.position.cmp(&a.1.position).then(a.0.cmp(b.0)));
        orphans
    }
}
