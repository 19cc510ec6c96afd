//! Desired-vs-current comparison
//!
//! Only attributes the desired state sets are compared: whatever the
//! provider adds on its own (defaults, timestamps, server-side fields) never
//! causes an update.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kind::ResourceKind;
use crate::model::Attributes;
use crate::provider::Lookup;

/// What to do with a node's resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Create,
    NoOp,
    /// Mutable attributes differ
    Update { changes: Vec<AttributeChange> },
    /// An immutable attribute differs; the resource must be recreated
    Replace { fields: Vec<String> },
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// One differing attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub field: String,
    /// Current value, `None` if the provider does not report the field
    pub from: Option<Value>,
    pub to: Value,
}

/// Attributes of `desired` whose value differs in `current`
pub fn diff(desired: &Attributes, current: &Attributes) -> Vec<AttributeChange> {
    desired
        .iter()
        .filter(|(field, value)| current.get(*field) != Some(*value))
        .map(|(field, value)| AttributeChange {
            field: field.clone(),
            from: current.get(field).cloned(),
            to: value.clone(),
        })
        .collect()
}

/// Decide how to converge `current` towards `desired`.
///
/// Read-only kinds are never changed: a found resource is a no-op and a
/// missing one is reported as `Create`, which the caller must refuse.
pub fn reconcile(kind: ResourceKind, desired: &Attributes, current: &Lookup) -> Decision {
    let Lookup::Found(current) = current else {
        return Decision::Create;
    };

    let spec = kind.spec();
    if spec.read_only {
        return Decision::NoOp;
    }

    let changes = diff(desired, &current.attributes);
    if changes.is_empty() {
        return Decision::NoOp;
    }

    let immutable: Vec<String> = changes
        .iter()
        .filter(|c| spec.is_immutable(&c.field))
        .map(|c| c.field.clone())
        .collect();

    if immutable.is_empty() {
        Decision::Update { changes }
    } else {
        Decision::Replace { fields: immutable }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CurrentState;
    use crate::model::Outputs;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn found(attributes: Attributes) -> Lookup {
        Lookup::Found(CurrentState {
            id: "x".into(),
            attributes,
            outputs: Outputs::new(),
        })
    }

    #[test]
    fn test_missing_resource_is_created() {
        let desired = attrs(&[("bucket_name", json!("b"))]);
        assert_eq!(
            reconcile(ResourceKind::Bucket, &desired, &Lookup::NotFound),
            Decision::Create
        );
    }

    #[test]
    fn test_extra_provider_fields_ignored() {
        let desired = attrs(&[("comment", json!("edge"))]);
        let current = attrs(&[("comment", json!("edge")), ("etag", json!("E1"))]);
        assert!(reconcile(ResourceKind::AccessIdentity, &desired, &found(current)).is_noop());
    }

    #[test]
    fn test_mutable_change_updates() {
        let desired = attrs(&[("fingerprint", json!("new")), ("source", json!("./site"))]);
        let current = attrs(&[("fingerprint", json!("old")), ("source", json!("./site"))]);
        let decision = reconcile(ResourceKind::ContentDeployment, &desired, &found(current));
        assert_eq!(
            decision,
            Decision::Update {
                changes: vec![AttributeChange {
                    field: "fingerprint".into(),
                    from: Some(json!("old")),
                    to: json!("new"),
                }]
            }
        );
    }

    #[test]
    fn test_immutable_change_replaces() {
        let desired = attrs(&[("bucket_name", json!("new.example.com"))]);
        let current = attrs(&[("bucket_name", json!("old.example.com"))]);
        assert_eq!(
            reconcile(ResourceKind::Bucket, &desired, &found(current)),
            Decision::Replace {
                fields: vec!["bucket_name".into()]
            }
        );
    }

    #[test]
    fn test_read_only_never_changes() {
        let desired = attrs(&[("private_zone", json!(true))]);
        let current = attrs(&[("private_zone", json!(false))]);
        assert!(reconcile(ResourceKind::ZoneReference, &desired, &found(current)).is_noop());
    }

    #[test]
    fn test_field_missing_from_current_counts_as_change() {
        let changes = diff(&attrs(&[("comment", json!(""))]), &Attributes::new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].from, None);
    }
}
