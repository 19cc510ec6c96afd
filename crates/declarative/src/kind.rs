//! Kind-indexed behavior table
//!
//! Per-kind behavior lives in a static table of plain data and pure
//! functions rather than in a trait hierarchy. The engine looks up a
//! [`KindSpec`] by [`ResourceKind`] whenever it needs to know how a
//! resource is addressed, which of its fields are immutable, or which
//! outputs downstream nodes may reference.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::Attributes;

/// The fixed set of resource kinds an edge topology is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ZoneReference,
    Certificate,
    Bucket,
    ContentDeployment,
    AccessIdentity,
    Distribution,
    DnsRecord,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        Self::ZoneReference,
        Self::Certificate,
        Self::Bucket,
        Self::ContentDeployment,
        Self::AccessIdentity,
        Self::Distribution,
        Self::DnsRecord,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZoneReference => "zone_reference",
            Self::Certificate => "certificate",
            Self::Bucket => "bucket",
            Self::ContentDeployment => "content_deployment",
            Self::AccessIdentity => "access_identity",
            Self::Distribution => "distribution",
            Self::DnsRecord => "dns_record",
        }
    }

    /// Behavior table entry for this kind
    pub fn spec(&self) -> &'static KindSpec {
        match self {
            Self::ZoneReference => &ZONE_REFERENCE,
            Self::Certificate => &CERTIFICATE,
            Self::Bucket => &BUCKET,
            Self::ContentDeployment => &CONTENT_DEPLOYMENT,
            Self::AccessIdentity => &ACCESS_IDENTITY,
            Self::Distribution => &DISTRIBUTION,
            Self::DnsRecord => &DNS_RECORD,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of how one resource kind behaves.
pub struct KindSpec {
    pub kind: ResourceKind,
    /// Output attributes the provider returns once the resource exists
    pub outputs: &'static [&'static str],
    /// Desired attributes that cannot change in place
    pub immutable: &'static [&'static str],
    /// Looked up only, never created, updated or deleted
    pub read_only: bool,
    /// The provider allows one resource per lookup key
    pub unique_key: bool,
    /// Derives the provider-side lookup key from the logical name and
    /// rendered desired attributes
    pub lookup_key: fn(&str, &Attributes) -> String,
}

impl KindSpec {
    pub fn has_output(&self, output: &str) -> bool {
        self.outputs.contains(&output)
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable.contains(&field)
    }
}

fn attribute_or_name(field: &'static str) -> impl Fn(&str, &Attributes) -> String {
    move |name, attrs| {
        attrs
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::to_lowercase)
            .unwrap_or_else(|| name.to_string())
    }
}

fn by_domain_name(name: &str, attrs: &Attributes) -> String {
    attribute_or_name("domain_name")(name, attrs)
}

fn by_bucket_name(name: &str, attrs: &Attributes) -> String {
    attribute_or_name("bucket_name")(name, attrs)
}

fn by_record_name(name: &str, attrs: &Attributes) -> String {
    attribute_or_name("record_name")(name, attrs)
}

fn by_logical_name(name: &str, _attrs: &Attributes) -> String {
    name.to_string()
}

static ZONE_REFERENCE: KindSpec = KindSpec {
    kind: ResourceKind::ZoneReference,
    outputs: &["zone_id", "domain_name"],
    immutable: &["domain_name", "private_zone"],
    read_only: true,
    unique_key: true,
    lookup_key: by_domain_name,
};

static CERTIFICATE: KindSpec = KindSpec {
    kind: ResourceKind::Certificate,
    outputs: &["arn", "domain_name"],
    immutable: &["domain_name", "subject_alternative_names", "region"],
    read_only: false,
    unique_key: false,
    lookup_key: by_domain_name,
};

static BUCKET: KindSpec = KindSpec {
    kind: ResourceKind::Bucket,
    outputs: &["bucket_name", "arn", "regional_domain_name"],
    immutable: &["bucket_name"],
    read_only: false,
    unique_key: true,
    lookup_key: by_bucket_name,
};

static CONTENT_DEPLOYMENT: KindSpec = KindSpec {
    kind: ResourceKind::ContentDeployment,
    outputs: &["fingerprint", "bucket_name"],
    immutable: &[],
    read_only: false,
    unique_key: false,
    lookup_key: by_logical_name,
};

static ACCESS_IDENTITY: KindSpec = KindSpec {
    kind: ResourceKind::AccessIdentity,
    outputs: &["id", "canonical_user_id"],
    immutable: &[],
    read_only: false,
    unique_key: false,
    lookup_key: by_logical_name,
};

static DISTRIBUTION: KindSpec = KindSpec {
    kind: ResourceKind::Distribution,
    outputs: &["id", "domain_name", "arn"],
    immutable: &[],
    read_only: false,
    unique_key: false,
    lookup_key: by_logical_name,
};

static DNS_RECORD: KindSpec = KindSpec {
    kind: ResourceKind::DnsRecord,
    outputs: &["fqdn"],
    immutable: &["record_name", "record_type", "zone_id"],
    read_only: false,
    unique_key: true,
    lookup_key: by_record_name,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_matches_kind() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.spec().kind, kind);
        }
    }

    #[test]
    fn test_lookup_key_prefers_natural_key() {
        let mut attrs = Attributes::new();
        attrs.insert("bucket_name".into(), json!("Test.Example.com"));
        let spec = ResourceKind::Bucket.spec();
        assert_eq!((spec.lookup_key)("site", &attrs), "test.example.com");

        let spec = ResourceKind::Distribution.spec();
        assert_eq!((spec.lookup_key)("cdn", &attrs), "cdn");
    }

    #[test]
    fn test_only_zone_is_read_only() {
        let read_only: Vec<_> = ResourceKind::ALL
            .iter()
            .filter(|k| k.spec().read_only)
            .collect();
        assert_eq!(read_only, vec![&ResourceKind::ZoneReference]);
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: ResourceKind = serde_json::from_str("\"dns_record\"").unwrap();
        assert_eq!(kind, ResourceKind::DnsRecord);
        assert_eq!(kind.to_string(), "dns_record");
    }
}
