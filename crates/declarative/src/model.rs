//! Resource model
//!
//! A [`ResourceNode`] is a plain tagged value: a logical name plus a
//! [`ResourceSpec`] holding the kind-specific desired attributes. Fields that
//! read another node's outputs are typed [`OutputRef`]s, so dependency edges
//! come from the model itself rather than from string interpolation.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::kind::ResourceKind;
use crate::routing::{self, OriginSource, OriginSpec, RoutingRule};

/// Concrete attribute map, references already substituted
pub type Attributes = BTreeMap<String, Value>;

/// Output attributes a provider returns for an existing resource
pub type Outputs = BTreeMap<String, Value>;

/// Region CDN distributions require their certificate to be issued in
pub const CDN_CERTIFICATE_REGION: &str = "us-east-1";

/// Hosted zone id used for alias records pointing at a CDN distribution
pub const CDN_ALIAS_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// Reference to another node's output, written `"<node>.<output>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputRef {
    pub node: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.output)
    }
}

impl FromStr for OutputRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Output names never contain dots; node names may
        match s.rsplit_once('.') {
            Some((node, output)) if !node.is_empty() && !output.is_empty() => {
                Ok(Self::new(node, output))
            }
            _ => Err(format!("invalid reference '{s}', expected '<resource>.<output>'")),
        }
    }
}

impl TryFrom<String> for OutputRef {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputRef> for String {
    fn from(value: OutputRef) -> Self {
        value.to_string()
    }
}

/// Why desired attributes could not be rendered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The referenced node has not published this output (yet)
    #[error("output {0} is not available")]
    Unresolved(OutputRef),
    #[error("{0}")]
    Invalid(String),
}

/// Existing hosted zone, referenced but never managed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub domain_name: String,
    #[serde(default)]
    pub private_zone: bool,
}

fn default_certificate_region() -> String {
    CDN_CERTIFICATE_REGION.to_string()
}

/// DNS-validated TLS certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSpec {
    pub domain_name: String,
    #[serde(default)]
    pub subject_alternative_names: Vec<String>,
    /// Zone the validation records are written to
    pub validation_zone: OutputRef,
    #[serde(default = "default_certificate_region")]
    pub region: String,
}

impl CertificateSpec {
    /// Whether `host` is covered by the primary name or a SAN pattern
    pub fn covers(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        std::iter::once(&self.domain_name)
            .chain(&self.subject_alternative_names)
            .any(|pattern| name_matches(&pattern.to_lowercase(), &host))
    }
}

/// Single-label wildcard match as certificates define it
fn name_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            host == pattern
                || host
                    .split_once('.')
                    .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix)
        }
        None => pattern == host,
    }
}

/// Object-storage bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub bucket_name: String,
}

/// Upload of local static assets into a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSpec {
    /// Local asset directory
    pub source: String,
    pub bucket: OutputRef,
    #[serde(default)]
    pub destination_prefix: String,
    /// Content fingerprint, filled in by whoever reads `source`
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Identity the CDN uses to read from private buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessIdentitySpec {
    #[serde(default)]
    pub comment: String,
}

/// CDN distribution with path-routed origins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSpec {
    /// Alternate domain names served by the distribution
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub certificate: Option<OutputRef>,
    pub origins: Vec<OriginSpec>,
    pub routes: Vec<RoutingRule>,
    #[serde(default)]
    pub comment: String,
}

/// Alias record pointing a name at a distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordSpec {
    pub record_name: String,
    pub zone: OutputRef,
    pub target: OutputRef,
}

/// Kind-specific desired attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    ZoneReference(ZoneSpec),
    Certificate(CertificateSpec),
    Bucket(BucketSpec),
    ContentDeployment(ContentSpec),
    AccessIdentity(AccessIdentitySpec),
    Distribution(DistributionSpec),
    DnsRecord(DnsRecordSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::ZoneReference(_) => ResourceKind::ZoneReference,
            Self::Certificate(_) => ResourceKind::Certificate,
            Self::Bucket(_) => ResourceKind::Bucket,
            Self::ContentDeployment(_) => ResourceKind::ContentDeployment,
            Self::AccessIdentity(_) => ResourceKind::AccessIdentity,
            Self::Distribution(_) => ResourceKind::Distribution,
            Self::DnsRecord(_) => ResourceKind::DnsRecord,
        }
    }

    /// Every output reference in declaration order
    pub fn references(&self) -> Vec<&OutputRef> {
        match self {
            Self::ZoneReference(_) | Self::Bucket(_) | Self::AccessIdentity(_) => Vec::new(),
            Self::Certificate(c) => vec![&c.validation_zone],
            Self::ContentDeployment(c) => vec![&c.bucket],
            Self::Distribution(d) => {
                let mut refs: Vec<&OutputRef> = d.certificate.iter().collect();
                for origin in &d.origins {
                    if let OriginSource::Bucket {
                        bucket,
                        access_identity,
                    } = &origin.source
                    {
                        refs.push(bucket);
                        refs.extend(access_identity);
                    }
                }
                refs
            }
            Self::DnsRecord(r) => vec![&r.zone, &r.target],
        }
    }

    /// Substitute references and produce the concrete desired attributes.
    pub fn render(
        &self,
        name: &str,
        resolve: &dyn Fn(&OutputRef) -> Option<Value>,
    ) -> std::result::Result<Attributes, RenderError> {
        let get = |r: &OutputRef| resolve(r).ok_or_else(|| RenderError::Unresolved(r.clone()));

        let value = match self {
            Self::ZoneReference(z) => json!({
                "domain_name": z.domain_name.to_lowercase(),
                "private_zone": z.private_zone,
            }),
            Self::Certificate(c) => json!({
                "domain_name": c.domain_name.to_lowercase(),
                "subject_alternative_names": c.subject_alternative_names,
                "validation_zone_id": get(&c.validation_zone)?,
                "region": c.region,
            }),
            Self::Bucket(b) => json!({ "bucket_name": b.bucket_name.to_lowercase() }),
            Self::ContentDeployment(c) => {
                let fingerprint = c.fingerprint.as_deref().ok_or_else(|| {
                    RenderError::Invalid(format!("content of '{}' was never fingerprinted", c.source))
                })?;
                json!({
                    "source": c.source,
                    "bucket_name": get(&c.bucket)?,
                    "destination_prefix": c.destination_prefix,
                    "fingerprint": fingerprint,
                })
            }
            Self::AccessIdentity(a) => json!({ "comment": a.comment }),
            Self::Distribution(d) => {
                let table = routing::compile(name, &d.origins, &d.routes)
                    .map_err(|e| RenderError::Invalid(e.to_string()))?;
                let certificate_arn = d.certificate.as_ref().map(get).transpose()?;
                let mut origins = Vec::with_capacity(d.origins.len());
                for origin in &d.origins {
                    origins.push(match &origin.source {
                        OriginSource::Custom { domain_name } => json!({
                            "id": origin.id,
                            "domain_name": domain_name,
                            "access_identity": Value::Null,
                        }),
                        OriginSource::Bucket {
                            bucket,
                            access_identity,
                        } => json!({
                            "id": origin.id,
                            "domain_name": get(bucket)?,
                            "access_identity": access_identity.as_ref().map(get).transpose()?,
                        }),
                    });
                }
                json!({
                    "aliases": d.aliases,
                    "certificate_arn": certificate_arn,
                    "origins": origins,
                    "behaviors": table.to_value(),
                    "comment": d.comment,
                })
            }
            Self::DnsRecord(r) => json!({
                "record_name": r.record_name.to_lowercase(),
                "record_type": "A",
                "zone_id": get(&r.zone)?,
                "alias_target": get(&r.target)?,
                "alias_hosted_zone_id": CDN_ALIAS_HOSTED_ZONE_ID,
            }),
        };

        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(RenderError::Invalid("attributes must render to an object".into())),
        }
    }
}

/// A named resource in the desired topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical identity, unique within the topology
    pub name: String,
    /// Ordering-only edges in addition to those implied by references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl ResourceNode {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            spec,
        }
    }

    /// Add an ordering-only dependency
    pub fn after(mut self, node: impl Into<String>) -> Self {
        self.depends_on.push(node.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// Names of the nodes this node depends on, deduplicated, in
    /// declaration order
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        let referenced = self.spec.references().into_iter().map(|r| r.node.as_str());
        for dep in referenced.chain(self.depends_on.iter().map(String::as_str)) {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

/// The full desired-state description of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub resources: Vec<ResourceNode>,
}

impl DesiredState {
    pub fn new(resources: Vec<ResourceNode>) -> Self {
        Self { resources }
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.resources.iter().find(|n| n.name == name)
    }

    /// Kind-specific checks that need no provider access.
    ///
    /// Reference targets are checked by the graph builder; this only looks
    /// at constraints within and between declared nodes.
    pub fn validate(&self) -> Result<()> {
        for node in &self.resources {
            match &node.spec {
                ResourceSpec::ContentDeployment(c) => {
                    if c.fingerprint.as_deref().is_none_or(str::is_empty) {
                        return Err(invalid(node, format!("no fingerprint for '{}'", c.source)));
                    }
                }
                ResourceSpec::Distribution(d) => {
                    routing::compile(&node.name, &d.origins, &d.routes)?;
                    self.validate_certificate(node, d)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_certificate(&self, node: &ResourceNode, spec: &DistributionSpec) -> Result<()> {
        let Some(reference) = &spec.certificate else {
            if spec.aliases.is_empty() {
                return Ok(());
            }
            return Err(invalid(node, "aliases require a certificate".to_string()));
        };

        let Some(ResourceSpec::Certificate(cert)) = self.node(&reference.node).map(|n| &n.spec)
        else {
            // unknown targets are reported by the graph builder
            return Ok(());
        };

        if cert.region != CDN_CERTIFICATE_REGION {
            return Err(invalid(
                node,
                format!(
                    "certificate '{}' is issued in {}, distributions require {}",
                    reference.node, cert.region, CDN_CERTIFICATE_REGION
                ),
            ));
        }

        if let Some(alias) = spec.aliases.iter().find(|a| !cert.covers(a)) {
            return Err(invalid(
                node,
                format!("alias '{alias}' is not covered by certificate '{}'", reference.node),
            ));
        }
        Ok(())
    }
}

fn invalid(node: &ResourceNode, message: String) -> Error {
    Error::InvalidNode {
        node: node.name.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingRule;

    fn cert(region: &str) -> ResourceNode {
        ResourceNode::new(
            "cert",
            ResourceSpec::Certificate(CertificateSpec {
                domain_name: "test.example.com".into(),
                subject_alternative_names: vec!["*.test.example.com".into()],
                validation_zone: OutputRef::new("zone", "zone_id"),
                region: region.into(),
            }),
        )
    }

    fn distribution(aliases: &[&str]) -> ResourceNode {
        ResourceNode::new(
            "cdn",
            ResourceSpec::Distribution(DistributionSpec {
                aliases: aliases.iter().map(ToString::to_string).collect(),
                certificate: Some(OutputRef::new("cert", "arn")),
                origins: vec![OriginSpec {
                    id: "blog".into(),
                    source: OriginSource::Custom {
                        domain_name: "blog.example.com".into(),
                    },
                }],
                routes: vec![RoutingRule::default_to("blog")],
                comment: String::new(),
            }),
        )
    }

    #[test]
    fn test_output_ref_parsing() {
        let r: OutputRef = "test.example.com.bucket_name".parse().unwrap();
        assert_eq!(r.node, "test.example.com");
        assert_eq!(r.output, "bucket_name");
        assert!("nodot".parse::<OutputRef>().is_err());
        assert!(".arn".parse::<OutputRef>().is_err());
    }

    #[test]
    fn test_certificate_covers_wildcards() {
        let ResourceSpec::Certificate(c) = cert(CDN_CERTIFICATE_REGION).spec else {
            unreachable!()
        };
        assert!(c.covers("test.example.com"));
        assert!(c.covers("www.test.example.com"));
        assert!(c.covers("*.test.example.com"));
        assert!(!c.covers("a.b.test.example.com"));
        assert!(!c.covers("example.com"));
    }

    #[test]
    fn test_dependencies_dedup_in_order() {
        let node = ResourceNode::new(
            "record",
            ResourceSpec::DnsRecord(DnsRecordSpec {
                record_name: "test.example.com".into(),
                zone: OutputRef::new("zone", "zone_id"),
                target: OutputRef::new("cdn", "domain_name"),
            }),
        )
        .after("zone")
        .after("deploy");
        assert_eq!(node.dependencies(), vec!["zone", "cdn", "deploy"]);
    }

    #[test]
    fn test_render_substitutes_references() {
        let node = cert(CDN_CERTIFICATE_REGION);
        let attrs = node
            .spec
            .render(&node.name, &|r| (r.node == "zone").then(|| json!("Z123")))
            .unwrap();
        assert_eq!(attrs["validation_zone_id"], "Z123");
        assert_eq!(attrs["region"], "us-east-1");
    }

    #[test]
    fn test_render_lowercases_bucket_name() {
        let spec = ResourceSpec::Bucket(BucketSpec {
            bucket_name: "Site.Example.com".into(),
        });
        let attrs = spec.render("site", &|_| None).unwrap();
        assert_eq!(attrs["bucket_name"], "site.example.com");
    }

    #[test]
    fn test_render_reports_unresolved() {
        let node = cert(CDN_CERTIFICATE_REGION);
        let err = node.spec.render(&node.name, &|_| None).unwrap_err();
        assert_eq!(err, RenderError::Unresolved(OutputRef::new("zone", "zone_id")));
    }

    #[test]
    fn test_validate_certificate_region() {
        let state = DesiredState::new(vec![cert("eu-west-1"), distribution(&[])]);
        let err = state.validate().unwrap_err();
        assert!(err.to_string().contains("us-east-1"), "{err}");
    }

    #[test]
    fn test_validate_alias_coverage() {
        let ok = DesiredState::new(vec![
            cert(CDN_CERTIFICATE_REGION),
            distribution(&["test.example.com", "*.test.example.com"]),
        ]);
        ok.validate().unwrap();

        let bad = DesiredState::new(vec![
            cert(CDN_CERTIFICATE_REGION),
            distribution(&["shop.example.com"]),
        ]);
        assert!(matches!(bad.validate(), Err(Error::InvalidNode { .. })));
    }

    #[test]
    fn test_validate_requires_fingerprint() {
        let state = DesiredState::new(vec![ResourceNode::new(
            "deploy",
            ResourceSpec::ContentDeployment(ContentSpec {
                source: "./assets".into(),
                bucket: OutputRef::new("site", "bucket_name"),
                destination_prefix: String::new(),
                fingerprint: None,
            }),
        )]);
        assert!(matches!(state.validate(), Err(Error::InvalidNode { .. })));
    }

    #[test]
    fn test_deserialize_tagged_node() {
        let node: ResourceNode = serde_json::from_value(json!({
            "name": "site",
            "kind": "bucket",
            "bucket_name": "test.example.com",
        }))
        .unwrap();
        assert_eq!(node.kind(), ResourceKind::Bucket);
        assert!(node.depends_on.is_empty());
    }
}
