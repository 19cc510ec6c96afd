//! Routing table compiler
//!
//! Turns a distribution's origins and path rules into the ordered behavior
//! list a CDN distribution expects. Non-default rules keep the order the
//! author wrote them in: the CDN evaluates them first-match-wins, so
//! reordering here would silently change which backend serves a request.
//! The default rule always comes last.

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::OutputRef;

/// Where an origin's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OriginSource {
    /// A bucket node, optionally read through an access identity
    Bucket {
        bucket: OutputRef,
        #[serde(default)]
        access_identity: Option<OutputRef>,
    },
    /// An external host
    Custom { domain_name: String },
}

/// An origin declared on a distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginSpec {
    /// Identifier routing rules target
    pub id: String,
    #[serde(flatten)]
    pub source: OriginSource,
}

/// HTTP method sets a behavior may allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllowedMethods {
    GetHead,
    #[default]
    GetHeadOptions,
    All,
}

impl AllowedMethods {
    pub fn methods(&self) -> &'static [&'static str] {
        match self {
            Self::GetHead => &["GET", "HEAD"],
            Self::GetHeadOptions => &["GET", "HEAD", "OPTIONS"],
            Self::All => &["DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT"],
        }
    }
}

fn forward_by_default() -> bool {
    true
}

/// A binding from a path pattern to an origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Glob pattern such as `/blog*`; absent on the default rule
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// Id of the target origin
    pub origin: String,
    #[serde(default)]
    pub allowed_methods: AllowedMethods,
    #[serde(default = "forward_by_default")]
    pub forward_query_string: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl RoutingRule {
    /// A path-routed rule with the usual read-only method set
    pub fn path(pattern: &str, origin: &str) -> Self {
        Self {
            path_pattern: Some(pattern.to_string()),
            origin: origin.to_string(),
            allowed_methods: AllowedMethods::default(),
            forward_query_string: true,
            is_default: false,
        }
    }

    /// The catch-all rule
    pub fn default_to(origin: &str) -> Self {
        Self {
            path_pattern: None,
            origin: origin.to_string(),
            allowed_methods: AllowedMethods::default(),
            forward_query_string: true,
            is_default: true,
        }
    }
}

/// One compiled cache behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Behavior {
    /// `None` for the default behavior
    pub path_pattern: Option<String>,
    pub origin: String,
    pub allowed_methods: Vec<&'static str>,
    pub forward_query_string: bool,
}

/// Ordered behaviors: path rules in author order, default last
#[derive(Debug, Clone)]
pub struct RoutingTable {
    behaviors: Vec<Behavior>,
    /// One matcher per path behavior, same order
    matchers: Vec<GlobMatcher>,
}

impl PartialEq for RoutingTable {
    fn eq(&self, other: &Self) -> bool {
        self.behaviors == other.behaviors
    }
}

impl Eq for RoutingTable {}

impl RoutingTable {
    pub fn behaviors(&self) -> &[Behavior] {
        &self.behaviors
    }

    pub fn default_behavior(&self) -> &Behavior {
        // compile() guarantees exactly one default, placed last
        &self.behaviors[self.behaviors.len() - 1]
    }

    /// Origin serving `path`, evaluated first-match-wins
    pub fn route(&self, path: &str) -> &str {
        self.matchers
            .iter()
            .position(|m| m.is_match(path))
            .map_or(self.default_behavior(), |i| &self.behaviors[i])
            .origin
            .as_str()
    }

    /// JSON form stored in the distribution's `behaviors` attribute
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.behaviors
                .iter()
                .map(|b| {
                    json!({
                        "path_pattern": b.path_pattern,
                        "origin": b.origin,
                        "allowed_methods": b.allowed_methods,
                        "forward_query_string": b.forward_query_string,
                    })
                })
                .collect(),
        )
    }
}

/// Validate rules against origins and produce the behavior list.
///
/// Precondition: overlapping non-default patterns are already ordered from
/// most to least specific. They are never re-sorted.
pub fn compile(
    distribution: &str,
    origins: &[OriginSpec],
    rules: &[RoutingRule],
) -> Result<RoutingTable> {
    let routing_error = |message: String| Error::RoutingConfig {
        distribution: distribution.to_string(),
        message,
    };

    let mut origin_ids = HashSet::new();
    for origin in origins {
        if !origin_ids.insert(origin.id.as_str()) {
            return Err(routing_error(format!("origin id '{}' declared twice", origin.id)));
        }
    }

    let defaults = rules.iter().filter(|r| r.is_default).count();
    if defaults != 1 {
        return Err(routing_error(format!(
            "expected exactly one default rule, found {defaults}"
        )));
    }

    let mut patterns = HashSet::new();
    let mut behaviors = Vec::with_capacity(rules.len());
    let mut matchers = Vec::with_capacity(rules.len());
    let mut default = None;

    for rule in rules {
        if !origin_ids.contains(rule.origin.as_str()) {
            return Err(Error::UnknownOrigin {
                distribution: distribution.to_string(),
                origin: rule.origin.clone(),
            });
        }

        let behavior = Behavior {
            path_pattern: rule.path_pattern.clone(),
            origin: rule.origin.clone(),
            allowed_methods: rule.allowed_methods.methods().to_vec(),
            forward_query_string: rule.forward_query_string,
        };

        if rule.is_default {
            if rule.path_pattern.is_some() {
                return Err(routing_error(
                    "the default rule must not carry a path pattern".to_string(),
                ));
            }
            default = Some(behavior);
            continue;
        }

        let Some(pattern) = rule.path_pattern.as_deref() else {
            return Err(routing_error(format!(
                "non-default rule targeting '{}' has no path pattern",
                rule.origin
            )));
        };
        if !patterns.insert(pattern) {
            return Err(Error::DuplicatePattern {
                distribution: distribution.to_string(),
                pattern: pattern.to_string(),
            });
        }

        // CDN patterns let `*` run across `/`
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|e| routing_error(format!("invalid path pattern '{pattern}': {e}")))?;
        matchers.push(glob.compile_matcher());
        behaviors.push(behavior);
    }

    behaviors.extend(default);
    Ok(RoutingTable {
        behaviors,
        matchers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins() -> Vec<OriginSpec> {
        vec![
            OriginSpec {
                id: "blog".into(),
                source: OriginSource::Custom {
                    domain_name: "blog.example.com".into(),
                },
            },
            OriginSpec {
                id: "site".into(),
                source: OriginSource::Bucket {
                    bucket: "site_bucket.regional_domain_name".parse().unwrap(),
                    access_identity: Some("oai.id".parse().unwrap()),
                },
            },
        ]
    }

    #[test]
    fn test_default_rule_goes_last() {
        let rules = vec![
            RoutingRule::default_to("site"),
            RoutingRule::path("/blog*", "blog"),
        ];
        let table = compile("cdn", &origins(), &rules).unwrap();
        let patterns: Vec<_> = table
            .behaviors()
            .iter()
            .map(|b| b.path_pattern.as_deref())
            .collect();
        assert_eq!(patterns, vec![Some("/blog*"), None]);
        assert_eq!(table.default_behavior().origin, "site");
    }

    #[test]
    fn test_path_rules_keep_author_order() {
        let rules = vec![
            RoutingRule::path("/blog/*", "site"),
            RoutingRule::path("/blog*", "blog"),
            RoutingRule::default_to("site"),
        ];
        let table = compile("cdn", &origins(), &rules).unwrap();
        assert_eq!(table.behaviors()[0].path_pattern.as_deref(), Some("/blog/*"));
        assert_eq!(table.route("/blog/post-1"), "site");
        assert_eq!(table.route("/blogroll"), "blog");
        assert_eq!(table.route("/index.html"), "site");
    }

    #[test]
    fn test_rejects_missing_default() {
        let rules = vec![RoutingRule::path("/blog*", "blog")];
        let err = compile("cdn", &origins(), &rules).unwrap_err();
        assert!(matches!(err, Error::RoutingConfig { .. }), "{err}");
    }

    #[test]
    fn test_rejects_two_defaults() {
        let rules = vec![
            RoutingRule::default_to("site"),
            RoutingRule::default_to("blog"),
        ];
        let err = compile("cdn", &origins(), &rules).unwrap_err();
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_rejects_duplicate_pattern() {
        let rules = vec![
            RoutingRule::path("/blog*", "blog"),
            RoutingRule::path("/blog*", "site"),
            RoutingRule::default_to("site"),
        ];
        let err = compile("cdn", &origins(), &rules).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicatePattern {
                distribution: "cdn".into(),
                pattern: "/blog*".into()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_origin() {
        let rules = vec![
            RoutingRule::path("/shop*", "shop"),
            RoutingRule::default_to("site"),
        ];
        let err = compile("cdn", &origins(), &rules).unwrap_err();
        assert!(matches!(err, Error::UnknownOrigin { ref origin, .. } if origin == "shop"));
    }

    #[test]
    fn test_rejects_pattern_on_default() {
        let mut default = RoutingRule::default_to("site");
        default.path_pattern = Some("/*".into());
        let err = compile("cdn", &origins(), &[default]).unwrap_err();
        assert!(err.is_routing());
    }

    fn single_rule(pattern: &str) -> RoutingTable {
        let rules = vec![
            RoutingRule::path(pattern, "blog"),
            RoutingRule::default_to("site"),
        ];
        compile("cdn", &origins(), &rules).unwrap()
    }

    #[test]
    fn test_path_patterns_cross_separators() {
        let table = single_rule("/blog*");
        assert_eq!(table.route("/blog"), "blog");
        assert_eq!(table.route("/blog/2020/post"), "blog");
        assert_eq!(table.route("/about"), "site");

        let table = single_rule("/img/*.png");
        assert_eq!(table.route("/img/logo.png"), "blog");
        assert_eq!(table.route("/img/icons/logo.png"), "blog");
        assert_eq!(table.route("/img/logo.jpg"), "site");

        assert_eq!(single_rule("/v?/api").route("/v2/api"), "blog");
    }

    #[test]
    fn test_rejects_malformed_pattern() {
        let rules = vec![
            RoutingRule::path("/blog[", "blog"),
            RoutingRule::default_to("site"),
        ];
        let err = compile("cdn", &origins(), &rules).unwrap_err();
        assert!(
            matches!(err, Error::RoutingConfig { ref message, .. } if message.contains("/blog[")),
            "{err}"
        );
    }

    #[test]
    fn test_value_form() {
        let rules = vec![
            RoutingRule::path("/blog*", "blog"),
            RoutingRule::default_to("site"),
        ];
        let value = compile("cdn", &origins(), &rules).unwrap().to_value();
        assert_eq!(value[0]["path_pattern"], "/blog*");
        assert_eq!(value[1]["path_pattern"], Value::Null);
        assert_eq!(value[1]["allowed_methods"][2], "OPTIONS");
    }
}
