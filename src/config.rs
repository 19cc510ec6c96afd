use anyhow::{Context, Result, bail};
use declarative::{DesiredState, ExecuteOptions, ResourceNode, ResourceSpec, RetryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content;

// ============================================================================
// Config File
// ============================================================================

/// Contents of `edgestack.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub resources: Vec<ResourceNode>,
}

/// `[engine]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel provisioning jobs
    pub jobs: usize,

    /// Retries after the first attempt of a provider call
    pub retries: u32,

    /// First retry delay, doubled on every further retry
    pub base_delay_ms: u64,

    /// Deadline for a single provider call
    pub timeout_secs: u64,

    /// How long a retried create waits for a timed-out earlier create
    pub settle_secs: u64,

    /// Delete recorded resources that are no longer declared
    pub prune: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            retries: 4,
            base_delay_ms: 500,
            timeout_secs: 60,
            settle_secs: 300,
            prune: false,
        }
    }
}

impl EngineConfig {
    /// Engine options, with `jobs` overridden from the command line
    pub fn execute_options(&self, jobs: Option<usize>) -> ExecuteOptions {
        ExecuteOptions {
            jobs: jobs.unwrap_or(self.jobs).max(1),
            retry: RetryConfig::new(
                self.retries.saturating_add(1),
                Duration::from_millis(self.base_delay_ms),
                2.0,
            ),
            call_timeout: Duration::from_secs(self.timeout_secs.max(1)),
            settle_timeout: Duration::from_secs(self.settle_secs),
            prune: self.prune,
        }
    }
}

impl EdgeConfig {
    /// Load and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_path(path);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format: {}", path.display()))?;

        log::debug!(
            "Loaded {} resources from {}",
            config.resources.len(),
            path.display()
        );
        Ok(config)
    }

    /// Desired state with every content deployment fingerprinted.
    ///
    /// Relative `source` directories are resolved against `base_dir`, the
    /// directory the config file lives in.
    pub fn desired_state(&self, base_dir: &Path) -> Result<DesiredState> {
        let mut resources = self.resources.clone();
        for node in &mut resources {
            if let ResourceSpec::ContentDeployment(spec) = &mut node.spec {
                let dir = resolve_source(base_dir, &spec.source);
                if !dir.is_dir() {
                    bail!(
                        "Content source of '{}' is not a directory: {}",
                        node.name,
                        dir.display()
                    );
                }
                let fingerprint = content::fingerprint(&dir)
                    .with_context(|| format!("Failed to fingerprint {}", dir.display()))?;
                log::debug!("{}: fingerprint {fingerprint}", node.name);
                spec.fingerprint = Some(fingerprint);
            }
        }
        Ok(DesiredState::new(resources))
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Expand `~` in a path
pub fn expand_path(path: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    PathBuf::from(expanded)
}

/// Directory relative paths in `config` are resolved against
pub fn base_dir(config: &Path) -> PathBuf {
    match expand_path(config).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn resolve_source(base_dir: &Path, source: &str) -> PathBuf {
    let source = expand_path(Path::new(source));
    if source.is_absolute() {
        source
    } else {
        base_dir.join(source)
    }
}

// ============================================================================
// Tests
// ============================================================================
