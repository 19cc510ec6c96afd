use anyhow::{Context, Result};
use declarative::provider::Inventory;
use declarative::{MemoryProvider, StateSnapshot};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::expand_path;

const SNAPSHOT_FILE: &str = "state.toml";
const PROVIDER_FILE: &str = "provider.json";

// ============================================================================
// State Directory
// ============================================================================

/// Files edgestack keeps between runs
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Default state directory (~/.local/state/edgestack)
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".local").join("state").join("edgestack"))
    }

    /// Store rooted at `dir`, or at the default directory
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => expand_path(dir),
            None => Self::default_dir()?,
        };
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Load the recorded snapshot, or an empty one if nothing was recorded
    pub fn load_snapshot(&self) -> Result<StateSnapshot> {
        let path = self.dir.join(SNAPSHOT_FILE);

        if !path.exists() {
            log::debug!("State file does not exist, starting from empty state");
            return Ok(StateSnapshot::new());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        let snapshot: StateSnapshot = toml::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;

        log::debug!("Loaded state from {}", path.display());
        Ok(snapshot)
    }

    pub fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.ensure_dir()?;

        let path = self.dir.join(SNAPSHOT_FILE);
        let content =
            toml::to_string_pretty(snapshot).context("Failed to serialize state to TOML")?;

        fs::write(&path, &content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }

    // ========================================================================
    // Local Control Plane
    // ========================================================================

    /// Load the simulated control plane persisted by earlier runs
    pub fn load_provider(&self) -> Result<MemoryProvider> {
        let path = self.dir.join(PROVIDER_FILE);

        if !path.exists() {
            log::debug!("No local control plane yet, starting empty");
            return Ok(MemoryProvider::new());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let inventory: Inventory = serde_json::from_str(&content)
            .with_context(|| format!("Invalid control plane file: {}", path.display()))?;

        log::debug!(
            "Loaded {} resources from {}",
            inventory.resources.len(),
            path.display()
        );
        Ok(MemoryProvider::from_inventory(inventory))
    }

    pub fn save_provider(&self, provider: &MemoryProvider) -> Result<()> {
        self.ensure_dir()?;

        let path = self.dir.join(PROVIDER_FILE);
        let content = serde_json::to_string_pretty(&provider.inventory())
            .context("Failed to serialize control plane")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::debug!("Saved control plane to {}", path.display());
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create state directory: {}", self.dir.display())
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
