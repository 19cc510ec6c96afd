pub mod apply;
pub mod graph;
pub mod plan;
pub mod state;

use anyhow::Result;
use declarative::DesiredState;

use crate::Context;
use crate::config::{self, EdgeConfig};
use crate::state::StateStore;

/// Everything a command works from: the parsed config, the desired state
/// with content fingerprinted, and the state store
pub struct Project {
    pub config: EdgeConfig,
    pub desired: DesiredState,
    pub store: StateStore,
}

impl Project {
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = EdgeConfig::load(&ctx.config)?;
        let desired = config.desired_state(&config::base_dir(&ctx.config))?;
        let store = StateStore::open(ctx.state_dir.as_deref())?;
        Ok(Self {
            config,
            desired,
            store,
        })
    }
}
