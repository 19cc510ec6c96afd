use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "edgestack")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision a path-routed CDN edge from one declarative file", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Desired-state file
    #[arg(
        short,
        long,
        global = true,
        env = "EDGESTACK_CONFIG",
        default_value = "edgestack.toml"
    )]
    pub config: PathBuf,

    /// Directory holding recorded state and the local control plane
    #[arg(long, global = true, env = "EDGESTACK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the dependency graph as execution layers
    Graph,

    /// Preview the changes an apply would make
    Plan,

    /// Provision the edge stack
    Apply(ApplyArgs),

    /// Show what previous runs recorded
    State,

    /// Register an existing hosted zone with the local control plane
    Zone {
        /// Domain name of the zone, e.g. example.com
        domain: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Parallel provisioning jobs (overrides the config file)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}
