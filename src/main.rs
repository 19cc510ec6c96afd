mod cli;
mod commands;
mod config;
mod content;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: PathBuf,
    pub state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_dir: cli.state_dir,
    };

    let code = match cli.command {
        Command::Graph => commands::graph::run(&ctx).map(|()| 0),
        Command::Plan => commands::plan::run(&ctx).map(|()| 0),
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::State => commands::state::show(&ctx).map(|()| 0),
        Command::Zone { domain } => commands::state::register_zone(&ctx, &domain).map(|()| 0),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "edgestack", &mut io::stdout());
            Ok(0)
        }
    };

    match code {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            ui::error(&format!("{e:#}"));
            std::process::exit(1);
        }
    }
}
