use anyhow::Result;
use colored::Colorize;
use declarative::{
    ExecuteOptions, LogProgress, NoProgress, NodeState, ProgressCallback, ProvisioningOutcome,
    ReconcileContext, Removal, RunReport, RunStatus, execute, plan,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use super::Project;
use super::plan::display_plan;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::ui;

/// Plan, confirm and provision. Returns the process exit code.
pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<i32> {
    ui::header("Applying Edge Stack");

    let project = Project::load(ctx)?;
    let opts = project.config.engine.execute_options(args.jobs);

    let preview = {
        let provider = Arc::new(project.store.load_provider()?);
        let rctx = ReconcileContext::new(provider)
            .with_previous_state(project.store.load_snapshot()?);
        plan(&project.desired, &rctx, &opts)?
    };

    if !ctx.quiet {
        display_plan(&preview, opts.prune, ctx.verbose > 0);
    }

    let prunes = opts.prune && !preview.orphans.is_empty();
    if !preview.has_changes() && !prunes {
        return Ok(0);
    }

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(0);
    }

    let bar = if ctx.quiet || ctx.verbose > 0 {
        BarProgress {
            bar: ProgressBar::hidden(),
        }
    } else {
        progress_bar(project.desired.resources.len() as u64)
    };
    let progress: &dyn ProgressCallback = if ctx.quiet {
        &NoProgress
    } else if ctx.verbose > 0 {
        &LogProgress
    } else {
        &bar
    };

    let report = provision(&project, &opts, progress)?;
    bar.bar.finish_and_clear();

    display_report(&report);
    Ok(report.exit_code())
}

/// Run the engine against the local control plane and persist what it left
/// behind, whatever the outcome.
pub fn provision(
    project: &Project,
    opts: &ExecuteOptions,
    progress: &dyn ProgressCallback,
) -> Result<RunReport> {
    let provider = Arc::new(project.store.load_provider()?);
    let previous = project.store.load_snapshot()?;

    let rctx = ReconcileContext::new(provider.clone())
        .with_previous_state(previous)
        .with_progress(progress);
    let report = execute(&project.desired, &rctx, opts)?;

    project.store.save_provider(&provider)?;
    project.store.save_snapshot(&report.state)?;
    Ok(report)
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

// ============================================================================
// Progress
// ============================================================================

/// Progress bar advanced as nodes finish
struct BarProgress {
    bar: ProgressBar,
}

fn progress_bar(len: u64) -> BarProgress {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    BarProgress { bar }
}

impl ProgressCallback for BarProgress {
    fn on_layer_start(&self, index: usize, nodes: &[&str]) {
        log::debug!("Layer {}: {}", index + 1, nodes.join(", "));
    }

    fn on_node_state(&self, node: &str, state: NodeState) {
        if state == NodeState::Executing {
            self.bar.set_message(node.to_string());
        }
    }

    fn on_node_complete(&self, node: &str, outcome: &ProvisioningOutcome) {
        self.bar
            .set_message(format!("{} {node}", ui::outcome_symbol(outcome)));
        self.bar.inc(1);
    }
}

// ============================================================================
// Report
// ============================================================================

fn outcome_detail(outcome: &ProvisioningOutcome) -> String {
    match outcome {
        ProvisioningOutcome::Updated { changed } => format!("updated {}", changed.join(", ")),
        ProvisioningOutcome::Replaced { previous_id } => format!("replaced {previous_id}"),
        ProvisioningOutcome::Failed { reason } => reason.clone(),
        ProvisioningOutcome::Skipped { reason } => format!("skipped, {reason}"),
        other => other.label().to_string(),
    }
}

fn display_report(report: &RunReport) {
    ui::section("Results");
    for node in &report.nodes {
        let detail = outcome_detail(&node.outcome);
        let detail = match node.outcome {
            ProvisioningOutcome::Failed { .. } => detail.red(),
            _ => detail.dimmed(),
        };
        println!(
            "  {} {:<20} {:<14} {}",
            ui::outcome_symbol(&node.outcome),
            node.name,
            node.id.as_deref().unwrap_or("-"),
            detail
        );
    }

    if !report.deleted.is_empty() {
        ui::section("Deleted");
        for deleted in &report.deleted {
            let why = match deleted.removal {
                Removal::Replaced => "superseded",
                Removal::Orphaned => "no longer declared",
            };
            println!(
                "  {} {:<20} {:<14} {}",
                "-".red(),
                deleted.name,
                deleted.id,
                why.dimmed()
            );
        }
    }

    if !report.retained.is_empty() {
        ui::section("Kept");
        for retained in &report.retained {
            println!(
                "  {} {:<20} {:<14} {}",
                "⚠".yellow(),
                retained.name,
                retained.id,
                retained.reason.dimmed()
            );
        }
    }

    print_summary(report);
}

/// Print final summary
fn print_summary(report: &RunReport) {
    let summary = report.summary();
    println!();
    match report.status {
        RunStatus::Succeeded => println!("  {} Edge stack converged", "✓".green().bold()),
        RunStatus::Failed => println!("  {} Edge stack applied with errors", "⚠".yellow().bold()),
        RunStatus::Cancelled => println!("  {} Run cancelled", "⊘".yellow().bold()),
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
}

// ============================================================================
// Tests
// ============================================================================
