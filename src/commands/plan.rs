use anyhow::Result;
use colored::Colorize;
use declarative::{Plan, PlannedAction, ReconcileContext, plan};
use std::sync::Arc;

use super::Project;
use crate::Context;
use crate::ui;

/// Counts of planned actions
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub blocked: usize,
}

impl PlanCounts {
    pub fn of(plan: &Plan) -> Self {
        let mut counts = Self::default();
        for change in &plan.changes {
            match change.action {
                PlannedAction::Create => counts.create += 1,
                PlannedAction::Update { .. } => counts.update += 1,
                PlannedAction::Replace { .. } => counts.replace += 1,
                PlannedAction::NoOp => counts.unchanged += 1,
                PlannedAction::Deferred { .. } => counts.deferred += 1,
                PlannedAction::Blocked { .. } => counts.blocked += 1,
            }
        }
        counts
    }
}

/// Preview what `apply` would do
pub fn run(ctx: &Context) -> Result<()> {
    let project = Project::load(ctx)?;
    let provider = Arc::new(project.store.load_provider()?);
    let previous = project.store.load_snapshot()?;

    let rctx = ReconcileContext::new(provider).with_previous_state(previous);
    let opts = project.config.engine.execute_options(None);
    let plan = plan(&project.desired, &rctx, &opts)?;

    display_plan(&plan, project.config.engine.prune, ctx.verbose > 0);
    Ok(())
}

/// Short description of an action, shown next to the node name
pub fn describe_action(action: &PlannedAction) -> String {
    match action {
        PlannedAction::Create => "(will create)".to_string(),
        PlannedAction::Update { changes } => {
            let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
            format!("update {}", fields.join(", "))
        }
        PlannedAction::Replace { fields } => format!("replace: {} cannot change", fields.join(", ")),
        PlannedAction::NoOp => "up to date".to_string(),
        PlannedAction::Deferred { waiting_on } => format!("pending {waiting_on}"),
        PlannedAction::Blocked { reason } => reason.clone(),
    }
}

/// Display a plan in a box
pub fn display_plan(plan: &Plan, prune: bool, detailed: bool) {
    if !plan.has_changes() && plan.orphans.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Provisioning Plan".bold()
    );
    println!("│");

    for change in &plan.changes {
        if !detailed && matches!(change.action, PlannedAction::NoOp) {
            continue;
        }

        let description = describe_action(&change.action);
        let description = match change.action {
            PlannedAction::Blocked { .. } => description.red(),
            _ => description.dimmed(),
        };
        println!(
            "│   {} {:<20} {:<20} {}",
            ui::action_symbol(&change.action),
            change.name,
            change.kind.as_str(),
            description
        );

        if detailed && let PlannedAction::Update { changes } = &change.action {
            for c in changes {
                let from = c
                    .from
                    .as_ref()
                    .map_or_else(|| "(unset)".to_string(), ToString::to_string);
                println!(
                    "│       {}: {} → {}",
                    c.field,
                    ui::truncate(&from, 40).dimmed(),
                    ui::truncate(&c.to.to_string(), 40)
                );
            }
        }
    }

    if !plan.orphans.is_empty() {
        println!("│");
        println!("│ {}", "No longer declared".bold());
        for orphan in &plan.orphans {
            let note = if prune { "(will delete)" } else { "(kept, pruning off)" };
            println!("│   {} {:<20} {}", "-".red(), orphan, note.dimmed());
        }
    }

    let counts = PlanCounts::of(plan);
    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to create, {} to update, {} to replace, {} unchanged",
        counts.create.to_string().green(),
        counts.update.to_string().yellow(),
        counts.replace.to_string().magenta(),
        counts.unchanged
    );
    if counts.deferred > 0 {
        println!(
            "│          {} depend on pending changes",
            counts.deferred.to_string().cyan()
        );
    }
    if counts.blocked > 0 {
        println!(
            "│          {} cannot be provisioned",
            counts.blocked.to_string().red()
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}
