use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use declarative::{ResourceKind, StateRecord, StateSnapshot};

use crate::Context;
use crate::state::StateStore;
use crate::ui;

/// Print what previous runs recorded
pub fn show(ctx: &Context) -> Result<()> {
    let store = StateStore::open(ctx.state_dir.as_deref())?;
    let snapshot = store.load_snapshot()?;

    ui::header("Recorded State");
    ui::kv("Directory", &store.dir().display().to_string());

    if snapshot.is_empty() {
        println!();
        ui::info("Nothing recorded yet. Run `edgestack apply` first.");
        return Ok(());
    }

    let now = Utc::now();
    for (name, record) in ordered(&snapshot) {
        ui::section(name);
        ui::kv("Kind", record.kind.as_str());
        ui::kv("Id", &record.id);
        ui::kv("Key", &record.lookup_key);
        if !record.depends_on.is_empty() {
            ui::kv("Depends on", &record.depends_on.join(", "));
        }
        ui::kv(
            "Updated",
            &format!(
                "{} ({})",
                record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                ui::format_age(record.updated_at, now)
            ),
        );

        if ctx.verbose > 0 {
            for (output, value) in &record.outputs {
                ui::dim(&format!("{output} = {}", ui::truncate(&value.to_string(), 60)));
            }
        }
    }

    let inventory = store.load_provider()?.inventory();
    println!();
    ui::dim(&format!(
        "{} recorded, {} resources in the local control plane",
        snapshot.len(),
        inventory.resources.len()
    ));
    Ok(())
}

/// Register an existing hosted zone with the local control plane
pub fn register_zone(ctx: &Context, domain: &str) -> Result<()> {
    let store = StateStore::open(ctx.state_dir.as_deref())?;
    let provider = store.load_provider()?;

    if provider.inventory().resources.values().any(|r| {
        r.kind == ResourceKind::ZoneReference && r.key.eq_ignore_ascii_case(domain)
    }) {
        ui::warn(&format!("Zone {} is already registered", domain.bold()));
        return Ok(());
    }

    let id = provider.seed_zone(domain);
    store.save_provider(&provider)?;
    ui::success(&format!("Registered zone {} ({id})", domain.bold()));
    Ok(())
}

/// Records in the order they were provisioned
fn ordered(snapshot: &StateSnapshot) -> Vec<(&str, &StateRecord)> {
    let mut records: Vec<_> = snapshot
        .resources
        .iter()
        .map(|(name, record)| (name.as_str(), record))
        .collect();
    records.sort_by(|a, b| a.1.position.cmp(&b.1.position).then(a.0.cmp(b.0)));
    records
}
