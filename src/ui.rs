use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use declarative::{PlannedAction, ProvisioningOutcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Symbols
// ============================================================================

/// Symbol for a planned action
pub fn action_symbol(action: &PlannedAction) -> ColoredString {
    match action {
        PlannedAction::Create => "+".green(),
        PlannedAction::Update { .. } => "~".yellow(),
        PlannedAction::Replace { .. } => "±".magenta(),
        PlannedAction::NoOp => "○".dimmed(),
        PlannedAction::Deferred { .. } => "…".cyan(),
        PlannedAction::Blocked { .. } => "✗".red(),
    }
}

/// Symbol for a node outcome
pub fn outcome_symbol(outcome: &ProvisioningOutcome) -> ColoredString {
    match outcome {
        ProvisioningOutcome::Created => "+".green(),
        ProvisioningOutcome::Updated { .. } => "~".yellow(),
        ProvisioningOutcome::Replaced { .. } => "±".magenta(),
        ProvisioningOutcome::Unchanged => "○".dimmed(),
        ProvisioningOutcome::Failed { .. } => "✗".red(),
        ProvisioningOutcome::Skipped { .. } => "⊘".yellow(),
    }
}

/// Truncate a string for display, keeping the start
pub fn truncate(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = value.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Age of a timestamp relative to `now`, e.g. "5m ago"
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds().max(0);
    match secs {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

// ============================================================================
// Tests
// ============================================================================
