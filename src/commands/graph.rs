use anyhow::Result;
use colored::Colorize;
use declarative::{DependencyGraph, ResourceNode};

use crate::Context;
use crate::config::EdgeConfig;
use crate::ui;

/// Print the execution layers of the declared resources
pub fn run(ctx: &Context) -> Result<()> {
    let config = EdgeConfig::load(&ctx.config)?;
    let graph = DependencyGraph::build(&config.resources)?;

    ui::header("Dependency Graph");

    if graph.is_empty() {
        println!();
        ui::info("No resources declared");
        return Ok(());
    }

    for (index, layer) in graph.layers().iter().enumerate() {
        ui::section(&format!("Layer {}", index + 1));
        for name in layer {
            let Some(node) = config.resources.iter().find(|n| n.name == *name) else {
                continue;
            };
            println!("{}", describe(node, &graph.dependencies(name)));
        }
    }

    println!();
    ui::dim(&format!(
        "{} resources in {} layers",
        graph.len(),
        graph.layers().len()
    ));
    Ok(())
}

fn describe(node: &ResourceNode, deps: &[&str]) -> String {
    let mut line = format!(
        "  {} {:<20} {}",
        "•".cyan(),
        node.name,
        node.kind().as_str().dimmed()
    );
    if !deps.is_empty() {
        line.push_str(&format!("  {} {}", "←".dimmed(), deps.join(", ")));
    }
    line
}
