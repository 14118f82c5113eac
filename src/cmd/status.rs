//! Session budget status and compaction history: `forge-context status|history`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::{build_engine, fmt_tokens, level_style, load_config};

pub async fn cmd_status(project_dir: &Path, scope: &str) -> Result<()> {
    let config = load_config(project_dir)?;
    let mut engine = build_engine(&config)?;
    let usage = engine.measure_session(scope).await?;
    let budget = *engine.budget();
    let class = &usage.classification;

    println!();
    println!("{}", style(format!("Context Budget - {}", scope)).bold().cyan());
    println!("================================");
    println!();

    if usage.artifacts.is_empty() {
        println!(
            "No artifacts found in {}",
            config.store().session_dir(scope)?.display()
        );
        println!();
    } else {
        println!("Artifacts:");
        for artifact in &usage.artifacts {
            println!(
                "  {:<16} {:>10} tokens  {}",
                artifact.name,
                fmt_tokens(artifact.tokens),
                style(format!("({})", artifact.source)).dim()
            );
        }
        println!();
    }

    let t = budget.thresholds();
    println!(
        "  Total:      {} / {} tokens ({:.1}%)",
        fmt_tokens(usage.tokens),
        fmt_tokens(budget.max_tokens()),
        class.usage_fraction * 100.0
    );
    println!(
        "  Thresholds: warning {:.0}%, critical {:.0}%, emergency {:.0}%",
        t.warning * 100.0,
        t.critical * 100.0,
        t.emergency * 100.0
    );
    println!("  Level:      {}", level_style(class.level));
    println!();
    println!("{}", class.recommendation);

    if !class.can_continue {
        println!();
        println!(
            "{} Run 'forge-context handoff {}' and continue in a fresh session.",
            style("Budget exhausted:").red().bold(),
            scope
        );
    }
    println!();
    Ok(())
}

pub fn cmd_history(project_dir: &Path, scope: &str) -> Result<()> {
    let config = load_config(project_dir)?;
    let engine = build_engine(&config)?;
    let entries = engine.history().list(scope)?;

    println!();
    println!("{}", style(format!("Compaction History - {}", scope)).bold().cyan());
    println!();

    if entries.is_empty() {
        println!("No compactions recorded.");
        println!();
        return Ok(());
    }

    let now = chrono::Utc::now();
    for entry in &entries {
        let state = if entry.reverted {
            style("reverted".to_string()).dim()
        } else if now - entry.produced_at > engine.rollback_window() {
            style("expired".to_string()).dim()
        } else {
            style("revertible".to_string()).green()
        };
        println!(
            "  {}  {}  {} -> {} tokens  {} items  {}",
            entry.produced_at.format("%Y-%m-%d %H:%M:%S"),
            entry.history_id,
            fmt_tokens(entry.tokens_before),
            fmt_tokens(entry.tokens_after),
            entry.items_reduced,
            state
        );
    }
    println!();
    Ok(())
}
