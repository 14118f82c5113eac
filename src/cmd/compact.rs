//! Compaction and reversal: `forge-context compact|revert`.

use anyhow::Result;
use console::style;
use forge_context::compaction::RevertStatus;
use std::path::Path;

use super::{build_engine, fmt_tokens, level_style, load_config};

pub async fn cmd_compact(project_dir: &Path, scope: &str, dry_run: bool) -> Result<()> {
    let config = load_config(project_dir)?;
    let mut engine = build_engine(&config)?;
    let outcome = engine.compact(scope, dry_run).await?;

    println!();
    let title = if dry_run {
        format!("Context Compaction (dry run) - {}", scope)
    } else {
        format!("Context Compaction - {}", scope)
    };
    println!("{}", style(title).bold().cyan());
    println!("================================");
    println!();

    if outcome.tokens_before == 0 && outcome.items_reduced.is_empty() {
        println!("No artifacts found; nothing to compact.");
        println!();
        return Ok(());
    }

    println!("  Level before: {}", level_style(outcome.level));
    println!(
        "  Tokens:       {} -> {}",
        fmt_tokens(outcome.tokens_before),
        fmt_tokens(outcome.tokens_after)
    );
    let saved = outcome.tokens_saved();
    if outcome.tokens_before > 0 {
        println!(
            "  Saved:        {} tokens ({:.1}%)",
            fmt_tokens(saved),
            saved as f64 / outcome.tokens_before as f64 * 100.0
        );
    }
    println!();

    if outcome.items_reduced.is_empty() {
        println!("Nothing to reduce.");
    } else {
        println!("Reduced items:");
        for item in &outcome.items_reduced {
            println!(
                "  {:<22} {}:{:<5} {:>7} -> {:<7} {}",
                item.kind.to_string(),
                item.artifact,
                item.line,
                fmt_tokens(item.size_before),
                fmt_tokens(item.size_after),
                style(item.recovery_ref.as_deref().unwrap_or("-")).dim()
            );
        }
    }
    println!();

    if dry_run {
        println!("Dry run: no artifacts were changed.");
    } else {
        if let Some(snapshot) = &outcome.snapshot_id {
            println!("Snapshot:   {}", snapshot);
        }
        println!("History id: {}", outcome.history_id);
        println!();
        println!(
            "Undo within {}h with: forge-context revert {} {}",
            engine.rollback_window().num_hours(),
            scope,
            outcome.history_id
        );
    }
    println!();
    Ok(())
}

pub fn cmd_revert(project_dir: &Path, scope: &str, history_id: &str) -> Result<()> {
    let config = load_config(project_dir)?;
    let engine = build_engine(&config)?;
    let status = engine.revert_status(scope, history_id, chrono::Utc::now())?;

    match status {
        RevertStatus::Reverted => {
            println!(
                "{} compaction {} of {}",
                style("Reverted").green().bold(),
                history_id,
                scope
            );
            Ok(())
        }
        other => anyhow::bail!("Cannot revert {}: {}", history_id, other),
    }
}
