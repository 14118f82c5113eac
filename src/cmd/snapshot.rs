//! Snapshot management: `forge-context snapshot`.

use anyhow::Result;
use console::style;
use forge_context::compaction::SnapshotStore;
use std::path::Path;

use super::super::SnapshotCommands;
use super::load_config;

pub fn cmd_snapshot(project_dir: &Path, command: SnapshotCommands) -> Result<()> {
    let config = load_config(project_dir)?;
    let snapshots = SnapshotStore::new(config.store());

    match command {
        SnapshotCommands::Create { scope, trigger } => {
            let snapshot = snapshots.create(&scope, &trigger)?;
            println!("Created snapshot {}", style(&snapshot.id).cyan());
            if snapshot.captured_artifacts.is_empty() {
                println!("  (no artifacts present)");
            } else {
                println!("  Captured: {}", snapshot.captured_artifacts.join(", "));
            }
        }
        SnapshotCommands::List { scope } => {
            let list = snapshots.list(&scope)?;
            if list.is_empty() {
                println!("No snapshots for {}.", scope);
                return Ok(());
            }
            println!();
            println!("{}", style(format!("Snapshots - {}", scope)).bold().cyan());
            println!();
            for snapshot in &list {
                println!(
                    "  {:>3}  {}  {:<18} {}",
                    snapshot.sequence,
                    snapshot.id,
                    snapshot.trigger,
                    style(snapshot.captured_artifacts.join(", ")).dim()
                );
            }
            println!();
        }
        SnapshotCommands::Restore { scope, snapshot_id } => {
            if !snapshots.restore(&scope, &snapshot_id)? {
                anyhow::bail!("Unknown snapshot '{}' for {}", snapshot_id, scope);
            }
            println!(
                "{} {} from {}",
                style("Restored").green().bold(),
                scope,
                snapshot_id
            );
        }
        SnapshotCommands::Prune { scope, keep } => {
            let keep = keep.unwrap_or(config.toml.snapshots.keep);
            let removed = snapshots.prune(&scope, keep)?;
            println!("Pruned {} snapshot(s), kept the {} most recent.", removed, keep);
        }
    }

    Ok(())
}
