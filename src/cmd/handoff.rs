//! Lossy summaries and session handoff documents: `forge-context summarize|handoff`.

use anyhow::{Context, Result};
use console::style;
use forge_context::compaction::{
    ClaudeCliGenerator, HandoffBuilder, SessionProgress, Summarizer, TextGenerator,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{fmt_tokens, level_style, load_config, token_counter};

pub async fn cmd_summarize(project_dir: &Path, scope: &str, no_generate: bool) -> Result<()> {
    let config = load_config(project_dir)?;
    let settings = &config.toml.summary;
    let timeout = Duration::from_secs(settings.timeout_secs);

    let generator = if settings.use_generator && !no_generate {
        let generator = ClaudeCliGenerator::new(config.claude_cmd(), timeout)
            .with_working_dir(config.project_dir.clone());
        Some(Arc::new(generator) as Arc<dyn TextGenerator>)
    } else {
        None
    };

    let session = config.store().load(scope)?;
    let mut summarizer = Summarizer::new(token_counter(&config), generator)
        .with_target_tokens(settings.target_tokens)
        .with_timeout(timeout);
    let summary = summarizer.summarize(&session).await;

    if session.is_empty() {
        println!("No artifacts found for {}; nothing to summarize.", scope);
        return Ok(());
    }

    println!("{}", summary.text.trim_end());
    println!();
    println!(
        "{} {} -> {} tokens{}",
        style("Summary:").bold(),
        fmt_tokens(summary.tokens_before),
        fmt_tokens(summary.tokens_after),
        if summary.generated {
            String::new()
        } else {
            style(" (placeholder, generator unavailable)".to_string())
                .yellow()
                .to_string()
        }
    );
    println!(
        "  {} decision(s), {} file(s) preserved",
        summary.preserved_decisions.len(),
        summary.preserved_files.len()
    );
    Ok(())
}

pub async fn cmd_handoff(project_dir: &Path, scope: &str, tasks: Option<&Path>) -> Result<()> {
    let config = load_config(project_dir)?;
    let store = config.store();

    let tasks_path = match tasks {
        Some(path) => path.to_path_buf(),
        None => store.artifact_path(scope, "tasks.md")?,
    };
    let progress = if tasks_path.exists() {
        let text = std::fs::read_to_string(&tasks_path)
            .with_context(|| format!("Failed to read {}", tasks_path.display()))?;
        SessionProgress::from_tasks_markdown(&text)
    } else if tasks.is_some() {
        anyhow::bail!("Task file not found: {}", tasks_path.display());
    } else {
        SessionProgress::default()
    };

    let budget = config
        .toml
        .budget()
        .context("Invalid [budget] in context.toml")?;
    let mut builder = HandoffBuilder::new(store, token_counter(&config), budget);
    let doc = builder.build(scope, &progress).await?;
    let path = builder.write(&doc)?;

    println!();
    println!("{}", style(format!("Session Handoff - {}", scope)).bold().cyan());
    println!();
    println!(
        "  Usage:      {} / {} tokens ({:.1}%) {}",
        fmt_tokens(doc.usage.tokens),
        fmt_tokens(doc.usage.max_tokens),
        doc.usage.usage_fraction * 100.0,
        level_style(doc.usage.level)
    );
    if let Some(focus) = &doc.current_focus {
        println!("  Focus:      {}", focus);
    }
    println!(
        "  Progress:   {} done, {} in progress, {} next, {} open issue(s)",
        doc.completed_items.len(),
        doc.in_progress_items.len(),
        doc.next_items.len(),
        doc.open_issues.len()
    );
    println!("  Checkpoint: {}", doc.checkpoint_id);
    println!("  Written:    {}", path.display());
    println!();
    Ok(())
}
