//! Configuration view and validation commands: `forge-context config`.

use anyhow::Result;
use forge_context::config::{CONFIG_FILE, ContextConfig, ContextToml};

use super::super::ConfigCommands;

fn print_toml(toml: &ContextToml) {
    println!("[project]");
    if let Some(cmd) = &toml.project.claude_cmd {
        println!("  claude_cmd = \"{}\"", cmd);
    }
    println!("  artifacts_dir = \"{}\"", toml.project.artifacts_dir);
    println!("  artifacts = {:?}", toml.project.artifacts);
    println!();

    println!("[budget]");
    println!("  max_tokens = {}", toml.budget.max_tokens);
    println!("  warning = {}", toml.budget.warning);
    println!("  critical = {}", toml.budget.critical);
    println!("  emergency = {}", toml.budget.emergency);
    println!();

    println!("[cache]");
    println!("  capacity = {}", toml.cache.capacity);
    println!("  ttl_secs = {}", toml.cache.ttl_secs);
    println!();

    println!("[measurement]");
    println!("  precise = {}", toml.measurement.precise);
    println!("  model = \"{}\"", toml.measurement.model);
    println!("  timeout_ms = {}", toml.measurement.timeout_ms);
    println!();

    println!("[compaction]");
    println!("  min_duplicate_run = {}", toml.compaction.min_duplicate_run);
    println!(
        "  max_duplicate_block_lines = {}",
        toml.compaction.max_duplicate_block_lines
    );
    println!("  verbose_block_lines = {}", toml.compaction.verbose_block_lines);
    println!(
        "  transient_markers = {} pattern(s)",
        toml.compaction.transient_markers.len()
    );
    println!(
        "  preserve_patterns = {} pattern(s)",
        toml.compaction.preserve_patterns.len()
    );
    println!(
        "  stale_markers = {} pattern(s)",
        toml.compaction.stale_markers.len()
    );
    println!();

    println!("[snapshots]");
    println!("  keep = {}", toml.snapshots.keep);
    println!(
        "  rollback_window_hours = {}",
        toml.snapshots.rollback_window_hours
    );
    println!();

    println!("[summary]");
    println!("  target_tokens = {}", toml.summary.target_tokens);
    println!("  timeout_secs = {}", toml.summary.timeout_secs);
    println!("  use_generator = {}", toml.summary.use_generator);
    println!();
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let forge_dir = project_dir.join(".forge");
    let config_path = forge_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Context Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_toml(&ContextToml::load(&config_path)?);
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!();
                println!("Using default configuration:");
                println!();
                print_toml(&ContextToml::default());
                println!("Run 'forge-context config init' to create a {} file.", CONFIG_FILE);
                println!();
            }

            println!("Effective values (with env overrides):");
            let config = ContextConfig::new(project_dir.to_path_buf())?;
            println!("  claude_cmd = \"{}\"", config.claude_cmd());
            println!("  artifact_root = {}", config.artifact_root().display());
            println!("  state_root = {}", config.state_root().display());
            println!(
                "  precise measurement = {}",
                config.toml.measurement.precise
                    && std::env::var("ANTHROPIC_API_KEY").is_ok_and(|k| !k.trim().is_empty())
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = ContextToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ContextToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] claude_cmd, artifacts_dir, artifacts");
            println!("  - [budget] max_tokens and the warning/critical/emergency thresholds");
            println!("  - [compaction] marker and preserve patterns");
            println!("  - [snapshots] keep, rollback_window_hours");
            println!();
        }
    }

    Ok(())
}
