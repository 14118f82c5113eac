//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                 |
//! |------------|----------------------------------|
//! | `status`   | `Status`, `History`              |
//! | `compact`  | `Compact`, `Revert`              |
//! | `snapshot` | `Snapshot`                       |
//! | `handoff`  | `Summarize`, `Handoff`           |
//! | `config`   | `Config`                         |

pub mod compact;
pub mod config;
pub mod handoff;
pub mod snapshot;
pub mod status;

pub use compact::{cmd_compact, cmd_revert};
pub use config::cmd_config;
pub use handoff::{cmd_handoff, cmd_summarize};
pub use snapshot::cmd_snapshot;
pub use status::{cmd_history, cmd_status};

use anyhow::{Context, Result};
use forge_context::compaction::{
    AnthropicTokenCounter, CompactionEngine, Level, PreciseCounter, TokenCounter,
};
use forge_context::config::ContextConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn load_config(project_dir: &Path) -> Result<ContextConfig> {
    ContextConfig::new(project_dir.to_path_buf())
}

/// Token counter for the project, using the count_tokens service when
/// `ANTHROPIC_API_KEY` is set and `[measurement].precise` allows it.
pub(crate) fn token_counter(config: &ContextConfig) -> TokenCounter {
    let measurement = &config.toml.measurement;
    let precise = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if measurement.precise && !key.trim().is_empty() => {
            debug!(model = %measurement.model, "precise token counting enabled");
            Some(Arc::new(AnthropicTokenCounter::new(key, measurement.model.clone()))
                as Arc<dyn PreciseCounter>)
        }
        _ => None,
    };
    TokenCounter::new(config.toml.counter_config(), precise)
}

pub(crate) fn build_engine(config: &ContextConfig) -> Result<CompactionEngine> {
    let budget = config.toml.budget().context("Invalid [budget] in context.toml")?;
    let rules = config.toml.rule_set()?;
    Ok(
        CompactionEngine::new(config.store(), token_counter(config), rules, budget)
            .with_rollback_window(config.toml.rollback_window()),
    )
}

/// Thousands-separated token count for display.
pub(crate) fn fmt_tokens(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

pub(crate) fn level_style(level: Level) -> console::StyledObject<String> {
    let text = level.to_string();
    match level {
        Level::Nominal => console::style(text).green(),
        Level::Compactable => console::style(text).yellow(),
        Level::Summarizable => console::style(text).magenta(),
        Level::HandoffRequired => console::style(text).red().bold(),
    }
}
