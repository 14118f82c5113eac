//! Context Budget & Compaction Engine
//!
//! Keeps a long-running session's working documents inside a fixed token budget.
//!
//! ## Levels
//!
//! Usage is classified against three ascending thresholds of the budget:
//!
//! | Level | Usage | Action |
//! |-------|-------|--------|
//! | `nominal` | below warning | none |
//! | `compactable` | warning..critical | [`CompactionEngine::compact`] (reversible) |
//! | `summarizable` | critical..emergency | [`Summarizer::summarize`] (lossy) |
//! | `handoff-required` | emergency and above | [`HandoffBuilder::build`] |
//!
//! ## Recoverability
//!
//! Compaction snapshots the artifact set before writing anything and records a history
//! entry pointing at that snapshot. Within the rollback window the entry can be reverted,
//! which itself snapshots the current state first. Summaries make no such promise.
//!
//! ## Configuration
//!
//! Budget, cache, rules and windows come from `.forge/context.toml`:
//!
//! ```toml
//! [budget]
//! max_tokens = 80000
//! warning = 0.70
//! critical = 0.85
//! emergency = 0.95
//!
//! [snapshots]
//! rollback_window_hours = 24
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use forge_context::compaction::{CompactionEngine, RuleSet, TokenCounter, classify};
//!
//! let mut engine = CompactionEngine::new(store, TokenCounter::offline(), RuleSet::default(), budget);
//! let usage = engine.measure_session("001-auth").await?;
//! if usage.classification.level == Level::Compactable {
//!     let outcome = engine.compact("001-auth", false).await?;
//!     // ...later, if the result is unwanted:
//!     engine.revert("001-auth", &outcome.history_id)?;
//! }
//! ```

mod budget;
mod engine;
mod generator;
mod handoff;
mod history;
mod measure;
mod passes;
mod rules;
mod snapshot;
mod summary;
mod tokens;

pub use budget::{Budget, Classification, Level, Thresholds, classify};
pub use engine::{
    ArtifactUsage, CompactionEngine, CompactionOutcome, ReducedItem, RevertStatus, SessionUsage,
};
pub use generator::{ClaudeCliGenerator, TextGenerator};
pub use handoff::{HandoffBuilder, HandoffDocument, HandoffUsage, SessionProgress};
pub use history::{CompactionHistory, HistoryEntry};
pub use measure::{AnthropicTokenCounter, PreciseCounter};
pub use passes::{PassOutput, Reduction, ReductionKind, run_passes};
pub use rules::{
    ContentRule, DEFAULT_PRESERVE_PATTERNS, DEFAULT_STALE_MARKERS, DEFAULT_TRANSIENT_MARKERS,
    RuleAction, RuleSet,
};
pub use snapshot::{
    Snapshot, SnapshotStore, TRIGGER_CONTEXT_OVERFLOW, TRIGGER_MANUAL, TRIGGER_PRE_COMPACTION,
    TRIGGER_PRE_RESTORE,
};
pub use summary::{
    APPROXIMATION_BANNER, DEFAULT_TARGET_TOKENS, SummaryResult, Summarizer, extract_decisions,
    extract_touched_files,
};
pub use tokens::{
    CounterConfig, ESTIMATE_ADJUSTMENT, ESTIMATE_PRECISION, MeasurementSource, TokenCounter,
    TokenMeasurement, content_hash, estimate_tokens, raw_token_count,
};

/// Default session budget in tokens.
pub const DEFAULT_MAX_TOKENS: usize = 80_000;

/// How long after a compaction `revert` is still allowed.
pub const DEFAULT_ROLLBACK_WINDOW_HOURS: i64 = 24;

/// Snapshots kept per session by `snapshot prune` when no count is given.
pub const DEFAULT_SNAPSHOT_KEEP: usize = 10;
