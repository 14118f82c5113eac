//! Configuration for forge-context.
//!
//! Settings are read from `.forge/context.toml`. Every field has a default, so a missing
//! file or a partial file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! claude_cmd = "claude"
//! artifacts_dir = "specs"
//! artifacts = ["spec.md", "plan.md", "tasks.md"]
//!
//! [budget]
//! max_tokens = 80000
//! warning = 0.70
//! critical = 0.85
//! emergency = 0.95
//!
//! [cache]
//! capacity = 1024
//! ttl_secs = 3600
//!
//! [measurement]
//! precise = true
//! model = "claude-sonnet-4-5"
//! timeout_ms = 3000
//!
//! [compaction]
//! min_duplicate_run = 3
//! max_duplicate_block_lines = 200
//! verbose_block_lines = 0
//! transient_markers = ['^\$ ']
//! preserve_patterns = ['^#+ Decision:.*$']
//! stale_markers = ['^#+ .*\[STALE\]']
//!
//! [snapshots]
//! keep = 10
//! rollback_window_hours = 24
//!
//! [summary]
//! target_tokens = 500
//! timeout_secs = 120
//! use_generator = true
//! ```

use crate::compaction::{
    Budget, CounterConfig, DEFAULT_MAX_TOKENS, DEFAULT_PRESERVE_PATTERNS,
    DEFAULT_ROLLBACK_WINDOW_HOURS, DEFAULT_SNAPSHOT_KEEP, DEFAULT_STALE_MARKERS,
    DEFAULT_TARGET_TOKENS, DEFAULT_TRANSIENT_MARKERS, RuleSet, Thresholds,
};
use crate::errors::BudgetError;
use crate::store::ArtifactStore;
use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "context.toml";

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Claude CLI command used for summaries (default: "claude")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_cmd: Option<String>,
    /// Directory holding one subdirectory per session, relative to the project
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    /// Artifact file names tracked in every session, in order
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<String>,
}

fn default_artifacts_dir() -> String {
    "specs".to_string()
}

fn default_artifacts() -> Vec<String> {
    [
        "spec.md",
        "plan.md",
        "tasks.md",
        "research.md",
        "data-model.md",
        "quickstart.md",
        "progress.md",
        "notes.md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            artifacts_dir: default_artifacts_dir(),
            artifacts: default_artifacts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_warning")]
    pub warning: f64,
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default = "default_emergency")]
    pub emergency: f64,
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

fn default_warning() -> f64 {
    Thresholds::default().warning
}

fn default_critical() -> f64 {
    Thresholds::default().critical
}

fn default_emergency() -> f64 {
    Thresholds::default().emergency
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            warning: default_warning(),
            critical: default_critical(),
            emergency: default_emergency(),
        }
    }
}

/// Token cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Precise measurement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementSection {
    /// Use the count_tokens service when an API key is available
    #[serde(default = "default_true")]
    pub precise: bool,
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on one precise measurement before falling back to the estimator
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for MeasurementSection {
    fn default() -> Self {
        Self {
            precise: true,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Rule tables and limits for the compaction passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionSection {
    #[serde(default = "default_min_duplicate_run")]
    pub min_duplicate_run: usize,
    #[serde(default = "default_max_duplicate_block_lines")]
    pub max_duplicate_block_lines: usize,
    /// Fenced blocks longer than this are trimmed (0 disables)
    #[serde(default)]
    pub verbose_block_lines: usize,
    #[serde(default = "default_transient_markers")]
    pub transient_markers: Vec<String>,
    #[serde(default = "default_preserve_patterns")]
    pub preserve_patterns: Vec<String>,
    #[serde(default = "default_stale_markers")]
    pub stale_markers: Vec<String>,
}

fn default_min_duplicate_run() -> usize {
    3
}

fn default_max_duplicate_block_lines() -> usize {
    200
}

fn to_strings(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

fn default_transient_markers() -> Vec<String> {
    to_strings(DEFAULT_TRANSIENT_MARKERS)
}

fn default_preserve_patterns() -> Vec<String> {
    to_strings(DEFAULT_PRESERVE_PATTERNS)
}

fn default_stale_markers() -> Vec<String> {
    to_strings(DEFAULT_STALE_MARKERS)
}

impl Default for CompactionSection {
    fn default() -> Self {
        Self {
            min_duplicate_run: default_min_duplicate_run(),
            max_duplicate_block_lines: default_max_duplicate_block_lines(),
            verbose_block_lines: 0,
            transient_markers: default_transient_markers(),
            preserve_patterns: default_preserve_patterns(),
            stale_markers: default_stale_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotsSection {
    /// Snapshots kept by `snapshot prune` when no count is given
    #[serde(default = "default_keep")]
    pub keep: usize,
    #[serde(default = "default_rollback_window_hours")]
    pub rollback_window_hours: i64,
}

fn default_keep() -> usize {
    DEFAULT_SNAPSHOT_KEEP
}

fn default_rollback_window_hours() -> i64 {
    DEFAULT_ROLLBACK_WINDOW_HOURS
}

impl Default for SnapshotsSection {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            rollback_window_hours: default_rollback_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarySection {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_summary_timeout_secs")]
    pub timeout_secs: u64,
    /// Ask the Claude CLI for summary text; when false only the placeholder is used
    #[serde(default = "default_true")]
    pub use_generator: bool,
}

fn default_target_tokens() -> usize {
    DEFAULT_TARGET_TOKENS
}

fn default_summary_timeout_secs() -> u64 {
    120
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            timeout_secs: default_summary_timeout_secs(),
            use_generator: true,
        }
    }
}

/// The complete context.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub measurement: MeasurementSection,
    #[serde(default)]
    pub compaction: CompactionSection,
    #[serde(default)]
    pub snapshots: SnapshotsSection,
    #[serde(default)]
    pub summary: SummarySection,
}

impl ContextToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse context.toml")
    }

    /// Load `context.toml` from the given `.forge` directory, or defaults if absent.
    pub fn load_or_default(forge_dir: &Path) -> Result<Self> {
        let config_path = forge_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize context.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Get the Claude command, with fallback to environment variable.
    pub fn claude_cmd(&self) -> String {
        self.project
            .claude_cmd
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// The validated budget. Invalid thresholds are a hard error.
    pub fn budget(&self) -> Result<Budget, BudgetError> {
        Budget::new(
            self.budget.max_tokens,
            Thresholds {
                warning: self.budget.warning,
                critical: self.budget.critical,
                emergency: self.budget.emergency,
            },
        )
    }

    pub fn rule_set(&self) -> Result<RuleSet> {
        let c = &self.compaction;
        let rules = RuleSet::from_patterns(
            c.transient_markers.as_slice(),
            c.preserve_patterns.as_slice(),
            c.stale_markers.as_slice(),
        )?;
        Ok(rules.with_limits(
            c.min_duplicate_run,
            c.max_duplicate_block_lines,
            c.verbose_block_lines,
        ))
    }

    pub fn counter_config(&self) -> CounterConfig {
        CounterConfig {
            capacity: self.cache.capacity,
            ttl: cache_ttl(self.cache.ttl_secs).unwrap_or(TimeDelta::MAX),
            precise_timeout: std::time::Duration::from_millis(self.measurement.timeout_ms),
        }
    }

    /// Out-of-range windows are clamped to the largest representable span.
    pub fn rollback_window(&self) -> TimeDelta {
        let hours = self.snapshots.rollback_window_hours;
        TimeDelta::try_hours(hours).unwrap_or(if hours < 0 {
            TimeDelta::MIN
        } else {
            TimeDelta::MAX
        })
    }

    /// Validate the configuration and return warnings.
    ///
    /// Budget and pattern errors are also reported here so `config validate` can list
    /// everything at once; commands that need them fail hard via [`Self::budget`] and
    /// [`Self::rule_set`].
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.budget() {
            warnings.push(format!("Invalid [budget]: {}", e));
        }
        if let Err(e) = self.rule_set() {
            warnings.push(format!("Invalid [compaction] pattern: {:#}", e));
        }
        if self.project.artifacts.is_empty() {
            warnings.push("No artifacts configured in [project].artifacts".to_string());
        }
        for name in &self.project.artifacts {
            if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
                warnings.push(format!(
                    "Invalid artifact name '{}': must be a plain file name",
                    name
                ));
            }
        }
        if self.compaction.min_duplicate_run < 2 {
            warnings.push(format!(
                "min_duplicate_run {} is below 2; 2 will be used",
                self.compaction.min_duplicate_run
            ));
        }
        if self.cache.capacity == 0 {
            warnings.push("cache.capacity is 0; a capacity of 1 will be used".to_string());
        }
        if self.measurement.timeout_ms == 0 {
            warnings.push(
                "measurement.timeout_ms is 0; precise measurement will always fall back"
                    .to_string(),
            );
        }
        if cache_ttl(self.cache.ttl_secs).is_none() {
            warnings.push(format!(
                "cache.ttl_secs {} is out of range; cache entries will never expire",
                self.cache.ttl_secs
            ));
        }
        if TimeDelta::try_hours(self.snapshots.rollback_window_hours).is_none() {
            warnings.push(format!(
                "rollback_window_hours {} is out of range and will be clamped",
                self.snapshots.rollback_window_hours
            ));
        }
        if self.snapshots.rollback_window_hours <= 0 {
            warnings.push(format!(
                "rollback_window_hours {} disables revert",
                self.snapshots.rollback_window_hours
            ));
        }
        if self.summary.target_tokens == 0 {
            warnings.push("summary.target_tokens is 0; a target of 1 will be used".to_string());
        }

        warnings
    }
}

fn cache_ttl(secs: u64) -> Option<TimeDelta> {
    i64::try_from(secs).ok().and_then(TimeDelta::try_seconds)
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Path to the project directory
    pub project_dir: PathBuf,
    /// Path to the .forge directory
    pub forge_dir: PathBuf,
    /// Parsed context.toml configuration
    pub toml: ContextToml,
}

impl ContextConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let forge_dir = project_dir.join(".forge");
        let toml = ContextToml::load_or_default(&forge_dir)?;

        Ok(Self {
            project_dir,
            forge_dir,
            toml,
        })
    }

    /// Get the Claude command (file → env → default).
    pub fn claude_cmd(&self) -> String {
        self.toml.claude_cmd()
    }

    pub fn config_file(&self) -> PathBuf {
        self.forge_dir.join(CONFIG_FILE)
    }

    /// Root holding one directory of artifacts per session.
    pub fn artifact_root(&self) -> PathBuf {
        self.project_dir.join(&self.toml.project.artifacts_dir)
    }

    /// Root of per-session engine state (history, snapshots, handoffs, locks).
    pub fn state_root(&self) -> PathBuf {
        self.forge_dir.join("context")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.forge_dir.join("logs")
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(
            self.artifact_root(),
            self.state_root(),
            self.toml.project.artifacts.clone(),
        )
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = ContextToml::parse("").unwrap();
        assert_eq!(toml.budget.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(toml.budget.warning, 0.70);
        assert_eq!(toml.cache.capacity, 1024);
        assert_eq!(toml.measurement.timeout_ms, 3000);
        assert_eq!(toml.snapshots.rollback_window_hours, 24);
        assert_eq!(toml.summary.target_tokens, 500);
        assert_eq!(toml.project.artifacts_dir, "specs");
        assert!(toml.project.artifacts.contains(&"tasks.md".to_string()));
        assert_eq!(
            toml.compaction.transient_markers.len(),
            DEFAULT_TRANSIENT_MARKERS.len()
        );
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[budget]
max_tokens = 120000
warning = 0.6

[compaction]
verbose_block_lines = 40
transient_markers = ['^>>> ']
"#;
        let toml = ContextToml::parse(content).unwrap();
        let budget = toml.budget().unwrap();
        assert_eq!(budget.max_tokens(), 120_000);
        assert_eq!(budget.thresholds().warning, 0.6);
        assert_eq!(budget.thresholds().critical, 0.85);

        let rules = toml.rule_set().unwrap();
        assert_eq!(rules.verbose_block_lines, 40);
        assert!(rules.is_transient_start(">>> import os"));
        assert!(!rules.is_transient_start("$ ls"));
        // Untouched tables keep their defaults.
        assert!(rules.is_preserved("## Decision: keep it"));
    }

    #[test]
    fn test_invalid_budget_is_hard_error_and_warning() {
        let toml = ContextToml::parse(
            "[budget]\nwarning = 0.9\ncritical = 0.8\nemergency = 0.95\n",
        )
        .unwrap();
        assert!(matches!(toml.budget(), Err(BudgetError::ThresholdOrder { .. })));
        assert!(toml.validate().iter().any(|w| w.contains("[budget]")));
    }

    #[test]
    fn test_invalid_pattern_reported() {
        let toml = ContextToml::parse("[compaction]\npreserve_patterns = ['(oops']\n").unwrap();
        assert!(toml.rule_set().is_err());
        assert!(toml.validate().iter().any(|w| w.contains("pattern")));
    }

    #[test]
    fn test_validate_flags_bad_artifacts_and_windows() {
        let toml = ContextToml::parse(
            "[project]\nartifacts = ['../escape.md']\n[snapshots]\nrollback_window_hours = 0\n",
        )
        .unwrap();
        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("escape.md")));
        assert!(warnings.iter().any(|w| w.contains("disables revert")));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = ContextToml::parse("[budget\nmax_tokens = 1").unwrap_err();
        assert!(err.to_string().contains("context.toml"));
    }

    #[test]
    fn test_counter_config_and_window() {
        let toml = ContextToml::parse(
            "[cache]\nttl_secs = 60\n[measurement]\ntimeout_ms = 250\n[snapshots]\nrollback_window_hours = 6\n",
        )
        .unwrap();
        let cfg = toml.counter_config();
        assert_eq!(cfg.ttl, chrono::Duration::seconds(60));
        assert_eq!(cfg.precise_timeout, std::time::Duration::from_millis(250));
        assert_eq!(toml.rollback_window(), chrono::Duration::hours(6));
    }

    #[test]
    fn test_out_of_range_durations_clamp_and_warn() {
        let toml = ContextToml::parse(
            "[cache]\nttl_secs = 100000000000000000\n[snapshots]\nrollback_window_hours = 9000000000000\n",
        )
        .unwrap();

        let warnings = toml.validate();
        assert!(warnings.iter().any(|w| w.contains("ttl_secs")));
        assert!(warnings.iter().any(|w| w.contains("rollback_window_hours")));

        assert_eq!(toml.counter_config().ttl, TimeDelta::MAX);
        assert_eq!(toml.rollback_window(), TimeDelta::MAX);

        let negative =
            ContextToml::parse("[snapshots]\nrollback_window_hours = -9000000000000\n").unwrap();
        assert_eq!(negative.rollback_window(), TimeDelta::MIN);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let mut toml = ContextToml::default();
        toml.budget.max_tokens = 50_000;
        toml.project.claude_cmd = Some("my-claude".into());

        toml.save(&dir.path().join(CONFIG_FILE)).unwrap();
        let loaded = ContextToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.budget.max_tokens, 50_000);
        assert_eq!(loaded.claude_cmd(), "my-claude");
        assert_eq!(
            loaded.compaction.preserve_patterns,
            toml.compaction.preserve_patterns
        );
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = ContextToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.budget.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_claude_cmd_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved = std::env::var("CLAUDE_CMD").ok();
        unsafe { std::env::remove_var("CLAUDE_CMD") };

        assert_eq!(ContextToml::default().claude_cmd(), "claude");

        unsafe { std::env::set_var("CLAUDE_CMD", "env-claude") };
        assert_eq!(ContextToml::default().claude_cmd(), "env-claude");

        let toml = ContextToml::parse("[project]\nclaude_cmd = \"file-claude\"\n").unwrap();
        assert_eq!(toml.claude_cmd(), "file-claude");

        unsafe { std::env::remove_var("CLAUDE_CMD") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("CLAUDE_CMD", val) };
        }
    }

    #[test]
    fn test_context_config_paths() {
        let dir = tempdir().unwrap();
        let config = ContextConfig::new(dir.path().to_path_buf()).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.config_file(), root.join(".forge/context.toml"));
        assert_eq!(config.artifact_root(), root.join("specs"));
        assert_eq!(config.state_root(), root.join(".forge/context"));
        assert_eq!(config.log_dir(), root.join(".forge/logs"));
        assert!(config.validate().is_empty());
    }
}
