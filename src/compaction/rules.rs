//! Rule tables that drive compaction.
//!
//! Rules are configuration, not code: each is a named line matcher with an action, and
//! the tables are built from `[compaction]` settings in `context.toml`. The passes in
//! `passes.rs` only consult these tables.

use anyhow::{Context, Result};
use regex::Regex;

/// What a matching line means to the passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// The line starts a block of ephemeral tool/command output.
    RemoveTransient,
    /// The line is a section heading marking stale content.
    RemoveStale,
    /// The line must survive compaction verbatim.
    Preserve,
}

/// A named line matcher with its action.
#[derive(Debug, Clone)]
pub struct ContentRule {
    pub name: String,
    pub matcher: Regex,
    pub action: RuleAction,
}

impl ContentRule {
    pub fn new(name: impl Into<String>, pattern: &str, action: RuleAction) -> Result<Self> {
        let name = name.into();
        let matcher = Regex::new(pattern)
            .with_context(|| format!("Invalid pattern for rule '{}': {}", name, pattern))?;
        Ok(Self {
            name,
            matcher,
            action,
        })
    }
}

/// Line-start markers of ephemeral tool/command output.
pub const DEFAULT_TRANSIENT_MARKERS: &[&str] = &[
    r"^\$ ",
    r"^(Tool|Command) output:",
    r"^\[(tool|bash|shell|output)\]",
    r"^<(tool_result|command_output|function_results)>",
    r"^\s*(Compiling|Checking|Downloading|Downloaded|Installing|Fetching|Updating) \S+ v\d",
    r"^\s*Running (`|unittests |tests/|target/)",
    r"^(npm|yarn|pnpm) (WARN|ERR!|notice)",
    r"^(running \d+ tests?$|test result:)",
];

/// Substrings that compaction must never drop.
pub const DEFAULT_PRESERVE_PATTERNS: &[&str] = &[
    r"^#+ Decision:.*$",
    r"^#+ ADR[- ]?\d*:?.*$",
    r"\bADR-\d+\b.*$",
    r"^\*\*Decision\*\*:.*$",
    r"^(ERROR|CRITICAL|FATAL)\b.*$",
    r"^\s*[-*] (\*\*)?(Error|Critical)(\*\*)?:.*$",
];

/// Section headings whose bodies are stale.
pub const DEFAULT_STALE_MARKERS: &[&str] = &[
    r"^#+ .*\[(STALE|OBSOLETE|SUPERSEDED)\]",
    r"^#+ .*\((stale|obsolete|superseded)\)",
];

/// The ordered rule tables plus numeric limits for the passes.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub transient: Vec<ContentRule>,
    pub preserve: Vec<ContentRule>,
    pub stale: Vec<ContentRule>,
    /// Minimum run length for duplicate collapsing.
    pub min_duplicate_run: usize,
    /// Largest multi-line block considered when detecting duplicate runs.
    pub max_duplicate_block_lines: usize,
    /// Fenced code blocks longer than this are trimmed; 0 disables the pass.
    pub verbose_block_lines: usize,
}

impl RuleSet {
    pub fn from_patterns(
        transient: &[impl AsRef<str>],
        preserve: &[impl AsRef<str>],
        stale: &[impl AsRef<str>],
    ) -> Result<Self> {
        Ok(Self {
            transient: build_rules("transient", transient, RuleAction::RemoveTransient)?,
            preserve: build_rules("preserve", preserve, RuleAction::Preserve)?,
            stale: build_rules("stale", stale, RuleAction::RemoveStale)?,
            min_duplicate_run: 3,
            max_duplicate_block_lines: 200,
            verbose_block_lines: 0,
        })
    }

    pub fn with_limits(
        mut self,
        min_duplicate_run: usize,
        max_duplicate_block_lines: usize,
        verbose_block_lines: usize,
    ) -> Self {
        // A "run" of one would collapse nothing but still report items.
        self.min_duplicate_run = min_duplicate_run.max(2);
        self.max_duplicate_block_lines = max_duplicate_block_lines.max(1);
        self.verbose_block_lines = verbose_block_lines;
        self
    }

    pub fn is_transient_start(&self, line: &str) -> bool {
        self.transient.iter().any(|r| r.matcher.is_match(line))
    }

    pub fn is_stale_heading(&self, line: &str) -> bool {
        self.stale.iter().any(|r| r.matcher.is_match(line))
    }

    pub fn is_preserved(&self, line: &str) -> bool {
        self.preserve.iter().any(|r| r.matcher.is_match(line))
    }

    /// Every preserve-pattern match in `text`, line by line, in order.
    pub fn preserved_matches(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for line in text.lines() {
            for rule in &self.preserve {
                for m in rule.matcher.find_iter(line) {
                    let s = m.as_str().to_string();
                    if !s.trim().is_empty() && !found.contains(&s) {
                        found.push(s);
                    }
                }
            }
        }
        found
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        // The built-in tables are compile-time constants covered by tests.
        Self::from_patterns(
            DEFAULT_TRANSIENT_MARKERS,
            DEFAULT_PRESERVE_PATTERNS,
            DEFAULT_STALE_MARKERS,
        )
        .unwrap_or_else(|_| Self {
            transient: Vec::new(),
            preserve: Vec::new(),
            stale: Vec::new(),
            min_duplicate_run: 3,
            max_duplicate_block_lines: 200,
            verbose_block_lines: 0,
        })
    }
}

fn build_rules(
    prefix: &str,
    patterns: &[impl AsRef<str>],
    action: RuleAction,
) -> Result<Vec<ContentRule>> {
    patterns
        .iter()
        .enumerate()
        .map(|(i, p)| ContentRule::new(format!("{}-{}", prefix, i + 1), p.as_ref(), action))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_compile() {
        let rules = RuleSet::from_patterns(
            DEFAULT_TRANSIENT_MARKERS,
            DEFAULT_PRESERVE_PATTERNS,
            DEFAULT_STALE_MARKERS,
        )
        .unwrap();
        assert_eq!(rules.transient.len(), DEFAULT_TRANSIENT_MARKERS.len());
        assert_eq!(rules.preserve.len(), DEFAULT_PRESERVE_PATTERNS.len());
        assert!(rules.transient.iter().all(|r| r.action == RuleAction::RemoveTransient));
        assert_eq!(rules.preserve[0].name, "preserve-1");
    }

    #[test]
    fn test_invalid_pattern_names_rule() {
        let err = RuleSet::from_patterns(&["(unclosed"], &[] as &[&str], &[] as &[&str])
            .unwrap_err();
        assert!(err.to_string().contains("transient-1"));
    }

    #[test]
    fn test_transient_markers() {
        let rules = RuleSet::default();
        assert!(rules.is_transient_start("$ cargo test"));
        assert!(rules.is_transient_start("Tool output: 42 files"));
        assert!(rules.is_transient_start("[bash] ls -la"));
        assert!(rules.is_transient_start("Compiling serde v1.0.0"));
        assert!(!rules.is_transient_start("## Decision: use sqlite"));
        assert!(!rules.is_transient_start("The $ sign is literal here"));
    }

    #[test]
    fn test_tool_shaped_lines_are_transient() {
        let rules = RuleSet::default();
        assert!(rules.is_transient_start("   Compiling forge-context v0.1.0 (/src)"));
        assert!(rules.is_transient_start("  Downloaded tokio v1.40.0"));
        assert!(rules.is_transient_start("     Running `target/debug/forge-context status`"));
        assert!(
            rules.is_transient_start("     Running unittests src/lib.rs (target/debug/deps/x)")
        );
        assert!(rules.is_transient_start("running 12 tests"));
    }

    #[test]
    fn test_prose_starting_with_tool_verbs_is_not_transient() {
        let rules = RuleSet::default();
        assert!(
            !rules.is_transient_start("Running the migration is blocked until legal signs off.")
        );
        assert!(!rules.is_transient_start("Compiling a list of open questions for the review."));
        assert!(
            !rules.is_transient_start("Installing the new lock requires a maintenance window.")
        );
        assert!(!rules.is_transient_start("Fetching tokens happens once per login."));
        assert!(!rules.is_transient_start("Resolving conflicts is left to the operator."));
        assert!(!rules.is_transient_start("running 2 tests per shard keeps CI fast"));
    }

    #[test]
    fn test_preserve_patterns() {
        let rules = RuleSet::default();
        assert!(rules.is_preserved("## Decision: use sqlite for history"));
        assert!(rules.is_preserved("### ADR-004: snapshot layout"));
        assert!(rules.is_preserved("ERROR failed to open socket"));
        assert!(rules.is_preserved("- **Critical**: do not drop the lock"));
        assert!(!rules.is_preserved("just a normal line"));
    }

    #[test]
    fn test_stale_markers() {
        let rules = RuleSet::default();
        assert!(rules.is_stale_heading("## Old approach [SUPERSEDED]"));
        assert!(rules.is_stale_heading("### Caching (obsolete)"));
        assert!(!rules.is_stale_heading("## Current approach"));
    }

    #[test]
    fn test_preserved_matches_are_deduplicated_and_ordered() {
        let rules = RuleSet::default();
        let text = "## Decision: A\nbody\n## Decision: B\n## Decision: A\n";
        assert_eq!(
            rules.preserved_matches(text),
            vec!["## Decision: A".to_string(), "## Decision: B".to_string()]
        );
    }

    #[test]
    fn test_with_limits_clamps_run_length() {
        let rules = RuleSet::default().with_limits(1, 0, 40);
        assert_eq!(rules.min_duplicate_run, 2);
        assert_eq!(rules.max_duplicate_block_lines, 1);
        assert_eq!(rules.verbose_block_lines, 40);
    }
}
