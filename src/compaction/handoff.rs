//! Resumption documents for sessions that have exhausted their budget.
//!
//! A handoff takes a `context-overflow` checkpoint snapshot and records its id, so the
//! next session can find the exact artifact state the document describes. Building a
//! handoff never mutates artifacts.

use super::budget::{Budget, Level, classify};
use super::snapshot::{SnapshotStore, TRIGGER_CONTEXT_OVERFLOW};
use super::summary::{extract_decisions, extract_touched_files};
use super::tokens::TokenCounter;
use crate::errors::ContextResult;
use crate::store::{ArtifactStore, atomic_write, atomic_write_json};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::info;

static CHECKBOX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+\[(.)\]\s+(.+?)\s*$").ok());

static BULLET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+(.+?)\s*$").ok());

static FOCUS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\*\*)?(?:current\s+)?focus(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.+?)\s*$").ok()
});

/// Task/progress state of a session. Read-only input to [`HandoffBuilder::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub current_focus: Option<String>,
    pub completed: Vec<String>,
    pub in_progress: Vec<String>,
    pub next: Vec<String>,
    pub open_issues: Vec<String>,
}

impl SessionProgress {
    /// Parse a checkbox task list.
    ///
    /// `[x]` is completed, `[~]` or `[/]` in progress, `[ ]` next and `[!]` an open issue.
    /// Under an `Issues` or `Blockers` heading every unchecked bullet is an open issue.
    /// A `Focus:` line sets the current focus; otherwise the first in-progress item does.
    pub fn from_tasks_markdown(text: &str) -> Self {
        let mut progress = SessionProgress::default();
        let mut in_issues = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                let heading = trimmed.trim_start_matches('#').trim().to_lowercase();
                in_issues = heading.contains("issue") || heading.contains("blocker");
                continue;
            }

            if progress.current_focus.is_none()
                && let Some(cap) = FOCUS.as_ref().and_then(|re| re.captures(line))
            {
                progress.current_focus = Some(cap[1].to_string());
                continue;
            }

            if let Some(cap) = CHECKBOX.as_ref().and_then(|re| re.captures(line)) {
                let item = cap[2].to_string();
                match &cap[1] {
                    "x" | "X" => {
                        if !in_issues {
                            progress.completed.push(item);
                        }
                    }
                    "~" | "/" => progress.in_progress.push(item),
                    "!" => progress.open_issues.push(item),
                    _ if in_issues => progress.open_issues.push(item),
                    _ => progress.next.push(item),
                }
                continue;
            }

            if in_issues && let Some(cap) = BULLET.as_ref().and_then(|re| re.captures(line)) {
                progress.open_issues.push(cap[1].to_string());
            }
        }

        if progress.current_focus.is_none() {
            progress.current_focus = progress
                .in_progress
                .first()
                .or(progress.next.first())
                .cloned();
        }
        progress
    }
}

/// Token usage at the moment of handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffUsage {
    pub tokens: usize,
    pub max_tokens: usize,
    pub usage_fraction: f64,
    pub level: Level,
}

/// Structured resumption document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffDocument {
    pub session_scope: String,
    pub current_focus: Option<String>,
    pub completed_items: Vec<String>,
    pub in_progress_items: Vec<String>,
    pub next_items: Vec<String>,
    pub touched_files: Vec<String>,
    pub open_issues: Vec<String>,
    pub decisions_made: Vec<String>,
    /// Id of the `context-overflow` snapshot taken while building.
    pub checkpoint_id: String,
    pub produced_at: DateTime<Utc>,
    pub usage: HandoffUsage,
}

impl HandoffDocument {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# Session Handoff: {}\n\n", self.session_scope));
        md.push_str(&format!(
            "**Produced:** {}  \n**Checkpoint:** `{}`  \n**Usage:** {} / {} tokens ({:.1}%, {})\n\n",
            self.produced_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.checkpoint_id,
            self.usage.tokens,
            self.usage.max_tokens,
            self.usage.usage_fraction * 100.0,
            self.usage.level,
        ));

        md.push_str("## Current Focus\n\n");
        match &self.current_focus {
            Some(focus) => md.push_str(&format!("{}\n\n", focus)),
            None => md.push_str("_None recorded._\n\n"),
        }

        push_section(&mut md, "Completed", &self.completed_items, "- [x] ");
        push_section(&mut md, "In Progress", &self.in_progress_items, "- [~] ");
        push_section(&mut md, "Next", &self.next_items, "- [ ] ");
        push_section(&mut md, "Open Issues", &self.open_issues, "- ");
        push_section(&mut md, "Decisions Made", &self.decisions_made, "- ");
        push_section(&mut md, "Files Touched", &self.touched_files, "- ");

        md.push_str(&format!(
            "---\nResume by restoring checkpoint `{}` if the live artifacts have moved on.\n",
            self.checkpoint_id
        ));
        md
    }
}

fn push_section(md: &mut String, title: &str, items: &[String], bullet: &str) {
    if items.is_empty() {
        return;
    }
    md.push_str(&format!("## {}\n\n", title));
    for item in items {
        md.push_str(bullet);
        md.push_str(item);
        md.push('\n');
    }
    md.push('\n');
}

/// Assembles and persists [`HandoffDocument`]s.
pub struct HandoffBuilder {
    store: ArtifactStore,
    snapshots: SnapshotStore,
    counter: TokenCounter,
    budget: Budget,
}

impl HandoffBuilder {
    pub fn new(store: ArtifactStore, counter: TokenCounter, budget: Budget) -> Self {
        Self {
            snapshots: SnapshotStore::new(store.clone()),
            store,
            counter,
            budget,
        }
    }

    pub async fn build(
        &mut self,
        scope: &str,
        progress: &SessionProgress,
    ) -> ContextResult<HandoffDocument> {
        let now = Utc::now();
        let (session, checkpoint) = {
            let guard = self.store.lock(scope)?;
            let session = self.store.load(scope)?;
            let checkpoint = self
                .snapshots
                .capture(&guard, scope, TRIGGER_CONTEXT_OVERFLOW, now)?;
            (session, checkpoint)
        };

        let combined = session.combined_text();
        let tokens = self.counter.measure_artifacts(&session).await;
        let classification = classify(tokens, &self.budget);

        let doc = HandoffDocument {
            session_scope: scope.to_string(),
            current_focus: progress.current_focus.clone(),
            completed_items: progress.completed.clone(),
            in_progress_items: progress.in_progress.clone(),
            next_items: progress.next.clone(),
            touched_files: extract_touched_files(&combined),
            open_issues: progress.open_issues.clone(),
            decisions_made: extract_decisions(&combined),
            checkpoint_id: checkpoint.id,
            produced_at: now,
            usage: HandoffUsage {
                tokens,
                max_tokens: self.budget.max_tokens(),
                usage_fraction: classification.usage_fraction,
                level: classification.level,
            },
        };

        info!(
            scope,
            checkpoint = %doc.checkpoint_id,
            level = %doc.usage.level,
            "handoff built"
        );
        Ok(doc)
    }

    /// Persist `handoff-<timestamp>.md` and `.json` under the session's state directory.
    /// Returns the markdown path.
    pub fn write(&self, doc: &HandoffDocument) -> ContextResult<PathBuf> {
        let dir = self.store.state_dir(&doc.session_scope)?.join("handoffs");
        let stem = format!("handoff-{}", doc.produced_at.format("%Y%m%dT%H%M%S%6fZ"));
        let md_path = dir.join(format!("{}.md", stem));
        atomic_write(&md_path, doc.to_markdown().as_bytes())?;
        atomic_write_json(&dir.join(format!("{}.json", stem)), doc)?;
        info!(scope = %doc.session_scope, path = %md_path.display(), "handoff written");
        Ok(md_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const TASKS: &str = "\
# Tasks: 001-auth

Focus: wire refresh tokens into the session layer

## Phase 1
- [x] T001 Create `src/auth/session.rs`
- [X] T002 Add login route
- [~] T003 Refresh token rotation
- [/] T004 Logout invalidation
- [ ] T005 Rate limiting
- [!] T006 Flaky integration test

## Blockers
- Staging database is read-only
- [ ] Waiting on security review
- [x] Resolved: CI credentials
";

    fn setup() -> (TempDir, ArtifactStore) {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(
            dir.path().join("specs"),
            dir.path().join(".forge/context"),
            vec!["spec.md".into(), "tasks.md".into()],
        );
        (dir, store)
    }

    fn builder(store: &ArtifactStore) -> HandoffBuilder {
        let budget = Budget::new(100, Default::default()).unwrap();
        HandoffBuilder::new(store.clone(), TokenCounter::offline(), budget)
    }

    #[test]
    fn test_parse_tasks_markdown() {
        let p = SessionProgress::from_tasks_markdown(TASKS);
        assert_eq!(
            p.current_focus.as_deref(),
            Some("wire refresh tokens into the session layer")
        );
        assert_eq!(
            p.completed,
            vec!["T001 Create `src/auth/session.rs`", "T002 Add login route"]
        );
        assert_eq!(
            p.in_progress,
            vec!["T003 Refresh token rotation", "T004 Logout invalidation"]
        );
        assert_eq!(p.next, vec!["T005 Rate limiting"]);
        assert_eq!(
            p.open_issues,
            vec![
                "T006 Flaky integration test",
                "Staging database is read-only",
                "Waiting on security review",
            ]
        );
    }

    #[test]
    fn test_focus_defaults_to_first_in_progress() {
        let p = SessionProgress::from_tasks_markdown("- [ ] later\n- [~] now\n");
        assert_eq!(p.current_focus.as_deref(), Some("now"));

        let p = SessionProgress::from_tasks_markdown("- [ ] later\n");
        assert_eq!(p.current_focus.as_deref(), Some("later"));

        assert_eq!(SessionProgress::from_tasks_markdown("").current_focus, None);
    }

    #[tokio::test]
    async fn test_build_takes_checkpoint_and_extracts_facts() {
        let (_dir, store) = setup();
        let spec = "# Spec\n## Decision: rotate refresh tokens\nTouches src/auth/token.rs\n";
        store.write_artifact("001-auth", "spec.md", spec).unwrap();
        store.write_artifact("001-auth", "tasks.md", TASKS).unwrap();

        let progress = SessionProgress::from_tasks_markdown(TASKS);
        let mut builder = builder(&store);
        let doc = builder.build("001-auth", &progress).await.unwrap();

        assert!(doc.checkpoint_id.ends_with("context-overflow"));
        assert_eq!(doc.decisions_made, vec!["## Decision: rotate refresh tokens"]);
        assert!(doc.touched_files.contains(&"src/auth/token.rs".to_string()));
        assert!(doc.touched_files.contains(&"src/auth/session.rs".to_string()));
        assert_eq!(doc.next_items, vec!["T005 Rate limiting"]);
        assert!(doc.usage.tokens > 0);
        assert_eq!(doc.usage.max_tokens, 100);

        let snapshots = SnapshotStore::new(store.clone()).list("001-auth").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, doc.checkpoint_id);

        // Artifacts are untouched.
        assert_eq!(store.load("001-auth").unwrap().get("spec.md").unwrap().text, spec);
    }

    #[tokio::test]
    async fn test_usage_matches_session_measurement() {
        use crate::compaction::{CompactionEngine, RuleSet};

        let (_dir, store) = setup();
        store.write_artifact("s", "spec.md", "# Spec\n## Decision: argon2\n").unwrap();
        store.write_artifact("s", "tasks.md", TASKS).unwrap();

        let doc = builder(&store)
            .build("s", &SessionProgress::default())
            .await
            .unwrap();

        let mut engine = CompactionEngine::new(
            store.clone(),
            TokenCounter::offline(),
            RuleSet::default(),
            Budget::new(100, Default::default()).unwrap(),
        );
        let usage = engine.measure_session("s").await.unwrap();
        assert_eq!(doc.usage.tokens, usage.tokens);
        assert_eq!(doc.usage.level, usage.classification.level);
    }

    #[tokio::test]
    async fn test_build_twice_gives_independent_checkpoints() {
        let (_dir, store) = setup();
        store.write_artifact("s", "spec.md", "# Spec\n").unwrap();
        let mut builder = builder(&store);

        let a = builder.build("s", &SessionProgress::default()).await.unwrap();
        let b = builder.build("s", &SessionProgress::default()).await.unwrap();
        assert_ne!(a.checkpoint_id, b.checkpoint_id);
        assert_eq!(SnapshotStore::new(store).list("s").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_write_persists_markdown_and_json() {
        let (dir, store) = setup();
        store.write_artifact("s", "tasks.md", TASKS).unwrap();
        let mut builder = builder(&store);
        let doc = builder
            .build("s", &SessionProgress::from_tasks_markdown(TASKS))
            .await
            .unwrap();

        let md_path = builder.write(&doc).unwrap();
        assert!(md_path.starts_with(dir.path().join(".forge/context/s/handoffs")));

        let md = fs::read_to_string(&md_path).unwrap();
        assert!(md.starts_with("# Session Handoff: s"));
        assert!(md.contains("- [~] T003 Refresh token rotation"));
        assert!(md.contains(&doc.checkpoint_id));

        let json: HandoffDocument =
            serde_json::from_str(&fs::read_to_string(md_path.with_extension("json")).unwrap())
                .unwrap();
        assert_eq!(json.checkpoint_id, doc.checkpoint_id);
        assert_eq!(json.in_progress_items, doc.in_progress_items);
        assert_eq!(json.usage.tokens, doc.usage.tokens);
    }
}
