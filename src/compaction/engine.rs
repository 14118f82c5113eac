//! Reversible compaction of a session's artifacts.
//!
//! A compaction snapshots the artifact set, runs the rule passes over every artifact,
//! writes the results back and records a history entry that points at the snapshot.
//! `revert` restores that snapshot while the entry is inside the rollback window.

use super::budget::{Budget, Classification, Level, classify};
use super::history::{CompactionHistory, HistoryEntry};
use super::passes::{ReductionKind, run_passes};
use super::rules::RuleSet;
use super::snapshot::{SnapshotStore, TRIGGER_PRE_COMPACTION};
use super::tokens::{MeasurementSource, TokenCounter};
use crate::errors::ContextResult;
use crate::store::ArtifactStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One reduction applied (or, for dry runs, proposed) by a compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedItem {
    pub kind: ReductionKind,
    pub artifact: String,
    /// 1-based line in the artifact before compaction.
    pub line: usize,
    pub size_before: usize,
    pub size_after: usize,
    pub reversible: bool,
    /// `<snapshot-id>/<artifact>#L<line>`, or `live/<artifact>#L<line>` for dry runs.
    pub recovery_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionOutcome {
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub items_reduced: Vec<ReducedItem>,
    /// Level of the session before compaction.
    pub level: Level,
    pub produced_at: DateTime<Utc>,
    /// True when a pre-compaction snapshot was taken and `revert` can undo this run.
    pub reversible: bool,
    pub history_id: String,
    pub dry_run: bool,
    pub snapshot_id: Option<String>,
}

impl CompactionOutcome {
    pub fn tokens_saved(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

/// Why a revert did or did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevertStatus {
    Reverted,
    UnknownId,
    Expired,
    AlreadyReverted,
    /// The entry has no usable pre-compaction snapshot (pruned or never taken).
    SnapshotMissing,
}

impl RevertStatus {
    pub fn succeeded(self) -> bool {
        self == RevertStatus::Reverted
    }
}

impl std::fmt::Display for RevertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertStatus::Reverted => write!(f, "reverted"),
            RevertStatus::UnknownId => write!(f, "unknown history id"),
            RevertStatus::Expired => write!(f, "rollback window expired"),
            RevertStatus::AlreadyReverted => write!(f, "already reverted"),
            RevertStatus::SnapshotMissing => write!(f, "snapshot missing"),
        }
    }
}

/// Token usage of one artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactUsage {
    pub name: String,
    pub tokens: usize,
    pub source: MeasurementSource,
}

/// Token usage of a whole session and its classification.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUsage {
    pub scope: String,
    pub tokens: usize,
    pub artifacts: Vec<ArtifactUsage>,
    pub classification: Classification,
}

/// Orchestrates snapshots, passes, writes and history for compaction.
pub struct CompactionEngine {
    store: ArtifactStore,
    snapshots: SnapshotStore,
    history: CompactionHistory,
    counter: TokenCounter,
    rules: RuleSet,
    budget: Budget,
    rollback_window: Duration,
}

impl CompactionEngine {
    pub fn new(
        store: ArtifactStore,
        counter: TokenCounter,
        rules: RuleSet,
        budget: Budget,
    ) -> Self {
        Self {
            snapshots: SnapshotStore::new(store.clone()),
            history: CompactionHistory::new(store.clone()),
            store,
            counter,
            rules,
            budget,
            rollback_window: Duration::hours(super::DEFAULT_ROLLBACK_WINDOW_HOURS),
        }
    }

    pub fn with_rollback_window(mut self, window: Duration) -> Self {
        self.rollback_window = window;
        self
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn rollback_window(&self) -> Duration {
        self.rollback_window
    }

    pub fn history(&self) -> &CompactionHistory {
        &self.history
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Measure every artifact of the session and classify the total.
    pub async fn measure_session(&mut self, scope: &str) -> ContextResult<SessionUsage> {
        let session = self.store.load(scope)?;
        let mut artifacts = Vec::with_capacity(session.artifacts.len());
        for artifact in &session.artifacts {
            let m = self.counter.measure(&artifact.text).await;
            artifacts.push(ArtifactUsage {
                name: artifact.name.clone(),
                tokens: m.count,
                source: m.source,
            });
        }
        let tokens = artifacts.iter().map(|a| a.tokens).sum();
        Ok(SessionUsage {
            scope: scope.to_string(),
            tokens,
            artifacts,
            classification: classify(tokens, &self.budget),
        })
    }

    pub async fn compact(
        &mut self,
        scope: &str,
        dry_run: bool,
    ) -> ContextResult<CompactionOutcome> {
        self.compact_at(scope, dry_run, Utc::now()).await
    }

    pub async fn compact_at(
        &mut self,
        scope: &str,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ContextResult<CompactionOutcome> {
        // Dry runs only read.
        let guard = if dry_run {
            None
        } else {
            Some(self.store.lock(scope)?)
        };

        let session = self.store.load(scope)?;
        let history_id = uuid::Uuid::new_v4().to_string();

        if session.is_empty() {
            debug!(scope, "no artifacts, nothing to compact");
            return Ok(CompactionOutcome {
                tokens_before: 0,
                tokens_after: 0,
                items_reduced: Vec::new(),
                level: classify(0, &self.budget).level,
                produced_at: now,
                reversible: false,
                history_id,
                dry_run,
                snapshot_id: None,
            });
        }

        // Write-ahead: the snapshot exists before any artifact is touched.
        let snapshot = match &guard {
            Some(guard) => Some(
                self.snapshots
                    .capture(guard, scope, TRIGGER_PRE_COMPACTION, now)?,
            ),
            None => None,
        };
        let ref_root = snapshot
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| "live".to_string());

        let mut tokens_before = 0;
        let mut tokens_after = 0;
        let mut items_reduced = Vec::new();

        for artifact in &session.artifacts {
            let before = self.counter.measure(&artifact.text).await.count;
            tokens_before += before;

            let output = run_passes(&artifact.text, &self.rules);
            if output.text == artifact.text {
                tokens_after += before;
                continue;
            }

            let after = self.counter.measure(&output.text).await.count;
            if after > before {
                warn!(
                    scope,
                    artifact = %artifact.name,
                    before,
                    after,
                    "compaction would grow artifact, leaving it unchanged"
                );
                tokens_after += before;
                continue;
            }

            for reduction in &output.reductions {
                let size_before = self.counter.measure(&reduction.before).await.count;
                let size_after = self
                    .counter
                    .measure(&reduction.after)
                    .await
                    .count
                    .min(size_before);
                items_reduced.push(ReducedItem {
                    kind: reduction.kind,
                    artifact: artifact.name.clone(),
                    line: reduction.line,
                    size_before,
                    size_after,
                    reversible: true,
                    recovery_ref: Some(format!(
                        "{}/{}#L{}",
                        ref_root, artifact.name, reduction.line
                    )),
                });
            }
            if !output.restored.is_empty() {
                debug!(
                    scope,
                    artifact = %artifact.name,
                    restored = output.restored.len(),
                    "re-appended preserved content"
                );
            }

            if !dry_run {
                self.store
                    .write_artifact(scope, &artifact.name, &output.text)?;
            }
            tokens_after += after;
        }

        let level = classify(tokens_before, &self.budget).level;
        let outcome = CompactionOutcome {
            tokens_before,
            tokens_after,
            items_reduced,
            level,
            produced_at: now,
            reversible: snapshot.is_some(),
            history_id,
            dry_run,
            snapshot_id: snapshot.map(|s| s.id),
        };

        if !dry_run {
            self.history.append(HistoryEntry {
                history_id: outcome.history_id.clone(),
                session_scope: scope.to_string(),
                produced_at: now,
                level,
                tokens_before,
                tokens_after,
                items_reduced: outcome.items_reduced.len(),
                snapshot_id: outcome.snapshot_id.clone(),
                reverted: false,
                reverted_at: None,
            })?;
        }

        info!(
            scope,
            history_id = %outcome.history_id,
            tokens_before,
            tokens_after,
            items = outcome.items_reduced.len(),
            dry_run,
            "compaction complete"
        );
        Ok(outcome)
    }

    /// Undo a compaction. False for unknown, expired, or already reverted ids.
    pub fn revert(&self, scope: &str, history_id: &str) -> ContextResult<bool> {
        self.revert_at(scope, history_id, Utc::now())
    }

    pub fn revert_at(
        &self,
        scope: &str,
        history_id: &str,
        now: DateTime<Utc>,
    ) -> ContextResult<bool> {
        Ok(self.revert_status(scope, history_id, now)?.succeeded())
    }

    pub fn revert_status(
        &self,
        scope: &str,
        history_id: &str,
        now: DateTime<Utc>,
    ) -> ContextResult<RevertStatus> {
        let guard = self.store.lock(scope)?;

        let Some(entry) = self.history.get(scope, history_id)? else {
            return Ok(RevertStatus::UnknownId);
        };
        if entry.reverted {
            return Ok(RevertStatus::AlreadyReverted);
        }
        if now - entry.produced_at > self.rollback_window {
            debug!(scope, history_id, "revert outside rollback window");
            return Ok(RevertStatus::Expired);
        }
        let Some(snapshot_id) = entry.snapshot_id.as_deref() else {
            return Ok(RevertStatus::SnapshotMissing);
        };
        if self
            .snapshots
            .restore_locked(&guard, scope, snapshot_id, now)?
            .is_none()
        {
            warn!(scope, history_id, snapshot = snapshot_id, "pre-compaction snapshot is gone");
            return Ok(RevertStatus::SnapshotMissing);
        }

        self.history.mark_reverted(scope, history_id, now)?;
        info!(scope, history_id, snapshot = snapshot_id, "compaction reverted");
        Ok(RevertStatus::Reverted)
    }
}
