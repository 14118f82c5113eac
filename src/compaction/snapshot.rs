//! Point-in-time snapshots of a session's artifact set.
//!
//! Each snapshot is a directory under `<state>/<scope>/snapshots/<id>/` holding a copy
//! of every artifact that existed at capture time plus a `snapshot.json` manifest.
//! Directories are staged under a dot-prefixed name and renamed into place, so a crash
//! never leaves a partial snapshot visible to [`SnapshotStore::list`].

use crate::errors::{ContextError, ContextResult};
use crate::store::{ArtifactStore, SessionLock, atomic_write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MANIFEST: &str = "snapshot.json";

pub const TRIGGER_PRE_COMPACTION: &str = "pre-compaction";
pub const TRIGGER_PRE_RESTORE: &str = "pre-restore";
pub const TRIGGER_CONTEXT_OVERFLOW: &str = "context-overflow";
pub const TRIGGER_MANUAL: &str = "manual";

/// Immutable metadata of a captured snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub session_scope: String,
    pub trigger: String,
    pub created_at: DateTime<Utc>,
    /// Per-session creation counter; orders snapshots taken in the same clock tick.
    pub sequence: u64,
    /// Artifacts that existed and were copied, in configured order.
    pub captured_artifacts: Vec<String>,
}

/// Creates, lists, restores and prunes snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    store: ArtifactStore,
}

impl SnapshotStore {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    fn snapshots_dir(&self, scope: &str) -> ContextResult<PathBuf> {
        Ok(self.store.state_dir(scope)?.join("snapshots"))
    }

    pub fn create(&self, scope: &str, trigger: &str) -> ContextResult<Snapshot> {
        let guard = self.store.lock(scope)?;
        self.capture(&guard, scope, trigger, Utc::now())
    }

    /// Snapshots in creation order (oldest first).
    pub fn list(&self, scope: &str) -> ContextResult<Vec<Snapshot>> {
        let dir = self.snapshots_dir(scope)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| ContextError::io(&dir, e))? {
            let entry = entry.map_err(|e| ContextError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match read_manifest(&entry.path()) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!(snapshot = %name, error = %e, "skipping unreadable snapshot"),
            }
        }

        snapshots.sort_by(|a, b| {
            (a.sequence, a.created_at, &a.id).cmp(&(b.sequence, b.created_at, &b.id))
        });
        Ok(snapshots)
    }

    pub fn get(&self, scope: &str, snapshot_id: &str) -> ContextResult<Option<Snapshot>> {
        let Some(dir) = self.snapshot_dir(scope, snapshot_id)? else {
            return Ok(None);
        };
        read_manifest(&dir).map(Some)
    }

    /// Content of one artifact as captured in a snapshot.
    pub fn read_artifact(
        &self,
        scope: &str,
        snapshot_id: &str,
        name: &str,
    ) -> ContextResult<Option<String>> {
        let Some(dir) = self.snapshot_dir(scope, snapshot_id)? else {
            return Ok(None);
        };
        let path = dir.join(name);
        if !path.is_file() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| ContextError::io(&path, e))
    }

    /// Restore the artifact set captured by `snapshot_id`, taking a pre-restore
    /// snapshot first. Returns false if the snapshot does not exist.
    pub fn restore(&self, scope: &str, snapshot_id: &str) -> ContextResult<bool> {
        let guard = self.store.lock(scope)?;
        Ok(self
            .restore_locked(&guard, scope, snapshot_id, Utc::now())?
            .is_some())
    }

    /// Keep the `keep` most recent snapshots; returns how many were deleted.
    pub fn prune(&self, scope: &str, keep: usize) -> ContextResult<usize> {
        let _guard = self.store.lock(scope)?;
        let snapshots = self.list(scope)?;
        if snapshots.len() <= keep {
            return Ok(0);
        }

        let dir = self.snapshots_dir(scope)?;
        let doomed = &snapshots[..snapshots.len() - keep];
        for snapshot in doomed {
            let path = dir.join(&snapshot.id);
            // Hide it from `list` first so a crash mid-delete leaves no half snapshot.
            let trash = dir.join(format!(".trash-{}", uuid::Uuid::new_v4()));
            fs::rename(&path, &trash).map_err(|e| ContextError::io(&path, e))?;
            fs::remove_dir_all(&trash).map_err(|e| ContextError::io(&trash, e))?;
        }

        info!(scope, removed = doomed.len(), keep, "pruned snapshots");
        Ok(doomed.len())
    }

    /// Copy the current artifacts into a new snapshot. Caller holds the session lock.
    pub(crate) fn capture(
        &self,
        _guard: &SessionLock,
        scope: &str,
        trigger: &str,
        now: DateTime<Utc>,
    ) -> ContextResult<Snapshot> {
        let names = self.store.existing_artifacts(scope)?;
        let dir = self.snapshots_dir(scope)?;
        fs::create_dir_all(&dir).map_err(|e| ContextError::io(&dir, e))?;

        let sequence = self.list(scope)?.last().map(|s| s.sequence + 1).unwrap_or(1);
        let id = unique_id(&dir, now, trigger);

        let snapshot = Snapshot {
            id: id.clone(),
            session_scope: scope.to_string(),
            trigger: trigger.to_string(),
            created_at: now,
            sequence,
            captured_artifacts: names.clone(),
        };

        let staging = dir.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        let staged = (|| -> ContextResult<()> {
            fs::create_dir_all(&staging).map_err(|e| ContextError::io(&staging, e))?;
            // Byte copies; artifacts need not be text.
            for name in &names {
                let from = self.store.artifact_path(scope, name)?;
                fs::copy(&from, staging.join(name)).map_err(|e| ContextError::io(&from, e))?;
            }
            atomic_write_json(&staging.join(MANIFEST), &snapshot)?;
            let target = dir.join(&id);
            fs::rename(&staging, &target).map_err(|e| ContextError::io(&target, e))
        })();

        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        info!(
            scope,
            snapshot = %snapshot.id,
            trigger,
            artifacts = snapshot.captured_artifacts.len(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// Restore under an already-held lock. Returns the pre-restore snapshot, or `None`
    /// when `snapshot_id` is unknown.
    pub(crate) fn restore_locked(
        &self,
        guard: &SessionLock,
        scope: &str,
        snapshot_id: &str,
        now: DateTime<Utc>,
    ) -> ContextResult<Option<Snapshot>> {
        let Some(source) = self.snapshot_dir(scope, snapshot_id)? else {
            return Ok(None);
        };
        let snapshot = read_manifest(&source)?;

        let safety = self.capture(guard, scope, TRIGGER_PRE_RESTORE, now)?;

        for name in self.store.artifact_names() {
            if snapshot.captured_artifacts.contains(name) {
                let path = source.join(name);
                let bytes = fs::read(&path).map_err(|e| ContextError::io(&path, e))?;
                self.store.write_artifact_bytes(scope, name, &bytes)?;
            } else {
                self.store.remove_artifact(scope, name)?;
            }
        }

        info!(
            scope,
            snapshot = snapshot_id,
            safety = %safety.id,
            "snapshot restored"
        );
        Ok(Some(safety))
    }

    fn snapshot_dir(&self, scope: &str, snapshot_id: &str) -> ContextResult<Option<PathBuf>> {
        if snapshot_id.is_empty()
            || snapshot_id.starts_with('.')
            || snapshot_id.contains(['/', '\\'])
        {
            return Ok(None);
        }
        let dir = self.snapshots_dir(scope)?.join(snapshot_id);
        Ok(dir.join(MANIFEST).is_file().then_some(dir))
    }
}

fn read_manifest(dir: &Path) -> ContextResult<Snapshot> {
    let path = dir.join(MANIFEST);
    let content = fs::read_to_string(&path).map_err(|e| ContextError::io(&path, e))?;
    serde_json::from_str(&content).map_err(|e| ContextError::serialize(&path, e))
}

fn sanitize_trigger(trigger: &str) -> String {
    let cleaned: String = trigger
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}

/// `<UTC timestamp>-<trigger>`, with `-N` appended if that directory already exists.
fn unique_id(dir: &Path, now: DateTime<Utc>, trigger: &str) -> String {
    let base = format!(
        "{}-{}",
        now.format("%Y%m%dT%H%M%S%6fZ"),
        sanitize_trigger(trigger)
    );
    if !dir.join(&base).exists() {
        return base;
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !dir.join(candidate).exists())
        .unwrap_or(base)
}
