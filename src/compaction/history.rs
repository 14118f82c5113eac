//! Per-session compaction history.
//!
//! Entries are appended once at compaction time and mutated at most once, when a
//! reversal succeeds. Nothing is ever deleted. The log lives in
//! `<state>/<scope>/history.json` and is rewritten atomically on every change.

use super::budget::Level;
use crate::errors::{ContextError, ContextResult};
use crate::store::{ArtifactStore, atomic_write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const HISTORY_FILE: &str = "history.json";

/// A persisted record of one compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub history_id: String,
    pub session_scope: String,
    pub produced_at: DateTime<Utc>,
    pub level: Level,
    pub tokens_before: usize,
    pub tokens_after: usize,
    #[serde(default)]
    pub items_reduced: usize,
    /// Snapshot taken immediately before the compaction.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub reverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn tokens_saved(&self) -> usize {
        self.tokens_before.saturating_sub(self.tokens_after)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    entries: Vec<HistoryEntry>,
}

/// Reads and writes the history log of each session.
#[derive(Debug, Clone)]
pub struct CompactionHistory {
    store: ArtifactStore,
}

impl CompactionHistory {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }

    fn path(&self, scope: &str) -> ContextResult<PathBuf> {
        Ok(self.store.state_dir(scope)?.join(HISTORY_FILE))
    }

    fn read(&self, scope: &str) -> ContextResult<HistoryFile> {
        let path = self.path(scope)?;
        if !path.exists() {
            return Ok(HistoryFile::default());
        }
        let content = fs::read_to_string(&path).map_err(|e| ContextError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| ContextError::serialize(&path, e))
    }

    fn write(&self, scope: &str, file: &HistoryFile) -> ContextResult<()> {
        atomic_write_json(&self.path(scope)?, file)
    }

    /// Entries in the order they were recorded.
    pub fn list(&self, scope: &str) -> ContextResult<Vec<HistoryEntry>> {
        Ok(self.read(scope)?.entries)
    }

    pub fn get(&self, scope: &str, history_id: &str) -> ContextResult<Option<HistoryEntry>> {
        Ok(self
            .read(scope)?
            .entries
            .into_iter()
            .find(|e| e.history_id == history_id))
    }

    pub(crate) fn append(&self, entry: HistoryEntry) -> ContextResult<()> {
        let mut file = self.read(&entry.session_scope)?;
        let scope = entry.session_scope.clone();
        file.entries.push(entry);
        self.write(&scope, &file)
    }

    /// Flip an entry to reverted. Returns false if the id is unknown or already reverted.
    pub(crate) fn mark_reverted(
        &self,
        scope: &str,
        history_id: &str,
        at: DateTime<Utc>,
    ) -> ContextResult<bool> {
        let mut file = self.read(scope)?;
        let Some(entry) = file
            .entries
            .iter_mut()
            .find(|e| e.history_id == history_id && !e.reverted)
        else {
            return Ok(false);
        };
        entry.reverted = true;
        entry.reverted_at = Some(at);
        self.write(scope, &file)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn history(root: &std::path::Path) -> CompactionHistory {
        CompactionHistory::new(ArtifactStore::new(
            root.join("specs"),
            root.join("state"),
            vec!["spec.md".into()],
        ))
    }

    fn entry(id: &str, scope: &str) -> HistoryEntry {
        HistoryEntry {
            history_id: id.to_string(),
            session_scope: scope.to_string(),
            produced_at: Utc::now(),
            level: Level::Compactable,
            tokens_before: 60_000,
            tokens_after: 42_000,
            items_reduced: 5,
            snapshot_id: Some("snap".into()),
            reverted: false,
            reverted_at: None,
        }
    }

    #[test]
    fn test_empty_history() {
        let dir = tempdir().unwrap();
        let h = history(dir.path());
        assert!(h.list("s").unwrap().is_empty());
        assert!(h.get("s", "nope").unwrap().is_none());
    }

    #[test]
    fn test_append_and_get_in_order() {
        let dir = tempdir().unwrap();
        let h = history(dir.path());
        h.append(entry("a", "s")).unwrap();
        h.append(entry("b", "s")).unwrap();

        let ids: Vec<_> = h.list("s").unwrap().into_iter().map(|e| e.history_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(h.get("s", "b").unwrap().unwrap().tokens_saved(), 18_000);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let dir = tempdir().unwrap();
        let h = history(dir.path());
        h.append(entry("a", "one")).unwrap();
        assert!(h.get("two", "a").unwrap().is_none());
    }

    #[test]
    fn test_mark_reverted_only_once() {
        let dir = tempdir().unwrap();
        let h = history(dir.path());
        h.append(entry("a", "s")).unwrap();

        let at = Utc::now();
        assert!(h.mark_reverted("s", "a", at).unwrap());
        assert!(!h.mark_reverted("s", "a", at).unwrap());
        assert!(!h.mark_reverted("s", "missing", at).unwrap());

        let stored = h.get("s", "a").unwrap().unwrap();
        assert!(stored.reverted);
        assert_eq!(stored.reverted_at, Some(at));
    }

    #[test]
    fn test_corrupt_history_is_an_error() {
        let dir = tempdir().unwrap();
        let h = history(dir.path());
        let path = dir.path().join("state/s/history.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(h.list("s"), Err(ContextError::Serialize { .. })));
    }
}
