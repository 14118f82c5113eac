//! On-disk layout for session artifacts and engine state.
//!
//! ```text
//! <project>/<artifacts_dir>/<scope>/<artifact>     live working documents
//! <project>/.forge/context/<scope>/history.json    compaction history
//! <project>/.forge/context/<scope>/snapshots/<id>/ snapshot directories
//! <project>/.forge/context/<scope>/handoffs/       handoff documents
//! <project>/.forge/context/<scope>/.lock           per-session advisory lock
//! ```
//!
//! Every persisted write goes through [`atomic_write`].

use crate::errors::{ContextError, ContextResult};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A named working document read from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub text: String,
}

/// The artifacts of one session that existed when they were read.
#[derive(Debug, Clone, Default)]
pub struct SessionArtifacts {
    pub scope: String,
    pub artifacts: Vec<Artifact>,
}

impl SessionArtifacts {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// All artifact text joined in artifact order.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for artifact in &self.artifacts {
            out.push_str(&format!("=== {} ===\n", artifact.name));
            out.push_str(&artifact.text);
            if !artifact.text.ends_with('\n') {
                out.push('\n');
            }
        }
        out
    }
}

/// Filesystem-backed artifact and state store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    artifact_root: PathBuf,
    state_root: PathBuf,
    artifact_names: Vec<String>,
}

impl ArtifactStore {
    pub fn new(
        artifact_root: impl Into<PathBuf>,
        state_root: impl Into<PathBuf>,
        artifact_names: Vec<String>,
    ) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            state_root: state_root.into(),
            artifact_names,
        }
    }

    pub fn artifact_names(&self) -> &[String] {
        &self.artifact_names
    }

    pub fn session_dir(&self, scope: &str) -> ContextResult<PathBuf> {
        validate_scope(scope)?;
        Ok(self.artifact_root.join(scope))
    }

    pub fn state_dir(&self, scope: &str) -> ContextResult<PathBuf> {
        validate_scope(scope)?;
        Ok(self.state_root.join(scope))
    }

    pub fn artifact_path(&self, scope: &str, name: &str) -> ContextResult<PathBuf> {
        Ok(self.session_dir(scope)?.join(name))
    }

    /// Configured artifact names that exist on disk, text or not, in configured order.
    pub fn existing_artifacts(&self, scope: &str) -> ContextResult<Vec<String>> {
        let dir = self.session_dir(scope)?;
        Ok(self
            .artifact_names
            .iter()
            .filter(|name| dir.join(name).is_file())
            .cloned()
            .collect())
    }

    /// Read every configured artifact that currently exists. Missing files are skipped,
    /// and so are files that are not valid UTF-8.
    pub fn load(&self, scope: &str) -> ContextResult<SessionArtifacts> {
        let dir = self.session_dir(scope)?;
        let mut artifacts = Vec::new();

        for name in &self.artifact_names {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| ContextError::io(&path, e))?;
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        scope,
                        artifact = %name,
                        error = %e.utf8_error(),
                        "skipping artifact that is not valid UTF-8"
                    );
                    continue;
                }
            };
            artifacts.push(Artifact {
                name: name.clone(),
                text,
            });
        }

        Ok(SessionArtifacts {
            scope: scope.to_string(),
            artifacts,
        })
    }

    pub fn write_artifact(&self, scope: &str, name: &str, text: &str) -> ContextResult<()> {
        self.write_artifact_bytes(scope, name, text.as_bytes())
    }

    pub fn write_artifact_bytes(&self, scope: &str, name: &str, bytes: &[u8]) -> ContextResult<()> {
        let path = self.artifact_path(scope, name)?;
        atomic_write(&path, bytes)
    }

    pub fn remove_artifact(&self, scope: &str, name: &str) -> ContextResult<()> {
        let path = self.artifact_path(scope, name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContextError::io(&path, e)),
        }
    }

    /// Take the session's exclusive lock, failing fast if another operation holds it.
    pub fn lock(&self, scope: &str) -> ContextResult<SessionLock> {
        let dir = self.state_dir(scope)?;
        fs::create_dir_all(&dir).map_err(|e| ContextError::io(&dir, e))?;

        let path = dir.join(".lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| ContextError::io(&path, e))?;

        file.try_lock_exclusive()
            .map_err(|_| ContextError::SessionBusy {
                scope: scope.to_string(),
            })?;

        Ok(SessionLock { file })
    }
}

/// Held for the duration of a mutating session operation; released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: fs::File,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Scopes become directory names, so they must be a single plain path segment.
pub fn validate_scope(scope: &str) -> ContextResult<()> {
    let valid = !scope.is_empty()
        && scope != "."
        && scope != ".."
        && !scope.contains(['/', '\\'])
        && !scope.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ContextError::InvalidScope {
            scope: scope.to_string(),
        })
    }
}

/// Write to a temporary sibling and rename over the target.
pub fn atomic_write(path: &Path, content: &[u8]) -> ContextResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| ContextError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(ContextError::io(&temp_path, e));
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(ContextError::io(path, e));
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> ContextResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| ContextError::serialize(path, e))?;
    atomic_write(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(root: &Path) -> ArtifactStore {
        ArtifactStore::new(
            root.join("specs"),
            root.join(".forge/context"),
            vec!["spec.md".into(), "plan.md".into(), "tasks.md".into()],
        )
    }

    #[test]
    fn test_load_skips_missing_artifacts() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_artifact("001-auth", "spec.md", "# Spec").unwrap();
        store.write_artifact("001-auth", "tasks.md", "- [ ] one").unwrap();

        let session = store.load("001-auth").unwrap();
        let names: Vec<_> = session.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["spec.md", "tasks.md"]);
        assert_eq!(session.get("spec.md").unwrap().text, "# Spec");
    }

    #[test]
    fn test_load_skips_non_utf8_artifact() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.write_artifact("001-auth", "spec.md", "# Spec").unwrap();
        store
            .write_artifact_bytes("001-auth", "plan.md", b"caf\xe9")
            .unwrap();

        let session = store.load("001-auth").unwrap();
        let names: Vec<_> = session.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["spec.md"]);
        assert_eq!(
            store.existing_artifacts("001-auth").unwrap(),
            vec!["spec.md", "plan.md"]
        );
    }

    #[test]
    fn test_load_of_unknown_session_is_empty() {
        let dir = tempdir().unwrap();
        let session = store(dir.path()).load("nothing-here").unwrap();
        assert!(session.is_empty());
    }

    #[test]
    fn test_invalid_scopes_rejected() {
        for scope in ["", ".", "..", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(
                    validate_scope(scope),
                    Err(ContextError::InvalidScope { .. })
                ),
                "scope {:?} should be rejected",
                scope
            );
        }
        assert!(validate_scope("001-user-auth").is_ok());
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/file.md");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_remove_artifact_missing_is_ok() {
        let dir = tempdir().unwrap();
        assert!(store(dir.path()).remove_artifact("s", "plan.md").is_ok());
    }

    #[test]
    fn test_lock_is_exclusive_per_session() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        let guard = store.lock("001-auth").unwrap();
        assert!(matches!(
            store.lock("001-auth"),
            Err(ContextError::SessionBusy { .. })
        ));
        // Other sessions never contend.
        assert!(store.lock("002-billing").is_ok());

        drop(guard);
        assert!(store.lock("001-auth").is_ok());
    }

    #[test]
    fn test_combined_text_labels_artifacts() {
        let session = SessionArtifacts {
            scope: "s".into(),
            artifacts: vec![
                Artifact {
                    name: "spec.md".into(),
                    text: "a".into(),
                },
                Artifact {
                    name: "plan.md".into(),
                    text: "b\n".into(),
                },
            ],
        };
        assert_eq!(session.combined_text(), "=== spec.md ===\na\n=== plan.md ===\nb\n");
    }
}
