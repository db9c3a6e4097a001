//! Session snapshots on disk
//!
//! Provides a `SessionStore` that writes sessions to a JSON file so a later
//! process can pick up cookies and tokens that are still valid.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use super::Session;

/// File name of the snapshot inside the store directory
const SNAPSHOT_FILE: &str = "sessions.json";

/// Errors that can occur when saving or loading sessions
#[derive(Debug, Error)]
pub enum StoreError {
    /// Directory creation, read or write failed
    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded
    #[error("Session store format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Wrapper struct for the snapshot stored on disk
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    /// When the snapshot was written
    saved_at: DateTime<Utc>,
    /// Sessions live at save time
    sessions: Vec<Session>,
}

/// Reads and writes session snapshots
///
/// Snapshots live in an XDG-compliant data directory
/// (`~/.local/share/courier/` on Linux) unless a directory is given.
#[derive(Debug, Clone)]
pub struct SessionStore {
    /// Directory where the snapshot file is stored
    dir: PathBuf,
}

impl SessionStore {
    /// Creates a store in the XDG data directory
    ///
    /// Returns `None` if the directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "courier")?;
        Some(Self {
            dir: project_dirs.data_dir().to_path_buf(),
        })
    }

    /// Creates a store in a custom directory
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Writes `sessions`, replacing any previous snapshot
    pub fn save(&self, sessions: &[Session]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let snapshot = Snapshot {
            saved_at: Utc::now(),
            sessions: sessions.to_vec(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        fs::write(self.path(), json)?;
        Ok(())
    }

    /// Reads the last snapshot
    ///
    /// A missing snapshot is not an error and yields no sessions.
    pub fn load(&self) -> Result<Vec<Session>, StoreError> {
        let content = match fs::read_to_string(self.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_str(&content)?;
        Ok(snapshot.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (SessionStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = SessionStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    #[test]
    fn test_save_creates_snapshot_file() {
        let (store, temp_dir) = create_test_store();
        let mut session = Session::new("example.test/", Duration::from_secs(60));
        session.cookies.insert("sid".to_string(), "abc".to_string());

        store.save(&[session]).expect("Save should succeed");

        let expected_path = temp_dir.path().join("sessions.json");
        assert!(expected_path.exists(), "Snapshot file should exist");
        let content = fs::read_to_string(&expected_path).expect("Should read file");
        assert!(content.contains("\"domain_key\""));
        assert!(content.contains("example.test/"));
        assert!(content.contains("\"sid\""));
    }

    #[test]
    fn test_load_returns_empty_when_no_snapshot() {
        let (store, _temp_dir) = create_test_store();
        let sessions = store.load().expect("Missing snapshot is not an error");
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_load_returns_saved_sessions() {
        let (store, _temp_dir) = create_test_store();
        let mut session = Session::new("example.test", Duration::from_secs(60));
        session.is_authenticated = true;
        session.auth_token = Some("t0k".to_string());

        store.save(std::slice::from_ref(&session)).expect("Save should succeed");
        let loaded = store.load().expect("Load should succeed");

        assert_eq!(loaded, vec![session]);
    }

    #[test]
    fn test_save_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("store");
        let store = SessionStore::with_dir(nested_path.clone());

        store.save(&[]).expect("Save should succeed");

        assert!(nested_path.join("sessions.json").exists());
    }

    #[test]
    fn test_load_rejects_corrupt_snapshot() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path(), "not json").unwrap();

        let result = store.load();

        assert!(matches!(result, Err(StoreError::Format(_))));
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(store) = SessionStore::new() {
            let path_str = store.dir.to_string_lossy();
            assert!(
                path_str.contains("courier"),
                "Store path should contain project name"
            );
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
