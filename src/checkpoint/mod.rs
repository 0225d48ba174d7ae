//! Checkpoint persistence
//!
//! Saves and restores `CheckpointSnapshot`s as JSON. Next to the main file
//! the manager keeps:
//! - `<path>.tmp`: written and synced before the atomic rename
//! - `<path>.backup`: the previous checkpoint, copied before each rename
//! - `<path>.emergency`: written directly when the final save fails
//!
//! Save and load never return errors. Failures are logged and the crawl
//! carries on.

mod snapshot;

pub use snapshot::{CheckpointSnapshot, CHECKPOINT_VERSION};

use crate::CheckpointError;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".backup";
const EMERGENCY_SUFFIX: &str = ".emergency";

/// Minimum page progress that triggers a save on its own
const MIN_PROGRESS_DELTA: u64 = 10;

#[derive(Debug)]
pub struct CheckpointManager {
    path: PathBuf,
    auto_save_interval: Duration,
    last_save: Instant,
    last_pages: u64,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>, auto_save_interval: Duration) -> Self {
        Self {
            path: path.into(),
            auto_save_interval,
            last_save: Instant::now(),
            last_pages: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn companion(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.companion(BACKUP_SUFFIX)
    }

    pub fn emergency_path(&self) -> PathBuf {
        self.companion(EMERGENCY_SUFFIX)
    }

    /// True when enough time or progress has passed since the last save
    ///
    /// Progress counts when at least `max(10, 5% of pages_visited)` pages
    /// completed since the last save.
    pub fn should_save(&self, pages_visited: u64, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_save) >= self.auto_save_interval {
            return true;
        }
        let delta = pages_visited.saturating_sub(self.last_pages);
        delta >= MIN_PROGRESS_DELTA.max(pages_visited / 20)
    }

    /// Writes a checkpoint
    ///
    /// # Arguments
    ///
    /// * `snapshot` - The state to persist
    /// * `force` - Skip the time/progress gate
    ///
    /// # Returns
    ///
    /// True if a checkpoint was written, by the atomic path or the direct
    /// fallback.
    pub fn save(&mut self, snapshot: &CheckpointSnapshot, force: bool) -> bool {
        let now = Instant::now();
        if !force && !self.should_save(snapshot.pages_visited, now) {
            return false;
        }

        let json = match snapshot.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize checkpoint: {}", e);
                return false;
            }
        };

        if let Err(e) = self.write_atomic(&json) {
            tracing::warn!(
                "Atomic checkpoint write to {} failed: {}, writing directly",
                self.path.display(),
                e
            );
            if let Err(e) = write_file(&self.path, &json) {
                tracing::error!("Failed to save checkpoint to {}: {}", self.path.display(), e);
                return false;
            }
        }

        self.last_save = now;
        self.last_pages = snapshot.pages_visited;
        tracing::debug!(
            "Checkpoint saved: {} visited, {} queued, {} pending",
            snapshot.visited.len(),
            snapshot.frontier.len(),
            snapshot.pending.len()
        );
        true
    }

    fn write_atomic(&self, json: &str) -> Result<(), CheckpointError> {
        let tmp = self.companion(TMP_SUFFIX);
        write_file(&tmp, json)?;

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                tracing::warn!("Failed to back up previous checkpoint: {}", e);
            }
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Writes the snapshot straight to the emergency file, ungated
    pub fn save_emergency(&self, snapshot: &CheckpointSnapshot) -> bool {
        let path = self.emergency_path();
        let result = snapshot
            .to_json()
            .and_then(|json| write_file(&path, &json));

        match result {
            Ok(()) => {
                tracing::warn!("Emergency checkpoint written to {}", path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to write emergency checkpoint: {}", e);
                false
            }
        }
    }

    /// Loads the most recent valid checkpoint
    ///
    /// The emergency file wins only when it is strictly newer than the main
    /// file. The backup is read only when neither is usable.
    pub fn load(&self) -> Option<CheckpointSnapshot> {
        let primary = read_snapshot(&self.path);
        let emergency = read_snapshot(&self.emergency_path());

        let chosen = match (primary, emergency) {
            (Some(primary), Some(emergency)) => {
                if emergency.checkpoint_time > primary.checkpoint_time {
                    tracing::warn!("Using newer emergency checkpoint");
                    Some(emergency)
                } else {
                    Some(primary)
                }
            }
            (Some(primary), None) => Some(primary),
            (None, Some(emergency)) => {
                tracing::warn!("Main checkpoint unusable, using emergency checkpoint");
                Some(emergency)
            }
            (None, None) => None,
        };

        chosen.or_else(|| {
            let backup = read_snapshot(&self.backup_path());
            if backup.is_some() {
                tracing::warn!("Falling back to backup checkpoint");
            }
            backup
        })
    }

    /// Deletes the checkpoint and its companion files
    pub fn clear(&self) {
        for path in [
            self.path.clone(),
            self.companion(TMP_SUFFIX),
            self.backup_path(),
            self.emergency_path(),
        ] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Option<CheckpointSnapshot> {
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Failed to read checkpoint {}: {}", path.display(), e);
            return None;
        }
    };

    match CheckpointSnapshot::from_json(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            tracing::warn!("Ignoring invalid checkpoint {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{FrontierSnapshot, UrlRecord};
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn create_test_snapshot(pages: u64) -> CheckpointSnapshot {
        CheckpointSnapshot::new(
            FrontierSnapshot {
                visited: vec!["https://example.com/".to_string()],
                frontier: vec![UrlRecord::new("https://example.com/b", 1)],
                pending: vec![UrlRecord::new("https://example.com/a", 1)],
            },
            pages,
        )
    }

    fn manager_in(dir: &TempDir) -> CheckpointManager {
        CheckpointManager::new(dir.path().join("crawl.json"), Duration::from_secs(300))
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);
        let snapshot = create_test_snapshot(1);

        assert!(manager.save(&snapshot, true));
        assert!(manager.path().exists());
        assert!(!dir.path().join("crawl.json.tmp").exists());
        assert_eq!(manager.load(), Some(snapshot));
    }

    #[test]
    fn test_save_falls_back_to_direct_write() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);
        assert!(manager.save(&create_test_snapshot(1), true));

        // A directory in the temp file's place breaks the atomic path
        fs::create_dir(dir.path().join("crawl.json.tmp")).unwrap();
        let snapshot = create_test_snapshot(2);

        assert!(manager.save(&snapshot, true));
        assert_eq!(manager.load(), Some(snapshot));
        assert!(dir.path().join("crawl.json.tmp").is_dir());
    }

    #[test]
    fn test_save_is_gated() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);

        assert!(!manager.save(&create_test_snapshot(3), false));
        assert!(!manager.path().exists());

        // 10 pages of progress is enough on its own
        assert!(manager.save(&create_test_snapshot(10), false));
        assert!(!manager.save(&create_test_snapshot(15), false));
    }

    #[test]
    fn test_should_save() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);
        let now = Instant::now();

        assert!(!manager.should_save(0, now));
        assert!(manager.should_save(0, now + Duration::from_secs(300)));

        manager.last_pages = 1000;
        // 5% of 1040 is 52
        assert!(!manager.should_save(1040, now));
        assert!(manager.should_save(1060, now));
    }

    #[test]
    fn test_second_save_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);

        let first = create_test_snapshot(1);
        let mut second = create_test_snapshot(2);
        second.visited.push("https://example.com/a".to_string());

        assert!(manager.save(&first, true));
        assert!(manager.save(&second, true));

        let backup = read_snapshot(&manager.backup_path()).unwrap();
        assert_eq!(backup.pages_visited, 1);
        assert_eq!(manager.load().unwrap().pages_visited, 2);
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir);
        assert_eq!(manager.load(), None);

        fs::write(manager.path(), "{ truncated").unwrap();
        assert_eq!(manager.load(), None);

        fs::write(manager.path(), r#"{"visited": [], "frontier": []}"#).unwrap();
        assert_eq!(manager.load(), None);
    }

    #[test]
    fn test_corrupt_main_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);

        assert!(manager.save(&create_test_snapshot(1), true));
        assert!(manager.save(&create_test_snapshot(2), true));
        fs::write(manager.path(), "garbage").unwrap();

        assert_eq!(manager.load().unwrap().pages_visited, 1);
    }

    #[test]
    fn test_emergency_preferred_only_when_newer() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);

        let regular = create_test_snapshot(5);
        assert!(manager.save(&regular, true));

        let mut older = create_test_snapshot(1);
        older.checkpoint_time = regular.checkpoint_time - ChronoDuration::seconds(60);
        assert!(manager.save_emergency(&older));
        assert_eq!(manager.load().unwrap().pages_visited, 5);

        let mut newer = create_test_snapshot(9);
        newer.checkpoint_time = regular.checkpoint_time + ChronoDuration::seconds(60);
        assert!(manager.save_emergency(&newer));
        assert_eq!(manager.load().unwrap().pages_visited, 9);
    }

    #[test]
    fn test_emergency_used_when_main_missing() {
        let dir = TempDir::new().unwrap();
        let manager = manager_in(&dir);
        assert!(manager.save_emergency(&create_test_snapshot(4)));
        assert_eq!(manager.load().unwrap().pages_visited, 4);
    }

    #[test]
    fn test_clear_removes_all_files() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_in(&dir);
        assert!(manager.save(&create_test_snapshot(1), true));
        assert!(manager.save(&create_test_snapshot(2), true));
        assert!(manager.save_emergency(&create_test_snapshot(3)));

        manager.clear();
        assert!(!manager.path().exists());
        assert!(!manager.backup_path().exists());
        assert!(!manager.emergency_path().exists());
        assert_eq!(manager.load(), None);
    }

    #[test]
    fn test_save_into_missing_directory() {
        let dir = TempDir::new().unwrap();
        let mut manager = CheckpointManager::new(
            dir.path().join("nested/state/crawl.json"),
            Duration::from_secs(300),
        );
        assert!(manager.save(&create_test_snapshot(1), true));
        assert!(manager.load().is_some());
    }
}
