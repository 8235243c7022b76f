//! Polling watcher for response files in a scratch directory.
//!
//! The directory is enumerated on every poll tick; there is no filesystem
//! notification. Only files with an allow-listed text extension count.

use crate::config::FileWatchConfig;
use crate::poll::PollClock;
use crate::types::{WatchConfig, WatchError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Modification time of every watched file, keyed by path
pub type FileSetSnapshot = BTreeMap<PathBuf, SystemTime>;

/// A file that changed relative to a baseline, with its content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub content: String,
    pub modified: SystemTime,
}

/// Watches one directory for new or modified text files
#[derive(Debug, Clone)]
pub struct FileSystemWatcher {
    watch_dir: PathBuf,
    /// Lowercase extensions without the leading dot
    extensions: Vec<String>,
    recursive: bool,
}

impl FileSystemWatcher {
    pub fn new(watch_dir: PathBuf, extensions: Vec<String>, recursive: bool) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();

        Self {
            watch_dir,
            extensions,
            recursive,
        }
    }

    pub fn from_config(config: &FileWatchConfig, watch_dir: PathBuf) -> Self {
        Self::new(watch_dir, config.extensions.clone(), config.recursive)
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Create the watched directory if it does not exist yet
    pub fn ensure_dir(&self) -> Result<(), WatchError> {
        std::fs::create_dir_all(&self.watch_dir)?;
        Ok(())
    }

    fn is_watched(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Every regular file under the watch dir, regardless of extension
    fn all_files(&self) -> Vec<PathBuf> {
        let escaped = glob::Pattern::escape(&self.watch_dir.to_string_lossy());
        let pattern = if self.recursive {
            format!("{}/**/*", escaped)
        } else {
            format!("{}/*", escaped)
        };

        match glob::glob(&pattern) {
            Ok(entries) => entries
                .flatten()
                .filter(|path| path.is_file())
                .collect(),
            Err(e) => {
                warn!("Invalid watch pattern '{}': {}", pattern, e);
                Vec::new()
            }
        }
    }

    /// Current modification times of all watched files.
    ///
    /// Files that vanish or cannot be stat'ed mid-scan are skipped.
    pub fn snapshot(&self) -> FileSetSnapshot {
        self.all_files()
            .into_iter()
            .filter(|path| self.is_watched(path))
            .filter_map(|path| {
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect()
    }

    /// Wait for the first file that is new or newer than `baseline`.
    ///
    /// After a change is seen the watcher pauses for the settle delay before
    /// reading, so a slow writer can finish. A read failure leaves the file
    /// for the next tick.
    pub async fn wait_for_new_file(
        &self,
        baseline: &FileSetSnapshot,
        config: &WatchConfig,
        cancel: &CancellationToken,
    ) -> Result<ChangedFile, WatchError> {
        config.validate()?;
        info!(
            "Watching for new files in {:?} (timeout: {:?}, baseline: {} files)",
            self.watch_dir,
            config.timeout,
            baseline.len()
        );

        let clock = PollClock::start(config.timeout, cancel.clone());

        loop {
            clock.check()?;

            let changed: Vec<(PathBuf, SystemTime)> = self
                .snapshot()
                .into_iter()
                .filter(|(path, modified)| {
                    baseline
                        .get(path)
                        .map(|previous| modified > previous)
                        .unwrap_or(true)
                })
                .collect();

            if !changed.is_empty() {
                debug!(
                    "{} changed file(s), settling for {:?}",
                    changed.len(),
                    config.stabilization_delay
                );
                clock.sleep(config.stabilization_delay).await?;

                // One unreadable file must not hide the others
                for (path, modified) in changed {
                    if let Some(content) = read_lossy(&path).await {
                        info!("New file ready: {:?} after {:?}", path, clock.elapsed());
                        return Ok(ChangedFile {
                            path,
                            content,
                            modified,
                        });
                    }
                }
            }

            clock.sleep(config.poll_interval).await?;
        }
    }

    /// Wait for a file modified after `reference` and return the newest one.
    ///
    /// Used when several files may be written during one episode and only
    /// the most recent answer matters.
    pub async fn wait_for_latest_after(
        &self,
        reference: SystemTime,
        config: &WatchConfig,
        cancel: &CancellationToken,
    ) -> Result<ChangedFile, WatchError> {
        config.validate()?;
        info!(
            "Waiting for response file in {:?} modified after {}",
            self.watch_dir,
            chrono::DateTime::<chrono::Utc>::from(reference).to_rfc3339()
        );

        let clock = PollClock::start(config.timeout, cancel.clone());

        loop {
            clock.check()?;

            if let Some((path, _)) = self.newest_after(reference) {
                debug!(
                    "Found recent response {:?}, settling for {:?}",
                    path, config.stabilization_delay
                );
                clock.sleep(config.stabilization_delay).await?;

                // A later file may have landed while settling
                let (path, modified) = self
                    .newest_after(reference)
                    .unwrap_or((path, reference));

                if let Some(content) = read_lossy(&path).await {
                    info!("Response file ready: {:?} after {:?}", path, clock.elapsed());
                    return Ok(ChangedFile {
                        path,
                        content,
                        modified,
                    });
                }
            }

            clock.sleep(config.poll_interval).await?;
        }
    }

    fn newest_after(&self, reference: SystemTime) -> Option<(PathBuf, SystemTime)> {
        self.snapshot()
            .into_iter()
            .filter(|(_, modified)| *modified > reference)
            .max_by_key(|(_, modified)| *modified)
    }

    /// Delete regular files older than `max_age` anywhere under the watch dir.
    ///
    /// Returns the number of files removed. Failures are logged and skipped.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let cutoff = match SystemTime::now().checked_sub(max_age) {
            Some(cutoff) => cutoff,
            None => return 0,
        };

        let mut removed = 0;
        for path in self.all_files() {
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!("Skipping {:?} during purge: {}", path, e);
                    continue;
                }
            };

            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!("Purged old file {:?}", path);
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to purge {:?}: {}", path, e),
                }
            }
        }

        if removed > 0 {
            info!("Purged {} old files from {:?}", removed, self.watch_dir);
        }
        removed
    }
}

/// Read a file as text, replacing invalid UTF-8 sequences.
///
/// Returns `None` (after logging) when the read itself fails.
async fn read_lossy(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("Error reading {:?}, retrying next poll: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(dir: &Path) -> FileSystemWatcher {
        FileSystemWatcher::new(
            dir.to_path_buf(),
            vec!["txt".into(), ".md".into(), "JSON".into()],
            true,
        )
    }

    fn fast_config(timeout_ms: u64) -> WatchConfig {
        WatchConfig::new(
            Duration::from_millis(20),
            Duration::from_millis(timeout_ms),
            1,
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_snapshot_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        std::fs::write(dir.path().join("b.TXT"), "b").unwrap();
        std::fs::write(dir.path().join("c.png"), "c").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/d.json"), "{}").unwrap();

        let snapshot = watcher(dir.path()).snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.contains_key(&dir.path().join("sub/d.json")));
        assert!(!snapshot.contains_key(&dir.path().join("c.png")));
    }

    #[test]
    fn test_non_recursive_skips_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/d.md"), "d").unwrap();

        let flat = FileSystemWatcher::new(dir.path().to_path_buf(), vec!["md".into()], false);
        assert!(flat.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_modification_is_a_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.txt");
        std::fs::write(&path, "old").unwrap();

        let watcher = watcher(dir.path());
        let mut baseline = watcher.snapshot();
        // Pretend the baseline saw an older version
        let earlier = baseline[&path] - Duration::from_secs(10);
        baseline.insert(path.clone(), earlier);

        let changed = watcher
            .wait_for_new_file(&baseline, &fast_config(1000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(changed.path, path);
        assert_eq!(changed.content, "old");
    }

    #[tokio::test]
    async fn test_unchanged_directory_times_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.md"), "x").unwrap();

        let watcher = watcher(dir.path());
        let baseline = watcher.snapshot();
        let err = watcher
            .wait_for_new_file(&baseline, &fast_config(150), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_latest_after_ignores_older_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("before.md"), "before").unwrap();
        let reference = SystemTime::now() + Duration::from_secs(3600);

        let err = watcher(dir.path())
            .wait_for_latest_after(reference, &fast_config(150), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = WatchConfig::new(Duration::ZERO, Duration::from_secs(1), 1, Duration::ZERO);
        let err = watcher(dir.path())
            .wait_for_new_file(&FileSetSnapshot::new(), &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Configuration(_)));
    }

    #[test]
    fn test_purge_keeps_young_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.md"), "x").unwrap();
        assert_eq!(watcher(dir.path()).purge_older_than(Duration::from_secs(60)), 0);
        assert!(dir.path().join("fresh.md").exists());
    }

    #[tokio::test]
    async fn test_read_lossy_skips_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_lossy(&dir.path().join("gone.md")).await.is_none());

        let path = dir.path().join("mixed.txt");
        std::fs::write(&path, b"ok \x80 ok").unwrap();
        assert_eq!(read_lossy(&path).await.unwrap(), "ok \u{FFFD} ok");
    }
}
