//! Screen stability detection.
//!
//! The screen is captured every poll interval and each frame digest is
//! compared with the frame that started the current run. Once the same frame
//! has been seen `stabilization_count` more times the application is judged
//! to have finished drawing its answer.
//!
//! Only the first frame of the current run stays on disk: later identical
//! frames and superseded baselines are deleted as soon as they are compared.

use crate::capture::ScreenCaptureSource;
use crate::hasher::ContentHasher;
use crate::poll::PollClock;
use crate::types::{Snapshot, WatchConfig, WatchError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a stability wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableScreen {
    /// Frame that started the final identical run
    pub path: PathBuf,
    /// True when the deadline hit before the screen settled
    pub partial: bool,
    /// Frames captured during the wait
    pub captures: u32,
}

pub struct ScreenStabilityMonitor {
    source: Arc<dyn ScreenCaptureSource>,
    hasher: ContentHasher,
    capture_dir: PathBuf,
    /// File name prefix of the frames this monitor owns
    prefix: String,
    /// Baseline frame of the in-flight wait, never purged
    pinned: Mutex<Option<PathBuf>>,
}

impl ScreenStabilityMonitor {
    pub fn new(source: Arc<dyn ScreenCaptureSource>, hasher: ContentHasher, capture_dir: PathBuf) -> Self {
        Self {
            source,
            hasher,
            capture_dir,
            prefix: "monitor".to_string(),
            pinned: Mutex::new(None),
        }
    }

    /// Restrict purging to frames whose name starts with `prefix`
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn source(&self) -> &Arc<dyn ScreenCaptureSource> {
        &self.source
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    fn pinned(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.pinned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pin(&self, path: Option<PathBuf>) {
        *self.pinned() = path;
    }

    /// Capture and digest one frame; `None` when this tick produced nothing.
    async fn observe(&self) -> Option<Snapshot> {
        let path = match self.source.capture().await {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to capture screen: {}", e);
                return None;
            }
        };

        match self.hasher.digest_file(&path) {
            Ok(digest) => Some(Snapshot::new(digest, Some(path))),
            Err(e) => {
                warn!("Failed to hash screenshot {:?}: {}", path, e);
                discard(&path);
                None
            }
        }
    }

    /// Wait until `stabilization_count` consecutive frames match the run's
    /// first frame.
    ///
    /// `stabilization_delay` is a pause before the first capture. If the
    /// deadline passes (or the token is cancelled) after at least one frame
    /// was captured, the last distinct frame is returned with
    /// `partial = true` instead of an error.
    pub async fn wait_for_stable_screen(
        &self,
        config: &WatchConfig,
        cancel: &CancellationToken,
    ) -> Result<StableScreen, WatchError> {
        config.validate()?;
        info!(
            "Monitoring screen for stable state via {} capture (timeout: {:?}, need {} identical)",
            self.source.name(),
            config.timeout,
            config.stabilization_count
        );

        let clock = PollClock::start(config.timeout, cancel.clone());
        let mut baseline: Option<Snapshot> = None;
        let mut stable_counter: u32 = 0;
        let mut captures: u32 = 0;

        let outcome = async {
            clock.sleep(config.stabilization_delay).await?;

            loop {
                clock.check()?;

                if let Some(current) = self.observe().await {
                    captures += 1;
                    let same = baseline
                        .as_ref()
                        .map(|previous| self.hasher.matches(&previous.digest, &current.digest))
                        .unwrap_or(false);

                    if same {
                        stable_counter += 1;
                        if let Some(path) = &current.source_path {
                            discard(path);
                        }
                        debug!(
                            "Screen stable ({}/{})",
                            stable_counter, config.stabilization_count
                        );

                        if stable_counter >= config.stabilization_count {
                            return Ok::<(), WatchError>(());
                        }
                    } else {
                        if stable_counter > 0 {
                            debug!("Screen changed, resetting stability counter");
                        }
                        stable_counter = 0;
                        if let Some(path) = baseline.as_ref().and_then(|s| s.source_path.as_ref()) {
                            discard(path);
                        }
                        self.pin(current.source_path.clone());
                        baseline = Some(current);
                    }
                }

                clock.sleep(config.poll_interval).await?;
            }
        }
        .await;

        self.pin(None);
        let baseline_path = baseline.and_then(|snapshot| snapshot.source_path);

        match (outcome, baseline_path) {
            (Ok(()), Some(path)) => {
                info!("Screen stable after {:?} ({} captures)", clock.elapsed(), captures);
                Ok(StableScreen {
                    path,
                    partial: false,
                    captures,
                })
            }
            (Err(e), Some(path)) if e.is_timeout() => {
                info!("Timeout reached, returning last screenshot {:?}", path);
                Ok(StableScreen {
                    path,
                    partial: true,
                    captures,
                })
            }
            (Err(e), _) => Err(e),
            // A run only completes after a baseline was recorded
            (Ok(()), None) => Err(clock.timeout_error()),
        }
    }

    /// Delete this monitor's frames older than `max_age`, except the one an
    /// in-flight wait is comparing against.
    pub fn purge_old_captures(&self, max_age: Duration) -> usize {
        let cutoff = match SystemTime::now().checked_sub(max_age) {
            Some(cutoff) => cutoff,
            None => return 0,
        };
        let pinned = self.pinned().clone();

        let entries = match std::fs::read_dir(&self.capture_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {:?}: {}", self.capture_dir, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let owned = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(&self.prefix))
                .unwrap_or(false);
            if !owned || pinned.as_deref() == Some(path.as_path()) {
                continue;
            }

            let old = entry
                .metadata()
                .ok()
                .filter(|m| m.is_file())
                .and_then(|m| m.modified().ok())
                .map(|modified| modified < cutoff)
                .unwrap_or(false);

            if old {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to purge {:?}: {}", path, e),
                }
            }
        }

        if removed > 0 {
            info!("Purged {} old captures from {:?}", removed, self.capture_dir);
        }
        removed
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Could not remove frame {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a scripted sequence of frames; the last one repeats forever
    struct ScriptedSource {
        dir: PathBuf,
        frames: Vec<&'static str>,
        next: AtomicUsize,
    }

    #[async_trait]
    impl ScreenCaptureSource for ScriptedSource {
        async fn capture(&self) -> Result<PathBuf, WatchError> {
            let index = self.next.fetch_add(1, Ordering::SeqCst);
            let frame = self.frames[index.min(self.frames.len() - 1)];
            let path = self.dir.join(format!("monitor_{}.png", index));
            std::fs::write(&path, frame.as_bytes())?;
            Ok(path)
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn monitor(dir: &Path, frames: Vec<&'static str>) -> ScreenStabilityMonitor {
        let source = ScriptedSource {
            dir: dir.to_path_buf(),
            frames,
            next: AtomicUsize::new(0),
        };
        ScreenStabilityMonitor::new(Arc::new(source), ContentHasher::exact(), dir.to_path_buf())
    }

    fn config(count: u32, timeout_ms: u64) -> WatchConfig {
        WatchConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(timeout_ms),
            count,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_returns_first_frame_of_stable_run() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor(dir.path(), vec!["a", "b", "c", "c", "c"]);

        let stable = monitor
            .wait_for_stable_screen(&config(2, 2000), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!stable.partial);
        assert_eq!(stable.path, dir.path().join("monitor_2.png"));
        assert_eq!(stable.captures, 5);
        // Superseded and duplicate frames are gone
        let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_skips_other_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("monitor_old.png"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.png"), b"x").unwrap();

        let monitor = monitor(dir.path(), vec!["a"]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(monitor.purge_old_captures(Duration::ZERO), 1);
        assert!(dir.path().join("keep.png").exists());
    }
}
