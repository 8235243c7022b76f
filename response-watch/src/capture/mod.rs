//! Screen capture sources.
//!
//! Every visual strategy asks a [`ScreenCaptureSource`] for a fresh frame and
//! gets back the path of a PNG in the screenshots directory. Three ways of
//! producing that frame are supported:
//! - Direct: in-process display capture
//! - Command: an external capture command (`screencapture` on macOS)
//! - Shortcut: the OS screenshot shortcut, collected from the Desktop

pub mod display;
pub mod shortcut;

use crate::config::{CaptureMode, ScreenConfig};
use crate::health::locate_program;
use crate::types::WatchError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use display::DisplayId;
use shortcut::ShortcutCapture;

/// Produces one raster snapshot of the screen per call
#[async_trait]
pub trait ScreenCaptureSource: Send + Sync {
    /// Capture a frame and return the path of the written file
    async fn capture(&self) -> Result<PathBuf, WatchError>;

    /// Whether the underlying capture mechanism looks usable
    fn is_available(&self) -> bool;

    /// Short name for logs and health output
    fn name(&self) -> &'static str;
}

/// Capture service writing frames into a scratch directory
pub struct CaptureService {
    mode: CaptureMode,
    output_dir: PathBuf,
    /// File name prefix for frames
    prefix: String,
    command: Vec<String>,
    display_id: Option<DisplayId>,
    shortcut: ShortcutCapture,
    /// Captures taken so far (for debugging/metrics)
    capture_count: AtomicU64,
}

impl CaptureService {
    pub fn new(mode: CaptureMode, output_dir: PathBuf, command: Vec<String>) -> Self {
        Self {
            mode,
            output_dir,
            prefix: "monitor".to_string(),
            command,
            display_id: None,
            shortcut: ShortcutCapture::new(
                ShortcutCapture::default_watch_dir(),
                Duration::from_millis(1500),
            ),
            capture_count: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ScreenConfig, output_dir: PathBuf) -> Self {
        let shortcut_dir = config
            .shortcut_dir
            .clone()
            .unwrap_or_else(ShortcutCapture::default_watch_dir);

        let mut service = Self::new(config.capture_mode, output_dir, config.capture_command.clone());
        service.display_id = config.display_id;
        service.shortcut =
            ShortcutCapture::new(shortcut_dir, Duration::from_millis(config.shortcut_wait_ms));
        service
    }

    /// Use a different file name prefix (e.g. `screen` for user-requested shots)
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of frames captured by this service
    pub fn capture_count(&self) -> u64 {
        self.capture_count.load(Ordering::Relaxed)
    }

    /// Fresh, unique output path
    fn next_path(&self) -> PathBuf {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        let seq = self.capture_count.fetch_add(1, Ordering::Relaxed);
        self.output_dir
            .join(format!("{}_{}_{}.png", self.prefix, nanos, seq))
    }

    async fn capture_direct(&self, path: &Path) -> Result<bool, WatchError> {
        let display_id = self.display_id.unwrap_or_else(display::main_display);
        let target = path.to_path_buf();

        tokio::task::spawn_blocking(move || display::capture_display_to(display_id, &target))
            .await
            .map_err(|e| WatchError::AutomationFailure(format!("Capture worker failed: {}", e)))?
            .map_err(|e| WatchError::AutomationFailure(format!("Failed to save capture: {}", e)))
    }

    async fn capture_with_command(&self, path: &Path) -> Result<(), WatchError> {
        let (program, args) = self.command.split_first().ok_or_else(|| {
            WatchError::Configuration("screen.capture_command is empty".to_string())
        })?;

        let path_str = path.to_string_lossy();
        let args: Vec<String> = args.iter().map(|a| a.replace("{path}", &path_str)).collect();

        let output = Command::new(program)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WatchError::AutomationFailure(format!("{} failed to start: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WatchError::AutomationFailure(format!(
                "{} failed: {}",
                program,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ScreenCaptureSource for CaptureService {
    async fn capture(&self) -> Result<PathBuf, WatchError> {
        let path = self.next_path();
        let start = std::time::Instant::now();

        match self.mode {
            CaptureMode::Direct => {
                if !self.capture_direct(&path).await? {
                    debug!("Direct capture unavailable, using capture command");
                    self.capture_with_command(&path).await?;
                }
            }
            CaptureMode::Command => self.capture_with_command(&path).await?,
            CaptureMode::Shortcut => {
                let captured = match self.shortcut.capture_to(&path).await {
                    Ok(captured) => captured,
                    Err(e) => {
                        warn!("Screenshot shortcut failed: {}", e);
                        false
                    }
                };
                if !captured {
                    debug!("Falling back to capture command");
                    self.capture_with_command(&path).await?;
                }
            }
        }

        if !path.is_file() {
            return Err(WatchError::AutomationFailure(format!(
                "Screenshot file not created: {}",
                path.display()
            )));
        }

        trace!("Captured {:?} in {:?}", path, start.elapsed());
        Ok(path)
    }

    fn is_available(&self) -> bool {
        let command_available = self
            .command
            .first()
            .map(|program| locate_program(program).is_some())
            .unwrap_or(false);

        match self.mode {
            CaptureMode::Direct => display::screen_recording_available() || command_available,
            CaptureMode::Command | CaptureMode::Shortcut => command_available,
        }
    }

    fn name(&self) -> &'static str {
        match self.mode {
            CaptureMode::Direct => "direct",
            CaptureMode::Command => "command",
            CaptureMode::Shortcut => "shortcut",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_path_is_unique() {
        let service = CaptureService::new(CaptureMode::Command, PathBuf::from("/tmp"), vec![]);
        let a = service.next_path();
        let b = service.next_path();
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("monitor_"));
        assert_eq!(service.capture_count(), 2);
    }

    #[test]
    fn test_with_prefix() {
        let service = CaptureService::new(CaptureMode::Command, PathBuf::from("/tmp"), vec![])
            .with_prefix("screen");
        assert!(service
            .next_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("screen_"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf frame > \"$0\"".to_string(),
            "{path}".to_string(),
        ];
        let service = CaptureService::new(CaptureMode::Command, dir.path().to_path_buf(), command);

        let path = service.capture().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"frame");
        assert!(service.is_available());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_automation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let service = CaptureService::new(CaptureMode::Command, dir.path().to_path_buf(), command);

        let err = service.capture().await.unwrap_err();
        assert!(matches!(err, WatchError::AutomationFailure(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = CaptureService::new(CaptureMode::Command, dir.path().to_path_buf(), vec![]);
        assert!(matches!(
            service.capture().await.unwrap_err(),
            WatchError::Configuration(_)
        ));
    }
}
