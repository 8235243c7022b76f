//! System pasteboard access and change detection.

use crate::config::ClipboardConfig;
use crate::poll::PollClock;
use crate::types::{WatchConfig, WatchError};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read/write access to the system pasteboard
#[async_trait]
pub trait Pasteboard: Send + Sync {
    async fn read(&self) -> Result<String, WatchError>;

    async fn write(&self, text: &str) -> Result<(), WatchError>;

    /// Whether the pasteboard can be reached at all
    fn is_available(&self) -> bool;
}

/// Pasteboard driven by external commands (`pbpaste` / `pbcopy` on macOS)
#[derive(Debug, Clone)]
pub struct CommandPasteboard {
    read_cmd: Vec<String>,
    write_cmd: Vec<String>,
}

impl CommandPasteboard {
    pub fn new(read_cmd: Vec<String>, write_cmd: Vec<String>) -> Self {
        Self {
            read_cmd,
            write_cmd,
        }
    }

    pub fn from_config(config: &ClipboardConfig) -> Self {
        Self::new(config.read_command.clone(), config.write_command.clone())
    }

    fn split(cmd: &[String]) -> Result<(&String, &[String]), WatchError> {
        cmd.split_first().ok_or_else(|| {
            WatchError::Configuration("clipboard command must not be empty".to_string())
        })
    }
}

#[async_trait]
impl Pasteboard for CommandPasteboard {
    async fn read(&self) -> Result<String, WatchError> {
        let (program, args) = Self::split(&self.read_cmd)?;

        let output = Command::new(program)
            .args(args)
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WatchError::AutomationFailure(format!("Failed to read clipboard: {}", e)))?;

        if !output.status.success() {
            return Err(WatchError::AutomationFailure(format!(
                "Failed to read clipboard: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn write(&self, text: &str) -> Result<(), WatchError> {
        let (program, args) = Self::split(&self.write_cmd)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WatchError::AutomationFailure(format!("Failed to set clipboard: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            // Close stdin so the writer sees EOF
            drop(stdin);
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(WatchError::AutomationFailure(format!(
                "{} exited with {}",
                program, status
            )));
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        let found = |cmd: &[String]| {
            cmd.first()
                .map(|program| crate::health::locate_program(program).is_some())
                .unwrap_or(false)
        };
        found(&self.read_cmd) && found(&self.write_cmd)
    }
}

/// Detects when the pasteboard content changes from a known value
#[derive(Clone)]
pub struct ClipboardMonitor {
    pasteboard: Arc<dyn Pasteboard>,
}

impl ClipboardMonitor {
    pub fn new(pasteboard: Arc<dyn Pasteboard>) -> Self {
        Self { pasteboard }
    }

    pub fn pasteboard(&self) -> &Arc<dyn Pasteboard> {
        &self.pasteboard
    }

    pub async fn read(&self) -> Result<String, WatchError> {
        self.pasteboard.read().await
    }

    pub async fn write(&self, text: &str) -> Result<(), WatchError> {
        self.pasteboard.write(text).await
    }

    /// Poll until the pasteboard holds something non-empty and different
    /// from `initial`. Read failures are retried on the next tick.
    pub async fn wait_for_change(
        &self,
        initial: &str,
        config: &WatchConfig,
        cancel: &CancellationToken,
    ) -> Result<String, WatchError> {
        config.validate()?;
        info!("Monitoring clipboard for changes (timeout: {:?})", config.timeout);

        let clock = PollClock::start(config.timeout, cancel.clone());

        loop {
            clock.check()?;

            match self.pasteboard.read().await {
                Ok(current) => {
                    if !current.is_empty() && current != initial {
                        info!(
                            "Clipboard changed after {:?} ({} chars)",
                            clock.elapsed(),
                            current.chars().count()
                        );
                        return Ok(current);
                    }
                }
                Err(e) => warn!("Failed to read clipboard: {}", e),
            }

            clock.sleep(config.poll_interval).await?;
        }
    }

    /// Clear the pasteboard, then wait for the next non-empty value
    pub async fn wait_for_new_content(
        &self,
        config: &WatchConfig,
        cancel: &CancellationToken,
    ) -> Result<String, WatchError> {
        debug!("Clearing clipboard");
        if let Err(e) = self.pasteboard.write("").await {
            warn!("Failed to clear clipboard: {}", e);
        }

        self.wait_for_change("", config, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_pasteboard_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("board");
        let store_str = store.to_string_lossy().to_string();

        let pasteboard = CommandPasteboard::new(
            vec!["cat".into(), store_str.clone()],
            vec!["sh".into(), "-c".into(), "cat > \"$0\"".into(), store_str],
        );

        pasteboard.write("copied text").await.unwrap();
        assert_eq!(pasteboard.read().await.unwrap(), "copied text");
        assert!(pasteboard.is_available());
    }

    #[tokio::test]
    async fn test_empty_command_is_configuration_error() {
        let pasteboard = CommandPasteboard::new(vec![], vec![]);
        assert!(matches!(
            pasteboard.read().await.unwrap_err(),
            WatchError::Configuration(_)
        ));
        assert!(!pasteboard.is_available());
    }
}
