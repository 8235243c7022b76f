//! Prompt submission into the target application via AppleScript.

use crate::clipboard::Pasteboard;
use crate::config::AutomationConfig;
use crate::types::WatchError;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Return key
const KEY_RETURN: u8 = 36;

/// Run an AppleScript and return its trimmed stdout
pub async fn run_osascript(script: &str) -> Result<String, WatchError> {
    let output = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WatchError::AutomationFailure(format!("Failed to run osascript: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WatchError::AutomationFailure(format!(
            "AppleScript failed: {}",
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Quote a value for use inside an AppleScript string literal
pub fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One request handed in by the command layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub prompt: String,
    /// Model selector; recorded but not acted on
    pub model: Option<String>,
    pub target_app: String,
}

impl SubmitRequest {
    pub fn new(prompt: impl Into<String>, target_app: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            target_app: target_app.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Delivers a prompt into the target application
#[async_trait]
pub trait AppAutomation: Send + Sync {
    /// Focus the application, enter the prompt and submit it
    async fn submit(&self, request: &SubmitRequest) -> Result<(), WatchError>;

    /// Whether the automation backend can run on this machine
    fn is_available(&self) -> bool;
}

/// `osascript`-driven automation: paste via the pasteboard, then submit
pub struct OsaScriptAutomation {
    pasteboard: Arc<dyn Pasteboard>,
    input_delay: Duration,
    activate_delay: Duration,
    command_enter: bool,
}

impl OsaScriptAutomation {
    pub fn new(pasteboard: Arc<dyn Pasteboard>, config: &AutomationConfig) -> Self {
        Self {
            pasteboard,
            input_delay: Duration::from_millis(config.input_delay_ms),
            activate_delay: Duration::from_millis(config.activate_delay_ms),
            command_enter: config.command_enter,
        }
    }

    /// Open and focus the application
    pub async fn activate(&self, app: &str) -> Result<(), WatchError> {
        debug!("Activating {}", app);
        let script = format!(r#"tell application "{}" to activate"#, escape_applescript(app));
        run_osascript(&script).await.map_err(|e| {
            WatchError::AutomationFailure(format!("failed to open {}: {}", app, e))
        })?;
        tokio::time::sleep(self.activate_delay).await;
        Ok(())
    }

    async fn paste(&self, text: &str) -> Result<(), WatchError> {
        self.pasteboard.write(text).await.map_err(|e| {
            WatchError::AutomationFailure(format!("failed to set clipboard: {}", e))
        })?;
        tokio::time::sleep(self.input_delay).await;

        run_osascript(r#"tell application "System Events" to keystroke "v" using command down"#)
            .await
            .map_err(|e| WatchError::AutomationFailure(format!("failed to paste: {}", e)))?;
        Ok(())
    }

    async fn press_submit(&self) -> Result<(), WatchError> {
        tokio::time::sleep(self.input_delay).await;

        let enter = format!(r#"tell application "System Events" to key code {}"#, KEY_RETURN);
        if self.command_enter {
            let command_enter = format!("{} using command down", enter);
            match run_osascript(&command_enter).await {
                Ok(_) => return Ok(()),
                Err(e) => warn!("Cmd+Enter failed, falling back to Enter: {}", e),
            }
        }

        run_osascript(&enter).await?;
        Ok(())
    }
}

#[async_trait]
impl AppAutomation for OsaScriptAutomation {
    async fn submit(&self, request: &SubmitRequest) -> Result<(), WatchError> {
        info!(
            "Submitting prompt ({} chars) to {}",
            request.prompt.chars().count(),
            request.target_app
        );

        self.activate(&request.target_app).await?;
        if let Some(model) = &request.model {
            // The target has no scriptable model picker
            info!("Model selector requested: {}", model);
        }
        self.paste(&request.prompt).await?;
        self.press_submit().await
    }

    fn is_available(&self) -> bool {
        crate::health::locate_program("osascript").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_applescript() {
        assert_eq!(escape_applescript(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_applescript(r"a\b"), r"a\\b");
        assert_eq!(escape_applescript("Antigravity"), "Antigravity");
    }

    #[test]
    fn test_submit_request_builder() {
        let request = SubmitRequest::new("fix the tests", "Antigravity").with_model("fast");
        assert_eq!(request.prompt, "fix the tests");
        assert_eq!(request.model.as_deref(), Some("fast"));
        assert_eq!(request.target_app, "Antigravity");
    }
}
