//! External text recognition engine.
//!
//! Runs a recognition program (the Swift/Vision `ocr-extractor` binary, or
//! any command with the same calling convention) on a captured image and
//! reads the recognized text from its stdout.

use super::RecognitionEngine;
use crate::config::{EngineOutput, ExtractionConfig};
use crate::types::ExtractionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

const DEFAULT_PROGRAM: &str = "ocr-extractor";

/// Recognition engine client
pub struct OcrEngine {
    /// Path to the engine binary
    binary_path: PathBuf,
    /// Arguments; `{image}` is replaced by the image path
    args: Vec<String>,
    output: EngineOutput,
    timeout: Duration,
}

impl OcrEngine {
    /// Engine at the default location with JSON output
    pub fn new() -> Self {
        Self {
            binary_path: Self::default_binary_path(),
            args: vec!["--image".into(), "{image}".into(), "--json".into()],
            output: EngineOutput::Json,
            timeout: Duration::from_secs(30),
        }
    }

    /// Create with a custom binary path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            binary_path: path,
            ..Self::new()
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        let binary_path = match &config.engine_program {
            Some(program) => crate::health::locate_program(program)
                .unwrap_or_else(|| PathBuf::from(program)),
            None => Self::default_binary_path(),
        };

        Self {
            binary_path,
            args: config.engine_args.clone(),
            output: config.engine_output,
            timeout: Duration::from_secs(config.engine_timeout_seconds),
        }
    }

    pub fn with_args(mut self, args: Vec<String>, output: EngineOutput) -> Self {
        self.args = args;
        self.output = output;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Get the default binary path
    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            // Same directory as the running binary
            exe_dir.join(DEFAULT_PROGRAM),
            // Swift build output next to the workspace
            PathBuf::from("ocr-extractor/.build/release/ocr-extractor"),
            PathBuf::from("../ocr-extractor/.build/release/ocr-extractor"),
            PathBuf::from("/usr/local/bin/ocr-extractor"),
        ];

        paths
            .into_iter()
            .find(|path| path.exists())
            .or_else(|| crate::health::locate_program(DEFAULT_PROGRAM))
            // Fails later with EngineUnavailable
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM))
    }

    fn parse_output(&self, stdout: &str) -> Result<String, ExtractionError> {
        let text = match self.output {
            EngineOutput::Plain => stdout.trim().to_string(),
            EngineOutput::Json => {
                let result: serde_json::Value = serde_json::from_str(stdout).map_err(|e| {
                    ExtractionError::EngineFailed(format!("Failed to parse output: {}", e))
                })?;

                if let Some(error) = result["error"].as_str() {
                    return Err(ExtractionError::EngineFailed(error.to_string()));
                }

                result["text"].as_str().unwrap_or("").trim().to_string()
            }
        };

        if text.is_empty() {
            return Err(ExtractionError::NoContent);
        }
        Ok(text)
    }
}

impl Default for OcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecognitionEngine for OcrEngine {
    async fn recognize(&self, image: &Path) -> Result<String, ExtractionError> {
        if !self.is_available() {
            return Err(ExtractionError::EngineUnavailable(format!(
                "recognition engine not found at {}",
                self.binary_path.display()
            )));
        }

        let image = std::fs::canonicalize(image).unwrap_or_else(|_| image.to_path_buf());
        let image_str = image.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{image}", &image_str))
            .collect();

        debug!("Running {} {:?}", self.binary_path.display(), args);
        let mut command = Command::new(&self.binary_path);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                ExtractionError::EngineFailed(format!(
                    "recognition timed out after {:?}",
                    self.timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Text recognition failed: {}", stderr.trim());
            return Err(ExtractionError::EngineFailed(stderr.trim().to_string()));
        }

        let text = self.parse_output(&String::from_utf8_lossy(&output.stdout))?;
        info!("Recognized {} chars from {:?}", text.chars().count(), image);
        Ok(text)
    }

    fn is_available(&self) -> bool {
        let exists = self.binary_path.is_file();
        if !exists {
            debug!(
                "Recognition engine not found at: {}",
                self.binary_path.display()
            );
        }
        exists
    }

    fn name(&self) -> &'static str {
        "ocr"
    }
}
