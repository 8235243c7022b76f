//! Core types used throughout the response watcher.
//!
//! This module defines the watch tunables, the snapshot and result records
//! exchanged between the strategies and the orchestrator, and the error
//! taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Length of an exact (SHA-256) frame digest in bytes
pub const DIGEST_LEN: usize = 32;

/// Polling tunables for a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Pause between two polls
    pub poll_interval: Duration,
    /// Wall-clock deadline measured from the start of the wait
    pub timeout: Duration,
    /// Consecutive identical observations required before declaring stability
    pub stabilization_count: u32,
    /// Pause after a change is detected, before the artifact is read
    pub stabilization_delay: Duration,
}

impl WatchConfig {
    pub fn new(
        poll_interval: Duration,
        timeout: Duration,
        stabilization_count: u32,
        stabilization_delay: Duration,
    ) -> Self {
        Self {
            poll_interval,
            timeout,
            stabilization_count,
            stabilization_delay,
        }
    }

    /// Reject configurations that can never succeed before timing out.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.poll_interval.is_zero() {
            return Err(WatchError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.stabilization_count == 0 {
            return Err(WatchError::Configuration(
                "stabilization count must be at least 1".to_string(),
            ));
        }
        let minimum = self.poll_interval.saturating_mul(self.stabilization_count);
        if self.timeout <= minimum {
            return Err(WatchError::Configuration(format!(
                "timeout {:?} must exceed poll interval x stabilization count ({:?})",
                self.timeout, minimum
            )));
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
            stabilization_count: 1,
            stabilization_delay: Duration::from_secs(3),
        }
    }
}

/// Detection strategy selectable by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// First new or modified file in the responses directory
    FileNew,
    /// Most recently modified file written after the submission instant
    FileLatest,
    /// New non-empty pasteboard content
    Clipboard,
    /// Screen stops changing
    Screen,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::FileNew,
        StrategyKind::FileLatest,
        StrategyKind::Clipboard,
        StrategyKind::Screen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::FileNew => "file_new",
            StrategyKind::FileLatest => "file_latest",
            StrategyKind::Clipboard => "clipboard",
            StrategyKind::Screen => "screen",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "file_new" | "file" => Ok(StrategyKind::FileNew),
            "file_latest" | "latest" => Ok(StrategyKind::FileLatest),
            "clipboard" | "pasteboard" => Ok(StrategyKind::Clipboard),
            "screen" | "screenshot" => Ok(StrategyKind::Screen),
            other => Err(WatchError::Configuration(format!(
                "unknown strategy '{}'",
                other
            ))),
        }
    }
}

/// Digest of one captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDigest {
    /// SHA-256 over the raw file bytes
    Exact([u8; DIGEST_LEN]),
    /// 64-bit average hash of the decoded image
    Perceptual(u64),
}

impl FrameDigest {
    pub fn to_hex(&self) -> String {
        match self {
            FrameDigest::Exact(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
            FrameDigest::Perceptual(hash) => format!("{:016x}", hash),
        }
    }
}

/// One observation of the screen
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub digest: FrameDigest,
    pub captured_at: DateTime<Utc>,
    pub source_path: Option<PathBuf>,
}

impl Snapshot {
    pub fn new(digest: FrameDigest, source_path: Option<PathBuf>) -> Self {
        Self {
            digest,
            captured_at: Utc::now(),
            source_path,
        }
    }
}

/// What an episode produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResultPayload {
    Text(String),
    ImagePath(PathBuf),
}

/// Final, immutable result of one completion episode
#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    payload: ResultPayload,
    strategy: StrategyKind,
    #[serde(with = "duration_millis")]
    elapsed: Duration,
    partial: bool,
    source_path: Option<PathBuf>,
}

impl CompletionResult {
    pub fn new(
        payload: ResultPayload,
        strategy: StrategyKind,
        elapsed: Duration,
        partial: bool,
        source_path: Option<PathBuf>,
    ) -> Self {
        Self {
            payload,
            strategy,
            elapsed,
            partial,
            source_path,
        }
    }

    pub fn payload(&self) -> &ResultPayload {
        &self.payload
    }

    /// Strategy that produced the result
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Time spent waiting, from episode start to resolution
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// True when the screen strategy hit its deadline and returned the last frame
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Artifact the payload was read from, if any
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            ResultPayload::Text(text) => Some(text),
            ResultPayload::ImagePath(_) => None,
        }
    }
}

/// How an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Success,
    Timeout,
    Failed,
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeState {
    Idle,
    Submitted,
    Watching,
    Extracting,
    Resolved(Resolution),
}

impl EpisodeState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: EpisodeState) -> bool {
        use EpisodeState::*;
        matches!(
            (self, next),
            (Idle, Submitted)
                | (Resolved(_), Submitted)
                | (Submitted, Watching)
                | (Watching, Extracting)
                | (Submitted, Resolved(_))
                | (Watching, Resolved(_))
                | (Extracting, Resolved(_))
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EpisodeState::Submitted | EpisodeState::Watching | EpisodeState::Extracting
        )
    }
}

/// Errors that can occur while driving or observing the target application
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Automation failed: {0}")]
    AutomationFailure(String),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Another episode is still running for this target")]
    EpisodeInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WatchError::Timeout { .. })
    }

    /// Text shown to the person waiting on the answer.
    ///
    /// Always names the elapsed wait and the manual fallback.
    pub fn user_message(&self, elapsed: Duration) -> String {
        let waited = elapsed.as_secs();
        let headline = match self {
            WatchError::Timeout { .. } => "⏱️ No response detected".to_string(),
            WatchError::AutomationFailure(msg) => format!("❌ Could not drive the application: {}", msg),
            WatchError::Extraction(e) => format!("⚠️ Could not read the response: {}", e),
            WatchError::Configuration(msg) => format!("⚠️ Watch misconfigured: {}", msg),
            WatchError::EpisodeInProgress => "⏳ Still waiting on the previous request".to_string(),
            WatchError::Io(e) => format!("❌ Storage error: {}", e),
        };
        format!(
            "{} (waited {}s). Use the screenshot command to check the application manually.",
            headline, waited
        )
    }
}

/// Errors raised by the text recognition path
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Recognition engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Recognition engine failed: {0}")]
    EngineFailed(String),

    #[error("No text recognized")]
    NoContent,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
