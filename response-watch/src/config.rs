//! Configuration management for the response watcher.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use crate::extractors::noise::RuleAction;
use crate::hasher::DigestAlgorithm;
use crate::orchestrator::BusyPolicy;
use crate::types::{StrategyKind, WatchConfig, WatchError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub file_watch: FileWatchConfig,

    #[serde(default)]
    pub clipboard: ClipboardConfig,

    #[serde(default)]
    pub screen: ScreenConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the watcher is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Detection strategy used for every episode
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Application that receives the prompts
    #[serde(default = "default_target_app")]
    pub target_app: String,

    /// What to do when a request arrives while an episode is running
    #[serde(default)]
    pub busy_policy: BusyPolicy,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
            strategy: default_strategy(),
            target_app: default_target_app(),
            busy_policy: BusyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the scratch tree (defaults to the local data dir)
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl StorageConfig {
    pub fn root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("response-watch")
        })
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.root().join("screenshots")
    }

    pub fn responses_dir(&self) -> PathBuf {
        self.root().join("responses")
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.root().join("notes")
    }

    /// Create every artifact directory that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<(), WatchError> {
        for dir in [self.screenshots_dir(), self.responses_dir(), self.notes_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWatchConfig {
    /// Directory to watch (defaults to `<root>/responses`)
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,

    /// File extensions treated as responses
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Descend into subdirectories
    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default = "default_file_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_file_timeout")]
    pub timeout_seconds: u64,

    /// Wait after a change before reading the file
    #[serde(default = "default_file_settle")]
    pub settle_delay_ms: u64,

    /// Response files older than this are purged before each episode
    #[serde(default = "default_file_purge")]
    pub purge_after_seconds: u64,
}

impl Default for FileWatchConfig {
    fn default() -> Self {
        Self {
            watch_dir: None,
            extensions: default_extensions(),
            recursive: true,
            poll_interval_ms: default_file_poll(),
            timeout_seconds: default_file_timeout(),
            settle_delay_ms: default_file_settle(),
            purge_after_seconds: default_file_purge(),
        }
    }
}

impl FileWatchConfig {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.timeout_seconds),
            1,
            Duration::from_millis(self.settle_delay_ms),
        )
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.purge_after_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipboardConfig {
    /// Command printing the pasteboard to stdout
    #[serde(default = "default_read_command")]
    pub read_command: Vec<String>,

    /// Command replacing the pasteboard with stdin
    #[serde(default = "default_write_command")]
    pub write_command: Vec<String>,

    #[serde(default = "default_clipboard_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_clipboard_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            read_command: default_read_command(),
            write_command: default_write_command(),
            poll_interval_ms: default_clipboard_poll(),
            timeout_seconds: default_clipboard_timeout(),
        }
    }
}

impl ClipboardConfig {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.timeout_seconds),
            1,
            Duration::ZERO,
        )
    }
}

/// How screenshots are taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// In-process display capture
    Direct,
    /// External capture command (`screencapture -x -C <path>`)
    Command,
    /// OS screenshot shortcut, picking the file up from the Desktop
    Shortcut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    #[serde(default = "default_capture_mode")]
    pub capture_mode: CaptureMode,

    /// Capture command; `{path}` is replaced by the output file
    #[serde(default = "default_capture_command")]
    pub capture_command: Vec<String>,

    /// Display to capture in direct mode (main display when unset)
    #[serde(default)]
    pub display_id: Option<u32>,

    /// Where the OS shortcut saves screenshots (Desktop when unset)
    #[serde(default)]
    pub shortcut_dir: Option<PathBuf>,

    /// Wait for the OS shortcut to write its file
    #[serde(default = "default_shortcut_wait")]
    pub shortcut_wait_ms: u64,

    /// Frame digest used for comparison
    #[serde(default)]
    pub digest: DigestAlgorithm,

    /// Hamming distance tolerated in perceptual mode (0-64)
    #[serde(default = "default_hash_sensitivity")]
    pub perceptual_threshold: u32,

    #[serde(default = "default_screen_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_screen_timeout")]
    pub timeout_seconds: u64,

    /// Consecutive identical frames before the screen counts as finished
    #[serde(default = "default_stable_count")]
    pub stabilization_count: u32,

    /// Pause before the first capture
    #[serde(default = "default_screen_settle")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_screen_purge")]
    pub purge_after_seconds: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            capture_mode: default_capture_mode(),
            capture_command: default_capture_command(),
            display_id: None,
            shortcut_dir: None,
            shortcut_wait_ms: default_shortcut_wait(),
            digest: DigestAlgorithm::default(),
            perceptual_threshold: default_hash_sensitivity(),
            poll_interval_ms: default_screen_poll(),
            timeout_seconds: default_screen_timeout(),
            stabilization_count: default_stable_count(),
            settle_delay_ms: default_screen_settle(),
            purge_after_seconds: default_screen_purge(),
        }
    }
}

impl ScreenConfig {
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_secs(self.timeout_seconds),
            self.stabilization_count,
            Duration::from_millis(self.settle_delay_ms),
        )
    }

    pub fn purge_age(&self) -> Duration {
        Duration::from_secs(self.purge_after_seconds)
    }
}

/// Output produced by the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOutput {
    /// Recognized lines on stdout
    Plain,
    /// `{"text": ..., "error": ...}` on stdout
    Json,
}

/// One configured noise filter rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseRuleConfig {
    pub pattern: String,
    #[serde(default = "default_rule_action")]
    pub action: RuleAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Run text recognition on screen captures
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Recognition engine program (searched next to the binary and on PATH)
    #[serde(default)]
    pub engine_program: Option<String>,

    /// Engine arguments; `{image}` is replaced by the capture path
    #[serde(default = "default_engine_args")]
    pub engine_args: Vec<String>,

    #[serde(default = "default_engine_output")]
    pub engine_output: EngineOutput,

    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_seconds: u64,

    /// Lines shorter than this are dropped
    #[serde(default = "default_min_line_chars")]
    pub min_line_chars: usize,

    /// Lines at least this long count as prose
    #[serde(default = "default_prose_chars")]
    pub prose_min_chars: usize,

    /// Contiguous ideographic characters that mark a line as prose
    #[serde(default = "default_ideograph_run")]
    pub ideograph_run: usize,

    /// Filtered output shorter than this triggers the safety valve...
    #[serde(default = "default_min_result_chars")]
    pub min_result_chars: usize,

    /// ...when the raw text was at least this long
    #[serde(default = "default_substantial_chars")]
    pub substantial_input_chars: usize,

    /// Ordered rules, first match wins
    #[serde(default = "default_noise_rules")]
    pub rules: Vec<NoiseRuleConfig>,

    /// Tokens that mark a line as part of the answer
    #[serde(default = "default_response_indicators")]
    pub response_indicators: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            engine_program: None,
            engine_args: default_engine_args(),
            engine_output: default_engine_output(),
            engine_timeout_seconds: default_engine_timeout(),
            min_line_chars: default_min_line_chars(),
            prose_min_chars: default_prose_chars(),
            ideograph_run: default_ideograph_run(),
            min_result_chars: default_min_result_chars(),
            substantial_input_chars: default_substantial_chars(),
            rules: default_noise_rules(),
            response_indicators: default_response_indicators(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Longest text handed to the delivery surface, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Appended after truncation; `{total}` is the original length
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            truncation_marker: default_truncation_marker(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Pause between scripted input steps
    #[serde(default = "default_input_delay")]
    pub input_delay_ms: u64,

    /// Pause after activating the target application
    #[serde(default = "default_activate_delay")]
    pub activate_delay_ms: u64,

    /// Submit with Cmd+Enter (plain Enter otherwise)
    #[serde(default = "default_true")]
    pub command_enter: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            input_delay_ms: default_input_delay(),
            activate_delay_ms: default_activate_delay(),
            command_enter: true,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_strategy() -> StrategyKind {
    StrategyKind::FileLatest
}

fn default_target_app() -> String {
    "Antigravity".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string(), "json".to_string()]
}

fn default_file_poll() -> u64 {
    2000
}

fn default_file_timeout() -> u64 {
    180
}

fn default_file_settle() -> u64 {
    3000
}

fn default_file_purge() -> u64 {
    3600
}

fn default_read_command() -> Vec<String> {
    vec!["pbpaste".to_string()]
}

fn default_write_command() -> Vec<String> {
    vec!["pbcopy".to_string()]
}

fn default_clipboard_poll() -> u64 {
    500
}

fn default_clipboard_timeout() -> u64 {
    60
}

fn default_capture_mode() -> CaptureMode {
    CaptureMode::Command
}

fn default_capture_command() -> Vec<String> {
    vec![
        "screencapture".to_string(),
        "-x".to_string(),
        "-C".to_string(),
        "{path}".to_string(),
    ]
}

fn default_shortcut_wait() -> u64 {
    1500
}

fn default_hash_sensitivity() -> u32 {
    2
}

fn default_screen_poll() -> u64 {
    5000
}

fn default_screen_timeout() -> u64 {
    120
}

fn default_stable_count() -> u32 {
    2
}

fn default_screen_settle() -> u64 {
    1000
}

fn default_screen_purge() -> u64 {
    600
}

fn default_engine_args() -> Vec<String> {
    vec!["--image".to_string(), "{image}".to_string(), "--json".to_string()]
}

fn default_engine_output() -> EngineOutput {
    EngineOutput::Json
}

fn default_engine_timeout() -> u64 {
    30
}

fn default_min_line_chars() -> usize {
    3
}

fn default_prose_chars() -> usize {
    20
}

fn default_ideograph_run() -> usize {
    3
}

fn default_min_result_chars() -> usize {
    50
}

fn default_substantial_chars() -> usize {
    50
}

fn default_rule_action() -> RuleAction {
    RuleAction::Skip
}

fn default_noise_rules() -> Vec<NoiseRuleConfig> {
    [
        r"^\d+月\d+日",       // date
        r"^[上下]午\d+:\d+",  // time of day
        r"^\d{1,2}:\d{2}(\s?[AaPp][Mm])?$",
        r"^Open\s",
        r"^S\s?Code",
        r"^f\d+\s",
        r"^@id:",
        r"^import[（(]",
        r#"^""#,
        r"^\d+$",             // gutter line numbers
        r"^Step\s+Id:",
        r"uses\s+Open\s+VSX",
        r"(?i)marketplace",
        r"Checked\s+command",
        r"^回\s",
        r"^[〉›>\[\]{}()]+$",
    ]
    .iter()
    .map(|pattern| NoiseRuleConfig {
        pattern: pattern.to_string(),
        action: RuleAction::Skip,
    })
    .collect()
}

fn default_response_indicators() -> Vec<String> {
    [
        "✅", "❌", "🚀", "📝", "📸", "🔍", "⏱️", "⚠️", "回應", "已送出", "執行", "完成", "失敗",
        "成功",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_chars() -> usize {
    4000
}

fn default_truncation_marker() -> String {
    "...(truncated, {total} chars total)".to_string()
}

fn default_input_delay() -> u64 {
    100
}

fn default_activate_delay() -> u64 {
    500
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("response-watch")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Directory watched by the file strategies
    pub fn responses_dir(&self) -> PathBuf {
        self.file_watch
            .watch_dir
            .clone()
            .unwrap_or_else(|| self.storage.responses_dir())
    }

    /// Tunables for the given strategy
    pub fn watch_config(&self, kind: StrategyKind) -> WatchConfig {
        match kind {
            StrategyKind::FileNew | StrategyKind::FileLatest => self.file_watch.watch_config(),
            StrategyKind::Clipboard => self.clipboard.watch_config(),
            StrategyKind::Screen => self.screen.watch_config(),
        }
    }

    /// Validate the tunables of every strategy.
    pub fn validate(&self) -> Result<(), WatchError> {
        for kind in StrategyKind::ALL {
            self.watch_config(kind).validate().map_err(|e| {
                WatchError::Configuration(format!("[{}] {}", kind, e))
            })?;
        }
        if self.delivery.max_chars == 0 {
            return Err(WatchError::Configuration(
                "delivery.max_chars must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
