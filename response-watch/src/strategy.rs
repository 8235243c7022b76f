//! Pluggable completion detection strategies.
//!
//! Each way of noticing that the application finished answering sits
//! behind [`CompletionStrategy`]. The [`StrategyRegistry`] maps the
//! configured strategy name to an implementation; nothing is auto-selected.

use crate::capture::{CaptureService, ScreenCaptureSource};
use crate::clipboard::{ClipboardMonitor, CommandPasteboard, Pasteboard};
use crate::config::Config;
use crate::file_watcher::{FileSetSnapshot, FileSystemWatcher};
use crate::hasher::ContentHasher;
use crate::health::DependencyStatus;
use crate::screen_monitor::ScreenStabilityMonitor;
use crate::types::{StrategyKind, WatchConfig, WatchError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a strategy produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Text {
        content: String,
        source: Option<PathBuf>,
    },
    Image {
        path: PathBuf,
        /// Deadline hit before the screen settled
        partial: bool,
    },
}

/// State observed before the prompt was submitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EpisodeBaseline {
    #[default]
    None,
    FileSet(FileSetSnapshot),
}

/// Everything a strategy needs for one wait
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub config: WatchConfig,
    /// Submission instant
    pub reference: SystemTime,
    pub baseline: EpisodeBaseline,
    pub cancel: CancellationToken,
}

impl WatchRequest {
    pub fn new(config: WatchConfig, reference: SystemTime, cancel: CancellationToken) -> Self {
        Self {
            config,
            reference,
            baseline: EpisodeBaseline::None,
            cancel,
        }
    }

    pub fn with_baseline(mut self, baseline: EpisodeBaseline) -> Self {
        self.baseline = baseline;
        self
    }
}

#[async_trait]
pub trait CompletionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Tunables for a fresh wait
    fn watch_config(&self) -> WatchConfig;

    /// Snapshot taken before submission, if the strategy compares against one
    fn baseline(&self) -> EpisodeBaseline {
        EpisodeBaseline::None
    }

    /// Block until completion is detected, the deadline passes or the
    /// request is cancelled.
    async fn wait(&self, request: &WatchRequest) -> Result<Artifact, WatchError>;

    /// Remove stale artifacts; returns how many were deleted
    fn housekeeping(&self) -> usize {
        0
    }

    fn dependency(&self) -> DependencyStatus;
}

/// Status of the watched directory; never creates it
fn dir_status(kind: StrategyKind, watcher: &FileSystemWatcher) -> DependencyStatus {
    let dir = watcher.watch_dir();
    DependencyStatus::new(kind, "response directory", dir.is_dir())
        .with_detail(dir.display().to_string())
}

/// First new or modified response file since submission
pub struct FileNewStrategy {
    watcher: FileSystemWatcher,
    config: WatchConfig,
    purge_age: Duration,
}

impl FileNewStrategy {
    pub fn new(watcher: FileSystemWatcher, config: WatchConfig, purge_age: Duration) -> Self {
        Self {
            watcher,
            config,
            purge_age,
        }
    }
}

#[async_trait]
impl CompletionStrategy for FileNewStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileNew
    }

    fn watch_config(&self) -> WatchConfig {
        self.config
    }

    fn baseline(&self) -> EpisodeBaseline {
        EpisodeBaseline::FileSet(self.watcher.snapshot())
    }

    async fn wait(&self, request: &WatchRequest) -> Result<Artifact, WatchError> {
        let empty = FileSetSnapshot::new();
        let baseline = match &request.baseline {
            EpisodeBaseline::FileSet(files) => files,
            EpisodeBaseline::None => &empty,
        };

        self.watcher.ensure_dir()?;
        let changed = self
            .watcher
            .wait_for_new_file(baseline, &request.config, &request.cancel)
            .await?;
        Ok(Artifact::Text {
            content: changed.content,
            source: Some(changed.path),
        })
    }

    fn housekeeping(&self) -> usize {
        self.watcher.purge_older_than(self.purge_age)
    }

    fn dependency(&self) -> DependencyStatus {
        dir_status(self.kind(), &self.watcher)
    }
}

/// Newest response file modified after submission
pub struct FileLatestStrategy {
    watcher: FileSystemWatcher,
    config: WatchConfig,
    purge_age: Duration,
}

impl FileLatestStrategy {
    pub fn new(watcher: FileSystemWatcher, config: WatchConfig, purge_age: Duration) -> Self {
        Self {
            watcher,
            config,
            purge_age,
        }
    }
}

#[async_trait]
impl CompletionStrategy for FileLatestStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FileLatest
    }

    fn watch_config(&self) -> WatchConfig {
        self.config
    }

    async fn wait(&self, request: &WatchRequest) -> Result<Artifact, WatchError> {
        self.watcher.ensure_dir()?;
        let latest = self
            .watcher
            .wait_for_latest_after(request.reference, &request.config, &request.cancel)
            .await?;
        Ok(Artifact::Text {
            content: latest.content,
            source: Some(latest.path),
        })
    }

    fn housekeeping(&self) -> usize {
        self.watcher.purge_older_than(self.purge_age)
    }

    fn dependency(&self) -> DependencyStatus {
        dir_status(self.kind(), &self.watcher)
    }
}

/// Answer copied to the pasteboard
pub struct ClipboardStrategy {
    monitor: ClipboardMonitor,
    config: WatchConfig,
}

impl ClipboardStrategy {
    pub fn new(monitor: ClipboardMonitor, config: WatchConfig) -> Self {
        Self { monitor, config }
    }
}

#[async_trait]
impl CompletionStrategy for ClipboardStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Clipboard
    }

    fn watch_config(&self) -> WatchConfig {
        self.config
    }

    async fn wait(&self, request: &WatchRequest) -> Result<Artifact, WatchError> {
        let content = self
            .monitor
            .wait_for_new_content(&request.config, &request.cancel)
            .await?;
        Ok(Artifact::Text {
            content,
            source: None,
        })
    }

    fn dependency(&self) -> DependencyStatus {
        DependencyStatus::new(
            self.kind(),
            "pasteboard access",
            self.monitor.pasteboard().is_available(),
        )
    }
}

/// Screen stops changing
pub struct ScreenStrategy {
    monitor: ScreenStabilityMonitor,
    config: WatchConfig,
    purge_age: Duration,
}

impl ScreenStrategy {
    pub fn new(monitor: ScreenStabilityMonitor, config: WatchConfig, purge_age: Duration) -> Self {
        Self {
            monitor,
            config,
            purge_age,
        }
    }
}

#[async_trait]
impl CompletionStrategy for ScreenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Screen
    }

    fn watch_config(&self) -> WatchConfig {
        self.config
    }

    async fn wait(&self, request: &WatchRequest) -> Result<Artifact, WatchError> {
        std::fs::create_dir_all(self.monitor.capture_dir())?;
        let stable = self
            .monitor
            .wait_for_stable_screen(&request.config, &request.cancel)
            .await?;
        Ok(Artifact::Image {
            path: stable.path,
            partial: stable.partial,
        })
    }

    fn housekeeping(&self) -> usize {
        self.monitor.purge_old_captures(self.purge_age)
    }

    fn dependency(&self) -> DependencyStatus {
        let source = self.monitor.source();
        DependencyStatus::new(self.kind(), "screenshot permission", source.is_available())
            .with_detail(format!("{} capture", source.name()))
    }
}

/// Configured strategies by kind
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn CompletionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register all built-in strategies from configuration
    pub fn from_config(config: &Config) -> Self {
        let pasteboard: Arc<dyn Pasteboard> = Arc::new(CommandPasteboard::from_config(&config.clipboard));
        let source: Arc<dyn ScreenCaptureSource> = Arc::new(CaptureService::from_config(
            &config.screen,
            config.storage.screenshots_dir(),
        ));
        Self::with_components(config, pasteboard, source)
    }

    /// Register the built-in strategies over the given pasteboard and capture source
    pub fn with_components(
        config: &Config,
        pasteboard: Arc<dyn Pasteboard>,
        source: Arc<dyn ScreenCaptureSource>,
    ) -> Self {
        let watcher = FileSystemWatcher::from_config(&config.file_watch, config.responses_dir());
        let file_config = config.watch_config(StrategyKind::FileNew);
        let file_purge = config.file_watch.purge_age();

        let hasher = ContentHasher::new(config.screen.digest, config.screen.perceptual_threshold);
        let screen_monitor =
            ScreenStabilityMonitor::new(source, hasher, config.storage.screenshots_dir());

        let mut registry = Self::new();
        registry.register(Arc::new(FileNewStrategy::new(
            watcher.clone(),
            file_config,
            file_purge,
        )));
        registry.register(Arc::new(FileLatestStrategy::new(watcher, file_config, file_purge)));
        registry.register(Arc::new(ClipboardStrategy::new(
            ClipboardMonitor::new(pasteboard),
            config.watch_config(StrategyKind::Clipboard),
        )));
        registry.register(Arc::new(ScreenStrategy::new(
            screen_monitor,
            config.watch_config(StrategyKind::Screen),
            config.screen.purge_age(),
        )));
        registry
    }

    /// Add or replace the strategy for its kind
    pub fn register(&mut self, strategy: Arc<dyn CompletionStrategy>) {
        debug!("Registering {} strategy", strategy.kind());
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn CompletionStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Look up a strategy by its configuration name
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn CompletionStrategy>, WatchError> {
        let kind: StrategyKind = name.parse()?;
        self.get(kind).ok_or_else(|| {
            WatchError::Configuration(format!("strategy '{}' is not registered", kind))
        })
    }

    /// Registered kinds in declaration order
    pub fn kinds(&self) -> Vec<StrategyKind> {
        StrategyKind::ALL
            .into_iter()
            .filter(|kind| self.strategies.contains_key(kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.root = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn test_registry_has_every_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StrategyRegistry::from_config(&config_in(dir.path()));
        assert_eq!(registry.kinds(), StrategyKind::ALL.to_vec());

        let screen = registry.get_by_name("screenshot").unwrap();
        assert_eq!(screen.kind(), StrategyKind::Screen);
        assert_eq!(screen.watch_config().stabilization_count, 2);
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        let registry = StrategyRegistry::new();
        assert!(matches!(
            registry.get_by_name("telepathy"),
            Err(WatchError::Configuration(_))
        ));
        assert!(matches!(
            registry.get_by_name("clipboard"),
            Err(WatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_file_new_baseline_lists_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(config.responses_dir()).unwrap();
        std::fs::write(config.responses_dir().join("old.md"), "old").unwrap();

        let registry = StrategyRegistry::from_config(&config);
        match registry.get(StrategyKind::FileNew).unwrap().baseline() {
            EpisodeBaseline::FileSet(files) => assert_eq!(files.len(), 1),
            EpisodeBaseline::None => panic!("expected a file set baseline"),
        }
        assert_eq!(
            registry.get(StrategyKind::FileLatest).unwrap().baseline(),
            EpisodeBaseline::None
        );
    }

    #[tokio::test]
    async fn test_file_latest_strategy_returns_text_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.file_watch.poll_interval_ms = 20;
        config.file_watch.settle_delay_ms = 10;
        config.file_watch.timeout_seconds = 5;

        let registry = StrategyRegistry::from_config(&config);
        let strategy = registry.get(StrategyKind::FileLatest).unwrap();
        let reference = SystemTime::now() - Duration::from_secs(1);

        let responses = config.responses_dir();
        std::fs::create_dir_all(&responses).unwrap();
        std::fs::write(responses.join("response.md"), "result text").unwrap();

        let request = WatchRequest::new(strategy.watch_config(), reference, CancellationToken::new());
        match strategy.wait(&request).await.unwrap() {
            Artifact::Text { content, source } => {
                assert_eq!(content, "result text");
                assert_eq!(source, Some(responses.join("response.md")));
            }
            other => panic!("unexpected artifact: {:?}", other),
        }
    }

    #[test]
    fn test_dependency_check_does_not_create_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let registry = StrategyRegistry::from_config(&config);

        let status = registry.get(StrategyKind::FileNew).unwrap().dependency();
        assert!(!status.available);
        assert!(!config.responses_dir().exists());

        std::fs::create_dir_all(config.responses_dir()).unwrap();
        assert!(registry.get(StrategyKind::FileLatest).unwrap().dependency().available);
    }
}
