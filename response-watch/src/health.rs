//! Dependency status for every configured strategy.

use crate::automation::AppAutomation;
use crate::config::Config;
use crate::extractors::ocr::OcrEngine;
use crate::extractors::RecognitionEngine;
use crate::strategy::StrategyRegistry;
use crate::types::StrategyKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Availability of the external dependency behind one strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub strategy: StrategyKind,
    /// What the strategy relies on, e.g. "pasteboard access"
    pub dependency: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DependencyStatus {
    pub fn new(strategy: StrategyKind, dependency: impl Into<String>, available: bool) -> Self {
        Self {
            strategy,
            dependency: dependency.into(),
            available,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Whether text recognition can run on screen captures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionStatus {
    pub enabled: bool,
    pub engine: String,
    pub available: bool,
    /// Resolved engine binary
    pub detail: String,
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    /// Strategy used when none is requested explicitly
    pub default_strategy: StrategyKind,
    pub automation_available: bool,
    pub storage_root: PathBuf,
    pub storage_ready: bool,
    pub strategies: Vec<DependencyStatus>,
    pub extraction: ExtractionStatus,
}

impl HealthReport {
    /// Whether every strategy's dependency is present, including the
    /// recognition engine when extraction is enabled
    pub fn all_available(&self) -> bool {
        self.strategies.iter().all(|status| status.available)
            && (!self.extraction.enabled || self.extraction.available)
    }

    pub fn status_of(&self, kind: StrategyKind) -> Option<&DependencyStatus> {
        self.strategies.iter().find(|status| status.strategy == kind)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Query every registered strategy for its dependency status
pub fn check(
    config: &Config,
    registry: &StrategyRegistry,
    automation: Option<&dyn AppAutomation>,
) -> HealthReport {
    let strategies = registry
        .kinds()
        .into_iter()
        .filter_map(|kind| registry.get(kind))
        .map(|strategy| strategy.dependency())
        .collect();

    let storage_root = config.storage.root();
    HealthReport {
        checked_at: Utc::now(),
        default_strategy: config.general.strategy,
        automation_available: automation.map(|a| a.is_available()).unwrap_or(false),
        storage_ready: is_writable_dir(&storage_root),
        storage_root,
        strategies,
        extraction: extraction_status(config),
    }
}

fn extraction_status(config: &Config) -> ExtractionStatus {
    let engine = OcrEngine::from_config(&config.extraction);
    ExtractionStatus {
        enabled: config.extraction.enabled,
        engine: engine.name().to_string(),
        available: engine.is_available(),
        detail: engine.binary_path().display().to_string(),
    }
}

fn is_writable_dir(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false)
}

/// Resolve a program name the way the shell would.
///
/// Names containing a path separator are checked directly; bare names are
/// searched on `PATH`.
pub fn locate_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_locate_program() {
        assert!(locate_program("sh").is_some());
        assert!(locate_program("/bin/sh").is_some());
        assert!(locate_program("definitely-not-a-real-program-name").is_none());
        assert!(locate_program("/nonexistent/sh").is_none());
    }

    #[test]
    fn test_status_serializes_without_empty_detail() {
        let status = DependencyStatus::new(StrategyKind::Clipboard, "pasteboard access", true);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["strategy"], "clipboard");
        assert_eq!(json["available"], true);
        assert!(json.get("detail").is_none());

        let status = status.with_detail("pbpaste missing");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["detail"], "pbpaste missing");
    }

    #[test]
    fn test_missing_recognition_engine_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = Some(dir.path().to_path_buf());
        config.extraction.engine_program = Some("/nonexistent/ocr-engine".into());
        let registry = StrategyRegistry::from_config(&config);

        let report = check(&config, &registry, None);
        assert!(!report.extraction.available);
        assert_eq!(report.extraction.detail, "/nonexistent/ocr-engine");
        assert!(!report.all_available());
        assert!(report.status_of(StrategyKind::Clipboard).is_some());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["extraction"]["engine"], "ocr");
        assert_eq!(json["extraction"]["available"], false);

        config.extraction.enabled = false;
        let report = check(&config, &registry, None);
        assert!(!report.extraction.enabled);
    }
}
