//! Response Watch - completion detection for non-instrumented desktop apps
//!
//! A prompt is pasted into a locally running application that exposes no API.
//! This crate decides, purely by observation, when that application has
//! finished answering and what the answer was. Detection is pluggable:
//!
//! - **File**: the application (or the user) saves the answer into a watched
//!   scratch directory
//! - **Clipboard**: the answer is copied to the system pasteboard
//! - **Screen**: the screen stops changing for a number of consecutive frames,
//!   optionally followed by text recognition of the final frame
//!
//! # Architecture
//!
//! Capture and hashing sit at the bottom, the per-strategy monitors on top of
//! them, and the [`CompletionOrchestrator`] drives one episode at a time:
//! submit, wait for the configured strategy, extract, deliver.

pub mod automation;
pub mod capture;
pub mod clipboard;
pub mod config;
pub mod delivery;
pub mod extractors;
pub mod file_watcher;
pub mod hasher;
pub mod health;
pub mod orchestrator;
pub mod poll;
pub mod screen_monitor;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use automation::{AppAutomation, OsaScriptAutomation, SubmitRequest};
pub use capture::{CaptureService, ScreenCaptureSource};
pub use clipboard::{ClipboardMonitor, CommandPasteboard, Pasteboard};
pub use config::Config;
pub use delivery::{format_response, Delivery, DeliverySink, DeliverySlot, DeliveryTarget};
pub use extractors::noise::{NoiseFilter, NoiseFilterRule, RuleAction};
pub use extractors::{RecognitionEngine, TextExtractor};
pub use file_watcher::{ChangedFile, FileSetSnapshot, FileSystemWatcher};
pub use hasher::{compute_ahash, hamming_distance, ContentHasher, DigestAlgorithm};
pub use health::{DependencyStatus, ExtractionStatus, HealthReport};
pub use orchestrator::{BusyPolicy, CompletionOrchestrator, SessionContext};
pub use screen_monitor::{ScreenStabilityMonitor, StableScreen};
pub use strategy::{Artifact, CompletionStrategy, EpisodeBaseline, StrategyRegistry, WatchRequest};
pub use types::{
    CompletionResult, EpisodeState, ExtractionError, FrameDigest, Resolution, ResultPayload,
    Snapshot, StrategyKind, WatchConfig, WatchError,
};

/// Cancellation handle accepted by every long-running wait.
pub use tokio_util::sync::CancellationToken;
