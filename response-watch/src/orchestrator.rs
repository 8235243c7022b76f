//! Completion episode driver.
//!
//! One orchestrator serves one automation target. It runs at most one
//! episode at a time:
//!
//! ```text
//! Idle -> Submitted -> Watching -> [Extracting] -> Resolved(Success|Timeout|Failed)
//! ```
//!
//! The baseline and the per-episode cancellation token live only for the
//! duration of [`CompletionOrchestrator::submit`] / [`CompletionOrchestrator::watch`];
//! nothing carries over into the next episode.

use crate::automation::{AppAutomation, SubmitRequest};
use crate::config::DeliveryConfig;
use crate::delivery::{Delivery, DeliverySink, DeliverySlot};
use crate::extractors::TextExtractor;
use crate::strategy::{Artifact, CompletionStrategy, WatchRequest};
use crate::types::{
    CompletionResult, EpisodeState, Resolution, ResultPayload, StrategyKind, WatchConfig,
    WatchError,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happens to a submission while another episode is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail fast with `EpisodeInProgress`
    #[default]
    Reject,
    /// Wait for the running episode to resolve
    Queue,
}

/// Per-target context shared with the inbound request handlers
#[derive(Debug)]
pub struct SessionContext {
    target_app: String,
    delivery: DeliverySlot,
}

impl SessionContext {
    pub fn new(target_app: impl Into<String>) -> Self {
        Self {
            target_app: target_app.into(),
            delivery: DeliverySlot::new(),
        }
    }

    pub fn target_app(&self) -> &str {
        &self.target_app
    }

    /// Where results of this target's episodes are sent
    pub fn delivery(&self) -> &DeliverySlot {
        &self.delivery
    }
}

pub struct CompletionOrchestrator {
    session: Arc<SessionContext>,
    strategy: Arc<dyn CompletionStrategy>,
    extractor: Option<TextExtractor>,
    automation: Option<Arc<dyn AppAutomation>>,
    delivery_config: DeliveryConfig,
    busy_policy: BusyPolicy,
    /// Held for the whole episode
    episode: tokio::sync::Mutex<()>,
    state: Mutex<EpisodeState>,
    /// Root token; each episode waits on a child of it
    shutdown: CancellationToken,
}

impl CompletionOrchestrator {
    pub fn new(session: Arc<SessionContext>, strategy: Arc<dyn CompletionStrategy>) -> Self {
        Self {
            session,
            strategy,
            extractor: None,
            automation: None,
            delivery_config: DeliveryConfig::default(),
            busy_policy: BusyPolicy::default(),
            episode: tokio::sync::Mutex::new(()),
            state: Mutex::new(EpisodeState::Idle),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run extraction on image artifacts
    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_automation(mut self, automation: Arc<dyn AppAutomation>) -> Self {
        self.automation = Some(automation);
        self
    }

    pub fn with_delivery_config(mut self, config: DeliveryConfig) -> Self {
        self.delivery_config = config;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// Cancel episodes when `token` is cancelled
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn state(&self) -> EpisodeState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Abort the running episode (if any) and every later one
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn transition(&self, next: EpisodeState) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state.can_transition_to(next) {
            warn!("Unexpected episode transition {:?} -> {:?}", *state, next);
        }
        info!("Episode {:?} -> {:?}", *state, next);
        *state = next;
    }

    async fn acquire(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, WatchError> {
        match self.busy_policy {
            BusyPolicy::Reject => self
                .episode
                .try_lock()
                .map_err(|_| WatchError::EpisodeInProgress),
            BusyPolicy::Queue => {
                debug!("Waiting for the running episode to finish");
                Ok(self.episode.lock().await)
            }
        }
    }

    /// Submit a prompt through the automation backend and wait for the answer.
    pub async fn submit(&self, request: &SubmitRequest) -> Result<CompletionResult, WatchError> {
        let automation = self.automation.clone().ok_or_else(|| {
            WatchError::Configuration("no automation backend configured".to_string())
        })?;
        let _episode = self.acquire().await?;
        self.run_episode(Some((automation.as_ref(), request))).await
    }

    /// Wait for the answer to input that was already delivered to the target.
    pub async fn watch(&self) -> Result<CompletionResult, WatchError> {
        let _episode = self.acquire().await?;
        self.run_episode(None).await
    }

    async fn run_episode(
        &self,
        submission: Option<(&dyn AppAutomation, &SubmitRequest)>,
    ) -> Result<CompletionResult, WatchError> {
        let started = Instant::now();
        let cancel = self.shutdown.child_token();
        let watch_config = self.strategy.watch_config();
        watch_config.validate()?;

        let purged = self.strategy.housekeeping();
        if purged > 0 {
            debug!("Housekeeping removed {} stale artifacts", purged);
        }

        let baseline = self.strategy.baseline();
        let reference = SystemTime::now();
        self.transition(EpisodeState::Submitted);

        if let Some((automation, request)) = submission {
            if let Err(e) = automation.submit(request).await {
                error!("Submission to {} failed: {}", request.target_app, e);
                self.transition(EpisodeState::Resolved(Resolution::Failed));
                return Err(e);
            }
        }

        let outcome = match remaining_budget(watch_config, started) {
            Some(budget) => {
                let watch_request =
                    WatchRequest::new(budget, reference, cancel).with_baseline(baseline);
                self.transition(EpisodeState::Watching);

                match self.strategy.wait(&watch_request).await {
                    Ok(artifact) => Ok(self.resolve(artifact, started).await),
                    // Report the whole episode, not just the wait
                    Err(e) if e.is_timeout() => Err(WatchError::Timeout {
                        elapsed: started.elapsed(),
                    }),
                    Err(e) => Err(e),
                }
            }
            None => Err(WatchError::Timeout {
                elapsed: started.elapsed(),
            }),
        };

        let resolution = match &outcome {
            Ok(_) => Resolution::Success,
            Err(e) if e.is_timeout() => Resolution::Timeout,
            Err(_) => Resolution::Failed,
        };
        self.transition(EpisodeState::Resolved(resolution));

        match &outcome {
            Ok(result) => info!(
                "{} episode resolved in {:?}{}",
                result.strategy(),
                result.elapsed(),
                if result.is_partial() { " (partial)" } else { "" }
            ),
            Err(e) => warn!("{} episode failed after {:?}: {}", self.strategy.kind(), started.elapsed(), e),
        }
        outcome
    }

    /// Turn a strategy artifact into the final result, extracting text from
    /// images when possible
    async fn resolve(&self, artifact: Artifact, started: Instant) -> CompletionResult {
        let kind = self.strategy.kind();
        match artifact {
            Artifact::Text { content, source } => {
                CompletionResult::new(ResultPayload::Text(content), kind, started.elapsed(), false, source)
            }
            Artifact::Image { path, partial } => {
                let payload = match &self.extractor {
                    Some(extractor) => {
                        self.transition(EpisodeState::Extracting);
                        match extractor.extract(&path).await {
                            Ok(text) => ResultPayload::Text(text),
                            Err(e) => {
                                warn!("Text extraction failed, delivering the capture instead: {}", e);
                                ResultPayload::ImagePath(path.clone())
                            }
                        }
                    }
                    None => ResultPayload::ImagePath(path.clone()),
                };
                CompletionResult::new(payload, kind, started.elapsed(), partial, Some(path))
            }
        }
    }

    /// Run one episode and send the outcome to the session's current target.
    ///
    /// Failures are delivered too, with the elapsed wait and the manual
    /// fallback; nothing fails silently.
    pub async fn run_and_deliver(
        &self,
        request: Option<&SubmitRequest>,
        sink: &dyn DeliverySink,
    ) -> Resolution {
        let started = Instant::now();
        let outcome = match request {
            Some(request) => self.submit(request).await,
            None => self.watch().await,
        };

        let (delivery, resolution) = match &outcome {
            Ok(result) => (
                Delivery::from_result(result, &self.delivery_config),
                Resolution::Success,
            ),
            Err(e) => {
                let elapsed = match e {
                    WatchError::Timeout { elapsed } => *elapsed,
                    _ => started.elapsed(),
                };
                let resolution = if e.is_timeout() {
                    Resolution::Timeout
                } else {
                    Resolution::Failed
                };
                (Delivery::from_error(e, round_secs(elapsed)), resolution)
            }
        };

        match self.session.delivery().current() {
            Some(target) => {
                if let Err(e) = sink.deliver(&target, delivery).await {
                    error!("Failed to deliver result to {}: {}", target, e);
                }
            }
            None => warn!("No delivery target set, dropping {:?} result", resolution),
        }
        resolution
    }
}

fn round_secs(elapsed: Duration) -> Duration {
    Duration::from_secs(elapsed.as_secs_f64().round() as u64)
}

/// Shrink the wait deadline to what is left of the episode budget.
///
/// The deadline counts from episode start, so time spent submitting is not
/// granted again. `None` when too little is left for a single successful wait.
fn remaining_budget(config: WatchConfig, started: Instant) -> Option<WatchConfig> {
    let remaining = config.timeout.saturating_sub(started.elapsed());
    let minimum = config.poll_interval.saturating_mul(config.stabilization_count);
    (remaining > minimum).then(|| WatchConfig {
        timeout: remaining,
        ..config
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::DependencyStatus;
    use async_trait::async_trait;

    struct InstantStrategy(Artifact);

    #[async_trait]
    impl CompletionStrategy for InstantStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Clipboard
        }

        fn watch_config(&self) -> WatchConfig {
            WatchConfig::default()
        }

        async fn wait(&self, _request: &WatchRequest) -> Result<Artifact, WatchError> {
            Ok(self.0.clone())
        }

        fn dependency(&self) -> DependencyStatus {
            DependencyStatus::new(self.kind(), "nothing", true)
        }
    }

    #[tokio::test]
    async fn test_watch_resolves_text_artifact() {
        let strategy = InstantStrategy(Artifact::Text {
            content: "hello".into(),
            source: None,
        });
        let orchestrator =
            CompletionOrchestrator::new(Arc::new(SessionContext::new("Editor")), Arc::new(strategy));
        assert_eq!(orchestrator.state(), EpisodeState::Idle);

        let result = orchestrator.watch().await.unwrap();
        assert_eq!(result.text(), Some("hello"));
        assert_eq!(result.strategy(), StrategyKind::Clipboard);
        assert_eq!(
            orchestrator.state(),
            EpisodeState::Resolved(Resolution::Success)
        );
    }

    #[tokio::test]
    async fn test_image_without_extractor_stays_image() {
        let strategy = InstantStrategy(Artifact::Image {
            path: "/tmp/monitor_1.png".into(),
            partial: true,
        });
        let orchestrator =
            CompletionOrchestrator::new(Arc::new(SessionContext::new("Editor")), Arc::new(strategy));

        let result = orchestrator.watch().await.unwrap();
        assert!(result.is_partial());
        assert_eq!(
            result.payload(),
            &ResultPayload::ImagePath("/tmp/monitor_1.png".into())
        );
    }

    #[tokio::test]
    async fn test_submit_without_automation_is_configuration_error() {
        let strategy = InstantStrategy(Artifact::Text {
            content: "x".into(),
            source: None,
        });
        let orchestrator =
            CompletionOrchestrator::new(Arc::new(SessionContext::new("Editor")), Arc::new(strategy));
        let err = orchestrator
            .submit(&SubmitRequest::new("prompt", "Editor"))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Configuration(_)));
        assert_eq!(orchestrator.state(), EpisodeState::Idle);
    }

    #[test]
    fn test_remaining_budget_counts_from_episode_start() {
        let config = WatchConfig::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            2,
            Duration::ZERO,
        );
        let started = Instant::now() - Duration::from_secs(4);
        let budget = remaining_budget(config, started).unwrap();
        assert!(budget.timeout <= Duration::from_secs(6));
        assert!(budget.timeout > Duration::from_secs(5));
        assert_eq!(budget.poll_interval, config.poll_interval);

        let late = Instant::now() - Duration::from_millis(9_850);
        assert!(remaining_budget(config, late).is_none());
    }

    #[test]
    fn test_busy_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: BusyPolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"queue\"").unwrap();
        assert_eq!(parsed.policy, BusyPolicy::Queue);
        assert_eq!(BusyPolicy::default(), BusyPolicy::Reject);
    }

    #[test]
    fn test_round_secs() {
        assert_eq!(round_secs(Duration::from_millis(6_900)), Duration::from_secs(7));
        assert_eq!(round_secs(Duration::from_millis(200)), Duration::ZERO);
    }
}
