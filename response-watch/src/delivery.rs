//! Hand-off of episode results to the delivery surface.
//!
//! The delivery layer (chat transport or terminal) only accepts a bounded
//! text or an image path. Which session gets the result is tracked in a
//! [`DeliverySlot`] that inbound request handlers update concurrently.

use crate::config::DeliveryConfig;
use crate::types::{CompletionResult, ResultPayload, WatchError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Final message for the delivery surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    Image {
        path: PathBuf,
        caption: Option<String>,
    },
}

impl Delivery {
    /// Render a completion result
    pub fn from_result(result: &CompletionResult, config: &DeliveryConfig) -> Self {
        match result.payload() {
            ResultPayload::Text(content) => {
                let body = format_response(content, config);
                Delivery::Text(format!("📝 Response ({}):\n\n{}", result.strategy(), body))
            }
            ResultPayload::ImagePath(path) => {
                let caption = if result.is_partial() {
                    format!(
                        "⏱️ Screen still changing after {}s, last capture attached.",
                        result.elapsed().as_secs()
                    )
                } else {
                    format!("📸 Screen settled after {}s.", result.elapsed().as_secs())
                };
                Delivery::Image {
                    path: path.clone(),
                    caption: Some(caption),
                }
            }
        }
    }

    /// Render a terminal error; always names the wait and the manual fallback
    pub fn from_error(error: &WatchError, elapsed: Duration) -> Self {
        Delivery::Text(error.user_message(elapsed))
    }
}

/// Trim, then cut long text at `max_chars` characters.
///
/// Trailing whitespace is removed from every line and the whole text is
/// trimmed first. The marker's `{total}` is replaced by the untruncated
/// length.
pub fn format_response(content: &str, config: &DeliveryConfig) -> String {
    let cleaned = content
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned.trim();

    let total = cleaned.chars().count();
    if total <= config.max_chars {
        return cleaned.to_string();
    }

    let marker = config
        .truncation_marker
        .replace("{total}", &total.to_string());
    format!("{}\n\n{}", truncate_chars(cleaned, config.max_chars), marker)
}

/// Longest prefix with at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Identifies the session that receives results
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTarget(pub String);

impl DeliveryTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current delivery destination, shared between request handlers and the
/// background episode
#[derive(Debug, Default)]
pub struct DeliverySlot {
    inner: Mutex<Option<DeliveryTarget>>,
}

impl DeliverySlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DeliveryTarget>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, target: DeliveryTarget) {
        *self.lock() = Some(target);
    }

    /// Swap in a new target, returning the previous one
    pub fn replace(&self, target: DeliveryTarget) -> Option<DeliveryTarget> {
        self.lock().replace(target)
    }

    pub fn current(&self) -> Option<DeliveryTarget> {
        self.lock().clone()
    }

    pub fn clear(&self) -> Option<DeliveryTarget> {
        self.lock().take()
    }
}

/// Outbound side of the delivery layer
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, target: &DeliveryTarget, delivery: Delivery) -> Result<(), WatchError>;
}
