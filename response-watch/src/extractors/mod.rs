//! Text extraction from captured screens.
//!
//! A [`RecognitionEngine`] turns an image into raw text and the
//! [`noise::NoiseFilter`] strips everything that is not part of the answer.

pub mod noise;
pub mod ocr;

use crate::config::ExtractionConfig;
use crate::types::{ExtractionError, WatchError};
use async_trait::async_trait;
use noise::NoiseFilter;
use ocr::OcrEngine;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Produces raw text for an image
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<String, ExtractionError>;

    fn is_available(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Recognition followed by noise filtering
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn RecognitionEngine>,
    filter: NoiseFilter,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn RecognitionEngine>, filter: NoiseFilter) -> Self {
        Self { engine, filter }
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, WatchError> {
        let filter = NoiseFilter::from_config(config)?;
        Ok(Self::new(Arc::new(OcrEngine::from_config(config)), filter))
    }

    pub fn engine(&self) -> &Arc<dyn RecognitionEngine> {
        &self.engine
    }

    pub fn filter(&self) -> &NoiseFilter {
        &self.filter
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_available()
    }

    /// Recognize and filter the text on `image`.
    ///
    /// Engine failures are returned unchanged so the caller can fall back to
    /// delivering the image itself.
    pub async fn extract(&self, image: &Path) -> Result<String, ExtractionError> {
        let raw = self.engine.recognize(image).await?;
        debug!(
            "{} returned {} chars before cleanup",
            self.engine.name(),
            raw.chars().count()
        );

        let cleaned = self.filter.apply(&raw);
        if cleaned.trim().is_empty() {
            return Err(ExtractionError::NoContent);
        }

        info!("Extracted {} chars from {:?}", cleaned.chars().count(), image);
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine(Result<String, ()>);

    #[async_trait]
    impl RecognitionEngine for FixedEngine {
        async fn recognize(&self, _image: &Path) -> Result<String, ExtractionError> {
            self.0
                .clone()
                .map_err(|_| ExtractionError::EngineFailed("boom".to_string()))
        }

        fn is_available(&self) -> bool {
            self.0.is_ok()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn extractor(result: Result<&str, ()>) -> TextExtractor {
        TextExtractor::new(
            Arc::new(FixedEngine(result.map(str::to_string))),
            NoiseFilter::default(),
        )
    }

    #[tokio::test]
    async fn test_extract_filters_noise() {
        let text = extractor(Ok("Open Editors\n42\nThe deployment completed successfully today without errors."))
            .extract(Path::new("frame.png"))
            .await
            .unwrap();
        assert_eq!(text, "The deployment completed successfully today without errors.");
    }

    #[tokio::test]
    async fn test_engine_error_propagates() {
        let err = extractor(Err(())).extract(Path::new("frame.png")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EngineFailed(_)));
    }

    #[tokio::test]
    async fn test_nothing_left_is_no_content() {
        let err = extractor(Ok("12\n13"))
            .extract(Path::new("frame.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NoContent));
    }
}
