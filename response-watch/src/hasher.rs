//! Frame digests for screen comparison.
//!
//! Exact mode hashes the captured file bytes with SHA-256, so two frames are
//! equal only when byte-identical. Perceptual mode uses the average hash
//! (aHash) of the decoded image and tolerates a small Hamming distance, which
//! keeps a blinking cursor from resetting the stability counter.

use crate::types::{FrameDigest, WatchError, DIGEST_LEN};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::trace;

/// Hash size (8x8 = 64 bits)
const HASH_SIZE: u32 = 8;

/// Perceptual hash value (64-bit)
pub type PerceptualHash = u64;

/// Digest algorithm used to compare frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    #[default]
    Exact,
    Perceptual,
}

/// Computes and compares frame digests
#[derive(Debug, Clone, Copy)]
pub struct ContentHasher {
    algorithm: DigestAlgorithm,
    /// Hamming distance threshold for "same frame" in perceptual mode
    threshold: u32,
}

impl ContentHasher {
    pub fn new(algorithm: DigestAlgorithm, threshold: u32) -> Self {
        Self {
            algorithm,
            threshold,
        }
    }

    /// Byte-exact SHA-256 comparison
    pub fn exact() -> Self {
        Self::new(DigestAlgorithm::Exact, 0)
    }

    pub fn perceptual(threshold: u32) -> Self {
        Self::new(DigestAlgorithm::Perceptual, threshold)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Digest an in-memory buffer
    pub fn digest_bytes(&self, bytes: &[u8]) -> Result<FrameDigest, WatchError> {
        match self.algorithm {
            DigestAlgorithm::Exact => Ok(FrameDigest::Exact(sha256_digest(bytes))),
            DigestAlgorithm::Perceptual => {
                let image = image::load_from_memory(bytes).map_err(|e| {
                    WatchError::AutomationFailure(format!("Failed to decode capture: {}", e))
                })?;
                Ok(FrameDigest::Perceptual(compute_ahash(&image)))
            }
        }
    }

    /// Digest a captured file
    pub fn digest_file(&self, path: &Path) -> Result<FrameDigest, WatchError> {
        let bytes = std::fs::read(path)?;
        self.digest_bytes(&bytes)
    }

    /// Whether two digests describe the same frame
    pub fn matches(&self, a: &FrameDigest, b: &FrameDigest) -> bool {
        match (a, b) {
            (FrameDigest::Exact(a), FrameDigest::Exact(b)) => a == b,
            (FrameDigest::Perceptual(a), FrameDigest::Perceptual(b)) => {
                let distance = hamming_distance(*a, *b);
                trace!("Frame hash distance: {} (threshold: {})", distance, self.threshold);
                distance <= self.threshold
            }
            _ => false,
        }
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::exact()
    }
}

/// SHA-256 of a byte buffer
pub fn sha256_digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Compute average hash (aHash) for an image
///
/// Algorithm:
/// 1. Resize to 8x8
/// 2. Convert to grayscale
/// 3. Calculate average brightness
/// 4. Generate 64-bit hash: bit=1 if pixel > average, else 0
pub fn compute_ahash(image: &DynamicImage) -> PerceptualHash {
    let resized = image.resize_exact(HASH_SIZE, HASH_SIZE, image::imageops::FilterType::Nearest);
    let gray = resized.to_luma8();

    let sum: u32 = gray.pixels().map(|p| p.0[0] as u32).sum();
    let avg = (sum / (HASH_SIZE * HASH_SIZE)) as u8;

    let mut hash: PerceptualHash = 0;
    for (i, pixel) in gray.pixels().enumerate() {
        if pixel.0[0] > avg {
            hash |= 1 << i;
        }
    }

    hash
}

/// Calculate Hamming distance between two hashes
///
/// Returns the number of bits that differ (0-64)
pub fn hamming_distance(a: PerceptualHash, b: PerceptualHash) -> u32 {
    (a ^ b).count_ones()
}
