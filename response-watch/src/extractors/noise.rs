//! Noise filter for recognized screen text.
//!
//! Recognition of a full screen picks up window chrome, file trees, gutter
//! numbers and log output next to the actual answer. The filter walks the
//! text line by line against an ordered rule list and a few prose
//! heuristics.
//!
//! All lengths are counted in characters, not bytes.

use crate::config::ExtractionConfig;
use crate::types::WatchError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    // Three or more contiguous CJK ideographs / kana read as a sentence
    static ref IDEOGRAPH_RUN: Regex = Regex::new(
        r"[\p{Han}\p{Hiragana}\p{Katakana}]{3,}"
    ).unwrap();
}

/// What a matching rule does with the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Skip,
    Keep,
}

/// A pattern plus the decision taken when it matches
#[derive(Debug, Clone)]
pub struct NoiseFilterRule {
    pub pattern: Regex,
    pub action: RuleAction,
}

impl NoiseFilterRule {
    pub fn new(pattern: &str, action: RuleAction) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            action,
        })
    }

    pub fn skip(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, RuleAction::Skip)
    }

    pub fn keep(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, RuleAction::Keep)
    }

    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }
}

/// Ordered, data-driven line filter
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    rules: Vec<NoiseFilterRule>,
    indicators: Vec<String>,
    ideograph: Regex,
    min_line_chars: usize,
    prose_min_chars: usize,
    min_result_chars: usize,
    substantial_input_chars: usize,
}

impl NoiseFilter {
    /// Build the filter from configuration, compiling every rule.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, WatchError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                NoiseFilterRule::new(&rule.pattern, rule.action).map_err(|e| {
                    WatchError::Configuration(format!(
                        "invalid noise rule '{}': {}",
                        rule.pattern, e
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ideograph = if config.ideograph_run == 3 {
            IDEOGRAPH_RUN.clone()
        } else {
            Regex::new(&format!(
                r"[\p{{Han}}\p{{Hiragana}}\p{{Katakana}}]{{{},}}",
                config.ideograph_run.max(1)
            ))
            .map_err(|e| WatchError::Configuration(format!("invalid ideograph run: {}", e)))?
        };

        Ok(Self {
            rules,
            indicators: config.response_indicators.clone(),
            ideograph,
            min_line_chars: config.min_line_chars,
            prose_min_chars: config.prose_min_chars,
            min_result_chars: config.min_result_chars,
            substantial_input_chars: config.substantial_input_chars,
        })
    }

    /// Filter with an explicit rule list and default thresholds
    pub fn with_rules(rules: Vec<NoiseFilterRule>, indicators: Vec<String>) -> Self {
        let defaults = ExtractionConfig::default();
        Self {
            rules,
            indicators,
            ideograph: IDEOGRAPH_RUN.clone(),
            min_line_chars: defaults.min_line_chars,
            prose_min_chars: defaults.prose_min_chars,
            min_result_chars: defaults.min_result_chars,
            substantial_input_chars: defaults.substantial_input_chars,
        }
    }

    pub fn rules(&self) -> &[NoiseFilterRule] {
        &self.rules
    }

    /// Whether a single (already trimmed) line belongs to the answer
    pub fn classify(&self, line: &str) -> bool {
        if line.is_empty() || line.chars().count() < self.min_line_chars {
            return false;
        }

        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(line)) {
            return rule.action == RuleAction::Keep;
        }

        self.indicators.iter().any(|token| line.contains(token.as_str()))
            || self.ideograph.is_match(line)
            || line.chars().count() >= self.prose_min_chars
    }

    /// Filter raw recognized text.
    ///
    /// If filtering leaves almost nothing of a substantial input, the trimmed
    /// raw text is returned instead.
    pub fn apply(&self, raw: &str) -> String {
        let kept: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|line| self.classify(line))
            .collect();
        let result = kept.join("\n");

        let raw_chars = raw.trim().chars().count();
        let result_chars = result.chars().count();
        debug!(
            "Noise filter kept {} lines ({} of {} chars)",
            kept.len(),
            result_chars,
            raw_chars
        );

        if result_chars < self.min_result_chars && raw_chars > self.substantial_input_chars {
            debug!("Noise filter too aggressive, returning unfiltered text");
            return raw.trim().to_string();
        }

        result
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        let config = ExtractionConfig::default();
        let rules = config
            .rules
            .iter()
            .filter_map(|rule| NoiseFilterRule::new(&rule.pattern, rule.action).ok())
            .collect();
        Self::with_rules(rules, config.response_indicators)
    }
}
