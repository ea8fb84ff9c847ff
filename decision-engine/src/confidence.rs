//! Best-effort confidence read from the model's closing text
//!
//! This is telemetry for the audit record. Nothing in the risk path consults it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref HIGH_MARKERS: Regex =
        Regex::new(r"(?i)\b(high confidence|strong signal|very bullish)\b")
            .expect("valid high-confidence pattern");
    static ref MODERATE_MARKERS: Regex =
        Regex::new(r"(?i)\b(moderate|cautious|uncertain)\b").expect("valid moderate pattern");
    static ref LOW_MARKERS: Regex =
        Regex::new(r"(?i)\b(low confidence|weak signal|risky)\b").expect("valid low pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Moderate,
    Low,
    /// No marker found
    Unknown,
}

impl ConfidenceLevel {
    /// First matching tier wins: high, then moderate, then low.
    pub fn classify(text: &str) -> Self {
        if HIGH_MARKERS.is_match(text) {
            ConfidenceLevel::High
        } else if MODERATE_MARKERS.is_match(text) {
            ConfidenceLevel::Moderate
        } else if LOW_MARKERS.is_match(text) {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::Unknown
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            ConfidenceLevel::High => 0.8,
            ConfidenceLevel::Moderate | ConfidenceLevel::Unknown => 0.5,
            ConfidenceLevel::Low => 0.3,
        }
    }
}

pub fn confidence_score(text: &str) -> f64 {
    ConfidenceLevel::classify(text).score()
}
