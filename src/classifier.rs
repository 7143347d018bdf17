//! Significance classification
//!
//! Pure threshold function mapping a USD value to an ordinal label. The `low`
//! threshold doubles as the admission bar: the indexer never turns values
//! below it into events.

use serde::{Deserialize, Serialize};

/// Ordinal significance label, low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    Low,
    Medium,
    High,
}

impl Significance {
    /// Ordinal rank persisted alongside the label so the store can filter on
    /// an inclusive lower bound with a plain integer comparison.
    pub fn rank(&self) -> i64 {
        match self {
            Significance::Low => 0,
            Significance::Medium => 1,
            Significance::High => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Significance::Low => "low",
            Significance::Medium => "medium",
            Significance::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Significance::Low),
            "medium" => Some(Significance::Medium),
            "high" => Some(Significance::High),
            _ => None,
        }
    }
}

/// USD thresholds, configuration not constants.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 1_000_000.0,
            medium: 100_000.0,
            low: 10_000.0,
        }
    }
}

/// Classify a USD value against the configured thresholds.
///
/// Monotonic non-decreasing in `value_usd`: high if >= high, else medium if
/// >= medium, else low. Admission (value >= low) is the caller's check.
pub fn classify(value_usd: f64, thresholds: &Thresholds) -> Significance {
    if value_usd >= thresholds.high {
        Significance::High
    } else if value_usd >= thresholds.medium {
        Significance::Medium
    } else {
        Significance::Low
    }
}
