//! Symptoms and severity
//!
//! A symptom is one discrete abnormal observation derived from telemetry.
//! Symptoms are immutable once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of abnormal observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymptomKind {
    LowBattery,
    HighTemperature,
    LowTemperature,
    HighMemory,
    HighCpu,
    HighErrorRate,
    WeakSignal,
    RebootLoop,
}

impl SymptomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymptomKind::LowBattery => "LOW_BATTERY",
            SymptomKind::HighTemperature => "HIGH_TEMPERATURE",
            SymptomKind::LowTemperature => "LOW_TEMPERATURE",
            SymptomKind::HighMemory => "HIGH_MEMORY",
            SymptomKind::HighCpu => "HIGH_CPU",
            SymptomKind::HighErrorRate => "HIGH_ERROR_RATE",
            SymptomKind::WeakSignal => "WEAK_SIGNAL",
            SymptomKind::RebootLoop => "REBOOT_LOOP",
        }
    }
}

impl fmt::Display for SymptomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single abnormal observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub kind: SymptomKind,
    pub metric: String,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity_weight: f64,
    pub detected_at: DateTime<Utc>,
}

impl Symptom {
    pub fn new(
        kind: SymptomKind,
        metric: impl Into<String>,
        observed_value: f64,
        threshold: f64,
        severity_weight: f64,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            metric: metric.into(),
            observed_value,
            threshold,
            severity_weight,
            detected_at,
        }
    }
}

/// Five-level ordinal incident severity.
///
/// Ordering follows declaration order, so `Severity::Critical > Severity::High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
    Catastrophic,
}

impl Severity {
    /// Clip a raw severity score onto the ordinal scale.
    pub fn from_score(score: f64) -> Self {
        if score >= 10.0 {
            Severity::Catastrophic
        } else if score >= 7.0 {
            Severity::Critical
        } else if score >= 4.0 {
            Severity::High
        } else if score >= 2.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
            Severity::Catastrophic => 5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Catastrophic => write!(f, "CATASTROPHIC"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!(Severity::from_score(1.5), Severity::Low);
        assert_eq!(Severity::from_score(2.0), Severity::Medium);
        assert_eq!(Severity::from_score(4.0), Severity::High);
        assert_eq!(Severity::from_score(7.5), Severity::Critical);
        assert_eq!(Severity::from_score(10.0), Severity::Catastrophic);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Catastrophic > Severity::Critical);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Critical.level(), 4);
    }

    #[test]
    fn test_symptom_kind_wire_name() {
        let json = serde_json::to_string(&SymptomKind::LowBattery).unwrap();
        assert_eq!(json, "\"LOW_BATTERY\"");
        assert_eq!(SymptomKind::RebootLoop.to_string(), "REBOOT_LOOP");
    }
}
