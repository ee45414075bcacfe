//! Symptom detection.
//!
//! Evaluates threshold rules against a snapshot. Detection is a pure function
//! of the snapshot, the rule set and the symptoms recently emitted for the
//! device; repeated firings of a kind inside the debounce window are
//! suppressed.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_types::{Symptom, SymptomKind, TelemetrySnapshot};

use crate::config::DetectionConfig;

/// Threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
}

impl Comparator {
    pub fn fires(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::LessThan => value < threshold,
            Comparator::LessOrEqual => value <= threshold,
            Comparator::GreaterThan => value > threshold,
            Comparator::GreaterOrEqual => value >= threshold,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparator::LessThan => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::GreaterThan => ">",
            Comparator::GreaterOrEqual => ">=",
        };
        f.write_str(op)
    }
}

/// One threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    pub symptom_kind: SymptomKind,
    pub severity_weight: f64,
}

impl DetectionRule {
    pub fn new(
        metric: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
        symptom_kind: SymptomKind,
        severity_weight: f64,
    ) -> Self {
        Self {
            metric: metric.into(),
            comparator,
            threshold,
            symptom_kind,
            severity_weight,
        }
    }
}

/// The built-in rule set for battery powered field devices.
pub fn default_rules() -> Vec<DetectionRule> {
    use Comparator::*;
    use SymptomKind::*;

    vec![
        DetectionRule::new("battery_voltage", LessThan, 3.2, LowBattery, 2.0),
        DetectionRule::new("temperature", GreaterThan, 50.0, HighTemperature, 2.0),
        DetectionRule::new("temperature", LessThan, -10.0, LowTemperature, 2.0),
        DetectionRule::new("memory_usage", GreaterThan, 90.0, HighMemory, 2.0),
        DetectionRule::new("cpu_usage", GreaterThan, 95.0, HighCpu, 1.0),
        DetectionRule::new("error_count", GreaterThan, 10.0, HighErrorRate, 1.0),
        DetectionRule::new("wifi_signal_strength", LessThan, -80.0, WeakSignal, 1.0),
        DetectionRule::new("uptime_hours", LessThan, 0.1, RebootLoop, 2.0),
    ]
}

/// Result of evaluating one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Symptoms to report.
    pub symptoms: Vec<Symptom>,

    /// Kinds that fired but were suppressed by the debounce window.
    pub suppressed: Vec<SymptomKind>,
}

impl Detection {
    /// No rule fired at all.
    pub fn is_healthy(&self) -> bool {
        self.symptoms.is_empty() && self.suppressed.is_empty()
    }
}

/// Evaluates detection rules against snapshots.
#[derive(Debug, Clone)]
pub struct SymptomDetector {
    rules: Vec<DetectionRule>,
    debounce_window: Duration,
}

impl SymptomDetector {
    pub fn new(rules: Vec<DetectionRule>, debounce_window: Duration) -> Self {
        Self {
            rules,
            debounce_window,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.rules.clone(), config.debounce_window)
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// Evaluate `snapshot`. `recent` holds symptoms already emitted for the
    /// device; a kind found there inside the debounce window is suppressed.
    /// Missing metrics are skipped. Each kind is reported at most once per
    /// snapshot, by the first rule that fires for it.
    pub fn detect(&self, snapshot: &TelemetrySnapshot, recent: &[Symptom]) -> Detection {
        let window = chrono::Duration::from_std(self.debounce_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut seen = BTreeSet::new();
        let mut detection = Detection::default();

        for rule in &self.rules {
            let Some(value) = snapshot.metric(&rule.metric) else {
                continue;
            };
            if !rule.comparator.fires(value, rule.threshold) {
                continue;
            }
            if !seen.insert(rule.symptom_kind) {
                continue;
            }

            let debounced = recent.iter().any(|s| {
                s.kind == rule.symptom_kind
                    && snapshot.timestamp >= s.detected_at
                    && snapshot.timestamp - s.detected_at < window
            });
            if debounced {
                detection.suppressed.push(rule.symptom_kind);
                continue;
            }

            detection.symptoms.push(Symptom::new(
                rule.symptom_kind,
                rule.metric.clone(),
                value,
                rule.threshold,
                rule.severity_weight,
                snapshot.timestamp,
            ));
        }

        detection
    }

    /// True when no rule fires for `snapshot`, ignoring debounce.
    pub fn is_healthy(&self, snapshot: &TelemetrySnapshot) -> bool {
        self.detect(snapshot, &[]).is_healthy()
    }

    /// True when `snapshot` reports every metric behind `symptoms` and no
    /// rule fires. A snapshot that is silent on a symptom's metric proves
    /// nothing about it.
    pub fn clears(&self, snapshot: &TelemetrySnapshot, symptoms: &[Symptom]) -> bool {
        symptoms
            .iter()
            .all(|s| snapshot.metric(&s.metric).is_some())
            && self.is_healthy(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::DeviceId;

    fn detector() -> SymptomDetector {
        SymptomDetector::new(default_rules(), Duration::from_secs(30))
    }

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot::new(DeviceId::new("node-1"), Utc::now())
    }

    #[test]
    fn test_low_battery_fires() {
        let detection = detector().detect(&snapshot().with_metric("battery_voltage", 3.1), &[]);
        assert_eq!(detection.symptoms.len(), 1);

        let symptom = &detection.symptoms[0];
        assert_eq!(symptom.kind, SymptomKind::LowBattery);
        assert_eq!(symptom.observed_value, 3.1);
        assert_eq!(symptom.threshold, 3.2);
        assert_eq!(symptom.severity_weight, 2.0);
    }

    #[test]
    fn test_boundary_is_not_a_symptom() {
        let detection = detector().detect(
            &snapshot()
                .with_metric("battery_voltage", 3.2)
                .with_metric("temperature", 50.0),
            &[],
        );
        assert!(detection.is_healthy());
    }

    #[test]
    fn test_missing_metrics_skipped() {
        let detection = detector().detect(&snapshot().with_metric("unrelated", 1e9), &[]);
        assert!(detection.is_healthy());
    }

    #[test]
    fn test_debounce_suppresses_repeat() {
        let detector = detector();
        let first = snapshot().with_metric("cpu_usage", 99.0);
        let emitted = detector.detect(&first, &[]).symptoms;
        assert_eq!(emitted.len(), 1);

        let mut again = first.clone();
        again.timestamp = first.timestamp + chrono::Duration::seconds(10);
        let detection = detector.detect(&again, &emitted);
        assert!(detection.symptoms.is_empty());
        assert_eq!(detection.suppressed, vec![SymptomKind::HighCpu]);
        assert!(!detection.is_healthy());

        let mut later = first.clone();
        later.timestamp = first.timestamp + chrono::Duration::seconds(31);
        assert_eq!(detector.detect(&later, &emitted).symptoms.len(), 1);
    }

    #[test]
    fn test_silent_snapshot_does_not_clear() {
        let detector = detector();
        let sick = snapshot().with_metric("battery_voltage", 3.0);
        let symptoms = detector.detect(&sick, &[]).symptoms;

        let silent = snapshot().with_metric("wifi_signal_strength", -50.0);
        assert!(detector.is_healthy(&silent));
        assert!(!detector.clears(&silent, &symptoms));

        let still_low = snapshot().with_metric("battery_voltage", 3.1);
        assert!(!detector.clears(&still_low, &symptoms));

        let recovered = snapshot().with_metric("battery_voltage", 3.9);
        assert!(detector.clears(&recovered, &symptoms));
    }

    #[test]
    fn test_comparators() {
        assert!(Comparator::LessThan.fires(1.0, 2.0));
        assert!(!Comparator::LessThan.fires(2.0, 2.0));
        assert!(Comparator::LessOrEqual.fires(2.0, 2.0));
        assert!(Comparator::GreaterOrEqual.fires(2.0, 2.0));
        assert!(!Comparator::GreaterThan.fires(2.0, 2.0));
    }

    #[test]
    fn test_rule_wire_format() {
        let rule: DetectionRule = serde_json::from_str(
            r#"{"metric":"humidity","comparator":">=","threshold":95,"symptom_kind":"HIGH_ERROR_RATE","severity_weight":1}"#,
        )
        .unwrap();
        assert_eq!(rule.comparator, Comparator::GreaterOrEqual);
        assert_eq!(rule.symptom_kind, SymptomKind::HighErrorRate);
    }
}
