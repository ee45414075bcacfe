//! Recovery engine configuration.
//!
//! Defines detection rules, recovery budgets and timeouts, the fleet storm
//! breaker and pattern learning parameters. Durations are written as
//! (fractional) seconds on the wire.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detector::{default_rules, DetectionRule};
use crate::error::{RecoveryError, RecoveryResult};

/// Configuration for the whole recovery engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symptom detection and severity scoring.
    pub detection: DetectionConfig,

    /// Recovery budgets, thresholds and timeouts.
    pub recovery: RecoveryConfig,

    /// Fleet storm circuit breaker.
    pub storm: StormConfig,

    /// Pattern learning and persistence.
    pub patterns: PatternConfig,
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> RecoveryResult<()> {
        let r = &self.recovery;

        if r.max_attempts == 0 {
            return Err(RecoveryError::Configuration(
                "recovery.max_attempts must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("recovery.pattern_confidence_floor", r.pattern_confidence_floor),
            ("recovery.min_confidence_threshold", r.min_confidence_threshold),
            ("storm.threshold", self.storm.threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(RecoveryError::Configuration(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !(self.patterns.decay > 0.0 && self.patterns.decay <= 1.0) {
            return Err(RecoveryError::Configuration(format!(
                "patterns.decay must be within (0, 1], got {}",
                self.patterns.decay
            )));
        }
        if r.verification_interval.is_zero() {
            return Err(RecoveryError::Configuration(
                "recovery.verification_interval_sec must be positive".into(),
            ));
        }
        for rule in &self.detection.rules {
            if rule.metric.trim().is_empty() || !rule.threshold.is_finite() {
                return Err(RecoveryError::Configuration(format!(
                    "detection rule for {} is malformed",
                    rule.symptom_kind
                )));
            }
        }

        Ok(())
    }
}

/// Symptom detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold rules evaluated against every snapshot.
    pub rules: Vec<DetectionRule>,

    /// A symptom kind fires at most once per device within this window.
    #[serde(rename = "debounce_window_sec", with = "secs")]
    pub debounce_window: Duration,

    /// How far in the future a snapshot timestamp may be.
    #[serde(rename = "max_clock_skew_sec", with = "secs")]
    pub max_clock_skew: Duration,

    /// Severity multipliers.
    pub criticality: CriticalityConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            debounce_window: Duration::from_secs(30),
            max_clock_skew: Duration::from_secs(300),
            criticality: CriticalityConfig::default(),
        }
    }
}

/// Device criticality used to scale severity scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalityConfig {
    /// Per device class multipliers. Take precedence over markers.
    pub class_multipliers: BTreeMap<String, f64>,

    /// Substrings of a device id that mark the device as critical.
    pub critical_markers: Vec<String>,

    /// Multiplier for devices matching a critical marker.
    pub critical_multiplier: f64,

    /// Multiplier for everything else.
    pub default_multiplier: f64,
}

impl Default for CriticalityConfig {
    fn default() -> Self {
        Self {
            class_multipliers: BTreeMap::new(),
            critical_markers: vec!["critical".into(), "production".into()],
            critical_multiplier: 1.5,
            default_multiplier: 1.0,
        }
    }
}

/// Recovery budgets, thresholds and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Maximum VERIFYING -> PLANNING retries per incident.
    pub max_attempts: u32,

    /// Minimum pattern success rate for a learned plan to be reused.
    pub pattern_confidence_floor: f64,

    /// Minimum top-candidate confidence for a targeted plan.
    pub min_confidence_threshold: f64,

    /// Consecutive low-confidence diagnoses before escalating.
    pub low_confidence_escalation_after: u32,

    /// Total time allowed for health to come back after a plan.
    #[serde(rename = "verification_timeout_sec", with = "secs")]
    pub verification_timeout: Duration,

    /// Initial delay between verification polls.
    #[serde(rename = "verification_interval_sec", with = "secs")]
    pub verification_interval: Duration,

    /// Upper bound on the delay between verification polls.
    #[serde(rename = "max_verification_interval_sec", with = "secs")]
    pub max_verification_interval: Duration,

    /// Timeout of a single health check call.
    #[serde(rename = "health_check_timeout_sec", with = "secs")]
    pub health_check_timeout: Duration,

    /// Timeout of a single action capability call.
    #[serde(rename = "action_timeout_sec", with = "secs")]
    pub action_timeout: Duration,

    /// Timeout of the root cause analyzer.
    #[serde(rename = "analysis_timeout_sec", with = "secs")]
    pub analysis_timeout: Duration,

    /// Timeout of a single notifier call.
    #[serde(rename = "notify_timeout_sec", with = "secs")]
    pub notify_timeout: Duration,

    /// Retries of a single action after a transient failure.
    pub max_action_retries: u32,

    /// First retry backoff; doubles per retry.
    #[serde(rename = "initial_backoff_sec", with = "secs")]
    pub initial_backoff: Duration,

    /// Backoff cap.
    #[serde(rename = "max_backoff_sec", with = "secs")]
    pub max_backoff: Duration,

    /// Blast radius above which plans carry a warning note.
    pub blast_radius_warn: usize,

    /// When false, every plan is escalated instead of executed.
    pub auto_recovery_enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pattern_confidence_floor: 0.6,
            min_confidence_threshold: 0.4,
            low_confidence_escalation_after: 2,
            verification_timeout: Duration::from_secs(60),
            verification_interval: Duration::from_secs(2),
            max_verification_interval: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(10),
            max_action_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            blast_radius_warn: 3,
            auto_recovery_enabled: true,
        }
    }
}

/// Fleet storm circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StormConfig {
    /// Fraction of the fleet opening incidents inside the window that trips the breaker.
    pub threshold: f64,

    /// Sliding window over incident openings.
    #[serde(rename = "window_sec", with = "secs")]
    pub window: Duration,

    /// The breaker never trips for fleets smaller than this.
    pub min_fleet_size: usize,

    /// How long the breaker stays open before half-opening.
    #[serde(rename = "reset_timeout_sec", with = "secs")]
    pub reset_timeout: Duration,

    /// Fixed fleet size. Defaults to the number of devices that have reported.
    pub fleet_size: Option<usize>,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            threshold: 0.30,
            window: Duration::from_secs(60),
            min_fleet_size: 10,
            reset_timeout: Duration::from_secs(300),
            fleet_size: None,
        }
    }
}

/// Pattern learning and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// JSON Lines file holding learned patterns.
    pub path: PathBuf,

    /// Weight kept by prior outcomes each time a new one is recorded.
    pub decay: f64,

    /// How often the store is written back.
    #[serde(rename = "flush_interval_sec", with = "secs")]
    pub flush_interval: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("patterns.jsonl"),
            decay: 0.95,
            flush_interval: Duration::from_secs(30),
        }
    }
}

/// Serde helper for durations written as seconds.
pub(crate) mod secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                seconds
            )));
        }
        Ok(Duration::from_secs_f64(seconds))
    }
}
