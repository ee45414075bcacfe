//! Error types for warden-recovery.
//!
//! [`RecoveryError`] is the engine's error taxonomy. Capability
//! implementations report failures as [`CapabilityError`]; the action
//! executor and verifier convert those into `RecoveryError` kinds at their
//! boundary so nothing from an external collaborator reaches the
//! orchestrator unclassified.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_types::{ActionKind, DeviceId, TransitionError};

/// Errors that can occur while detecting, diagnosing and remediating incidents.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Telemetry payload failed validation.
    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(String),

    /// An action failed in a way that may succeed on retry.
    #[error("transient failure of {action} on {target}: {reason}")]
    TransientActionFailure {
        action: ActionKind,
        target: String,
        reason: String,
        side_effects: SideEffects,
    },

    /// An action failed and retrying will not help.
    #[error("permanent failure of {action} on {target}: {reason}")]
    PermanentActionFailure {
        action: ActionKind,
        target: String,
        reason: String,
    },

    /// Health never came back within the verification window.
    #[error("verification timed out for device {device_id} after {waited_ms}ms")]
    VerificationTimeout { device_id: DeviceId, waited_ms: u64 },

    /// Diagnosis was not confident enough for a targeted plan.
    #[error("diagnosis confidence {confidence:.2} below threshold {threshold:.2}")]
    DiagnosisLowConfidence { confidence: f64, threshold: f64 },

    /// An external capability could not be reached at all.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Too many devices opened incidents at once; automation is paused.
    #[error("fleet storm circuit breaker open: {opened}/{fleet_size} devices opened incidents")]
    FleetStormCircuitBreaker { opened: usize, fleet_size: usize },

    /// The incident state machine rejected a transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A topology change would introduce a dependency cycle.
    #[error("dependency cycle involving {0}")]
    DependencyCycle(String),

    /// No incident is recorded for the device.
    #[error("no incident recorded for device {0}")]
    IncidentNotFound(DeviceId),

    /// Reading or writing the pattern file failed.
    #[error("pattern store I/O error: {0}")]
    Persistence(#[from] std::io::Error),

    /// A pattern line could not be parsed.
    #[error("pattern store format error at line {line}: {reason}")]
    PatternFormat { line: usize, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for recovery operations.
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// What a failed capability call left behind on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffects {
    /// The action was detectably not applied.
    NotApplied,
    /// The action was applied and then rolled back.
    Reverted,
    /// Nothing is known about what happened.
    Unknown,
}

impl SideEffects {
    /// Whether a non-idempotent action may safely be tried again.
    pub fn permits_retry(&self) -> bool {
        matches!(self, SideEffects::NotApplied | SideEffects::Reverted)
    }
}

/// Failure reported by an external capability implementation.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("transient failure: {reason}")]
    Transient {
        reason: String,
        side_effects: SideEffects,
    },

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

impl CapabilityError {
    pub fn transient(reason: impl Into<String>, side_effects: SideEffects) -> Self {
        CapabilityError::Transient {
            reason: reason.into(),
            side_effects,
        }
    }
}
