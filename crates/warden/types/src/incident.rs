//! Incidents and the incident state machine
//!
//! An incident is the stateful record of one device's ongoing problem and
//! the remediation attempts made for it. It is in exactly one
//! [`IncidentState`] at a time; every state change goes through
//! [`Incident::transition`] or [`Incident::retry`], which enforce the allowed
//! edges and keep the transition history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ids::{DeviceId, IncidentId};
use crate::plan::{ActionOutcome, RecoveryPlan};
use crate::symptom::{Severity, Symptom, SymptomKind};

/// Lifecycle state of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    Detected,
    Diagnosing,
    Planning,
    Executing,
    Verifying,
    Resolved,
    Escalated,
    Failed,
}

impl IncidentState {
    pub const ALL: [IncidentState; 8] = [
        IncidentState::Detected,
        IncidentState::Diagnosing,
        IncidentState::Planning,
        IncidentState::Executing,
        IncidentState::Verifying,
        IncidentState::Resolved,
        IncidentState::Escalated,
        IncidentState::Failed,
    ];

    /// Terminal states admit no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IncidentState::Resolved | IncidentState::Escalated | IncidentState::Failed
        )
    }

    /// Whether the state machine has an edge from `self` to `to`.
    pub fn can_transition_to(&self, to: IncidentState) -> bool {
        use IncidentState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, to) {
            (_, Escalated) | (_, Failed) => true,
            (Detected, Diagnosing) => true,
            (Diagnosing, Planning) => true,
            (Planning, Executing) => true,
            (Executing, Verifying) => true,
            (Verifying, Resolved) => true,
            (Verifying, Planning) => true,
            // superseding symptoms restart diagnosis
            (Diagnosing | Planning | Executing | Verifying, Diagnosing) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::Detected => "DETECTED",
            IncidentState::Diagnosing => "DIAGNOSING",
            IncidentState::Planning => "PLANNING",
            IncidentState::Executing => "EXECUTING",
            IncidentState::Verifying => "VERIFYING",
            IncidentState::Resolved => "RESOLVED",
            IncidentState::Escalated => "ESCALATED",
            IncidentState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown incident state: {}", s))
    }
}

/// Root-cause category produced by diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CauseCategory {
    PowerSupply,
    Thermal,
    ResourceExhaustion,
    FirmwareInstability,
    Network,
    Unknown,
}

impl CauseCategory {
    /// Stable lowercase key used in plan ids and signatures.
    pub fn as_key(&self) -> &'static str {
        match self {
            CauseCategory::PowerSupply => "power_supply",
            CauseCategory::Thermal => "thermal",
            CauseCategory::ResourceExhaustion => "resource_exhaustion",
            CauseCategory::FirmwareInstability => "firmware_instability",
            CauseCategory::Network => "network",
            CauseCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

/// A ranked root-cause hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseCandidate {
    pub cause: CauseCategory,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Symptom kinds that support this cause
    #[serde(default)]
    pub evidence: Vec<SymptomKind>,
}

/// One entry of an incident's transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: IncidentState,
    pub to: IncidentState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Errors raised by the incident state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid incident transition from {from} to {to}")]
    Invalid {
        from: IncidentState,
        to: IncidentState,
    },

    #[error("attempt budget exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },
}

/// Aggregate record of one device's problem and its remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub device_id: DeviceId,
    pub device_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    symptoms: Vec<Symptom>,
    severity: Severity,
    state: IncidentState,
    pub root_cause_candidates: Vec<CauseCandidate>,
    pub chosen_plan: Option<RecoveryPlan>,
    attempt_count: u32,
    /// Consecutive diagnoses whose top confidence was under the threshold
    #[serde(default)]
    pub low_confidence_streak: u32,
    /// Outcomes of the most recent execution attempt
    #[serde(default)]
    pub last_outcomes: Vec<ActionOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    history: Vec<StateTransition>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Incident {
    /// Open a new incident in `DETECTED`.
    pub fn open(
        device_id: DeviceId,
        device_class: impl Into<String>,
        service: Option<String>,
        symptoms: Vec<Symptom>,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IncidentId::generate(&device_id, now),
            device_id,
            device_class: device_class.into(),
            service,
            symptoms,
            severity,
            state: IncidentState::Detected,
            root_cause_candidates: Vec::new(),
            chosen_plan: None,
            attempt_count: 0,
            low_confidence_streak: 0,
            last_outcomes: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            history: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn state(&self) -> IncidentState {
        self.state
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn symptoms(&self) -> &[Symptom] {
        &self.symptoms
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Move to `to`, recording the transition.
    pub fn transition(
        &mut self,
        to: IncidentState,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Invalid {
                from: self.state,
                to,
            });
        }

        let now = Utc::now();
        self.history.push(StateTransition {
            from: self.state,
            to,
            at: now,
            reason: reason.into(),
        });
        self.state = to;
        self.updated_at = now;

        if to == IncidentState::Resolved {
            self.resolved_at = Some(now);
        }

        Ok(())
    }

    /// Take the `VERIFYING -> PLANNING` retry edge, consuming one attempt.
    ///
    /// This is the only place `attempt_count` grows, and it never grows past
    /// `max_attempts`.
    pub fn retry(
        &mut self,
        max_attempts: u32,
        reason: impl Into<String>,
    ) -> Result<u32, TransitionError> {
        if self.state != IncidentState::Verifying {
            return Err(TransitionError::Invalid {
                from: self.state,
                to: IncidentState::Planning,
            });
        }
        if self.attempt_count >= max_attempts {
            return Err(TransitionError::AttemptsExhausted {
                attempts: self.attempt_count,
                max_attempts,
            });
        }

        self.transition(IncidentState::Planning, reason)?;
        self.attempt_count += 1;
        Ok(self.attempt_count)
    }

    /// Union new symptoms into the set, keyed by kind. A newer observation
    /// of a kind already present replaces the older one.
    ///
    /// Returns the number of kinds that were not present before.
    pub fn merge_symptoms(&mut self, incoming: impl IntoIterator<Item = Symptom>) -> usize {
        let mut added = 0;

        for symptom in incoming {
            match self.symptoms.iter_mut().find(|s| s.kind == symptom.kind) {
                Some(existing) => {
                    if symptom.detected_at >= existing.detected_at {
                        *existing = symptom;
                    }
                }
                None => {
                    self.symptoms.push(symptom);
                    added += 1;
                }
            }
        }

        self.updated_at = Utc::now();
        added
    }

    /// Raise severity to `assessed` if higher. Severity of an open incident
    /// never decreases through this path.
    pub fn raise_severity(&mut self, assessed: Severity) -> bool {
        if assessed > self.severity {
            self.severity = assessed;
            true
        } else {
            false
        }
    }

    /// Clear the symptom set after a healthy snapshot and take the re-scored
    /// severity as-is.
    pub fn clear_symptoms(&mut self, rescored: Severity) {
        self.symptoms.clear();
        self.severity = rescored;
        self.updated_at = Utc::now();
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}
