//! Core types for the Warden incident detection and recovery layer.
//!
//! This crate holds the data model shared by the recovery engine and the
//! daemon: identifiers, telemetry snapshots, symptoms, incidents and their
//! state machine, recovery plans, learned patterns and incident events.

pub mod event;
pub mod ids;
pub mod incident;
pub mod pattern;
pub mod plan;
pub mod symptom;
pub mod telemetry;

pub use event::IncidentEvent;
pub use ids::{DeviceId, IncidentId, PlanId, Signature};
pub use incident::{
    CauseCandidate, CauseCategory, Incident, IncidentState, StateTransition, TransitionError,
};
pub use pattern::Pattern;
pub use plan::{
    ActionKind, ActionOutcome, ActionStatus, PlanSource, PlanStage, RecoveryAction, RecoveryPlan,
    RiskLevel,
};
pub use symptom::{Severity, Symptom, SymptomKind};
pub use telemetry::TelemetrySnapshot;
