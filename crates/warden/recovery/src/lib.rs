//! # Warden Recovery - Incident Detection and Recovery for Device Fleets
//!
//! This crate implements the autonomous control loop that watches device
//! telemetry, opens incidents, diagnoses them, and runs remediation until
//! the device is verified healthy or a human has to take over.
//!
//! ## Key Components
//!
//! - [`TelemetryIngest`]: snapshot validation and latest-value cache
//! - [`SymptomDetector`]: threshold rules with debounce
//! - [`SeverityAssessor`]: weighted symptom scoring with device criticality
//! - [`DependencyGraph`]: service dependencies, blast radius and staging
//! - [`RootCauseAnalyzer`]: pluggable diagnosis, rule-based by default
//! - [`PatternStore`]: learned plans with decayed success rates
//! - [`RecoveryPlanner`]: pattern, rule or fallback plan selection
//! - [`ActionExecutor`] and [`Verifier`]: remediation with retries, then health polling
//! - [`EscalationManager`]: human notification
//! - [`FleetStormBreaker`]: pauses automation when too much of the fleet is failing
//! - [`IncidentOrchestrator`]: the per-incident state machine tying it together
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden_recovery::{
//!     Capabilities, DependencyGraph, EngineConfig, IncidentOrchestrator, LogNotifier,
//!     NoOpCapability, PatternStore, RuleBasedAnalyzer, StaticHealth, TelemetryIngest,
//! };
//! use warden_types::{DeviceId, TelemetrySnapshot};
//!
//! # async fn example() {
//! let config = EngineConfig::default();
//! let ingest = Arc::new(TelemetryIngest::from_config(&config.detection));
//! let patterns = Arc::new(PatternStore::new(
//!     config.patterns.decay,
//!     config.recovery.pattern_confidence_floor,
//! ));
//! let capabilities = Capabilities {
//!     analyzer: Arc::new(RuleBasedAnalyzer::default()),
//!     actions: Arc::new(NoOpCapability),
//!     health: Arc::new(StaticHealth(true)),
//!     notifier: Arc::new(LogNotifier),
//! };
//!
//! let orchestrator = IncidentOrchestrator::new(
//!     config,
//!     ingest,
//!     DependencyGraph::default_topology(),
//!     patterns,
//!     capabilities,
//! )
//! .unwrap();
//!
//! let snapshot = TelemetrySnapshot::new(DeviceId::new("sensor-7"), chrono::Utc::now())
//!     .with_metric("battery_voltage", 3.1);
//! let receipt = orchestrator.ingest(snapshot).await.unwrap();
//! println!("incident: {:?}", receipt.incident_id);
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod detector;
pub mod diagnosis;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod orchestrator;
pub mod patterns;
pub mod planner;
pub mod repository;
pub mod severity;
pub mod storm;
pub mod telemetry;
pub mod topology;
pub mod verifier;

pub use capability::{
    ActionCapability, ActionReport, FailingCapability, HealthCheck, LogNotifier, NoOpCapability,
    Notifier, StaticHealth,
};
pub use config::{
    CriticalityConfig, DetectionConfig, EngineConfig, PatternConfig, RecoveryConfig, StormConfig,
};
pub use detector::{default_rules, Comparator, Detection, DetectionRule, SymptomDetector};
pub use diagnosis::{
    default_diagnosis_rules, DependencyContext, DiagnosisRule, RootCauseAnalyzer,
    RuleBasedAnalyzer,
};
pub use error::{CapabilityError, RecoveryError, RecoveryResult, SideEffects};
pub use escalation::{Channel, EscalationManager};
pub use executor::ActionExecutor;
pub use orchestrator::{Capabilities, FleetSummary, IncidentOrchestrator, IngestReceipt};
pub use patterns::PatternStore;
pub use planner::{PlanDecision, RecoveryPlanner};
pub use repository::IncidentRepository;
pub use severity::SeverityAssessor;
pub use storm::{FleetStormBreaker, StormState, StormStats};
pub use telemetry::TelemetryIngest;
pub use topology::DependencyGraph;
pub use verifier::Verifier;
