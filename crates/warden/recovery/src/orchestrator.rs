//! Incident orchestration.
//!
//! The orchestrator owns the per-device incident lifecycle. Telemetry goes
//! through detection and severity scoring synchronously; everything after
//! DETECTED runs on a per-incident worker task:
//!
//! DETECTED -> DIAGNOSING -> PLANNING -> EXECUTING -> VERIFYING -> RESOLVED
//!
//! with VERIFYING -> PLANNING retries bounded by `max_attempts`, and
//! ESCALATED or FAILED reachable from any non-terminal state. New symptoms
//! arriving for an in-flight incident cancel its worker and restart
//! diagnosis with the merged symptom set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use warden_types::{
    CauseCandidate, DeviceId, Incident, IncidentEvent, IncidentId, IncidentState, Severity,
    Symptom, SymptomKind, TelemetrySnapshot, TransitionError,
};

use crate::capability::{ActionCapability, HealthCheck, Notifier};
use crate::config::EngineConfig;
use crate::detector::SymptomDetector;
use crate::diagnosis::{rank, DependencyContext, RootCauseAnalyzer};
use crate::error::{RecoveryError, RecoveryResult};
use crate::escalation::EscalationManager;
use crate::executor::ActionExecutor;
use crate::patterns::PatternStore;
use crate::planner::RecoveryPlanner;
use crate::repository::IncidentRepository;
use crate::severity::SeverityAssessor;
use crate::storm::{FleetStormBreaker, StormStats};
use crate::telemetry::TelemetryIngest;
use crate::topology::DependencyGraph;
use crate::verifier::Verifier;

/// External collaborators injected into the engine.
#[derive(Clone)]
pub struct Capabilities {
    pub analyzer: Arc<dyn RootCauseAnalyzer>,
    pub actions: Arc<dyn ActionCapability>,
    pub health: Arc<dyn HealthCheck>,
    pub notifier: Arc<dyn Notifier>,
}

/// Result of ingesting one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub device_id: DeviceId,

    /// Symptoms reported by this snapshot
    pub symptoms: Vec<Symptom>,

    /// Kinds that fired but were debounced
    pub suppressed: Vec<SymptomKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IncidentState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

/// Fleet-wide view of incidents.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSummary {
    pub known_devices: usize,
    pub total_incidents: usize,
    pub open_incidents: usize,
    pub by_state: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub patterns: usize,
    pub storm: StormStats,
}

enum Step {
    Continue,
    Stop,
}

enum AfterIngest {
    Nothing,
    Spawn {
        generation: u64,
        lock: Arc<Mutex<()>>,
    },
    Escalate(Box<Incident>),
}

/// Drives incidents from detection to a terminal state.
#[derive(Clone)]
pub struct IncidentOrchestrator {
    engine: Arc<Engine>,
}

struct Engine {
    config: EngineConfig,
    telemetry: Arc<TelemetryIngest>,
    detector: SymptomDetector,
    assessor: SeverityAssessor,
    graph: Arc<RwLock<DependencyGraph>>,
    analyzer: Arc<dyn RootCauseAnalyzer>,
    planner: RecoveryPlanner,
    patterns: Arc<PatternStore>,
    executor: ActionExecutor,
    verifier: Arc<Verifier>,
    escalation: Arc<EscalationManager>,
    storm: FleetStormBreaker,
    repository: IncidentRepository,
    event_tx: broadcast::Sender<IncidentEvent>,
}

impl IncidentOrchestrator {
    pub fn new(
        config: EngineConfig,
        telemetry: Arc<TelemetryIngest>,
        graph: DependencyGraph,
        patterns: Arc<PatternStore>,
        capabilities: Capabilities,
    ) -> RecoveryResult<Self> {
        graph.validate()?;

        let (event_tx, _) = broadcast::channel(1024);
        let escalation = Arc::new(EscalationManager::new(
            capabilities.notifier,
            config.recovery.notify_timeout,
        ));
        let verifier = Arc::new(Verifier::new(capabilities.health, &config.recovery));
        let executor = ActionExecutor::new(
            capabilities.actions,
            escalation.clone(),
            verifier.clone(),
            &config.recovery,
        );

        let engine = Engine {
            detector: SymptomDetector::from_config(&config.detection),
            assessor: SeverityAssessor::new(config.detection.criticality.clone()),
            graph: Arc::new(RwLock::new(graph)),
            analyzer: capabilities.analyzer,
            planner: RecoveryPlanner::new(&config.recovery, patterns.clone()),
            storm: FleetStormBreaker::new(config.storm.clone()),
            repository: IncidentRepository::new(),
            telemetry,
            patterns,
            executor,
            verifier,
            escalation,
            event_tx,
            config,
        };

        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Subscribe to incident lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.engine.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryIngest> {
        &self.engine.telemetry
    }

    pub fn patterns(&self) -> &Arc<PatternStore> {
        &self.engine.patterns
    }

    pub fn storm(&self) -> &FleetStormBreaker {
        &self.engine.storm
    }

    /// Shared handle on the dependency graph. Writers block new plan
    /// computations only while they hold the lock.
    pub fn topology(&self) -> Arc<RwLock<DependencyGraph>> {
        self.engine.graph.clone()
    }

    /// Replace the dependency graph after checking it is acyclic.
    pub async fn replace_topology(&self, graph: DependencyGraph) -> RecoveryResult<()> {
        graph.validate()?;
        let services = graph.len();
        *self.engine.graph.write().await = graph;
        info!(services, "Dependency graph replaced");
        Ok(())
    }

    /// Current or most recent incident of a device.
    pub fn incident(&self, device_id: &DeviceId) -> Option<Incident> {
        self.engine.repository.get(device_id)
    }

    /// All incidents, optionally filtered by state.
    pub fn incidents(&self, state: Option<IncidentState>) -> Vec<Incident> {
        self.engine.repository.list(state)
    }

    pub fn fleet_summary(&self) -> FleetSummary {
        let incidents = self.engine.repository.list(None);
        let mut by_state = BTreeMap::new();
        let mut by_severity = BTreeMap::new();

        for incident in &incidents {
            *by_state.entry(incident.state().to_string()).or_insert(0) += 1;
            *by_severity.entry(incident.severity().to_string()).or_insert(0) += 1;
        }

        let known_devices = self.engine.telemetry.known_devices();
        FleetSummary {
            known_devices,
            total_incidents: incidents.len(),
            open_incidents: incidents.iter().filter(|i| i.is_open()).count(),
            by_state,
            by_severity,
            patterns: self.engine.patterns.len(),
            storm: self.engine.storm.stats(known_devices),
        }
    }

    /// Ingest one snapshot: validate, detect, score, and open or amend the
    /// device's incident.
    #[instrument(skip(self, snapshot), fields(device_id = %snapshot.device_id))]
    pub async fn ingest(&self, snapshot: TelemetrySnapshot) -> RecoveryResult<IngestReceipt> {
        let engine = &self.engine;
        engine.telemetry.accept(&snapshot)?;

        let device_id = snapshot.device_id.clone();
        let mut events = Vec::new();

        let (receipt, after) = {
            let mut slot = engine.repository.slot(&device_id);
            let detection = engine.detector.detect(&snapshot, &slot.recent);
            remember(
                &mut slot.recent,
                &detection.symptoms,
                &snapshot,
                engine.detector.debounce_window(),
            );

            let mut after = AfterIngest::Nothing;
            let open = slot.incident.as_ref().map_or(false, |i| i.is_open());

            if detection.is_healthy() {
                if let Some(incident) = slot.incident.as_mut().filter(|i| i.is_open()) {
                    if incident.symptoms().is_empty() {
                        // nothing to clear
                    } else if engine.detector.clears(&snapshot, incident.symptoms()) {
                        let rescored =
                            engine
                                .assessor
                                .assess(&[], &incident.device_id, &incident.device_class);
                        incident.clear_symptoms(rescored);
                        debug!(incident_id = %incident.id, "Healthy snapshot cleared symptoms");
                    } else {
                        debug!(
                            incident_id = %incident.id,
                            "Snapshot does not report the symptomatic metrics, symptoms kept"
                        );
                    }
                }
            } else if detection.symptoms.is_empty() {
                debug!(suppressed = ?detection.suppressed, "All symptoms debounced");
            } else if open {
                let generation = slot.generation + 1;
                let superseded = slot.incident.as_mut().map(|incident| {
                    engine.amend(incident, detection.symptoms.clone(), &mut events)
                });

                if superseded == Some(true) {
                    slot.generation = generation;
                    if let Some(worker) = slot.worker.take() {
                        worker.abort();
                    }
                    after = AfterIngest::Spawn {
                        generation,
                        lock: slot.recovery_lock.clone(),
                    };
                }
            } else {
                let incident = engine.open(&snapshot, detection.symptoms.clone(), &mut events);
                slot.generation += 1;
                if let Some(worker) = slot.worker.take() {
                    worker.abort();
                }

                after = if incident.is_open() {
                    AfterIngest::Spawn {
                        generation: slot.generation,
                        lock: slot.recovery_lock.clone(),
                    }
                } else {
                    AfterIngest::Escalate(Box::new(incident.clone()))
                };
                slot.incident = Some(incident);
            }

            if let AfterIngest::Spawn { generation, lock } = &after {
                let worker = engine.clone();
                let id = device_id.clone();
                let (generation, lock) = (*generation, lock.clone());
                slot.worker = Some(tokio::spawn(async move {
                    worker.run(id, generation, lock).await;
                }));
            }

            let receipt = IngestReceipt {
                device_id: device_id.clone(),
                symptoms: detection.symptoms,
                suppressed: detection.suppressed,
                incident_id: slot.incident.as_ref().map(|i| i.id.clone()),
                state: slot.incident.as_ref().map(|i| i.state()),
                severity: slot.incident.as_ref().map(|i| i.severity()),
            };
            (receipt, after)
        };

        for event in events {
            engine.emit(event);
        }
        if let AfterIngest::Escalate(incident) = after {
            let escalation = engine.escalation.clone();
            tokio::spawn(async move {
                escalation.escalate(&incident).await;
            });
        }

        Ok(receipt)
    }

    /// Cancel every in-flight worker.
    pub fn shutdown(&self) {
        let aborted = self.engine.repository.abort_workers();
        info!(aborted, "Incident workers stopped");
    }
}

/// Keep symptoms emitted inside the debounce window, plus the new ones.
fn remember(
    recent: &mut Vec<Symptom>,
    emitted: &[Symptom],
    snapshot: &TelemetrySnapshot,
    window: std::time::Duration,
) {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    recent.retain(|s| snapshot.timestamp - s.detected_at < window);
    recent.extend(emitted.iter().cloned());
}

impl Engine {
    fn emit(&self, event: IncidentEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Open a new incident. It starts ESCALATED when the storm breaker
    /// refuses it or its severity is catastrophic.
    fn open(
        &self,
        snapshot: &TelemetrySnapshot,
        symptoms: Vec<Symptom>,
        events: &mut Vec<IncidentEvent>,
    ) -> Incident {
        let severity = self
            .assessor
            .assess(&symptoms, &snapshot.device_id, &snapshot.device_class);
        let mut incident = Incident::open(
            snapshot.device_id.clone(),
            snapshot.device_class.clone(),
            snapshot.service.clone(),
            symptoms,
            severity,
            chrono::Utc::now(),
        );

        info!(
            incident_id = %incident.id,
            severity = %severity,
            symptoms = incident.symptoms().len(),
            "Incident opened"
        );
        events.push(IncidentEvent::Opened {
            incident_id: incident.id.clone(),
            device_id: incident.device_id.clone(),
            severity,
        });

        let admission = self.storm.record_opening(
            &incident.device_id,
            self.telemetry.known_devices(),
            Instant::now(),
        );
        let escalate_reason = match admission {
            Err(e) => Some(e.to_string()),
            Ok(()) if severity == Severity::Catastrophic => {
                Some("catastrophic severity at detection".to_string())
            }
            Ok(()) => None,
        };

        if let Some(reason) = escalate_reason {
            incident.add_note(reason.clone());
            if incident.transition(IncidentState::Escalated, reason.clone()).is_ok() {
                events.push(IncidentEvent::Transitioned {
                    incident_id: incident.id.clone(),
                    device_id: incident.device_id.clone(),
                    from: IncidentState::Detected,
                    to: IncidentState::Escalated,
                    reason,
                });
            }
        }

        incident
    }

    /// Merge new symptoms into an open incident. Returns true when the
    /// in-flight work must be superseded.
    fn amend(
        &self,
        incident: &mut Incident,
        symptoms: Vec<Symptom>,
        events: &mut Vec<IncidentEvent>,
    ) -> bool {
        let added = incident.merge_symptoms(symptoms);
        let assessed = self
            .assessor
            .assess(incident.symptoms(), &incident.device_id, &incident.device_class);
        incident.raise_severity(assessed);

        events.push(IncidentEvent::Amended {
            incident_id: incident.id.clone(),
            device_id: incident.device_id.clone(),
            added,
            severity: incident.severity(),
        });

        // DETECTED has not been picked up yet; the pending worker sees the merge
        if added == 0 || incident.state() == IncidentState::Detected {
            return false;
        }

        let from = incident.state();
        let reason = format!("superseded by {} new symptom kind(s)", added);
        if let Err(e) = incident.transition(IncidentState::Diagnosing, reason.clone()) {
            warn!(incident_id = %incident.id, error = %e, "Cannot restart diagnosis");
            return false;
        }

        info!(incident_id = %incident.id, from = %from, added, "Superseding in-flight recovery");
        events.push(IncidentEvent::Superseded {
            incident_id: incident.id.clone(),
            device_id: incident.device_id.clone(),
        });
        events.push(IncidentEvent::Transitioned {
            incident_id: incident.id.clone(),
            device_id: incident.device_id.clone(),
            from,
            to: IncidentState::Diagnosing,
            reason,
        });
        true
    }

    /// Worker loop for one incident generation.
    async fn run(self: Arc<Self>, device_id: DeviceId, generation: u64, lock: Arc<Mutex<()>>) {
        let _guard = lock.lock().await;

        loop {
            let Some(incident) = self.repository.current(&device_id, generation) else {
                debug!(device_id = %device_id, generation, "Worker superseded");
                return;
            };

            let step = match incident.state() {
                IncidentState::Detected if incident.severity() == Severity::Catastrophic => {
                    self.escalate(
                        &device_id,
                        generation,
                        "catastrophic severity at detection".into(),
                    )
                    .await
                }
                IncidentState::Detected => self.transition(
                    &device_id,
                    generation,
                    IncidentState::Diagnosing,
                    "incident opened".into(),
                ),
                IncidentState::Diagnosing => self.diagnose(&incident, generation).await,
                IncidentState::Planning => self.plan(&incident, generation).await,
                IncidentState::Executing => self.execute(&incident, generation).await,
                IncidentState::Verifying => self.verify(&incident, generation).await,
                IncidentState::Resolved | IncidentState::Escalated | IncidentState::Failed => {
                    Step::Stop
                }
            };

            if let Step::Stop = step {
                return;
            }
        }
    }

    async fn diagnose(&self, incident: &Incident, generation: u64) -> Step {
        let Some(streak) = self.record_diagnosis(incident, generation).await else {
            return Step::Stop;
        };
        if let Some(step) = self.check_low_confidence(incident, generation, streak).await {
            return step;
        }

        self.transition(
            &incident.device_id,
            generation,
            IncidentState::Planning,
            "root cause analysis complete".into(),
        )
    }

    async fn plan(&self, incident: &Incident, generation: u64) -> Step {
        let device_id = &incident.device_id;
        let recovery = &self.config.recovery;

        if incident.attempt_count() >= recovery.max_attempts {
            let reason = format!(
                "recovery attempts exhausted ({}/{})",
                incident.attempt_count(),
                recovery.max_attempts
            );
            return self.escalate(device_id, generation, reason).await;
        }

        let retrying = incident
            .history()
            .last()
            .map_or(false, |t| t.from == IncidentState::Verifying);
        let incident = if retrying {
            let Some(streak) = self.record_diagnosis(incident, generation).await else {
                return Step::Stop;
            };
            if let Some(step) = self.check_low_confidence(incident, generation, streak).await {
                return step;
            }
            match self.repository.current(device_id, generation) {
                Some(refreshed) => refreshed,
                None => return Step::Stop,
            }
        } else {
            incident.clone()
        };

        let decision = {
            let graph = self.graph.read().await;
            self.planner.plan(&incident, &graph)
        };

        if !recovery.auto_recovery_enabled {
            return self
                .escalate(device_id, generation, "automatic recovery disabled".into())
                .await;
        }
        if !self.storm.allow_automation(Instant::now()) {
            return self
                .escalate(
                    device_id,
                    generation,
                    "fleet storm circuit breaker open, automation paused".into(),
                )
                .await;
        }

        let blast_note = (decision.blast_radius.len() > recovery.blast_radius_warn).then(|| {
            format!(
                "blast radius of {} services exceeds {}: {}",
                decision.blast_radius.len(),
                recovery.blast_radius_warn,
                decision.blast_radius.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        });
        if let Some(note) = &blast_note {
            warn!(incident_id = %incident.id, "{}", note);
        }

        let plan = decision.plan;
        let reason = format!(
            "plan {} selected ({:?}, {} actions)",
            plan.plan_id,
            plan.source,
            plan.action_count()
        );
        self.transition_with(
            device_id,
            generation,
            IncidentState::Executing,
            reason,
            move |inc| {
                if let Some(note) = blast_note {
                    inc.add_note(note);
                }
                inc.chosen_plan = Some(plan);
            },
        )
    }

    async fn execute(&self, incident: &Incident, generation: u64) -> Step {
        let device_id = &incident.device_id;
        let Some(plan) = incident.chosen_plan.clone() else {
            return self.fail(device_id, generation, "no plan chosen".into());
        };

        match self.executor.execute_plan(incident, &plan).await {
            Ok(outcomes) => {
                for outcome in &outcomes {
                    self.emit(IncidentEvent::ActionCompleted {
                        incident_id: incident.id.clone(),
                        device_id: device_id.clone(),
                        outcome: Box::new(outcome.clone()),
                    });
                }

                let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
                let reason = format!("{}/{} actions succeeded", succeeded, outcomes.len());
                self.transition_with(
                    device_id,
                    generation,
                    IncidentState::Verifying,
                    reason,
                    move |inc| inc.last_outcomes = outcomes,
                )
            }
            Err(e) => self.fail(device_id, generation, e.to_string()),
        }
    }

    async fn verify(&self, incident: &Incident, generation: u64) -> Step {
        let device_id = &incident.device_id;

        match self.verifier.verify(device_id).await {
            Ok(()) => {
                self.learn(incident, true);
                self.transition(
                    device_id,
                    generation,
                    IncidentState::Resolved,
                    "device healthy after recovery".into(),
                )
            }
            Err(RecoveryError::VerificationTimeout { waited_ms, .. }) => {
                self.learn(incident, false);

                let max_attempts = self.config.recovery.max_attempts;
                let reason = format!("device still unhealthy after {}ms", waited_ms);
                let retried = self.repository.update(device_id, generation, |inc| {
                    inc.retry(max_attempts, reason.clone())
                        .map(|attempt| (inc.id.clone(), attempt))
                });

                match retried {
                    None => Step::Stop,
                    Some(Ok((incident_id, attempt))) => {
                        info!(incident_id = %incident_id, attempt, max_attempts, "Retrying recovery");
                        self.emit(IncidentEvent::Transitioned {
                            incident_id,
                            device_id: device_id.clone(),
                            from: IncidentState::Verifying,
                            to: IncidentState::Planning,
                            reason,
                        });
                        Step::Continue
                    }
                    Some(Err(e @ TransitionError::AttemptsExhausted { .. })) => {
                        self.escalate(device_id, generation, e.to_string()).await
                    }
                    Some(Err(e)) => self.fail(device_id, generation, e.to_string()),
                }
            }
            Err(e) => self.fail(device_id, generation, e.to_string()),
        }
    }

    /// Run the analyzer and store its candidates. Returns the updated
    /// low-confidence streak, or None if the worker was superseded.
    async fn record_diagnosis(&self, incident: &Incident, generation: u64) -> Option<u32> {
        let candidates = self.analyze(incident).await;
        let low = self.planner.confident_candidate(&candidates).is_err();

        self.repository
            .update(&incident.device_id, generation, move |inc| {
                inc.root_cause_candidates = candidates;
                inc.low_confidence_streak = if low { inc.low_confidence_streak + 1 } else { 0 };
                inc.low_confidence_streak
            })
    }

    async fn check_low_confidence(
        &self,
        incident: &Incident,
        generation: u64,
        streak: u32,
    ) -> Option<Step> {
        let limit = self.config.recovery.low_confidence_escalation_after;
        if limit == 0 || streak < limit {
            return None;
        }

        let reason = format!("{} consecutive low-confidence diagnoses", streak);
        Some(self.escalate(&incident.device_id, generation, reason).await)
    }

    async fn analyze(&self, incident: &Incident) -> Vec<CauseCandidate> {
        let context = {
            let graph = self.graph.read().await;
            DependencyContext::for_incident(incident, &graph)
        };

        match timeout(
            self.config.recovery.analysis_timeout,
            self.analyzer.analyze(incident.symptoms(), &context),
        )
        .await
        {
            Ok(Ok(candidates)) => rank(candidates),
            Ok(Err(e)) => {
                warn!(
                    incident_id = %incident.id,
                    analyzer = self.analyzer.name(),
                    error = %e,
                    "Root cause analysis failed"
                );
                Vec::new()
            }
            Err(_) => {
                warn!(
                    incident_id = %incident.id,
                    analyzer = self.analyzer.name(),
                    "Root cause analysis timed out"
                );
                Vec::new()
            }
        }
    }

    /// Feed the verification result back into the pattern store.
    fn learn(&self, incident: &Incident, success: bool) {
        let Some(plan) = &incident.chosen_plan else {
            return;
        };
        let Some(signature) = self.planner.signature_for(incident) else {
            return;
        };
        let Some(stored) = self.planner.learnable(plan, incident.device_id.as_str()) else {
            return;
        };

        if let Some(pattern) = self.patterns.record_outcome(&signature, &stored, success) {
            debug!(
                signature = %signature,
                plan_id = %pattern.plan_id,
                success,
                rate = pattern.success_rate(),
                "Pattern updated"
            );
        }
    }

    fn transition(
        &self,
        device_id: &DeviceId,
        generation: u64,
        to: IncidentState,
        reason: String,
    ) -> Step {
        self.transition_with(device_id, generation, to, reason, |_| {})
    }

    /// Apply `prepare` and move to `to` in one update.
    fn transition_with(
        &self,
        device_id: &DeviceId,
        generation: u64,
        to: IncidentState,
        reason: String,
        prepare: impl FnOnce(&mut Incident),
    ) -> Step {
        let result = self.repository.update(device_id, generation, |inc| {
            let from = inc.state();
            inc.transition(to, reason.clone())?;
            prepare(inc);
            Ok::<_, TransitionError>((inc.id.clone(), from))
        });

        match result {
            None => Step::Stop,
            Some(Ok((incident_id, from))) => {
                debug!(incident_id = %incident_id, from = %from, to = %to, reason = %reason, "Incident transition");
                self.emit(IncidentEvent::Transitioned {
                    incident_id,
                    device_id: device_id.clone(),
                    from,
                    to,
                    reason,
                });
                if to.is_terminal() {
                    Step::Stop
                } else {
                    Step::Continue
                }
            }
            Some(Err(e)) => {
                error!(device_id = %device_id, error = %e, "Rejected incident transition");
                self.fail(device_id, generation, e.to_string())
            }
        }
    }

    async fn escalate(&self, device_id: &DeviceId, generation: u64, reason: String) -> Step {
        let result = self.repository.update(device_id, generation, |inc| {
            let from = inc.state();
            inc.add_note(reason.clone());
            inc.transition(IncidentState::Escalated, reason.clone())
                .map(|_| (from, inc.clone()))
        });

        if let Some(Ok((from, incident))) = result {
            warn!(incident_id = %incident.id, reason = %reason, "Incident escalated");
            self.emit(IncidentEvent::Transitioned {
                incident_id: incident.id.clone(),
                device_id: device_id.clone(),
                from,
                to: IncidentState::Escalated,
                reason,
            });
            self.escalation.escalate(&incident).await;
        }
        Step::Stop
    }

    fn fail(&self, device_id: &DeviceId, generation: u64, reason: String) -> Step {
        let result = self.repository.update(device_id, generation, |inc| {
            let from = inc.state();
            inc.add_note(reason.clone());
            inc.transition(IncidentState::Failed, reason.clone())
                .map(|_| (inc.id.clone(), from))
        });

        if let Some(Ok((incident_id, from))) = result {
            error!(incident_id = %incident_id, reason = %reason, "Incident failed");
            self.emit(IncidentEvent::Transitioned {
                incident_id,
                device_id: device_id.clone(),
                from,
                to: IncidentState::Failed,
                reason,
            });
        }
        Step::Stop
    }
}
