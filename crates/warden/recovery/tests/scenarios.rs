//! End-to-end incident scenarios against scripted capabilities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use warden_recovery::{
    ActionCapability, ActionReport, Capabilities, CapabilityError, Channel, DependencyContext,
    DependencyGraph, EngineConfig, IncidentOrchestrator, NoOpCapability, Notifier, PatternStore,
    RootCauseAnalyzer, RuleBasedAnalyzer, StaticHealth, StormState, TelemetryIngest,
};
use warden_types::{
    ActionKind, CauseCandidate, DeviceId, Incident, IncidentState, RecoveryAction, Severity,
    Symptom, SymptomKind, TelemetrySnapshot,
};

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(DeviceId, Channel)>>,
}

impl RecordingNotifier {
    fn escalations(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| *c != Channel::Intervention)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, incident: &Incident, channel: Channel) -> Result<(), CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .push((incident.device_id.clone(), channel));
        Ok(())
    }
}

#[derive(Default)]
struct CountingCapability {
    calls: Mutex<HashMap<DeviceId, Vec<ActionKind>>>,
}

impl CountingCapability {
    fn calls_for(&self, device: &str) -> Vec<ActionKind> {
        self.calls
            .lock()
            .unwrap()
            .get(&DeviceId::new(device))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ActionCapability for CountingCapability {
    async fn execute(
        &self,
        device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError> {
        self.calls
            .lock()
            .unwrap()
            .entry(device_id.clone())
            .or_default()
            .push(action.kind);
        Ok(ActionReport::new("done"))
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.recovery.verification_interval = Duration::from_secs(1);
    config.recovery.max_verification_interval = Duration::from_secs(4);
    config.recovery.verification_timeout = Duration::from_secs(10);
    config.recovery.initial_backoff = Duration::from_millis(10);
    config
}

fn build(
    config: EngineConfig,
    analyzer: Arc<dyn RootCauseAnalyzer>,
    actions: Arc<dyn ActionCapability>,
    healthy: bool,
    notifier: Arc<RecordingNotifier>,
) -> IncidentOrchestrator {
    let telemetry = Arc::new(TelemetryIngest::from_config(&config.detection));
    let patterns = Arc::new(PatternStore::new(
        config.patterns.decay,
        config.recovery.pattern_confidence_floor,
    ));
    IncidentOrchestrator::new(
        config,
        telemetry,
        DependencyGraph::default_topology(),
        patterns,
        Capabilities {
            analyzer,
            actions,
            health: Arc::new(StaticHealth(healthy)),
            notifier,
        },
    )
    .unwrap()
}

fn snapshot(device: &str) -> TelemetrySnapshot {
    TelemetrySnapshot::new(DeviceId::new(device), Utc::now())
}

async fn wait_for(
    orchestrator: &IncidentOrchestrator,
    device: &str,
    done: impl Fn(&Incident) -> bool,
) -> Incident {
    let device_id = DeviceId::new(device);
    tokio::time::timeout(Duration::from_secs(900), async {
        loop {
            if let Some(incident) = orchestrator.incident(&device_id) {
                if done(&incident) {
                    return incident;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("incident did not reach the expected state")
}

async fn settle(orchestrator: &IncidentOrchestrator, device: &str) -> Incident {
    wait_for(orchestrator, device, |i| !i.is_open()).await
}

#[tokio::test(start_paused = true)]
async fn low_battery_is_resolved_and_learned() {
    let notifier = Arc::new(RecordingNotifier::default());
    let actions = Arc::new(CountingCapability::default());
    let orch = build(
        config(),
        Arc::new(RuleBasedAnalyzer::default()),
        actions.clone(),
        true,
        notifier.clone(),
    );

    let receipt = orch
        .ingest(snapshot("sensor-17").with_metric("battery_voltage", 3.1))
        .await
        .unwrap();
    assert_eq!(receipt.symptoms.len(), 1);
    assert_eq!(receipt.symptoms[0].kind, SymptomKind::LowBattery);
    assert_eq!(receipt.severity, Some(Severity::Medium));

    let incident = settle(&orch, "sensor-17").await;
    assert_eq!(incident.state(), IncidentState::Resolved);
    assert!(actions
        .calls_for("sensor-17")
        .contains(&ActionKind::RestartPowerService));
    assert_eq!(notifier.escalations(), 0);

    let patterns = orch.patterns().list();
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].success_count, 1);

    // the learned pattern survives a save and reload
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patterns.jsonl");
    orch.patterns().save(&path).unwrap();

    let line = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(line.lines().next().unwrap()).unwrap();
    assert_eq!(json["success_count"], 1);
    assert_eq!(json["failure_count"], 0);
    assert_eq!(json["plan_id"], "rule:power_supply");

    let reloaded = PatternStore::new(0.95, 0.6);
    assert_eq!(reloaded.load(&path).unwrap(), 1);
    assert_eq!(reloaded.list()[0].success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_verification_failures_escalate_once() {
    let notifier = Arc::new(RecordingNotifier::default());
    let actions = Arc::new(CountingCapability::default());
    let mut config = config();
    config.recovery.max_attempts = 3;
    let orch = build(
        config,
        Arc::new(RuleBasedAnalyzer::default()),
        actions.clone(),
        false,
        notifier.clone(),
    );

    orch.ingest(snapshot("sensor-17").with_metric("battery_voltage", 3.1))
        .await
        .unwrap();
    let incident = settle(&orch, "sensor-17").await;

    assert_eq!(incident.state(), IncidentState::Escalated);
    assert_eq!(incident.attempt_count(), 3);

    let verifications_failed = incident
        .history()
        .iter()
        .filter(|t| t.from == IncidentState::Verifying && t.to == IncidentState::Planning)
        .count();
    assert_eq!(verifications_failed, 3);

    let restarts = actions
        .calls_for("sensor-17")
        .into_iter()
        .filter(|k| *k == ActionKind::RestartPowerService)
        .count();
    assert_eq!(restarts, 3);
    assert_eq!(notifier.escalations(), 1);

    let pattern = &orch.patterns().list()[0];
    assert_eq!(pattern.failure_count, 3);
}

/// Takes the topology write lock on its first call so the worker parks in
/// PLANNING, and records the symptom sets it was asked about.
struct GatedAnalyzer {
    inner: RuleBasedAnalyzer,
    graph: Mutex<Option<Arc<RwLock<DependencyGraph>>>>,
    held: Mutex<Option<OwnedRwLockWriteGuard<DependencyGraph>>>,
    seen: Mutex<Vec<Vec<SymptomKind>>>,
}

impl GatedAnalyzer {
    fn new() -> Self {
        Self {
            inner: RuleBasedAnalyzer::default(),
            graph: Mutex::new(None),
            held: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn release(&self) {
        self.held.lock().unwrap().take();
    }
}

#[async_trait]
impl RootCauseAnalyzer for GatedAnalyzer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(
        &self,
        symptoms: &[Symptom],
        context: &DependencyContext,
    ) -> Result<Vec<CauseCandidate>, CapabilityError> {
        let first = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(symptoms.iter().map(|s| s.kind).collect());
            seen.len() == 1
        };

        if first {
            let graph = self.graph.lock().unwrap().clone();
            if let Some(graph) = graph {
                let guard = graph.write_owned().await;
                *self.held.lock().unwrap() = Some(guard);
            }
        }

        self.inner.analyze(symptoms, context).await
    }
}

#[tokio::test(start_paused = true)]
async fn superseding_symptoms_restart_diagnosis() {
    let notifier = Arc::new(RecordingNotifier::default());
    let analyzer = Arc::new(GatedAnalyzer::new());
    let actions = Arc::new(CountingCapability::default());
    let orch = build(
        config(),
        analyzer.clone(),
        actions.clone(),
        true,
        notifier.clone(),
    );
    *analyzer.graph.lock().unwrap() = Some(orch.topology());

    let first = snapshot("sensor-17").with_metric("battery_voltage", 3.1);
    let mut second = snapshot("sensor-17").with_metric("temperature", 62.0);
    second.timestamp = first.timestamp + chrono::Duration::seconds(1);

    let opened = orch.ingest(first).await.unwrap();
    wait_for(&orch, "sensor-17", |i| i.state() == IncidentState::Planning).await;

    let amended = orch.ingest(second).await.unwrap();
    assert_eq!(amended.incident_id, opened.incident_id);
    assert_eq!(amended.state, Some(IncidentState::Diagnosing));
    analyzer.release();

    let incident = settle(&orch, "sensor-17").await;
    assert_eq!(incident.state(), IncidentState::Resolved);
    assert_eq!(Some(incident.id.clone()), opened.incident_id);
    assert_eq!(orch.incidents(None).len(), 1);

    let kinds: Vec<SymptomKind> = incident.symptoms().iter().map(|s| s.kind).collect();
    assert!(kinds.contains(&SymptomKind::LowBattery));
    assert!(kinds.contains(&SymptomKind::HighTemperature));
    assert_eq!(incident.severity(), Severity::High);

    assert!(incident
        .history()
        .iter()
        .any(|t| t.from == IncidentState::Planning && t.to == IncidentState::Diagnosing));

    // nothing ran for the superseded plan
    let executions = incident
        .history()
        .iter()
        .filter(|t| t.to == IncidentState::Executing)
        .count();
    assert_eq!(executions, 1);

    let seen = analyzer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec![SymptomKind::LowBattery]);
    assert_eq!(seen[1].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn fleet_storm_escalates_without_acting() {
    let notifier = Arc::new(RecordingNotifier::default());
    let actions = Arc::new(CountingCapability::default());
    let mut config = config();
    config.storm.threshold = 0.30;
    let orch = build(
        config,
        Arc::new(RuleBasedAnalyzer::default()),
        actions.clone(),
        true,
        notifier.clone(),
    );

    let device = |n: usize| format!("node-{:03}", n);
    for n in 0..100 {
        orch.ingest(snapshot(&device(n)).with_metric("battery_voltage", 3.9))
            .await
            .unwrap();
    }
    assert_eq!(orch.fleet_summary().known_devices, 100);

    let mut receipts = Vec::new();
    for n in 0..40 {
        let receipt = orch
            .ingest(snapshot(&device(n)).with_metric("battery_voltage", 3.0))
            .await
            .unwrap();
        receipts.push(receipt);
    }

    for receipt in &receipts[..30] {
        assert_ne!(receipt.state, Some(IncidentState::Escalated));
    }
    for (n, receipt) in receipts.iter().enumerate().skip(30) {
        assert_eq!(receipt.state, Some(IncidentState::Escalated), "device {}", n);
    }
    assert_eq!(orch.storm().state(), StormState::Open);

    for n in 0..40 {
        settle(&orch, &device(n)).await;
    }

    for n in 30..40 {
        let incident = orch.incident(&DeviceId::new(device(n))).unwrap();
        assert!(incident.chosen_plan.is_none());
        assert!(actions.calls_for(&device(n)).is_empty());
    }

    let summary = orch.fleet_summary();
    assert_eq!(summary.total_incidents, 40);
    assert_eq!(summary.storm.state, StormState::Open);
    assert!(summary.by_state.get("ESCALATED").copied().unwrap_or(0) >= 10);
}

#[tokio::test(start_paused = true)]
async fn healthy_snapshot_clears_symptoms() {
    let notifier = Arc::new(RecordingNotifier::default());
    let analyzer = Arc::new(GatedAnalyzer::new());
    let orch = build(
        config(),
        analyzer.clone(),
        Arc::new(NoOpCapability),
        true,
        notifier,
    );
    *analyzer.graph.lock().unwrap() = Some(orch.topology());

    orch.ingest(snapshot("sensor-17").with_metric("battery_voltage", 3.1))
        .await
        .unwrap();
    wait_for(&orch, "sensor-17", |i| i.state() == IncidentState::Planning).await;

    let receipt = orch
        .ingest(snapshot("sensor-17").with_metric("battery_voltage", 3.8))
        .await
        .unwrap();
    assert!(receipt.symptoms.is_empty());
    assert_eq!(receipt.severity, Some(Severity::Low));

    let incident = orch.incident(&DeviceId::new("sensor-17")).unwrap();
    assert!(incident.symptoms().is_empty());
    assert_eq!(incident.state(), IncidentState::Planning);

    analyzer.release();
    let incident = settle(&orch, "sensor-17").await;
    assert_eq!(incident.state(), IncidentState::Resolved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_opens_one_incident_per_device() {
    let analyzer = Arc::new(GatedAnalyzer::new());
    let orch = build(
        config(),
        analyzer.clone(),
        Arc::new(NoOpCapability),
        true,
        Arc::new(RecordingNotifier::default()),
    );
    *analyzer.graph.lock().unwrap() = Some(orch.topology());

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                let device = format!("node-{}", i % 2);
                orch.ingest(
                    snapshot(&device)
                        .with_metric("battery_voltage", 3.1)
                        .with_metric("error_count", 20.0 + i as f64),
                )
                .await
                .unwrap()
            })
        })
        .collect();

    let mut ids: HashMap<DeviceId, Vec<_>> = HashMap::new();
    for task in tasks {
        let receipt = task.await.unwrap();
        ids.entry(receipt.device_id.clone())
            .or_default()
            .push(receipt.incident_id.unwrap());
    }

    assert_eq!(ids.len(), 2);
    for (_, mut seen) in ids {
        seen.dedup();
        assert_eq!(seen.len(), 1);
    }
    assert_eq!(orch.incidents(None).len(), 2);

    analyzer.release();
    orch.shutdown();
}
