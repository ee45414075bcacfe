//! Recovery planning.
//!
//! Chooses between a learned pattern and a rule-based plan for the top
//! diagnosis, expands service-scoped actions over the dependency graph and
//! appends a manual-intervention step for critical incidents.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;
use warden_types::{
    ActionKind, CauseCandidate, CauseCategory, Incident, PlanId, PlanSource, PlanStage,
    RecoveryAction, RecoveryPlan, Severity, Signature,
};

use crate::config::RecoveryConfig;
use crate::error::RecoveryError;
use crate::patterns::PatternStore;
use crate::topology::DependencyGraph;

/// Placeholder for the affected device in stored plans.
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Placeholder for the device's service and its dependencies in stored
/// plans. Expanded against the current graph on reuse.
pub const SERVICE_CHAIN_PLACEHOLDER: &str = "{service_chain}";

/// What an action template runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScope {
    /// The affected device.
    Device,
    /// The device's service and everything it depends on, dependencies first.
    ServiceChain,
}

/// One step of a rule plan before it is bound to a device.
#[derive(Debug, Clone)]
pub struct ActionTemplate {
    pub kind: ActionKind,
    pub scope: TargetScope,
    pub parameters: Vec<(&'static str, &'static str)>,
}

impl ActionTemplate {
    fn device(kind: ActionKind, description: &'static str) -> Self {
        Self {
            kind,
            scope: TargetScope::Device,
            parameters: vec![("description", description)],
        }
    }

    fn service_chain(kind: ActionKind, description: &'static str) -> Self {
        Self {
            kind,
            scope: TargetScope::ServiceChain,
            parameters: vec![("description", description)],
        }
    }

    fn with(mut self, key: &'static str, value: &'static str) -> Self {
        self.parameters.push((key, value));
        self
    }

    fn bind(&self, target: &str) -> RecoveryAction {
        self.parameters
            .iter()
            .fold(RecoveryAction::new(self.kind, target), |action, (k, v)| {
                action.with_parameter(*k, *v)
            })
    }
}

/// Built-in plans per cause. Every plan starts with a diagnostic check.
pub fn default_rule_table() -> BTreeMap<CauseCategory, Vec<ActionTemplate>> {
    use ActionKind::*;

    let diagnostic = || ActionTemplate::device(DiagnosticCheck, "Perform comprehensive diagnostic check");
    let mut table = BTreeMap::new();

    table.insert(
        CauseCategory::PowerSupply,
        vec![
            diagnostic(),
            ActionTemplate::device(RestartPowerService, "Restart power management service"),
            ActionTemplate::device(OptimizePowerSettings, "Optimize power consumption settings"),
        ],
    );
    table.insert(
        CauseCategory::Thermal,
        vec![
            diagnostic(),
            ActionTemplate::device(CoolingCheck, "Check cooling system and ventilation"),
            ActionTemplate::device(RecalibrateSensors, "Recalibrate temperature sensors")
                .with("sensors", "temperature,humidity,pressure"),
        ],
    );
    table.insert(
        CauseCategory::ResourceExhaustion,
        vec![
            diagnostic(),
            ActionTemplate::service_chain(RestartService, "Restart affected services"),
            ActionTemplate::device(MemoryCleanup, "Clear memory leaks and optimize usage"),
        ],
    );
    table.insert(
        CauseCategory::FirmwareInstability,
        vec![
            diagnostic(),
            ActionTemplate::device(UpdateFirmware, "Update to stable firmware version")
                .with("firmware_version", "stable-latest"),
            ActionTemplate::device(StabilityTest, "Run stability test for 30 minutes")
                .with("duration_minutes", "30"),
        ],
    );
    table.insert(
        CauseCategory::Network,
        vec![
            diagnostic(),
            ActionTemplate::device(NetworkReset, "Reset network configuration")
                .with("reset_wifi", "true")
                .with("reset_mqtt", "true"),
            ActionTemplate::device(NetworkOptimization, "Optimize WiFi settings and antenna"),
        ],
    );

    table
}

/// Output of one planning round.
#[derive(Debug, Clone)]
pub struct PlanDecision {
    pub plan: RecoveryPlan,

    /// Signature the outcome will be learned under. None for fallback plans.
    pub signature: Option<Signature>,

    /// The top diagnosis was under the confidence threshold.
    pub low_confidence: bool,

    /// Services affected if the device's service misbehaves during recovery.
    pub blast_radius: BTreeSet<String>,
}

/// Produces recovery plans for diagnosed incidents.
pub struct RecoveryPlanner {
    patterns: Arc<PatternStore>,
    rules: BTreeMap<CauseCategory, Vec<ActionTemplate>>,
    pattern_confidence_floor: f64,
    min_confidence_threshold: f64,
}

impl RecoveryPlanner {
    pub fn new(config: &RecoveryConfig, patterns: Arc<PatternStore>) -> Self {
        Self::with_rules(config, patterns, default_rule_table())
    }

    pub fn with_rules(
        config: &RecoveryConfig,
        patterns: Arc<PatternStore>,
        rules: BTreeMap<CauseCategory, Vec<ActionTemplate>>,
    ) -> Self {
        Self {
            patterns,
            rules,
            pattern_confidence_floor: config.pattern_confidence_floor,
            min_confidence_threshold: config.min_confidence_threshold,
        }
    }

    /// The top candidate if it clears the confidence threshold.
    pub fn confident_candidate<'a>(
        &self,
        candidates: &'a [CauseCandidate],
    ) -> Result<&'a CauseCandidate, RecoveryError> {
        let top = candidates
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        match top {
            Some(c) if c.confidence >= self.min_confidence_threshold && c.cause != CauseCategory::Unknown => {
                Ok(c)
            }
            _ => Err(RecoveryError::DiagnosisLowConfidence {
                confidence: top.map(|c| c.confidence).unwrap_or(0.0),
                threshold: self.min_confidence_threshold,
            }),
        }
    }

    /// Signature to learn under for the incident's current diagnosis.
    pub fn signature_for(&self, incident: &Incident) -> Option<Signature> {
        self.confident_candidate(&incident.root_cause_candidates)
            .ok()
            .map(|c| Signature::derive(c.cause, &incident.device_class))
    }

    /// Build the plan for an incident.
    pub fn plan(&self, incident: &Incident, graph: &DependencyGraph) -> PlanDecision {
        let device = incident.device_id.as_str();
        let blast_radius = incident
            .service
            .as_deref()
            .map(|s| graph.blast_radius(s))
            .unwrap_or_default();

        let (mut plan, signature, low_confidence) =
            match self.confident_candidate(&incident.root_cause_candidates) {
                Ok(top) => {
                    let signature = Signature::derive(top.cause, &incident.device_class);
                    let plan = match self.patterns.lookup(&signature) {
                        Some(pattern)
                            if pattern.success_rate() >= self.pattern_confidence_floor
                                && !pattern.actions.is_empty() =>
                        {
                            debug!(
                                incident_id = %incident.id,
                                plan_id = %pattern.plan_id,
                                rate = pattern.success_rate(),
                                "Reusing learned pattern"
                            );
                            instantiate(pattern.plan(), incident, graph)
                        }
                        _ => self.rule_plan(top, incident, graph),
                    };
                    (plan, Some(signature), false)
                }
                Err(e) => {
                    debug!(incident_id = %incident.id, reason = %e, "Using fallback plan");
                    let confidence = incident
                        .root_cause_candidates
                        .first()
                        .map(|c| c.confidence)
                        .unwrap_or(0.0);
                    (fallback_plan(device, confidence), None, true)
                }
            };

        if incident.severity() >= Severity::Critical && !plan.contains(ActionKind::ManualIntervention) {
            plan.push(
                RecoveryAction::new(ActionKind::ManualIntervention, device)
                    .with_parameter("description", "Request immediate manual intervention"),
            );
        }

        PlanDecision {
            plan,
            signature,
            low_confidence,
            blast_radius,
        }
    }

    fn rule_plan(
        &self,
        top: &CauseCandidate,
        incident: &Incident,
        graph: &DependencyGraph,
    ) -> RecoveryPlan {
        let device = incident.device_id.as_str();
        let Some(templates) = self.rules.get(&top.cause) else {
            return fallback_plan(device, top.confidence);
        };

        let mut stages = Vec::new();
        for template in templates {
            match (template.scope, incident.service.as_deref()) {
                (TargetScope::ServiceChain, Some(service)) => {
                    stages.extend(service_chain_stages(service, graph, |t| template.bind(t)));
                }
                _ => stages.push(PlanStage::single(template.bind(device))),
            }
        }

        RecoveryPlan {
            plan_id: PlanId::for_rule(top.cause),
            source: PlanSource::Rule,
            confidence: top.confidence,
            stages,
        }
    }

    /// The form of an executed plan worth storing as a pattern: device
    /// targets replaced by a placeholder, service-chain stages collapsed to
    /// one placeholder stage per action, manual steps removed. None for
    /// fallback plans.
    pub fn learnable(&self, plan: &RecoveryPlan, device_id: &str) -> Option<RecoveryPlan> {
        if plan.plan_id == PlanId::fallback() {
            return None;
        }

        let mut stages: Vec<PlanStage> = Vec::new();
        for stage in &plan.stages {
            let mut actions: Vec<RecoveryAction> = Vec::new();
            for action in stage.actions.iter().filter(|a| a.kind != ActionKind::ManualIntervention) {
                let mut action = action.clone();
                action.target = if action.target == device_id {
                    DEVICE_PLACEHOLDER.to_string()
                } else {
                    SERVICE_CHAIN_PLACEHOLDER.to_string()
                };
                if !actions.contains(&action) {
                    actions.push(action);
                }
            }
            if actions.is_empty() {
                continue;
            }

            let stage = PlanStage { actions };
            let chain_only = stage
                .actions
                .iter()
                .all(|a| a.target == SERVICE_CHAIN_PLACEHOLDER);
            if chain_only && stages.last() == Some(&stage) {
                continue;
            }
            stages.push(stage);
        }

        if stages.is_empty() {
            return None;
        }

        Some(RecoveryPlan {
            stages,
            ..plan.clone()
        })
    }
}

/// One stage per dependency level over `service` and everything it depends
/// on, dependencies first.
fn service_chain_stages(
    service: &str,
    graph: &DependencyGraph,
    bind: impl Fn(&str) -> RecoveryAction,
) -> Vec<PlanStage> {
    let mut targets = vec![service.to_string()];
    targets.extend(graph.transitive_dependencies(service));

    graph
        .stage(&targets)
        .iter()
        .map(|stage| PlanStage {
            actions: stage.iter().map(|t| bind(t)).collect(),
        })
        .collect()
}

/// Diagnostic check followed by a request for a human.
pub fn fallback_plan(device_id: &str, confidence: f64) -> RecoveryPlan {
    RecoveryPlan::sequential(
        PlanId::fallback(),
        PlanSource::Rule,
        confidence,
        vec![
            RecoveryAction::new(ActionKind::DiagnosticCheck, device_id)
                .with_parameter("description", "Perform comprehensive diagnostic check"),
            RecoveryAction::new(ActionKind::ManualIntervention, device_id)
                .with_parameter("description", "Request manual investigation"),
        ],
    )
}

/// Bind a stored plan to an incident. Service-chain actions are expanded
/// over the current graph, or run against the device when it reports no
/// service.
fn instantiate(stored: RecoveryPlan, incident: &Incident, graph: &DependencyGraph) -> RecoveryPlan {
    let device = incident.device_id.as_str();
    let mut stages = Vec::with_capacity(stored.stages.len());

    for stage in stored.stages {
        let (chain, rest): (Vec<_>, Vec<_>) = stage
            .actions
            .into_iter()
            .partition(|a| a.target == SERVICE_CHAIN_PLACEHOLDER);

        let bound: Vec<RecoveryAction> = rest
            .into_iter()
            .map(|mut a| {
                if a.target == DEVICE_PLACEHOLDER {
                    a.target = device.to_string();
                }
                a
            })
            .collect();
        if !bound.is_empty() {
            stages.push(PlanStage { actions: bound });
        }

        for action in chain {
            let retarget = |target: &str| {
                let mut a = action.clone();
                a.target = target.to_string();
                a
            };
            match incident.service.as_deref() {
                Some(service) => stages.extend(service_chain_stages(service, graph, retarget)),
                None => stages.push(PlanStage::single(retarget(device))),
            }
        }
    }

    RecoveryPlan { stages, ..stored }
}
