//! Recovery actions, plans and per-action outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::ids::PlanId;

/// Type of remediation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    DiagnosticCheck,
    RestartPowerService,
    OptimizePowerSettings,
    RestartService,
    MemoryCleanup,
    CoolingCheck,
    RecalibrateSensors,
    UpdateFirmware,
    StabilityTest,
    NetworkReset,
    NetworkOptimization,
    ScaleResources,
    RebootDevice,
    FactoryReset,
    ReplaceHardware,
    ManualIntervention,
}

impl ActionKind {
    /// Whether repeating the action with the same parameters leaves the
    /// device in the same end state.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            ActionKind::UpdateFirmware
                | ActionKind::RebootDevice
                | ActionKind::FactoryReset
                | ActionKind::ReplaceHardware
                | ActionKind::ManualIntervention
        )
    }

    pub fn risk_level(&self) -> RiskLevel {
        match self {
            ActionKind::DiagnosticCheck
            | ActionKind::RestartPowerService
            | ActionKind::RestartService
            | ActionKind::CoolingCheck
            | ActionKind::StabilityTest
            | ActionKind::NetworkOptimization
            | ActionKind::ManualIntervention => RiskLevel::Low,
            ActionKind::OptimizePowerSettings
            | ActionKind::MemoryCleanup
            | ActionKind::RecalibrateSensors
            | ActionKind::UpdateFirmware
            | ActionKind::NetworkReset
            | ActionKind::ScaleResources => RiskLevel::Medium,
            ActionKind::RebootDevice | ActionKind::FactoryReset | ActionKind::ReplaceHardware => {
                RiskLevel::High
            }
        }
    }

    pub fn estimated_duration(&self) -> Duration {
        let minutes = match self {
            ActionKind::DiagnosticCheck => 2,
            ActionKind::RestartPowerService => 1,
            ActionKind::OptimizePowerSettings => 5,
            ActionKind::RestartService => 2,
            ActionKind::MemoryCleanup => 3,
            ActionKind::CoolingCheck => 3,
            ActionKind::RecalibrateSensors => 5,
            ActionKind::UpdateFirmware => 10,
            ActionKind::StabilityTest => 30,
            ActionKind::NetworkReset => 3,
            ActionKind::NetworkOptimization => 5,
            ActionKind::ScaleResources => 2,
            ActionKind::RebootDevice => 1,
            ActionKind::FactoryReset => 15,
            ActionKind::ReplaceHardware => 240,
            ActionKind::ManualIntervention => 30,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Actions that only observe or hand off leave device state alone and
    /// are not followed by a health probe.
    pub fn changes_device_state(&self) -> bool {
        !matches!(
            self,
            ActionKind::DiagnosticCheck | ActionKind::ManualIntervention
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DiagnosticCheck => "DIAGNOSTIC_CHECK",
            ActionKind::RestartPowerService => "RESTART_POWER_SERVICE",
            ActionKind::OptimizePowerSettings => "OPTIMIZE_POWER_SETTINGS",
            ActionKind::RestartService => "RESTART_SERVICE",
            ActionKind::MemoryCleanup => "MEMORY_CLEANUP",
            ActionKind::CoolingCheck => "COOLING_CHECK",
            ActionKind::RecalibrateSensors => "RECALIBRATE_SENSORS",
            ActionKind::UpdateFirmware => "UPDATE_FIRMWARE",
            ActionKind::StabilityTest => "STABILITY_TEST",
            ActionKind::NetworkReset => "NETWORK_RESET",
            ActionKind::NetworkOptimization => "NETWORK_OPTIMIZATION",
            ActionKind::ScaleResources => "SCALE_RESOURCES",
            ActionKind::RebootDevice => "REBOOT_DEVICE",
            ActionKind::FactoryReset => "FACTORY_RESET",
            ActionKind::ReplaceHardware => "REPLACE_HARDWARE",
            ActionKind::ManualIntervention => "MANUAL_INTERVENTION",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk of an action to the device and its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// One remediation step against a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    /// Device id or service name the action runs against
    pub target: String,

    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    pub idempotent: bool,

    pub risk_level: RiskLevel,

    #[serde(with = "duration_serde", rename = "estimated_duration_ms")]
    pub estimated_duration: Duration,
}

impl RecoveryAction {
    /// Create an action with the kind's default idempotency, risk and duration.
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            parameters: BTreeMap::new(),
            idempotent: kind.is_idempotent(),
            risk_level: kind.risk_level(),
            estimated_duration: kind.estimated_duration(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.kind, self.target)
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Pattern,
    Rule,
}

/// Actions that may run concurrently.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanStage {
    pub actions: Vec<RecoveryAction>,
}

impl PlanStage {
    pub fn single(action: RecoveryAction) -> Self {
        Self {
            actions: vec![action],
        }
    }
}

/// Ordered remediation plan. Stages run in order; actions within a stage
/// may run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub plan_id: PlanId,
    pub source: PlanSource,
    pub confidence: f64,
    pub stages: Vec<PlanStage>,
}

impl RecoveryPlan {
    /// Build a plan where every action runs on its own, in order.
    pub fn sequential(
        plan_id: PlanId,
        source: PlanSource,
        confidence: f64,
        actions: impl IntoIterator<Item = RecoveryAction>,
    ) -> Self {
        Self {
            plan_id,
            source,
            confidence,
            stages: actions.into_iter().map(PlanStage::single).collect(),
        }
    }

    /// All actions in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &RecoveryAction> {
        self.stages.iter().flat_map(|stage| stage.actions.iter())
    }

    pub fn action_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.actions.len()).sum()
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.actions().any(|action| action.kind == kind)
    }

    /// Append an action as a new final stage.
    pub fn push(&mut self, action: RecoveryAction) {
        self.stages.push(PlanStage::single(action));
    }
}

/// Final status of one action within an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Succeeded,
    /// Retries exhausted or not allowed after a transient failure
    TransientFailure,
    PermanentFailure,
}

/// Result of running one action, including retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: RecoveryAction,
    pub status: ActionStatus,
    pub attempts: u32,
    pub detail: String,

    /// Health probe taken right after the action, if one was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_after: Option<bool>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
