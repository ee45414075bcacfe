//! Plan execution.
//!
//! Stages run in order; actions inside a stage run concurrently. Each action
//! gets a timeout and bounded retries with exponential backoff. A
//! non-idempotent action is only retried when the failure is known to have
//! left no side effects behind.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use warden_types::{ActionKind, ActionOutcome, ActionStatus, Incident, RecoveryAction, RecoveryPlan};

use crate::capability::ActionCapability;
use crate::config::RecoveryConfig;
use crate::error::{CapabilityError, RecoveryError, RecoveryResult, SideEffects};
use crate::escalation::EscalationManager;
use crate::verifier::Verifier;

/// Delay before retry number `retry` (1-based): `initial * 2^(retry-1)`,
/// capped at `max`.
pub fn backoff_delay(initial: Duration, max: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    initial.saturating_mul(factor).min(max)
}

/// Runs recovery plans against the action capability.
pub struct ActionExecutor {
    capability: Arc<dyn ActionCapability>,
    escalation: Arc<EscalationManager>,
    verifier: Arc<Verifier>,
    action_timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ActionExecutor {
    pub fn new(
        capability: Arc<dyn ActionCapability>,
        escalation: Arc<EscalationManager>,
        verifier: Arc<Verifier>,
        config: &RecoveryConfig,
    ) -> Self {
        Self {
            capability,
            escalation,
            verifier,
            action_timeout: config.action_timeout,
            max_retries: config.max_action_retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }

    /// Run every stage of `plan`. Returns one outcome per action, in plan
    /// order. Only an unreachable capability aborts the plan.
    #[instrument(skip(self, incident, plan), fields(incident_id = %incident.id, plan_id = %plan.plan_id))]
    pub async fn execute_plan(
        &self,
        incident: &Incident,
        plan: &RecoveryPlan,
    ) -> RecoveryResult<Vec<ActionOutcome>> {
        let mut outcomes = Vec::with_capacity(plan.action_count());

        for (index, stage) in plan.stages.iter().enumerate() {
            debug!(stage = index, actions = stage.actions.len(), "Running stage");

            let results =
                join_all(stage.actions.iter().map(|action| self.run_action(incident, action)))
                    .await;
            for result in results {
                outcomes.push(result?);
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
        info!(succeeded, total = outcomes.len(), "Plan executed");
        Ok(outcomes)
    }

    async fn run_action(
        &self,
        incident: &Incident,
        action: &RecoveryAction,
    ) -> RecoveryResult<ActionOutcome> {
        let started_at = Utc::now();

        if action.kind == ActionKind::ManualIntervention {
            let (status, detail) = match self.escalation.request_intervention(incident).await {
                Ok(()) => (ActionStatus::Succeeded, "intervention requested".to_string()),
                Err(e) => (ActionStatus::PermanentFailure, e.to_string()),
            };
            return Ok(ActionOutcome {
                action: action.clone(),
                status,
                attempts: 1,
                detail,
                verified_after: None,
                started_at,
                completed_at: Utc::now(),
            });
        }

        let mut attempts = 0;
        let (status, detail) = loop {
            attempts += 1;

            let error = match timeout(
                self.action_timeout,
                self.capability.execute(&incident.device_id, action),
            )
            .await
            {
                Ok(Ok(report)) => break (ActionStatus::Succeeded, report.detail),
                Ok(Err(e)) => classify(action, e),
                Err(_) => RecoveryError::TransientActionFailure {
                    action: action.kind,
                    target: action.target.clone(),
                    reason: format!("timed out after {:?}", self.action_timeout),
                    side_effects: SideEffects::Unknown,
                },
            };

            match error {
                RecoveryError::TransientActionFailure { side_effects, .. }
                    if attempts <= self.max_retries
                        && (action.idempotent || side_effects.permits_retry()) =>
                {
                    let delay = backoff_delay(self.initial_backoff, self.max_backoff, attempts);
                    debug!(
                        action = %action,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying action"
                    );
                    sleep(delay).await;
                }
                RecoveryError::TransientActionFailure { .. } => {
                    warn!(action = %action, attempts, error = %error, "Action failed");
                    break (ActionStatus::TransientFailure, error.to_string());
                }
                RecoveryError::PermanentActionFailure { .. } => {
                    warn!(action = %action, attempts, error = %error, "Action failed permanently");
                    break (ActionStatus::PermanentFailure, error.to_string());
                }
                other => return Err(other),
            }
        };

        let verified_after = if status == ActionStatus::Succeeded && action.kind.changes_device_state()
        {
            Some(self.verifier.probe(&incident.device_id).await.unwrap_or(false))
        } else {
            None
        };

        Ok(ActionOutcome {
            action: action.clone(),
            status,
            attempts,
            detail,
            verified_after,
            started_at,
            completed_at: Utc::now(),
        })
    }
}

fn classify(action: &RecoveryAction, error: CapabilityError) -> RecoveryError {
    match error {
        CapabilityError::Transient {
            reason,
            side_effects,
        } => RecoveryError::TransientActionFailure {
            action: action.kind,
            target: action.target.clone(),
            reason,
            side_effects,
        },
        CapabilityError::Permanent(reason) => RecoveryError::PermanentActionFailure {
            action: action.kind,
            target: action.target.clone(),
            reason,
        },
        CapabilityError::Unavailable(reason) => {
            RecoveryError::CapabilityUnavailable(format!("{}: {}", action.kind, reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ActionReport, FailingCapability, HealthCheck, LogNotifier, StaticHealth};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use warden_types::{DeviceId, PlanId, PlanSource, Severity};

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            action_timeout: Duration::from_millis(50),
            max_action_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            ..Default::default()
        }
    }

    fn executor(capability: Arc<dyn ActionCapability>, health: Arc<dyn HealthCheck>) -> ActionExecutor {
        let config = config();
        ActionExecutor::new(
            capability,
            Arc::new(EscalationManager::new(
                Arc::new(LogNotifier),
                config.notify_timeout,
            )),
            Arc::new(Verifier::new(health, &config)),
            &config,
        )
    }

    fn incident() -> Incident {
        Incident::open(
            DeviceId::new("node-1"),
            "generic",
            None,
            Vec::new(),
            Severity::Medium,
            Utc::now(),
        )
    }

    fn plan(actions: Vec<RecoveryAction>) -> RecoveryPlan {
        RecoveryPlan::sequential(PlanId::new("test"), PlanSource::Rule, 1.0, actions)
    }

    /// Fails transiently a fixed number of times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        side_effects: SideEffects,
    }

    #[async_trait]
    impl ActionCapability for Flaky {
        async fn execute(
            &self,
            _device_id: &DeviceId,
            _action: &RecoveryAction,
        ) -> Result<ActionReport, CapabilityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CapabilityError::transient("busy", self.side_effects))
            } else {
                Ok(ActionReport::new("done"))
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        let max = Duration::from_secs(10);
        assert_eq!(backoff_delay(initial, max, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(initial, max, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(initial, max, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(initial, max, 10), max);
        assert_eq!(backoff_delay(initial, max, 200), max);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            side_effects: SideEffects::Unknown,
        });
        let exec = executor(flaky.clone(), Arc::new(StaticHealth(true)));

        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::RestartService, "node-1")]),
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, ActionStatus::Succeeded);
        assert_eq!(outcomes[0].attempts, 3);
        assert_eq!(outcomes[0].verified_after, Some(true));
    }

    #[tokio::test]
    async fn test_retries_bounded() {
        let exec = executor(
            Arc::new(FailingCapability::new([ActionKind::RestartService], SideEffects::Unknown)),
            Arc::new(StaticHealth(true)),
        );
        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::RestartService, "node-1")]),
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, ActionStatus::TransientFailure);
        assert_eq!(outcomes[0].attempts, 4);
        assert_eq!(outcomes[0].verified_after, None);
    }

    #[tokio::test]
    async fn test_non_idempotent_not_retried_with_unknown_side_effects() {
        let flaky = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
            side_effects: SideEffects::Unknown,
        });
        let exec = executor(flaky.clone(), Arc::new(StaticHealth(true)));
        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::UpdateFirmware, "node-1")]),
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, ActionStatus::TransientFailure);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_retried_when_not_applied() {
        let flaky = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
            side_effects: SideEffects::NotApplied,
        });
        let exec = executor(flaky.clone(), Arc::new(StaticHealth(true)));
        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::UpdateFirmware, "node-1")]),
            )
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, ActionStatus::Succeeded);
        assert_eq!(outcomes[0].attempts, 2);
    }

    struct Hangs;

    #[async_trait]
    impl ActionCapability for Hangs {
        async fn execute(
            &self,
            _device_id: &DeviceId,
            _action: &RecoveryAction,
        ) -> Result<ActionReport, CapabilityError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(ActionReport::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient_with_unknown_side_effects() {
        let exec = executor(Arc::new(Hangs), Arc::new(StaticHealth(true)));
        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![
                    RecoveryAction::new(ActionKind::RebootDevice, "node-1"),
                    RecoveryAction::new(ActionKind::CoolingCheck, "node-1"),
                ]),
            )
            .await
            .unwrap();

        // non-idempotent: one attempt; idempotent: 1 + retries
        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(outcomes[1].attempts, 4);
        assert!(outcomes.iter().all(|o| o.status == ActionStatus::TransientFailure));
    }

    struct Gone;

    #[async_trait]
    impl ActionCapability for Gone {
        async fn execute(
            &self,
            _device_id: &DeviceId,
            _action: &RecoveryAction,
        ) -> Result<ActionReport, CapabilityError> {
            Err(CapabilityError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_capability_aborts_plan() {
        let exec = executor(Arc::new(Gone), Arc::new(StaticHealth(true)));
        let err = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::NetworkReset, "node-1")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecoveryError::CapabilityUnavailable(_)));
    }

    #[tokio::test]
    async fn test_manual_intervention_goes_to_escalation() {
        let exec = executor(Arc::new(Gone), Arc::new(StaticHealth(true)));
        let outcomes = exec
            .execute_plan(
                &incident(),
                &plan(vec![RecoveryAction::new(ActionKind::ManualIntervention, "node-1")]),
            )
            .await
            .unwrap();
        assert!(outcomes[0].succeeded());
        assert_eq!(outcomes[0].verified_after, None);
    }

    /// Device whose end state depends only on the last action applied.
    #[derive(Default)]
    struct SimulatedDevice {
        state: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl ActionCapability for SimulatedDevice {
        async fn execute(
            &self,
            _device_id: &DeviceId,
            action: &RecoveryAction,
        ) -> Result<ActionReport, CapabilityError> {
            let mut state = self.state.lock().unwrap();
            let value = match action.kind {
                ActionKind::RestartService => "running".to_string(),
                ActionKind::NetworkReset => format!("reset:{:?}", action.parameters),
                ActionKind::UpdateFirmware => {
                    let current = state.get(&action.target).cloned().unwrap_or_default();
                    format!("{}+fw", current)
                }
                _ => "checked".to_string(),
            };
            state.insert(action.target.clone(), value);
            Ok(ActionReport::new("applied"))
        }
    }

    #[tokio::test]
    async fn test_idempotent_actions_converge() {
        for kind in [ActionKind::RestartService, ActionKind::NetworkReset, ActionKind::CoolingCheck] {
            let device = Arc::new(SimulatedDevice::default());
            let exec = executor(device.clone(), Arc::new(StaticHealth(true)));
            let action = RecoveryAction::new(kind, "node-1").with_parameter("reset_wifi", "true");
            assert!(action.idempotent);

            exec.execute_plan(&incident(), &plan(vec![action.clone()])).await.unwrap();
            let once = device.state.lock().unwrap().clone();
            exec.execute_plan(&incident(), &plan(vec![action])).await.unwrap();
            let twice = device.state.lock().unwrap().clone();

            assert_eq!(once, twice, "{} is not idempotent", kind);
        }
    }

    #[tokio::test]
    async fn test_stage_actions_run_concurrently() {
        let exec = executor(Arc::new(crate::capability::NoOpCapability), Arc::new(StaticHealth(true)));
        let mut p = plan(vec![RecoveryAction::new(ActionKind::DiagnosticCheck, "node-1")]);
        p.stages.push(warden_types::PlanStage {
            actions: vec![
                RecoveryAction::new(ActionKind::RestartService, "database"),
                RecoveryAction::new(ActionKind::RestartService, "message-queue"),
            ],
        });

        let outcomes = exec.execute_plan(&incident(), &p).await.unwrap();
        let targets: Vec<&str> = outcomes.iter().map(|o| o.action.target.as_str()).collect();
        assert_eq!(targets, vec!["node-1", "database", "message-queue"]);
        assert_eq!(outcomes[0].verified_after, None);
    }
}
