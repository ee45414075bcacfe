//! Learned recovery patterns
//!
//! A pattern associates a root-cause signature with a plan that has worked
//! before, and tracks how often it keeps working. The rolling success rate
//! uses exponentially decayed counters so recent outcomes weigh more; the
//! raw counters are kept for the persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlanId, Signature};
use crate::plan::{PlanSource, PlanStage, RecoveryPlan};

/// One line of the pattern store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub signature: Signature,
    pub plan_id: PlanId,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used_at: DateTime<Utc>,

    /// Plan stages to replay on reuse
    #[serde(default)]
    pub actions: Vec<PlanStage>,

    #[serde(default)]
    pub decayed_successes: f64,

    #[serde(default)]
    pub decayed_total: f64,
}

impl Pattern {
    /// Start tracking a plan under a signature, with no outcomes yet.
    pub fn new(signature: Signature, plan: &RecoveryPlan, now: DateTime<Utc>) -> Self {
        Self {
            signature,
            plan_id: plan.plan_id.clone(),
            success_count: 0,
            failure_count: 0,
            last_used_at: now,
            actions: plan.stages.clone(),
            decayed_successes: 0.0,
            decayed_total: 0.0,
        }
    }

    /// Rolling success rate in [0, 1]. Zero when nothing has been recorded.
    pub fn success_rate(&self) -> f64 {
        if self.decayed_total > 0.0 {
            (self.decayed_successes / self.decayed_total).clamp(0.0, 1.0)
        } else {
            let total = self.success_count + self.failure_count;
            if total == 0 {
                0.0
            } else {
                self.success_count as f64 / total as f64
            }
        }
    }

    /// Record one outcome. `decay` in (0, 1] scales the weight of all prior
    /// outcomes before the new one is added.
    pub fn record(&mut self, success: bool, decay: f64, now: DateTime<Utc>) {
        let decay = decay.clamp(f64::EPSILON, 1.0);

        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }

        self.decayed_successes = self.decayed_successes * decay + if success { 1.0 } else { 0.0 };
        self.decayed_total = self.decayed_total * decay + 1.0;
        self.last_used_at = now;
    }

    /// Re-derive the decayed counters from raw counts. Used for records
    /// written without them.
    pub fn normalize(&mut self) {
        if self.decayed_total <= 0.0 {
            self.decayed_successes = self.success_count as f64;
            self.decayed_total = (self.success_count + self.failure_count) as f64;
        }
        self.decayed_successes = self.decayed_successes.clamp(0.0, self.decayed_total);
    }

    /// The stored plan, ready for reuse.
    pub fn plan(&self) -> RecoveryPlan {
        RecoveryPlan {
            plan_id: self.plan_id.clone(),
            source: PlanSource::Pattern,
            confidence: self.success_rate(),
            stages: self.actions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::CauseCategory;
    use crate::plan::{ActionKind, RecoveryAction};

    fn pattern() -> Pattern {
        let plan = RecoveryPlan::sequential(
            PlanId::for_rule(CauseCategory::PowerSupply),
            PlanSource::Rule,
            1.0,
            vec![RecoveryAction::new(ActionKind::RestartPowerService, "node-1")],
        );
        Pattern::new(
            Signature::derive(CauseCategory::PowerSupply, "generic"),
            &plan,
            Utc::now(),
        )
    }

    #[test]
    fn test_rate_starts_at_zero() {
        assert_eq!(pattern().success_rate(), 0.0);
    }

    #[test]
    fn test_recent_outcomes_weigh_more() {
        let mut p = pattern();
        for _ in 0..10 {
            p.record(false, 0.8, Utc::now());
        }
        for _ in 0..5 {
            p.record(true, 0.8, Utc::now());
        }

        let raw = p.success_count as f64 / (p.success_count + p.failure_count) as f64;
        assert!(p.success_rate() > raw);
        assert!(p.success_rate() <= 1.0);
    }

    #[test]
    fn test_legacy_line_normalizes() {
        let line = r#"{"signature":"abc","plan_id":"rule:thermal","success_count":3,"failure_count":1,"last_used_at":"2026-01-01T00:00:00Z"}"#;
        let mut p: Pattern = serde_json::from_str(line).unwrap();
        p.normalize();
        assert!((p.success_rate() - 0.75).abs() < 1e-9);
        assert!(p.actions.is_empty());
    }

    #[test]
    fn test_reused_plan_is_pattern_sourced() {
        let mut p = pattern();
        p.record(true, 0.95, Utc::now());
        let plan = p.plan();
        assert_eq!(plan.source, PlanSource::Pattern);
        assert_eq!(plan.confidence, 1.0);
        assert!(plan.contains(ActionKind::RestartPowerService));
    }
}
