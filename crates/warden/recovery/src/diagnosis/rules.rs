//! Rule-based root cause analyzer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::{CauseCandidate, CauseCategory, Symptom, SymptomKind};

use super::{rank, DependencyContext, RootCauseAnalyzer};
use crate::error::CapabilityError;

/// Maps a set of symptom kinds to a cause. Confidence is the fraction of
/// the rule's conditions present in the incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRule {
    pub cause: CauseCategory,
    pub conditions: Vec<SymptomKind>,
}

impl DiagnosisRule {
    pub fn new(cause: CauseCategory, conditions: impl IntoIterator<Item = SymptomKind>) -> Self {
        Self {
            cause,
            conditions: conditions.into_iter().collect(),
        }
    }

    fn evaluate(&self, present: &[SymptomKind]) -> Option<CauseCandidate> {
        if self.conditions.is_empty() {
            return None;
        }

        let evidence: Vec<SymptomKind> = self
            .conditions
            .iter()
            .copied()
            .filter(|kind| present.contains(kind))
            .collect();
        if evidence.is_empty() {
            return None;
        }

        Some(CauseCandidate {
            cause: self.cause,
            confidence: evidence.len() as f64 / self.conditions.len() as f64,
            evidence,
        })
    }
}

/// Built-in diagnosis rules.
pub fn default_diagnosis_rules() -> Vec<DiagnosisRule> {
    use CauseCategory::*;
    use SymptomKind::*;

    vec![
        DiagnosisRule::new(PowerSupply, [LowBattery]),
        DiagnosisRule::new(Thermal, [HighTemperature]),
        DiagnosisRule::new(Thermal, [LowTemperature]),
        DiagnosisRule::new(ResourceExhaustion, [HighMemory, HighCpu]),
        DiagnosisRule::new(FirmwareInstability, [RebootLoop, HighErrorRate]),
        DiagnosisRule::new(Network, [WeakSignal, HighErrorRate]),
    ]
}

/// Deterministic analyzer driven by [`DiagnosisRule`]s.
pub struct RuleBasedAnalyzer {
    rules: Vec<DiagnosisRule>,
}

impl RuleBasedAnalyzer {
    pub fn new(rules: Vec<DiagnosisRule>) -> Self {
        Self { rules }
    }
}

impl Default for RuleBasedAnalyzer {
    fn default() -> Self {
        Self::new(default_diagnosis_rules())
    }
}

#[async_trait]
impl RootCauseAnalyzer for RuleBasedAnalyzer {
    fn name(&self) -> &str {
        "rules"
    }

    async fn analyze(
        &self,
        symptoms: &[Symptom],
        context: &DependencyContext,
    ) -> Result<Vec<CauseCandidate>, CapabilityError> {
        let present: Vec<SymptomKind> = symptoms.iter().map(|s| s.kind).collect();

        // best candidate per cause
        let mut best: BTreeMap<CauseCategory, CauseCandidate> = BTreeMap::new();
        for candidate in self.rules.iter().filter_map(|r| r.evaluate(&present)) {
            match best.get(&candidate.cause) {
                Some(existing) if existing.confidence >= candidate.confidence => {}
                _ => {
                    best.insert(candidate.cause, candidate);
                }
            }
        }

        let ranked = rank(best.into_values().collect());
        debug!(
            device_id = %context.device_id,
            candidates = ranked.len(),
            top = ?ranked.first().map(|c| c.cause),
            "Rule-based diagnosis"
        );
        Ok(ranked)
    }
}
