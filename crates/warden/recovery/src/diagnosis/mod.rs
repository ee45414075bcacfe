//! Root cause analysis.
//!
//! The analyzer is an injected capability. It receives the incident's
//! symptoms together with the device's place in the service topology and
//! returns ranked [`CauseCandidate`]s.

mod rules;

pub use rules::{default_diagnosis_rules, DiagnosisRule, RuleBasedAnalyzer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_types::{CauseCandidate, DeviceId, Incident, Symptom};

use crate::error::CapabilityError;
use crate::topology::DependencyGraph;

/// Where the affected device sits in the service topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyContext {
    pub device_id: DeviceId,
    pub device_class: String,
    pub service: Option<String>,

    /// Services the device's service depends on, transitively
    pub upstream: Vec<String>,

    /// Services that depend on the device's service, transitively
    pub blast_radius: Vec<String>,
}

impl DependencyContext {
    pub fn for_incident(incident: &Incident, graph: &DependencyGraph) -> Self {
        let (upstream, blast_radius) = match &incident.service {
            Some(service) => (
                graph.transitive_dependencies(service).into_iter().collect(),
                graph.blast_radius(service).into_iter().collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Self {
            device_id: incident.device_id.clone(),
            device_class: incident.device_class.clone(),
            service: incident.service.clone(),
            upstream,
            blast_radius,
        }
    }
}

/// Produces ranked root-cause hypotheses for a symptom set.
#[async_trait]
pub trait RootCauseAnalyzer: Send + Sync {
    /// Analyzer name for logs.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        symptoms: &[Symptom],
        context: &DependencyContext,
    ) -> Result<Vec<CauseCandidate>, CapabilityError>;
}

/// Clamp confidences into [0, 1], drop non-finite ones and sort best first.
pub fn rank(mut candidates: Vec<CauseCandidate>) -> Vec<CauseCandidate> {
    candidates.retain(|c| c.confidence.is_finite());
    for c in &mut candidates {
        c.confidence = c.confidence.clamp(0.0, 1.0);
    }
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.cause.cmp(&b.cause))
    });
    candidates
}
