//! Severity assessment.
//!
//! The raw score is the sum of symptom weights scaled by the device's
//! criticality multiplier, then clipped onto the five-level scale.

use warden_types::{DeviceId, Severity, Symptom};

use crate::config::CriticalityConfig;

/// Scores symptom sets for a device.
#[derive(Debug, Clone, Default)]
pub struct SeverityAssessor {
    criticality: CriticalityConfig,
}

impl SeverityAssessor {
    pub fn new(criticality: CriticalityConfig) -> Self {
        Self { criticality }
    }

    /// Criticality multiplier for a device.
    pub fn multiplier(&self, device_id: &DeviceId, device_class: &str) -> f64 {
        if let Some(m) = self.criticality.class_multipliers.get(device_class) {
            return *m;
        }

        let id = device_id.as_str().to_ascii_lowercase();
        let critical = self
            .criticality
            .critical_markers
            .iter()
            .any(|marker| id.contains(&marker.to_ascii_lowercase()));

        if critical {
            self.criticality.critical_multiplier
        } else {
            self.criticality.default_multiplier
        }
    }

    /// Raw severity score.
    pub fn score(&self, symptoms: &[Symptom], device_id: &DeviceId, device_class: &str) -> f64 {
        let weights: f64 = symptoms.iter().map(|s| s.severity_weight.max(0.0)).sum();
        weights * self.multiplier(device_id, device_class)
    }

    pub fn assess(&self, symptoms: &[Symptom], device_id: &DeviceId, device_class: &str) -> Severity {
        Severity::from_score(self.score(symptoms, device_id, device_class))
    }
}
