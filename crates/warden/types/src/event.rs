//! Incident lifecycle events

use serde::{Deserialize, Serialize};

use crate::ids::{DeviceId, IncidentId};
use crate::incident::IncidentState;
use crate::plan::ActionOutcome;
use crate::symptom::Severity;

/// Events emitted by the orchestrator for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncidentEvent {
    /// A new incident was opened for a device.
    Opened {
        incident_id: IncidentId,
        device_id: DeviceId,
        severity: Severity,
    },

    /// New symptoms were merged into an open incident.
    Amended {
        incident_id: IncidentId,
        device_id: DeviceId,
        added: usize,
        severity: Severity,
    },

    /// In-flight work was cancelled by a superseding symptom set.
    Superseded {
        incident_id: IncidentId,
        device_id: DeviceId,
    },

    /// The incident moved between states.
    Transitioned {
        incident_id: IncidentId,
        device_id: DeviceId,
        from: IncidentState,
        to: IncidentState,
        reason: String,
    },

    /// One recovery action finished (after retries).
    ActionCompleted {
        incident_id: IncidentId,
        device_id: DeviceId,
        outcome: Box<ActionOutcome>,
    },
}

impl IncidentEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            IncidentEvent::Opened { device_id, .. }
            | IncidentEvent::Amended { device_id, .. }
            | IncidentEvent::Superseded { device_id, .. }
            | IncidentEvent::Transitioned { device_id, .. }
            | IncidentEvent::ActionCompleted { device_id, .. } => device_id,
        }
    }
}
