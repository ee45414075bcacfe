//! External capabilities the engine depends on.
//!
//! The engine never touches devices directly. Remediation, health checks and
//! human notification are injected behind these traits so deployments can
//! wire in real device management and tests can script behaviour.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};
use warden_types::{ActionKind, DeviceId, Incident, RecoveryAction};

use crate::error::{CapabilityError, SideEffects};
use crate::escalation::Channel;

/// Successful capability call.
#[derive(Debug, Clone, Default)]
pub struct ActionReport {
    pub detail: String,
}

impl ActionReport {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Applies a remediation action to a device or service.
#[async_trait]
pub trait ActionCapability: Send + Sync {
    async fn execute(
        &self,
        device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError>;
}

/// Answers whether a device is currently healthy.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, device_id: &DeviceId) -> Result<bool, CapabilityError>;
}

/// Delivers incidents to humans.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, incident: &Incident, channel: Channel) -> Result<(), CapabilityError>;
}

/// Action capability that accepts every action without doing anything.
pub struct NoOpCapability;

#[async_trait]
impl ActionCapability for NoOpCapability {
    async fn execute(
        &self,
        device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError> {
        debug!(device_id = %device_id, action = %action, "No-op action");
        Ok(ActionReport::new("no-op"))
    }
}

/// Action capability that fails selected action kinds. For testing.
pub struct FailingCapability {
    fail: HashSet<ActionKind>,
    side_effects: SideEffects,
}

impl FailingCapability {
    pub fn new(kinds: impl IntoIterator<Item = ActionKind>, side_effects: SideEffects) -> Self {
        Self {
            fail: kinds.into_iter().collect(),
            side_effects,
        }
    }
}

#[async_trait]
impl ActionCapability for FailingCapability {
    async fn execute(
        &self,
        _device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError> {
        if self.fail.contains(&action.kind) {
            Err(CapabilityError::transient(
                format!("{} failed", action.kind),
                self.side_effects,
            ))
        } else {
            Ok(ActionReport::new("ok"))
        }
    }
}

/// Health check with a fixed answer.
pub struct StaticHealth(pub bool);

#[async_trait]
impl HealthCheck for StaticHealth {
    async fn check(&self, _device_id: &DeviceId) -> Result<bool, CapabilityError> {
        Ok(self.0)
    }
}

/// Notifier that only logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, incident: &Incident, channel: Channel) -> Result<(), CapabilityError> {
        info!(
            incident_id = %incident.id,
            device_id = %incident.device_id,
            severity = %incident.severity(),
            state = %incident.state(),
            channel = %channel,
            "Incident notification"
        );
        Ok(())
    }
}
