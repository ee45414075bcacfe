//! Capability implementations wired in by the daemon.
//!
//! Health is judged from the telemetry the daemon already receives. Actions
//! and notifications go to optional webhooks; without an action webhook the
//! daemon only logs what it would have done.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use warden_recovery::{
    ActionCapability, ActionReport, CapabilityError, Channel, HealthCheck, Notifier, SideEffects,
    SymptomDetector, TelemetryIngest,
};
use warden_types::{DeviceId, Incident, RecoveryAction};

/// Healthy when the device's latest snapshot fires no detection rule.
pub struct TelemetryHealthCheck {
    telemetry: Arc<TelemetryIngest>,
    detector: SymptomDetector,
}

impl TelemetryHealthCheck {
    pub fn new(telemetry: Arc<TelemetryIngest>, detector: SymptomDetector) -> Self {
        Self {
            telemetry,
            detector,
        }
    }
}

#[async_trait]
impl HealthCheck for TelemetryHealthCheck {
    async fn check(&self, device_id: &DeviceId) -> Result<bool, CapabilityError> {
        match self.telemetry.latest(device_id) {
            Some(snapshot) => Ok(self.detector.is_healthy(&snapshot)),
            None => Err(CapabilityError::transient(
                format!("no telemetry from {}", device_id),
                SideEffects::NotApplied,
            )),
        }
    }
}

/// Logs every action and reports it as applied.
pub struct DryRunCapability;

#[async_trait]
impl ActionCapability for DryRunCapability {
    async fn execute(
        &self,
        device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError> {
        tracing::info!(
            device_id = %device_id,
            action = %action.kind,
            target = %action.target,
            "Dry run: action not sent"
        );
        Ok(ActionReport::new(format!("dry run: {}", action)))
    }
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    device_id: &'a DeviceId,
    action: &'a RecoveryAction,
}

/// Posts actions to a device-management endpoint.
pub struct WebhookCapability {
    client: reqwest::Client,
    url: String,
}

impl WebhookCapability {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ActionCapability for WebhookCapability {
    async fn execute(
        &self,
        device_id: &DeviceId,
        action: &RecoveryAction,
    ) -> Result<ActionReport, CapabilityError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ActionRequest { device_id, action })
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(ActionReport::new(body))
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(CapabilityError::transient(
                format!("{}: {}", status, body),
                SideEffects::Unknown,
            ))
        } else {
            Err(CapabilityError::Permanent(format!("{}: {}", status, body)))
        }
    }
}

#[derive(Serialize)]
struct Notification<'a> {
    incident: &'a Incident,
    channel: Channel,
}

/// Posts escalations to a paging or chat integration.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, incident: &Incident, channel: Channel) -> Result<(), CapabilityError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Notification { incident, channel })
            .send()
            .await
            .map_err(request_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CapabilityError::Permanent(format!(
                "notification rejected with {}",
                response.status()
            )))
        }
    }
}

/// Connection failures mean the endpoint is down; anything after the request
/// left may have been applied.
fn request_error(e: reqwest::Error) -> CapabilityError {
    if e.is_connect() {
        CapabilityError::Unavailable(e.to_string())
    } else if e.is_builder() {
        CapabilityError::transient(e.to_string(), SideEffects::NotApplied)
    } else {
        CapabilityError::transient(e.to_string(), SideEffects::Unknown)
    }
}
