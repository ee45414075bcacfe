//! Telemetry snapshots reported by devices and services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::DeviceId;

/// A periodic, pre-aggregated health snapshot for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Reporting device
    pub device_id: DeviceId,

    /// When the device took the snapshot
    pub timestamp: DateTime<Utc>,

    /// Metric name to value
    pub metrics: BTreeMap<String, f64>,

    /// Device class used for pattern signatures and criticality
    #[serde(default = "default_device_class")]
    pub device_class: String,

    /// Dependency-graph node this device runs as, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl TelemetrySnapshot {
    pub fn new(device_id: DeviceId, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id,
            timestamp,
            metrics: BTreeMap::new(),
            device_class: default_device_class(),
            service: None,
        }
    }

    /// Builder-style helper for adding a metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = class.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

pub fn default_device_class() -> String {
    "generic".to_string()
}
