//! Telemetry intake.
//!
//! Validates incoming snapshots and keeps a merged view per device: the
//! latest value of every metric the device has reported, so a snapshot that
//! omits a metric does not hide its last reading. The set of devices that
//! have ever reported is the default fleet size for the storm breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use warden_types::{DeviceId, TelemetrySnapshot};

use crate::config::DetectionConfig;
use crate::error::{RecoveryError, RecoveryResult};

const MAX_DEVICE_ID_LEN: usize = 128;

/// Accepts telemetry and remembers the latest reading of every metric per
/// device.
pub struct TelemetryIngest {
    latest: DashMap<DeviceId, TelemetrySnapshot>,
    max_clock_skew: Duration,
}

impl TelemetryIngest {
    pub fn new(max_clock_skew: Duration) -> Self {
        Self {
            latest: DashMap::new(),
            max_clock_skew,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.max_clock_skew)
    }

    /// Validate and record a snapshot.
    ///
    /// An older snapshot than the one on record is accepted but does not
    /// change the merged view.
    pub fn accept(&self, snapshot: &TelemetrySnapshot) -> RecoveryResult<()> {
        validate(snapshot, Utc::now(), self.max_clock_skew)?;

        let mut entry = self
            .latest
            .entry(snapshot.device_id.clone())
            .or_insert_with(|| snapshot.clone());
        if snapshot.timestamp >= entry.timestamp {
            let merged = &mut *entry;
            merged.timestamp = snapshot.timestamp;
            merged.device_class = snapshot.device_class.clone();
            merged.service = snapshot.service.clone();
            merged
                .metrics
                .extend(snapshot.metrics.iter().map(|(k, v)| (k.clone(), *v)));
        } else {
            debug!(
                device_id = %snapshot.device_id,
                timestamp = %snapshot.timestamp,
                "Out-of-order snapshot kept out of latest view"
            );
        }

        Ok(())
    }

    /// Merged view of a device: latest timestamp, class and service, and
    /// the latest value of every metric it has reported.
    pub fn latest(&self, device_id: &DeviceId) -> Option<TelemetrySnapshot> {
        self.latest.get(device_id).map(|s| s.clone())
    }

    /// Number of distinct devices that have reported.
    pub fn known_devices(&self) -> usize {
        self.latest.len()
    }
}

/// Check a snapshot for structural problems.
pub fn validate(
    snapshot: &TelemetrySnapshot,
    now: DateTime<Utc>,
    max_clock_skew: Duration,
) -> RecoveryResult<()> {
    let id = snapshot.device_id.as_str();
    if id.is_empty() {
        return Err(RecoveryError::InvalidTelemetry(
            "device_id must not be empty".into(),
        ));
    }
    if id.len() > MAX_DEVICE_ID_LEN {
        return Err(RecoveryError::InvalidTelemetry(format!(
            "device_id longer than {} characters",
            MAX_DEVICE_ID_LEN
        )));
    }
    if id.chars().any(char::is_whitespace) {
        return Err(RecoveryError::InvalidTelemetry(
            "device_id must not contain whitespace".into(),
        ));
    }
    if snapshot.metrics.is_empty() {
        return Err(RecoveryError::InvalidTelemetry(
            "snapshot carries no metrics".into(),
        ));
    }
    if let Some((name, value)) = snapshot.metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(RecoveryError::InvalidTelemetry(format!(
            "metric {} has non-finite value {}",
            name, value
        )));
    }

    let skew = chrono::Duration::from_std(max_clock_skew)
        .unwrap_or_else(|_| chrono::Duration::days(365));
    if snapshot.timestamp > now + skew {
        return Err(RecoveryError::InvalidTelemetry(format!(
            "timestamp {} is too far in the future",
            snapshot.timestamp
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str) -> TelemetrySnapshot {
        TelemetrySnapshot::new(DeviceId::new(id), Utc::now()).with_metric("temperature", 21.0)
    }

    #[test]
    fn test_accept_tracks_latest() {
        let ingest = TelemetryIngest::new(Duration::from_secs(300));
        let first = snapshot("node-1");
        let mut second = snapshot("node-1").with_metric("temperature", 40.0);
        second.timestamp = first.timestamp + chrono::Duration::seconds(5);

        ingest.accept(&first).unwrap();
        ingest.accept(&second).unwrap();
        ingest.accept(&first).unwrap();

        let latest = ingest.latest(&DeviceId::new("node-1")).unwrap();
        assert_eq!(latest.metric("temperature"), Some(40.0));
        assert_eq!(ingest.known_devices(), 1);
    }

    #[test]
    fn test_partial_snapshot_keeps_other_readings() {
        let ingest = TelemetryIngest::new(Duration::from_secs(300));
        let first = snapshot("node-1").with_metric("battery_voltage", 3.0);
        let mut second = TelemetrySnapshot::new(DeviceId::new("node-1"), first.timestamp)
            .with_metric("wifi_signal_strength", -50.0);
        second.timestamp = first.timestamp + chrono::Duration::seconds(5);

        ingest.accept(&first).unwrap();
        ingest.accept(&second).unwrap();

        let latest = ingest.latest(&DeviceId::new("node-1")).unwrap();
        assert_eq!(latest.timestamp, second.timestamp);
        assert_eq!(latest.metric("battery_voltage"), Some(3.0));
        assert_eq!(latest.metric("wifi_signal_strength"), Some(-50.0));
        assert_eq!(latest.metric("temperature"), Some(21.0));
    }

    #[test]
    fn test_rejects_malformed() {
        let now = Utc::now();
        let skew = Duration::from_secs(300);

        assert!(validate(&snapshot(""), now, skew).is_err());
        assert!(validate(&snapshot("has space"), now, skew).is_err());
        assert!(validate(&snapshot(&"x".repeat(200)), now, skew).is_err());

        let empty = TelemetrySnapshot::new(DeviceId::new("node-1"), now);
        assert!(validate(&empty, now, skew).is_err());

        let nan = snapshot("node-1").with_metric("cpu_usage", f64::NAN);
        assert!(validate(&nan, now, skew).is_err());

        let mut future = snapshot("node-1");
        future.timestamp = now + chrono::Duration::hours(1);
        assert!(matches!(
            validate(&future, now, skew),
            Err(RecoveryError::InvalidTelemetry(_))
        ));
    }
}
