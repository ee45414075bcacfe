//! Strongly-typed identifiers for Warden entities
//!
//! Device ids arrive from the fleet and are kept verbatim. Incident and plan
//! ids are generated locally; pattern signatures are derived by hashing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::incident::CauseCategory;

/// Identifier of a monitored device or service
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for an incident
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Generate an id of the form `INC-<yyyymmddHHMMSS>-<device>-<suffix>`.
    pub fn generate(device_id: &DeviceId, at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "INC-{}-{}-{}",
            at.format("%Y%m%d%H%M%S"),
            device_id,
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a recovery plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Plan id for a plan synthesized from the rule table.
    pub fn for_rule(cause: CauseCategory) -> Self {
        Self(format!("rule:{}", cause.as_key()))
    }

    /// Plan id for the generic low-confidence fallback plan.
    pub fn fallback() -> Self {
        Self("fallback".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pattern signature: a hash of root-cause category and device class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Derive the signature for a cause observed on a device class.
    pub fn derive(cause: CauseCategory, device_class: &str) -> Self {
        let material = format!("{}|{}", cause.as_key(), device_class.to_ascii_lowercase());
        let hash = blake3::hash(material.as_bytes());
        Self(hash.to_hex()[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
