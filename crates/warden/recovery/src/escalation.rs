//! Escalation to humans.
//!
//! Routes escalated incidents and manual-intervention requests to a
//! [`Notifier`]. Each incident is escalated at most once. Notifier failures
//! and timeouts are logged and never fail the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_types::{Incident, IncidentId, Severity};

use crate::capability::Notifier;
use crate::error::{CapabilityError, SideEffects};

/// Where a notification is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Operations queue, for incidents that can wait for business hours.
    Operations,
    /// Paging rotation.
    OnCall,
    /// A plan step that needs a human to act on the device.
    Intervention,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Operations => write!(f, "operations"),
            Channel::OnCall => write!(f, "on_call"),
            Channel::Intervention => write!(f, "intervention"),
        }
    }
}

/// Escalates incidents exactly once and forwards intervention requests.
pub struct EscalationManager {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    escalated: DashMap<IncidentId, Channel>,
}

impl EscalationManager {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier,
            timeout,
            escalated: DashMap::new(),
        }
    }

    async fn notify(&self, incident: &Incident, channel: Channel) -> Result<(), CapabilityError> {
        match tokio::time::timeout(self.timeout, self.notifier.notify(incident, channel)).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::transient(
                format!("{} notification timed out after {:?}", channel, self.timeout),
                SideEffects::Unknown,
            )),
        }
    }

    /// Channel for an escalation at `severity`.
    pub fn channel_for(severity: Severity) -> Channel {
        if severity >= Severity::High {
            Channel::OnCall
        } else {
            Channel::Operations
        }
    }

    /// Notify humans about an escalated incident. Returns false if the
    /// incident was already escalated.
    pub async fn escalate(&self, incident: &Incident) -> bool {
        let channel = Self::channel_for(incident.severity());
        if self
            .escalated
            .insert(incident.id.clone(), channel)
            .is_some()
        {
            return false;
        }

        info!(
            incident_id = %incident.id,
            device_id = %incident.device_id,
            severity = %incident.severity(),
            channel = %channel,
            "Escalating incident"
        );

        if let Err(e) = self.notify(incident, channel).await {
            warn!(
                incident_id = %incident.id,
                error = %e,
                "Escalation notification failed"
            );
        }
        true
    }

    /// Ask a human to perform a manual step.
    pub async fn request_intervention(&self, incident: &Incident) -> Result<(), CapabilityError> {
        info!(
            incident_id = %incident.id,
            device_id = %incident.device_id,
            "Requesting manual intervention"
        );
        self.notify(incident, Channel::Intervention)
            .await
            .map_err(|e| {
                warn!(incident_id = %incident.id, error = %e, "Intervention request failed");
                e
            })
    }

    pub fn was_escalated(&self, incident_id: &IncidentId) -> bool {
        self.escalated.contains_key(incident_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use warden_types::DeviceId;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<Channel>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, _incident: &Incident, channel: Channel) -> Result<(), CapabilityError> {
            self.calls.lock().unwrap().push(channel);
            if self.fail {
                Err(CapabilityError::Unavailable("pager down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn incident(severity: Severity) -> Incident {
        Incident::open(
            DeviceId::new("node-1"),
            "generic",
            None,
            Vec::new(),
            severity,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_escalates_once() {
        let notifier = Arc::new(Recording::default());
        let manager = EscalationManager::new(notifier.clone(), Duration::from_secs(5));
        let inc = incident(Severity::Medium);

        assert!(manager.escalate(&inc).await);
        assert!(!manager.escalate(&inc).await);
        assert!(manager.was_escalated(&inc.id));
        assert_eq!(*notifier.calls.lock().unwrap(), vec![Channel::Operations]);
    }

    #[tokio::test]
    async fn test_high_severity_pages() {
        let notifier = Arc::new(Recording::default());
        let manager = EscalationManager::new(notifier.clone(), Duration::from_secs(5));

        manager.escalate(&incident(Severity::Critical)).await;
        assert_eq!(*notifier.calls.lock().unwrap(), vec![Channel::OnCall]);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_not_fatal() {
        let notifier = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let manager = EscalationManager::new(notifier.clone(), Duration::from_secs(5));
        let inc = incident(Severity::High);

        assert!(manager.escalate(&inc).await);
        assert!(manager.request_intervention(&inc).await.is_err());
        assert_eq!(notifier.calls.lock().unwrap().len(), 2);
    }

    struct Stalled;

    #[async_trait]
    impl Notifier for Stalled {
        async fn notify(&self, _incident: &Incident, _channel: Channel) -> Result<(), CapabilityError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_notifier_times_out() {
        let manager = EscalationManager::new(Arc::new(Stalled), Duration::from_secs(2));
        let inc = incident(Severity::Critical);
        let started = tokio::time::Instant::now();

        assert!(manager.escalate(&inc).await);
        assert!(manager.was_escalated(&inc.id));
        assert!(matches!(
            manager.request_intervention(&inc).await,
            Err(CapabilityError::Transient { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
