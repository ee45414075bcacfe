//! Post-recovery verification.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};
use warden_types::DeviceId;

use crate::capability::HealthCheck;
use crate::config::RecoveryConfig;
use crate::error::{CapabilityError, RecoveryError, RecoveryResult};

/// Polls device health after a plan has run.
pub struct Verifier {
    health: Arc<dyn HealthCheck>,
    interval: Duration,
    max_interval: Duration,
    timeout: Duration,
    check_timeout: Duration,
}

impl Verifier {
    pub fn new(health: Arc<dyn HealthCheck>, config: &RecoveryConfig) -> Self {
        Self {
            health,
            interval: config.verification_interval,
            max_interval: config.max_verification_interval.max(config.verification_interval),
            timeout: config.verification_timeout,
            check_timeout: config.health_check_timeout,
        }
    }

    /// One health check. Check failures and timeouts count as unhealthy; an
    /// unreachable health capability is an error.
    pub async fn probe(&self, device_id: &DeviceId) -> RecoveryResult<bool> {
        match timeout(self.check_timeout, self.health.check(device_id)).await {
            Ok(Ok(healthy)) => Ok(healthy),
            Ok(Err(CapabilityError::Unavailable(reason))) => {
                Err(RecoveryError::CapabilityUnavailable(format!("health check: {}", reason)))
            }
            Ok(Err(e)) => {
                warn!(device_id = %device_id, error = %e, "Health check failed");
                Ok(false)
            }
            Err(_) => {
                warn!(device_id = %device_id, "Health check timed out");
                Ok(false)
            }
        }
    }

    /// Poll until healthy, doubling the delay between polls up to the
    /// interval cap. Fails with `VerificationTimeout` when health has not
    /// returned within the verification timeout. Always checks at least once.
    pub async fn verify(&self, device_id: &DeviceId) -> RecoveryResult<()> {
        let started = Instant::now();
        let mut delay = self.interval;
        let mut polls = 0u32;

        loop {
            polls += 1;
            if self.probe(device_id).await? {
                debug!(device_id = %device_id, polls, "Device verified healthy");
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed + delay > self.timeout {
                return Err(RecoveryError::VerificationTimeout {
                    device_id: device_id.clone(),
                    waited_ms: elapsed.as_millis() as u64,
                });
            }

            sleep(delay).await;
            delay = (delay * 2).min(self.max_interval);
        }
    }
}
