//! Fleet storm circuit breaker.
//!
//! Tracks incident openings across the fleet in a sliding window. When the
//! fraction of devices opening incidents exceeds the threshold, automation
//! is paused fleet-wide:
//! - Closed: incidents proceed normally
//! - Open: new incidents escalate immediately, in-flight ones stop before executing
//! - Half-Open: after the reset timeout, automation resumes on probation

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use warden_types::DeviceId;

use crate::config::StormConfig;
use crate::error::{RecoveryError, RecoveryResult};

/// State of the storm breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StormState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for StormState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StormState::Closed => write!(f, "closed"),
            StormState::Open => write!(f, "open"),
            StormState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Inner {
    state: StormState,
    openings: VecDeque<(Instant, DeviceId)>,
    opened_at: Option<Instant>,
    last_transition: DateTime<Utc>,
}

/// Fleet-wide breaker over incident openings.
pub struct FleetStormBreaker {
    config: StormConfig,
    inner: Mutex<Inner>,
}

impl FleetStormBreaker {
    pub fn new(config: StormConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: StormState::Closed,
                openings: VecDeque::new(),
                opened_at: None,
                last_transition: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fleet size used for the ratio: the configured size if set, else the
    /// number of devices that have reported.
    pub fn fleet_size(&self, known_devices: usize) -> usize {
        self.config.fleet_size.unwrap_or(known_devices)
    }

    /// Count a new incident opening. Errors when automation is paused,
    /// including when this opening is the one that trips the breaker.
    pub fn record_opening(
        &self,
        device_id: &DeviceId,
        known_devices: usize,
        now: Instant,
    ) -> RecoveryResult<()> {
        let fleet_size = self.fleet_size(known_devices);
        let mut inner = self.lock();

        self.prune(&mut inner, now);
        self.check_timeout(&mut inner, now);
        inner.openings.push_back((now, device_id.clone()));

        let opened = distinct_devices(&inner.openings);
        let storming = fleet_size >= self.config.min_fleet_size
            && fleet_size > 0
            && opened as f64 / fleet_size as f64 > self.config.threshold;

        match inner.state {
            StormState::Open => Err(RecoveryError::FleetStormCircuitBreaker { opened, fleet_size }),
            StormState::Closed | StormState::HalfOpen if storming => {
                warn!(
                    opened,
                    fleet_size,
                    threshold = self.config.threshold,
                    "Fleet incident storm, pausing automation"
                );
                transition(&mut inner, StormState::Open, now);
                Err(RecoveryError::FleetStormCircuitBreaker { opened, fleet_size })
            }
            StormState::HalfOpen => {
                info!(opened, fleet_size, "Fleet storm subsided, resuming automation");
                transition(&mut inner, StormState::Closed, now);
                Ok(())
            }
            StormState::Closed => Ok(()),
        }
    }

    /// Whether automatic recovery may proceed right now.
    pub fn allow_automation(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        self.check_timeout(&mut inner, now);
        inner.state != StormState::Open
    }

    pub fn state(&self) -> StormState {
        let mut inner = self.lock();
        self.check_timeout(&mut inner, Instant::now());
        inner.state
    }

    /// Force the breaker to a state.
    pub fn force_state(&self, state: StormState) {
        let mut inner = self.lock();
        info!(old_state = %inner.state, new_state = %state, "Storm breaker state forced");
        transition(&mut inner, state, Instant::now());
    }

    pub fn reset(&self) {
        self.force_state(StormState::Closed);
    }

    pub fn stats(&self, known_devices: usize) -> StormStats {
        let now = Instant::now();
        let mut inner = self.lock();
        self.prune(&mut inner, now);
        self.check_timeout(&mut inner, now);

        StormStats {
            state: inner.state,
            openings_in_window: distinct_devices(&inner.openings),
            fleet_size: self.fleet_size(known_devices),
            threshold: self.config.threshold,
            last_transition: inner.last_transition,
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some((at, _)) = inner.openings.front() {
            if now.saturating_duration_since(*at) > self.config.window {
                inner.openings.pop_front();
            } else {
                break;
            }
        }
    }

    fn check_timeout(&self, inner: &mut Inner, now: Instant) {
        if inner.state != StormState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if now.saturating_duration_since(opened_at) >= self.config.reset_timeout {
                info!("Storm breaker half-open after reset timeout");
                transition(inner, StormState::HalfOpen, now);
            }
        }
    }
}

fn transition(inner: &mut Inner, state: StormState, now: Instant) {
    inner.state = state;
    inner.last_transition = Utc::now();
    match state {
        StormState::Open => inner.opened_at = Some(now),
        StormState::Closed => inner.opened_at = None,
        StormState::HalfOpen => {}
    }
}

fn distinct_devices(openings: &VecDeque<(Instant, DeviceId)>) -> usize {
    openings
        .iter()
        .map(|(_, id)| id)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Snapshot of the storm breaker for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormStats {
    pub state: StormState,
    pub openings_in_window: usize,
    pub fleet_size: usize,
    pub threshold: f64,
    pub last_transition: DateTime<Utc>,
}
