//! In-memory incident repository.
//!
//! One slot per device holds the device's current (or most recent)
//! incident, the worker driving it and the generation counter that fences
//! off writes from superseded workers.

use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use warden_types::{DeviceId, Incident, IncidentState, Symptom};

#[derive(Default)]
pub(crate) struct DeviceSlot {
    pub incident: Option<Incident>,

    /// Bumped whenever the incident's worker is replaced
    pub generation: u64,

    pub worker: Option<JoinHandle<()>>,

    /// Held by a worker for as long as it drives the incident
    pub recovery_lock: Arc<Mutex<()>>,

    /// Symptoms emitted inside the debounce window
    pub recent: Vec<Symptom>,
}

/// Incidents keyed by device.
#[derive(Default)]
pub struct IncidentRepository {
    slots: DashMap<DeviceId, DeviceSlot>,
}

impl IncidentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current incident of a device, or the most recent one if it is closed.
    pub fn get(&self, device_id: &DeviceId) -> Option<Incident> {
        self.slots
            .get(device_id)
            .and_then(|slot| slot.incident.clone())
    }

    /// All incidents, optionally filtered by state, oldest first.
    pub fn list(&self, state: Option<IncidentState>) -> Vec<Incident> {
        let mut incidents: Vec<Incident> = self
            .slots
            .iter()
            .filter_map(|slot| slot.incident.clone())
            .filter(|incident| state.map_or(true, |s| incident.state() == s))
            .collect();
        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        incidents
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.incident.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn slot(&self, device_id: &DeviceId) -> RefMut<'_, DeviceId, DeviceSlot> {
        self.slots.entry(device_id.clone()).or_default()
    }

    /// The incident if `generation` is still the device's live worker.
    pub(crate) fn current(&self, device_id: &DeviceId, generation: u64) -> Option<Incident> {
        let slot = self.slots.get(device_id)?;
        if slot.generation != generation {
            return None;
        }
        slot.incident.clone()
    }

    /// Apply `f` to the incident if `generation` is still live. Returns
    /// None when the worker has been superseded.
    pub(crate) fn update<R>(
        &self,
        device_id: &DeviceId,
        generation: u64,
        f: impl FnOnce(&mut Incident) -> R,
    ) -> Option<R> {
        let mut slot = self.slots.get_mut(device_id)?;
        if slot.generation != generation {
            return None;
        }
        slot.incident.as_mut().map(f)
    }

    pub(crate) fn abort_workers(&self) -> usize {
        let mut aborted = 0;
        for mut slot in self.slots.iter_mut() {
            if let Some(worker) = slot.worker.take() {
                if !worker.is_finished() {
                    aborted += 1;
                }
                worker.abort();
            }
        }
        aborted
    }
}
