use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{CopilotError, Result};
use crate::types::GeoPoint;

pub const DEFAULT_CAPACITY: usize = 10_000;

/// Last map clicks for one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub driver_location: GeoPoint,
}

// Midtown Manhattan starting points shown before the first click
impl Default for SessionState {
    fn default() -> Self {
        Self {
            pickup: GeoPoint::new(40.768, -73.982),
            dropoff: GeoPoint::new(40.730, -73.980),
            driver_location: GeoPoint::new(40.75, -73.99),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointTarget {
    Pickup,
    Dropoff,
    Driver,
}

impl std::str::FromStr for PointTarget {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pickup" => Ok(Self::Pickup),
            "dropoff" => Ok(Self::Dropoff),
            "driver" => Ok(Self::Driver),
            other => Err(CopilotError::invalid(
                "target",
                format!("{other:?} is not one of pickup, dropoff, driver"),
            )),
        }
    }
}

#[derive(Debug)]
struct Entry {
    state: SessionState,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    entries: HashMap<String, Entry>,
    clock: u64,
}

impl Sessions {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.entries.remove(&id);
            tracing::debug!("evicted session {}", id);
        }
    }
}

/// Per-client map state, bounded to `capacity` sessions.
/// When full, the least recently used session is dropped.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<Sessions>,
    capacity: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            capacity: capacity.max(1),
        }
    }

    /// Unknown ids get the default points and are not stored.
    pub fn get(&self, id: &str) -> SessionState {
        let mut sessions = self.sessions.lock();
        let now = sessions.tick();
        match sessions.entries.get_mut(id) {
            Some(entry) => {
                entry.last_used = now;
                entry.state.clone()
            }
            None => SessionState::default(),
        }
    }

    pub fn set(&self, id: &str, target: PointTarget, point: GeoPoint) -> Result<SessionState> {
        let name = match target {
            PointTarget::Pickup => "pickup",
            PointTarget::Dropoff => "dropoff",
            PointTarget::Driver => "driver_location",
        };
        point.validate(name)?;

        let mut sessions = self.sessions.lock();
        let now = sessions.tick();
        if !sessions.entries.contains_key(id) && sessions.entries.len() >= self.capacity {
            sessions.evict_least_recent();
        }
        let entry = sessions.entries.entry(id.to_string()).or_insert_with(|| Entry {
            state: SessionState::default(),
            last_used: now,
        });
        entry.last_used = now;
        match target {
            PointTarget::Pickup => entry.state.pickup = point,
            PointTarget::Dropoff => entry.state.dropoff = point,
            PointTarget::Driver => entry.state.driver_location = point,
        }
        Ok(entry.state.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.lock().entries.len()
    }
}
