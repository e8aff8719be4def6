use std::collections::{BTreeMap, BTreeSet};

use crate::shared::constants::MARKER_TIMEOUT_SECS;

/// Last-seen time (monotonic seconds) of every marker currently in view.
///
/// An entry exists only while its age is within the disappearance
/// threshold; [`MarkerTracker::observe`] removes it on the first frame the
/// threshold is crossed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerMemory {
    last_seen: BTreeMap<u32, f64>,
}

impl MarkerMemory {
    pub fn last_seen(&self, id: u32) -> Option<f64> {
        self.last_seen.get(&id).copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.last_seen.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.last_seen.keys().copied()
    }

    fn record(&mut self, id: u32, now: f64) -> Option<f64> {
        self.last_seen.insert(id, now)
    }

    fn remove(&mut self, id: u32) {
        self.last_seen.remove(&id);
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MarkerEvent {
    /// First sighting of this id.
    Appeared { id: u32 },
    /// Seen again after being gone longer than the threshold.
    Returned { id: u32, absent_secs: f64 },
    /// Unseen for longer than the threshold.
    Disappeared { id: u32, last_seen: f64 },
}

impl MarkerEvent {
    pub fn id(&self) -> u32 {
        match *self {
            Self::Appeared { id } | Self::Returned { id, .. } | Self::Disappeared { id, .. } => id,
        }
    }
}

impl std::fmt::Display for MarkerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Appeared { id } => write!(f, "marker {id} appeared"),
            Self::Returned { id, absent_secs } => {
                write!(f, "marker {id} returned after {absent_secs:.1}s")
            }
            Self::Disappeared { id, .. } => write!(f, "marker {id} disappeared"),
        }
    }
}

/// Per-id presence state machine.
///
/// ```text
/// (none) --seen--> Present --unseen > threshold--> Departed
///                  Present <--------seen---------- Departed
/// ```
///
/// `Absent -> Present` emits `Appeared`, `Departed -> Present` emits
/// `Returned`, `Present -> Departed` emits `Disappeared`. A `Present` id
/// seen again after a gap above the threshold (no frame evaluated in
/// between) also emits `Returned`.
#[derive(Clone, Debug)]
pub struct MarkerTracker {
    memory: MarkerMemory,
    departed: BTreeMap<u32, f64>,
    threshold_secs: f64,
}

impl MarkerTracker {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            memory: MarkerMemory::default(),
            departed: BTreeMap::new(),
            threshold_secs,
        }
    }

    pub fn memory(&self) -> &MarkerMemory {
        &self.memory
    }

    /// Evaluates one frame's detected ids at time `now`.
    ///
    /// Seen ids are recorded first, then stale entries are pruned, so an id
    /// can never both appear and disappear in the same frame. Events come
    /// out in that order, ids ascending within each group.
    pub fn observe(&mut self, seen: &[u32], now: f64) -> Vec<MarkerEvent> {
        let seen: BTreeSet<u32> = seen.iter().copied().collect();
        let mut events = Vec::new();

        for &id in &seen {
            let departed_at = self.departed.remove(&id);
            match (self.memory.record(id, now), departed_at) {
                (None, None) => events.push(MarkerEvent::Appeared { id }),
                (None, Some(last)) => events.push(MarkerEvent::Returned {
                    id,
                    absent_secs: now - last,
                }),
                (Some(last), _) if now - last > self.threshold_secs => {
                    events.push(MarkerEvent::Returned {
                        id,
                        absent_secs: now - last,
                    })
                }
                (Some(_), _) => {}
            }
        }

        let stale: Vec<(u32, f64)> = self
            .memory
            .last_seen
            .iter()
            .filter(|&(id, last)| !seen.contains(id) && now - *last > self.threshold_secs)
            .map(|(&id, &last)| (id, last))
            .collect();
        for (id, last_seen) in stale {
            self.memory.remove(id);
            self.departed.insert(id, last_seen);
            events.push(MarkerEvent::Disappeared { id, last_seen });
        }

        events
    }
}

impl Default for MarkerTracker {
    fn default() -> Self {
        Self::new(MARKER_TIMEOUT_SECS)
    }
}
