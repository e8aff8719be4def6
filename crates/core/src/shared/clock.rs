use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Local};

/// Time source for the pipeline.
///
/// Marker ageing uses `monotonic_secs`; output file names use `wall_time`.
pub trait Clock: Send {
    fn monotonic_secs(&self) -> f64;
    fn wall_time(&self) -> DateTime<Local>;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wall_time(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Hand-driven clock for simulations and tests.
pub struct ManualClock {
    state: Mutex<(f64, DateTime<Local>)>,
}

impl ManualClock {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            state: Mutex::new((0.0, start)),
        }
    }

    /// Moves both the monotonic and the wall clock forward.
    pub fn advance(&self, secs: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0 += secs;
        state.1 += chrono::Duration::milliseconds((secs * 1000.0).round() as i64);
    }
}

impl Clock for ManualClock {
    fn monotonic_secs(&self) -> f64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn wall_time(&self) -> DateTime<Local> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

impl<C: Clock + Sync> Clock for std::sync::Arc<C> {
    fn monotonic_secs(&self) -> f64 {
        (**self).monotonic_secs()
    }

    fn wall_time(&self) -> DateTime<Local> {
        (**self).wall_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_secs();
        let b = clock.monotonic_secs();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advances_both_times() {
        let start = Local::now();
        let clock = ManualClock::new(start);
        clock.advance(1.5);
        assert_relative_eq!(clock.monotonic_secs(), 1.5);
        assert_eq!(clock.wall_time() - start, chrono::Duration::milliseconds(1500));
    }
}
