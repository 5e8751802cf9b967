// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The realtime clock abstraction.
//!
//! The clock is the only source of ground truth for "now". All scheduling math is
//! done against absolute clock seconds; the renderer consumes those absolute times.

use std::time::Instant;

/// Exposes the current absolute time of the underlying audio renderer.
pub trait Clock: Send + Sync {
    /// The current time in seconds. Monotonic and non-decreasing.
    fn now(&self) -> f64;

    /// Returns true if the underlying renderer clock is running. While this is
    /// false, all scheduling operations are no-ops that report not-ready.
    fn is_ready(&self) -> bool {
        true
    }
}

/// A clock backed by [`Instant`]. Used by the demo binary and tests, where the
/// renderer has no clock of its own.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Creates a new system clock starting at zero.
    pub fn new() -> SystemClock {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::Clock;

    /// A manually advanced clock for deterministic tests.
    #[derive(Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<f64>>,
        ready: bool,
    }

    impl ManualClock {
        pub fn new(now: f64) -> ManualClock {
            ManualClock {
                now: Arc::new(Mutex::new(now)),
                ready: true,
            }
        }

        pub fn not_ready() -> ManualClock {
            ManualClock {
                now: Arc::new(Mutex::new(0.0)),
                ready: false,
            }
        }

        pub fn advance(&self, seconds: f64) {
            *self.now.lock() += seconds;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> f64 {
            *self.now.lock()
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = super::SystemClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
        assert!(clock.is_ready());
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1.0);
        assert_eq!(clock.now(), 1.0);
        clock.advance(0.5);
        assert_eq!(clock.now(), 1.5);
    }
}
