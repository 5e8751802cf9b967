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

//! The global voice governor.
//!
//! Tracks every active voice across all channels, enforces a process-wide
//! polyphony ceiling with FIFO eviction, and watches the output level so a
//! runaway mix gets its master gain pulled down until it recovers.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::renderer::{Renderer, VoiceId};

/// The default process-wide polyphony ceiling.
pub const DEFAULT_MAX_POLYPHONY: usize = 16;

/// The default output level above which a sample counts toward overload.
pub const DEFAULT_LEVEL_CEILING: f64 = 0.95;

/// The default time the reduced master gain is held after an overload, in
/// seconds.
pub const DEFAULT_OVERLOAD_COOLDOWN: f64 = 2.0;

/// The number of consecutive over-ceiling samples tolerated before the
/// governor declares an overload.
const OVERLOAD_SAMPLE_LIMIT: u32 = 3;

/// The master gain applied while overloading.
const OVERLOAD_GAIN: f64 = 0.7;

/// The ramp time for overload and emergency gain moves, in seconds.
const RAMP_DURATION: f64 = 0.1;

/// The outcome of asking the governor to admit a voice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The voice was admitted. If the ceiling was reached, the oldest active
    /// voice was evicted to make room and must be stopped at the renderer.
    Admitted { evicted: Option<VoiceId> },
    /// The governor is overloading; the trigger should be dropped.
    Rejected,
}

struct GovernorState {
    active: VecDeque<VoiceId>,
    over_ceiling_samples: u32,
    overloading: bool,
    overload_until: f64,
}

/// Process-wide voice accounting and output level protection.
pub struct GlobalVoiceGovernor {
    max_polyphony: usize,
    level_ceiling: f64,
    overload_cooldown: f64,
    state: Mutex<GovernorState>,
}

impl GlobalVoiceGovernor {
    pub fn new(
        max_polyphony: usize,
        level_ceiling: f64,
        overload_cooldown: f64,
    ) -> GlobalVoiceGovernor {
        GlobalVoiceGovernor {
            max_polyphony: max_polyphony.max(1),
            level_ceiling,
            overload_cooldown,
            state: Mutex::new(GovernorState {
                active: VecDeque::new(),
                over_ceiling_samples: 0,
                overloading: false,
                overload_until: 0.0,
            }),
        }
    }

    /// Returns true if a new trigger would be accepted as-is, with no
    /// eviction and no rejection.
    pub fn can_trigger(&self) -> bool {
        let state = self.state.lock();
        !state.overloading && state.active.len() < self.max_polyphony
    }

    /// Returns true if the governor is holding the master gain down.
    pub fn is_overloading(&self) -> bool {
        self.state.lock().overloading
    }

    /// The number of voices currently accounted active.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Admits a voice, evicting the oldest active voice when the polyphony
    /// ceiling is reached. Rejected only while overloading.
    pub fn admit(&self, voice: VoiceId) -> Admission {
        let mut state = self.state.lock();
        if state.overloading {
            return Admission::Rejected;
        }

        // A retrigger of an already-active voice moves it to the back of the
        // eviction order instead of double-counting it.
        state.active.retain(|v| *v != voice);

        let evicted = if state.active.len() >= self.max_polyphony {
            let oldest = state.active.pop_front();
            if let Some(oldest) = oldest {
                info!(voice = oldest, "Evicting oldest voice at polyphony ceiling");
            }
            oldest
        } else {
            None
        };
        state.active.push_back(voice);
        Admission::Admitted { evicted }
    }

    /// Removes a voice from the active accounting, e.g. when it finishes or
    /// is stopped by its pool.
    pub fn remove_voice(&self, voice: VoiceId) {
        self.state.lock().active.retain(|v| *v != voice);
    }

    /// Feeds one output level sample to the overload detector.
    ///
    /// Sustained clipping pulls the master gain down to a safe level; once the
    /// cooldown elapses the gain is restored and detection starts over.
    pub fn record_level(&self, level: f64, now: f64, renderer: &dyn Renderer) {
        let mut state = self.state.lock();

        if state.overloading {
            if now >= state.overload_until {
                state.overloading = false;
                state.over_ceiling_samples = 0;
                info!("Output level recovered, restoring master gain");
                renderer.ramp_master_gain(now, 1.0, RAMP_DURATION);
            }
            return;
        }

        if level > self.level_ceiling {
            state.over_ceiling_samples += 1;
            if state.over_ceiling_samples > OVERLOAD_SAMPLE_LIMIT {
                state.overloading = true;
                state.overload_until = now + self.overload_cooldown;
                warn!(
                    level,
                    ceiling = self.level_ceiling,
                    "Sustained output overload, reducing master gain"
                );
                renderer.ramp_master_gain(now, OVERLOAD_GAIN, RAMP_DURATION);
            }
        } else {
            state.over_ceiling_samples = 0;
        }
    }

    /// Silences everything: ramps the master gain to zero, clears all voice
    /// accounting, then ramps back up. Safe to call repeatedly.
    pub fn emergency_stop(&self, now: f64, renderer: &dyn Renderer) {
        let mut state = self.state.lock();
        warn!(active = state.active.len(), "Emergency stop");
        renderer.ramp_master_gain(now, 0.0, RAMP_DURATION);
        state.active.clear();
        state.overloading = false;
        state.over_ceiling_samples = 0;
        renderer.ramp_master_gain(now + RAMP_DURATION, 1.0, RAMP_DURATION);
    }
}

impl Default for GlobalVoiceGovernor {
    fn default() -> Self {
        GlobalVoiceGovernor::new(
            DEFAULT_MAX_POLYPHONY,
            DEFAULT_LEVEL_CEILING,
            DEFAULT_OVERLOAD_COOLDOWN,
        )
    }
}
