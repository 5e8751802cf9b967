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

//! The loop engine.
//!
//! Converts a raw, unlooped note sequence into a seamless, optionally
//! quantized, swung, and tempo-shifted repeating schedule. The transform
//! order is fixed: clip to the window, tempo conversion, quantization,
//! swing, then crossfade clipping.

use tracing::{debug, info, warn};

use crate::sequence::{
    GainRamp, LoopWindow, NoteEvent, QuantizeGrid, ScheduledIteration, MIN_EVENT_DURATION,
};
use crate::util::beat_duration;

/// The default fade-in applied to the first loop iteration, in seconds.
pub const DEFAULT_FADE_IN: f64 = 0.05;

/// The default fade-out applied when stopping a loop, in seconds.
pub const DEFAULT_FADE_OUT: f64 = 0.1;

/// The swing shift as a fraction of one grid step at full swing.
const SWING_DEPTH: f64 = 0.1;

/// The velocity range enforced at scheduling time, preventing envelope
/// discontinuities at the extremes.
const SCHEDULED_VELOCITY_MIN: f64 = 0.1;
const SCHEDULED_VELOCITY_MAX: f64 = 0.8;

/// The gain floor of the crossfade dip at the loop seam.
pub const CROSSFADE_DIP_FLOOR: f64 = 0.3;

/// Loop playback lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Not looping.
    Idle,
    /// Actively scheduling iterations.
    Looping,
    /// Fading out; no new iterations are scheduled.
    StoppingLoop,
}

/// A point-in-time snapshot of the loop engine for UI and telemetry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoopStatus {
    pub state: LoopState,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub max_loops: Option<u32>,
    pub crossfade_enabled: bool,
}

/// Owns the loop window and derives playable iterations from raw notes.
pub struct LoopEngine {
    window: LoopWindow,
    original_tempo: f64,
    target_tempo: f64,
    fade_in_duration: f64,
    fade_out_duration: f64,
    state: LoopState,
}

impl LoopEngine {
    /// Creates an idle engine around the given window at the given tempo.
    pub fn new(window: LoopWindow, tempo: f64) -> LoopEngine {
        LoopEngine {
            window,
            original_tempo: tempo,
            target_tempo: tempo,
            fade_in_duration: DEFAULT_FADE_IN,
            fade_out_duration: DEFAULT_FADE_OUT,
            state: LoopState::Idle,
        }
    }

    /// Overrides the start/stop fade durations.
    pub fn set_fades(&mut self, fade_in: f64, fade_out: f64) {
        self.fade_in_duration = fade_in.max(0.0);
        self.fade_out_duration = fade_out.max(0.0);
    }

    /// Sets the loop bounds. Inputs are clamped so the result is always a
    /// valid window; see [`LoopWindow::set_bounds`].
    pub fn set_loop_bounds(&mut self, start: f64, end: f64) -> &LoopWindow {
        self.window.set_bounds(start, end);
        info!(
            start = self.window.start(),
            end = self.window.end(),
            "Loop bounds set"
        );
        &self.window
    }

    /// Derives loop bounds from the notes themselves: the covered span rounded
    /// outward to the beat, at least two beats wide, capped at the window's
    /// maximum duration. Deterministic for identical notes and tempo.
    pub fn auto_detect_loop_bounds(&mut self, notes: &[NoteEvent]) -> &LoopWindow {
        let beat = beat_duration(self.target_tempo);
        let min_duration = beat * 2.0;

        if notes.is_empty() {
            warn!("Auto-detecting loop bounds on an empty sequence");
            self.window.set_bounds(0.0, min_duration);
            return &self.window;
        }

        let min_start = notes.iter().map(|n| n.start).fold(f64::INFINITY, f64::min);
        let max_end = notes.iter().map(|n| n.end()).fold(0.0, f64::max);

        let mut start = (min_start / beat).floor() * beat;
        let mut end = (max_end / beat).ceil() * beat;
        if end - start < min_duration {
            end = start + min_duration;
        }
        start = start.max(0.0);

        self.window.set_bounds(start, end);
        info!(
            start = self.window.start(),
            end = self.window.end(),
            "Auto-detected loop bounds"
        );
        &self.window
    }

    /// Sets the original and target tempo; notes prepared afterwards are
    /// scaled by the resulting ratio.
    pub fn set_tempo_conversion(&mut self, original_tempo: f64, target_tempo: f64) {
        self.original_tempo = original_tempo;
        self.target_tempo = target_tempo;
        self.window.tempo_ratio =
            if original_tempo.is_finite() && original_tempo > 0.0 && target_tempo.is_finite() {
                target_tempo / original_tempo
            } else {
                1.0
            };
        info!(
            original_tempo,
            target_tempo,
            ratio = self.window.tempo_ratio,
            "Tempo conversion set"
        );
    }

    /// Enables or disables quantization to the given grid.
    pub fn set_quantization(&mut self, grid: Option<QuantizeGrid>) {
        self.window.quantize = grid;
    }

    /// Sets the swing amount, clamped to `[0, 1]`.
    pub fn set_swing(&mut self, amount: f64) {
        self.window.swing = if amount.is_finite() {
            amount.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Sets the crossfade duration; zero disables crossfading.
    pub fn set_crossfade(&mut self, duration: f64) {
        self.window.crossfade_duration = if duration.is_finite() {
            duration.max(0.0)
        } else {
            0.0
        };
    }

    /// Sets the number of loops to play; `None` loops forever.
    pub fn set_max_loops(&mut self, max_loops: Option<u32>) {
        self.window.max_loops = max_loops;
    }

    /// The loop window.
    pub fn window(&self) -> &LoopWindow {
        &self.window
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Marks the engine as looping. Returns false (and changes nothing) if a
    /// loop is already running or stopping.
    pub fn begin_looping(&mut self) -> bool {
        if self.state != LoopState::Idle {
            debug!(state = ?self.state, "Loop already running");
            return false;
        }
        self.state = LoopState::Looping;
        true
    }

    /// Enters the fade-out phase. Returns false if no loop is running.
    pub fn begin_stopping(&mut self) -> bool {
        if self.state != LoopState::Looping {
            return false;
        }
        self.state = LoopState::StoppingLoop;
        true
    }

    /// Completes a stop from any state.
    pub fn finish_stop(&mut self) {
        self.state = LoopState::Idle;
    }

    /// The fade applied to the first iteration.
    pub fn fade_in_duration(&self) -> f64 {
        self.fade_in_duration
    }

    /// The fade applied when stopping.
    pub fn fade_out_duration(&self) -> f64 {
        self.fade_out_duration
    }

    /// A snapshot of the engine state.
    pub fn status(&self) -> LoopStatus {
        LoopStatus {
            state: self.state,
            start: self.window.start(),
            end: self.window.end(),
            duration: self.window.duration(),
            max_loops: self.window.max_loops,
            crossfade_enabled: self.window.crossfade_duration > 0.0,
        }
    }

    /// Prepares one iteration's worth of notes from the raw sequence.
    ///
    /// Notes outside the window are dropped, partially-overlapping notes are
    /// clipped and re-based to window-relative time, then tempo conversion,
    /// quantization, swing, and crossfade clipping are applied in that order.
    /// Every returned note satisfies `0 <= start < duration` and
    /// `duration >= MIN_EVENT_DURATION`.
    pub fn prepare_looped_sequence(&self, notes: &[NoteEvent]) -> Vec<NoteEvent> {
        if notes.is_empty() {
            warn!("Preparing an empty sequence");
            return Vec::new();
        }

        let window_start = self.window.start();
        let window_end = self.window.end();
        let loop_duration = self.window.duration();
        let ratio = self.window.tempo_ratio;
        let beat = beat_duration(self.target_tempo);

        let mut prepared: Vec<NoteEvent> = notes
            .iter()
            .filter(|n| n.start < window_end && n.end() > window_start)
            .map(|n| {
                let start = (n.start - window_start).max(0.0);
                let end = (n.end() - window_start).min(loop_duration);
                let mut note = n.clone();
                note.start = start;
                note.duration = (end - start).max(MIN_EVENT_DURATION);
                note
            })
            .collect();

        if ratio != 1.0 && ratio.is_finite() && ratio > 0.0 {
            for note in &mut prepared {
                note.start /= ratio;
                note.duration = (note.duration / ratio).max(MIN_EVENT_DURATION);
            }
        }

        if let Some(grid) = self.window.quantize {
            let start_step = beat * grid.fraction();
            let duration_step = start_step / 2.0;
            for note in &mut prepared {
                note.start = quantize_to_step(note.start, start_step);
                note.duration = quantize_to_step(note.duration, duration_step).max(MIN_EVENT_DURATION);
            }
        }

        // Notes reduced to the floor duration by clipping or quantization
        // carry no audible content; crossfade clipping below may still floor
        // durations, and those notes are kept to preserve their onsets.
        prepared.retain(|n| n.duration > MIN_EVENT_DURATION);

        if self.window.swing > 0.0 {
            let grid = self
                .window
                .quantize
                .unwrap_or(QuantizeGrid::ThirtySecond)
                .fraction();
            let step = beat * grid;
            let shift = step * self.window.swing * SWING_DEPTH;
            for note in &mut prepared {
                let position = (note.start / step).floor() as i64;
                if position % 2 == 1 {
                    note.start += shift;
                }
            }
        }

        // A crossfade longer than the loop spans the whole loop, never more;
        // the boundary stays at or above zero.
        let crossfade = self.window.crossfade_duration.min(loop_duration);
        if crossfade > 0.0 {
            let boundary = loop_duration - crossfade;
            for note in &mut prepared {
                if note.end() > boundary {
                    note.duration = (boundary - note.start).max(MIN_EVENT_DURATION);
                }
            }
        }

        // Quantization and swing can push a start to (or past) the loop seam;
        // such notes would collide with the next iteration's downbeat.
        prepared.retain(|n| n.start >= 0.0 && n.start < loop_duration);
        prepared.sort_by(|a, b| a.start.total_cmp(&b.start));

        debug!(
            prepared = prepared.len(),
            original = notes.len(),
            loop_duration,
            "Prepared looped sequence"
        );
        prepared
    }

    /// Materializes one loop iteration from a prepared sequence.
    ///
    /// Velocities are clamped to the safe scheduling range. The first
    /// iteration carries a fade-in ramp; every non-final iteration carries the
    /// crossfade dip across the loop seam when crossfading is enabled.
    pub fn schedule_iteration(&self, prepared: &[NoteEvent], loop_index: u32) -> ScheduledIteration {
        let loop_duration = self.window.duration();
        let events = prepared
            .iter()
            .filter(|n| n.duration > MIN_EVENT_DURATION)
            .map(|n| {
                let mut note = n.clone();
                note.velocity = note
                    .velocity
                    .clamp(SCHEDULED_VELOCITY_MIN, SCHEDULED_VELOCITY_MAX);
                note
            })
            .collect();

        let mut ramps = Vec::new();
        if loop_index == 0 && self.fade_in_duration > 0.0 {
            ramps.push(GainRamp::FadeIn {
                at: 0.0,
                duration: self.fade_in_duration,
            });
        }
        let is_final = self
            .window
            .max_loops
            .is_some_and(|max| loop_index + 1 >= max);
        let crossfade = self.window.crossfade_duration.min(loop_duration);
        if crossfade > 0.0 && !is_final {
            ramps.push(GainRamp::CrossfadeDip {
                at: loop_duration - crossfade,
                duration: crossfade,
            });
        }

        ScheduledIteration {
            loop_index,
            offset: loop_index as f64 * loop_duration,
            events,
            ramps,
        }
    }
}

fn quantize_to_step(time: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return time;
    }
    (time / step).round() * step
}
