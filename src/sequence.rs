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

//! The note and pattern data model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The minimum duration of any scheduled audio event, in seconds. Derived
/// durations are floored to this to avoid zero-length events.
pub const MIN_EVENT_DURATION: f64 = 0.01;

/// Errors raised when constructing sequence data from untrusted input.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("non-finite or negative note timing: start={start}, duration={duration}")]
    InvalidTiming { start: f64, duration: f64 },
    #[error("non-finite velocity: {0}")]
    InvalidVelocity(f64),
}

/// A single captured note. Immutable once captured.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NoteEvent {
    /// An opaque note reference, resolved by the renderer (e.g. "C4").
    pub note: String,
    /// Loop-relative start time in seconds.
    pub start: f64,
    /// Duration in seconds.
    pub duration: f64,
    /// Velocity in `[0, 1]`.
    pub velocity: f64,
}

impl NoteEvent {
    /// Creates a validated note event. Timing must be finite and non-negative,
    /// velocity finite; velocity is clamped to `[0, 1]`.
    pub fn new(
        note: impl Into<String>,
        start: f64,
        duration: f64,
        velocity: f64,
    ) -> Result<NoteEvent, SequenceError> {
        if !start.is_finite() || !duration.is_finite() || start < 0.0 || duration < 0.0 {
            return Err(SequenceError::InvalidTiming { start, duration });
        }
        if !velocity.is_finite() {
            return Err(SequenceError::InvalidVelocity(velocity));
        }
        Ok(NoteEvent {
            note: note.into(),
            start,
            duration,
            velocity: velocity.clamp(0.0, 1.0),
        })
    }

    /// The loop-relative end time of this note.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A named quantization grid, as a fraction of a beat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizeGrid {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    #[serde(rename = "thirtysecond")]
    ThirtySecond,
}

impl QuantizeGrid {
    /// The grid size as a fraction of a beat (a quarter note is one beat).
    pub fn fraction(&self) -> f64 {
        match self {
            QuantizeGrid::Whole => 4.0,
            QuantizeGrid::Half => 2.0,
            QuantizeGrid::Quarter => 1.0,
            QuantizeGrid::Eighth => 0.5,
            QuantizeGrid::Sixteenth => 0.25,
            QuantizeGrid::ThirtySecond => 0.125,
        }
    }
}

/// The loop window and its playback-shaping parameters.
#[derive(Clone, Debug)]
pub struct LoopWindow {
    /// Absolute loop start within the source sequence, in seconds.
    start: f64,
    /// Absolute loop end within the source sequence, in seconds. Always greater
    /// than `start` and within `max_loop_duration` of it.
    end: f64,
    /// The number of loops to play, or `None` for infinite.
    pub max_loops: Option<u32>,
    /// Quantization grid; `None` disables quantization.
    pub quantize: Option<QuantizeGrid>,
    /// Swing amount in `[0, 1]`.
    pub swing: f64,
    /// Target tempo divided by original tempo.
    pub tempo_ratio: f64,
    /// Crossfade duration in seconds; zero disables crossfading.
    pub crossfade_duration: f64,
    /// Safety cap on the loop duration, in seconds.
    max_loop_duration: f64,
}

impl LoopWindow {
    /// Creates a window with the given bounds, clamped so that `start >= 0`,
    /// `end > start` and `end - start <= max_loop_duration`. Never fails.
    pub fn new(start: f64, end: f64, max_loop_duration: f64) -> LoopWindow {
        let mut window = LoopWindow {
            start: 0.0,
            end: MIN_EVENT_DURATION,
            max_loops: None,
            quantize: None,
            swing: 0.0,
            tempo_ratio: 1.0,
            crossfade_duration: 0.0,
            max_loop_duration: if max_loop_duration.is_finite() && max_loop_duration > 0.0 {
                max_loop_duration
            } else {
                DEFAULT_MAX_LOOP_DURATION
            },
        };
        window.set_bounds(start, end);
        window
    }

    /// Sets the loop bounds, applying the same clamps as [`LoopWindow::new`].
    pub fn set_bounds(&mut self, start: f64, end: f64) {
        let start = if start.is_finite() { start.max(0.0) } else { 0.0 };
        let end = if end.is_finite() { end.max(start) } else { start };
        self.start = start;
        // A degenerate window is widened to the minimum event duration rather
        // than rejected, so the invariant end > start always holds.
        self.end = if end - start < MIN_EVENT_DURATION {
            start + MIN_EVENT_DURATION
        } else {
            end
        };
        if self.end - self.start > self.max_loop_duration {
            self.end = self.start + self.max_loop_duration;
        }
    }

    /// The loop start in seconds.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// The loop end in seconds.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// The loop duration in seconds. Always positive.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// The safety cap on loop duration.
    pub fn max_loop_duration(&self) -> f64 {
        self.max_loop_duration
    }
}

/// The default safety cap on loop duration, in seconds.
pub const DEFAULT_MAX_LOOP_DURATION: f64 = 30.0;

/// A master-gain automation emitted alongside a scheduled iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainRamp {
    /// Ramp from silence to unity over `duration`, starting at loop-relative `at`.
    FadeIn { at: f64, duration: f64 },
    /// Dip to 0.3 and back across the loop seam so overlapping tails don't sum
    /// to double amplitude. `at` is loop-relative; the dip spans `duration` and
    /// the restore begins halfway through.
    CrossfadeDip { at: f64, duration: f64 },
}

/// One materialized loop iteration. Ephemeral: produced by the loop engine,
/// consumed once by the transport, then discarded.
#[derive(Clone, Debug)]
pub struct ScheduledIteration {
    /// Which repetition of the loop this is, starting at zero.
    pub loop_index: u32,
    /// Offset of this iteration from the start of looping, in seconds.
    pub offset: f64,
    /// The events to play, times relative to the iteration start.
    pub events: Vec<NoteEvent>,
    /// Gain automations for this iteration, times relative to the iteration start.
    pub ramps: Vec<GainRamp>,
}

/// Per-channel sound settings applied to every trigger on a track.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChannelSound {
    /// Normalized region start into the source buffer.
    #[serde(default)]
    pub region_start: f64,
    /// Normalized region end into the source buffer.
    #[serde(default = "default_region_end")]
    pub region_end: f64,
    /// Playback rate multiplier.
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
    /// Requested fade-in (attack) in seconds.
    #[serde(default = "default_fade_in")]
    pub fade_in: f64,
    /// Requested fade-out (release) in seconds.
    #[serde(default = "default_fade_out")]
    pub fade_out: f64,
    /// Whether concurrent voices are allowed on this channel.
    #[serde(default)]
    pub allow_overlap: bool,
}

fn default_region_end() -> f64 {
    1.0
}

fn default_playback_rate() -> f64 {
    1.0
}

fn default_fade_in() -> f64 {
    0.005
}

fn default_fade_out() -> f64 {
    0.05
}

impl Default for ChannelSound {
    fn default() -> Self {
        ChannelSound {
            region_start: 0.0,
            region_end: default_region_end(),
            playback_rate: default_playback_rate(),
            fade_in: default_fade_in(),
            fade_out: default_fade_out(),
            allow_overlap: false,
        }
    }
}

/// One channel's note list within a pattern.
#[derive(Clone, Debug)]
pub struct Track {
    /// The channel this track triggers.
    pub channel: String,
    /// The sound settings for this channel.
    pub sound: ChannelSound,
    /// The raw, unlooped notes.
    pub notes: Vec<NoteEvent>,
}

/// A pattern: a set of tracks sharing one loop window.
#[derive(Clone, Debug, Default)]
pub struct Pattern {
    pub tracks: Vec<Track>,
}

impl Pattern {
    /// Returns true if no track has any notes.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.notes.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_note_event_validation() {
        let note = NoteEvent::new("C4", 0.5, 0.25, 0.9).unwrap();
        assert_eq!(note.end(), 0.75);

        assert!(NoteEvent::new("C4", f64::NAN, 0.25, 0.9).is_err());
        assert!(NoteEvent::new("C4", 0.5, f64::INFINITY, 0.9).is_err());
        assert!(NoteEvent::new("C4", -1.0, 0.25, 0.9).is_err());
        assert!(NoteEvent::new("C4", 0.5, 0.25, f64::NAN).is_err());

        // Out-of-range velocities clamp rather than fail.
        assert_eq!(NoteEvent::new("C4", 0.0, 0.1, 2.0).unwrap().velocity, 1.0);
        assert_eq!(NoteEvent::new("C4", 0.0, 0.1, -1.0).unwrap().velocity, 0.0);
    }

    #[test]
    fn test_loop_window_clamps_bounds() {
        // Reversed bounds yield a valid, minimally wide window.
        let window = LoopWindow::new(4.0, 2.0, 30.0);
        assert!(window.end() > window.start());
        assert_eq!(window.start(), 4.0);

        // Negative start clamps to zero.
        let window = LoopWindow::new(-3.0, 2.0, 30.0);
        assert_eq!(window.start(), 0.0);
        assert_eq!(window.end(), 2.0);

        // Overlong windows are capped.
        let window = LoopWindow::new(0.0, 100.0, 30.0);
        assert_eq!(window.duration(), 30.0);

        // Non-finite inputs never produce an invalid window.
        let window = LoopWindow::new(f64::NAN, f64::INFINITY, 30.0);
        assert!(window.end() > window.start());
        assert!(window.duration() <= window.max_loop_duration());
    }

    #[test]
    fn test_quantize_grid_fractions() {
        assert_eq!(QuantizeGrid::Quarter.fraction(), 1.0);
        assert_eq!(QuantizeGrid::Sixteenth.fraction(), 0.25);
        assert_eq!(QuantizeGrid::ThirtySecond.fraction(), 0.125);
    }

    #[test]
    fn test_quantize_grid_deserializes_from_name() {
        let grid: QuantizeGrid = serde_yml::from_str("sixteenth").unwrap();
        assert_eq!(grid, QuantizeGrid::Sixteenth);
        let grid: QuantizeGrid = serde_yml::from_str("thirtysecond").unwrap();
        assert_eq!(grid, QuantizeGrid::ThirtySecond);
    }
}
