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

//! Live instrument capture.
//!
//! Bridges real-time key and MIDI input into captured [`NoteEvent`]s that the
//! loop engine can play back. A session is either armed (the first note
//! defines t=0) or live (note positions are normalized into the running
//! loop, compensating for scheduling latency).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::sequence::NoteEvent;
use crate::util::wrap_loop_position;

/// How far ahead of the audible output the scheduler runs, in seconds.
pub const TRANSPORT_LOOKAHEAD: f64 = 0.12;

/// Scheduling slack between posting a note and it becoming audible, in seconds.
pub const TRANSPORT_READY_BUFFER: f64 = 0.02;

/// The duration given to a note that has not been released yet.
const MIN_CAPTURED_DURATION: f64 = 0.001;

/// The velocity used when input reports none, or a non-finite one.
const FALLBACK_VELOCITY: f64 = 0.45;

/// How note positions are derived from the clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CaptureMode {
    /// Playback is stopped; the first captured note defines t=0.
    Armed,
    /// Playback is running; notes are wrapped into the loop relative to the
    /// given absolute playback start time.
    Live { playback_start: f64 },
}

/// One recording session for one instrument channel.
pub struct InstrumentLiveSession {
    clock: Arc<dyn Clock>,
    mode: CaptureMode,
    loop_duration: f64,
    /// Renderer output latency added on top of the transport lookahead when
    /// normalizing live positions.
    base_latency: f64,
    first_note_time: Option<f64>,
    captured: Vec<NoteEvent>,
    active: HashMap<String, ActiveNote>,
}

struct ActiveNote {
    index: usize,
    started_at: f64,
}

impl InstrumentLiveSession {
    /// Starts an armed session: time zero is the first captured note.
    pub fn armed(clock: Arc<dyn Clock>, loop_duration: f64) -> InstrumentLiveSession {
        InstrumentLiveSession::new(clock, CaptureMode::Armed, loop_duration, 0.0)
    }

    /// Starts a live session against a loop that began playing at
    /// `playback_start` clock seconds.
    pub fn live(
        clock: Arc<dyn Clock>,
        loop_duration: f64,
        playback_start: f64,
        base_latency: f64,
    ) -> InstrumentLiveSession {
        InstrumentLiveSession::new(
            clock,
            CaptureMode::Live { playback_start },
            loop_duration,
            base_latency,
        )
    }

    fn new(
        clock: Arc<dyn Clock>,
        mode: CaptureMode,
        loop_duration: f64,
        base_latency: f64,
    ) -> InstrumentLiveSession {
        InstrumentLiveSession {
            clock,
            mode,
            loop_duration: if loop_duration.is_finite() && loop_duration > 0.0 {
                loop_duration
            } else {
                0.0
            },
            base_latency: base_latency.max(0.0),
            first_note_time: None,
            captured: Vec::new(),
            active: HashMap::new(),
        }
    }

    /// The session's capture mode.
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// The notes captured so far.
    pub fn captured(&self) -> &[NoteEvent] {
        &self.captured
    }

    /// Captures a note-on. The note stays open (with a minimal duration)
    /// until the matching [`InstrumentLiveSession::note_off`] or
    /// [`InstrumentLiveSession::finish`].
    pub fn note_on(&mut self, note: &str, velocity: Option<f64>) {
        let now = self.clock.now();
        let start = match self.mode {
            CaptureMode::Armed => {
                let first = *self.first_note_time.get_or_insert(now);
                (now - first).max(0.0)
            }
            CaptureMode::Live { playback_start } => {
                // The player reacts to what they hear, which lags the
                // scheduling clock by the lookahead plus output latency.
                let perceived_now =
                    now - (TRANSPORT_LOOKAHEAD + TRANSPORT_READY_BUFFER + self.base_latency);
                wrap_loop_position(perceived_now - playback_start, self.loop_duration)
            }
        };

        let velocity = match velocity {
            Some(v) if v.is_finite() => v.clamp(0.15, 0.85),
            _ => FALLBACK_VELOCITY,
        };

        debug!(note, start, velocity, mode = ?self.mode, "Captured live note");
        self.captured.push(NoteEvent {
            note: note.to_string(),
            start,
            duration: MIN_CAPTURED_DURATION,
            velocity,
        });
        // A retriggered note leaves the previous capture at its minimal
        // duration; only the newest onset is held open.
        self.active.insert(
            note.to_string(),
            ActiveNote {
                index: self.captured.len() - 1,
                started_at: now,
            },
        );
    }

    /// Closes an open note, setting its duration from the hold time.
    pub fn note_off(&mut self, note: &str) {
        let Some(active) = self.active.remove(note) else {
            return;
        };
        let now = self.clock.now();
        if let Some(event) = self.captured.get_mut(active.index) {
            event.duration = (now - active.started_at).max(MIN_CAPTURED_DURATION);
        }
    }

    /// Ends the session: any still-open notes are closed at the current time,
    /// and all captured notes are handed over.
    pub fn finish(&mut self) -> Vec<NoteEvent> {
        let now = self.clock.now();
        for active in self.active.values() {
            if let Some(event) = self.captured.get_mut(active.index) {
                event.duration = (now - active.started_at).max(MIN_CAPTURED_DURATION);
            }
        }
        self.active.clear();
        self.first_note_time = None;
        std::mem::take(&mut self.captured)
    }
}
