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

//! The sample-accurate renderer seam.
//!
//! The engine computes when and what to play; the renderer is an opaque sink
//! that turns play requests into sound at absolute clock times. This crate
//! never decodes a sample or synthesizes a waveform.

pub mod mock;

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one reusable playback voice.
pub type VoiceId = u64;

/// Identifies one event posted to the renderer, for later cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId(u64);

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

impl EventId {
    /// Allocates the next event id.
    pub fn next() -> EventId {
        EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::SeqCst))
    }
}

/// A fully resolved playback request.
///
/// The safety envelope (attack/release) is clamped by the sampler before the
/// request is built, so the renderer never has to adjust an envelope after the
/// fact.
#[derive(Clone, Debug)]
pub struct PlayRequest {
    /// The voice handle to play on.
    pub voice: VoiceId,
    /// The resolved patch to play.
    pub patch: String,
    /// The note reference, if the patch is pitched.
    pub note: Option<String>,
    /// Absolute start time in clock seconds.
    pub start_time: f64,
    /// Offset into the source buffer, in seconds.
    pub offset: f64,
    /// Playback duration in seconds.
    pub duration: f64,
    /// Velocity in `[0, 1]`.
    pub velocity: f64,
    /// Playback rate multiplier.
    pub playback_rate: f64,
    /// Envelope attack in seconds. Never exceeds `duration`.
    pub attack: f64,
    /// Envelope release in seconds. Never exceeds `duration`.
    pub release: f64,
}

/// An opaque handle that accepts playback work at absolute times.
pub trait Renderer: Send + Sync {
    /// Returns true if the renderer is able to accept work. While false, the
    /// engine treats all scheduling as not-ready no-ops.
    fn is_ready(&self) -> bool {
        true
    }

    /// Posts a playback request. Returns an id that can be used to cancel the
    /// event before its start time has passed.
    fn play(&self, request: PlayRequest) -> EventId;

    /// Stops the given voice at the given absolute time.
    fn stop(&self, voice: VoiceId, time: f64);

    /// Cancels a not-yet-rendered event. Events whose start time has passed
    /// are not recallable and finish their envelope naturally.
    fn cancel(&self, event: EventId);

    /// Ramps the master gain to `target` over `duration`, starting at `time`.
    /// A zero duration sets the value immediately.
    fn ramp_master_gain(&self, time: f64, target: f64, duration: f64);

    /// The most recent level sample from the final output stage, in `[0, ~1+]`.
    fn output_level(&self) -> f64;
}
