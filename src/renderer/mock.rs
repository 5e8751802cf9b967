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
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{EventId, PlayRequest, Renderer, VoiceId};

/// A posted play event with its cancellation id.
#[derive(Clone, Debug)]
pub struct RecordedPlay {
    pub event: EventId,
    pub request: PlayRequest,
}

/// A recorded master gain ramp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordedRamp {
    pub time: f64,
    pub target: f64,
    pub duration: f64,
}

#[derive(Default)]
struct State {
    plays: Vec<RecordedPlay>,
    stops: Vec<(VoiceId, f64)>,
    cancelled: HashSet<EventId>,
    ramps: Vec<RecordedRamp>,
    level: f64,
}

/// A mock renderer. Doesn't actually make any sound; records every call for
/// inspection by tests and the demo binary.
#[derive(Clone)]
pub struct MockRenderer {
    state: Arc<Mutex<State>>,
    ready: bool,
}

impl MockRenderer {
    /// Creates a ready mock renderer.
    pub fn new() -> MockRenderer {
        MockRenderer {
            state: Arc::new(Mutex::new(State::default())),
            ready: true,
        }
    }

    /// Creates a mock renderer that reports not-ready.
    pub fn not_ready() -> MockRenderer {
        MockRenderer {
            state: Arc::new(Mutex::new(State::default())),
            ready: false,
        }
    }

    /// Sets the level reported by `output_level`.
    pub fn set_output_level(&self, level: f64) {
        self.state.lock().level = level;
    }

    /// All posted play requests, including cancelled ones.
    pub fn plays(&self) -> Vec<RecordedPlay> {
        self.state.lock().plays.clone()
    }

    /// Posted play requests that have not been cancelled.
    pub fn pending_plays(&self) -> Vec<RecordedPlay> {
        let state = self.state.lock();
        state
            .plays
            .iter()
            .filter(|p| !state.cancelled.contains(&p.event))
            .cloned()
            .collect()
    }

    /// All recorded stop calls.
    pub fn stops(&self) -> Vec<(VoiceId, f64)> {
        self.state.lock().stops.clone()
    }

    /// All recorded master gain ramps.
    pub fn ramps(&self) -> Vec<RecordedRamp> {
        self.state.lock().ramps.clone()
    }

    /// The number of cancelled events.
    pub fn cancelled_count(&self) -> usize {
        self.state.lock().cancelled.len()
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MockRenderer {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn play(&self, request: PlayRequest) -> EventId {
        let event = EventId::next();
        debug!(
            voice = request.voice,
            patch = request.patch,
            start_time = request.start_time,
            duration = request.duration,
            "Play posted (mock)"
        );
        self.state.lock().plays.push(RecordedPlay { event, request });
        event
    }

    fn stop(&self, voice: VoiceId, time: f64) {
        self.state.lock().stops.push((voice, time));
    }

    fn cancel(&self, event: EventId) {
        self.state.lock().cancelled.insert(event);
    }

    fn ramp_master_gain(&self, time: f64, target: f64, duration: f64) {
        self.state.lock().ramps.push(RecordedRamp {
            time,
            target,
            duration,
        });
    }

    fn output_level(&self) -> f64 {
        self.state.lock().level
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(voice: VoiceId) -> PlayRequest {
        PlayRequest {
            voice,
            patch: "kick".to_string(),
            note: None,
            start_time: 0.0,
            offset: 0.0,
            duration: 0.5,
            velocity: 0.8,
            playback_rate: 1.0,
            attack: 0.005,
            release: 0.05,
        }
    }

    #[test]
    fn test_mock_records_and_cancels() {
        let renderer = MockRenderer::new();
        let first = renderer.play(request(1));
        let second = renderer.play(request(2));
        assert_ne!(first, second);
        assert_eq!(renderer.plays().len(), 2);

        renderer.cancel(first);
        let pending = renderer.pending_plays();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event, second);
    }

    #[test]
    fn test_mock_output_level() {
        let renderer = MockRenderer::new();
        assert_eq!(renderer.output_level(), 0.0);
        renderer.set_output_level(0.97);
        assert_eq!(renderer.output_level(), 0.97);
    }
}
