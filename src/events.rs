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

//! Engine status events for UI and telemetry consumers.
//!
//! Events are fire-and-forget notifications, not RPCs. Publishing never blocks
//! and never fails; subscribers that go away are dropped on the next publish.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// The normalized region of the source buffer that was played.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackRange {
    pub start: f64,
    pub end: f64,
}

/// An event emitted by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The transport switched to a different pattern during play-all.
    SequencePlaybackChanged {
        /// The index of the pattern now playing.
        pattern_index: usize,
        /// The absolute time at which the switch takes acoustic effect, if known.
        scheduled_time: Option<f64>,
    },
    /// The transport stopped, either by request or after the final loop.
    TransportStop,
    /// A sampler channel was triggered.
    SamplerPlayback {
        /// The channel that was triggered.
        channel: String,
        /// The absolute start time of the playback.
        start_time: f64,
        /// The effective playback duration in seconds.
        duration: f64,
        /// The normalized region of the source buffer.
        range: PlaybackRange,
        /// Whether the channel allows overlapping voices.
        allow_overlap: bool,
    },
}

/// A fan-out bus for [`EngineEvent`]s.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    /// Creates a new event bus with no subscribers.
    pub fn new() -> EventBus {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes to engine events. Each subscriber receives every event
    /// published after the subscription.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event to all current subscribers. Disconnected subscribers
    /// are removed.
    pub fn publish(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_publish_and_subscribe() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.publish(EngineEvent::TransportStop);

        assert_eq!(rx1.recv().unwrap(), EngineEvent::TransportStop);
        assert_eq!(rx2.recv().unwrap(), EngineEvent::TransportStop);
    }

    #[test]
    fn test_publish_with_no_subscribers() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::TransportStop);
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.publish(EngineEvent::TransportStop);
        assert!(bus.subscribers.lock().is_empty());
    }
}
