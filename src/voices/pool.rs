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

//! Per-channel voice pools.
//!
//! A pool grows lazily up to a fixed cap and reuses voices whose busy window
//! has elapsed. When every voice is busy, the voice that frees up soonest is
//! stolen deterministically.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::renderer::VoiceId;

/// The maximum number of concurrent voices on an overlapping channel.
pub const DEFAULT_MAX_OVERLAP_VOICES: usize = 8;

/// Slack when deciding whether a voice's busy window has elapsed, in seconds.
/// Covers clock jitter between the scheduler and the renderer.
const REUSE_TOLERANCE: f64 = 0.004;

static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// One reusable playback voice.
#[derive(Clone, Debug)]
pub struct VoiceHandle {
    /// The renderer-facing voice id.
    pub id: VoiceId,
    /// True between allocation and release.
    pub is_playing: bool,
    /// Absolute time until which this voice is considered occupied.
    pub busy_until: f64,
    /// The output sink this voice routes to.
    pub output_target: String,
}

impl VoiceHandle {
    fn new(output_target: &str) -> VoiceHandle {
        VoiceHandle {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst),
            is_playing: false,
            busy_until: 0.0,
            output_target: output_target.to_string(),
        }
    }

    fn is_free(&self, now: f64) -> bool {
        !self.is_playing || self.busy_until <= now + REUSE_TOLERANCE
    }
}

/// The result of a voice allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    /// The allocated voice.
    pub voice: VoiceId,
    /// True if the voice is still sounding and must be stopped at the trigger
    /// time before it is reused.
    pub stop_existing: bool,
}

/// A bounded pool of voices for one channel.
pub struct ChannelVoicePool {
    channel: String,
    allow_overlap: bool,
    max_overlap_voices: usize,
    voices: Vec<VoiceHandle>,
}

impl ChannelVoicePool {
    /// Creates an empty pool. Voices are created lazily on allocation.
    pub fn new(channel: &str, allow_overlap: bool, max_overlap_voices: usize) -> ChannelVoicePool {
        ChannelVoicePool {
            channel: channel.to_string(),
            allow_overlap,
            max_overlap_voices: max_overlap_voices.max(1),
            voices: Vec::new(),
        }
    }

    /// Allocates a voice for a trigger at time `now`.
    ///
    /// Monophonic channels always hand back their single voice, stopping any
    /// sound still on it. Overlapping channels reuse the first free voice,
    /// grow until the cap, and past the cap steal the voice with the smallest
    /// `busy_until` (ties broken by lowest index). Allocation never fails.
    pub fn allocate(&mut self, now: f64) -> Allocation {
        if !self.allow_overlap {
            if self.voices.is_empty() {
                self.voices.push(VoiceHandle::new(&self.channel));
            }
            let voice = &self.voices[0];
            return Allocation {
                voice: voice.id,
                stop_existing: voice.is_playing,
            };
        }

        if let Some(voice) = self.voices.iter().find(|v| v.is_free(now)) {
            return Allocation {
                voice: voice.id,
                stop_existing: false,
            };
        }

        if self.voices.len() < self.max_overlap_voices {
            let voice = VoiceHandle::new(&self.channel);
            let id = voice.id;
            self.voices.push(voice);
            return Allocation {
                voice: id,
                stop_existing: false,
            };
        }

        // Every voice is busy and the pool is full; steal the one that frees
        // up soonest. Strict less-than keeps the lowest index on ties.
        let mut stolen = 0;
        for (i, voice) in self.voices.iter().enumerate() {
            if voice.busy_until < self.voices[stolen].busy_until {
                stolen = i;
            }
        }
        let voice = &self.voices[stolen];
        debug!(
            channel = self.channel,
            voice = voice.id,
            busy_until = voice.busy_until,
            "Stealing voice"
        );
        Allocation {
            voice: voice.id,
            stop_existing: true,
        }
    }

    /// Marks a voice as occupied until `busy_until`.
    pub fn mark_started(&mut self, id: VoiceId, busy_until: f64) {
        if let Some(voice) = self.voices.iter_mut().find(|v| v.id == id) {
            voice.is_playing = true;
            voice.busy_until = busy_until;
        }
    }

    /// Releases a voice back to the pool.
    pub fn release(&mut self, id: VoiceId) {
        if let Some(voice) = self.voices.iter_mut().find(|v| v.id == id) {
            voice.is_playing = false;
            voice.busy_until = 0.0;
        }
    }

    /// The ids of playing voices whose busy window has fully elapsed.
    pub fn reclaimable(&self, now: f64) -> Vec<VoiceId> {
        self.voices
            .iter()
            .filter(|v| v.is_playing && v.busy_until <= now)
            .map(|v| v.id)
            .collect()
    }

    /// Releases every voice and discards the pool contents. The ids of any
    /// disposed voices are returned so callers can stop them at the renderer.
    pub fn dispose(&mut self) -> Vec<VoiceId> {
        let ids = self
            .voices
            .iter()
            .filter(|v| v.is_playing)
            .map(|v| v.id)
            .collect();
        self.voices.clear();
        ids
    }

    /// The channel this pool serves.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The number of voices currently marked as playing.
    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_playing).count()
    }

    /// The number of voices the pool has created so far.
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Returns true if the pool has created no voices yet.
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_monophonic_stop_then_restart() {
        let mut pool = ChannelVoicePool::new("bass", false, DEFAULT_MAX_OVERLAP_VOICES);

        let first = pool.allocate(0.0);
        assert!(!first.stop_existing);
        pool.mark_started(first.voice, 1.0);

        // Retriggering while the voice sounds reuses it and demands a stop.
        let second = pool.allocate(0.5);
        assert_eq!(second.voice, first.voice);
        assert!(second.stop_existing);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_overlap_grows_to_cap() {
        let mut pool = ChannelVoicePool::new("pad", true, 3);

        for i in 0..3 {
            let alloc = pool.allocate(0.0);
            assert!(!alloc.stop_existing);
            pool.mark_started(alloc.voice, 10.0 + i as f64);
        }
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.active_count(), 3);
    }

    #[test]
    fn test_overlap_reuses_free_voice() {
        let mut pool = ChannelVoicePool::new("pad", true, 3);

        let first = pool.allocate(0.0);
        pool.mark_started(first.voice, 1.0);

        // The busy window has elapsed, so the same voice is reused without
        // growing the pool or stopping anything.
        let second = pool.allocate(2.0);
        assert_eq!(second.voice, first.voice);
        assert!(!second.stop_existing);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_reuse_tolerance() {
        let mut pool = ChannelVoicePool::new("pad", true, 3);

        let first = pool.allocate(0.0);
        pool.mark_started(first.voice, 1.0);

        // Within tolerance of the busy window's end counts as free.
        let second = pool.allocate(0.997);
        assert_eq!(second.voice, first.voice);
        assert!(!second.stop_existing);
    }

    #[test]
    fn test_steals_smallest_busy_until() {
        let mut pool = ChannelVoicePool::new("pad", true, 2);

        let a = pool.allocate(0.0);
        pool.mark_started(a.voice, 5.0);
        let b = pool.allocate(0.0);
        pool.mark_started(b.voice, 3.0);

        let stolen = pool.allocate(0.0);
        assert_eq!(stolen.voice, b.voice);
        assert!(stolen.stop_existing);
    }

    #[test]
    fn test_steal_tie_breaks_to_lowest_index() {
        let mut pool = ChannelVoicePool::new("pad", true, 2);

        let a = pool.allocate(0.0);
        pool.mark_started(a.voice, 4.0);
        let b = pool.allocate(0.0);
        pool.mark_started(b.voice, 4.0);

        // Identical pool state must always steal the same voice.
        for _ in 0..3 {
            let stolen = pool.allocate(0.0);
            assert_eq!(stolen.voice, a.voice);
        }
    }

    #[test]
    fn test_release_frees_voice() {
        let mut pool = ChannelVoicePool::new("pad", true, 2);

        let a = pool.allocate(0.0);
        pool.mark_started(a.voice, 100.0);
        pool.release(a.voice);

        let b = pool.allocate(0.0);
        assert_eq!(b.voice, a.voice);
        assert!(!b.stop_existing);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_dispose_reports_sounding_voices() {
        let mut pool = ChannelVoicePool::new("pad", true, 4);

        let a = pool.allocate(0.0);
        pool.mark_started(a.voice, 100.0);
        let b = pool.allocate(0.0);
        pool.mark_started(b.voice, 100.0);
        pool.release(b.voice);

        let sounding = pool.dispose();
        assert_eq!(sounding, vec![a.voice]);
        assert!(pool.is_empty());
    }
}
