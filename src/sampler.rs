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

//! Per-channel trigger logic.
//!
//! Maps one trigger request to exactly one renderer play call, wrapping the
//! voice in a safety envelope and clamping every parameter into its safe
//! range. Invalid input is logged and skipped; nothing in this module
//! propagates an error past the scheduler boundary.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::AudioEngineContext;
use crate::events::{EngineEvent, PlaybackRange};
use crate::renderer::{EventId, PlayRequest};
use crate::sequence::{ChannelSound, NoteEvent};
use crate::voices::governor::Admission;
use crate::voices::pool::ChannelVoicePool;

/// The minimum normalized span of a sample region.
const MIN_REGION_SPAN: f64 = 0.01;

/// Playback rate bounds.
const MIN_PLAYBACK_RATE: f64 = 0.25;
const MAX_PLAYBACK_RATE: f64 = 4.0;

/// The longest allowed envelope fade, in seconds.
const MAX_FADE_SECONDS: f64 = 2.0;

/// Slack added to a voice's busy window beyond its audible duration and
/// release tail, in seconds.
const RELEASE_SLACK: f64 = 0.05;

/// One playable channel: its sound settings plus its voice pool.
pub struct SamplerChannel {
    channel: String,
    sound: ChannelSound,
    pool: Arc<Mutex<ChannelVoicePool>>,
}

impl SamplerChannel {
    pub fn new(channel: &str, sound: ChannelSound, max_overlap_voices: usize) -> SamplerChannel {
        let pool = ChannelVoicePool::new(channel, sound.allow_overlap, max_overlap_voices);
        SamplerChannel {
            channel: channel.to_string(),
            sound,
            pool: Arc::new(Mutex::new(pool)),
        }
    }

    /// The channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The channel's sound settings.
    pub fn sound(&self) -> &ChannelSound {
        &self.sound
    }

    /// Triggers this channel at the given absolute time.
    ///
    /// Resolves the patch, clamps the region/rate/fade parameters, allocates a
    /// voice (stealing if necessary), and posts the play request. Returns the
    /// renderer event id, or `None` if the trigger was skipped or rejected.
    pub fn trigger(
        &self,
        context: &AudioEngineContext,
        time: f64,
        note: Option<&NoteEvent>,
    ) -> Option<EventId> {
        if !time.is_finite() {
            warn!(channel = self.channel, time, "Skipping trigger with invalid time");
            return None;
        }

        let patch = match context.patches.resolve(&self.channel) {
            Some(patch) => patch,
            None => {
                warn!(channel = self.channel, "No patch loaded, skipping trigger");
                return None;
            }
        };
        if !patch.duration.is_finite() || patch.duration <= 0.0 {
            warn!(
                channel = self.channel,
                patch = patch.id,
                duration = patch.duration,
                "Patch has no playable duration, skipping trigger"
            );
            return None;
        }

        let region_start = clamp_region_start(self.sound.region_start);
        let region_end = clamp_region_end(region_start, self.sound.region_end);
        let offset = region_start * patch.duration;
        let selection_duration = (region_end - region_start).max(MIN_REGION_SPAN) * patch.duration;
        if !offset.is_finite() || !selection_duration.is_finite() {
            warn!(
                channel = self.channel,
                offset,
                selection_duration,
                "Skipping trigger with invalid timing values"
            );
            return None;
        }

        let playback_rate = clamp_playback_rate(self.sound.playback_rate);
        let actual_duration = selection_duration / playback_rate;
        let attack = clamp_fade(self.sound.fade_in).min(actual_duration);
        let release = clamp_fade(self.sound.fade_out).min(actual_duration);

        if context.governor.is_overloading() {
            debug!(channel = self.channel, "Governor overloading, trigger rejected");
            return None;
        }

        // Allocation and admission happen under the pool lock so no two
        // triggers race to steal the same voice.
        let (voice, evicted, event) = {
            let mut pool = self.pool.lock();
            let allocation = pool.allocate(time);
            let evicted = match context.governor.admit(allocation.voice) {
                Admission::Admitted { evicted } => evicted,
                Admission::Rejected => {
                    debug!(channel = self.channel, "Governor rejected voice admission");
                    return None;
                }
            };

            if allocation.stop_existing {
                context.renderer.stop(allocation.voice, time);
            }

            let event = context.renderer.play(PlayRequest {
                voice: allocation.voice,
                patch: patch.id,
                note: note.map(|n| n.note.clone()),
                start_time: time,
                offset,
                duration: actual_duration,
                velocity: note.map(|n| n.velocity).unwrap_or(0.8),
                playback_rate,
                attack,
                release,
            });
            pool.mark_started(allocation.voice, time + actual_duration + release + RELEASE_SLACK);
            (allocation.voice, evicted, event)
        };
        context.voices.register(voice, &self.pool);

        // The evicted voice may live in another channel's pool; the directory
        // routes the release to its owner, outside our own pool lock.
        if let Some(evicted) = evicted {
            if evicted != voice {
                context.renderer.stop(evicted, time);
                context.voices.release(evicted);
            }
        }

        context.events.publish(EngineEvent::SamplerPlayback {
            channel: self.channel.clone(),
            start_time: time,
            duration: actual_duration,
            range: PlaybackRange {
                start: region_start,
                end: region_end,
            },
            allow_overlap: self.sound.allow_overlap,
        });

        Some(event)
    }

    /// Releases voices whose busy window has passed, both in the pool and in
    /// the governor's accounting. Called periodically by the transport.
    pub fn reclaim(&self, context: &AudioEngineContext, now: f64) {
        let mut pool = self.pool.lock();
        for id in pool.reclaimable(now) {
            pool.release(id);
            context.governor.remove_voice(id);
        }
    }

    /// Stops and discards every voice. Called at engine teardown.
    pub fn dispose(&self, context: &AudioEngineContext, time: f64) {
        let mut pool = self.pool.lock();
        for id in pool.dispose() {
            context.renderer.stop(id, time);
            context.governor.remove_voice(id);
            context.voices.unregister(id);
        }
    }

    /// The number of voices currently playing on this channel.
    pub fn active_voices(&self) -> usize {
        self.pool.lock().active_count()
    }

    /// The number of voices the channel has ever created.
    pub fn voice_count(&self) -> usize {
        self.pool.lock().len()
    }
}

fn clamp_region_start(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 0.99)
}

fn clamp_region_end(start: f64, end: f64) -> f64 {
    if !end.is_finite() {
        return (start + MIN_REGION_SPAN).min(1.0);
    }
    let end = end.min(1.0).max(start + MIN_REGION_SPAN);
    if end <= start {
        (start + MIN_REGION_SPAN).min(1.0)
    } else {
        end
    }
}

fn clamp_playback_rate(value: f64) -> f64 {
    if !value.is_finite() {
        return 1.0;
    }
    value.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
}

fn clamp_fade(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, MAX_FADE_SECONDS)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::clock::test::ManualClock;
    use crate::patches::{Patch, StaticPatchStore};
    use crate::renderer::mock::MockRenderer;
    use crate::voices::governor::{GlobalVoiceGovernor, DEFAULT_LEVEL_CEILING};
    use crate::voices::pool::DEFAULT_MAX_OVERLAP_VOICES;

    fn context_with(renderer: MockRenderer, governor: GlobalVoiceGovernor) -> AudioEngineContext {
        let patches = StaticPatchStore::new();
        patches.insert(
            "kick",
            Patch {
                id: "kick.wav".to_string(),
                duration: 2.0,
            },
        );
        AudioEngineContext::new(
            Arc::new(ManualClock::new(0.0)),
            Arc::new(renderer),
            Arc::new(patches),
            Arc::new(governor),
        )
    }

    fn channel(sound: ChannelSound) -> SamplerChannel {
        SamplerChannel::new("kick", sound, DEFAULT_MAX_OVERLAP_VOICES)
    }

    #[test]
    fn test_trigger_posts_play_request() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            region_start: 0.25,
            region_end: 0.75,
            ..ChannelSound::default()
        });

        let event = channel.trigger(&context, 1.0, None);
        assert!(event.is_some());

        let plays = renderer.plays();
        assert_eq!(plays.len(), 1);
        let request = &plays[0].request;
        assert_eq!(request.patch, "kick.wav");
        assert_eq!(request.start_time, 1.0);
        // A 2s buffer: region [0.25, 0.75] is a 0.5s offset and a 1s selection.
        assert_eq!(request.offset, 0.5);
        assert_eq!(request.duration, 1.0);
        assert_eq!(channel.active_voices(), 1);
    }

    #[test]
    fn test_missing_patch_skips_trigger() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = SamplerChannel::new(
            "snare",
            ChannelSound::default(),
            DEFAULT_MAX_OVERLAP_VOICES,
        );

        assert!(channel.trigger(&context, 0.0, None).is_none());
        assert!(renderer.plays().is_empty());
    }

    #[test]
    fn test_invalid_region_is_clamped_not_fatal() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            region_start: f64::NAN,
            region_end: f64::INFINITY,
            ..ChannelSound::default()
        });

        assert!(channel.trigger(&context, 0.0, None).is_some());
        let request = &renderer.plays()[0].request;
        assert_eq!(request.offset, 0.0);
        // NaN start clamps to 0, infinite end to the minimum span.
        assert_eq!(request.duration, MIN_REGION_SPAN * 2.0);
    }

    #[test]
    fn test_invalid_time_skips_trigger() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound::default());

        assert!(channel.trigger(&context, f64::NAN, None).is_none());
        assert!(renderer.plays().is_empty());
    }

    #[test]
    fn test_playback_rate_scales_duration() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            playback_rate: 2.0,
            ..ChannelSound::default()
        });

        channel.trigger(&context, 0.0, None);
        let request = &renderer.plays()[0].request;
        // The full 2s buffer at double speed plays for 1s.
        assert_eq!(request.duration, 1.0);

        // Rates clamp to [0.25, 4].
        let fast = SamplerChannel::new(
            "kick",
            ChannelSound {
                playback_rate: 100.0,
                ..ChannelSound::default()
            },
            DEFAULT_MAX_OVERLAP_VOICES,
        );
        fast.trigger(&context, 0.0, None);
        assert_eq!(renderer.plays()[1].request.playback_rate, 4.0);
    }

    #[test]
    fn test_envelope_never_exceeds_duration() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            region_start: 0.0,
            region_end: 0.05,
            fade_in: 1.5,
            fade_out: 3.0,
            ..ChannelSound::default()
        });

        channel.trigger(&context, 0.0, None);
        let request = &renderer.plays()[0].request;
        // The selection is 0.1s; both fades collapse to it. The requested
        // 3s fade-out is additionally capped at the 2s maximum first.
        assert_eq!(request.attack, request.duration);
        assert_eq!(request.release, request.duration);
    }

    #[test]
    fn test_monophonic_retrigger_stops_then_restarts() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound::default());

        channel.trigger(&context, 0.0, None);
        channel.trigger(&context, 0.05, None);

        // Exactly one voice exists, stopped at the second trigger time before
        // being restarted.
        assert_eq!(channel.voice_count(), 1);
        let stops = renderer.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].1, 0.05);
        assert_eq!(renderer.plays().len(), 2);
    }

    #[test]
    fn test_overlap_steals_when_full() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = SamplerChannel::new(
            "kick",
            ChannelSound {
                allow_overlap: true,
                ..ChannelSound::default()
            },
            2,
        );

        channel.trigger(&context, 0.0, None);
        channel.trigger(&context, 0.1, None);
        // Both voices are busy well past 0.2; the third trigger steals.
        channel.trigger(&context, 0.2, None);

        assert_eq!(channel.voice_count(), 2);
        let stops = renderer.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].1, 0.2);
    }

    #[test]
    fn test_cross_channel_eviction_releases_owning_pool() {
        let renderer = MockRenderer::new();
        let patches = StaticPatchStore::new();
        for name in ["kick", "snare"] {
            patches.insert(
                name,
                Patch {
                    id: format!("{}.wav", name),
                    duration: 2.0,
                },
            );
        }
        let context = AudioEngineContext::new(
            Arc::new(ManualClock::new(0.0)),
            Arc::new(renderer.clone()),
            Arc::new(patches),
            Arc::new(GlobalVoiceGovernor::new(1, DEFAULT_LEVEL_CEILING, 2.0)),
        );
        let kick = channel(ChannelSound::default());
        let snare =
            SamplerChannel::new("snare", ChannelSound::default(), DEFAULT_MAX_OVERLAP_VOICES);

        kick.trigger(&context, 0.0, None);
        assert_eq!(kick.active_voices(), 1);
        let kick_voice = renderer.plays()[0].request.voice;

        // A polyphony ceiling of one evicts the kick voice; the kick pool is
        // released right away, not on its next reclaim pass.
        snare.trigger(&context, 0.1, None);
        assert_eq!(kick.active_voices(), 0);
        assert_eq!(snare.active_voices(), 1);
        assert_eq!(renderer.stops(), vec![(kick_voice, 0.1)]);
    }

    #[test]
    fn test_overload_rejects_trigger() {
        let renderer = MockRenderer::new();
        let governor = GlobalVoiceGovernor::new(16, 0.95, 2.0);
        // Push the governor into overload.
        for _ in 0..4 {
            governor.record_level(0.99, 0.0, &renderer);
        }
        let context = context_with(renderer.clone(), governor);
        let channel = channel(ChannelSound::default());

        assert!(channel.trigger(&context, 0.0, None).is_none());
        assert_eq!(renderer.plays().len(), 0);
    }

    #[test]
    fn test_reclaim_releases_finished_voices() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            allow_overlap: true,
            ..ChannelSound::default()
        });

        channel.trigger(&context, 0.0, None);
        assert_eq!(channel.active_voices(), 1);
        assert_eq!(context.governor.active_count(), 1);

        // Well past the 2s sample and its release slack.
        channel.reclaim(&context, 5.0);
        assert_eq!(channel.active_voices(), 0);
        assert_eq!(context.governor.active_count(), 0);
    }

    #[test]
    fn test_dispose_stops_sounding_voices() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer.clone(), GlobalVoiceGovernor::default());
        let channel = channel(ChannelSound {
            allow_overlap: true,
            ..ChannelSound::default()
        });

        channel.trigger(&context, 0.0, None);
        channel.dispose(&context, 0.5);

        assert_eq!(renderer.stops().len(), 1);
        assert_eq!(channel.voice_count(), 0);
        assert_eq!(context.governor.active_count(), 0);
    }

    #[test]
    fn test_playback_event_published() {
        let renderer = MockRenderer::new();
        let context = context_with(renderer, GlobalVoiceGovernor::default());
        let events = context.events.subscribe();
        let channel = channel(ChannelSound {
            region_start: 0.1,
            region_end: 0.9,
            ..ChannelSound::default()
        });

        channel.trigger(&context, 2.0, None);
        match events.try_recv().unwrap() {
            EngineEvent::SamplerPlayback {
                channel,
                start_time,
                range,
                allow_overlap,
                ..
            } => {
                assert_eq!(channel, "kick");
                assert_eq!(start_time, 2.0);
                assert_eq!(range.start, 0.1);
                assert_eq!(range.end, 0.9);
                assert!(!allow_overlap);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
