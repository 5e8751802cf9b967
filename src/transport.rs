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

//! The transport scheduler.
//!
//! Bridges clock time to loop iterations. A pump task keeps a bounded rolling
//! horizon of iterations scheduled ahead of the playback cursor, so scheduling
//! work never races the renderer's deadline; stopping cancels every
//! not-yet-rendered event deterministically. Events already past their start
//! time are unrecallable and finish their envelope naturally.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, span, warn, Level, Span};

use crate::context::AudioEngineContext;
use crate::events::EngineEvent;
use crate::looper::{LoopEngine, LoopState, LoopStatus};
use crate::playsync::CancelHandle;
use crate::renderer::EventId;
use crate::sampler::SamplerChannel;
use crate::sequence::{GainRamp, NoteEvent, Pattern};

/// The number of loop iterations scheduled ahead of the playback cursor.
pub const DEFAULT_AHEAD_COUNT: u32 = 2;

/// How far before an acoustic boundary a pattern advance fires, in seconds.
/// The next pattern's first events are materialized by the time the renderer
/// reaches the boundary.
const ADVANCE_EPSILON: f64 = 0.05;

/// The result of asking the transport to start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartStatus {
    /// Playback started at the given absolute time.
    Started { at: f64 },
    /// A loop is already running; the call was a no-op.
    AlreadyRunning,
    /// The clock or renderer is unavailable; callers may retry.
    NotReady,
    /// The pattern had no playable notes inside the loop window.
    NoNotes,
}

/// One track bound to its runtime voice pool and prepared note list.
struct ChannelProgram {
    sampler: SamplerChannel,
    prepared: Vec<NoteEvent>,
}

struct PlayHandles {
    pump: JoinHandle<()>,
    auto_stop: Option<JoinHandle<()>>,
    cancel: CancelHandle,
    programs: Arc<Vec<ChannelProgram>>,
}

/// Drives loop playback against the realtime clock.
#[derive(Clone)]
pub struct TransportScheduler {
    context: AudioEngineContext,
    engine: Arc<Mutex<LoopEngine>>,
    ahead_count: u32,
    max_overlap_voices: usize,
    /// Keeps track of the pump task handles. There is only one loop running
    /// at a time.
    handles: Arc<tokio::sync::Mutex<Option<PlayHandles>>>,
    /// Renderer event ids inside the current horizon, with their start times.
    scheduled: Arc<Mutex<Vec<(f64, EventId)>>>,
    /// The absolute time the running loop started at, if any.
    started_at: Arc<Mutex<Option<f64>>>,
    /// The logging span.
    span: Span,
}

impl TransportScheduler {
    /// Creates a stopped transport around the given engine.
    pub fn new(
        context: AudioEngineContext,
        engine: LoopEngine,
        ahead_count: u32,
        max_overlap_voices: usize,
    ) -> TransportScheduler {
        TransportScheduler {
            context,
            engine: Arc::new(Mutex::new(engine)),
            ahead_count: ahead_count.max(1),
            max_overlap_voices,
            handles: Arc::new(tokio::sync::Mutex::new(None)),
            scheduled: Arc::new(Mutex::new(Vec::new())),
            started_at: Arc::new(Mutex::new(None)),
            span: span!(Level::INFO, "transport"),
        }
    }

    /// The loop engine's lifecycle state.
    pub fn state(&self) -> LoopState {
        self.engine.lock().state()
    }

    /// A snapshot of the loop engine for UI and telemetry.
    pub fn status(&self) -> LoopStatus {
        self.engine.lock().status()
    }

    /// The zero-based index of the iteration under the playback cursor, or
    /// `None` when nothing is running.
    pub fn current_iteration(&self) -> Option<u32> {
        let started_at = (*self.started_at.lock())?;
        let duration = self.engine.lock().window().duration();
        let elapsed = self.context.clock.now() - started_at;
        if elapsed <= 0.0 {
            return Some(0);
        }
        Some((elapsed / duration) as u32)
    }

    /// Runs `f` against the loop engine. Settings changed while a loop is
    /// running take effect on the next start.
    pub fn configure<F: FnOnce(&mut LoopEngine)>(&self, f: F) {
        f(&mut self.engine.lock());
    }

    /// Starts looping the given pattern at the current clock time.
    ///
    /// Starting while a loop is already running is a no-op. If the clock or
    /// renderer is unavailable, nothing is scheduled and the caller may retry.
    pub async fn start_loop(&self, pattern: &Pattern) -> StartStatus {
        self.start_loop_at(pattern, None).await
    }

    async fn start_loop_at(&self, pattern: &Pattern, start_at: Option<f64>) -> StartStatus {
        if !self.context.is_ready() {
            warn!("Clock or renderer not ready, loop not started");
            return StartStatus::NotReady;
        }

        let mut handles = self.handles.lock().await;
        let _enter = self.span.enter();
        if handles.is_some() {
            info!("Loop already running");
            return StartStatus::AlreadyRunning;
        }

        let (programs, loop_duration, max_loops) = {
            let mut engine = self.engine.lock();
            if !engine.begin_looping() {
                info!(state = ?engine.state(), "Loop already running");
                return StartStatus::AlreadyRunning;
            }

            let programs: Vec<ChannelProgram> = pattern
                .tracks
                .iter()
                .map(|track| ChannelProgram {
                    sampler: SamplerChannel::new(
                        &track.channel,
                        track.sound.clone(),
                        self.max_overlap_voices,
                    ),
                    prepared: engine.prepare_looped_sequence(&track.notes),
                })
                .collect();

            if programs.iter().all(|p| p.prepared.is_empty()) {
                engine.finish_stop();
                warn!("No notes to loop, aborting start");
                return StartStatus::NoNotes;
            }

            (programs, engine.window().duration(), engine.window().max_loops)
        };

        let started_at = start_at.unwrap_or_else(|| self.context.clock.now());
        let programs = Arc::new(programs);
        let cancel = CancelHandle::new();

        info!(
            started_at,
            loop_duration,
            tracks = programs.len(),
            max_loops = max_loops.map(|m| m as i64).unwrap_or(-1),
            "Starting loop playback"
        );

        let pump = {
            let context = self.context.clone();
            let engine = self.engine.clone();
            let programs = programs.clone();
            let scheduled = self.scheduled.clone();
            let cancel = cancel.clone();
            let ahead_count = self.ahead_count;
            tokio::spawn(async move {
                TransportScheduler::pump(
                    context,
                    engine,
                    programs,
                    scheduled,
                    cancel,
                    ahead_count,
                    started_at,
                )
                .await;
            })
        };

        // A finite loop count arms a single deferred stop at the moment the
        // final iteration ends.
        let auto_stop = max_loops.map(|max| {
            let transport = self.clone();
            let stop_at = started_at + f64::from(max) * loop_duration;
            tokio::spawn(async move {
                let remaining = stop_at - transport.context.clock.now();
                if remaining > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
                }
                transport.stop_loop().await;
            })
        });

        *handles = Some(PlayHandles {
            pump,
            auto_stop,
            cancel,
            programs,
        });
        *self.started_at.lock() = Some(started_at);
        StartStatus::Started { at: started_at }
    }

    /// The scheduling pump. Each cycle extends the horizon by `ahead_count`
    /// iterations, reclaims finished voices, then sleeps roughly one loop
    /// duration. Iterations are always submitted in order.
    async fn pump(
        context: AudioEngineContext,
        engine: Arc<Mutex<LoopEngine>>,
        programs: Arc<Vec<ChannelProgram>>,
        scheduled: Arc<Mutex<Vec<(f64, EventId)>>>,
        cancel: CancelHandle,
        ahead_count: u32,
        started_at: f64,
    ) {
        let mut next_loop: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let (loop_duration, max_loops, batch) = {
                let engine = engine.lock();
                if engine.state() != LoopState::Looping {
                    break;
                }
                let max_loops = engine.window().max_loops;
                let batch_end = match max_loops {
                    Some(max) => (next_loop + ahead_count).min(max),
                    None => next_loop + ahead_count,
                };

                let mut batch: Vec<(u32, f64, Vec<GainRamp>)> = Vec::new();
                for index in next_loop..batch_end {
                    let iteration = engine.schedule_iteration(&[], index);
                    batch.push((index, iteration.offset, iteration.ramps));
                }
                (engine.window().duration(), max_loops, batch)
            };

            let mut posted = 0;
            'batch: for (index, offset, ramps) in &batch {
                if cancel.is_cancelled() {
                    break;
                }
                post_ramps(&context, started_at + offset, ramps);
                for program in programs.iter() {
                    let iteration = engine.lock().schedule_iteration(&program.prepared, *index);
                    // The ledger lock spans the cancel check and the posts, so
                    // a concurrent stop either finds these ids in the ledger
                    // or prevents them from being posted at all.
                    let mut ledger = scheduled.lock();
                    if cancel.is_cancelled() {
                        break 'batch;
                    }
                    for note in &iteration.events {
                        let time = started_at + iteration.offset + note.start;
                        if let Some(event) =
                            program.sampler.trigger(&context, time, Some(note))
                        {
                            ledger.push((time, event));
                            posted += 1;
                        }
                    }
                }
            }
            if cancel.is_cancelled() {
                break;
            }
            next_loop = match batch.last() {
                Some((index, _, _)) => index + 1,
                None => next_loop,
            };

            let now = context.clock.now();
            for program in programs.iter() {
                program.sampler.reclaim(&context, now);
            }
            // Ids behind the playback cursor are unrecallable; drop them so
            // the horizon stays bounded.
            scheduled.lock().retain(|(time, _)| *time >= now);

            debug!(
                next_loop,
                posted,
                active_voices = context.governor.active_count(),
                "Extended scheduling horizon"
            );

            if max_loops.is_some_and(|max| next_loop >= max) {
                break;
            }
            tokio::time::sleep(Duration::from_secs_f64(loop_duration)).await;
        }
    }

    /// Stops the running loop: fades out, cancels every not-yet-rendered
    /// event, and returns to idle. A no-op if nothing is running.
    pub async fn stop_loop(&self) {
        let mut guard = self.handles.lock().await;
        let _enter = self.span.enter();
        let handles = match guard.take() {
            Some(handles) => handles,
            None => {
                info!("Transport is not active, nothing to stop.");
                return;
            }
        };

        let now = self.context.clock.now();
        let fade_out = {
            let mut engine = self.engine.lock();
            engine.begin_stopping();
            engine.fade_out_duration()
        };
        info!(fade_out, "Stopping loop playback");

        self.context.renderer.ramp_master_gain(now, 0.0, fade_out);
        handles.cancel.cancel();

        let pending: Vec<(f64, EventId)> = self.scheduled.lock().drain(..).collect();
        debug!(cancelled = pending.len(), "Cancelling scheduled events");
        for (_, event) in pending {
            self.context.renderer.cancel(event);
        }

        // Restore the master gain once the fade has completed; in-flight
        // tails decay under their own envelopes.
        self.context
            .renderer
            .ramp_master_gain(now + fade_out, 1.0, 0.0);

        self.engine.lock().finish_stop();
        *self.started_at.lock() = None;
        self.context.events.publish(EngineEvent::TransportStop);

        if let Some(auto_stop) = handles.auto_stop {
            auto_stop.abort();
        }
        handles.pump.abort();
    }

    /// Plays the given patterns back to back. Each pattern must have a finite
    /// loop count to advance to the next; the final pattern may loop forever.
    /// Pattern switches fire slightly before the acoustic boundary so the next
    /// pattern is already materialized when the renderer reaches it.
    pub async fn play_all(&self, patterns: Vec<Pattern>) -> StartStatus {
        let first = match patterns.first() {
            Some(first) => first,
            None => return StartStatus::NoNotes,
        };

        let status = self.start_loop(first).await;
        let started_at = match status {
            StartStatus::Started { at } => at,
            other => return other,
        };
        self.context
            .events
            .publish(EngineEvent::SequencePlaybackChanged {
                pattern_index: 0,
                scheduled_time: Some(started_at),
            });

        let transport = self.clone();
        tokio::spawn(async move {
            let mut index = 0;
            let mut started_at = started_at;
            loop {
                if index + 1 >= patterns.len() {
                    break;
                }
                let boundary = {
                    let engine = transport.engine.lock();
                    engine
                        .window()
                        .max_loops
                        .map(|max| started_at + f64::from(max) * engine.window().duration())
                };
                if boundary.is_none() {
                    warn!(
                        pattern_index = index,
                        "Pattern loops forever, remaining patterns will not play"
                    );
                    break;
                }
                transport.schedule_sequence_advance(boundary).await;
                if transport.state() == LoopState::Idle {
                    // Stopped while waiting for the boundary.
                    break;
                }

                transport.halt_for_advance().await;
                index += 1;
                transport
                    .context
                    .events
                    .publish(EngineEvent::SequencePlaybackChanged {
                        pattern_index: index,
                        scheduled_time: boundary,
                    });
                match transport.start_loop_at(&patterns[index], boundary).await {
                    StartStatus::Started { at } => started_at = at,
                    status => {
                        warn!(pattern_index = index, status = ?status, "Pattern advance failed");
                        break;
                    }
                }
            }
        });

        status
    }

    /// Waits until slightly before the given boundary. With no boundary the
    /// advance happens immediately; that is a degraded best-effort path, not
    /// an error.
    pub async fn schedule_sequence_advance(&self, scheduled_time: Option<f64>) {
        match scheduled_time {
            Some(time) => {
                let lead = time - self.context.clock.now() - ADVANCE_EPSILON;
                if lead > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(lead)).await;
                } else {
                    warn!(
                        scheduled_time = time,
                        "Advance boundary already passed, advancing immediately"
                    );
                }
            }
            None => {
                warn!("No scheduled time available, advancing immediately");
            }
        }
    }

    /// Tears down the current loop without a fade or a transport-stop event,
    /// in preparation for an immediate pattern switch.
    async fn halt_for_advance(&self) {
        let mut guard = self.handles.lock().await;
        if let Some(handles) = guard.take() {
            handles.cancel.cancel();
            // Everything still in the ledger belongs to the outgoing pattern
            // and sits before the advance boundary; those notes must play
            // out, so the ledger is cleared without recalling anything.
            self.scheduled.lock().clear();
            if let Some(auto_stop) = handles.auto_stop {
                auto_stop.abort();
            }
            handles.pump.abort();
        }
        self.engine.lock().finish_stop();
        *self.started_at.lock() = None;
    }

    /// Stops playback and disposes every channel's voices. Called at engine
    /// teardown; the transport can be started again afterwards.
    pub async fn teardown(&self) {
        let programs = {
            let guard = self.handles.lock().await;
            guard.as_ref().map(|handles| handles.programs.clone())
        };
        self.stop_loop().await;
        if let Some(programs) = programs {
            let now = self.context.clock.now();
            for program in programs.iter() {
                program.sampler.dispose(&self.context, now);
            }
        }
    }
}

/// Posts one iteration's gain automations to the renderer.
fn post_ramps(context: &AudioEngineContext, base_time: f64, ramps: &[GainRamp]) {
    for ramp in ramps {
        match *ramp {
            GainRamp::FadeIn { at, duration } => {
                context.renderer.ramp_master_gain(base_time + at, 0.0, 0.0);
                context.renderer.ramp_master_gain(base_time + at, 1.0, duration);
            }
            GainRamp::CrossfadeDip { at, duration } => {
                context
                    .renderer
                    .ramp_master_gain(base_time + at, crate::looper::CROSSFADE_DIP_FLOOR, duration);
                context.renderer.ramp_master_gain(
                    base_time + at + duration / 2.0,
                    1.0,
                    duration / 2.0,
                );
            }
        }
    }
}
