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

//! The engine context.
//!
//! Bundles the external seams (clock, renderer, patch store) with the shared
//! engine state (governor, event bus) and is passed explicitly to every
//! component. There are no process-wide singletons.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::events::EventBus;
use crate::patches::PatchStore;
use crate::renderer::Renderer;
use crate::voices::governor::GlobalVoiceGovernor;
use crate::voices::VoiceDirectory;

/// The interval at which the governor samples the output level.
pub const LEVEL_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Everything a component needs to talk to the outside world.
#[derive(Clone)]
pub struct AudioEngineContext {
    pub clock: Arc<dyn Clock>,
    pub renderer: Arc<dyn Renderer>,
    pub patches: Arc<dyn PatchStore>,
    pub governor: Arc<GlobalVoiceGovernor>,
    pub voices: Arc<VoiceDirectory>,
    pub events: Arc<EventBus>,
}

impl AudioEngineContext {
    pub fn new(
        clock: Arc<dyn Clock>,
        renderer: Arc<dyn Renderer>,
        patches: Arc<dyn PatchStore>,
        governor: Arc<GlobalVoiceGovernor>,
    ) -> AudioEngineContext {
        AudioEngineContext {
            clock,
            renderer,
            patches,
            governor,
            voices: Arc::new(VoiceDirectory::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Returns true if both the clock and the renderer can accept work.
    pub fn is_ready(&self) -> bool {
        self.clock.is_ready() && self.renderer.is_ready()
    }

    /// Spawns the periodic output-level monitor that feeds the governor's
    /// overload detector. The task runs until aborted.
    pub fn spawn_level_monitor(&self) -> JoinHandle<()> {
        let clock = self.clock.clone();
        let renderer = self.renderer.clone();
        let governor = self.governor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEVEL_SAMPLE_INTERVAL);
            loop {
                interval.tick().await;
                if !renderer.is_ready() {
                    continue;
                }
                governor.record_level(renderer.output_level(), clock.now(), renderer.as_ref());
            }
        })
    }
}
