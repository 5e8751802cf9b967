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

//! A real-time loop sequencing and voice management engine.
//!
//! Patterns of note events are windowed, shaped (tempo, quantization, swing,
//! crossfade) and scheduled just ahead of a monotonic clock against a
//! renderer backend. Per-channel voice pools bound concurrent playback and a
//! global governor reacts to output overload.

pub mod clock;
pub mod config;
pub mod context;
pub mod events;
pub mod live;
pub mod looper;
pub mod patches;
pub mod playsync;
pub mod renderer;
pub mod sampler;
pub mod sequence;
pub mod transport;
pub mod util;
pub mod voices;
