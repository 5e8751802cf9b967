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

//! Resolution of channel sound references to playable patches.

use std::collections::HashMap;

use parking_lot::RwLock;

/// A playable sound resolved for a channel. The engine only needs the source
/// duration for region math; the patch id is passed through to the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    /// The renderer-side patch reference.
    pub id: String,
    /// The duration of the source buffer in seconds.
    pub duration: f64,
}

/// Resolves a channel's sound reference to a playable patch.
///
/// A failed resolution is not an error at the scheduler boundary: the trigger
/// is skipped with a diagnostic instead.
pub trait PatchStore: Send + Sync {
    /// Resolves the patch for a channel, or `None` if nothing is loaded.
    fn resolve(&self, channel: &str) -> Option<Patch>;
}

/// A simple in-memory patch store.
pub struct StaticPatchStore {
    patches: RwLock<HashMap<String, Patch>>,
}

impl StaticPatchStore {
    /// Creates an empty store.
    pub fn new() -> StaticPatchStore {
        StaticPatchStore {
            patches: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a patch for a channel, replacing any existing one.
    pub fn insert(&self, channel: impl Into<String>, patch: Patch) {
        self.patches.write().insert(channel.into(), patch);
    }
}

impl Default for StaticPatchStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PatchStore for StaticPatchStore {
    fn resolve(&self, channel: &str) -> Option<Patch> {
        self.patches.read().get(channel).cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_static_store_resolution() {
        let store = StaticPatchStore::new();
        assert!(store.resolve("kick").is_none());

        store.insert(
            "kick",
            Patch {
                id: "kick.wav".to_string(),
                duration: 0.8,
            },
        );
        let patch = store.resolve("kick").unwrap();
        assert_eq!(patch.id, "kick.wav");
        assert_eq!(patch.duration, 0.8);
    }
}
