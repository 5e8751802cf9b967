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

//! Voice allocation and polyphony management.
//!
//! Each channel owns a bounded pool of reusable voice handles; a global
//! governor enforces a process-wide polyphony ceiling across all channels.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::renderer::VoiceId;

use self::pool::ChannelVoicePool;

pub mod governor;
pub mod pool;

/// Maps every voice to the pool that owns it.
///
/// The governor's polyphony ceiling spans all channels, so an admission on
/// one channel can evict a voice living in another channel's pool. The
/// directory routes that release to the owning pool immediately instead of
/// leaving the handle busy until the owner's next reclaim pass.
#[derive(Default)]
pub struct VoiceDirectory {
    owners: Mutex<HashMap<VoiceId, Arc<Mutex<ChannelVoicePool>>>>,
}

impl VoiceDirectory {
    pub fn new() -> VoiceDirectory {
        VoiceDirectory::default()
    }

    /// Records the owning pool of a voice. A voice never moves between
    /// pools, so re-registration is a no-op.
    pub fn register(&self, voice: VoiceId, pool: &Arc<Mutex<ChannelVoicePool>>) {
        self.owners
            .lock()
            .entry(voice)
            .or_insert_with(|| pool.clone());
    }

    /// Forgets a voice once its pool has discarded it.
    pub fn unregister(&self, voice: VoiceId) {
        self.owners.lock().remove(&voice);
    }

    /// Releases a voice back to whichever pool owns it. Unknown voices are
    /// ignored. Callers must not hold a pool lock.
    pub fn release(&self, voice: VoiceId) {
        let owner = self.owners.lock().get(&voice).cloned();
        if let Some(owner) = owner {
            owner.lock().release(voice);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_directory_releases_owning_pool() {
        let directory = VoiceDirectory::new();
        let pool = Arc::new(Mutex::new(ChannelVoicePool::new("pad", true, 2)));
        let allocation = pool.lock().allocate(0.0);
        pool.lock().mark_started(allocation.voice, 10.0);
        directory.register(allocation.voice, &pool);
        assert_eq!(pool.lock().active_count(), 1);

        directory.release(allocation.voice);
        assert_eq!(pool.lock().active_count(), 0);

        // Unknown and unregistered voices are ignored.
        directory.release(allocation.voice + 1000);
        directory.unregister(allocation.voice);
        directory.release(allocation.voice);
        assert_eq!(pool.lock().active_count(), 0);
    }
}
