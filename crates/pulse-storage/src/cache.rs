//! Channel lookup cache.
//!
//! Maps a platform channel id to the stored [`Channel`] so ingestion does
//! not hit SQLite for every post. Entries expire after the configured
//! refresh interval. Callers invalidate an entry when they create or rename
//! the channel, and `clear` drops everything (e.g. after manual edits).

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use pulse_core::config::CacheConfig;
use pulse_core::types::Channel;

struct CachedChannel {
    channel: Channel,
    cached_at: Instant,
}

/// Bounded, time-limited cache of channels keyed by platform id.
pub struct ChannelCache {
    entries: Mutex<LruCache<i64, CachedChannel>>,
    refresh_after: Duration,
}

impl ChannelCache {
    pub fn new(capacity: usize, refresh_after: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            refresh_after,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.channel_capacity,
            Duration::from_secs(config.channel_refresh_secs),
        )
    }

    /// Cached channel, or `None` if absent or older than the refresh interval.
    pub fn get(&self, platform_id: i64) -> Option<Channel> {
        let mut entries = self.lock();
        let fresh = entries
            .get(&platform_id)
            .map(|e| e.cached_at.elapsed() < self.refresh_after)?;
        if !fresh {
            entries.pop(&platform_id);
            return None;
        }
        entries.get(&platform_id).map(|e| e.channel.clone())
    }

    pub fn insert(&self, channel: Channel) {
        self.lock().put(
            channel.platform_id,
            CachedChannel {
                channel,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, platform_id: i64) {
        self.lock().pop(&platform_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Poisoning is ignored: entries are plain values.
    fn lock(&self) -> MutexGuard<'_, LruCache<i64, CachedChannel>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ChannelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCache")
            .field("len", &self.len())
            .field("refresh_after", &self.refresh_after)
            .finish()
    }
}
