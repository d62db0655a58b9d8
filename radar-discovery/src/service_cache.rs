use std::{num::NonZeroUsize, time::Duration};

use lru::LruCache;
use tokio::time::Instant;

/// Service UUIDs noticed in recent advertisements, used to build restricted
/// hardware filters. Bounded by capacity (least recently seen goes first) and
/// by a time-to-live applied when the filter is built.
pub struct ServiceUuidCache {
    entries: LruCache<String, Instant>,
}

impl ServiceUuidCache {
    pub fn new(capacity: usize) -> ServiceUuidCache {
        ServiceUuidCache {
            entries: LruCache::new(non_zero(capacity)),
        }
    }

    pub fn record(&mut self, uuid: &str, now: Instant) {
        let uuid = uuid.to_ascii_lowercase();
        self.entries.put(uuid, now);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = non_zero(capacity);
        if self.entries.cap() != capacity {
            self.entries.resize(capacity);
        }
    }

    /// Drops entries older than `ttl` and returns the rest, most recently
    /// seen first.
    pub fn active(&mut self, now: Instant, ttl: Duration) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > ttl)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        for uuid in expired {
            self.entries.pop(&uuid);
        }
        self.entries.iter().map(|(uuid, _)| uuid.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn non_zero(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
