//! Short-lived derived-data caches.
//!
//! The all-dots view and the minimal map view are rebuilt from the store at
//! most once per TTL window and invalidated eagerly by any successful write.
//! A cache entry is a convenience over the store, never a source of truth:
//! expiry or invalidation only triggers a re-read, it never blocks a caller.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Single-slot cache with a fixed time-to-live and explicit invalidation.
pub struct TtlCache<T> {
    slot: Mutex<Option<(Instant, T)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// Return the cached value when present and fresh.
    pub fn get(&self) -> Option<T> {
        let guard = self.slot.lock().ok()?;
        match guard.as_ref() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Some((Instant::now(), value));
        }
    }

    /// Drop the cached value immediately (called after every write).
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_value_is_served() {
        let cache = TtlCache::new(Duration::from_secs(30));
        assert!(cache.get().is_none());
        cache.put(vec![1, 2, 3]);
        assert_eq!(cache.get(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn expired_value_is_dropped() {
        let cache = TtlCache::new(Duration::from_millis(0));
        cache.put("stale");
        assert!(cache.get().is_none());
    }

    #[test]
    fn invalidation_clears_immediately() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.put(42u32);
        cache.invalidate();
        assert!(cache.get().is_none());
    }
}
