//! Ingestion and engine counters.
//! Plain atomics with a snapshot accessor; a Prometheus endpoint can be
//! layered on later without touching the call sites.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static FRAMES_FAILED: AtomicU64 = AtomicU64::new(0);
static ADVERTS_DECODED: AtomicU64 = AtomicU64::new(0);
static ADVERTS_PARTIAL: AtomicU64 = AtomicU64::new(0);
static MERGES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static MERGES_DEBOUNCED: AtomicU64 = AtomicU64::new(0);
static MERGES_DELETED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_APPENDED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DEDUPED: AtomicU64 = AtomicU64::new(0);
static STORE_ERRORS: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_decoded() {
    FRAMES_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_failed() {
    FRAMES_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_adverts_decoded() {
    ADVERTS_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_adverts_partial() {
    ADVERTS_PARTIAL.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_merges_written() {
    MERGES_WRITTEN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_merges_debounced() {
    MERGES_DEBOUNCED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_merges_deleted() {
    MERGES_DELETED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_appended() {
    MESSAGES_APPENDED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_deduped() {
    MESSAGES_DEDUPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_store_errors() {
    STORE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cache_hits() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_cache_misses() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub frames_decoded: u64,
    pub frames_failed: u64,
    pub adverts_decoded: u64,
    pub adverts_partial: u64,
    pub merges_written: u64,
    pub merges_debounced: u64,
    pub merges_deleted: u64,
    pub messages_appended: u64,
    pub messages_deduped: u64,
    pub store_errors: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        frames_failed: FRAMES_FAILED.load(Ordering::Relaxed),
        adverts_decoded: ADVERTS_DECODED.load(Ordering::Relaxed),
        adverts_partial: ADVERTS_PARTIAL.load(Ordering::Relaxed),
        merges_written: MERGES_WRITTEN.load(Ordering::Relaxed),
        merges_debounced: MERGES_DEBOUNCED.load(Ordering::Relaxed),
        merges_deleted: MERGES_DELETED.load(Ordering::Relaxed),
        messages_appended: MESSAGES_APPENDED.load(Ordering::Relaxed),
        messages_deduped: MESSAGES_DEDUPED.load(Ordering::Relaxed),
        store_errors: STORE_ERRORS.load(Ordering::Relaxed),
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
        cache_misses: CACHE_MISSES.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let before = snapshot();
        inc_frames_decoded();
        inc_frames_decoded();
        inc_store_errors();
        let after = snapshot();
        assert_eq!(after.frames_decoded, before.frames_decoded + 2);
        assert_eq!(after.store_errors, before.store_errors + 1);
    }
}
