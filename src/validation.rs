//! Input validation for device names and inbound packet buffers.
//!
//! Everything arriving over the mesh is untrusted: names come out of radio
//! payloads written by arbitrary firmware, and packet buffers may be
//! corrupted in flight. A rejected value is treated as "field absent" by the
//! aggregation engine, never as an error.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum accepted device name length, in characters.
const MAX_NAME_CHARS: usize = 50;

/// Repeated-punctuation runs that show up in spam/garbled adverts but never
/// in real device names.
const SUSPICIOUS_PATTERNS: &[&str] = &[
    "....", ",,,,", "!!!!", "????", "----", "____", "::::", "////",
];

/// Punctuation allowed inside a device name alongside alphanumerics.
const ALLOWED_PUNCT: &str = " .,:;!?'\"()[]{}<>-_+=*/\\|@#$%^&~`";

/// Memoization cache size for name validation results.
const NAME_CACHE_CAP: usize = 1000;

/// Bounded insertion-order cache: when full, the oldest entry is evicted.
struct BoundedCache {
    map: HashMap<String, bool>,
    order: VecDeque<String>,
    cap: usize,
}

impl BoundedCache {
    fn new(cap: usize) -> Self {
        Self {
            map: HashMap::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn get(&self, key: &str) -> Option<bool> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: String, value: bool) {
        if self.map.contains_key(&key) {
            return;
        }
        if self.map.len() >= self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Device name validator with a bounded memoization cache.
///
/// The same handful of names repeats on every advert a device transmits, so
/// memoizing the verdict avoids re-scanning identical strings thousands of
/// times per hour. The cache is an explicit object handed to the aggregation
/// engine, not process-global state.
pub struct NameValidator {
    cache: Mutex<BoundedCache>,
}

impl Default for NameValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl NameValidator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(BoundedCache::new(NAME_CACHE_CAP)),
        }
    }

    /// Check whether `name` is acceptable as a device display name.
    pub fn is_valid(&self, name: &str) -> bool {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(name) {
                return hit;
            }
        }
        let verdict = check_name(name);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), verdict);
        }
        verdict
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn check_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return false;
    }
    if SUSPICIOUS_PATTERNS.iter().any(|p| trimmed.contains(p)) {
        return false;
    }
    trimmed.chars().all(|ch| {
        if ch.is_control() {
            return false;
        }
        // Alphanumeric covers Latin, Latin-extended, Cyrillic and digits;
        // non-ASCII passes for emoji and other symbol names seen in the wild.
        ch.is_alphanumeric() || ALLOWED_PUNCT.contains(ch) || !ch.is_ascii()
    })
}

/// Sanity-check a raw protobuf service envelope before any real decoding.
///
/// The envelope always starts with field 1 as a length-delimited record, so
/// the first byte must carry wire type 2 and field number 1, followed by a
/// varint length (base-128 LE, at most 5 bytes / 32 bits) that fits inside
/// the buffer.
pub fn is_valid_packet(buf: &[u8]) -> bool {
    if buf.len() < 10 || buf.len() > 65536 {
        return false;
    }
    let tag = buf[0];
    if tag & 0x07 != 2 {
        return false;
    }
    if tag >> 3 != 1 {
        return false;
    }

    let mut len: u64 = 0;
    let mut shift = 0u32;
    let mut idx = 1usize;
    loop {
        if idx >= buf.len() {
            return false;
        }
        let b = buf[idx];
        idx += 1;
        len |= ((b & 0x7F) as u64) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            // More than 5 varint bytes; not a 32-bit length.
            return false;
        }
    }
    idx + len as usize <= buf.len()
}

/// Reject positions that are numerically impossible on a WGS84 globe.
pub fn is_plausible_position(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= 90.0
        && longitude.abs() <= 180.0
}
