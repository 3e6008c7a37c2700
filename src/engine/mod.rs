//! # Aggregation Engine
//!
//! Maintains the canonical "current known state of a device" by merging
//! repeated, partial, possibly duplicate or out-of-order observations into
//! one record per device (a "dot": name + last-known position + freshness).
//!
//! ## Responsibilities
//!
//! - **Merge**: fold an incoming partial update into the stored record under
//!   the persistence invariant (a dot exists iff it has a non-zero coordinate
//!   pair or a non-empty validated name).
//! - **Debounce**: suppress writes that repeat an unchanged observation
//!   within a short window, bounding write amplification from retransmissions
//!   on a lossy radio link.
//! - **Indices**: keep the active-device set and per-category sets in step
//!   with the dot records; both are conveniences over a full key scan and can
//!   be rebuilt from scratch.
//! - **Caches**: serve the all-dots and map views from 30-second caches,
//!   invalidated eagerly by any successful write.
//! - **Message logs**: append-only, length-capped per (category, device)
//!   observation lists with duplicate suppression.
//!
//! ## Failure semantics
//!
//! Every store failure is logged with operation and device context and
//! degrades to an empty or no-op result. The engine never propagates a
//! storage failure: a flaky store call must not take down ingestion of
//! subsequent packets, so availability wins over strict consistency.
//!
//! ## Concurrency
//!
//! Merges are plain read-modify-write without cross-key locking. Two
//! near-simultaneous merges for the same device can race and the last writer
//! wins; an update can be silently lost. That matches the weak consistency
//! the rest of the pipeline assumes and is intentionally not "fixed" here
//! with blocking.

pub mod cache;
pub mod ids;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::logutil::escape_log;
use crate::meshcore::AdvertPayload;
use crate::metrics;
use crate::storage::{DotStore, StoreResult};
use crate::validation::{is_plausible_position, NameValidator};
use cache::TtlCache;

const ACTIVE_SET: &str = "devices:active";
const MESHCORE_PREFIX: &str = "dots_meshcore:";
const PORTNUM_PREFIX: &str = "portnums:";

/// Legacy field-name aliases accepted when reading stored dot hashes.
/// Consulted once at the read boundary; everything downstream sees only the
/// canonical names.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("long_name", "long_name"),
    ("longName", "long_name"),
    ("short_name", "short_name"),
    ("shortName", "short_name"),
    ("longitude", "longitude"),
    ("lon", "longitude"),
    ("lng", "longitude"),
    ("latitude", "latitude"),
    ("lat", "latitude"),
    ("mqtt", "mqtt"),
    ("viaMqtt", "mqtt"),
    ("s_time", "s_time"),
    ("sTime", "s_time"),
    ("server_time", "s_time"),
];

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn dot_key(num: u32) -> String {
    format!("dots:{}", num)
}

/// Rewrite stored field names to their canonical form.
pub fn normalize_fields(raw: HashMap<String, String>) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        let canonical = FIELD_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, canonical)| *canonical);
        if let Some(name) = canonical {
            // Canonical spelling wins when both forms are present.
            out.entry(name.to_string()).or_insert(value);
        }
    }
    out
}

/// Canonical aggregated per-device state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceDot {
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub latitude: f64,
    /// Tri-state gateway flag: "1" origin is its own gateway, "0" relayed,
    /// "" unknown.
    #[serde(default)]
    pub mqtt: String,
    /// Server-assigned last-update time, milliseconds.
    #[serde(default)]
    pub s_time: i64,
}

impl DeviceDot {
    pub fn has_location(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    pub fn has_name(&self) -> bool {
        !self.long_name.is_empty() || !self.short_name.is_empty()
    }

    /// The persistence invariant: a dot is stored iff this holds.
    pub fn qualifies(&self) -> bool {
        self.has_location() || self.has_name()
    }

    fn from_fields(fields: &HashMap<String, String>) -> Self {
        let get = |name: &str| fields.get(name).cloned().unwrap_or_default();
        let num = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        DeviceDot {
            long_name: get("long_name"),
            short_name: get("short_name"),
            longitude: num("longitude"),
            latitude: num("latitude"),
            mqtt: get("mqtt"),
            s_time: fields
                .get("s_time")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0),
        }
    }

    fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("long_name".to_string(), self.long_name.clone());
        fields.insert("short_name".to_string(), self.short_name.clone());
        fields.insert("longitude".to_string(), self.longitude.to_string());
        fields.insert("latitude".to_string(), self.latitude.to_string());
        fields.insert("mqtt".to_string(), self.mqtt.clone());
        fields.insert("s_time".to_string(), self.s_time.to_string());
        fields
    }
}

/// One normalized partial observation for a device. Absent fields leave the
/// stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceUpdate {
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Identity of the gateway that relayed this packet into the system.
    #[serde(default)]
    pub gateway_id: Option<String>,
    /// Identity of the packet's originating device.
    #[serde(default)]
    pub origin_id: Option<String>,
}

/// Parallel aggregated state for MeshCore devices, keyed by public key and
/// expiring after a fixed TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshcoreDot {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub gateway_origin: String,
    #[serde(default)]
    pub gateway_origin_id: String,
    pub s_time: i64,
    pub expires_at: i64,
}

/// Partial observation for a MeshCore device.
#[derive(Debug, Clone, Default)]
pub struct MeshcoreUpdate {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gateway_origin: Option<String>,
    pub gateway_origin_id: Option<String>,
}

impl MeshcoreUpdate {
    /// Lift a decoded ADVERT into an update; gateway identity comes from the
    /// transport layer, not the payload, so it stays unset here.
    pub fn from_advert(advert: &AdvertPayload) -> Self {
        Self {
            name: advert.name.clone(),
            latitude: advert.latitude,
            longitude: advert.longitude,
            gateway_origin: None,
            gateway_origin_id: None,
        }
    }
}

/// One timestamped observation in a per-(category, device) message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned timestamp, milliseconds.
    pub time: i64,
    /// Reporting gateway identity; excluded from duplicate comparison.
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub from_id: String,
    /// Normalized application payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Minimal per-device view for map rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub id: String,
    pub short_name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of a merge. Storage failures degrade into `Debounced`-like no-ops
/// and are never surfaced as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fields were written with a fresh server timestamp.
    Written,
    /// Unchanged repeat inside the debounce window; nothing written.
    Debounced,
    /// Merge left neither location nor name; the record was removed.
    Deleted,
    /// Nothing written (unparseable id, non-qualifying with no prior record,
    /// or the record write itself failed and was absorbed).
    Skipped,
}

/// Engine tuning, sourced from [`crate::config::EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Unchanged repeats inside this window are suppressed (ms).
    pub debounce_ms: i64,
    /// TTL for the all-dots and map-view caches.
    pub cache_ttl: Duration,
    /// Maximum records retained per (category, device) message log.
    pub message_cap: usize,
    /// Default duplicate-suppression window for message logs (ms).
    pub dedup_window_ms: i64,
    /// Fixed expiry for MeshCore dots.
    pub meshcore_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 3000,
            cache_ttl: Duration::from_secs(30),
            message_cap: 200,
            dedup_window_ms: 30_000,
            meshcore_ttl: Duration::from_secs(3 * 60 * 60),
        }
    }
}

/// Read interface over the device-existence index, with two
/// implementations: the maintained set, and a full key scan used as the
/// fallback when the set is unavailable or empty.
trait DeviceIndex {
    fn device_ids(&self) -> StoreResult<Vec<String>>;
}

struct ActiveSetIndex<'a> {
    store: &'a DotStore,
}

impl DeviceIndex for ActiveSetIndex<'_> {
    fn device_ids(&self) -> StoreResult<Vec<String>> {
        self.store.set_members(ACTIVE_SET)
    }
}

struct DotScanIndex<'a> {
    store: &'a DotStore,
}

impl DeviceIndex for DotScanIndex<'_> {
    fn device_ids(&self) -> StoreResult<Vec<String>> {
        let keys = self.store.scan_keys("dots:")?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("dots:").map(str::to_string))
            .collect())
    }
}

/// The aggregation engine. Cheap to share behind an `Arc`; all methods take
/// `&self` and internal caches carry their own locking.
pub struct AggregationEngine {
    store: DotStore,
    names: NameValidator,
    opts: EngineOptions,
    all_dots_cache: TtlCache<HashMap<String, DeviceDot>>,
    map_cache: TtlCache<Vec<MapPoint>>,
}

impl AggregationEngine {
    pub fn new(store: DotStore, opts: EngineOptions) -> Self {
        let cache_ttl = opts.cache_ttl;
        Self {
            store,
            names: NameValidator::new(),
            opts,
            all_dots_cache: TtlCache::new(cache_ttl),
            map_cache: TtlCache::new(cache_ttl),
        }
    }

    fn absorb<T>(&self, op: &str, context: &str, result: StoreResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                metrics::inc_store_errors();
                warn!("store {} failed for {}: {}", op, context, err);
                None
            }
        }
    }

    fn invalidate_caches(&self) {
        self.all_dots_cache.invalidate();
        self.map_cache.invalidate();
    }

    // --- write path ---

    /// Merge one partial observation into the device's canonical record.
    ///
    /// Follows the write path contract: read-merge-validate-write with a
    /// debounce window for unchanged repeats and deletion when the merge
    /// result no longer qualifies for persistence.
    pub async fn merge_device_update(
        &self,
        device_id: &str,
        update: DeviceUpdate,
        category: Option<&str>,
    ) -> MergeOutcome {
        let Some(num) = ids::to_numeric(device_id) else {
            debug!("merge skipped: unparseable device id {}", escape_log(device_id));
            return MergeOutcome::Skipped;
        };
        let key = dot_key(num);
        let now = now_ms();

        let existing = self
            .absorb("read", &key, self.store.get_hash(&key))
            .flatten()
            .map(|fields| DeviceDot::from_fields(&normalize_fields(fields)));

        let mut merged = existing.clone().unwrap_or_default();

        // Names: replace when present; invalid names coerce to empty instead
        // of rejecting the update.
        if let Some(name) = update.long_name {
            merged.long_name = self.sanitize_name(&name);
        }
        if let Some(name) = update.short_name {
            merged.short_name = self.sanitize_name(&name);
        }

        // Coordinates fully replace, but implausible positions are treated
        // as absent fields.
        match (update.latitude, update.longitude) {
            (Some(lat), Some(lon)) if is_plausible_position(lat, lon) => {
                merged.latitude = lat;
                merged.longitude = lon;
            }
            (Some(lat), Some(lon)) => {
                debug!("dropping implausible position {},{} for {}", lat, lon, num);
            }
            _ => {}
        }

        // Gateway flag is recomputed whenever both identities are known.
        if let (Some(gateway), Some(origin)) = (&update.gateway_id, &update.origin_id) {
            merged.mqtt = (if gateway == origin { "1" } else { "0" }).to_string();
        }

        if let Some(prev) = &existing {
            let fresh = now.saturating_sub(prev.s_time) < self.opts.debounce_ms;
            if fresh && observably_equal(prev, &merged) {
                metrics::inc_merges_debounced();
                return MergeOutcome::Debounced;
            }
        }

        if !merged.qualifies() {
            if existing.is_some() {
                self.delete_dot(num, category);
                metrics::inc_merges_deleted();
                return MergeOutcome::Deleted;
            }
            return MergeOutcome::Skipped;
        }

        merged.s_time = now;
        let num_str = num.to_string();
        if self
            .absorb("write", &key, self.store.put_hash(&key, &merged.to_fields()))
            .is_none()
        {
            return MergeOutcome::Skipped;
        }
        // Index writes stay best-effort: each succeeds or fails on its own.
        self.absorb(
            "index add",
            &num_str,
            self.store.set_add(ACTIVE_SET, &num_str),
        );
        if let Some(cat) = category {
            self.absorb(
                "category index add",
                &num_str,
                self.store
                    .set_add(&format!("{}{}", PORTNUM_PREFIX, cat), &num_str),
            );
        }
        self.invalidate_caches();
        metrics::inc_merges_written();
        MergeOutcome::Written
    }

    fn sanitize_name(&self, name: &str) -> String {
        if self.names.is_valid(name) {
            name.trim().to_string()
        } else {
            String::new()
        }
    }

    fn delete_dot(&self, num: u32, category: Option<&str>) {
        let key = dot_key(num);
        let num_str = num.to_string();
        self.absorb("delete", &key, self.store.delete(&key));
        self.absorb(
            "index remove",
            &num_str,
            self.store.set_remove(ACTIVE_SET, &num_str),
        );
        if let Some(cat) = category {
            self.absorb(
                "category index remove",
                &num_str,
                self.store
                    .set_remove(&format!("{}{}", PORTNUM_PREFIX, cat), &num_str),
            );
        }
        self.invalidate_caches();
    }

    /// Merge one MeshCore observation, keyed by public key, with the fixed
    /// expiry applied on every write.
    pub async fn merge_meshcore_update(
        &self,
        public_key: &str,
        update: MeshcoreUpdate,
    ) -> MergeOutcome {
        let key = format!("{}{}", MESHCORE_PREFIX, public_key);
        let now = now_ms();

        let existing: Option<MeshcoreDot> = self
            .absorb("read", &key, self.store.get_json(&key))
            .flatten()
            .filter(|dot: &MeshcoreDot| dot.expires_at > now);

        let mut dot = existing.clone().unwrap_or_else(|| MeshcoreDot {
            device_id: public_key.to_string(),
            name: None,
            latitude: None,
            longitude: None,
            gateway_origin: String::new(),
            gateway_origin_id: String::new(),
            s_time: now,
            expires_at: 0,
        });

        if let Some(name) = &update.name {
            if self.names.is_valid(name) {
                dot.name = Some(name.trim().to_string());
            }
        }
        if let (Some(lat), Some(lon)) = (update.latitude, update.longitude) {
            if is_plausible_position(lat, lon) {
                dot.latitude = Some(lat);
                dot.longitude = Some(lon);
            }
        }
        if let Some(origin) = update.gateway_origin {
            dot.gateway_origin = origin;
        }
        if let Some(origin_id) = update.gateway_origin_id {
            dot.gateway_origin_id = origin_id;
        }

        if let Some(prev) = &existing {
            let fresh = now.saturating_sub(prev.s_time) < self.opts.debounce_ms;
            let unchanged = prev.name == dot.name
                && prev.latitude == dot.latitude
                && prev.longitude == dot.longitude;
            if fresh && unchanged {
                metrics::inc_merges_debounced();
                return MergeOutcome::Debounced;
            }
        }

        dot.s_time = now;
        dot.expires_at = now + self.opts.meshcore_ttl.as_millis() as i64;
        if self.absorb("write", &key, self.store.put_json(&key, &dot)).is_none() {
            return MergeOutcome::Skipped;
        }
        metrics::inc_merges_written();
        MergeOutcome::Written
    }

    // --- read path ---

    /// Current state for one device, or nothing when it never qualified.
    pub async fn get_aggregated_state(&self, device_id: &str) -> Option<DeviceDot> {
        let num = ids::to_numeric(device_id)?;
        let key = dot_key(num);
        let fields = self.absorb("read", &key, self.store.get_hash(&key)).flatten()?;
        let dot = DeviceDot::from_fields(&normalize_fields(fields));
        // Defensive re-check of the persistence invariant.
        dot.qualifies().then_some(dot)
    }

    /// All current device state, keyed by numeric id string. Served from a
    /// short-lived cache; cache misses re-read the store.
    pub async fn get_all_aggregated_state(&self) -> HashMap<String, DeviceDot> {
        if let Some(cached) = self.all_dots_cache.get() {
            metrics::inc_cache_hits();
            return cached;
        }
        metrics::inc_cache_misses();

        let device_ids = self.device_ids();
        let keys: Vec<String> = device_ids.iter().map(|id| format!("dots:{}", id)).collect();
        let hashes = match self.store.read_hashes(keys).await {
            Ok(hashes) => hashes,
            Err(err) => {
                metrics::inc_store_errors();
                warn!("bulk dot read failed: {}", err);
                return HashMap::new();
            }
        };

        let mut out = HashMap::with_capacity(device_ids.len());
        for (id, fields) in device_ids.into_iter().zip(hashes) {
            if let Some(fields) = fields {
                let dot = DeviceDot::from_fields(&normalize_fields(fields));
                if dot.qualifies() {
                    out.insert(id, dot);
                }
            }
        }
        self.all_dots_cache.put(out.clone());
        out
    }

    /// Minimal map view: located devices only, trimmed to render fields.
    pub async fn get_minimal_map_view(&self) -> Vec<MapPoint> {
        if let Some(cached) = self.map_cache.get() {
            metrics::inc_cache_hits();
            return cached;
        }
        metrics::inc_cache_misses();

        let all = self.get_all_aggregated_state().await;
        let mut view: Vec<MapPoint> = all
            .into_iter()
            .filter(|(_, dot)| dot.has_location())
            .map(|(id, dot)| MapPoint {
                id,
                short_name: dot.short_name,
                latitude: dot.latitude,
                longitude: dot.longitude,
            })
            .collect();
        view.sort_by(|a, b| a.id.cmp(&b.id));
        self.map_cache.put(view.clone());
        view
    }

    /// Live MeshCore dots; expired entries are removed lazily as they are
    /// encountered.
    pub async fn get_meshcore_dots(&self) -> Vec<MeshcoreDot> {
        let keys = self
            .absorb("scan", MESHCORE_PREFIX, self.store.scan_keys(MESHCORE_PREFIX))
            .unwrap_or_default();
        let now = now_ms();
        let mut out = Vec::new();
        for key in keys {
            match self.absorb("read", &key, self.store.get_json::<MeshcoreDot>(&key)) {
                Some(Some(dot)) if dot.expires_at > now => out.push(dot),
                Some(Some(_)) => {
                    self.absorb("expire", &key, self.store.delete(&key));
                }
                _ => {}
            }
        }
        out
    }

    /// Resolve the device-existence index, falling back to a full key scan
    /// when the maintained set is unavailable or empty. This is the single
    /// fallback decision point; the scan path is slower and callers are
    /// expected to tolerate the extra latency.
    fn device_ids(&self) -> Vec<String> {
        let indexed = ActiveSetIndex { store: &self.store };
        match indexed.device_ids() {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) | Err(_) => {
                debug!("active-device index unavailable; scanning dot keys");
                let scanned = DotScanIndex { store: &self.store };
                let ids = match scanned.device_ids() {
                    Ok(ids) => ids,
                    Err(err) => {
                        metrics::inc_store_errors();
                        warn!("dot key scan failed: {}", err);
                        return Vec::new();
                    }
                };
                // The set is refreshable from scratch; repopulate it so the
                // next read takes the fast path again.
                for id in &ids {
                    let _ = self.store.set_add(ACTIVE_SET, id);
                }
                ids
            }
        }
    }

    // --- message logs ---

    /// Append an observation to the (category, device) log unless it
    /// duplicates the newest stored entry within the dedup window. Returns
    /// true when the record was appended.
    pub async fn append_message(
        &self,
        category: &str,
        device_id: &str,
        record: MessageRecord,
    ) -> bool {
        let Some(num) = ids::to_numeric(device_id) else {
            return false;
        };
        if self
            .is_duplicate(category, device_id, &record, self.opts.dedup_window_ms)
            .await
        {
            metrics::inc_messages_deduped();
            return false;
        }
        let key = format!("{}:{}", category, num);
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => {
                warn!("message encode failed for {}: {}", key, err);
                return false;
            }
        };
        if self
            .absorb(
                "append",
                &key,
                self.store.list_append_capped(&key, value, self.opts.message_cap),
            )
            .is_none()
        {
            return false;
        }
        self.absorb(
            "category index add",
            &key,
            self.store
                .set_add(&format!("{}{}", PORTNUM_PREFIX, category), &num.to_string()),
        );
        metrics::inc_messages_appended();
        true
    }

    /// Duplicate check against the newest stored entry: timestamp delta in
    /// `[0, window_ms)` and every field equal except the timestamp and the
    /// reporting gateway identity.
    pub async fn is_duplicate(
        &self,
        category: &str,
        device_id: &str,
        record: &MessageRecord,
        window_ms: i64,
    ) -> bool {
        let Some(num) = ids::to_numeric(device_id) else {
            return false;
        };
        let key = format!("{}:{}", category, num);
        let tail = self.absorb("tail read", &key, self.store.list_tail(&key)).flatten();
        let Some(prev) = tail.and_then(|v| serde_json::from_value::<MessageRecord>(v).ok())
        else {
            return false;
        };
        let delta = record.time - prev.time;
        if delta < 0 || delta >= window_ms {
            return false;
        }
        record.from_id == prev.from_id && record.payload == prev.payload
    }

    /// Up to `limit` records for (category, device), newest first.
    pub async fn get_messages(
        &self,
        category: &str,
        device_id: &str,
        limit: usize,
    ) -> Vec<MessageRecord> {
        let Some(num) = ids::to_numeric(device_id) else {
            return Vec::new();
        };
        let key = format!("{}:{}", category, num);
        self.absorb("list read", &key, self.store.list_newest_first(&key, limit))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    /// Every device's log for one category, keyed by numeric id string.
    pub async fn get_all_messages(&self, category: &str) -> HashMap<String, Vec<MessageRecord>> {
        let set = format!("{}{}", PORTNUM_PREFIX, category);
        let members = self
            .absorb("index read", &set, self.store.set_members(&set))
            .unwrap_or_default();
        let mut out = HashMap::with_capacity(members.len());
        for member in members {
            let records = self.get_messages(category, &member, self.opts.message_cap).await;
            if !records.is_empty() {
                out.insert(member, records);
            }
        }
        out
    }

    /// Device counts per message category, from the category index sets.
    pub async fn category_statistics(&self) -> BTreeMap<String, usize> {
        let keys = self
            .absorb("scan", PORTNUM_PREFIX, self.store.scan_keys(PORTNUM_PREFIX))
            .unwrap_or_default();
        let mut stats = BTreeMap::new();
        for key in keys {
            if let Some(rest) = key.strip_prefix(PORTNUM_PREFIX) {
                if let Some((category, _member)) = rest.rsplit_once(':') {
                    *stats.entry(category.to_string()).or_insert(0usize) += 1;
                }
            }
        }
        stats
    }

    // --- deletion ---

    /// Remove every key belonging to a device: its dot, all per-category
    /// message logs, and its index memberships. Accepts either id form and
    /// returns the number of keys removed.
    pub async fn delete_all_data_for(&self, device_id: &str) -> usize {
        let Some(num) = ids::to_numeric(device_id) else {
            return 0;
        };
        let num_str = num.to_string();
        let mut removed = 0usize;

        if self
            .absorb("delete", &dot_key(num), self.store.delete(&dot_key(num)))
            .unwrap_or(false)
        {
            removed += 1;
        }

        let categories: BTreeSet<String> = self
            .absorb("scan", PORTNUM_PREFIX, self.store.scan_keys(PORTNUM_PREFIX))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(PORTNUM_PREFIX)
                    .and_then(|rest| rest.rsplit_once(':'))
                    .map(|(category, _)| category.to_string())
            })
            .collect();

        for category in &categories {
            let message_key = format!("{}:{}", category, num);
            if self
                .absorb("delete", &message_key, self.store.delete(&message_key))
                .unwrap_or(false)
            {
                removed += 1;
            }
            let set = format!("{}{}", PORTNUM_PREFIX, category);
            if self
                .absorb("index remove", &set, self.store.set_remove(&set, &num_str))
                .unwrap_or(false)
            {
                removed += 1;
            }
        }

        if self
            .absorb(
                "index remove",
                ACTIVE_SET,
                self.store.set_remove(ACTIVE_SET, &num_str),
            )
            .unwrap_or(false)
        {
            removed += 1;
        }

        self.invalidate_caches();
        removed
    }
}

/// Debounce comparison: same coordinates and same validated names. The
/// gateway flag and timestamps are deliberately excluded.
fn observably_equal(a: &DeviceDot, b: &DeviceDot) -> bool {
    a.latitude == b.latitude
        && a.longitude == b.longitude
        && a.long_name == b.long_name
        && a.short_name == b.short_name
}
