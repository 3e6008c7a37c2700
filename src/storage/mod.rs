//! # Storage Module - Key-Value Persistence Layer
//!
//! Sled-backed key-value store for aggregated device state, message logs and
//! index sets. The conceptual schema is string keys over one ordered tree:
//!
//! ```text
//! dots:<numericDeviceId>        JSON hash of dot fields
//! dots_meshcore:<publicKey>     JSON blob with embedded expiry
//! <CATEGORY>:<deviceId>         JSON array of message records (capped)
//! devices:active:<deviceId>     set member (presence = membership)
//! portnums:<category>:<id>      set member per message category
//! ```
//!
//! Sets are modelled as member keys under a common prefix: adding and
//! removing a member stays a single-key atomic operation, and membership
//! enumeration is an ordered prefix scan. No atomicity is assumed across
//! keys; multi-key writes are best-effort and each key succeeds or fails
//! on its own.
//!
//! Bulk reads run on a blocking worker and race a caller-side timeout; a
//! timeout degrades the whole batch to a [`StoreError::BatchTimeout`], which
//! the aggregation engine absorbs into an empty result.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

/// Storage failures. The aggregation engine logs these with operation
/// context and degrades to an empty/no-op result; they never reach callers.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("batch read timed out after {0:?}")]
    BatchTimeout(Duration),

    #[error("batch worker failed: {0}")]
    Worker(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Number of keys pulled per cursor step when scanning a prefix.
pub const SCAN_BATCH: usize = 256;

/// Sled-backed store for dots, message logs and index sets.
#[derive(Clone)]
pub struct DotStore {
    db: sled::Db,
    tree: sled::Tree,
    batch_timeout: Duration,
}

const TREE_PRIMARY: &str = "meshdot";

impl DotStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::open_with_timeout(path, Duration::from_secs(30))
    }

    /// Open with an explicit batch-read timeout (tests use a short one).
    pub fn open_with_timeout<P: AsRef<Path>>(
        path: P,
        batch_timeout: Duration,
    ) -> StoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree(TREE_PRIMARY)?;
        Ok(Self {
            db,
            tree,
            batch_timeout,
        })
    }

    /// Fetch a hash of string fields stored as a JSON object.
    pub fn get_hash(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a hash of string fields.
    pub fn put_hash(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()> {
        let bytes = serde_json::to_vec(fields)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Fetch an arbitrary JSON-encoded value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace an arbitrary JSON-encoded value.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Remove a key. Returns true when something was actually removed.
    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tree.remove(key.as_bytes())?.is_some())
    }

    pub fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.tree.contains_key(key.as_bytes())?)
    }

    // --- set operations (member keys under a prefix) ---

    fn member_key(set: &str, member: &str) -> String {
        format!("{}:{}", set, member)
    }

    /// Add `member` to the set named `set`. Idempotent.
    pub fn set_add(&self, set: &str, member: &str) -> StoreResult<()> {
        self.tree
            .insert(Self::member_key(set, member).as_bytes(), &[1u8][..])?;
        Ok(())
    }

    /// Remove `member` from `set`. Returns true when the member existed.
    pub fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .tree
            .remove(Self::member_key(set, member).as_bytes())?
            .is_some())
    }

    /// Enumerate the members of `set` via an ordered prefix scan.
    pub fn set_members(&self, set: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("{}:", set);
        let keys = self.scan_keys(&prefix)?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    // --- capped list operations (one JSON array per key) ---

    /// Append a record to the list at `key`, trimming from the head so at
    /// most `cap` entries remain. Newest entries live at the tail.
    pub fn list_append_capped(
        &self,
        key: &str,
        record: serde_json::Value,
        cap: usize,
    ) -> StoreResult<()> {
        let mut list: Vec<serde_json::Value> = self.get_json(key)?.unwrap_or_default();
        list.push(record);
        if list.len() > cap {
            let excess = list.len() - cap;
            list.drain(..excess);
        }
        self.put_json(key, &list)
    }

    /// Read up to `limit` records from the list at `key`, newest first.
    pub fn list_newest_first(
        &self,
        key: &str,
        limit: usize,
    ) -> StoreResult<Vec<serde_json::Value>> {
        let list: Vec<serde_json::Value> = self.get_json(key)?.unwrap_or_default();
        Ok(list.into_iter().rev().take(limit).collect())
    }

    /// Newest entry of the list at `key`, if any.
    pub fn list_tail(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let mut list: Vec<serde_json::Value> = self.get_json(key)?.unwrap_or_default();
        Ok(list.pop())
    }

    // --- scans and batches ---

    /// Collect every key under `prefix`, cursor-driven in [`SCAN_BATCH`]
    /// steps so one huge keyspace never pins the tree iterator for long.
    pub fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
                match &cursor {
                    None => Box::new(self.tree.scan_prefix(prefix.as_bytes())),
                    Some(last) => {
                        let mut after = last.clone();
                        after.push(0); // smallest key strictly greater than `last`
                        Box::new(
                            self.tree
                                .range(after..)
                                .take_while(|res| match res {
                                    Ok((k, _)) => k.starts_with(prefix.as_bytes()),
                                    Err(_) => true,
                                }),
                        )
                    }
                };
            let mut batch = 0usize;
            let mut last_key: Option<Vec<u8>> = None;
            for entry in iter.take(SCAN_BATCH) {
                let (key, _) = entry?;
                out.push(String::from_utf8_lossy(&key).into_owned());
                last_key = Some(key.to_vec());
                batch += 1;
            }
            if batch < SCAN_BATCH {
                return Ok(out);
            }
            cursor = last_key;
        }
    }

    /// Read many hashes in one pipelined batch on a blocking worker, racing
    /// the configured timeout. A timeout fails the whole batch.
    pub async fn read_hashes(
        &self,
        keys: Vec<String>,
    ) -> StoreResult<Vec<Option<HashMap<String, String>>>> {
        let tree = self.tree.clone();
        let task = tokio::task::spawn_blocking(move || -> StoreResult<Vec<_>> {
            let mut out = Vec::with_capacity(keys.len());
            for key in &keys {
                let value = match tree.get(key.as_bytes())? {
                    Some(bytes) => Some(serde_json::from_slice(&bytes)?),
                    None => None,
                };
                out.push(value);
            }
            Ok(out)
        });
        match timeout(self.batch_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Worker(join_err.to_string())),
            Err(_) => Err(StoreError::BatchTimeout(self.batch_timeout)),
        }
    }

    /// Remove every key under `prefix`; returns the count removed.
    pub fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let keys = self.scan_keys(prefix)?;
        let mut removed = 0usize;
        for key in keys {
            if self.tree.remove(key.as_bytes())?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Flush buffered writes to disk. Called on shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        self.tree.flush()?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> DotStore {
        DotStore::open(dir.path()).expect("store")
    }

    #[test]
    fn hash_round_trip_and_delete() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let mut fields = HashMap::new();
        fields.insert("long_name".to_string(), "Base".to_string());
        fields.insert("latitude".to_string(), "55.7".to_string());
        store.put_hash("dots:22782998", &fields).expect("put");
        let fetched = store.get_hash("dots:22782998").expect("get").expect("some");
        assert_eq!(fetched.get("long_name").map(String::as_str), Some("Base"));
        assert!(store.delete("dots:22782998").expect("delete"));
        assert!(!store.delete("dots:22782998").expect("redelete"));
        assert!(store.get_hash("dots:22782998").expect("get").is_none());
    }

    #[test]
    fn set_membership_via_prefix_scan() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        store.set_add("devices:active", "22782998").expect("add");
        store.set_add("devices:active", "305419896").expect("add");
        store.set_add("devices:active", "22782998").expect("re-add");
        let mut members = store.set_members("devices:active").expect("members");
        members.sort();
        assert_eq!(members, vec!["22782998", "305419896"]);
        assert!(store.set_remove("devices:active", "22782998").expect("rm"));
        assert_eq!(store.set_members("devices:active").expect("members").len(), 1);
    }

    #[test]
    fn capped_list_keeps_newest_at_tail() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        for i in 0..5 {
            store
                .list_append_capped("POSITION_APP:1", serde_json::json!({ "seq": i }), 3)
                .expect("append");
        }
        let newest = store.list_newest_first("POSITION_APP:1", 10).expect("read");
        let seqs: Vec<i64> = newest.iter().map(|v| v["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![4, 3, 2]);
        let tail = store.list_tail("POSITION_APP:1").expect("tail").expect("some");
        assert_eq!(tail["seq"].as_i64(), Some(4));
    }

    #[test]
    fn scan_keys_walks_past_one_batch() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        for i in 0..(SCAN_BATCH + 10) {
            store
                .put_json(&format!("dots:{:06}", i), &serde_json::json!({}))
                .expect("put");
        }
        store.put_json("other:1", &serde_json::json!({})).expect("put");
        let keys = store.scan_keys("dots:").expect("scan");
        assert_eq!(keys.len(), SCAN_BATCH + 10);
        assert!(keys.iter().all(|k| k.starts_with("dots:")));
    }

    #[tokio::test]
    async fn batch_read_preserves_order_and_misses() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let mut fields = HashMap::new();
        fields.insert("short_name".to_string(), "N1".to_string());
        store.put_hash("dots:1", &fields).expect("put");
        let result = store
            .read_hashes(vec!["dots:0".into(), "dots:1".into()])
            .await
            .expect("batch");
        assert!(result[0].is_none());
        assert_eq!(
            result[1].as_ref().unwrap().get("short_name").map(String::as_str),
            Some("N1")
        );
    }

    #[test]
    fn delete_prefix_counts_removed_keys() {
        let dir = TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        store.set_add("portnums:POSITION_APP", "1").expect("add");
        store.set_add("portnums:POSITION_APP", "2").expect("add");
        store.set_add("portnums:TELEMETRY_APP", "1").expect("add");
        let removed = store.delete_prefix("portnums:POSITION_APP:").expect("del");
        assert_eq!(removed, 2);
        assert_eq!(
            store.set_members("portnums:TELEMETRY_APP").expect("members"),
            vec!["1"]
        );
    }
}
