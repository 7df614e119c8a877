//! # Versioned Record Store
//!
//! Keep namespaced, versioned, expiring records in memory with the write
//! semantics a Juno store exposes: create-if-absent, conditional update,
//! upsert and destroy.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Per-shard locks reduce contention under concurrency.
//! 2. **TTL Fast Path**: Expiration is checked on access; expired records are
//!    treated as absent and removed lazily or by a periodic purge.
//! 3. **Monotonic Versions**: A record starts at version 1 and every write
//!    bumps it by one. Recreating an expired or destroyed key starts again at 1.
//!
//! ## Structure Overview
//!
//! ```text
//! RecordStore
//!   └── shards: Vec<RwLock<HashMap<RecordKey, Record>>>
//!         └── Record { value, version, creation_time, expires_at }
//! ```

use std::hash::{BuildHasher, Hash, Hasher};
use std::time::{Duration, Instant};

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use juno_common::OpStatus;
use parking_lot::RwLock;

const DEFAULT_SHARD_MULTIPLIER: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    namespace: Bytes,
    key: Bytes,
}

#[derive(Debug, Clone)]
struct Record {
    value: Bytes,
    version: u64,
    creation_time: u64,
    expires_at: Instant,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Pushes the deadline out to `until`; never shortens it.
    fn extend(&mut self, until: Instant) {
        if until > self.expires_at {
            self.expires_at = until;
        }
    }

    fn view(&self, now: Instant) -> RecordView {
        let remaining = self.expires_at.saturating_duration_since(now);
        RecordView {
            value: self.value.clone(),
            version: self.version,
            creation_time: self.creation_time,
            ttl_secs: remaining.as_millis().div_ceil(1000) as u64,
        }
    }
}

/// What a successful operation reports back about the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub value: Bytes,
    pub version: u64,
    pub creation_time: u64,
    /// Remaining lifetime, rounded up to whole seconds.
    pub ttl_secs: u64,
}

/// Operation result: the record after the operation, or the store status.
pub type StoreResult<T> = Result<T, OpStatus>;

type Shard = RwLock<HashMap<RecordKey, Record, RandomState>>;

/// Sharded in-memory record store.
#[derive(Debug)]
pub struct RecordStore {
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Creates a store with a shard count based on CPU parallelism.
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self::with_shard_count(threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// The count is normalized to the next power of two for fast masking.
    pub fn with_shard_count(shards: usize) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_hasher(hash_state.clone())))
            .collect();
        RecordStore {
            shards,
            shard_mask: shard_count - 1,
            hash_state,
        }
    }

    fn shard_for(&self, key: &RecordKey) -> &Shard {
        let mut hasher = self.hash_state.build_hasher();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.shard_mask]
    }

    /// Inserts a record that must not exist yet.
    pub fn create(
        &self,
        namespace: Bytes,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
        creation_time: u64,
    ) -> StoreResult<RecordView> {
        let id = RecordKey { namespace, key };
        let now = Instant::now();
        let mut shard = self.shard_for(&id).write();
        if shard.get(&id).is_some_and(|rec| !rec.is_expired(now)) {
            return Err(OpStatus::DupKey);
        }
        let record = Record {
            value,
            version: 1,
            creation_time,
            expires_at: deadline(now, ttl)?,
        };
        let view = record.view(now);
        shard.insert(id, record);
        Ok(view)
    }

    /// Reads a record, extending its lifetime to `extend` when that is longer.
    pub fn get(
        &self,
        namespace: Bytes,
        key: Bytes,
        extend: Option<Duration>,
    ) -> StoreResult<RecordView> {
        let id = RecordKey { namespace, key };
        let now = Instant::now();
        let until = extend.map(|ttl| deadline(now, ttl)).transpose()?;
        let mut shard = self.shard_for(&id).write();
        let record = live_record(&mut shard, &id, now)?;
        if let Some(until) = until {
            record.extend(until);
        }
        Ok(record.view(now))
    }

    /// Replaces the value of an existing record.
    ///
    /// With `expected_version`, the write only happens if the record is still
    /// at that version; otherwise `VersionConflict`.
    pub fn update(
        &self,
        namespace: Bytes,
        key: Bytes,
        value: Bytes,
        expected_version: Option<u64>,
        extend: Option<Duration>,
    ) -> StoreResult<RecordView> {
        let id = RecordKey { namespace, key };
        let now = Instant::now();
        let until = extend.map(|ttl| deadline(now, ttl)).transpose()?;
        let mut shard = self.shard_for(&id).write();
        let record = live_record(&mut shard, &id, now)?;
        if let Some(expected) = expected_version {
            if expected != record.version {
                return Err(OpStatus::VersionConflict);
            }
        }
        record.value = value;
        record.version += 1;
        if let Some(until) = until {
            record.extend(until);
        }
        Ok(record.view(now))
    }

    /// Creates or overwrites a record.
    pub fn set(
        &self,
        namespace: Bytes,
        key: Bytes,
        value: Bytes,
        ttl: Duration,
        creation_time: u64,
    ) -> StoreResult<RecordView> {
        let id = RecordKey { namespace, key };
        let now = Instant::now();
        let until = deadline(now, ttl)?;
        let mut shard = self.shard_for(&id).write();
        match shard.get_mut(&id) {
            Some(record) if !record.is_expired(now) => {
                record.value = value;
                record.version += 1;
                record.extend(until);
                Ok(record.view(now))
            }
            _ => {
                let record = Record {
                    value,
                    version: 1,
                    creation_time,
                    expires_at: until,
                };
                let view = record.view(now);
                shard.insert(id, record);
                Ok(view)
            }
        }
    }

    pub fn destroy(&self, namespace: Bytes, key: Bytes) -> StoreResult<()> {
        let id = RecordKey { namespace, key };
        let now = Instant::now();
        let mut shard = self.shard_for(&id).write();
        match shard.remove(&id) {
            Some(record) if !record.is_expired(now) => Ok(()),
            _ => Err(OpStatus::NoKey),
        }
    }

    /// Removes expired records across all shards.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, record| !record.is_expired(now));
            removed += before - map.len();
        }
        removed
    }

    /// Number of stored records, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expiry instant `ttl` from `now`; a lifetime past what the clock can
/// represent is a bad parameter.
fn deadline(now: Instant, ttl: Duration) -> StoreResult<Instant> {
    now.checked_add(ttl).ok_or(OpStatus::BadParam)
}

/// Looks up a record, dropping it if it has expired.
fn live_record<'a>(
    map: &'a mut HashMap<RecordKey, Record, RandomState>,
    id: &RecordKey,
    now: Instant,
) -> StoreResult<&'a mut Record> {
    if map.get(id).is_some_and(|rec| rec.is_expired(now)) {
        map.remove(id);
    }
    map.get_mut(id).ok_or(OpStatus::NoKey)
}
