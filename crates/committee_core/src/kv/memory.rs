//! In-process versioned store.
//!
//! Used for tests and for deployments configured with the `memory` backend.

use super::{KvEntry, KvError, KvResult, KvStore};
use crate::context::OpContext;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    buckets: Mutex<BTreeMap<String, MemoryBucket>>,
}

#[derive(Debug, Default)]
struct MemoryBucket {
    last_revision: u64,
    entries: BTreeMap<String, StoredValue>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    revision: u64,
}

impl MemoryBucket {
    fn next_revision(&mut self) -> u64 {
        self.last_revision += 1;
        self.last_revision
    }

    fn check_revision(&self, bucket: &str, key: &str, expected: u64) -> KvResult<()> {
        let stored = self.entries.get(key).ok_or_else(|| KvError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        if stored.revision != expected {
            return Err(KvError::RevisionMismatch {
                bucket: bucket.to_string(),
                key: key.to_string(),
                expected,
                actual: stored.revision,
            });
        }
        Ok(())
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, ctx: &OpContext, bucket: &str, key: &str) -> KvResult<KvEntry> {
        ctx.check()?;
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|state| state.entries.get(key))
            .map(|stored| KvEntry {
                key: key.to_string(),
                value: stored.value.clone(),
                revision: stored.revision,
            })
            .ok_or_else(|| KvError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn create(&self, ctx: &OpContext, bucket: &str, key: &str, value: &[u8]) -> KvResult<u64> {
        ctx.check()?;
        let mut buckets = self.buckets.lock();
        let state = buckets.entry(bucket.to_string()).or_default();
        if state.entries.contains_key(key) {
            return Err(KvError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let revision = state.next_revision();
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                revision,
            },
        );
        Ok(revision)
    }

    fn update(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected_revision: u64,
    ) -> KvResult<u64> {
        ctx.check()?;
        let mut buckets = self.buckets.lock();
        let state = buckets
            .get_mut(bucket)
            .ok_or_else(|| KvError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        state.check_revision(bucket, key, expected_revision)?;
        let revision = state.next_revision();
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_vec(),
                revision,
            },
        );
        Ok(revision)
    }

    fn delete(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        expected_revision: u64,
    ) -> KvResult<()> {
        ctx.check()?;
        let mut buckets = self.buckets.lock();
        let state = buckets
            .get_mut(bucket)
            .ok_or_else(|| KvError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        state.check_revision(bucket, key, expected_revision)?;
        state.entries.remove(key);
        state.next_revision();
        Ok(())
    }

    fn keys(&self, ctx: &OpContext, bucket: &str) -> KvResult<Vec<String>> {
        ctx.check()?;
        let buckets = self.buckets.lock();
        Ok(buckets
            .get(bucket)
            .map(|state| state.entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
