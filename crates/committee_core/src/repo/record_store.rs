//! Typed, version-gated record access over one bucket.
//!
//! Records are stored as JSON. `create` is the only unconditional write;
//! `update` and `delete` require the revision the caller last observed.

use crate::context::OpContext;
use crate::kv::KvStore;
use crate::model::etag::format_etag;
use crate::repo::{RepoError, RepoResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// A record paired with the store revision it was read or written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, revision: u64) -> Self {
        Self { value, revision }
    }

    /// Revision as the caller-facing ETag token.
    pub fn etag(&self) -> String {
        format_etag(self.revision)
    }
}

pub struct RecordStore<T> {
    store: Arc<dyn KvStore>,
    bucket: String,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            bucket: self.bucket.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> RecordStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            _record: PhantomData,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn get(&self, ctx: &OpContext, key: &str) -> RepoResult<Versioned<T>> {
        let entry = self.store.get(ctx, &self.bucket, key)?;
        let value = self.decode(key, &entry.value)?;
        Ok(Versioned::new(value, entry.revision))
    }

    /// Create-if-absent. Fails with `AlreadyExists` when the key is taken.
    pub fn create(&self, ctx: &OpContext, key: &str, record: &T) -> RepoResult<u64> {
        let bytes = self.encode(key, record)?;
        Ok(self.store.create(ctx, &self.bucket, key, &bytes)?)
    }

    pub fn update(
        &self,
        ctx: &OpContext,
        key: &str,
        record: &T,
        expected_revision: u64,
    ) -> RepoResult<u64> {
        let bytes = self.encode(key, record)?;
        Ok(self
            .store
            .update(ctx, &self.bucket, key, &bytes, expected_revision)?)
    }

    pub fn delete(&self, ctx: &OpContext, key: &str, expected_revision: u64) -> RepoResult<()> {
        Ok(self.store.delete(ctx, &self.bucket, key, expected_revision)?)
    }

    /// Loads every record whose key passes `filter`, in key order.
    pub fn list(
        &self,
        ctx: &OpContext,
        filter: impl Fn(&str) -> bool,
    ) -> RepoResult<Vec<Versioned<T>>> {
        let mut records = Vec::new();
        for key in self.store.keys(ctx, &self.bucket)? {
            if !filter(&key) {
                continue;
            }
            match self.get(ctx, &key) {
                Ok(record) => records.push(record),
                // Deleted between listing and reading.
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    fn encode(&self, key: &str, record: &T) -> RepoResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|source| RepoError::Codec {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        })
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> RepoResult<T> {
        serde_json::from_slice(bytes).map_err(|source| RepoError::Codec {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        })
    }
}
