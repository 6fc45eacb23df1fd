//! Unique-constraint emulation on top of create-if-absent.
//!
//! # Responsibility
//! - Claim a derived index key for an owner UID atomically.
//! - Release claims during rollback, rename and delete.
//!
//! # Invariants
//! - A key is held by at most one owner; the store's create-if-absent is the
//!   only arbiter.
//! - Index values are never updated in place.
//! - Release never removes a key held by a different owner.

use crate::context::OpContext;
use crate::kv::KvStore;
use crate::repo::{RepoError, RepoResult};
use std::sync::Arc;

const RELEASE_ATTEMPTS: usize = 3;

/// A successful claim on one index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: String,
    pub owner_uid: String,
    pub revision: u64,
}

#[derive(Clone)]
pub struct ReservationIndex {
    store: Arc<dyn KvStore>,
    bucket: String,
}

impl ReservationIndex {
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Claims `key` for `owner_uid`.
    ///
    /// # Errors
    /// - `RepoError::AlreadyExists` when another claim holds the key.
    pub fn reserve(&self, ctx: &OpContext, key: &str, owner_uid: &str) -> RepoResult<Reservation> {
        let revision = self
            .store
            .create(ctx, &self.bucket, key, owner_uid.as_bytes())?;
        Ok(Reservation {
            key: key.to_string(),
            owner_uid: owner_uid.to_string(),
            revision,
        })
    }

    /// Owner UID currently holding `key`, if any.
    pub fn owner(&self, ctx: &OpContext, key: &str) -> RepoResult<Option<String>> {
        match self.store.get(ctx, &self.bucket, key) {
            Ok(entry) => Ok(Some(String::from_utf8_lossy(&entry.value).into_owned())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_reserved(&self, ctx: &OpContext, key: &str) -> RepoResult<bool> {
        Ok(self.owner(ctx, key)?.is_some())
    }

    /// Releases a claim made by this process. A missing key, or one that has
    /// since been re-claimed at another revision, counts as released.
    pub fn release(&self, ctx: &OpContext, reservation: &Reservation) -> RepoResult<()> {
        match self
            .store
            .delete(ctx, &self.bucket, &reservation.key, reservation.revision)
        {
            Ok(()) => Ok(()),
            Err(err) => match RepoError::from(err) {
                RepoError::NotFound { .. } | RepoError::RevisionMismatch { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    /// Releases `key` only while it is held by `owner_uid`.
    ///
    /// Returns `true` when a claim was removed.
    pub fn release_owned(&self, ctx: &OpContext, key: &str, owner_uid: &str) -> RepoResult<bool> {
        for _ in 0..RELEASE_ATTEMPTS {
            let entry = match self.store.get(ctx, &self.bucket, key) {
                Ok(entry) => entry,
                Err(err) if err.is_not_found() => return Ok(false),
                Err(err) => return Err(err.into()),
            };
            if entry.value != owner_uid.as_bytes() {
                return Ok(false);
            }
            match self.store.delete(ctx, &self.bucket, key, entry.revision) {
                Ok(()) => return Ok(true),
                Err(err) if err.is_not_found() => return Ok(false),
                Err(err) => match RepoError::from(err) {
                    RepoError::RevisionMismatch { .. } => continue,
                    other => return Err(other),
                },
            }
        }
        Ok(false)
    }
}
