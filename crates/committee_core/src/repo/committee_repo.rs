//! Committee repository contracts and store-backed implementation.
//!
//! # Responsibility
//! - Persist `CommitteeBase` and `CommitteeSettings` as two versioned records
//!   in two buckets under the same UID.
//! - Hold the `(project_uid, name)` and SSO group name reservations in the
//!   committees bucket, next to the base records.
//!
//! # Invariants
//! - Base and settings revisions are independent.
//! - Listing never returns reservation entries.

use crate::context::OpContext;
use crate::index_key::{committee_name_index_key, is_index_key, sso_group_index_key};
use crate::kv::KvStore;
use crate::model::committee::{CommitteeBase, CommitteeId, CommitteeSettings};
use crate::repo::record_store::{RecordStore, Versioned};
use crate::repo::reservation::{Reservation, ReservationIndex};
use crate::repo::RepoResult;
use std::sync::Arc;

/// Repository interface for committee aggregates.
pub trait CommitteeRepository: Send + Sync {
    fn get_base(&self, ctx: &OpContext, uid: CommitteeId) -> RepoResult<Versioned<CommitteeBase>>;
    fn create_base(&self, ctx: &OpContext, base: &CommitteeBase) -> RepoResult<u64>;
    fn update_base(
        &self,
        ctx: &OpContext,
        base: &CommitteeBase,
        expected_revision: u64,
    ) -> RepoResult<u64>;
    fn delete_base(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        expected_revision: u64,
    ) -> RepoResult<()>;
    fn list_bases(&self, ctx: &OpContext) -> RepoResult<Vec<Versioned<CommitteeBase>>>;

    fn get_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
    ) -> RepoResult<Versioned<CommitteeSettings>>;
    fn create_settings(&self, ctx: &OpContext, settings: &CommitteeSettings) -> RepoResult<u64>;
    fn update_settings(
        &self,
        ctx: &OpContext,
        settings: &CommitteeSettings,
        expected_revision: u64,
    ) -> RepoResult<u64>;
    fn delete_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        expected_revision: u64,
    ) -> RepoResult<()>;

    /// Claims the `(project_uid, name)` pair for `owner`.
    fn reserve_name(
        &self,
        ctx: &OpContext,
        project_uid: &str,
        name: &str,
        owner: CommitteeId,
    ) -> RepoResult<Reservation>;
    /// Claims an SSO group name for `owner`.
    fn reserve_sso_group(
        &self,
        ctx: &OpContext,
        sso_group_name: &str,
        owner: CommitteeId,
    ) -> RepoResult<Reservation>;
    /// Read-side availability probe used by the allocator.
    fn sso_group_reserved(&self, ctx: &OpContext, sso_group_name: &str) -> RepoResult<bool>;
    fn release(&self, ctx: &OpContext, reservation: &Reservation) -> RepoResult<()>;
    /// Releases `key` if `owner` still holds it.
    fn release_owned(&self, ctx: &OpContext, key: &str, owner: CommitteeId) -> RepoResult<bool>;
}

/// `KvStore`-backed committee repository.
#[derive(Clone)]
pub struct KvCommitteeRepository {
    bases: RecordStore<CommitteeBase>,
    settings: RecordStore<CommitteeSettings>,
    index: ReservationIndex,
}

impl KvCommitteeRepository {
    pub fn new(
        store: Arc<dyn KvStore>,
        committees_bucket: impl Into<String>,
        settings_bucket: impl Into<String>,
    ) -> Self {
        let committees_bucket = committees_bucket.into();
        Self {
            bases: RecordStore::new(Arc::clone(&store), committees_bucket.clone()),
            settings: RecordStore::new(Arc::clone(&store), settings_bucket),
            index: ReservationIndex::new(store, committees_bucket),
        }
    }
}

impl CommitteeRepository for KvCommitteeRepository {
    fn get_base(&self, ctx: &OpContext, uid: CommitteeId) -> RepoResult<Versioned<CommitteeBase>> {
        self.bases.get(ctx, &uid.to_string())
    }

    fn create_base(&self, ctx: &OpContext, base: &CommitteeBase) -> RepoResult<u64> {
        self.bases.create(ctx, &base.uid.to_string(), base)
    }

    fn update_base(
        &self,
        ctx: &OpContext,
        base: &CommitteeBase,
        expected_revision: u64,
    ) -> RepoResult<u64> {
        self.bases
            .update(ctx, &base.uid.to_string(), base, expected_revision)
    }

    fn delete_base(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        expected_revision: u64,
    ) -> RepoResult<()> {
        self.bases.delete(ctx, &uid.to_string(), expected_revision)
    }

    fn list_bases(&self, ctx: &OpContext) -> RepoResult<Vec<Versioned<CommitteeBase>>> {
        self.bases.list(ctx, |key| !is_index_key(key))
    }

    fn get_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
    ) -> RepoResult<Versioned<CommitteeSettings>> {
        self.settings.get(ctx, &uid.to_string())
    }

    fn create_settings(&self, ctx: &OpContext, settings: &CommitteeSettings) -> RepoResult<u64> {
        self.settings.create(ctx, &settings.uid.to_string(), settings)
    }

    fn update_settings(
        &self,
        ctx: &OpContext,
        settings: &CommitteeSettings,
        expected_revision: u64,
    ) -> RepoResult<u64> {
        self.settings
            .update(ctx, &settings.uid.to_string(), settings, expected_revision)
    }

    fn delete_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        expected_revision: u64,
    ) -> RepoResult<()> {
        self.settings
            .delete(ctx, &uid.to_string(), expected_revision)
    }

    fn reserve_name(
        &self,
        ctx: &OpContext,
        project_uid: &str,
        name: &str,
        owner: CommitteeId,
    ) -> RepoResult<Reservation> {
        self.index.reserve(
            ctx,
            &committee_name_index_key(project_uid, name),
            &owner.to_string(),
        )
    }

    fn reserve_sso_group(
        &self,
        ctx: &OpContext,
        sso_group_name: &str,
        owner: CommitteeId,
    ) -> RepoResult<Reservation> {
        self.index
            .reserve(ctx, &sso_group_index_key(sso_group_name), &owner.to_string())
    }

    fn sso_group_reserved(&self, ctx: &OpContext, sso_group_name: &str) -> RepoResult<bool> {
        self.index
            .is_reserved(ctx, &sso_group_index_key(sso_group_name))
    }

    fn release(&self, ctx: &OpContext, reservation: &Reservation) -> RepoResult<()> {
        self.index.release(ctx, reservation)
    }

    fn release_owned(&self, ctx: &OpContext, key: &str, owner: CommitteeId) -> RepoResult<bool> {
        self.index.release_owned(ctx, key, &owner.to_string())
    }
}
