//! Committee member repository.
//!
//! Members live in their own bucket keyed by member UID; the
//! `(committee_uid, email)` reservations share that bucket.

use crate::context::OpContext;
use crate::index_key::{is_index_key, member_email_index_key};
use crate::kv::KvStore;
use crate::model::committee::CommitteeId;
use crate::model::member::{CommitteeMember, MemberId};
use crate::repo::record_store::{RecordStore, Versioned};
use crate::repo::reservation::{Reservation, ReservationIndex};
use crate::repo::RepoResult;
use std::sync::Arc;

/// Repository interface for committee members.
pub trait MemberRepository: Send + Sync {
    fn get_member(&self, ctx: &OpContext, uid: MemberId) -> RepoResult<Versioned<CommitteeMember>>;
    fn create_member(&self, ctx: &OpContext, member: &CommitteeMember) -> RepoResult<u64>;
    fn update_member(
        &self,
        ctx: &OpContext,
        member: &CommitteeMember,
        expected_revision: u64,
    ) -> RepoResult<u64>;
    fn delete_member(&self, ctx: &OpContext, uid: MemberId, expected_revision: u64)
        -> RepoResult<()>;
    /// Members whose back-reference names `committee_uid`.
    fn list_members(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
    ) -> RepoResult<Vec<Versioned<CommitteeMember>>>;

    fn reserve_email(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        email: &str,
        owner: MemberId,
    ) -> RepoResult<Reservation>;
    fn release(&self, ctx: &OpContext, reservation: &Reservation) -> RepoResult<()>;
    fn release_owned(&self, ctx: &OpContext, key: &str, owner: MemberId) -> RepoResult<bool>;
}

#[derive(Clone)]
pub struct KvMemberRepository {
    members: RecordStore<CommitteeMember>,
    index: ReservationIndex,
}

impl KvMemberRepository {
    pub fn new(store: Arc<dyn KvStore>, members_bucket: impl Into<String>) -> Self {
        let members_bucket = members_bucket.into();
        Self {
            members: RecordStore::new(Arc::clone(&store), members_bucket.clone()),
            index: ReservationIndex::new(store, members_bucket),
        }
    }
}

impl MemberRepository for KvMemberRepository {
    fn get_member(&self, ctx: &OpContext, uid: MemberId) -> RepoResult<Versioned<CommitteeMember>> {
        self.members.get(ctx, &uid.to_string())
    }

    fn create_member(&self, ctx: &OpContext, member: &CommitteeMember) -> RepoResult<u64> {
        self.members.create(ctx, &member.uid.to_string(), member)
    }

    fn update_member(
        &self,
        ctx: &OpContext,
        member: &CommitteeMember,
        expected_revision: u64,
    ) -> RepoResult<u64> {
        self.members
            .update(ctx, &member.uid.to_string(), member, expected_revision)
    }

    fn delete_member(
        &self,
        ctx: &OpContext,
        uid: MemberId,
        expected_revision: u64,
    ) -> RepoResult<()> {
        self.members.delete(ctx, &uid.to_string(), expected_revision)
    }

    fn list_members(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
    ) -> RepoResult<Vec<Versioned<CommitteeMember>>> {
        // TODO: keep a per-committee key prefix so this does not scan the
        // whole members bucket.
        let mut members = self.members.list(ctx, |key| !is_index_key(key))?;
        members.retain(|member| member.value.committee_uid == committee_uid);
        Ok(members)
    }

    fn reserve_email(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        email: &str,
        owner: MemberId,
    ) -> RepoResult<Reservation> {
        self.index.reserve(
            ctx,
            &member_email_index_key(&committee_uid.to_string(), email),
            &owner.to_string(),
        )
    }

    fn release(&self, ctx: &OpContext, reservation: &Reservation) -> RepoResult<()> {
        self.index.release(ctx, reservation)
    }

    fn release_owned(&self, ctx: &OpContext, key: &str, owner: MemberId) -> RepoResult<bool> {
        self.index.release_owned(ctx, key, &owner.to_string())
    }
}
