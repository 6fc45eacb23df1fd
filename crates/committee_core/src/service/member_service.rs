//! Committee member orchestration.
//!
//! # Responsibility
//! - Create, read, update and delete members of an existing committee.
//! - Keep the `(committee_uid, email)` reservation in step with the record.
//!
//! # Invariants
//! - Category rules are checked against the stored committee before writing.
//! - Emails are compared after trim + lowercase.
//! - A member is only visible through the committee it references.

use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::index_key::member_email_index_key;
use crate::model::committee::{CommitteeBase, CommitteeId};
use crate::model::etag::parse_etag;
use crate::model::member::{CommitteeMember, MemberFields, MemberId};
use crate::repo::committee_repo::CommitteeRepository;
use crate::repo::member_repo::MemberRepository;
use crate::repo::record_store::Versioned;
use crate::service::notifier::{
    publish_best_effort, ChangeAction, ChangeMessage, ChangeNotifier, MEMBER_ACCESS_SUBJECT,
    MEMBER_INDEX_SUBJECT,
};
use crate::service::{lookup_error, log_outcome, reservation_error, CLEANUP_TIMEOUT};
use chrono::Utc;
use log::{debug, error, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Member service facade over member and committee repositories.
pub struct MemberService<M: MemberRepository, C: CommitteeRepository> {
    members: M,
    committees: C,
    notifier: Arc<dyn ChangeNotifier>,
}

impl<M: MemberRepository, C: CommitteeRepository> MemberService<M, C> {
    pub fn new(members: M, committees: C, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            members,
            committees,
            notifier,
        }
    }

    pub fn repository(&self) -> &M {
        &self.members
    }

    /// Adds a member to `committee_uid`.
    ///
    /// # Errors
    /// - `Validation` for a missing or malformed email, inverted date
    ///   ranges, or agency/country not matching the committee category.
    /// - `NotFound` when the committee does not exist.
    /// - `Conflict` when the email is already used in this committee.
    pub fn create_member(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        fields: MemberFields,
    ) -> CoreResult<Versioned<CommitteeMember>> {
        let started = Instant::now();
        let result = self.create_member_inner(ctx, committee_uid, fields);
        log_outcome(
            "member_create",
            started,
            result.as_ref().ok().map(|member| member.value.uid),
            &result,
        );
        result
    }

    fn create_member_inner(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        fields: MemberFields,
    ) -> CoreResult<Versioned<CommitteeMember>> {
        ctx.check()?;
        fields.validate()?;
        let committee = self.committee(ctx, committee_uid)?;
        fields.validate_for_committee(committee.is_government_advisory_council())?;

        let uid = Uuid::new_v4();
        let claim = self
            .members
            .reserve_email(ctx, committee_uid, &fields.email, uid)
            .map_err(|err| {
                reservation_error(
                    err,
                    || format!("member with this email already exists in committee {committee_uid}"),
                    "reserve member email",
                )
            })?;

        let member = CommitteeMember::new(uid, committee_uid, &committee.name, &fields, Utc::now());
        let revision = match self.members.create_member(ctx, &member) {
            Ok(revision) => revision,
            Err(err) => {
                let cleanup_ctx = OpContext::detached(CLEANUP_TIMEOUT);
                warn!("event=member_rollback module=service status=start uid={uid} key={}", claim.key);
                if let Err(release_err) = self.members.release(&cleanup_ctx, &claim) {
                    error!(
                        "event=member_rollback module=service status=error uid={uid} key={} error={release_err}",
                        claim.key
                    );
                }
                return Err(CoreError::unexpected("create member", err));
            }
        };

        let member = Versioned::new(member, revision);
        self.publish_member(ctx, ChangeAction::Created, &member.value);
        Ok(member)
    }

    /// Member `member_uid` of committee `committee_uid`.
    pub fn get_member(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        member_uid: MemberId,
    ) -> CoreResult<Versioned<CommitteeMember>> {
        ctx.check()?;
        let member = self
            .members
            .get_member(ctx, member_uid)
            .map_err(|err| lookup_error("member", member_uid, err))?;
        if member.value.committee_uid != committee_uid {
            return Err(CoreError::NotFound(format!(
                "member {member_uid} not found in committee {committee_uid}"
            )));
        }
        Ok(member)
    }

    pub fn list_members(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
    ) -> CoreResult<Vec<Versioned<CommitteeMember>>> {
        ctx.check()?;
        self.committee(ctx, committee_uid)?;
        self.members
            .list_members(ctx, committee_uid)
            .map_err(|err| CoreError::unexpected("list members", err))
    }

    /// Replaces the editable member fields under CAS. An email change claims
    /// the new address before the write and releases the old one after it.
    pub fn update_member(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        member_uid: MemberId,
        fields: MemberFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeMember>> {
        let started = Instant::now();
        let result = self.update_member_inner(ctx, committee_uid, member_uid, fields, etag);
        log_outcome("member_update", started, Some(member_uid), &result);
        result
    }

    fn update_member_inner(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        member_uid: MemberId,
        fields: MemberFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeMember>> {
        let expected_revision = parse_etag(etag)?;
        fields.validate()?;
        ctx.check()?;
        let committee = self.committee(ctx, committee_uid)?;
        fields.validate_for_committee(committee.is_government_advisory_council())?;

        let current = self.get_member(ctx, committee_uid, member_uid)?;
        if current.revision != expected_revision {
            return Err(CoreError::Conflict(format!(
                "member {member_uid} was modified; revision {expected_revision} is stale"
            )));
        }

        let mut updated = current.value.clone();
        updated.apply(&committee.name, &fields, Utc::now());

        let committee_key = committee_uid.to_string();
        let old_key = member_email_index_key(&committee_key, &current.value.email);
        let new_key = member_email_index_key(&committee_key, &updated.email);
        let claim = if old_key != new_key {
            Some(
                self.members
                    .reserve_email(ctx, committee_uid, &updated.email, member_uid)
                    .map_err(|err| {
                        reservation_error(
                            err,
                            || {
                                format!(
                                    "member with this email already exists in committee {committee_uid}"
                                )
                            },
                            "reserve member email",
                        )
                    })?,
            )
        } else {
            None
        };

        let revision = match self.members.update_member(ctx, &updated, expected_revision) {
            Ok(revision) => revision,
            Err(err) => {
                if let Some(claim) = &claim {
                    let cleanup_ctx = OpContext::detached(CLEANUP_TIMEOUT);
                    if let Err(release_err) = self.members.release(&cleanup_ctx, claim) {
                        error!(
                            "event=member_rollback module=service status=error uid={member_uid} key={} error={release_err}",
                            claim.key
                        );
                    }
                }
                return Err(CoreError::from_repo("update member", err));
            }
        };

        if claim.is_some() {
            self.release_owned_key(member_uid, &old_key);
        }

        let updated = Versioned::new(updated, revision);
        self.publish_member(ctx, ChangeAction::Updated, &updated.value);
        Ok(updated)
    }

    /// Deletes the member under CAS and frees its email for the committee.
    pub fn delete_member(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        member_uid: MemberId,
        etag: Option<&str>,
    ) -> CoreResult<()> {
        let started = Instant::now();
        let result = self.delete_member_inner(ctx, committee_uid, member_uid, etag);
        log_outcome("member_delete", started, Some(member_uid), &result);
        result
    }

    fn delete_member_inner(
        &self,
        ctx: &OpContext,
        committee_uid: CommitteeId,
        member_uid: MemberId,
        etag: Option<&str>,
    ) -> CoreResult<()> {
        let expected_revision = parse_etag(etag)?;
        ctx.check()?;
        let current = self.get_member(ctx, committee_uid, member_uid)?;
        self.members
            .delete_member(ctx, member_uid, expected_revision)
            .map_err(|err| CoreError::from_repo("delete member", err))?;

        self.release_owned_key(
            member_uid,
            &member_email_index_key(&committee_uid.to_string(), &current.value.email),
        );

        let message = ChangeMessage::new(ChangeAction::Deleted, member_uid.to_string())
            .with_committee(committee_uid.to_string());
        publish_best_effort(self.notifier.as_ref(), ctx, MEMBER_INDEX_SUBJECT, &message);
        publish_best_effort(self.notifier.as_ref(), ctx, MEMBER_ACCESS_SUBJECT, &message);
        Ok(())
    }

    fn committee(&self, ctx: &OpContext, committee_uid: CommitteeId) -> CoreResult<CommitteeBase> {
        self.committees
            .get_base(ctx, committee_uid)
            .map(|base| base.value)
            .map_err(|err| lookup_error("committee", committee_uid, err))
    }

    fn release_owned_key(&self, member_uid: MemberId, key: &str) {
        let ctx = OpContext::detached(CLEANUP_TIMEOUT);
        match self.members.release_owned(&ctx, key, member_uid) {
            Ok(released) => debug!(
                "event=member_reservation_release module=service status=ok uid={member_uid} key={key} released={released}"
            ),
            Err(err) => error!(
                "event=member_reservation_release module=service status=error uid={member_uid} key={key} error={err}"
            ),
        }
    }

    fn publish_member(&self, ctx: &OpContext, action: ChangeAction, member: &CommitteeMember) {
        let uid = member.uid.to_string();
        let committee_uid = member.committee_uid.to_string();
        if let Ok(data) = serde_json::to_value(member) {
            publish_best_effort(
                self.notifier.as_ref(),
                ctx,
                MEMBER_INDEX_SUBJECT,
                &ChangeMessage::new(action, uid.clone())
                    .with_committee(committee_uid.clone())
                    .with_data(data),
            );
        }
        publish_best_effort(
            self.notifier.as_ref(),
            ctx,
            MEMBER_ACCESS_SUBJECT,
            &ChangeMessage::new(action, uid)
                .with_committee(committee_uid)
                .with_data(json!({ "username": member.username })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::MemberService;
    use crate::context::OpContext;
    use crate::error::ErrorKind;
    use crate::kv::{KvStore, MemoryKvStore};
    use crate::model::committee::{CommitteeBase, CommitteeFields, GOVERNMENT_ADVISORY_COUNCIL};
    use crate::model::member::MemberFields;
    use crate::repo::committee_repo::{CommitteeRepository, KvCommitteeRepository};
    use crate::repo::member_repo::KvMemberRepository;
    use crate::service::notifier::MemoryNotifier;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn setup(category: &str) -> (MemberService<KvMemberRepository, KvCommitteeRepository>, Uuid) {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let committees = KvCommitteeRepository::new(Arc::clone(&store), "committees", "settings");
        let uid = Uuid::new_v4();
        let fields = CommitteeFields {
            project_uid: "p1".to_string(),
            name: "Board".to_string(),
            category: category.to_string(),
            ..CommitteeFields::default()
        };
        committees
            .create_base(&OpContext::background(), &CommitteeBase::new(uid, &fields, Utc::now()))
            .unwrap();
        let members = KvMemberRepository::new(store, "members");
        let service = MemberService::new(members, committees, Arc::new(MemoryNotifier::new()));
        (service, uid)
    }

    fn member(email: &str) -> MemberFields {
        MemberFields {
            email: email.to_string(),
            ..MemberFields::default()
        }
    }

    #[test]
    fn create_normalizes_email_and_copies_committee_name() {
        let (service, committee_uid) = setup("Board");
        let ctx = OpContext::background();
        let created = service
            .create_member(&ctx, committee_uid, member("  Jane@Example.COM "))
            .unwrap();
        assert_eq!(created.value.email, "jane@example.com");
        assert_eq!(created.value.committee_name, "Board");
    }

    #[test]
    fn gac_member_needs_agency_and_country() {
        let (service, committee_uid) = setup(GOVERNMENT_ADVISORY_COUNCIL);
        let ctx = OpContext::background();
        let err = service
            .create_member(&ctx, committee_uid, member("jane@example.com"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut fields = member("jane@example.com");
        fields.agency = Some("Ministry".to_string());
        fields.country = Some("FR".to_string());
        service.create_member(&ctx, committee_uid, fields).unwrap();
    }

    #[test]
    fn member_of_other_committee_is_not_found() {
        let (service, committee_uid) = setup("Board");
        let ctx = OpContext::background();
        let created = service
            .create_member(&ctx, committee_uid, member("jane@example.com"))
            .unwrap();
        let err = service
            .get_member(&ctx, Uuid::new_v4(), created.value.uid)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unknown_committee_is_not_found() {
        let (service, _) = setup("Board");
        let err = service
            .create_member(&OpContext::background(), Uuid::new_v4(), member("a@b.c"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
