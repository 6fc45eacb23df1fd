//! Committee aggregate orchestration.
//!
//! # Responsibility
//! - Create, read, update and delete the two-record committee aggregate.
//! - Claim and release the name and SSO group reservations around writes.
//! - Publish change messages once a write has committed.
//!
//! # Invariants
//! - Validation and ETag parsing finish before the first storage write.
//! - A failed create leaves no base, settings or reservation behind:
//!   reservations are released and an already written base is deleted with
//!   the revision its create returned.
//! - `(project_uid, normalized name)` and `sso_group_name` are each held by
//!   at most one live committee.
//! - Updates keep `uid`, `sso_group_name`, counters and `created_at`.

use crate::config::AllocatorPolicy;
use crate::context::OpContext;
use crate::error::{CoreError, CoreResult};
use crate::index_key::{committee_name_index_key, sso_group_index_key};
use crate::model::committee::{
    CommitteeBase, CommitteeFields, CommitteeId, CommitteeSettings, NewCommittee, SettingsFields,
};
use crate::model::etag::parse_etag;
use crate::repo::committee_repo::CommitteeRepository;
use crate::repo::record_store::Versioned;
use crate::repo::reservation::Reservation;
use crate::repo::RepoError;
use crate::service::notifier::{
    publish_best_effort, ChangeAction, ChangeMessage, ChangeNotifier, COMMITTEE_ACCESS_SUBJECT,
    COMMITTEE_INDEX_SUBJECT,
};
use crate::service::project::{ProjectReadError, ProjectReader};
use crate::service::sso_group::next_sso_group_name;
use crate::service::{lookup_error, log_outcome, reservation_error, CLEANUP_TIMEOUT};
use chrono::Utc;
use log::{debug, error, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const SETTINGS_PURGE_ATTEMPTS: usize = 3;

/// Base record plus its settings, each with its own revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeRecord {
    pub base: Versioned<CommitteeBase>,
    /// `None` when the settings record is missing.
    pub settings: Option<Versioned<CommitteeSettings>>,
}

/// Committee service facade over a repository implementation.
pub struct CommitteeService<R: CommitteeRepository> {
    repo: R,
    projects: Arc<dyn ProjectReader>,
    notifier: Arc<dyn ChangeNotifier>,
    allocator: AllocatorPolicy,
}

impl<R: CommitteeRepository> CommitteeService<R> {
    pub fn new(repo: R, projects: Arc<dyn ProjectReader>, notifier: Arc<dyn ChangeNotifier>) -> Self {
        Self {
            repo,
            projects,
            notifier,
            allocator: AllocatorPolicy::default(),
        }
    }

    pub fn with_allocator(mut self, allocator: AllocatorPolicy) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Creates base and settings for a new committee.
    ///
    /// # Errors
    /// - `Validation` for bad fields or an unusable SSO group name.
    /// - `NotFound` when the project or parent committee does not exist.
    /// - `Conflict` when the project already has a committee with this name.
    /// - `Unexpected` when the SSO group name is claimed concurrently, the
    ///   allocator runs out of attempts, or a storage write fails.
    pub fn create_committee(&self, ctx: &OpContext, input: NewCommittee) -> CoreResult<CommitteeRecord> {
        let started = Instant::now();
        let result = self.create_committee_inner(ctx, input);
        log_outcome(
            "committee_create",
            started,
            result.as_ref().ok().map(|record| record.base.value.uid),
            &result,
        );
        result
    }

    fn create_committee_inner(&self, ctx: &OpContext, input: NewCommittee) -> CoreResult<CommitteeRecord> {
        ctx.check()?;
        input.fields.validate()?;
        let project_slug = self.project_slug(ctx, &input.fields.project_uid)?;
        if let Some(parent_uid) = input.fields.parent_uid {
            self.ensure_parent(ctx, parent_uid)?;
        }

        // The UID is minted up front: reservations record it as their owner.
        let uid = Uuid::new_v4();
        let now = Utc::now();
        let mut base = CommitteeBase::new(uid, &input.fields, now);
        if base.sso_group_enabled {
            base.sso_group_name =
                Some(self.allocate_sso_group_name(ctx, &project_slug, &base.name, None)?);
        }

        let name_claim = self
            .repo
            .reserve_name(ctx, &base.project_uid, &base.name, uid)
            .map_err(|err| {
                reservation_error(
                    err,
                    || format!("committee name already exists in project {}", base.project_uid),
                    "reserve committee name",
                )
            })?;
        let mut claims = vec![name_claim];

        if let Some(sso_group_name) = base.sso_group_name.as_deref() {
            match self.repo.reserve_sso_group(ctx, sso_group_name, uid) {
                Ok(claim) => claims.push(claim),
                Err(err) => {
                    self.release_claims(uid, &claims);
                    return Err(if err.is_conflict() {
                        CoreError::Unexpected(
                            "SSO group name was claimed concurrently; retry the create".to_string(),
                        )
                    } else {
                        CoreError::unexpected("reserve SSO group name", err)
                    });
                }
            }
        }

        let base_revision = match self.repo.create_base(ctx, &base) {
            Ok(revision) => revision,
            Err(err) => {
                self.release_claims(uid, &claims);
                return Err(CoreError::unexpected("create committee base", err));
            }
        };

        let settings = CommitteeSettings::new(uid, &input.settings, now);
        let settings_revision = match self.repo.create_settings(ctx, &settings) {
            Ok(revision) => revision,
            Err(err) => {
                self.compensate_base(uid, base_revision);
                self.release_claims(uid, &claims);
                return Err(CoreError::unexpected("create committee settings", err));
            }
        };

        let record = CommitteeRecord {
            base: Versioned::new(base, base_revision),
            settings: Some(Versioned::new(settings, settings_revision)),
        };
        self.publish_committee(ctx, ChangeAction::Created, &record.base.value, record.settings.as_ref());
        Ok(record)
    }

    pub fn get_committee_base(&self, ctx: &OpContext, uid: CommitteeId) -> CoreResult<Versioned<CommitteeBase>> {
        ctx.check()?;
        self.repo
            .get_base(ctx, uid)
            .map_err(|err| lookup_error("committee", uid, err))
    }

    pub fn get_committee_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
    ) -> CoreResult<Versioned<CommitteeSettings>> {
        ctx.check()?;
        self.repo
            .get_settings(ctx, uid)
            .map_err(|err| lookup_error("committee settings for", uid, err))
    }

    /// Base plus settings. Missing settings are reported as `None`.
    pub fn get_committee(&self, ctx: &OpContext, uid: CommitteeId) -> CoreResult<CommitteeRecord> {
        let base = self.get_committee_base(ctx, uid)?;
        let settings = match self.repo.get_settings(ctx, uid) {
            Ok(settings) => Some(settings),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(CoreError::unexpected("read committee settings", err)),
        };
        Ok(CommitteeRecord { base, settings })
    }

    /// All committee bases in UID order, optionally limited to one project.
    pub fn list_committees(
        &self,
        ctx: &OpContext,
        project_uid: Option<&str>,
    ) -> CoreResult<Vec<Versioned<CommitteeBase>>> {
        ctx.check()?;
        let mut bases = self
            .repo
            .list_bases(ctx)
            .map_err(|err| CoreError::unexpected("list committees", err))?;
        if let Some(project_uid) = project_uid.map(str::trim) {
            bases.retain(|base| base.value.project_uid == project_uid);
        }
        Ok(bases)
    }

    /// Replaces the editable base fields under CAS.
    ///
    /// A rename claims the new name before the write and releases the old
    /// one after it. Enabling SSO on a committee without a group name
    /// allocates one.
    pub fn update_committee_base(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        fields: CommitteeFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeBase>> {
        let started = Instant::now();
        let result = self.update_committee_base_inner(ctx, uid, fields, etag);
        log_outcome("committee_base_update", started, Some(uid), &result);
        result
    }

    fn update_committee_base_inner(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        fields: CommitteeFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeBase>> {
        let expected_revision = parse_etag(etag)?;
        fields.validate_for(uid)?;
        ctx.check()?;
        let project_slug = self.project_slug(ctx, &fields.project_uid)?;
        if let Some(parent_uid) = fields.parent_uid {
            self.ensure_parent(ctx, parent_uid)?;
        }

        let current = self
            .repo
            .get_base(ctx, uid)
            .map_err(|err| lookup_error("committee", uid, err))?;
        if current.revision != expected_revision {
            return Err(stale_etag("committee", uid, expected_revision));
        }

        let mut updated = current.value.clone();
        updated.apply(&fields, Utc::now());

        let old_name_key = committee_name_index_key(&current.value.project_uid, &current.value.name);
        let new_name_key = committee_name_index_key(&updated.project_uid, &updated.name);
        let renamed = old_name_key != new_name_key;

        let mut claims = Vec::new();
        if renamed {
            let claim = self
                .repo
                .reserve_name(ctx, &updated.project_uid, &updated.name, uid)
                .map_err(|err| {
                    reservation_error(
                        err,
                        || format!("committee name already exists in project {}", updated.project_uid),
                        "reserve committee name",
                    )
                })?;
            claims.push(claim);
        }

        if updated.sso_group_enabled && updated.sso_group_name.is_none() {
            let claimed = self
                .allocate_sso_group_name(ctx, &project_slug, &updated.name, None)
                .and_then(|name| {
                    self.repo
                        .reserve_sso_group(ctx, &name, uid)
                        .map_err(|err| {
                            if err.is_conflict() {
                                CoreError::Unexpected(
                                    "SSO group name was claimed concurrently; retry the update"
                                        .to_string(),
                                )
                            } else {
                                CoreError::unexpected("reserve SSO group name", err)
                            }
                        })
                        .map(|claim| (name, claim))
                });
            match claimed {
                Ok((name, claim)) => {
                    updated.sso_group_name = Some(name);
                    claims.push(claim);
                }
                Err(err) => {
                    self.release_claims(uid, &claims);
                    return Err(err);
                }
            }
        }

        let revision = match self.repo.update_base(ctx, &updated, expected_revision) {
            Ok(revision) => revision,
            Err(err) => {
                self.release_claims(uid, &claims);
                return Err(CoreError::from_repo("update committee base", err));
            }
        };

        if renamed {
            self.release_owned_key(uid, &old_name_key);
        }

        let updated = Versioned::new(updated, revision);
        self.publish_committee(ctx, ChangeAction::Updated, &updated.value, None);
        Ok(updated)
    }

    /// Replaces the settings record under CAS. The base must still exist.
    pub fn update_committee_settings(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        fields: SettingsFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeSettings>> {
        let started = Instant::now();
        let result = self.update_committee_settings_inner(ctx, uid, fields, etag);
        log_outcome("committee_settings_update", started, Some(uid), &result);
        result
    }

    fn update_committee_settings_inner(
        &self,
        ctx: &OpContext,
        uid: CommitteeId,
        fields: SettingsFields,
        etag: Option<&str>,
    ) -> CoreResult<Versioned<CommitteeSettings>> {
        let expected_revision = parse_etag(etag)?;
        ctx.check()?;
        let base = self
            .repo
            .get_base(ctx, uid)
            .map_err(|err| lookup_error("committee", uid, err))?;
        let current = self
            .repo
            .get_settings(ctx, uid)
            .map_err(|err| lookup_error("committee settings for", uid, err))?;

        let mut updated = current.value;
        updated.apply(&fields, Utc::now());
        let revision = self
            .repo
            .update_settings(ctx, &updated, expected_revision)
            .map_err(|err| CoreError::from_repo("update committee settings", err))?;

        let updated = Versioned::new(updated, revision);
        publish_best_effort(
            self.notifier.as_ref(),
            ctx,
            COMMITTEE_ACCESS_SUBJECT,
            &ChangeMessage::new(ChangeAction::Updated, uid.to_string())
                .with_data(access_data(&base.value, Some(&updated.value))),
        );
        Ok(updated)
    }

    /// Deletes base, then settings, then both reservations.
    ///
    /// Settings that are already gone do not fail the delete.
    pub fn delete_committee(&self, ctx: &OpContext, uid: CommitteeId, etag: Option<&str>) -> CoreResult<()> {
        let started = Instant::now();
        let result = self.delete_committee_inner(ctx, uid, etag);
        log_outcome("committee_delete", started, Some(uid), &result);
        result
    }

    fn delete_committee_inner(&self, ctx: &OpContext, uid: CommitteeId, etag: Option<&str>) -> CoreResult<()> {
        let expected_revision = parse_etag(etag)?;
        ctx.check()?;
        let current = self
            .repo
            .get_base(ctx, uid)
            .map_err(|err| lookup_error("committee", uid, err))?;
        self.repo
            .delete_base(ctx, uid, expected_revision)
            .map_err(|err| CoreError::from_repo("delete committee base", err))?;

        // Base is gone; remaining cleanup must not depend on the caller's
        // deadline.
        let cleanup_ctx = OpContext::detached(CLEANUP_TIMEOUT);
        let settings_result = self.purge_settings(&cleanup_ctx, uid);

        self.release_owned_key(
            uid,
            &committee_name_index_key(&current.value.project_uid, &current.value.name),
        );
        if let Some(sso_group_name) = current.value.sso_group_name.as_deref() {
            self.release_owned_key(uid, &sso_group_index_key(sso_group_name));
        }

        // Base is gone; announce it even if the settings purge failed.
        let message = ChangeMessage::new(ChangeAction::Deleted, uid.to_string());
        publish_best_effort(self.notifier.as_ref(), ctx, COMMITTEE_INDEX_SUBJECT, &message);
        publish_best_effort(self.notifier.as_ref(), ctx, COMMITTEE_ACCESS_SUBJECT, &message);
        settings_result
    }

    fn purge_settings(&self, ctx: &OpContext, uid: CommitteeId) -> CoreResult<()> {
        for _ in 0..SETTINGS_PURGE_ATTEMPTS {
            let settings = match self.repo.get_settings(ctx, uid) {
                Ok(settings) => settings,
                Err(err) if err.is_not_found() => {
                    debug!("event=committee_settings_purge module=service status=absent uid={uid}");
                    return Ok(());
                }
                Err(err) => return Err(CoreError::unexpected("read committee settings", err)),
            };
            match self.repo.delete_settings(ctx, uid, settings.revision) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_not_found() => return Ok(()),
                Err(RepoError::RevisionMismatch { .. }) => continue,
                Err(err) => {
                    error!("event=committee_settings_purge module=service status=error uid={uid} error={err}");
                    return Err(CoreError::unexpected("delete committee settings", err));
                }
            }
        }
        Err(CoreError::Unexpected(format!(
            "committee settings for {uid} kept changing during delete"
        )))
    }

    /// Walks `<slug>-1`, `<slug>-2`, ... until a free name shows up or the
    /// attempt budget runs out.
    fn allocate_sso_group_name(
        &self,
        ctx: &OpContext,
        project_slug: &str,
        committee_name: &str,
        current: Option<&str>,
    ) -> CoreResult<String> {
        let max_attempts = self.allocator.max_attempts.max(1);
        let mut candidate = next_sso_group_name(project_slug, committee_name, current)?;
        for attempt in 1..=max_attempts {
            ctx.check()?;
            let taken = self
                .repo
                .sso_group_reserved(ctx, &candidate)
                .map_err(|err| CoreError::unexpected("check SSO group name availability", err))?;
            if !taken {
                return Ok(candidate);
            }
            debug!("event=sso_group_allocate module=service status=taken attempt={attempt}");
            if attempt < max_attempts {
                ctx.sleep(self.allocator.backoff_for(attempt))?;
            }
            candidate = next_sso_group_name(project_slug, committee_name, Some(&candidate))?;
        }
        Err(CoreError::Unexpected(format!(
            "no free SSO group name after {max_attempts} attempts"
        )))
    }

    fn project_slug(&self, ctx: &OpContext, project_uid: &str) -> CoreResult<String> {
        match self.projects.project_slug(ctx, project_uid.trim()) {
            Ok(slug) => Ok(slug),
            Err(ProjectReadError::NotFound(uid)) => {
                Err(CoreError::NotFound(format!("project {uid} not found")))
            }
            Err(ProjectReadError::Context(err)) => Err(CoreError::Cancelled(err)),
            Err(err) => Err(CoreError::Unexpected(format!("read project: {err}"))),
        }
    }

    fn ensure_parent(&self, ctx: &OpContext, parent_uid: CommitteeId) -> CoreResult<()> {
        self.repo
            .get_base(ctx, parent_uid)
            .map(|_| ())
            .map_err(|err| lookup_error("parent committee", parent_uid, err))
    }

    fn compensate_base(&self, uid: CommitteeId, revision: u64) {
        let ctx = OpContext::detached(CLEANUP_TIMEOUT);
        warn!("event=committee_rollback module=service status=start uid={uid} step=base revision={revision}");
        if let Err(err) = self.repo.delete_base(&ctx, uid, revision) {
            error!("event=committee_rollback module=service status=error uid={uid} step=base error={err}");
        }
    }

    fn release_claims(&self, uid: CommitteeId, claims: &[Reservation]) {
        if claims.is_empty() {
            return;
        }
        let ctx = OpContext::detached(CLEANUP_TIMEOUT);
        for claim in claims.iter().rev() {
            warn!(
                "event=committee_rollback module=service status=start uid={uid} step=reservation key={}",
                claim.key
            );
            if let Err(err) = self.repo.release(&ctx, claim) {
                error!(
                    "event=committee_rollback module=service status=error uid={uid} step=reservation key={} error={err}",
                    claim.key
                );
            }
        }
    }

    /// Post-commit release of a key this committee may still hold.
    fn release_owned_key(&self, uid: CommitteeId, key: &str) {
        let ctx = OpContext::detached(CLEANUP_TIMEOUT);
        match self.repo.release_owned(&ctx, key, uid) {
            Ok(released) => debug!(
                "event=committee_reservation_release module=service status=ok uid={uid} key={key} released={released}"
            ),
            Err(err) => error!(
                "event=committee_reservation_release module=service status=error uid={uid} key={key} error={err}"
            ),
        }
    }

    fn publish_committee(
        &self,
        ctx: &OpContext,
        action: ChangeAction,
        base: &CommitteeBase,
        settings: Option<&Versioned<CommitteeSettings>>,
    ) {
        let uid = base.uid.to_string();
        if let Ok(data) = serde_json::to_value(base) {
            publish_best_effort(
                self.notifier.as_ref(),
                ctx,
                COMMITTEE_INDEX_SUBJECT,
                &ChangeMessage::new(action, uid.clone()).with_data(data),
            );
        }
        publish_best_effort(
            self.notifier.as_ref(),
            ctx,
            COMMITTEE_ACCESS_SUBJECT,
            &ChangeMessage::new(action, uid)
                .with_data(access_data(base, settings.map(|settings| &settings.value))),
        );
    }
}

fn stale_etag(entity: &str, uid: CommitteeId, expected: u64) -> CoreError {
    CoreError::Conflict(format!(
        "{entity} {uid} was modified; revision {expected} is stale"
    ))
}

/// Access-control view: visibility, hierarchy and principals.
fn access_data(base: &CommitteeBase, settings: Option<&CommitteeSettings>) -> serde_json::Value {
    let mut data = json!({
        "project_uid": base.project_uid,
        "parent_uid": base.parent_uid,
        "public": base.public,
    });
    if let (Some(settings), Some(object)) = (settings, data.as_object_mut()) {
        object.insert("writers".to_string(), json!(settings.writers));
        object.insert("auditors".to_string(), json!(settings.auditors));
    }
    data
}

#[cfg(test)]
mod tests {
    use super::CommitteeService;
    use crate::config::AllocatorPolicy;
    use crate::context::OpContext;
    use crate::error::ErrorKind;
    use crate::kv::MemoryKvStore;
    use crate::model::committee::{CommitteeFields, NewCommittee};
    use crate::repo::committee_repo::{CommitteeRepository, KvCommitteeRepository};
    use crate::service::notifier::{
        ChangeAction, MemoryNotifier, COMMITTEE_ACCESS_SUBJECT, COMMITTEE_INDEX_SUBJECT,
    };
    use crate::service::project::MemoryProjectReader;
    use std::sync::Arc;
    use uuid::Uuid;

    fn service() -> (CommitteeService<KvCommitteeRepository>, Arc<MemoryNotifier>) {
        let store = Arc::new(MemoryKvStore::new());
        let projects = Arc::new(MemoryProjectReader::new());
        projects.insert("p1", "proj");
        let notifier = Arc::new(MemoryNotifier::new());
        let repo = KvCommitteeRepository::new(store, "committees", "committee-settings");
        let service = CommitteeService::new(repo, projects, notifier.clone()).with_allocator(
            AllocatorPolicy {
                max_attempts: 3,
                initial_backoff_ms: 0,
                max_backoff_ms: 0,
            },
        );
        (service, notifier)
    }

    fn new_committee(name: &str, sso: bool) -> NewCommittee {
        NewCommittee {
            fields: CommitteeFields {
                project_uid: "p1".to_string(),
                name: name.to_string(),
                category: "Working Group".to_string(),
                sso_group_enabled: sso,
                ..CommitteeFields::default()
            },
            ..NewCommittee::default()
        }
    }

    #[test]
    fn create_assigns_first_sso_group_name_and_publishes() {
        let (service, notifier) = service();
        let ctx = OpContext::background();
        let record = service
            .create_committee(&ctx, new_committee("Security", true))
            .unwrap();
        assert_eq!(record.base.value.sso_group_name.as_deref(), Some("proj-security-1"));
        assert_eq!(record.settings.as_ref().unwrap().value.uid, record.base.value.uid);

        let index = notifier.messages_for(COMMITTEE_INDEX_SUBJECT);
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].action, ChangeAction::Created);
        assert_eq!(notifier.messages_for(COMMITTEE_ACCESS_SUBJECT).len(), 1);
    }

    #[test]
    fn allocator_skips_taken_names() {
        let (service, _) = service();
        let ctx = OpContext::background();
        service
            .repository()
            .reserve_sso_group(&ctx, "proj-security-1", Uuid::new_v4())
            .unwrap();
        let record = service
            .create_committee(&ctx, new_committee("Security", true))
            .unwrap();
        assert_eq!(record.base.value.sso_group_name.as_deref(), Some("proj-security-2"));
    }

    #[test]
    fn allocator_gives_up_after_budget() {
        let (service, _) = service();
        let ctx = OpContext::background();
        for index in 1..=3 {
            service
                .repository()
                .reserve_sso_group(&ctx, &format!("proj-security-{index}"), Uuid::new_v4())
                .unwrap();
        }
        let err = service
            .create_committee(&ctx, new_committee("Security", true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(service.list_committees(&ctx, None).unwrap().is_empty());
    }

    #[test]
    fn update_with_matching_name_keeps_reservation() {
        let (service, _) = service();
        let ctx = OpContext::background();
        let record = service
            .create_committee(&ctx, new_committee("Security", false))
            .unwrap();
        let uid = record.base.value.uid;

        let mut fields = new_committee("Security", false).fields;
        fields.description = Some("updated".to_string());
        let updated = service
            .update_committee_base(&ctx, uid, fields, Some(&record.base.etag()))
            .unwrap();
        assert!(updated.revision > record.base.revision);

        let err = service
            .create_committee(&ctx, new_committee(" SECURITY ", false))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn cancelled_context_is_reported_as_cancelled() {
        let (service, _) = service();
        let ctx = OpContext::background();
        ctx.cancel();
        let err = service
            .create_committee(&ctx, new_committee("Security", false))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
