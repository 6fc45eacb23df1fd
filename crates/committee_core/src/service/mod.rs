//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into committee and member use cases.
//! - Keep callers decoupled from buckets, index keys and store revisions.
//!
//! # Invariants
//! - Every write path emits one metadata-only `event=` log line.
//! - Compensating writes run on a detached context so a cancelled caller
//!   cannot strand partial state.

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::kv::KvStore;
use crate::repo::committee_repo::KvCommitteeRepository;
use crate::repo::member_repo::KvMemberRepository;
use crate::repo::RepoError;
use log::{info, warn};
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod committee_service;
pub mod member_service;
pub mod notifier;
pub mod project;
pub mod sso_group;

use committee_service::CommitteeService;
use member_service::MemberService;
use notifier::ChangeNotifier;
use project::ProjectReader;

/// Budget for rollback and post-commit cleanup writes.
pub(crate) const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Both services wired onto one store and one bucket layout.
pub struct CoreServices {
    pub committees: CommitteeService<KvCommitteeRepository>,
    pub members: MemberService<KvMemberRepository, KvCommitteeRepository>,
}

impl CoreServices {
    pub fn new(
        config: &CoreConfig,
        store: Arc<dyn KvStore>,
        projects: Arc<dyn ProjectReader>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        let committee_repo = KvCommitteeRepository::new(
            Arc::clone(&store),
            config.buckets.committees.clone(),
            config.buckets.committee_settings.clone(),
        );
        let member_repo = KvMemberRepository::new(store, config.buckets.committee_members.clone());

        Self {
            committees: CommitteeService::new(
                committee_repo.clone(),
                projects,
                Arc::clone(&notifier),
            )
            .with_allocator(config.allocator.clone()),
            members: MemberService::new(member_repo, committee_repo, notifier),
        }
    }
}

/// Maps a lookup failure, naming the missing entity for `NotFound`.
pub(crate) fn lookup_error(entity: &str, uid: impl Display, err: RepoError) -> CoreError {
    if err.is_not_found() {
        return CoreError::NotFound(format!("{entity} {uid} not found"));
    }
    CoreError::unexpected(&format!("read {entity} {uid}"), err)
}

/// Maps a reservation failure; a held key becomes `Conflict(message)`.
pub(crate) fn reservation_error(
    err: RepoError,
    conflict_message: impl FnOnce() -> String,
    context: &str,
) -> CoreError {
    if err.is_conflict() {
        return CoreError::Conflict(conflict_message());
    }
    CoreError::unexpected(context, err)
}

/// Emits the single outcome line of a service operation.
pub(crate) fn log_outcome<T>(
    event: &str,
    started: Instant,
    uid: Option<impl Display>,
    result: &CoreResult<T>,
) {
    let uid = uid
        .map(|uid| uid.to_string())
        .unwrap_or_else(|| "-".to_string());
    let duration_ms = started.elapsed().as_millis();
    match result {
        Ok(_) => info!("event={event} module=service status=ok uid={uid} duration_ms={duration_ms}"),
        Err(err) => match err.kind() {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict => info!(
                "event={event} module=service status=rejected uid={uid} error_kind={} duration_ms={duration_ms}",
                err.kind().as_str()
            ),
            ErrorKind::Unexpected | ErrorKind::Cancelled => warn!(
                "event={event} module=service status=error uid={uid} error_kind={} duration_ms={duration_ms}",
                err.kind().as_str()
            ),
        },
    }
}
