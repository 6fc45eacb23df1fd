//! Caller-facing error taxonomy.
//!
//! # Invariants
//! - Validation failures are reported before any write happens.
//! - Uniqueness and stale-revision failures are both `Conflict`.
//! - Cancelled or expired contexts are reported as `Cancelled`, never as
//!   backend failures.

use crate::context::ContextError;
use crate::model::committee::CommitteeValidationError;
use crate::model::etag::EtagError;
use crate::model::member::MemberValidationError;
use crate::repo::RepoError;
use crate::service::sso_group::SsoGroupNameError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse error class callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unexpected,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unexpected => "unexpected",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug)]
pub enum CoreError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Unexpected(String),
    Cancelled(ContextError),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Unexpected(_) => ErrorKind::Unexpected,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Maps a repository failure whose semantic variants need no
    /// operation-specific wording.
    pub(crate) fn from_repo(context: &str, err: RepoError) -> Self {
        if let Some(ctx_err) = err.context_error() {
            return Self::Cancelled(ctx_err);
        }
        match err {
            RepoError::NotFound { .. } => Self::NotFound(format!("{context}: {err}")),
            RepoError::AlreadyExists { .. } | RepoError::RevisionMismatch { .. } => {
                Self::Conflict(format!("{context}: {err}"))
            }
            other => Self::Unexpected(format!("{context}: {other}")),
        }
    }

    /// Maps a repository failure where only cancellation keeps its own kind.
    pub(crate) fn unexpected(context: &str, err: RepoError) -> Self {
        match err.context_error() {
            Some(ctx_err) => Self::Cancelled(ctx_err),
            None => Self::Unexpected(format!("{context}: {err}")),
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message)
            | Self::NotFound(message)
            | Self::Conflict(message)
            | Self::Unexpected(message) => write!(f, "{message}"),
            Self::Cancelled(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Cancelled(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContextError> for CoreError {
    fn from(value: ContextError) -> Self {
        Self::Cancelled(value)
    }
}

impl From<EtagError> for CoreError {
    fn from(value: EtagError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<CommitteeValidationError> for CoreError {
    fn from(value: CommitteeValidationError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<MemberValidationError> for CoreError {
    fn from(value: MemberValidationError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<SsoGroupNameError> for CoreError {
    fn from(value: SsoGroupNameError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreError, ErrorKind};
    use crate::context::ContextError;
    use crate::kv::KvError;
    use crate::model::etag::EtagError;
    use crate::repo::RepoError;

    #[test]
    fn etag_errors_are_validation() {
        let err = CoreError::from(EtagError::Missing);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "ETag is required");
    }

    #[test]
    fn stale_revision_maps_to_conflict() {
        let err = CoreError::from_repo(
            "update committee",
            RepoError::RevisionMismatch {
                bucket: "committees".into(),
                key: "k".into(),
                expected: 1,
                actual: 2,
            },
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn context_errors_stay_cancelled() {
        let err = CoreError::unexpected(
            "check",
            RepoError::Kv(KvError::Context(ContextError::DeadlineExceeded)),
        );
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
