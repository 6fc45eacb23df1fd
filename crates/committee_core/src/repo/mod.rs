//! Repository layer over the versioned store.
//!
//! # Responsibility
//! - Map typed records onto store buckets and keys.
//! - Emulate unique constraints with create-if-absent reservations.
//! - Return semantic errors (`NotFound`, `AlreadyExists`, `RevisionMismatch`)
//!   in addition to backend transport errors.
//!
//! # Invariants
//! - Every read returns the record together with its store revision.
//! - Updates and deletes are always CAS-gated by a caller revision.

use crate::context::ContextError;
use crate::kv::KvError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod committee_repo;
pub mod member_repo;
pub mod record_store;
pub mod reservation;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug)]
pub enum RepoError {
    NotFound {
        bucket: String,
        key: String,
    },
    AlreadyExists {
        bucket: String,
        key: String,
    },
    RevisionMismatch {
        bucket: String,
        key: String,
        expected: u64,
        actual: u64,
    },
    /// Stored bytes do not decode into the expected record type.
    Codec {
        bucket: String,
        key: String,
        source: serde_json::Error,
    },
    Kv(KvError),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Uniqueness or CAS failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::RevisionMismatch { .. }
        )
    }

    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Kv(KvError::Context(err)) => Some(*err),
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { bucket, key } => write!(f, "record not found: {bucket}/{key}"),
            Self::AlreadyExists { bucket, key } => {
                write!(f, "record already exists: {bucket}/{key}")
            }
            Self::RevisionMismatch {
                bucket,
                key,
                expected,
                actual,
            } => write!(
                f,
                "stale revision for {bucket}/{key}: expected {expected}, stored {actual}"
            ),
            Self::Codec {
                bucket,
                key,
                source,
            } => write!(f, "invalid record data at {bucket}/{key}: {source}"),
            Self::Kv(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec { source, .. } => Some(source),
            Self::Kv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<KvError> for RepoError {
    fn from(value: KvError) -> Self {
        match value {
            KvError::NotFound { bucket, key } => Self::NotFound { bucket, key },
            KvError::AlreadyExists { bucket, key } => Self::AlreadyExists { bucket, key },
            KvError::RevisionMismatch {
                bucket,
                key,
                expected,
                actual,
            } => Self::RevisionMismatch {
                bucket,
                key,
                expected,
                actual,
            },
            other => Self::Kv(other),
        }
    }
}
