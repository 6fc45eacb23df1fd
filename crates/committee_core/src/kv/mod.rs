//! Versioned key-value backend contract and implementations.
//!
//! # Responsibility
//! - Define the single-key atomic primitives the persistence layer is built
//!   on: create-if-absent, compare-and-swap update, compare-and-swap delete.
//! - Provide an in-process backend and a SQLite-backed backend.
//!
//! # Invariants
//! - Revisions are per-bucket sequence numbers starting at 1 and advance on
//!   every successful create, update and delete.
//! - A recreated key never reuses a revision it held before deletion.
//! - Every call checks the `OpContext` before touching storage.
//! - Implementations are safe for concurrent use from many threads.

use crate::context::{ContextError, OpContext};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod memory;
pub mod migrations;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

pub type KvResult<T> = Result<T, KvError>;

/// One stored value with the revision of its last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Backend-level failures.
#[derive(Debug)]
pub enum KvError {
    /// No value stored at `bucket/key`.
    NotFound { bucket: String, key: String },
    /// Create-if-absent found an existing value.
    AlreadyExists { bucket: String, key: String },
    /// CAS precondition failed.
    RevisionMismatch {
        bucket: String,
        key: String,
        expected: u64,
        actual: u64,
    },
    /// Caller context was done before the call.
    Context(ContextError),
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Persisted backend state is unusable.
    InvalidData(String),
}

impl KvError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { bucket, key } => write!(f, "key not found: {bucket}/{key}"),
            Self::AlreadyExists { bucket, key } => {
                write!(f, "key already exists: {bucket}/{key}")
            }
            Self::RevisionMismatch {
                bucket,
                key,
                expected,
                actual,
            } => write!(
                f,
                "revision mismatch for {bucket}/{key}: expected {expected}, stored {actual}"
            ),
            Self::Context(err) => write!(f, "{err}"),
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidData(message) => write!(f, "invalid store data: {message}"),
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Context(err) => Some(err),
            Self::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ContextError> for KvError {
    fn from(value: ContextError) -> Self {
        Self::Context(value)
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Bucketed, versioned key-value store.
///
/// Buckets are created lazily by the first write into them.
pub trait KvStore: Send + Sync {
    /// Short backend label for diagnostics (`memory`, `sqlite`).
    fn backend_name(&self) -> &'static str;

    fn get(&self, ctx: &OpContext, bucket: &str, key: &str) -> KvResult<KvEntry>;

    /// Atomic create-if-absent. Returns the new revision.
    fn create(&self, ctx: &OpContext, bucket: &str, key: &str, value: &[u8]) -> KvResult<u64>;

    /// Replaces the value only when the stored revision equals `expected_revision`.
    fn update(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected_revision: u64,
    ) -> KvResult<u64>;

    /// Removes the value only when the stored revision equals `expected_revision`.
    fn delete(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        expected_revision: u64,
    ) -> KvResult<()>;

    /// Lists keys of one bucket in ascending order.
    fn keys(&self, ctx: &OpContext, bucket: &str) -> KvResult<Vec<String>>;
}
