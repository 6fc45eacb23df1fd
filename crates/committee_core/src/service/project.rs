//! Project lookup port.
//!
//! The core only needs to know that a project exists and what its slug is.

use crate::context::{ContextError, OpContext};
use crate::kv::KvStore;
use crate::repo::record_store::RecordStore;
use crate::repo::{RepoError, RepoResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug)]
pub enum ProjectReadError {
    NotFound(String),
    Context(ContextError),
    Backend(String),
}

impl Display for ProjectReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(uid) => write!(f, "project not found: {uid}"),
            Self::Context(err) => write!(f, "{err}"),
            Self::Backend(message) => write!(f, "project lookup failed: {message}"),
        }
    }
}

impl Error for ProjectReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Context(err) => Some(err),
            _ => None,
        }
    }
}

/// Resolves project UIDs to slugs.
pub trait ProjectReader: Send + Sync {
    fn project_slug(&self, ctx: &OpContext, project_uid: &str) -> Result<String, ProjectReadError>;
}

/// In-process project table.
#[derive(Debug, Default)]
pub struct MemoryProjectReader {
    slugs: RwLock<BTreeMap<String, String>>,
}

impl MemoryProjectReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project_uid: impl Into<String>, slug: impl Into<String>) {
        self.slugs.write().insert(project_uid.into(), slug.into());
    }

    pub fn remove(&self, project_uid: &str) {
        self.slugs.write().remove(project_uid);
    }
}

impl ProjectReader for MemoryProjectReader {
    fn project_slug(&self, ctx: &OpContext, project_uid: &str) -> Result<String, ProjectReadError> {
        ctx.check().map_err(ProjectReadError::Context)?;
        self.slugs
            .read()
            .get(project_uid)
            .cloned()
            .ok_or_else(|| ProjectReadError::NotFound(project_uid.to_string()))
    }
}

/// Project record as published into the projects bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub uid: String,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Reads project records from a store bucket keyed by project UID.
#[derive(Clone)]
pub struct KvProjectReader {
    projects: RecordStore<ProjectRecord>,
}

impl KvProjectReader {
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>) -> Self {
        Self {
            projects: RecordStore::new(store, bucket),
        }
    }

    /// Seeds one project record. Fails if the UID is already present.
    pub fn register(&self, ctx: &OpContext, record: &ProjectRecord) -> RepoResult<u64> {
        self.projects.create(ctx, &record.uid, record)
    }
}

impl ProjectReader for KvProjectReader {
    fn project_slug(&self, ctx: &OpContext, project_uid: &str) -> Result<String, ProjectReadError> {
        match self.projects.get(ctx, project_uid) {
            Ok(record) => Ok(record.value.slug),
            Err(RepoError::NotFound { .. }) => {
                Err(ProjectReadError::NotFound(project_uid.to_string()))
            }
            Err(err) => match err.context_error() {
                Some(ctx_err) => Err(ProjectReadError::Context(ctx_err)),
                None => Err(ProjectReadError::Backend(err.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{KvProjectReader, MemoryProjectReader, ProjectReadError, ProjectReader, ProjectRecord};
    use crate::context::OpContext;
    use crate::kv::MemoryKvStore;
    use std::sync::Arc;

    #[test]
    fn memory_reader_resolves_known_projects() {
        let reader = MemoryProjectReader::new();
        reader.insert("p1", "proj");
        let ctx = OpContext::background();
        assert_eq!(reader.project_slug(&ctx, "p1").unwrap(), "proj");
        assert!(matches!(
            reader.project_slug(&ctx, "p2"),
            Err(ProjectReadError::NotFound(uid)) if uid == "p2"
        ));
    }

    #[test]
    fn kv_reader_reads_project_bucket() {
        let reader = KvProjectReader::new(Arc::new(MemoryKvStore::new()), "projects");
        let ctx = OpContext::background();
        reader
            .register(
                &ctx,
                &ProjectRecord {
                    uid: "p1".into(),
                    slug: "proj".into(),
                    name: None,
                },
            )
            .unwrap();
        assert_eq!(reader.project_slug(&ctx, "p1").unwrap(), "proj");
        assert!(matches!(
            reader.project_slug(&ctx, "nope"),
            Err(ProjectReadError::NotFound(_))
        ));
    }
}
