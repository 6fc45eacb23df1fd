#![allow(dead_code)]

use committee_core::index_key::COMMITTEE_SSO_GROUP_INDEX_PREFIX;
use committee_core::kv::{KvEntry, KvError, KvResult, KvStore, MemoryKvStore};
use committee_core::{
    CommitteeFields, CoreConfig, CoreServices, MemoryNotifier, MemoryProjectReader, NewCommittee,
    OpContext,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const PROJECT_UID: &str = "project-1";
pub const PROJECT_SLUG: &str = "proj";

/// Store wrapper that can fail creates or deletes in one bucket, or lose SSO group
/// reservations to a simulated concurrent writer.
pub struct FaultyStore {
    inner: MemoryKvStore,
    fail_creates_in: Mutex<Option<String>>,
    fail_deletes_in: Mutex<Option<String>>,
    steal_sso_claims: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryKvStore::new(),
            fail_creates_in: Mutex::new(None),
            fail_deletes_in: Mutex::new(None),
            steal_sso_claims: AtomicBool::new(false),
        }
    }

    pub fn fail_creates_in(&self, bucket: Option<&str>) {
        *self.fail_creates_in.lock() = bucket.map(str::to_string);
    }

    pub fn fail_deletes_in(&self, bucket: Option<&str>) {
        *self.fail_deletes_in.lock() = bucket.map(str::to_string);
    }

    pub fn steal_sso_claims(&self, enabled: bool) {
        self.steal_sso_claims.store(enabled, Ordering::SeqCst);
    }
}

impl KvStore for FaultyStore {
    fn backend_name(&self) -> &'static str {
        "faulty-memory"
    }

    fn get(&self, ctx: &OpContext, bucket: &str, key: &str) -> KvResult<KvEntry> {
        self.inner.get(ctx, bucket, key)
    }

    fn create(&self, ctx: &OpContext, bucket: &str, key: &str, value: &[u8]) -> KvResult<u64> {
        if self.fail_creates_in.lock().as_deref() == Some(bucket) {
            return Err(KvError::InvalidData("injected create failure".to_string()));
        }
        if key.starts_with(COMMITTEE_SSO_GROUP_INDEX_PREFIX)
            && self.steal_sso_claims.load(Ordering::SeqCst)
        {
            // Another writer claims the name between the availability probe
            // and this reservation.
            self.inner.create(ctx, bucket, key, b"someone-else")?;
        }
        self.inner.create(ctx, bucket, key, value)
    }

    fn update(
        &self,
        ctx: &OpContext,
        bucket: &str,
        key: &str,
        value: &[u8],
        expected_revision: u64,
    ) -> KvResult<u64> {
        self.inner.update(ctx, bucket, key, value, expected_revision)
    }

    fn delete(&self, ctx: &OpContext, bucket: &str, key: &str, expected_revision: u64) -> KvResult<()> {
        if self.fail_deletes_in.lock().as_deref() == Some(bucket) {
            return Err(KvError::InvalidData("injected delete failure".to_string()));
        }
        self.inner.delete(ctx, bucket, key, expected_revision)
    }

    fn keys(&self, ctx: &OpContext, bucket: &str) -> KvResult<Vec<String>> {
        self.inner.keys(ctx, bucket)
    }
}

pub struct Harness {
    pub config: CoreConfig,
    pub store: Arc<dyn KvStore>,
    pub projects: Arc<MemoryProjectReader>,
    pub notifier: Arc<MemoryNotifier>,
    pub services: CoreServices,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryKvStore::new()))
    }

    pub fn with_store(store: Arc<dyn KvStore>) -> Self {
        let mut config = CoreConfig::default();
        config.allocator.initial_backoff_ms = 0;
        config.allocator.max_backoff_ms = 0;

        let projects = Arc::new(MemoryProjectReader::new());
        projects.insert(PROJECT_UID, PROJECT_SLUG);
        let notifier = Arc::new(MemoryNotifier::new());
        let services = CoreServices::new(
            &config,
            Arc::clone(&store),
            projects.clone(),
            notifier.clone(),
        );
        Self {
            config,
            store,
            projects,
            notifier,
            services,
        }
    }

    /// Number of stored keys in `bucket`, records and reservations alike.
    pub fn key_count(&self, bucket: &str) -> usize {
        self.store
            .keys(&OpContext::background(), bucket)
            .unwrap()
            .len()
    }

    pub fn committees_bucket(&self) -> &str {
        &self.config.buckets.committees
    }

    pub fn settings_bucket(&self) -> &str {
        &self.config.buckets.committee_settings
    }

    pub fn members_bucket(&self) -> &str {
        &self.config.buckets.committee_members
    }
}

pub fn committee_fields(name: &str) -> CommitteeFields {
    CommitteeFields {
        project_uid: PROJECT_UID.to_string(),
        name: name.to_string(),
        category: "Technical Steering Committee".to_string(),
        ..CommitteeFields::default()
    }
}

pub fn new_committee(name: &str, sso_group_enabled: bool) -> NewCommittee {
    let mut fields = committee_fields(name);
    fields.sso_group_enabled = sso_group_enabled;
    NewCommittee {
        fields,
        ..NewCommittee::default()
    }
}
