//! Committee aggregate persistence core.
//! This crate is the single source of truth for committee and member
//! invariants on top of a versioned key-value store.

pub mod config;
pub mod context;
pub mod error;
pub mod index_key;
pub mod kv;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{open_store, AllocatorPolicy, BucketNames, ConfigError, CoreConfig, StoreConfig};
pub use context::{ContextError, OpContext};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use kv::{KvError, KvStore, MemoryKvStore, SqliteKvStore};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::committee::{
    CommitteeBase, CommitteeFields, CommitteeId, CommitteeSettings, NewCommittee, SettingsFields,
};
pub use model::member::{CommitteeMember, MemberFields, MemberId};
pub use repo::record_store::Versioned;
pub use service::committee_service::{CommitteeRecord, CommitteeService};
pub use service::member_service::MemberService;
pub use service::notifier::{ChangeNotifier, LogNotifier, MemoryNotifier};
pub use service::project::{KvProjectReader, MemoryProjectReader, ProjectReader};
pub use service::CoreServices;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
