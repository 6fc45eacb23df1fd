//! Uniqueness index key derivation.
//!
//! # Responsibility
//! - Turn business fields (project + name, email, SSO group name) into fixed
//!   length, charset-safe lookup keys.
//!
//! # Invariants
//! - Same inputs always produce the same key, across processes and releases.
//! - Output is lowercase hex SHA-256 (64 chars) regardless of input length.
//! - Index keys live under `INDEX_KEY_ROOT` and never collide with record
//!   UIDs stored in the same bucket.
//! - Index keys are lookup handles only; records are keyed by minted UIDs.

use sha2::{Digest, Sha256};

/// Common prefix of every reservation key.
pub const INDEX_KEY_ROOT: &str = "lookup/";
pub const COMMITTEE_NAME_INDEX_PREFIX: &str = "lookup/committee-name/";
pub const COMMITTEE_SSO_GROUP_INDEX_PREFIX: &str = "lookup/committee-sso-group/";
pub const MEMBER_EMAIL_INDEX_PREFIX: &str = "lookup/committee-member-email/";

/// Hashes already-normalized fields into a 64-char hex key.
///
/// Each field is framed by its big-endian `u64` byte length, so field
/// contents can never be mistaken for a boundary.
pub fn build_key<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for field in fields {
        let bytes = field.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_be_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Email normalization: trim + lowercase.
pub fn normalize_email(value: &str) -> String {
    strip_control(value.trim()).to_lowercase()
}

/// Committee name normalization: trim + lowercase, so names differing only
/// in case or surrounding whitespace collide.
pub fn normalize_name(value: &str) -> String {
    strip_control(value.trim()).to_lowercase()
}

pub fn committee_name_index_key(project_uid: &str, name: &str) -> String {
    format!(
        "{COMMITTEE_NAME_INDEX_PREFIX}{}",
        build_key([strip_control(project_uid.trim()), normalize_name(name)])
    )
}

pub fn sso_group_index_key(sso_group_name: &str) -> String {
    format!(
        "{COMMITTEE_SSO_GROUP_INDEX_PREFIX}{}",
        build_key([normalize_name(sso_group_name)])
    )
}

pub fn member_email_index_key(committee_uid: &str, email: &str) -> String {
    format!(
        "{MEMBER_EMAIL_INDEX_PREFIX}{}",
        build_key([strip_control(committee_uid.trim()), normalize_email(email)])
    )
}

/// Whether a stored key is a reservation rather than a record.
pub fn is_index_key(key: &str) -> bool {
    key.starts_with(INDEX_KEY_ROOT)
}

fn strip_control(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_control()).collect()
}
