//! SSO group name derivation.
//!
//! # Responsibility
//! - Derive slug-safe SSO group name candidates from project slug and
//!   committee name.
//! - Step an already assigned name to its next numeric suffix.
//!
//! # Invariants
//! - Candidates have the shape `<slug(project-name)>-<n>` with `n >= 1`.
//! - A fresh committee starts at `-1`; a committee re-processed with
//!   `-<n>` moves to `-<n+1>`.
//! - A previously assigned name equal to the bare stem counts as `-1`.
//! - Any other previously assigned name whose last segment is not a number
//!   is rejected, never silently replaced.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static NON_SLUG_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

const SUFFIX_SEPARATOR: char = '-';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SsoGroupNameError {
    /// Project slug plus committee name contain no slug-safe characters.
    EmptySlug,
    /// Existing name has no parseable numeric suffix.
    InvalidFormat(String),
}

impl Display for SsoGroupNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySlug => write!(f, "committee name does not produce a valid SSO group name"),
            Self::InvalidFormat(value) => {
                write!(f, "invalid SSO group name format/index: `{value}`")
            }
        }
    }
}

impl Error for SsoGroupNameError {}

/// Lowercases and collapses every run of non `[a-z0-9]` characters into a
/// single `-`, without leading or trailing separators.
pub fn slugify(value: &str) -> String {
    let lowered = value.to_lowercase();
    NON_SLUG_RUN_RE
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Suffix-free stem shared by every candidate of one committee.
pub fn sso_group_stem(project_slug: &str, committee_name: &str) -> Result<String, SsoGroupNameError> {
    let stem = slugify(&format!("{project_slug}-{committee_name}"));
    if stem.is_empty() {
        return Err(SsoGroupNameError::EmptySlug);
    }
    Ok(stem)
}

/// Next candidate for a committee.
///
/// `current` is the name the committee carried from a previous attempt.
pub fn next_sso_group_name(
    project_slug: &str,
    committee_name: &str,
    current: Option<&str>,
) -> Result<String, SsoGroupNameError> {
    let stem = sso_group_stem(project_slug, committee_name)?;
    let index = match current.map(str::trim).filter(|value| !value.is_empty()) {
        None => 1,
        Some(existing) if existing == stem => 2,
        Some(existing) => current_index(existing)?
            .checked_add(1)
            .ok_or_else(|| SsoGroupNameError::InvalidFormat(existing.to_string()))?,
    };
    Ok(format!("{stem}{SUFFIX_SEPARATOR}{index}"))
}

fn current_index(existing: &str) -> Result<u32, SsoGroupNameError> {
    let (_, suffix) = existing
        .rsplit_once(SUFFIX_SEPARATOR)
        .ok_or_else(|| SsoGroupNameError::InvalidFormat(existing.to_string()))?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SsoGroupNameError::InvalidFormat(existing.to_string()));
    }
    suffix
        .parse::<u32>()
        .map_err(|_| SsoGroupNameError::InvalidFormat(existing.to_string()))
}
