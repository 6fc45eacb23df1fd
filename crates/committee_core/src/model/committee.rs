//! Committee aggregate model.
//!
//! # Responsibility
//! - Define the `CommitteeBase` and `CommitteeSettings` records, stored as two
//!   separately versioned records sharing one UID.
//! - Provide field-level validation applied before any storage write.
//!
//! # Invariants
//! - `uid` is minted at creation and never caller-supplied.
//! - `CommitteeSettings::uid == CommitteeBase::uid`.
//! - `sso_group_name` is derived by the allocator, never taken from input.
//! - A committee is never its own parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type CommitteeId = Uuid;

/// Category whose members must carry agency and country.
pub const GOVERNMENT_ADVISORY_COUNCIL: &str = "Government Advisory Council";

const MAX_NAME_CHARS: usize = 256;

/// Calendar visibility for committee meetings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub public: bool,
}

/// Caller-editable committee attributes, shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeFields {
    pub project_uid: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub website: Option<String>,
    pub enable_voting: bool,
    pub sso_group_enabled: bool,
    pub public: bool,
    pub calendar: Calendar,
    pub parent_uid: Option<CommitteeId>,
}

/// Caller-editable governance settings, shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsFields {
    pub business_email_required: bool,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub last_reviewed_by: Option<String>,
    pub writers: Vec<String>,
    pub auditors: Vec<String>,
}

/// Create request for one committee aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommittee {
    pub fields: CommitteeFields,
    pub settings: SettingsFields,
}

/// Public committee record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeBase {
    pub uid: CommitteeId,
    pub project_uid: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub website: Option<String>,
    pub enable_voting: bool,
    pub sso_group_enabled: bool,
    pub sso_group_name: Option<String>,
    pub public: bool,
    pub calendar: Calendar,
    pub parent_uid: Option<CommitteeId>,
    /// Denormalized counters maintained by downstream consumers.
    pub total_members: u32,
    pub total_voting_repos: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sensitive committee settings, stored in their own bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeSettings {
    pub uid: CommitteeId,
    pub business_email_required: bool,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub last_reviewed_by: Option<String>,
    pub writers: Vec<String>,
    pub auditors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field validation errors for committee input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitteeValidationError {
    MissingProjectUid,
    MissingName,
    NameTooLong(usize),
    MissingCategory,
    SelfParent(CommitteeId),
}

impl Display for CommitteeValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingProjectUid => write!(f, "project_uid is required"),
            Self::MissingName => write!(f, "name is required"),
            Self::NameTooLong(len) => {
                write!(f, "name must be at most {MAX_NAME_CHARS} characters, got {len}")
            }
            Self::MissingCategory => write!(f, "category is required"),
            Self::SelfParent(uid) => write!(f, "committee {uid} cannot be its own parent"),
        }
    }
}

impl Error for CommitteeValidationError {}

impl CommitteeFields {
    pub fn validate(&self) -> Result<(), CommitteeValidationError> {
        if self.project_uid.trim().is_empty() {
            return Err(CommitteeValidationError::MissingProjectUid);
        }
        if self.name.trim().is_empty() {
            return Err(CommitteeValidationError::MissingName);
        }
        let name_len = self.name.trim().chars().count();
        if name_len > MAX_NAME_CHARS {
            return Err(CommitteeValidationError::NameTooLong(name_len));
        }
        if self.category.trim().is_empty() {
            return Err(CommitteeValidationError::MissingCategory);
        }
        Ok(())
    }

    /// Validation for updates of an existing committee.
    pub fn validate_for(&self, uid: CommitteeId) -> Result<(), CommitteeValidationError> {
        self.validate()?;
        if self.parent_uid == Some(uid) {
            return Err(CommitteeValidationError::SelfParent(uid));
        }
        Ok(())
    }
}

impl CommitteeBase {
    /// Builds a fresh base record. Counters start at zero; the SSO group name
    /// is filled in later by the allocator.
    pub fn new(uid: CommitteeId, fields: &CommitteeFields, now: DateTime<Utc>) -> Self {
        let mut base = Self {
            uid,
            project_uid: String::new(),
            name: String::new(),
            category: String::new(),
            description: None,
            display_name: None,
            website: None,
            enable_voting: false,
            sso_group_enabled: false,
            sso_group_name: None,
            public: false,
            calendar: Calendar::default(),
            parent_uid: None,
            total_members: 0,
            total_voting_repos: 0,
            created_at: now,
            updated_at: now,
        };
        base.apply(fields, now);
        base
    }

    /// Overwrites caller-editable fields. Identity, SSO group name, counters
    /// and `created_at` are kept.
    pub fn apply(&mut self, fields: &CommitteeFields, now: DateTime<Utc>) {
        self.project_uid = fields.project_uid.trim().to_string();
        self.name = fields.name.trim().to_string();
        self.category = fields.category.trim().to_string();
        self.description = fields.description.clone();
        self.display_name = fields.display_name.clone();
        self.website = fields.website.clone();
        self.enable_voting = fields.enable_voting;
        self.sso_group_enabled = fields.sso_group_enabled;
        self.public = fields.public;
        self.calendar = fields.calendar.clone();
        self.parent_uid = fields.parent_uid;
        self.updated_at = now;
    }

    pub fn is_government_advisory_council(&self) -> bool {
        self.category.eq_ignore_ascii_case(GOVERNMENT_ADVISORY_COUNCIL)
    }
}

impl CommitteeSettings {
    pub fn new(uid: CommitteeId, fields: &SettingsFields, now: DateTime<Utc>) -> Self {
        let mut settings = Self {
            uid,
            business_email_required: false,
            last_reviewed_at: None,
            last_reviewed_by: None,
            writers: Vec::new(),
            auditors: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        settings.apply(fields, now);
        settings
    }

    pub fn apply(&mut self, fields: &SettingsFields, now: DateTime<Utc>) {
        self.business_email_required = fields.business_email_required;
        self.last_reviewed_at = fields.last_reviewed_at;
        self.last_reviewed_by = fields.last_reviewed_by.clone();
        self.writers = dedup_principals(&fields.writers);
        self.auditors = dedup_principals(&fields.auditors);
        self.updated_at = now;
    }
}

/// Trims principals, drops blanks and duplicates, keeps first-seen order.
fn dedup_principals(values: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(values.len());
    for value in values {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !seen.iter().any(|known: &String| known == trimmed) {
            seen.push(trimmed.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::{CommitteeBase, CommitteeFields, CommitteeValidationError, SettingsFields};
    use super::CommitteeSettings;
    use chrono::Utc;
    use uuid::Uuid;

    fn fields() -> CommitteeFields {
        CommitteeFields {
            project_uid: "p1".to_string(),
            name: " Security ".to_string(),
            category: "Working Group".to_string(),
            ..CommitteeFields::default()
        }
    }

    #[test]
    fn new_base_trims_and_keeps_identity() {
        let uid = Uuid::new_v4();
        let base = CommitteeBase::new(uid, &fields(), Utc::now());
        assert_eq!(base.uid, uid);
        assert_eq!(base.name, "Security");
        assert_eq!(base.sso_group_name, None);
        assert_eq!(base.created_at, base.updated_at);
    }

    #[test]
    fn validate_rejects_blank_required_fields() {
        let mut input = fields();
        input.category = "  ".to_string();
        assert_eq!(input.validate(), Err(CommitteeValidationError::MissingCategory));
    }

    #[test]
    fn validate_for_rejects_self_parent() {
        let uid = Uuid::new_v4();
        let mut input = fields();
        input.parent_uid = Some(uid);
        assert_eq!(
            input.validate_for(uid),
            Err(CommitteeValidationError::SelfParent(uid))
        );
    }

    #[test]
    fn settings_principals_are_deduplicated() {
        let input = SettingsFields {
            writers: vec!["alice".into(), " alice ".into(), "".into(), "bob".into()],
            ..SettingsFields::default()
        };
        let settings = CommitteeSettings::new(Uuid::new_v4(), &input, Utc::now());
        assert_eq!(settings.writers, vec!["alice".to_string(), "bob".to_string()]);
    }
}
