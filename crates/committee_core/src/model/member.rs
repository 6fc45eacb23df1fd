//! Committee member model.
//!
//! # Responsibility
//! - Define the member record and its nested role, voting and organization
//!   values.
//! - Enforce category-conditional fields before persistence.
//!
//! # Invariants
//! - `(committee_uid, normalized email)` identifies at most one member.
//! - Members of a Government Advisory Council carry `agency` and `country`;
//!   members of any other committee carry neither.
//! - Date ranges never end before they start.

use crate::index_key::normalize_email;
use crate::model::committee::CommitteeId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type MemberId = Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleName {
    Chair,
    Counsel,
    #[serde(rename = "Developer Seat")]
    DeveloperSeat,
    Director,
    Lead,
    #[serde(rename = "LF Staff")]
    LfStaff,
    Secretary,
    #[serde(rename = "TAC/TOC Representative")]
    TacTocRepresentative,
    Treasurer,
    #[serde(rename = "Vice Chair")]
    ViceChair,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VotingStatus {
    #[serde(rename = "Voting Rep")]
    VotingRep,
    #[serde(rename = "Alternate Voting Rep")]
    AlternateVotingRep,
    Observer,
    Emeritus,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingInfo {
    pub status: VotingStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Option<String>,
    pub name: Option<String>,
    pub website: Option<String>,
}

/// Caller-editable member attributes, shared by create and update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFields {
    pub username: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub job_title: Option<String>,
    pub linkedin_profile: Option<String>,
    pub appointed_by: Option<String>,
    pub role: Role,
    pub voting: VotingInfo,
    pub organization: Organization,
    pub agency: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitteeMember {
    pub uid: MemberId,
    pub committee_uid: CommitteeId,
    /// Denormalized owning committee name at write time.
    pub committee_name: String,
    pub username: Option<String>,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub job_title: Option<String>,
    pub linkedin_profile: Option<String>,
    pub appointed_by: Option<String>,
    pub role: Role,
    pub voting: VotingInfo,
    pub organization: Organization,
    pub agency: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberValidationError {
    MissingEmail,
    InvalidEmail(String),
    /// Government Advisory Council member without the listed fields.
    MissingRequiredFields(Vec<&'static str>),
    /// Non-GAC member carrying GAC-only fields.
    ForbiddenFields,
    RoleDateRange,
    VotingDateRange,
}

impl Display for MemberValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEmail => write!(f, "email is required"),
            Self::InvalidEmail(value) => write!(f, "invalid email: `{value}`"),
            Self::MissingRequiredFields(fields) => write!(
                f,
                "{} required for Government Advisory Council members",
                match fields.as_slice() {
                    [single] => format!("{single} is"),
                    many => format!("{} are", many.join(" and ")),
                }
            ),
            Self::ForbiddenFields => write!(
                f,
                "agency and country are only allowed for Government Advisory Council members"
            ),
            Self::RoleDateRange => write!(f, "role end_date must not be before start_date"),
            Self::VotingDateRange => write!(f, "voting end_date must not be before start_date"),
        }
    }
}

impl Error for MemberValidationError {}

impl MemberFields {
    /// Category-independent checks.
    pub fn validate(&self) -> Result<(), MemberValidationError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(MemberValidationError::MissingEmail);
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(MemberValidationError::InvalidEmail(email.to_string())),
        }
        if date_range_inverted(self.role.start_date, self.role.end_date) {
            return Err(MemberValidationError::RoleDateRange);
        }
        if date_range_inverted(self.voting.start_date, self.voting.end_date) {
            return Err(MemberValidationError::VotingDateRange);
        }
        Ok(())
    }

    /// Full validation against the owning committee's category.
    pub fn validate_for_committee(&self, gac: bool) -> Result<(), MemberValidationError> {
        self.validate()?;
        let has_agency = is_present(self.agency.as_deref());
        let has_country = is_present(self.country.as_deref());

        if gac {
            let mut missing = Vec::new();
            if !has_agency {
                missing.push("agency");
            }
            if !has_country {
                missing.push("country");
            }
            if !missing.is_empty() {
                return Err(MemberValidationError::MissingRequiredFields(missing));
            }
        } else if has_agency || has_country {
            return Err(MemberValidationError::ForbiddenFields);
        }
        Ok(())
    }
}

impl CommitteeMember {
    pub fn new(
        uid: MemberId,
        committee_uid: CommitteeId,
        committee_name: &str,
        fields: &MemberFields,
        now: DateTime<Utc>,
    ) -> Self {
        let mut member = Self {
            uid,
            committee_uid,
            committee_name: String::new(),
            username: None,
            email: String::new(),
            first_name: None,
            last_name: None,
            job_title: None,
            linkedin_profile: None,
            appointed_by: None,
            role: Role::default(),
            voting: VotingInfo::default(),
            organization: Organization::default(),
            agency: None,
            country: None,
            created_at: now,
            updated_at: now,
        };
        member.apply(committee_name, fields, now);
        member
    }

    /// Overwrites editable fields; identity and `created_at` are kept.
    pub fn apply(&mut self, committee_name: &str, fields: &MemberFields, now: DateTime<Utc>) {
        self.committee_name = committee_name.to_string();
        self.username = fields.username.clone();
        self.email = normalize_email(&fields.email);
        self.first_name = fields.first_name.clone();
        self.last_name = fields.last_name.clone();
        self.job_title = fields.job_title.clone();
        self.linkedin_profile = fields.linkedin_profile.clone();
        self.appointed_by = fields.appointed_by.clone();
        self.role = fields.role.clone();
        self.voting = fields.voting.clone();
        self.organization = fields.organization.clone();
        self.agency = trimmed(fields.agency.as_deref());
        self.country = trimmed(fields.country.as_deref());
        self.updated_at = now;
    }
}

fn is_present(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn date_range_inverted(start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    matches!((start, end), (Some(start), Some(end)) if end < start)
}

#[cfg(test)]
mod tests {
    use super::{MemberFields, MemberValidationError, Role, RoleName};
    use chrono::NaiveDate;

    fn fields() -> MemberFields {
        MemberFields {
            email: "jane@example.com".to_string(),
            ..MemberFields::default()
        }
    }

    #[test]
    fn gac_member_without_country_names_country() {
        let mut input = fields();
        input.agency = Some("Ministry".to_string());
        input.country = Some("  ".to_string());
        let err = input.validate_for_committee(true).unwrap_err();
        assert_eq!(err, MemberValidationError::MissingRequiredFields(vec!["country"]));
        let message = err.to_string();
        assert!(message.contains("country"));
        assert!(!message.contains("agency"));
    }

    #[test]
    fn gac_member_without_both_names_both() {
        let err = fields().validate_for_committee(true).unwrap_err();
        assert_eq!(err.to_string(), "agency and country are required for Government Advisory Council members");
    }

    #[test]
    fn non_gac_member_with_agency_is_rejected() {
        let mut input = fields();
        input.agency = Some("Ministry".to_string());
        let message = input.validate_for_committee(false).unwrap_err().to_string();
        assert!(message.contains("agency"));
        assert!(message.contains("country"));
    }

    #[test]
    fn email_must_have_local_and_domain() {
        let mut input = fields();
        input.email = "@example.com".to_string();
        assert!(matches!(
            input.validate(),
            Err(MemberValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn inverted_role_dates_are_rejected() {
        let mut input = fields();
        input.role = Role {
            name: RoleName::Chair,
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 4, 1),
        };
        assert_eq!(input.validate(), Err(MemberValidationError::RoleDateRange));
    }

    #[test]
    fn role_names_use_display_spelling_on_the_wire() {
        let json = serde_json::to_string(&RoleName::TacTocRepresentative).unwrap();
        assert_eq!(json, "\"TAC/TOC Representative\"");
    }
}
