//! Caller-facing revision token.
//!
//! Revisions travel to and from callers as non-negative decimal strings.
//! Malformed tokens are rejected before any storage call.

use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtagError {
    Missing,
    InvalidFormat(String),
}

impl Display for EtagError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "ETag is required"),
            Self::InvalidFormat(value) => write!(f, "invalid ETag format: `{value}`"),
        }
    }
}

impl Error for EtagError {}

/// Parses a caller-supplied ETag into a store revision.
///
/// Surrounding whitespace and one pair of double quotes (HTTP style) are
/// accepted.
pub fn parse_etag(value: Option<&str>) -> Result<u64, EtagError> {
    let raw = value.map(str::trim).unwrap_or_default();
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw);
    if unquoted.is_empty() {
        return Err(EtagError::Missing);
    }
    if !unquoted.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EtagError::InvalidFormat(raw.to_string()));
    }
    unquoted
        .parse::<u64>()
        .map_err(|_| EtagError::InvalidFormat(raw.to_string()))
}

pub fn format_etag(revision: u64) -> String {
    revision.to_string()
}

#[cfg(test)]
mod tests {
    use super::{format_etag, parse_etag, EtagError};

    #[test]
    fn parses_plain_and_quoted_tokens() {
        assert_eq!(parse_etag(Some("7")), Ok(7));
        assert_eq!(parse_etag(Some(" \"42\" ")), Ok(42));
    }

    #[test]
    fn missing_or_empty_is_required_error() {
        assert_eq!(parse_etag(None), Err(EtagError::Missing));
        assert_eq!(parse_etag(Some("  ")), Err(EtagError::Missing));
        assert_eq!(parse_etag(Some("\"\"")), Err(EtagError::Missing));
    }

    #[test]
    fn non_numeric_tokens_are_rejected() {
        for token in ["abc", "-1", "1.5", "+3", "99999999999999999999999"] {
            assert!(
                matches!(parse_etag(Some(token)), Err(EtagError::InvalidFormat(_))),
                "token {token} should be rejected"
            );
        }
        assert_eq!(parse_etag(Some("abc")).unwrap_err().to_string(), "invalid ETag format: `abc`");
    }

    #[test]
    fn format_round_trips() {
        assert_eq!(parse_etag(Some(&format_etag(12))), Ok(12));
    }
}
