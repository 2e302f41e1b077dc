//! Field-level validation shared by every service.
//!
//! # Invariants
//! - Slugs are lowercase ASCII words joined by single hyphens, 1..=64 chars.
//! - Names are trimmed, non-blank and at most 200 chars.
//! - Confidence scores are finite and inside `[0, 1]`.

use crate::model::metadata::MetadataError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

pub const MAX_SLUG_CHARS: usize = 64;
pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_IDENTIFIER_CHARS: usize = 128;

/// Field validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    BlankName,
    NameTooLong { max_chars: usize },
    InvalidSlug(String),
    InvalidScore(f64),
    BlankField(&'static str),
    FieldTooLong { field: &'static str, max_chars: usize },
    ExpiryInPast { expires_at: i64, now: i64 },
    Metadata(MetadataError),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "name must not be blank"),
            Self::NameTooLong { max_chars } => {
                write!(f, "name must be at most {max_chars} characters")
            }
            Self::InvalidSlug(value) => write!(
                f,
                "invalid slug `{value}`: expected lowercase letters, digits and single hyphens"
            ),
            Self::InvalidScore(value) => {
                write!(f, "confidence score {value} is outside [0, 1]")
            }
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
            Self::FieldTooLong { field, max_chars } => {
                write!(f, "`{field}` must be at most {max_chars} characters")
            }
            Self::ExpiryInPast { expires_at, now } => {
                write!(f, "expires_at {expires_at} is not after current time {now}")
            }
            Self::Metadata(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Metadata(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MetadataError> for ValidationError {
    fn from(value: MetadataError) -> Self {
        Self::Metadata(value)
    }
}

/// Trims and checks a display name.
pub fn normalize_name(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankName);
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::NameTooLong {
            max_chars: MAX_NAME_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Trims and checks a slug. Slugs are never lowercased implicitly.
pub fn normalize_slug(value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.len() > MAX_SLUG_CHARS || !SLUG_RE.is_match(trimmed) {
        return Err(ValidationError::InvalidSlug(value.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text collapses to `None`.
pub fn normalize_description(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Checks an external identifier such as `entity_type` or `entity_id`.
pub fn normalize_identifier(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankField(field));
    }
    if trimmed.chars().count() > MAX_IDENTIFIER_CHARS {
        return Err(ValidationError::FieldTooLong {
            field,
            max_chars: MAX_IDENTIFIER_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Accepts finite scores in `[0, 1]`.
pub fn validate_confidence(score: f64) -> Result<f64, ValidationError> {
    if score.is_finite() && (0.0..=1.0).contains(&score) {
        Ok(score)
    } else {
        Err(ValidationError::InvalidScore(score))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_description, normalize_identifier, normalize_name, normalize_slug,
        validate_confidence, ValidationError,
    };

    #[test]
    fn slug_accepts_kebab_case() {
        assert_eq!(normalize_slug(" live-music-2024 ").unwrap(), "live-music-2024");
    }

    #[test]
    fn slug_rejects_separators_and_case() {
        for bad in ["Rock", "rock/punk", "rock--punk", "-rock", "rock-", "", "r ock"] {
            assert!(
                matches!(normalize_slug(bad), Err(ValidationError::InvalidSlug(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn slug_rejects_overlong_values() {
        let long = "a".repeat(65);
        assert!(normalize_slug(&long).is_err());
    }

    #[test]
    fn name_is_trimmed_and_required() {
        assert_eq!(normalize_name("  Jazz ").unwrap(), "Jazz");
        assert_eq!(normalize_name("   "), Err(ValidationError::BlankName));
    }

    #[test]
    fn confidence_bounds_are_inclusive() {
        assert_eq!(validate_confidence(0.0).unwrap(), 0.0);
        assert_eq!(validate_confidence(1.0).unwrap(), 1.0);
        assert_eq!(
            validate_confidence(1.5),
            Err(ValidationError::InvalidScore(1.5))
        );
        assert!(validate_confidence(f64::NAN).is_err());
        assert!(validate_confidence(-0.01).is_err());
    }

    #[test]
    fn description_blank_collapses_to_none() {
        assert_eq!(normalize_description(Some("  ".to_string())), None);
        assert_eq!(
            normalize_description(Some(" x ".to_string())),
            Some("x".to_string())
        );
    }

    #[test]
    fn identifier_rejects_blank() {
        assert_eq!(
            normalize_identifier("entity_id", " "),
            Err(ValidationError::BlankField("entity_id"))
        );
    }
}
