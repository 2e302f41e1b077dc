//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Enforce permissions, tenant isolation, validation and quotas before
//!   anything reaches storage.
//! - Emit one audit event per successful mutation.

use crate::error::ErrorKind;
use crate::repo::RepoError;
use serde::{Deserialize, Deserializer};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod category_service;
pub mod classification_service;
pub mod namespace_service;

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Distinguishes "field absent" (`None`) from "explicit null"
/// (`Some(None)`) in patch payloads. Use with `#[serde(default)]`.
pub(crate) fn patch_field<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub(crate) fn repo_error_kind(err: &RepoError) -> ErrorKind {
    match err {
        RepoError::NotFound { .. } => ErrorKind::NotFound,
        RepoError::UniqueViolation(_)
        | RepoError::VersionConflict { .. }
        | RepoError::HasChildren { .. } => ErrorKind::Conflict,
        _ => ErrorKind::Internal,
    }
}

pub(crate) fn repo_error_code(err: &RepoError) -> &'static str {
    match err {
        RepoError::NotFound { .. } => "not_found",
        RepoError::UniqueViolation(_) => "duplicate",
        RepoError::VersionConflict { .. } => "version_conflict",
        RepoError::HasChildren { .. } => "has_children",
        _ => "storage_error",
    }
}
