//! Caller-facing error taxonomy shared by every service.
//!
//! Service errors stay specific (`CycleDetected`, `DepthExceeded`, ...) but
//! each one classifies into a small [`ErrorKind`] so outer adapters can
//! render structured responses without matching every variant.

use serde::Serialize;
use std::error::Error;

/// Coarse error class surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced record does not exist, is soft-deleted, or is not visible.
    NotFound,
    /// Input is malformed or violates a structural rule (slug, score, depth).
    Validation,
    /// Input collides with existing state (duplicate slug, cycle, children).
    Conflict,
    /// A namespace quota would be exceeded by the write.
    QuotaExceeded,
    /// Caller lacks permission or addressed another tenant's record.
    Forbidden,
    /// Storage or consistency failure not attributable to the caller.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal",
        }
    }
}

/// Error that can be reported to a caller as `{kind, code, message}`.
pub trait ClassifiedError: Error {
    /// Coarse class used for status mapping.
    fn kind(&self) -> ErrorKind;
    /// Stable machine-readable code, e.g. `cycle_detected`.
    fn code(&self) -> &'static str;
}
