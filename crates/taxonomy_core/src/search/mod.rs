//! Tenant-scoped search across taxonomies, categories and classifications.
//!
//! # Responsibility
//! - Validate search requests and fan them out over the repositories.
//! - Keep filtering, ranking and pagination inside core.

use crate::context::AccessError;
use crate::error::{ClassifiedError, ErrorKind};
use crate::repo::RepoError;
use crate::search::query::{FilterField, FilterOp};
use crate::service::{repo_error_code, repo_error_kind};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod engine;
pub mod query;
pub mod scorer;

pub use engine::{search_all, SearchHit, SearchPage, SearchRecord, SearchService};
pub use query::{
    FilterSpec, FilterValue, SearchEntityKind, SearchQuery, SearchSort, SortOrder,
};
pub use scorer::{NeutralScorer, RelevanceScorer};

/// Page size used when a query gives none.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
/// Hard upper bound for page size.
pub const MAX_SEARCH_LIMIT: u32 = 100;

pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug)]
pub enum SearchError {
    InvalidQuery(String),
    InvalidFilter {
        field: FilterField,
        op: FilterOp,
        reason: &'static str,
    },
    Forbidden(AccessError),
    Repo(RepoError),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery(message) => write!(f, "invalid search query: {message}"),
            Self::InvalidFilter { field, op, reason } => write!(
                f,
                "filter `{} {}` {reason}",
                field.as_str(),
                op.as_str()
            ),
            Self::Forbidden(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Forbidden(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl ClassifiedError for SearchError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidQuery(_) | Self::InvalidFilter { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Repo(err) => repo_error_kind(err),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "invalid_query",
            Self::InvalidFilter { .. } => "invalid_filter",
            Self::Forbidden(_) => "forbidden",
            Self::Repo(err) => repo_error_code(err),
        }
    }
}

impl From<RepoError> for SearchError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<AccessError> for SearchError {
    fn from(value: AccessError) -> Self {
        Self::Forbidden(value)
    }
}
