//! Core domain logic for the multi-tenant taxonomy service.
//! This crate is the single source of truth for hierarchy, quota and
//! classification invariants.

pub mod audit;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use audit::{AuditEvent, AuditSink, LogAuditSink, MemoryAuditSink};
pub use config::{ConfigError, CoreConfig};
pub use context::{AccessError, ContextError, Permission, RequestContext};
pub use db::{open_db, open_db_in_memory, DbError};
pub use error::{ClassifiedError, ErrorKind};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::category::{Category, CategoryDeleteMode, CategoryId, CategoryTreeNode};
pub use model::classification::{
    AssignedBy, Classification, ClassificationId, ClassificationStatus,
};
pub use model::metadata::{Metadata, MetadataSchema, MetadataValue};
pub use model::namespace::{Namespace, NamespaceId, NamespaceUsage};
pub use model::taxonomy::{Taxonomy, TaxonomyId, TaxonomyStatus};
pub use repo::{RepoError, RepoResult};
pub use search::{search_all, SearchError, SearchHit, SearchPage, SearchQuery, SearchResult};
pub use service::category_service::{CategoryService, CategoryServiceError};
pub use service::classification_service::{ClassificationService, ClassificationServiceError};
pub use service::namespace_service::{NamespaceService, NamespaceServiceError};

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
