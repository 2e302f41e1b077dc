//! Namespace records and quota accounting.
//!
//! # Invariants
//! - `slug` is unique per tenant among live namespaces.
//! - A `None` quota is unlimited; `Some(0)` admits nothing.
//! - Usage counts only live rows (`deleted_at IS NULL`).

use crate::model::metadata::MetadataSchema;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type NamespaceId = Uuid;

/// Tenant-scoped grouping of taxonomies with quotas and a metadata schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: NamespaceId,
    pub tenant_id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// Maximum live categories across every taxonomy of this namespace.
    pub quota_categories: Option<u32>,
    /// Maximum active classifications across every taxonomy of this namespace.
    pub quota_classifications: Option<u32>,
    pub metadata_schema: MetadataSchema,
    pub is_active: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Namespace {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn quota(&self, kind: QuotaKind) -> Option<u32> {
        match kind {
            QuotaKind::Categories => self.quota_categories,
            QuotaKind::Classifications => self.quota_classifications,
        }
    }

    /// Checks whether `adding` more rows of `kind` still fit the quota.
    pub fn check_quota(
        &self,
        kind: QuotaKind,
        usage: &NamespaceUsage,
        adding: u64,
    ) -> Result<(), QuotaExceeded> {
        let Some(limit) = self.quota(kind) else {
            return Ok(());
        };
        let current = usage.count(kind);
        if current.saturating_add(adding) > u64::from(limit) {
            return Err(QuotaExceeded {
                namespace: self.slug.clone(),
                kind,
                limit,
                current,
            });
        }
        Ok(())
    }
}

/// Quota dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Categories,
    Classifications,
}

impl QuotaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Classifications => "classifications",
        }
    }
}

/// Live row counts of one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceUsage {
    pub taxonomies: u64,
    pub categories: u64,
    pub classifications: u64,
}

impl NamespaceUsage {
    pub fn count(&self, kind: QuotaKind) -> u64 {
        match kind {
            QuotaKind::Categories => self.categories,
            QuotaKind::Classifications => self.classifications,
        }
    }
}

/// Quota check failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub namespace: String,
    pub kind: QuotaKind,
    pub limit: u32,
    pub current: u64,
}

impl Display for QuotaExceeded {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "namespace `{}` {} quota exceeded: {} of {} used",
            self.namespace,
            self.kind.as_str(),
            self.current,
            self.limit
        )
    }
}

impl Error for QuotaExceeded {}
