//! Taxonomy records and lifecycle rules.
//!
//! # Invariants
//! - `(tenant_id, namespace, slug)` is unique among live taxonomies.
//! - `version` starts at 1 and grows by exactly one per update.
//! - `archived` is terminal.

use crate::model::metadata::Metadata;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaxonomyId = Uuid;

/// Taxonomy lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyStatus {
    Draft,
    Active,
    Deprecated,
    Archived,
}

impl TaxonomyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "deprecated" => Some(Self::Deprecated),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Whether a status change from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: TaxonomyStatus) -> bool {
        use TaxonomyStatus::{Active, Archived, Deprecated, Draft};
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Archived)
                | (Active, Deprecated)
                | (Active, Archived)
                | (Deprecated, Active)
                | (Deprecated, Archived)
        )
    }

    /// Categories may only be edited while the scheme is being built or in use.
    pub fn accepts_category_writes(self) -> bool {
        matches!(self, Self::Draft | Self::Active)
    }
}

/// Named, versioned classification scheme within a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub id: TaxonomyId,
    pub tenant_id: String,
    /// Slug of the owning namespace.
    pub namespace: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub version: u32,
    pub status: TaxonomyStatus,
    pub is_hierarchical: bool,
    pub max_depth: u32,
    pub metadata: Metadata,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Taxonomy {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Deepest level a category may occupy. Flat taxonomies only hold roots.
    pub fn effective_max_depth(&self) -> u32 {
        if self.is_hierarchical {
            self.max_depth
        } else {
            0
        }
    }
}
