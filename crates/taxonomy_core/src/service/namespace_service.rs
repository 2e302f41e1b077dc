//! Namespace registry and taxonomy lifecycle use-cases.
//!
//! # Responsibility
//! - Create, update and retire namespaces and their quotas/schemas.
//! - Create taxonomies, apply versioned updates and status transitions.
//!
//! # Invariants
//! - Namespace slugs are unique per tenant; taxonomy slugs per
//!   tenant+namespace.
//! - Every taxonomy update or status change bumps `version` by exactly 1.
//! - Lowering `max_depth` (or turning hierarchy off) never strands a live
//!   category below the new limit.

use crate::audit::{AuditAction, AuditEntity, AuditEvent, AuditSink, LogAuditSink};
use crate::context::{AccessError, Permission, RequestContext};
use crate::error::{ClassifiedError, ErrorKind};
use crate::model::metadata::{Metadata, MetadataSchema};
use crate::model::namespace::{Namespace, NamespaceId, NamespaceUsage};
use crate::model::taxonomy::{Taxonomy, TaxonomyId, TaxonomyStatus};
use crate::model::validation::{
    normalize_description, normalize_name, normalize_slug, ValidationError,
};
use crate::repo::namespace_repo::{NamespaceRepository, TaxonomyDeletion};
use crate::repo::RepoError;
use crate::service::{now_epoch_ms, patch_field, repo_error_code, repo_error_kind};
use log::info;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Max depth applied when a new taxonomy does not name one.
pub const DEFAULT_MAX_DEPTH: u32 = 5;

/// Input for [`NamespaceService::create_namespace`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewNamespace {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quota_categories: Option<u32>,
    #[serde(default)]
    pub quota_classifications: Option<u32>,
    #[serde(default)]
    pub metadata_schema: MetadataSchema,
}

/// Patch for [`NamespaceService::update_namespace`]. Absent fields are kept;
/// an explicit `null` quota removes the limit.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NamespaceUpdate {
    #[serde(default)]
    pub name: Option<String>,
    /// Blank text clears the description.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "patch_field")]
    pub quota_categories: Option<Option<u32>>,
    #[serde(default, deserialize_with = "patch_field")]
    pub quota_classifications: Option<Option<u32>>,
    #[serde(default)]
    pub metadata_schema: Option<MetadataSchema>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Input for [`NamespaceService::create_taxonomy`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTaxonomy {
    pub namespace: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_hierarchical")]
    pub is_hierarchical: bool,
    /// Falls back to the service default when absent.
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_hierarchical() -> bool {
    true
}

/// Patch for [`NamespaceService::update_taxonomy`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaxonomyUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_hierarchical: Option<bool>,
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    /// When present, the update only applies to this version.
    #[serde(default)]
    pub expected_version: Option<u32>,
}

/// Errors from namespace/taxonomy operations.
#[derive(Debug)]
pub enum NamespaceServiceError {
    Validation(ValidationError),
    Forbidden(AccessError),
    NamespaceNotFound(String),
    NotFound { entity: &'static str, id: Uuid },
    TaxonomyNotFound { namespace: String, slug: String },
    /// Taxonomies cannot be created in a deactivated namespace.
    NamespaceInactive(String),
    DuplicateNamespace(String),
    DuplicateTaxonomy { namespace: String, slug: String },
    /// Namespace still owns live taxonomies.
    NamespaceInUse { slug: String, taxonomies: u64 },
    InvalidStatusTransition {
        from: TaxonomyStatus,
        to: TaxonomyStatus,
    },
    VersionConflict {
        id: TaxonomyId,
        expected: u32,
        actual: u32,
    },
    /// Live categories sit deeper than the requested limit.
    DepthExceeded { max_depth: u32, deepest_level: u32 },
    Repo(RepoError),
}

impl Display for NamespaceServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Forbidden(err) => write!(f, "{err}"),
            Self::NamespaceNotFound(slug) => write!(f, "namespace not found: {slug}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::TaxonomyNotFound { namespace, slug } => {
                write!(f, "taxonomy not found: {namespace}/{slug}")
            }
            Self::NamespaceInactive(slug) => write!(f, "namespace `{slug}` is inactive"),
            Self::DuplicateNamespace(slug) => write!(f, "namespace `{slug}` already exists"),
            Self::DuplicateTaxonomy { namespace, slug } => {
                write!(f, "taxonomy `{slug}` already exists in namespace `{namespace}`")
            }
            Self::NamespaceInUse { slug, taxonomies } => write!(
                f,
                "namespace `{slug}` still owns {taxonomies} live taxonomies"
            ),
            Self::InvalidStatusTransition { from, to } => write!(
                f,
                "taxonomy status cannot change from `{}` to `{}`",
                from.as_str(),
                to.as_str()
            ),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "taxonomy {id} is at version {actual}, expected {expected}"
            ),
            Self::DepthExceeded {
                max_depth,
                deepest_level,
            } => write!(
                f,
                "max depth {max_depth} is below deepest live category level {deepest_level}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for NamespaceServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Forbidden(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl ClassifiedError for NamespaceServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::NamespaceInactive(_)
            | Self::InvalidStatusTransition { .. }
            | Self::DepthExceeded { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NamespaceNotFound(_) | Self::NotFound { .. } | Self::TaxonomyNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::DuplicateNamespace(_)
            | Self::DuplicateTaxonomy { .. }
            | Self::NamespaceInUse { .. }
            | Self::VersionConflict { .. } => ErrorKind::Conflict,
            Self::Repo(err) => repo_error_kind(err),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Forbidden(_) => "forbidden",
            Self::NamespaceNotFound(_) | Self::NotFound { .. } | Self::TaxonomyNotFound { .. } => {
                "not_found"
            }
            Self::NamespaceInactive(_) => "namespace_inactive",
            Self::DuplicateNamespace(_) | Self::DuplicateTaxonomy { .. } => "duplicate_slug",
            Self::NamespaceInUse { .. } => "namespace_in_use",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::VersionConflict { .. } => "version_conflict",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::Repo(err) => repo_error_code(err),
        }
    }
}

impl From<ValidationError> for NamespaceServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<AccessError> for NamespaceServiceError {
    fn from(value: AccessError) -> Self {
        Self::Forbidden(value)
    }
}

impl From<RepoError> for NamespaceServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Repo(other),
        }
    }
}

pub type NamespaceServiceResult<T> = Result<T, NamespaceServiceError>;

/// Namespace registry facade.
pub struct NamespaceService<R: NamespaceRepository> {
    repo: R,
    audit: Arc<dyn AuditSink>,
    default_max_depth: u32,
}

impl<R: NamespaceRepository> NamespaceService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            audit: Arc::new(LogAuditSink),
            default_max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_default_max_depth(mut self, max_depth: u32) -> Self {
        self.default_max_depth = max_depth;
        self
    }

    pub fn create_namespace(
        &self,
        ctx: &RequestContext,
        input: NewNamespace,
    ) -> NamespaceServiceResult<Namespace> {
        ctx.require(Permission::NamespaceAdmin)?;
        let slug = normalize_slug(&input.slug)?;
        let now = now_epoch_ms();
        let namespace = Namespace {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id().to_string(),
            slug: slug.clone(),
            name: normalize_name(&input.name)?,
            description: normalize_description(input.description),
            quota_categories: input.quota_categories,
            quota_classifications: input.quota_classifications,
            metadata_schema: input.metadata_schema,
            is_active: true,
            created_by: ctx.user_id().to_string(),
            updated_by: ctx.user_id().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match self.repo.insert_namespace(&namespace) {
            Ok(()) => {}
            Err(RepoError::UniqueViolation(_)) => {
                return Err(NamespaceServiceError::DuplicateNamespace(slug))
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=namespace_create module=namespace status=ok tenant_id={} slug={}",
            namespace.tenant_id, namespace.slug
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Create, AuditEntity::Namespace, namespace.id, now)
                .after(&namespace),
        );
        Ok(namespace)
    }

    pub fn get_namespace(
        &self,
        ctx: &RequestContext,
        id: NamespaceId,
    ) -> NamespaceServiceResult<Namespace> {
        ctx.require(Permission::TaxonomyRead)?;
        self.load_namespace(ctx, id)
    }

    /// Resolves a live namespace of the caller's tenant by slug.
    pub fn find_namespace(
        &self,
        ctx: &RequestContext,
        slug: &str,
    ) -> NamespaceServiceResult<Namespace> {
        ctx.require(Permission::TaxonomyRead)?;
        self.namespace_by_slug(ctx, slug)
    }

    pub fn list_namespaces(&self, ctx: &RequestContext) -> NamespaceServiceResult<Vec<Namespace>> {
        ctx.require(Permission::TaxonomyRead)?;
        Ok(self.repo.list_namespaces(ctx.tenant_id())?)
    }

    pub fn update_namespace(
        &self,
        ctx: &RequestContext,
        id: NamespaceId,
        patch: NamespaceUpdate,
    ) -> NamespaceServiceResult<Namespace> {
        ctx.require(Permission::NamespaceAdmin)?;
        let before = self.load_namespace(ctx, id)?;
        let mut after = before.clone();

        if let Some(name) = patch.name {
            after.name = normalize_name(&name)?;
        }
        if let Some(description) = patch.description {
            after.description = normalize_description(Some(description));
        }
        if let Some(quota) = patch.quota_categories {
            after.quota_categories = quota;
        }
        if let Some(quota) = patch.quota_classifications {
            after.quota_classifications = quota;
        }
        if let Some(schema) = patch.metadata_schema {
            after.metadata_schema = schema;
        }
        if let Some(is_active) = patch.is_active {
            after.is_active = is_active;
        }
        after.updated_by = ctx.user_id().to_string();
        after.updated_at = now_epoch_ms();

        self.repo.update_namespace(&after)?;
        info!(
            "event=namespace_update module=namespace status=ok tenant_id={} slug={}",
            after.tenant_id, after.slug
        );
        self.audit.record(
            AuditEvent::new(
                ctx,
                AuditAction::Update,
                AuditEntity::Namespace,
                after.id,
                after.updated_at,
            )
            .before(&before)
            .after(&after),
        );
        Ok(after)
    }

    /// Soft-deletes an empty namespace.
    pub fn delete_namespace(&self, ctx: &RequestContext, id: NamespaceId) -> NamespaceServiceResult<()> {
        ctx.require(Permission::NamespaceAdmin)?;
        let namespace = self.load_namespace(ctx, id)?;
        let usage = self
            .repo
            .namespace_usage(ctx.tenant_id(), &namespace.slug, now_epoch_ms())?;
        if usage.taxonomies > 0 {
            return Err(NamespaceServiceError::NamespaceInUse {
                slug: namespace.slug,
                taxonomies: usage.taxonomies,
            });
        }

        let now = now_epoch_ms();
        self.repo.soft_delete_namespace(id, ctx.user_id(), now)?;
        info!(
            "event=namespace_delete module=namespace status=ok tenant_id={} slug={}",
            namespace.tenant_id, namespace.slug
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Delete, AuditEntity::Namespace, id, now)
                .before(&namespace),
        );
        Ok(())
    }

    /// Live counts used for quota checks.
    pub fn usage(&self, ctx: &RequestContext, slug: &str) -> NamespaceServiceResult<NamespaceUsage> {
        ctx.require(Permission::TaxonomyRead)?;
        let namespace = self.namespace_by_slug(ctx, slug)?;
        Ok(self
            .repo
            .namespace_usage(ctx.tenant_id(), &namespace.slug, now_epoch_ms())?)
    }

    /// Creates a draft taxonomy at version 1.
    pub fn create_taxonomy(
        &self,
        ctx: &RequestContext,
        input: NewTaxonomy,
    ) -> NamespaceServiceResult<Taxonomy> {
        ctx.require(Permission::TaxonomyWrite)?;
        let namespace = self.namespace_by_slug(ctx, input.namespace.trim())?;
        if !namespace.is_active {
            return Err(NamespaceServiceError::NamespaceInactive(namespace.slug));
        }
        namespace
            .metadata_schema
            .validate(&input.metadata)
            .map_err(ValidationError::from)?;

        let slug = normalize_slug(&input.slug)?;
        let now = now_epoch_ms();
        let taxonomy = Taxonomy {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id().to_string(),
            namespace: namespace.slug.clone(),
            name: normalize_name(&input.name)?,
            slug: slug.clone(),
            description: normalize_description(input.description),
            version: 1,
            status: TaxonomyStatus::Draft,
            is_hierarchical: input.is_hierarchical,
            max_depth: input.max_depth.unwrap_or(self.default_max_depth),
            metadata: input.metadata,
            created_by: ctx.user_id().to_string(),
            updated_by: ctx.user_id().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match self.repo.insert_taxonomy(&taxonomy) {
            Ok(()) => {}
            Err(RepoError::UniqueViolation(_)) => {
                return Err(NamespaceServiceError::DuplicateTaxonomy {
                    namespace: namespace.slug,
                    slug,
                })
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=taxonomy_create module=namespace status=ok tenant_id={} namespace={} slug={}",
            taxonomy.tenant_id, taxonomy.namespace, taxonomy.slug
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Create, AuditEntity::Taxonomy, taxonomy.id, now)
                .after(&taxonomy),
        );
        Ok(taxonomy)
    }

    pub fn get_taxonomy(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
    ) -> NamespaceServiceResult<Taxonomy> {
        ctx.require(Permission::TaxonomyRead)?;
        self.load_taxonomy(ctx, id)
    }

    pub fn find_taxonomy(
        &self,
        ctx: &RequestContext,
        namespace: &str,
        slug: &str,
    ) -> NamespaceServiceResult<Taxonomy> {
        ctx.require(Permission::TaxonomyRead)?;
        self.repo
            .find_taxonomy(ctx.tenant_id(), namespace, slug)?
            .ok_or_else(|| NamespaceServiceError::TaxonomyNotFound {
                namespace: namespace.to_string(),
                slug: slug.to_string(),
            })
    }

    pub fn list_taxonomies(
        &self,
        ctx: &RequestContext,
        namespace: Option<&str>,
    ) -> NamespaceServiceResult<Vec<Taxonomy>> {
        ctx.require(Permission::TaxonomyRead)?;
        Ok(self.repo.list_taxonomies(ctx.tenant_id(), namespace)?)
    }

    /// Applies a patch and bumps `version`.
    pub fn update_taxonomy(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
        patch: TaxonomyUpdate,
    ) -> NamespaceServiceResult<Taxonomy> {
        ctx.require(Permission::TaxonomyWrite)?;
        let before = self.load_taxonomy(ctx, id)?;
        check_expected_version(&before, patch.expected_version)?;

        let mut after = before.clone();
        if let Some(name) = patch.name {
            after.name = normalize_name(&name)?;
        }
        if let Some(description) = patch.description {
            after.description = normalize_description(Some(description));
        }
        if let Some(is_hierarchical) = patch.is_hierarchical {
            after.is_hierarchical = is_hierarchical;
        }
        if let Some(max_depth) = patch.max_depth {
            after.max_depth = max_depth;
        }
        if let Some(metadata) = patch.metadata {
            let namespace = self.namespace_by_slug(ctx, &before.namespace)?;
            namespace
                .metadata_schema
                .validate(&metadata)
                .map_err(ValidationError::from)?;
            after.metadata = metadata;
        }

        if after.effective_max_depth() < before.effective_max_depth() {
            if let Some(deepest_level) = self.repo.deepest_category_level(id)? {
                if deepest_level > after.effective_max_depth() {
                    return Err(NamespaceServiceError::DepthExceeded {
                        max_depth: after.effective_max_depth(),
                        deepest_level,
                    });
                }
            }
        }

        self.persist_new_version(ctx, before, after, AuditAction::Update)
    }

    /// Moves a taxonomy along its lifecycle and bumps `version`.
    pub fn set_taxonomy_status(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
        status: TaxonomyStatus,
        expected_version: Option<u32>,
    ) -> NamespaceServiceResult<Taxonomy> {
        ctx.require(Permission::TaxonomyWrite)?;
        let before = self.load_taxonomy(ctx, id)?;
        check_expected_version(&before, expected_version)?;
        if !before.status.can_transition_to(status) {
            return Err(NamespaceServiceError::InvalidStatusTransition {
                from: before.status,
                to: status,
            });
        }

        let mut after = before.clone();
        after.status = status;
        self.persist_new_version(ctx, before, after, AuditAction::StatusChange)
    }

    /// Soft-deletes a taxonomy with its categories and classifications.
    pub fn delete_taxonomy(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
    ) -> NamespaceServiceResult<TaxonomyDeletion> {
        ctx.require(Permission::TaxonomyWrite)?;
        let taxonomy = self.load_taxonomy(ctx, id)?;
        let now = now_epoch_ms();
        let outcome = self.repo.soft_delete_taxonomy(id, ctx.user_id(), now)?;
        info!(
            "event=taxonomy_delete module=namespace status=ok tenant_id={} taxonomy_id={} categories={} classifications={}",
            taxonomy.tenant_id, id, outcome.categories, outcome.classifications
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Delete, AuditEntity::Taxonomy, id, now)
                .before(&taxonomy),
        );
        Ok(outcome)
    }

    fn persist_new_version(
        &self,
        ctx: &RequestContext,
        before: Taxonomy,
        mut after: Taxonomy,
        action: AuditAction,
    ) -> NamespaceServiceResult<Taxonomy> {
        after.version = before.version + 1;
        after.updated_by = ctx.user_id().to_string();
        after.updated_at = now_epoch_ms();

        match self.repo.update_taxonomy(&after, before.version) {
            Ok(()) => {}
            Err(RepoError::VersionConflict { id, expected }) => {
                let actual = self
                    .repo
                    .get_taxonomy(id, true)?
                    .map_or(expected, |current| current.version);
                return Err(NamespaceServiceError::VersionConflict {
                    id,
                    expected,
                    actual,
                });
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=taxonomy_update module=namespace status=ok tenant_id={} taxonomy_id={} version={} status_value={}",
            after.tenant_id,
            after.id,
            after.version,
            after.status.as_str()
        );
        self.audit.record(
            AuditEvent::new(ctx, action, AuditEntity::Taxonomy, after.id, after.updated_at)
                .before(&before)
                .after(&after),
        );
        Ok(after)
    }

    fn load_namespace(
        &self,
        ctx: &RequestContext,
        id: NamespaceId,
    ) -> NamespaceServiceResult<Namespace> {
        let namespace = self
            .repo
            .get_namespace(id, false)?
            .ok_or(NamespaceServiceError::NotFound {
                entity: "namespace",
                id,
            })?;
        ctx.ensure_tenant(&namespace.tenant_id)?;
        Ok(namespace)
    }

    fn namespace_by_slug(
        &self,
        ctx: &RequestContext,
        slug: &str,
    ) -> NamespaceServiceResult<Namespace> {
        self.repo
            .find_namespace(ctx.tenant_id(), slug)?
            .ok_or_else(|| NamespaceServiceError::NamespaceNotFound(slug.to_string()))
    }

    fn load_taxonomy(&self, ctx: &RequestContext, id: TaxonomyId) -> NamespaceServiceResult<Taxonomy> {
        let taxonomy = self
            .repo
            .get_taxonomy(id, false)?
            .ok_or(NamespaceServiceError::NotFound {
                entity: "taxonomy",
                id,
            })?;
        ctx.ensure_tenant(&taxonomy.tenant_id)?;
        Ok(taxonomy)
    }
}

fn check_expected_version(
    taxonomy: &Taxonomy,
    expected_version: Option<u32>,
) -> NamespaceServiceResult<()> {
    match expected_version {
        Some(expected) if expected != taxonomy.version => {
            Err(NamespaceServiceError::VersionConflict {
                id: taxonomy.id,
                expected,
                actual: taxonomy.version,
            })
        }
        _ => Ok(()),
    }
}
