//! Category hierarchy use-cases.
//!
//! # Responsibility
//! - Validate hierarchy invariants above the repository layer.
//! - Provide create, update, move, delete and read operations over one
//!   taxonomy's category tree.
//!
//! # Invariants
//! - Parents live in the same taxonomy and are not soft-deleted.
//! - `level` never exceeds the taxonomy's effective max depth.
//! - Moves never place a node under itself or one of its descendants.
//! - Structural writes only happen while the taxonomy is draft or active.

use crate::audit::{AuditAction, AuditEntity, AuditEvent, AuditSink, LogAuditSink};
use crate::context::{AccessError, Permission, RequestContext};
use crate::error::{ClassifiedError, ErrorKind};
use crate::model::category::{
    build_category_tree, check_hierarchy, child_level, child_path, plan_subtree_rewrite,
    subtree_height, Category, CategoryDeleteMode, CategoryId, CategoryTreeNode, HierarchyIssue,
    PathRewrite,
};
use crate::model::metadata::Metadata;
use crate::model::namespace::{Namespace, QuotaExceeded, QuotaKind};
use crate::model::taxonomy::{Taxonomy, TaxonomyId, TaxonomyStatus};
use crate::model::validation::{
    normalize_description, normalize_name, normalize_slug, validate_confidence, ValidationError,
};
use crate::repo::category_repo::{
    CategoryDeletion, CategoryDeletionOutcome, CategoryRepository, SiblingPlacement,
    SubtreeUpdate,
};
use crate::repo::namespace_repo::NamespaceRepository;
use crate::repo::RepoError;
use crate::service::{now_epoch_ms, patch_field, repo_error_code, repo_error_kind};
use log::{info, warn};
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Input for [`CategoryService::create_category`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewCategory {
    pub taxonomy_id: TaxonomyId,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_active() -> bool {
    true
}

/// Patch for [`CategoryService::update_category`]. A new `slug` rewrites
/// the path of the whole subtree.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CategoryUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "patch_field")]
    pub confidence_score: Option<Option<f64>>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Errors from category hierarchy operations.
#[derive(Debug)]
pub enum CategoryServiceError {
    Validation(ValidationError),
    Forbidden(AccessError),
    NotFound { entity: &'static str, id: Uuid },
    /// Parent is missing, soft-deleted or belongs to another taxonomy.
    ParentNotFound(CategoryId),
    NamespaceNotFound(String),
    /// Owning namespace is switched off.
    NamespaceInactive(String),
    /// Taxonomy status does not accept category writes.
    TaxonomyNotWritable {
        id: TaxonomyId,
        status: TaxonomyStatus,
    },
    DepthExceeded { level: u32, max_depth: u32 },
    CycleDetected {
        id: CategoryId,
        parent_id: CategoryId,
    },
    HasChildren { id: CategoryId, children: usize },
    /// Another live category already owns the path.
    DuplicatePath(String),
    Quota(QuotaExceeded),
    /// Stored paths or levels disagree with the parent chain.
    HierarchyDrift(CategoryId),
    Repo(RepoError),
}

impl Display for CategoryServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Forbidden(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent category not found: {id}"),
            Self::NamespaceNotFound(slug) => write!(f, "namespace not found: {slug}"),
            Self::NamespaceInactive(slug) => write!(f, "namespace `{slug}` is inactive"),
            Self::TaxonomyNotWritable { id, status } => write!(
                f,
                "taxonomy {id} is {} and does not accept category changes",
                status.as_str()
            ),
            Self::DepthExceeded { level, max_depth } => {
                write!(f, "level {level} exceeds max depth {max_depth}")
            }
            Self::CycleDetected { id, parent_id } => write!(
                f,
                "move would create cycle: category {id} under {parent_id}"
            ),
            Self::HasChildren { id, children } => {
                write!(f, "category {id} has {children} live children")
            }
            Self::DuplicatePath(path) => write!(f, "category path `{path}` already exists"),
            Self::Quota(err) => write!(f, "{err}"),
            Self::HierarchyDrift(id) => {
                write!(f, "stored hierarchy is inconsistent around category {id}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CategoryServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Forbidden(err) => Some(err),
            Self::Quota(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl ClassifiedError for CategoryServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::NamespaceInactive(_)
            | Self::TaxonomyNotWritable { .. }
            | Self::DepthExceeded { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound { .. } | Self::ParentNotFound(_) | Self::NamespaceNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::CycleDetected { .. } | Self::HasChildren { .. } | Self::DuplicatePath(_) => {
                ErrorKind::Conflict
            }
            Self::Quota(_) => ErrorKind::QuotaExceeded,
            Self::HierarchyDrift(_) => ErrorKind::Internal,
            Self::Repo(err) => repo_error_kind(err),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidScore(_)) => "invalid_score",
            Self::Validation(_) => "validation_failed",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound { .. } | Self::NamespaceNotFound(_) => "not_found",
            Self::ParentNotFound(_) => "parent_not_found",
            Self::NamespaceInactive(_) => "namespace_inactive",
            Self::TaxonomyNotWritable { .. } => "taxonomy_not_writable",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::HasChildren { .. } => "has_children",
            Self::DuplicatePath(_) => "duplicate_path",
            Self::Quota(_) => "quota_exceeded",
            Self::HierarchyDrift(_) => "hierarchy_drift",
            Self::Repo(err) => repo_error_code(err),
        }
    }
}

impl From<ValidationError> for CategoryServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<AccessError> for CategoryServiceError {
    fn from(value: AccessError) -> Self {
        Self::Forbidden(value)
    }
}

impl From<QuotaExceeded> for CategoryServiceError {
    fn from(value: QuotaExceeded) -> Self {
        Self::Quota(value)
    }
}

impl From<RepoError> for CategoryServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Repo(other),
        }
    }
}

pub type CategoryServiceResult<T> = Result<T, CategoryServiceError>;

/// Category hierarchy service facade.
pub struct CategoryService<C: CategoryRepository, N: NamespaceRepository> {
    categories: C,
    namespaces: N,
    audit: Arc<dyn AuditSink>,
}

impl<C: CategoryRepository, N: NamespaceRepository> CategoryService<C, N> {
    /// Creates service from repository implementations.
    pub fn new(categories: C, namespaces: N) -> Self {
        Self {
            categories,
            namespaces,
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Creates one leaf category under an optional parent.
    pub fn create_category(
        &self,
        ctx: &RequestContext,
        input: NewCategory,
    ) -> CategoryServiceResult<Category> {
        ctx.require(Permission::TaxonomyWrite)?;
        let (taxonomy, namespace) = self.writable_scope(ctx, input.taxonomy_id)?;

        let name = normalize_name(&input.name)?;
        let slug = normalize_slug(&input.slug)?;
        let confidence_score = input
            .confidence_score
            .map(validate_confidence)
            .transpose()?;
        namespace
            .metadata_schema
            .validate(&input.metadata)
            .map_err(ValidationError::from)?;

        let parent = match input.parent_id {
            Some(parent_id) => Some(self.parent_in(&taxonomy, parent_id)?),
            None => None,
        };
        let level = child_level(parent.as_ref().map(|row| row.level));
        let max_depth = taxonomy.effective_max_depth();
        if level > max_depth {
            return Err(CategoryServiceError::DepthExceeded { level, max_depth });
        }

        let path = child_path(parent.as_ref().map(|row| row.path.as_str()), &slug);
        if self
            .categories
            .find_category_by_path(taxonomy.id, &path)?
            .is_some()
        {
            return Err(CategoryServiceError::DuplicatePath(path));
        }

        let usage = self
            .namespaces
            .namespace_usage(ctx.tenant_id(), &namespace.slug, now_epoch_ms())?;
        namespace.check_quota(QuotaKind::Categories, &usage, 1)?;

        let now = now_epoch_ms();
        let draft = Category {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id().to_string(),
            taxonomy_id: taxonomy.id,
            parent_id: parent.as_ref().map(|row| row.id),
            name,
            slug,
            description: normalize_description(input.description),
            level,
            path: path.clone(),
            sort_order: 0,
            is_leaf: true,
            is_active: input.is_active,
            confidence_score,
            metadata: input.metadata,
            created_by: ctx.user_id().to_string(),
            updated_by: ctx.user_id().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let category = match self.categories.insert_category(draft) {
            Ok(category) => category,
            Err(RepoError::UniqueViolation(_)) => {
                return Err(CategoryServiceError::DuplicatePath(path))
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            "event=category_create module=category status=ok tenant_id={} taxonomy_id={} category_id={} level={}",
            category.tenant_id, category.taxonomy_id, category.id, category.level
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Create, AuditEntity::Category, category.id, now)
                .after(&category),
        );
        Ok(category)
    }

    /// Updates display fields; a slug change rewrites the subtree paths.
    pub fn update_category(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
        patch: CategoryUpdate,
    ) -> CategoryServiceResult<Category> {
        ctx.require(Permission::TaxonomyWrite)?;
        let before = self.load_category(ctx, id)?;
        let (taxonomy, namespace) = self.writable_scope(ctx, before.taxonomy_id)?;

        let mut after = before.clone();
        if let Some(name) = patch.name {
            after.name = normalize_name(&name)?;
        }
        if let Some(description) = patch.description {
            after.description = normalize_description(Some(description));
        }
        if let Some(is_active) = patch.is_active {
            after.is_active = is_active;
        }
        if let Some(score) = patch.confidence_score {
            after.confidence_score = score.map(validate_confidence).transpose()?;
        }
        if let Some(metadata) = patch.metadata {
            namespace
                .metadata_schema
                .validate(&metadata)
                .map_err(ValidationError::from)?;
            after.metadata = metadata;
        }

        let now = now_epoch_ms();
        after.updated_by = ctx.user_id().to_string();
        after.updated_at = now;

        let renamed = match patch.slug {
            Some(slug) => {
                let slug = normalize_slug(&slug)?;
                (slug != before.slug).then_some(slug)
            }
            None => None,
        };

        if let Some(slug) = renamed {
            let parent_path = self.parent_path(&before)?;
            let new_path = child_path(parent_path.as_deref(), &slug);
            if self
                .categories
                .find_category_by_path(taxonomy.id, &new_path)?
                .is_some()
            {
                return Err(CategoryServiceError::DuplicatePath(new_path));
            }

            let subtree = self.categories.list_subtree(id)?;
            let rewrites = plan_subtree_rewrite(&subtree, &before, &new_path, before.level)
                .map_err(CategoryServiceError::HierarchyDrift)?;
            let update = SubtreeUpdate {
                taxonomy_id: taxonomy.id,
                root_id: id,
                slug,
                rewrites,
                placement: None,
                fields: Some(after),
                actor: ctx.user_id().to_string(),
                at: now,
            };
            match self.categories.apply_subtree_update(&update) {
                Ok(()) => {}
                Err(RepoError::UniqueViolation(_)) => {
                    return Err(CategoryServiceError::DuplicatePath(new_path))
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            self.categories.update_category(&after)?;
        }
        let after = self.load_category(ctx, id)?;

        info!(
            "event=category_update module=category status=ok tenant_id={} category_id={}",
            after.tenant_id, after.id
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Update, AuditEntity::Category, id, now)
                .before(&before)
                .after(&after),
        );
        Ok(after)
    }

    /// Moves one category (with its subtree) under a new parent, or to the
    /// root when `new_parent_id` is `None`, at an optional sibling index.
    pub fn move_category(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
        new_parent_id: Option<CategoryId>,
        target_order: Option<i64>,
    ) -> CategoryServiceResult<Category> {
        ctx.require(Permission::TaxonomyWrite)?;
        let before = self.load_category(ctx, id)?;
        let (taxonomy, _) = self.writable_scope(ctx, before.taxonomy_id)?;
        let subtree = self.categories.list_subtree(id)?;

        let parent = match new_parent_id {
            Some(parent_id) => {
                if subtree.iter().any(|row| row.id == parent_id) {
                    warn!(
                        "event=category_move module=category status=error reason=cycle category_id={id} parent_id={parent_id}"
                    );
                    return Err(CategoryServiceError::CycleDetected { id, parent_id });
                }
                Some(self.parent_in(&taxonomy, parent_id)?)
            }
            None => None,
        };

        let new_level = child_level(parent.as_ref().map(|row| row.level));
        let deepest = new_level + subtree_height(&subtree, &before);
        let max_depth = taxonomy.effective_max_depth();
        if deepest > max_depth {
            return Err(CategoryServiceError::DepthExceeded {
                level: deepest,
                max_depth,
            });
        }

        let new_path = child_path(parent.as_ref().map(|row| row.path.as_str()), &before.slug);
        if new_path != before.path
            && self
                .categories
                .find_category_by_path(taxonomy.id, &new_path)?
                .is_some()
        {
            return Err(CategoryServiceError::DuplicatePath(new_path));
        }

        let rewrites = plan_subtree_rewrite(&subtree, &before, &new_path, new_level)
            .map_err(CategoryServiceError::HierarchyDrift)?;
        let now = now_epoch_ms();
        let update = SubtreeUpdate {
            taxonomy_id: taxonomy.id,
            root_id: id,
            slug: before.slug.clone(),
            rewrites,
            placement: Some(SiblingPlacement {
                previous_parent_id: before.parent_id,
                new_parent_id,
                target_order,
            }),
            fields: None,
            actor: ctx.user_id().to_string(),
            at: now,
        };
        match self.categories.apply_subtree_update(&update) {
            Ok(()) => {}
            Err(RepoError::UniqueViolation(_)) => {
                return Err(CategoryServiceError::DuplicatePath(new_path))
            }
            Err(err) => return Err(err.into()),
        }

        let after = self.load_category(ctx, id)?;
        info!(
            "event=category_move module=category status=ok tenant_id={} category_id={} subtree_size={} level={}",
            after.tenant_id,
            id,
            subtree.len(),
            after.level
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Move, AuditEntity::Category, id, now)
                .before(&before)
                .after(&after),
        );
        Ok(after)
    }

    /// Soft-deletes one category according to `mode`.
    pub fn delete_category(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
        mode: CategoryDeleteMode,
    ) -> CategoryServiceResult<CategoryDeletionOutcome> {
        ctx.require(Permission::TaxonomyWrite)?;
        let category = self.load_category(ctx, id)?;
        let (taxonomy, _) = self.writable_scope(ctx, category.taxonomy_id)?;
        let children = self.categories.list_children(taxonomy.id, Some(id))?;

        let descendant_rewrites = match mode {
            CategoryDeleteMode::Restrict if !children.is_empty() => {
                return Err(CategoryServiceError::HasChildren {
                    id,
                    children: children.len(),
                });
            }
            CategoryDeleteMode::Reparent => self.plan_reparent(&category, &children)?,
            _ => Vec::new(),
        };

        let now = now_epoch_ms();
        let outcome = match self.categories.delete_category(&CategoryDeletion {
            taxonomy_id: taxonomy.id,
            id,
            parent_id: category.parent_id,
            mode,
            descendant_rewrites,
            actor: ctx.user_id().to_string(),
            at: now,
        }) {
            Ok(outcome) => outcome,
            Err(RepoError::HasChildren { id }) => {
                return Err(CategoryServiceError::HasChildren {
                    id,
                    children: children.len(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            "event=category_delete module=category status=ok tenant_id={} category_id={} mode={} categories={} classifications={} reparented={}",
            category.tenant_id,
            id,
            mode.as_str(),
            outcome.categories,
            outcome.classifications,
            outcome.reparented
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Delete, AuditEntity::Category, id, now)
                .before(&category),
        );
        Ok(outcome)
    }

    pub fn get_category(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
    ) -> CategoryServiceResult<Category> {
        ctx.require(Permission::TaxonomyRead)?;
        self.load_category(ctx, id)
    }

    /// Lists live children ordered by `sort_order`, roots when `parent_id`
    /// is `None`.
    pub fn list_children(
        &self,
        ctx: &RequestContext,
        taxonomy_id: TaxonomyId,
        parent_id: Option<CategoryId>,
    ) -> CategoryServiceResult<Vec<Category>> {
        ctx.require(Permission::TaxonomyRead)?;
        let taxonomy = self.visible_taxonomy(ctx, taxonomy_id)?;
        if let Some(parent_id) = parent_id {
            self.parent_in(&taxonomy, parent_id)?;
        }
        Ok(self.categories.list_children(taxonomy.id, parent_id)?)
    }

    /// Root-first breadcrumb of `id`, excluding the category itself.
    pub fn ancestors(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
    ) -> CategoryServiceResult<Vec<Category>> {
        ctx.require(Permission::TaxonomyRead)?;
        self.load_category(ctx, id)?;
        Ok(self.categories.list_ancestors(id)?)
    }

    pub fn category_tree(
        &self,
        ctx: &RequestContext,
        taxonomy_id: TaxonomyId,
    ) -> CategoryServiceResult<Vec<CategoryTreeNode>> {
        ctx.require(Permission::TaxonomyRead)?;
        let taxonomy = self.visible_taxonomy(ctx, taxonomy_id)?;
        let categories = self.categories.list_taxonomy_categories(taxonomy.id)?;
        Ok(build_category_tree(categories))
    }

    /// Re-derives level, path and leaf flags and reports every mismatch.
    pub fn verify_hierarchy(
        &self,
        ctx: &RequestContext,
        taxonomy_id: TaxonomyId,
    ) -> CategoryServiceResult<Vec<HierarchyIssue>> {
        ctx.require(Permission::TaxonomyRead)?;
        let taxonomy = self.visible_taxonomy(ctx, taxonomy_id)?;
        let categories = self.categories.list_taxonomy_categories(taxonomy.id)?;
        let issues = check_hierarchy(&categories);
        if issues.is_empty() {
            info!(
                "event=hierarchy_verify module=category status=ok taxonomy_id={} categories={}",
                taxonomy.id,
                categories.len()
            );
        } else {
            warn!(
                "event=hierarchy_verify module=category status=error taxonomy_id={} issues={}",
                taxonomy.id,
                issues.len()
            );
        }
        Ok(issues)
    }

    fn plan_reparent(
        &self,
        category: &Category,
        children: &[Category],
    ) -> CategoryServiceResult<Vec<PathRewrite>> {
        let parent_path = self.parent_path(category)?;
        let mut rewrites = Vec::new();
        for child in children {
            let new_path = child_path(parent_path.as_deref(), &child.slug);
            if let Some(existing) = self
                .categories
                .find_category_by_path(category.taxonomy_id, &new_path)?
            {
                if existing.id != category.id {
                    return Err(CategoryServiceError::DuplicatePath(new_path));
                }
            }
            let subtree = self.categories.list_subtree(child.id)?;
            let planned = plan_subtree_rewrite(&subtree, child, &new_path, category.level)
                .map_err(CategoryServiceError::HierarchyDrift)?;
            rewrites.extend(planned);
        }
        Ok(rewrites)
    }

    fn parent_path(&self, category: &Category) -> CategoryServiceResult<Option<String>> {
        match category.parent_id {
            Some(parent_id) => {
                let parent = self
                    .categories
                    .get_category(parent_id, false)?
                    .ok_or(CategoryServiceError::HierarchyDrift(category.id))?;
                Ok(Some(parent.path))
            }
            None => Ok(None),
        }
    }

    fn parent_in(
        &self,
        taxonomy: &Taxonomy,
        parent_id: CategoryId,
    ) -> CategoryServiceResult<Category> {
        match self.categories.get_category(parent_id, false)? {
            Some(parent) if parent.taxonomy_id == taxonomy.id => Ok(parent),
            _ => Err(CategoryServiceError::ParentNotFound(parent_id)),
        }
    }

    fn load_category(&self, ctx: &RequestContext, id: CategoryId) -> CategoryServiceResult<Category> {
        let category = self
            .categories
            .get_category(id, false)?
            .ok_or(CategoryServiceError::NotFound {
                entity: "category",
                id,
            })?;
        ctx.ensure_tenant(&category.tenant_id)?;
        Ok(category)
    }

    fn visible_taxonomy(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
    ) -> CategoryServiceResult<Taxonomy> {
        let taxonomy = self
            .namespaces
            .get_taxonomy(id, false)?
            .ok_or(CategoryServiceError::NotFound {
                entity: "taxonomy",
                id,
            })?;
        ctx.ensure_tenant(&taxonomy.tenant_id)?;
        Ok(taxonomy)
    }

    /// Taxonomy and namespace of a category write; both must accept it.
    fn writable_scope(
        &self,
        ctx: &RequestContext,
        id: TaxonomyId,
    ) -> CategoryServiceResult<(Taxonomy, Namespace)> {
        let taxonomy = self.visible_taxonomy(ctx, id)?;
        if !taxonomy.status.accepts_category_writes() {
            return Err(CategoryServiceError::TaxonomyNotWritable {
                id,
                status: taxonomy.status,
            });
        }
        let namespace = self.namespace_of(ctx, &taxonomy)?;
        if !namespace.is_active {
            warn!(
                "event=category_write module=category status=error reason=namespace_inactive taxonomy_id={id} namespace={}",
                namespace.slug
            );
            return Err(CategoryServiceError::NamespaceInactive(namespace.slug));
        }
        Ok((taxonomy, namespace))
    }

    fn namespace_of(
        &self,
        ctx: &RequestContext,
        taxonomy: &Taxonomy,
    ) -> CategoryServiceResult<Namespace> {
        self.namespaces
            .find_namespace(ctx.tenant_id(), &taxonomy.namespace)?
            .ok_or_else(|| CategoryServiceError::NamespaceNotFound(taxonomy.namespace.clone()))
    }
}
