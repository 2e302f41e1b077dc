//! Classification assignment use-cases.
//!
//! # Responsibility
//! - Assign entities to categories of active taxonomies.
//! - Drive the review lifecycle (confirm, reject, expire) and removal.
//!
//! # Invariants
//! - Confidence scores are finite and inside `[0, 1]`.
//! - `system`/`import` assignments start confirmed, others pending.
//! - One active assignment per tenant + entity + category.
//! - Expiry is only applied once `expires_at` has passed; scheduling the
//!   sweep is the caller's job.
//! - Reads report the effective status, so a lapsed row reads as expired
//!   and stops blocking reassignment before the sweep persists it.

use crate::audit::{AuditAction, AuditEntity, AuditEvent, AuditSink, LogAuditSink};
use crate::context::{AccessError, Permission, RequestContext};
use crate::error::{ClassifiedError, ErrorKind};
use crate::model::category::{Category, CategoryId};
use crate::model::classification::{
    AssignedBy, Classification, ClassificationId, ClassificationStatus,
};
use crate::model::metadata::Metadata;
use crate::model::namespace::{QuotaExceeded, QuotaKind};
use crate::model::taxonomy::{Taxonomy, TaxonomyStatus};
use crate::model::validation::{normalize_identifier, validate_confidence, ValidationError};
use crate::repo::category_repo::CategoryRepository;
use crate::repo::classification_repo::{ClassificationListQuery, ClassificationRepository};
use crate::repo::namespace_repo::NamespaceRepository;
use crate::repo::RepoError;
use crate::service::{now_epoch_ms, repo_error_code, repo_error_kind};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Input for [`ClassificationService::assign`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssignRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub category_id: CategoryId,
    pub assigned_by: AssignedBy,
    pub confidence_score: f64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Errors from classification operations.
#[derive(Debug)]
pub enum ClassificationServiceError {
    Validation(ValidationError),
    Forbidden(AccessError),
    NotFound { entity: &'static str, id: Uuid },
    NamespaceNotFound(String),
    /// Owning namespace is switched off.
    NamespaceInactive(String),
    /// Category's taxonomy is not active.
    InvalidCategory {
        category_id: CategoryId,
        taxonomy_status: TaxonomyStatus,
    },
    DuplicateAssignment {
        entity_type: String,
        entity_id: String,
        category_id: CategoryId,
    },
    InvalidTransition {
        from: ClassificationStatus,
        to: ClassificationStatus,
    },
    /// Status changed between read and write.
    StaleStatus(ClassificationId),
    Quota(QuotaExceeded),
    Repo(RepoError),
}

impl Display for ClassificationServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Forbidden(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::NamespaceNotFound(slug) => write!(f, "namespace not found: {slug}"),
            Self::NamespaceInactive(slug) => write!(f, "namespace `{slug}` is inactive"),
            Self::InvalidCategory {
                category_id,
                taxonomy_status,
            } => write!(
                f,
                "category {category_id} belongs to a {} taxonomy; only active taxonomies accept classifications",
                taxonomy_status.as_str()
            ),
            Self::DuplicateAssignment {
                entity_type,
                entity_id,
                category_id,
            } => write!(
                f,
                "{entity_type}/{entity_id} already has an active classification in category {category_id}"
            ),
            Self::InvalidTransition { from, to } => write!(
                f,
                "classification status cannot change from `{}` to `{}`",
                from.as_str(),
                to.as_str()
            ),
            Self::StaleStatus(id) => {
                write!(f, "classification {id} changed concurrently; reload and retry")
            }
            Self::Quota(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ClassificationServiceError {
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

impl ClassifiedError for ClassificationServiceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::NamespaceInactive(_)
            | Self::InvalidCategory { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Validation,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound { .. } | Self::NamespaceNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateAssignment { .. } | Self::StaleStatus(_) => ErrorKind::Conflict,
            Self::Quota(_) => ErrorKind::QuotaExceeded,
            Self::Repo(err) => repo_error_kind(err),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(ValidationError::InvalidScore(_)) => "invalid_score",
            Self::Validation(_) => "validation_failed",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound { .. } | Self::NamespaceNotFound(_) => "not_found",
            Self::NamespaceInactive(_) => "namespace_inactive",
            Self::InvalidCategory { .. } => "invalid_category",
            Self::DuplicateAssignment { .. } => "duplicate_assignment",
            Self::InvalidTransition { .. } => "invalid_status_transition",
            Self::StaleStatus(_) => "stale_status",
            Self::Quota(_) => "quota_exceeded",
            Self::Repo(err) => repo_error_code(err),
        }
    }
}

impl From<ValidationError> for ClassificationServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<AccessError> for ClassificationServiceError {
    fn from(value: AccessError) -> Self {
        Self::Forbidden(value)
    }
}

impl From<QuotaExceeded> for ClassificationServiceError {
    fn from(value: QuotaExceeded) -> Self {
        Self::Quota(value)
    }
}

impl From<RepoError> for ClassificationServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Repo(other),
        }
    }
}

pub type ClassificationServiceResult<T> = Result<T, ClassificationServiceError>;

/// Classification service facade.
pub struct ClassificationService<K, C, N>
where
    K: ClassificationRepository,
    C: CategoryRepository,
    N: NamespaceRepository,
{
    classifications: K,
    categories: C,
    namespaces: N,
    audit: Arc<dyn AuditSink>,
}

impl<K, C, N> ClassificationService<K, C, N>
where
    K: ClassificationRepository,
    C: CategoryRepository,
    N: NamespaceRepository,
{
    /// Creates service from repository implementations.
    pub fn new(classifications: K, categories: C, namespaces: N) -> Self {
        Self {
            classifications,
            categories,
            namespaces,
            audit: Arc::new(LogAuditSink),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Assigns one entity to one category.
    pub fn assign(
        &self,
        ctx: &RequestContext,
        request: AssignRequest,
    ) -> ClassificationServiceResult<Classification> {
        ctx.require(Permission::ClassificationWrite)?;
        let entity_type = normalize_identifier("entity_type", &request.entity_type)?;
        let entity_id = normalize_identifier("entity_id", &request.entity_id)?;
        let confidence_score = validate_confidence(request.confidence_score)?;
        let now = now_epoch_ms();
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(ValidationError::ExpiryInPast { expires_at, now }.into());
            }
        }

        let category = self.load_category(ctx, request.category_id)?;
        let taxonomy = self.taxonomy_of(&category)?;
        if taxonomy.status != TaxonomyStatus::Active {
            return Err(ClassificationServiceError::InvalidCategory {
                category_id: category.id,
                taxonomy_status: taxonomy.status,
            });
        }

        let namespace = self
            .namespaces
            .find_namespace(ctx.tenant_id(), &taxonomy.namespace)?
            .ok_or_else(|| ClassificationServiceError::NamespaceNotFound(taxonomy.namespace.clone()))?;
        if !namespace.is_active {
            return Err(ClassificationServiceError::NamespaceInactive(namespace.slug));
        }
        namespace
            .metadata_schema
            .validate(&request.metadata)
            .map_err(ValidationError::from)?;

        let duplicate = || ClassificationServiceError::DuplicateAssignment {
            entity_type: entity_type.clone(),
            entity_id: entity_id.clone(),
            category_id: category.id,
        };
        if let Some(existing) = self.classifications.find_active_assignment(
            ctx.tenant_id(),
            &entity_type,
            &entity_id,
            category.id,
        )? {
            if !existing.can_expire_at(now) {
                return Err(duplicate());
            }
            self.persist_expiry(ctx, &existing, now)?;
        }

        let usage = self
            .namespaces
            .namespace_usage(ctx.tenant_id(), &namespace.slug, now)?;
        namespace.check_quota(QuotaKind::Classifications, &usage, 1)?;

        let classification = Classification {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id().to_string(),
            entity_type: entity_type.clone(),
            entity_id: entity_id.clone(),
            taxonomy_id: taxonomy.id,
            category_id: category.id,
            confidence_score,
            assigned_by: request.assigned_by,
            status: request.assigned_by.initial_status(),
            expires_at: request.expires_at,
            metadata: request.metadata,
            created_by: ctx.user_id().to_string(),
            updated_by: ctx.user_id().to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        match self.classifications.insert_classification(&classification) {
            Ok(()) => {}
            Err(RepoError::UniqueViolation(_)) => return Err(duplicate()),
            Err(err) => return Err(err.into()),
        }

        info!(
            "event=classification_assign module=classification status=ok tenant_id={} classification_id={} category_id={} assigned_by={} status_value={}",
            classification.tenant_id,
            classification.id,
            classification.category_id,
            classification.assigned_by.as_str(),
            classification.status.as_str()
        );
        self.audit.record(
            AuditEvent::new(
                ctx,
                AuditAction::Create,
                AuditEntity::Classification,
                classification.id,
                now,
            )
            .after(&classification),
        );
        Ok(classification)
    }

    /// Assigns every request independently; one failure does not abort the
    /// rest. Results keep input order.
    pub fn bulk_assign(
        &self,
        ctx: &RequestContext,
        requests: Vec<AssignRequest>,
    ) -> Vec<ClassificationServiceResult<Classification>> {
        let total = requests.len();
        let results: Vec<_> = requests
            .into_iter()
            .map(|request| self.assign(ctx, request))
            .collect();
        let failed = results.iter().filter(|result| result.is_err()).count();
        info!(
            "event=classification_bulk_assign module=classification status=ok tenant_id={} total={} failed={}",
            ctx.tenant_id(),
            total,
            failed
        );
        results
    }

    pub fn confirm(
        &self,
        ctx: &RequestContext,
        id: ClassificationId,
    ) -> ClassificationServiceResult<Classification> {
        self.transition(ctx, id, ClassificationStatus::Confirmed)
    }

    pub fn reject(
        &self,
        ctx: &RequestContext,
        id: ClassificationId,
    ) -> ClassificationServiceResult<Classification> {
        self.transition(ctx, id, ClassificationStatus::Rejected)
    }

    /// Soft-deletes one classification.
    pub fn remove(&self, ctx: &RequestContext, id: ClassificationId) -> ClassificationServiceResult<()> {
        ctx.require(Permission::ClassificationWrite)?;
        let classification = self.load_classification(ctx, id)?;
        let now = now_epoch_ms();
        self.classifications
            .soft_delete_classification(id, ctx.user_id(), now)?;
        info!(
            "event=classification_remove module=classification status=ok tenant_id={} classification_id={}",
            classification.tenant_id, id
        );
        self.audit.record(
            AuditEvent::new(ctx, AuditAction::Delete, AuditEntity::Classification, id, now)
                .before(&classification),
        );
        Ok(())
    }

    /// Loads one classification with its effective status.
    pub fn get(
        &self,
        ctx: &RequestContext,
        id: ClassificationId,
    ) -> ClassificationServiceResult<Classification> {
        ctx.require(Permission::TaxonomyRead)?;
        Ok(self.load_classification(ctx, id)?.observed_at(now_epoch_ms()))
    }

    /// Live classifications of one entity, oldest first, with effective
    /// statuses. Terminal rows, lapsed ones included, are returned only when
    /// `include_inactive` is set.
    pub fn list_for_entity(
        &self,
        ctx: &RequestContext,
        entity_type: &str,
        entity_id: &str,
        include_inactive: bool,
    ) -> ClassificationServiceResult<Vec<Classification>> {
        ctx.require(Permission::TaxonomyRead)?;
        let mut query = ClassificationListQuery::for_tenant(ctx.tenant_id());
        query.entity_type = Some(normalize_identifier("entity_type", entity_type)?);
        query.entity_id = Some(normalize_identifier("entity_id", entity_id)?);
        if !include_inactive {
            query.statuses = active_statuses();
        }
        self.list_observed(&query, include_inactive)
    }

    /// Live classifications of one category, oldest first.
    pub fn list_for_category(
        &self,
        ctx: &RequestContext,
        category_id: CategoryId,
        include_inactive: bool,
    ) -> ClassificationServiceResult<Vec<Classification>> {
        ctx.require(Permission::TaxonomyRead)?;
        let category = self.load_category(ctx, category_id)?;
        let mut query = ClassificationListQuery::for_tenant(ctx.tenant_id());
        query.category_id = Some(category.id);
        if !include_inactive {
            query.statuses = active_statuses();
        }
        self.list_observed(&query, include_inactive)
    }

    /// Expires every due active classification of the caller's tenant.
    ///
    /// Intended to be driven by an external scheduler.
    pub fn expire_due(
        &self,
        ctx: &RequestContext,
        now_ms: i64,
    ) -> ClassificationServiceResult<Vec<ClassificationId>> {
        ctx.require(Permission::ClassificationWrite)?;
        let expired = self
            .classifications
            .expire_due(ctx.tenant_id(), now_ms, ctx.user_id())?;
        info!(
            "event=classification_expire module=classification status=ok tenant_id={} expired={}",
            ctx.tenant_id(),
            expired.len()
        );
        for id in &expired {
            self.audit.record(
                AuditEvent::new(
                    ctx,
                    AuditAction::StatusChange,
                    AuditEntity::Classification,
                    *id,
                    now_ms,
                )
                .after(&json!({ "status": ClassificationStatus::Expired.as_str() })),
            );
        }
        Ok(expired)
    }

    fn transition(
        &self,
        ctx: &RequestContext,
        id: ClassificationId,
        to: ClassificationStatus,
    ) -> ClassificationServiceResult<Classification> {
        ctx.require(Permission::ClassificationWrite)?;
        let before = self.load_classification(ctx, id)?;
        let now = now_epoch_ms();
        let from = before.effective_status_at(now);
        if !from.can_transition_to(to) {
            warn!(
                "event=classification_transition module=classification status=error classification_id={id} from={} to={}",
                from.as_str(),
                to.as_str()
            );
            return Err(ClassificationServiceError::InvalidTransition { from, to });
        }

        let applied = self
            .classifications
            .update_status(id, before.status, to, ctx.user_id(), now)?;
        if !applied {
            return Err(ClassificationServiceError::StaleStatus(id));
        }

        let after = self.load_classification(ctx, id)?;
        info!(
            "event=classification_transition module=classification status=ok tenant_id={} classification_id={} from={} to={}",
            after.tenant_id,
            id,
            from.as_str(),
            to.as_str()
        );
        self.audit.record(
            AuditEvent::new(
                ctx,
                AuditAction::StatusChange,
                AuditEntity::Classification,
                id,
                now,
            )
            .before(&before)
            .after(&after),
        );
        Ok(after)
    }

    fn list_observed(
        &self,
        query: &ClassificationListQuery,
        include_inactive: bool,
    ) -> ClassificationServiceResult<Vec<Classification>> {
        let now = now_epoch_ms();
        Ok(self
            .classifications
            .list_classifications(query)?
            .into_iter()
            .map(|row| row.observed_at(now))
            .filter(|row| include_inactive || row.status.is_active())
            .collect())
    }

    /// Persists the expiry of one lapsed row ahead of the sweep.
    fn persist_expiry(
        &self,
        ctx: &RequestContext,
        lapsed: &Classification,
        now: i64,
    ) -> ClassificationServiceResult<()> {
        let applied = self.classifications.update_status(
            lapsed.id,
            lapsed.status,
            ClassificationStatus::Expired,
            ctx.user_id(),
            now,
        )?;
        if !applied {
            return Err(ClassificationServiceError::StaleStatus(lapsed.id));
        }
        info!(
            "event=classification_expire module=classification status=ok tenant_id={} classification_id={} trigger=assign",
            ctx.tenant_id(),
            lapsed.id
        );
        self.audit.record(
            AuditEvent::new(
                ctx,
                AuditAction::StatusChange,
                AuditEntity::Classification,
                lapsed.id,
                now,
            )
            .before(lapsed)
            .after(&json!({ "status": ClassificationStatus::Expired.as_str() })),
        );
        Ok(())
    }

    fn load_classification(
        &self,
        ctx: &RequestContext,
        id: ClassificationId,
    ) -> ClassificationServiceResult<Classification> {
        let classification = self
            .classifications
            .get_classification(id, false)?
            .ok_or(ClassificationServiceError::NotFound {
                entity: "classification",
                id,
            })?;
        ctx.ensure_tenant(&classification.tenant_id)?;
        Ok(classification)
    }

    fn load_category(
        &self,
        ctx: &RequestContext,
        id: CategoryId,
    ) -> ClassificationServiceResult<Category> {
        let category = self
            .categories
            .get_category(id, false)?
            .ok_or(ClassificationServiceError::NotFound {
                entity: "category",
                id,
            })?;
        ctx.ensure_tenant(&category.tenant_id)?;
        Ok(category)
    }

    fn taxonomy_of(&self, category: &Category) -> ClassificationServiceResult<Taxonomy> {
        self.namespaces
            .get_taxonomy(category.taxonomy_id, false)?
            .ok_or(ClassificationServiceError::NotFound {
                entity: "taxonomy",
                id: category.taxonomy_id,
            })
    }
}

fn active_statuses() -> Vec<ClassificationStatus> {
    vec![ClassificationStatus::Pending, ClassificationStatus::Confirmed]
}
