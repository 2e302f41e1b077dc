//! Classification persistence.
//!
//! # Invariants
//! - At most one active (pending/confirmed) live row exists per
//!   tenant + entity + category; the partial unique index enforces it.
//! - Status writes are compare-and-set on the previous status.

use crate::model::category::CategoryId;
use crate::model::classification::{
    AssignedBy, Classification, ClassificationId, ClassificationStatus,
};
use crate::model::metadata::Metadata;
use crate::model::taxonomy::TaxonomyId;
use crate::repo::{ensure_schema_ready, flag, parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const CLASSIFICATION_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    entity_type,
    entity_id,
    taxonomy_id,
    category_id,
    confidence_score,
    assigned_by,
    status,
    expires_at,
    metadata,
    created_by,
    updated_by,
    created_at,
    updated_at,
    deleted_at
FROM classifications";

/// Filter for [`ClassificationRepository::list_classifications`].
///
/// Every `Some` field narrows the result; an empty `statuses` list matches
/// every status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationListQuery {
    pub tenant_id: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub category_id: Option<CategoryId>,
    pub taxonomy_id: Option<TaxonomyId>,
    pub statuses: Vec<ClassificationStatus>,
    pub include_deleted: bool,
}

impl ClassificationListQuery {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }
}

/// Persistence contract for classifications.
pub trait ClassificationRepository {
    fn insert_classification(&self, classification: &Classification) -> RepoResult<()>;
    fn get_classification(
        &self,
        id: ClassificationId,
        include_deleted: bool,
    ) -> RepoResult<Option<Classification>>;
    /// Loads the live pending/confirmed row for one assignment key.
    fn find_active_assignment(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        category_id: CategoryId,
    ) -> RepoResult<Option<Classification>>;
    /// Lists matches ordered by `created_at ASC, id ASC`.
    fn list_classifications(
        &self,
        query: &ClassificationListQuery,
    ) -> RepoResult<Vec<Classification>>;
    /// Moves `id` from `from` to `to`. Returns `false` when the stored
    /// status no longer equals `from`.
    fn update_status(
        &self,
        id: ClassificationId,
        from: ClassificationStatus,
        to: ClassificationStatus,
        actor: &str,
        at: i64,
    ) -> RepoResult<bool>;
    fn soft_delete_classification(
        &self,
        id: ClassificationId,
        actor: &str,
        at: i64,
    ) -> RepoResult<()>;
    /// Marks every due active row of a tenant as expired in one statement
    /// and returns the affected ids.
    fn expire_due(&self, tenant_id: &str, now: i64, actor: &str)
        -> RepoResult<Vec<ClassificationId>>;
}

/// SQLite-backed classification repository.
pub struct SqliteClassificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteClassificationRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            "classifications",
            &[
                "id",
                "tenant_id",
                "entity_type",
                "entity_id",
                "category_id",
                "status",
                "expires_at",
                "deleted_at",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl ClassificationRepository for SqliteClassificationRepository<'_> {
    fn insert_classification(&self, classification: &Classification) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO classifications (
                id,
                tenant_id,
                entity_type,
                entity_id,
                taxonomy_id,
                category_id,
                confidence_score,
                assigned_by,
                status,
                expires_at,
                metadata,
                created_by,
                updated_by,
                created_at,
                updated_at,
                deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL);",
            params![
                classification.id.to_string(),
                classification.tenant_id,
                classification.entity_type,
                classification.entity_id,
                classification.taxonomy_id.to_string(),
                classification.category_id.to_string(),
                classification.confidence_score,
                classification.assigned_by.as_str(),
                classification.status.as_str(),
                classification.expires_at,
                classification.metadata.to_json()?,
                classification.created_by,
                classification.updated_by,
                classification.created_at,
                classification.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_classification(
        &self,
        id: ClassificationId,
        include_deleted: bool,
    ) -> RepoResult<Option<Classification>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CLASSIFICATION_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), flag(include_deleted)])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_classification_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_active_assignment(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        category_id: CategoryId,
    ) -> RepoResult<Option<Classification>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CLASSIFICATION_SELECT_SQL}
             WHERE tenant_id = ?1
               AND entity_type = ?2
               AND entity_id = ?3
               AND category_id = ?4
               AND deleted_at IS NULL
               AND status IN ('pending', 'confirmed');"
        ))?;
        let mut rows = stmt.query(params![
            tenant_id,
            entity_type,
            entity_id,
            category_id.to_string(),
        ])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_classification_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_classifications(
        &self,
        query: &ClassificationListQuery,
    ) -> RepoResult<Vec<Classification>> {
        let mut sql = format!("{CLASSIFICATION_SELECT_SQL} WHERE tenant_id = ?");
        let mut bind_values = vec![Value::Text(query.tenant_id.clone())];

        if let Some(entity_type) = &query.entity_type {
            sql.push_str(" AND entity_type = ?");
            bind_values.push(Value::Text(entity_type.clone()));
        }
        if let Some(entity_id) = &query.entity_id {
            sql.push_str(" AND entity_id = ?");
            bind_values.push(Value::Text(entity_id.clone()));
        }
        if let Some(category_id) = query.category_id {
            sql.push_str(" AND category_id = ?");
            bind_values.push(Value::Text(category_id.to_string()));
        }
        if let Some(taxonomy_id) = query.taxonomy_id {
            sql.push_str(" AND taxonomy_id = ?");
            bind_values.push(Value::Text(taxonomy_id.to_string()));
        }
        if !query.statuses.is_empty() {
            let placeholders = vec!["?"; query.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            for status in &query.statuses {
                bind_values.push(Value::Text(status.as_str().to_string()));
            }
        }
        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_classification_row(row)?);
        }
        Ok(items)
    }

    fn update_status(
        &self,
        id: ClassificationId,
        from: ClassificationStatus,
        to: ClassificationStatus,
        actor: &str,
        at: i64,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE classifications
             SET status = ?3,
                 updated_by = ?4,
                 updated_at = ?5
             WHERE id = ?1
               AND status = ?2
               AND deleted_at IS NULL;",
            params![id.to_string(), from.as_str(), to.as_str(), actor, at],
        )?;
        Ok(changed == 1)
    }

    fn soft_delete_classification(
        &self,
        id: ClassificationId,
        actor: &str,
        at: i64,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE classifications
             SET deleted_at = ?2,
                 updated_at = ?2,
                 updated_by = ?3
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id.to_string(), at, actor],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "classification",
                id,
            });
        }
        Ok(())
    }

    fn expire_due(
        &self,
        tenant_id: &str,
        now: i64,
        actor: &str,
    ) -> RepoResult<Vec<ClassificationId>> {
        let mut stmt = self.conn.prepare(
            "UPDATE classifications
             SET status = 'expired',
                 updated_by = ?3,
                 updated_at = ?2
             WHERE tenant_id = ?1
               AND deleted_at IS NULL
               AND status IN ('pending', 'confirmed')
               AND expires_at IS NOT NULL
               AND expires_at <= ?2
             RETURNING id;",
        )?;
        let mut rows = stmt.query(params![tenant_id, now, actor])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "classifications.id")?);
        }
        ids.sort();
        Ok(ids)
    }
}

fn parse_classification_row(row: &Row<'_>) -> RepoResult<Classification> {
    let id_text: String = row.get("id")?;
    let taxonomy_text: String = row.get("taxonomy_id")?;
    let category_text: String = row.get("category_id")?;
    let assigned_by_text: String = row.get("assigned_by")?;
    let status_text: String = row.get("status")?;
    let metadata_text: String = row.get("metadata")?;

    let assigned_by = AssignedBy::parse(&assigned_by_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid assigned_by `{assigned_by_text}` in classifications.assigned_by"
        ))
    })?;
    let status = ClassificationStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in classifications.status"
        ))
    })?;

    Ok(Classification {
        id: parse_uuid(&id_text, "classifications.id")?,
        tenant_id: row.get("tenant_id")?,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        taxonomy_id: parse_uuid(&taxonomy_text, "classifications.taxonomy_id")?,
        category_id: parse_uuid(&category_text, "classifications.category_id")?,
        confidence_score: row.get("confidence_score")?,
        assigned_by,
        status,
        expires_at: row.get("expires_at")?,
        metadata: Metadata::from_json(&metadata_text)?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
