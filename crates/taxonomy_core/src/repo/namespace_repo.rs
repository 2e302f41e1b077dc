//! Namespace and taxonomy persistence.
//!
//! # Invariants
//! - Namespace slugs are unique per tenant, taxonomy slugs per
//!   tenant+namespace, both among live rows only (partial unique indexes).
//! - Taxonomy updates are guarded by the expected `version`.
//! - Deleting a taxonomy tombstones its categories and classifications in
//!   the same transaction.

use crate::model::metadata::{Metadata, MetadataSchema};
use crate::model::namespace::{Namespace, NamespaceId, NamespaceUsage};
use crate::model::taxonomy::{Taxonomy, TaxonomyId, TaxonomyStatus};
use crate::repo::{
    ensure_schema_ready, flag, parse_flag, parse_u32, parse_uuid, RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, Row, Transaction, TransactionBehavior,
};
use serde::Serialize;

const NAMESPACE_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    slug,
    name,
    description,
    quota_categories,
    quota_classifications,
    metadata_schema,
    is_active,
    created_by,
    updated_by,
    created_at,
    updated_at,
    deleted_at
FROM namespaces";

const TAXONOMY_SELECT_SQL: &str = "SELECT
    id,
    tenant_id,
    namespace,
    name,
    slug,
    description,
    version,
    status,
    is_hierarchical,
    max_depth,
    metadata,
    created_by,
    updated_by,
    created_at,
    updated_at,
    deleted_at
FROM taxonomies";

/// Rows tombstoned by a taxonomy delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaxonomyDeletion {
    pub categories: usize,
    pub classifications: usize,
}

/// Persistence contract for namespaces and taxonomies.
pub trait NamespaceRepository {
    fn insert_namespace(&self, namespace: &Namespace) -> RepoResult<()>;
    fn get_namespace(&self, id: NamespaceId, include_deleted: bool)
        -> RepoResult<Option<Namespace>>;
    /// Loads the live namespace with `slug` for `tenant_id`.
    fn find_namespace(&self, tenant_id: &str, slug: &str) -> RepoResult<Option<Namespace>>;
    /// Lists live namespaces of one tenant ordered by slug.
    fn list_namespaces(&self, tenant_id: &str) -> RepoResult<Vec<Namespace>>;
    fn update_namespace(&self, namespace: &Namespace) -> RepoResult<()>;
    fn soft_delete_namespace(&self, id: NamespaceId, actor: &str, at: i64) -> RepoResult<()>;
    /// Counts live taxonomies, live categories and classifications still
    /// active at `now` (unexpired pending/confirmed rows).
    fn namespace_usage(
        &self,
        tenant_id: &str,
        namespace: &str,
        now: i64,
    ) -> RepoResult<NamespaceUsage>;

    fn insert_taxonomy(&self, taxonomy: &Taxonomy) -> RepoResult<()>;
    fn get_taxonomy(&self, id: TaxonomyId, include_deleted: bool) -> RepoResult<Option<Taxonomy>>;
    fn find_taxonomy(
        &self,
        tenant_id: &str,
        namespace: &str,
        slug: &str,
    ) -> RepoResult<Option<Taxonomy>>;
    /// Lists live taxonomies ordered by namespace then slug.
    fn list_taxonomies(&self, tenant_id: &str, namespace: Option<&str>)
        -> RepoResult<Vec<Taxonomy>>;
    /// Persists every mutable field when the stored version equals
    /// `expected_version`.
    fn update_taxonomy(&self, taxonomy: &Taxonomy, expected_version: u32) -> RepoResult<()>;
    /// Deepest live category level, `None` for an empty taxonomy.
    fn deepest_category_level(&self, id: TaxonomyId) -> RepoResult<Option<u32>>;
    fn soft_delete_taxonomy(
        &self,
        id: TaxonomyId,
        actor: &str,
        at: i64,
    ) -> RepoResult<TaxonomyDeletion>;
}

/// SQLite-backed namespace/taxonomy repository.
pub struct SqliteNamespaceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNamespaceRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            "namespaces",
            &["id", "tenant_id", "slug", "quota_categories", "deleted_at"],
        )?;
        ensure_schema_ready(
            conn,
            "taxonomies",
            &["id", "tenant_id", "namespace", "slug", "version", "status"],
        )?;
        Ok(Self { conn })
    }
}

impl NamespaceRepository for SqliteNamespaceRepository<'_> {
    fn insert_namespace(&self, namespace: &Namespace) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO namespaces (
                id,
                tenant_id,
                slug,
                name,
                description,
                quota_categories,
                quota_classifications,
                metadata_schema,
                is_active,
                created_by,
                updated_by,
                created_at,
                updated_at,
                deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL);",
            params![
                namespace.id.to_string(),
                namespace.tenant_id,
                namespace.slug,
                namespace.name,
                namespace.description,
                namespace.quota_categories,
                namespace.quota_classifications,
                namespace.metadata_schema.to_json()?,
                flag(namespace.is_active),
                namespace.created_by,
                namespace.updated_by,
                namespace.created_at,
                namespace.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_namespace(
        &self,
        id: NamespaceId,
        include_deleted: bool,
    ) -> RepoResult<Option<Namespace>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NAMESPACE_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), flag(include_deleted)])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_namespace_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_namespace(&self, tenant_id: &str, slug: &str) -> RepoResult<Option<Namespace>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NAMESPACE_SELECT_SQL}
             WHERE tenant_id = ?1
               AND slug = ?2
               AND deleted_at IS NULL;"
        ))?;
        let mut rows = stmt.query(params![tenant_id, slug])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_namespace_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_namespaces(&self, tenant_id: &str) -> RepoResult<Vec<Namespace>> {
        let mut stmt = self.conn.prepare(&format!(
            "{NAMESPACE_SELECT_SQL}
             WHERE tenant_id = ?1
               AND deleted_at IS NULL
             ORDER BY slug ASC;"
        ))?;
        let mut rows = stmt.query([tenant_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_namespace_row(row)?);
        }
        Ok(items)
    }

    fn update_namespace(&self, namespace: &Namespace) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE namespaces
             SET name = ?2,
                 description = ?3,
                 quota_categories = ?4,
                 quota_classifications = ?5,
                 metadata_schema = ?6,
                 is_active = ?7,
                 updated_by = ?8,
                 updated_at = ?9
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![
                namespace.id.to_string(),
                namespace.name,
                namespace.description,
                namespace.quota_categories,
                namespace.quota_classifications,
                namespace.metadata_schema.to_json()?,
                flag(namespace.is_active),
                namespace.updated_by,
                namespace.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "namespace",
                id: namespace.id,
            });
        }
        Ok(())
    }

    fn soft_delete_namespace(&self, id: NamespaceId, actor: &str, at: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE namespaces
             SET deleted_at = ?2,
                 updated_at = ?2,
                 updated_by = ?3
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id.to_string(), at, actor],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "namespace",
                id,
            });
        }
        Ok(())
    }

    fn namespace_usage(
        &self,
        tenant_id: &str,
        namespace: &str,
        now: i64,
    ) -> RepoResult<NamespaceUsage> {
        let (taxonomies, categories, classifications): (i64, i64, i64) = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*)
                 FROM taxonomies t
                 WHERE t.tenant_id = ?1
                   AND t.namespace = ?2
                   AND t.deleted_at IS NULL),
                (SELECT COUNT(*)
                 FROM categories c
                 INNER JOIN taxonomies t ON t.id = c.taxonomy_id
                 WHERE t.tenant_id = ?1
                   AND t.namespace = ?2
                   AND t.deleted_at IS NULL
                   AND c.deleted_at IS NULL),
                (SELECT COUNT(*)
                 FROM classifications k
                 INNER JOIN taxonomies t ON t.id = k.taxonomy_id
                 WHERE t.tenant_id = ?1
                   AND t.namespace = ?2
                   AND t.deleted_at IS NULL
                   AND k.deleted_at IS NULL
                   AND k.status IN ('pending', 'confirmed')
                   AND (k.expires_at IS NULL OR k.expires_at > ?3));",
            params![tenant_id, namespace, now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(NamespaceUsage {
            taxonomies: taxonomies.max(0) as u64,
            categories: categories.max(0) as u64,
            classifications: classifications.max(0) as u64,
        })
    }

    fn insert_taxonomy(&self, taxonomy: &Taxonomy) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO taxonomies (
                id,
                tenant_id,
                namespace,
                name,
                slug,
                description,
                version,
                status,
                is_hierarchical,
                max_depth,
                metadata,
                created_by,
                updated_by,
                created_at,
                updated_at,
                deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, NULL);",
            params![
                taxonomy.id.to_string(),
                taxonomy.tenant_id,
                taxonomy.namespace,
                taxonomy.name,
                taxonomy.slug,
                taxonomy.description,
                taxonomy.version,
                taxonomy.status.as_str(),
                flag(taxonomy.is_hierarchical),
                taxonomy.max_depth,
                taxonomy.metadata.to_json()?,
                taxonomy.created_by,
                taxonomy.updated_by,
                taxonomy.created_at,
                taxonomy.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_taxonomy(&self, id: TaxonomyId, include_deleted: bool) -> RepoResult<Option<Taxonomy>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TAXONOMY_SELECT_SQL}
             WHERE id = ?1
               AND (?2 = 1 OR deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), flag(include_deleted)])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_taxonomy_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_taxonomy(
        &self,
        tenant_id: &str,
        namespace: &str,
        slug: &str,
    ) -> RepoResult<Option<Taxonomy>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TAXONOMY_SELECT_SQL}
             WHERE tenant_id = ?1
               AND namespace = ?2
               AND slug = ?3
               AND deleted_at IS NULL;"
        ))?;
        let mut rows = stmt.query(params![tenant_id, namespace, slug])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_taxonomy_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_taxonomies(
        &self,
        tenant_id: &str,
        namespace: Option<&str>,
    ) -> RepoResult<Vec<Taxonomy>> {
        let mut sql = format!("{TAXONOMY_SELECT_SQL} WHERE tenant_id = ? AND deleted_at IS NULL");
        let mut bind_values = vec![Value::Text(tenant_id.to_string())];
        if let Some(namespace) = namespace {
            sql.push_str(" AND namespace = ?");
            bind_values.push(Value::Text(namespace.to_string()));
        }
        sql.push_str(" ORDER BY namespace ASC, slug ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_taxonomy_row(row)?);
        }
        Ok(items)
    }

    fn update_taxonomy(&self, taxonomy: &Taxonomy, expected_version: u32) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE taxonomies
             SET name = ?2,
                 description = ?3,
                 version = ?4,
                 status = ?5,
                 is_hierarchical = ?6,
                 max_depth = ?7,
                 metadata = ?8,
                 updated_by = ?9,
                 updated_at = ?10
             WHERE id = ?1
               AND version = ?11
               AND deleted_at IS NULL;",
            params![
                taxonomy.id.to_string(),
                taxonomy.name,
                taxonomy.description,
                taxonomy.version,
                taxonomy.status.as_str(),
                flag(taxonomy.is_hierarchical),
                taxonomy.max_depth,
                taxonomy.metadata.to_json()?,
                taxonomy.updated_by,
                taxonomy.updated_at,
                expected_version,
            ],
        )?;
        if changed == 0 {
            if self.get_taxonomy(taxonomy.id, false)?.is_none() {
                return Err(RepoError::NotFound {
                    entity: "taxonomy",
                    id: taxonomy.id,
                });
            }
            return Err(RepoError::VersionConflict {
                id: taxonomy.id,
                expected: expected_version,
            });
        }
        Ok(())
    }

    fn deepest_category_level(&self, id: TaxonomyId) -> RepoResult<Option<u32>> {
        let level: Option<i64> = self.conn.query_row(
            "SELECT MAX(level)
             FROM categories
             WHERE taxonomy_id = ?1
               AND deleted_at IS NULL;",
            [id.to_string()],
            |row| row.get(0),
        )?;
        level.map(|value| parse_u32(value, "categories.level")).transpose()
    }

    fn soft_delete_taxonomy(
        &self,
        id: TaxonomyId,
        actor: &str,
        at: i64,
    ) -> RepoResult<TaxonomyDeletion> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let id_text = id.to_string();

        let changed = tx.execute(
            "UPDATE taxonomies
             SET deleted_at = ?2,
                 updated_at = ?2,
                 updated_by = ?3
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id_text, at, actor],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "taxonomy",
                id,
            });
        }

        let classifications = tx.execute(
            "UPDATE classifications
             SET deleted_at = ?2,
                 updated_at = ?2,
                 updated_by = ?3
             WHERE taxonomy_id = ?1
               AND deleted_at IS NULL;",
            params![id_text, at, actor],
        )?;
        let categories = tx.execute(
            "UPDATE categories
             SET deleted_at = ?2,
                 updated_at = ?2,
                 updated_by = ?3
             WHERE taxonomy_id = ?1
               AND deleted_at IS NULL;",
            params![id_text, at, actor],
        )?;

        tx.commit()?;
        Ok(TaxonomyDeletion {
            categories,
            classifications,
        })
    }
}

fn parse_namespace_row(row: &Row<'_>) -> RepoResult<Namespace> {
    let id_text: String = row.get("id")?;
    let schema_text: String = row.get("metadata_schema")?;
    Ok(Namespace {
        id: parse_uuid(&id_text, "namespaces.id")?,
        tenant_id: row.get("tenant_id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        description: row.get("description")?,
        quota_categories: row
            .get::<_, Option<i64>>("quota_categories")?
            .map(|value| parse_u32(value, "namespaces.quota_categories"))
            .transpose()?,
        quota_classifications: row
            .get::<_, Option<i64>>("quota_classifications")?
            .map(|value| parse_u32(value, "namespaces.quota_classifications"))
            .transpose()?,
        metadata_schema: MetadataSchema::from_json(&schema_text)?,
        is_active: parse_flag(row.get("is_active")?, "namespaces.is_active")?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn parse_taxonomy_row(row: &Row<'_>) -> RepoResult<Taxonomy> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = TaxonomyStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid taxonomy status `{status_text}` in taxonomies.status"
        ))
    })?;
    let metadata_text: String = row.get("metadata")?;
    Ok(Taxonomy {
        id: parse_uuid(&id_text, "taxonomies.id")?,
        tenant_id: row.get("tenant_id")?,
        namespace: row.get("namespace")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        description: row.get("description")?,
        version: parse_u32(row.get("version")?, "taxonomies.version")?,
        status,
        is_hierarchical: parse_flag(row.get("is_hierarchical")?, "taxonomies.is_hierarchical")?,
        max_depth: parse_u32(row.get("max_depth")?, "taxonomies.max_depth")?,
        metadata: Metadata::from_json(&metadata_text)?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
