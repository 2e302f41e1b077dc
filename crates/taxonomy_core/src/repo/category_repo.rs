//! Category hierarchy persistence.
//!
//! # Responsibility
//! - Read categories, children, ancestors and subtrees of one taxonomy.
//! - Apply structural mutations (insert, move, rename, delete) inside one
//!   IMMEDIATE transaction each.
//!
//! # Invariants
//! - Sibling `sort_order` is re-densified to `0..n` after every structural
//!   change under a parent.
//! - A parent's `is_leaf` is recomputed from its live children after every
//!   structural change touching it.
//! - Deleting categories also tombstones their active classifications.

use crate::model::category::{Category, CategoryDeleteMode, CategoryId, PathRewrite};
use crate::model::metadata::Metadata;
use crate::model::taxonomy::TaxonomyId;
use crate::repo::{
    ensure_schema_ready, flag, parse_flag, parse_optional_uuid, parse_u32, parse_uuid, RepoError,
    RepoResult,
};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use serde::Serialize;

const CATEGORY_COLUMNS: &str = "
    c.id,
    c.tenant_id,
    c.taxonomy_id,
    c.parent_id,
    c.name,
    c.slug,
    c.description,
    c.level,
    c.path,
    c.sort_order,
    c.is_leaf,
    c.is_active,
    c.confidence_score,
    c.metadata,
    c.created_by,
    c.updated_by,
    c.created_at,
    c.updated_at,
    c.deleted_at";

/// Where a relocated category lands among its new siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingPlacement {
    pub previous_parent_id: Option<CategoryId>,
    pub new_parent_id: Option<CategoryId>,
    /// 0-based target index; `None` appends.
    pub target_order: Option<i64>,
}

/// Structural rewrite of one subtree (move and/or slug rename).
#[derive(Debug, Clone, PartialEq)]
pub struct SubtreeUpdate {
    pub taxonomy_id: TaxonomyId,
    pub root_id: CategoryId,
    /// Slug of the subtree root after the update.
    pub slug: String,
    /// New level/path of every row in the subtree, root included.
    pub rewrites: Vec<PathRewrite>,
    /// `None` keeps the root at its current parent and position.
    pub placement: Option<SiblingPlacement>,
    /// Non-structural fields of the root written in the same transaction.
    pub fields: Option<Category>,
    pub actor: String,
    pub at: i64,
}

/// Input for a category delete.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryDeletion {
    pub taxonomy_id: TaxonomyId,
    pub id: CategoryId,
    pub parent_id: Option<CategoryId>,
    pub mode: CategoryDeleteMode,
    /// Reparent only: new level/path of every live descendant.
    pub descendant_rewrites: Vec<PathRewrite>,
    pub actor: String,
    pub at: i64,
}

/// Rows touched by a category delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryDeletionOutcome {
    pub categories: usize,
    pub classifications: usize,
    pub reparented: usize,
}

/// Persistence contract for taxonomy categories.
pub trait CategoryRepository {
    fn get_category(&self, id: CategoryId, include_deleted: bool)
        -> RepoResult<Option<Category>>;
    fn find_category_by_path(
        &self,
        taxonomy_id: TaxonomyId,
        path: &str,
    ) -> RepoResult<Option<Category>>;
    /// Live children of `parent_id` (roots when `None`) by
    /// `sort_order ASC, id ASC`.
    fn list_children(
        &self,
        taxonomy_id: TaxonomyId,
        parent_id: Option<CategoryId>,
    ) -> RepoResult<Vec<Category>>;
    /// Every live category of a taxonomy by `level, sort_order, id`.
    fn list_taxonomy_categories(&self, taxonomy_id: TaxonomyId) -> RepoResult<Vec<Category>>;
    /// `root` followed by its live descendants.
    fn list_subtree(&self, root: CategoryId) -> RepoResult<Vec<Category>>;
    /// Live ancestors of `id`, root first, excluding `id` itself.
    fn list_ancestors(&self, id: CategoryId) -> RepoResult<Vec<Category>>;
    /// Inserts a new leaf at the end of its sibling list and marks its
    /// parent as a non-leaf. Returns the stored record.
    fn insert_category(&self, category: Category) -> RepoResult<Category>;
    /// Persists non-structural fields (name, description, flags, score,
    /// metadata, audit).
    fn update_category(&self, category: &Category) -> RepoResult<()>;
    fn apply_subtree_update(&self, update: &SubtreeUpdate) -> RepoResult<()>;
    fn delete_category(&self, deletion: &CategoryDeletion) -> RepoResult<CategoryDeletionOutcome>;
}

/// SQLite-backed category repository.
pub struct SqliteCategoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCategoryRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(
            conn,
            "categories",
            &[
                "id",
                "taxonomy_id",
                "parent_id",
                "level",
                "path",
                "sort_order",
                "is_leaf",
                "deleted_at",
            ],
        )?;
        Ok(Self { conn })
    }
}

impl CategoryRepository for SqliteCategoryRepository<'_> {
    fn get_category(
        &self,
        id: CategoryId,
        include_deleted: bool,
    ) -> RepoResult<Option<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS}
             FROM categories c
             WHERE c.id = ?1
               AND (?2 = 1 OR c.deleted_at IS NULL);"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), flag(include_deleted)])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_category_row(row)?)),
            None => Ok(None),
        }
    }

    fn find_category_by_path(
        &self,
        taxonomy_id: TaxonomyId,
        path: &str,
    ) -> RepoResult<Option<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS}
             FROM categories c
             WHERE c.taxonomy_id = ?1
               AND c.path = ?2
               AND c.deleted_at IS NULL;"
        ))?;
        let mut rows = stmt.query(params![taxonomy_id.to_string(), path])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_category_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_children(
        &self,
        taxonomy_id: TaxonomyId,
        parent_id: Option<CategoryId>,
    ) -> RepoResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS}
             FROM categories c
             WHERE c.taxonomy_id = ?1
               AND c.parent_id IS ?2
               AND c.deleted_at IS NULL
             ORDER BY c.sort_order ASC, c.id ASC;"
        ))?;
        let rows = stmt.query(params![
            taxonomy_id.to_string(),
            parent_id.map(|value| value.to_string()),
        ])?;
        collect_categories(rows)
    }

    fn list_taxonomy_categories(&self, taxonomy_id: TaxonomyId) -> RepoResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CATEGORY_COLUMNS}
             FROM categories c
             WHERE c.taxonomy_id = ?1
               AND c.deleted_at IS NULL
             ORDER BY c.level ASC, c.sort_order ASC, c.id ASC;"
        ))?;
        let rows = stmt.query([taxonomy_id.to_string()])?;
        collect_categories(rows)
    }

    fn list_subtree(&self, root: CategoryId) -> RepoResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "WITH RECURSIVE subtree(id) AS (
                SELECT id
                FROM categories
                WHERE id = ?1
                  AND deleted_at IS NULL
                UNION
                SELECT child.id
                FROM categories child
                INNER JOIN subtree parent ON child.parent_id = parent.id
                WHERE child.deleted_at IS NULL
            )
            SELECT {CATEGORY_COLUMNS}
            FROM categories c
            INNER JOIN subtree ON subtree.id = c.id
            ORDER BY c.level ASC, c.sort_order ASC, c.id ASC;"
        ))?;
        let rows = stmt.query([root.to_string()])?;
        collect_categories(rows)
    }

    fn list_ancestors(&self, id: CategoryId) -> RepoResult<Vec<Category>> {
        let mut stmt = self.conn.prepare(&format!(
            "WITH RECURSIVE chain(id, parent_id) AS (
                SELECT id, parent_id
                FROM categories
                WHERE id = ?1
                  AND deleted_at IS NULL
                UNION
                SELECT parent.id, parent.parent_id
                FROM categories parent
                INNER JOIN chain ON chain.parent_id = parent.id
                WHERE parent.deleted_at IS NULL
            )
            SELECT {CATEGORY_COLUMNS}
            FROM categories c
            INNER JOIN chain ON chain.id = c.id
            WHERE c.id <> ?1
            ORDER BY c.level ASC;"
        ))?;
        let rows = stmt.query([id.to_string()])?;
        collect_categories(rows)
    }

    fn insert_category(&self, mut category: Category) -> RepoResult<Category> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        category.sort_order = next_sort_order(&tx, category.taxonomy_id, category.parent_id)?;
        category.is_leaf = true;

        tx.execute(
            "INSERT INTO categories (
                    id,
                    tenant_id,
                    taxonomy_id,
                    parent_id,
                    name,
                    slug,
                    description,
                    level,
                    path,
                    sort_order,
                    is_leaf,
                    is_active,
                    confidence_score,
                    metadata,
                    created_by,
                    updated_by,
                    created_at,
                    updated_at,
                    deleted_at
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?12, ?13, ?14, ?15, ?16, ?17, NULL
                );",
            params![
                category.id.to_string(),
                category.tenant_id,
                category.taxonomy_id.to_string(),
                category.parent_id.map(|value| value.to_string()),
                category.name,
                category.slug,
                category.description,
                category.level,
                category.path,
                category.sort_order,
                flag(category.is_active),
                category.confidence_score,
                category.metadata.to_json()?,
                category.created_by,
                category.updated_by,
                category.created_at,
                category.updated_at,
            ],
        )?;

        if let Some(parent_id) = category.parent_id {
            refresh_leaf_flag(&tx, parent_id)?;
        }

        tx.commit()?;
        Ok(category)
    }

    fn update_category(&self, category: &Category) -> RepoResult<()> {
        write_category_fields(self.conn, category)
    }

    fn apply_subtree_update(&self, update: &SubtreeUpdate) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let root_text = update.root_id.to_string();

        let changed = match &update.placement {
            Some(placement) => tx.execute(
                "UPDATE categories
                 SET slug = ?2,
                     parent_id = ?3,
                     updated_by = ?4,
                     updated_at = ?5
                 WHERE id = ?1
                   AND deleted_at IS NULL;",
                params![
                    root_text,
                    update.slug,
                    placement.new_parent_id.map(|value| value.to_string()),
                    update.actor,
                    update.at,
                ],
            )?,
            None => tx.execute(
                "UPDATE categories
                 SET slug = ?2,
                     updated_by = ?3,
                     updated_at = ?4
                 WHERE id = ?1
                   AND deleted_at IS NULL;",
                params![root_text, update.slug, update.actor, update.at],
            )?,
        };
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "category",
                id: update.root_id,
            });
        }

        write_path_rewrites(&tx, &update.rewrites, &update.actor, update.at)?;
        if let Some(fields) = &update.fields {
            write_category_fields(&tx, fields)?;
        }

        if let Some(placement) = &update.placement {
            if placement.previous_parent_id != placement.new_parent_id {
                let mut previous_siblings =
                    list_sibling_ids(&tx, update.taxonomy_id, placement.previous_parent_id)?;
                previous_siblings.retain(|id| *id != update.root_id);
                write_sibling_order(&tx, &previous_siblings)?;
            }

            let mut siblings = list_sibling_ids(&tx, update.taxonomy_id, placement.new_parent_id)?;
            siblings.retain(|id| *id != update.root_id);
            let target_index = placement
                .target_order
                .unwrap_or(siblings.len() as i64)
                .clamp(0, siblings.len() as i64) as usize;
            siblings.insert(target_index, update.root_id);
            write_sibling_order(&tx, &siblings)?;

            for parent_id in [placement.previous_parent_id, placement.new_parent_id]
                .into_iter()
                .flatten()
            {
                refresh_leaf_flag(&tx, parent_id)?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_category(&self, deletion: &CategoryDeletion) -> RepoResult<CategoryDeletionOutcome> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let id_text = deletion.id.to_string();

        let exists: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM categories
                WHERE id = ?1
                  AND deleted_at IS NULL
            );",
            [&id_text],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::NotFound {
                entity: "category",
                id: deletion.id,
            });
        }

        let mut outcome = CategoryDeletionOutcome::default();
        let mut siblings = list_sibling_ids(&tx, deletion.taxonomy_id, deletion.parent_id)?;
        let position = siblings.iter().position(|id| *id == deletion.id);

        match deletion.mode {
            CategoryDeleteMode::Cascade => {
                outcome.classifications = tx.execute(
                    "WITH RECURSIVE subtree(id) AS (
                        SELECT id FROM categories WHERE id = ?1 AND deleted_at IS NULL
                        UNION
                        SELECT child.id
                        FROM categories child
                        INNER JOIN subtree parent ON child.parent_id = parent.id
                        WHERE child.deleted_at IS NULL
                    )
                    UPDATE classifications
                    SET deleted_at = ?2,
                        updated_at = ?2,
                        updated_by = ?3
                    WHERE category_id IN (SELECT id FROM subtree)
                      AND deleted_at IS NULL
                      AND status IN ('pending', 'confirmed');",
                    params![id_text, deletion.at, deletion.actor],
                )?;
                outcome.categories = tx.execute(
                    "WITH RECURSIVE subtree(id) AS (
                        SELECT id FROM categories WHERE id = ?1 AND deleted_at IS NULL
                        UNION
                        SELECT child.id
                        FROM categories child
                        INNER JOIN subtree parent ON child.parent_id = parent.id
                        WHERE child.deleted_at IS NULL
                    )
                    UPDATE categories
                    SET deleted_at = ?2,
                        updated_at = ?2,
                        updated_by = ?3
                    WHERE id IN (SELECT id FROM subtree)
                      AND deleted_at IS NULL;",
                    params![id_text, deletion.at, deletion.actor],
                )?;
                siblings.retain(|id| *id != deletion.id);
            }
            CategoryDeleteMode::Restrict | CategoryDeleteMode::Reparent => {
                let children = list_sibling_ids(&tx, deletion.taxonomy_id, Some(deletion.id))?;
                if deletion.mode == CategoryDeleteMode::Restrict && !children.is_empty() {
                    return Err(RepoError::HasChildren { id: deletion.id });
                }

                outcome.classifications = soft_delete_active_classifications(
                    &tx,
                    deletion.id,
                    &deletion.actor,
                    deletion.at,
                )?;
                outcome.categories = tx.execute(
                    "UPDATE categories
                     SET deleted_at = ?2,
                         updated_at = ?2,
                         updated_by = ?3
                     WHERE id = ?1
                       AND deleted_at IS NULL;",
                    params![id_text, deletion.at, deletion.actor],
                )?;

                for child_id in &children {
                    tx.execute(
                        "UPDATE categories
                         SET parent_id = ?2,
                             updated_by = ?3,
                             updated_at = ?4
                         WHERE id = ?1
                           AND deleted_at IS NULL;",
                        params![
                            child_id.to_string(),
                            deletion.parent_id.map(|value| value.to_string()),
                            deletion.actor,
                            deletion.at,
                        ],
                    )?;
                }
                write_path_rewrites(&tx, &deletion.descendant_rewrites, &deletion.actor, deletion.at)?;
                outcome.reparented = children.len();

                match position {
                    Some(index) => {
                        siblings.splice(index..=index, children);
                    }
                    None => {
                        siblings.retain(|id| *id != deletion.id);
                        siblings.extend(children);
                    }
                }
            }
        }

        write_sibling_order(&tx, &siblings)?;
        if let Some(parent_id) = deletion.parent_id {
            refresh_leaf_flag(&tx, parent_id)?;
        }

        tx.commit()?;
        Ok(outcome)
    }
}

fn collect_categories(mut rows: rusqlite::Rows<'_>) -> RepoResult<Vec<Category>> {
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_category_row(row)?);
    }
    Ok(items)
}

fn list_sibling_ids(
    conn: &Connection,
    taxonomy_id: TaxonomyId,
    parent_id: Option<CategoryId>,
) -> RepoResult<Vec<CategoryId>> {
    let mut stmt = conn.prepare(
        "SELECT id
         FROM categories
         WHERE taxonomy_id = ?1
           AND parent_id IS ?2
           AND deleted_at IS NULL
         ORDER BY sort_order ASC, id ASC;",
    )?;
    let mut rows = stmt.query(params![
        taxonomy_id.to_string(),
        parent_id.map(|value| value.to_string()),
    ])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "categories.id")?);
    }
    Ok(ids)
}

fn write_sibling_order(conn: &Connection, ordered_ids: &[CategoryId]) -> RepoResult<()> {
    for (index, id) in ordered_ids.iter().enumerate() {
        conn.execute(
            "UPDATE categories
             SET sort_order = ?2
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![id.to_string(), index as i64],
        )?;
    }
    Ok(())
}

fn write_category_fields(conn: &Connection, category: &Category) -> RepoResult<()> {
    let changed = conn.execute(
        "UPDATE categories
         SET name = ?2,
             description = ?3,
             is_active = ?4,
             confidence_score = ?5,
             metadata = ?6,
             updated_by = ?7,
             updated_at = ?8
         WHERE id = ?1
           AND deleted_at IS NULL;",
        params![
            category.id.to_string(),
            category.name,
            category.description,
            flag(category.is_active),
            category.confidence_score,
            category.metadata.to_json()?,
            category.updated_by,
            category.updated_at,
        ],
    )?;
    if changed == 0 {
        return Err(RepoError::NotFound {
            entity: "category",
            id: category.id,
        });
    }
    Ok(())
}

/// Placeholder path outside the slug alphabet, unique per row.
fn parked_path(id: CategoryId) -> String {
    format!("~{id}")
}

/// Writes new levels and paths in two passes. Every row is parked on
/// [`parked_path`] first, so no final path meets a not-yet-rewritten one
/// under the live-path unique index.
fn write_path_rewrites(
    conn: &Connection,
    rewrites: &[PathRewrite],
    actor: &str,
    at: i64,
) -> RepoResult<()> {
    for rewrite in rewrites {
        let changed = conn.execute(
            "UPDATE categories
             SET path = ?2
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![rewrite.id.to_string(), parked_path(rewrite.id)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "category",
                id: rewrite.id,
            });
        }
    }
    for rewrite in rewrites {
        let changed = conn.execute(
            "UPDATE categories
             SET level = ?2,
                 path = ?3,
                 updated_by = ?4,
                 updated_at = ?5
             WHERE id = ?1
               AND deleted_at IS NULL;",
            params![rewrite.id.to_string(), rewrite.level, rewrite.path, actor, at],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "category",
                id: rewrite.id,
            });
        }
    }
    Ok(())
}

fn next_sort_order(
    conn: &Connection,
    taxonomy_id: TaxonomyId,
    parent_id: Option<CategoryId>,
) -> RepoResult<i64> {
    let next = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1
         FROM categories
         WHERE taxonomy_id = ?1
           AND parent_id IS ?2
           AND deleted_at IS NULL;",
        params![
            taxonomy_id.to_string(),
            parent_id.map(|value| value.to_string()),
        ],
        |row| row.get(0),
    )?;
    Ok(next)
}

fn refresh_leaf_flag(conn: &Connection, id: CategoryId) -> RepoResult<()> {
    conn.execute(
        "UPDATE categories
         SET is_leaf = CASE
             WHEN EXISTS(
                 SELECT 1
                 FROM categories child
                 WHERE child.parent_id = categories.id
                   AND child.deleted_at IS NULL
             ) THEN 0
             ELSE 1
         END
         WHERE id = ?1
           AND deleted_at IS NULL;",
        [id.to_string()],
    )?;
    Ok(())
}

fn soft_delete_active_classifications(
    conn: &Connection,
    category_id: CategoryId,
    actor: &str,
    at: i64,
) -> RepoResult<usize> {
    let changed = conn.execute(
        "UPDATE classifications
         SET deleted_at = ?2,
             updated_at = ?2,
             updated_by = ?3
         WHERE category_id = ?1
           AND deleted_at IS NULL
           AND status IN ('pending', 'confirmed');",
        params![category_id.to_string(), at, actor],
    )?;
    Ok(changed)
}

fn parse_category_row(row: &Row<'_>) -> RepoResult<Category> {
    let id_text: String = row.get("id")?;
    let taxonomy_text: String = row.get("taxonomy_id")?;
    let metadata_text: String = row.get("metadata")?;
    Ok(Category {
        id: parse_uuid(&id_text, "categories.id")?,
        tenant_id: row.get("tenant_id")?,
        taxonomy_id: parse_uuid(&taxonomy_text, "categories.taxonomy_id")?,
        parent_id: parse_optional_uuid(row.get("parent_id")?, "categories.parent_id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        description: row.get("description")?,
        level: parse_u32(row.get("level")?, "categories.level")?,
        path: row.get("path")?,
        sort_order: row.get("sort_order")?,
        is_leaf: parse_flag(row.get("is_leaf")?, "categories.is_leaf")?,
        is_active: parse_flag(row.get("is_active")?, "categories.is_active")?,
        confidence_score: row.get("confidence_score")?,
        metadata: Metadata::from_json(&metadata_text)?,
        created_by: row.get("created_by")?,
        updated_by: row.get("updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}
