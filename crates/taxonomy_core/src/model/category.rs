//! Category records and pure hierarchy helpers.
//!
//! # Responsibility
//! - Define the category tree node record.
//! - Derive materialized paths and levels, rebase subtrees, assemble nested
//!   trees and audit a stored hierarchy for drift.
//!
//! # Invariants
//! - Roots have `level = 0` and `path = slug`.
//! - Children have `level = parent.level + 1` and
//!   `path = parent.path + '/' + slug`.
//! - `is_leaf` is true exactly when no live child exists.

use crate::model::metadata::Metadata;
use crate::model::taxonomy::TaxonomyId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

pub type CategoryId = Uuid;

/// Separator between slugs in a materialized path.
pub const PATH_SEPARATOR: char = '/';

/// Node of a taxonomy hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub tenant_id: String,
    pub taxonomy_id: TaxonomyId,
    /// `None` for roots.
    pub parent_id: Option<CategoryId>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub level: u32,
    pub path: String,
    /// Dense 0-based position among live siblings.
    pub sort_order: i64,
    pub is_leaf: bool,
    pub is_active: bool,
    pub confidence_score: Option<f64>,
    pub metadata: Metadata,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Category {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Path of a node given its parent path (`None` for roots).
pub fn child_path(parent_path: Option<&str>, slug: &str) -> String {
    match parent_path {
        Some(parent) => format!("{parent}{PATH_SEPARATOR}{slug}"),
        None => slug.to_string(),
    }
}

/// Level of a node given its parent level (`None` for roots).
pub fn child_level(parent_level: Option<u32>) -> u32 {
    parent_level.map_or(0, |level| level + 1)
}

/// Re-derives a path from the root-first slug chain.
pub fn derive_path<'a>(slugs: impl IntoIterator<Item = &'a str>) -> String {
    let separator = PATH_SEPARATOR.to_string();
    slugs
        .into_iter()
        .collect::<Vec<_>>()
        .join(separator.as_str())
}

/// Rewrites `path` from `old_prefix` to `new_prefix`.
///
/// Returns `None` when `path` is not `old_prefix` itself or below it.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        return Some(new_prefix.to_string());
    }
    let rest = path.strip_prefix(old_prefix)?;
    let rest = rest.strip_prefix(PATH_SEPARATOR)?;
    Some(format!("{new_prefix}{PATH_SEPARATOR}{rest}"))
}

/// New location of one row inside a relocated subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    pub id: CategoryId,
    pub level: u32,
    pub path: String,
}

/// Computes the rewritten `level`/`path` for every row of a subtree.
///
/// `subtree` must contain `root` and only its live descendants. Rows whose
/// path does not sit under the root path are reported back as `Err` with
/// their id, since that means stored paths already drifted.
pub fn plan_subtree_rewrite(
    subtree: &[Category],
    root: &Category,
    new_root_path: &str,
    new_root_level: u32,
) -> Result<Vec<PathRewrite>, CategoryId> {
    let mut rewrites = Vec::with_capacity(subtree.len());
    for row in subtree {
        let path = rebase_path(&row.path, &root.path, new_root_path).ok_or(row.id)?;
        let depth_below_root = row.level.checked_sub(root.level).ok_or(row.id)?;
        rewrites.push(PathRewrite {
            id: row.id,
            level: new_root_level + depth_below_root,
            path,
        });
    }
    Ok(rewrites)
}

/// Deepest level found in a subtree, relative to its root (0 for a leaf).
pub fn subtree_height(subtree: &[Category], root: &Category) -> u32 {
    subtree
        .iter()
        .map(|row| row.level.saturating_sub(root.level))
        .max()
        .unwrap_or(0)
}

/// Category with its ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTreeNode {
    pub category: Category,
    pub children: Vec<CategoryTreeNode>,
}

/// Assembles flat live categories into ordered nested trees.
///
/// Siblings are ordered by `sort_order ASC, id ASC`. Rows whose parent is
/// absent from `categories` are dropped.
pub fn build_category_tree(categories: Vec<Category>) -> Vec<CategoryTreeNode> {
    let mut by_parent: HashMap<Option<CategoryId>, Vec<Category>> = HashMap::new();
    for category in categories {
        by_parent.entry(category.parent_id).or_default().push(category);
    }
    for siblings in by_parent.values_mut() {
        siblings.sort_by(|a, b| a.sort_order.cmp(&b.sort_order).then(a.id.cmp(&b.id)));
    }
    attach_children(None, &mut by_parent)
}

fn attach_children(
    parent_id: Option<CategoryId>,
    by_parent: &mut HashMap<Option<CategoryId>, Vec<Category>>,
) -> Vec<CategoryTreeNode> {
    let Some(children) = by_parent.remove(&parent_id) else {
        return Vec::new();
    };
    children
        .into_iter()
        .map(|category| {
            let nested = attach_children(Some(category.id), by_parent);
            CategoryTreeNode {
                category,
                children: nested,
            }
        })
        .collect()
}

/// Stored value that disagrees with the value re-derived from the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum HierarchyIssue {
    MissingParent {
        id: CategoryId,
        parent_id: CategoryId,
    },
    LevelMismatch {
        id: CategoryId,
        stored: u32,
        expected: u32,
    },
    PathMismatch {
        id: CategoryId,
        stored: String,
        expected: String,
    },
    LeafMismatch {
        id: CategoryId,
        stored: bool,
        expected: bool,
    },
    Cycle {
        id: CategoryId,
    },
}

/// Re-derives level, path and leaf status from the parent chain of every
/// live category and reports each disagreement with the stored values.
pub fn check_hierarchy(categories: &[Category]) -> Vec<HierarchyIssue> {
    let by_id: BTreeMap<CategoryId, &Category> =
        categories.iter().map(|c| (c.id, c)).collect();
    let parents_with_children: HashSet<CategoryId> =
        categories.iter().filter_map(|c| c.parent_id).collect();
    let mut issues = Vec::new();

    for category in categories {
        let mut slugs = vec![category.slug.as_str()];
        let mut seen = HashSet::from([category.id]);
        let mut cursor = category.parent_id;
        let mut broken = false;
        while let Some(parent_id) = cursor {
            let Some(parent) = by_id.get(&parent_id) else {
                issues.push(HierarchyIssue::MissingParent {
                    id: category.id,
                    parent_id,
                });
                broken = true;
                break;
            };
            if !seen.insert(parent.id) {
                issues.push(HierarchyIssue::Cycle { id: category.id });
                broken = true;
                break;
            }
            slugs.push(parent.slug.as_str());
            cursor = parent.parent_id;
        }
        if broken {
            continue;
        }

        slugs.reverse();
        let expected_level = (slugs.len() - 1) as u32;
        if category.level != expected_level {
            issues.push(HierarchyIssue::LevelMismatch {
                id: category.id,
                stored: category.level,
                expected: expected_level,
            });
        }
        let expected_path = derive_path(slugs);
        if category.path != expected_path {
            issues.push(HierarchyIssue::PathMismatch {
                id: category.id,
                stored: category.path.clone(),
                expected: expected_path,
            });
        }
        let expected_leaf = !parents_with_children.contains(&category.id);
        if category.is_leaf != expected_leaf {
            issues.push(HierarchyIssue::LeafMismatch {
                id: category.id,
                stored: category.is_leaf,
                expected: expected_leaf,
            });
        }
    }
    issues
}

/// How a category delete treats live children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryDeleteMode {
    /// Refuse while live children exist.
    #[default]
    Restrict,
    /// Tombstone the node and every descendant.
    Cascade,
    /// Tombstone the node and hand its children to the node's parent.
    Reparent,
}

impl CategoryDeleteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
            Self::Reparent => "reparent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "restrict" => Some(Self::Restrict),
            "cascade" => Some(Self::Cascade),
            "reparent" => Some(Self::Reparent),
            _ => None,
        }
    }
}
