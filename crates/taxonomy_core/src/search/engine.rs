//! Read-only fan-out search over taxonomies, categories and
//! classifications.
//!
//! # Invariants
//! - Results are always scoped to the caller's tenant and to live rows.
//! - Every filter must hold (AND); a kind without the filtered field never
//!   matches.
//! - Ordering is total: ties on the sort key fall back to `id ASC`.

use crate::context::{Permission, RequestContext};
use crate::model::category::Category;
use crate::model::classification::Classification;
use crate::model::taxonomy::{Taxonomy, TaxonomyId};
use crate::repo::category_repo::{CategoryRepository, SqliteCategoryRepository};
use crate::repo::classification_repo::{
    ClassificationListQuery, ClassificationRepository, SqliteClassificationRepository,
};
use crate::repo::namespace_repo::{NamespaceRepository, SqliteNamespaceRepository};
use crate::search::query::{
    FilterField, FilterOp, FilterSpec, FilterValue, SearchEntityKind, SearchQuery, SearchSort,
    SortOrder,
};
use crate::search::scorer::{NeutralScorer, RelevanceScorer};
use crate::search::{SearchResult, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::service::now_epoch_ms;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

/// Record carried by a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum SearchRecord {
    Taxonomy(Taxonomy),
    Category(Category),
    Classification(Classification),
}

impl SearchRecord {
    pub fn kind(&self) -> SearchEntityKind {
        match self {
            Self::Taxonomy(_) => SearchEntityKind::Taxonomy,
            Self::Category(_) => SearchEntityKind::Category,
            Self::Classification(_) => SearchEntityKind::Classification,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Taxonomy(row) => row.id,
            Self::Category(row) => row.id,
            Self::Classification(row) => row.id,
        }
    }

    /// Display name; classifications use `entity_type/entity_id`.
    pub fn name(&self) -> String {
        match self {
            Self::Taxonomy(row) => row.name.clone(),
            Self::Category(row) => row.name.clone(),
            Self::Classification(row) => format!("{}/{}", row.entity_type, row.entity_id),
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            Self::Taxonomy(row) => row.created_at,
            Self::Category(row) => row.created_at,
            Self::Classification(row) => row.created_at,
        }
    }

    pub fn updated_at(&self) -> i64 {
        match self {
            Self::Taxonomy(row) => row.updated_at,
            Self::Category(row) => row.updated_at,
            Self::Classification(row) => row.updated_at,
        }
    }

    /// Status exposed to filters. Categories report `active`/`inactive`.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Taxonomy(row) => row.status.as_str(),
            Self::Category(row) if row.is_active => "active",
            Self::Category(_) => "inactive",
            Self::Classification(row) => row.status.as_str(),
        }
    }

    fn searchable_text(&self) -> Vec<&str> {
        match self {
            Self::Taxonomy(row) => {
                let mut parts = vec![row.name.as_str(), row.slug.as_str()];
                parts.extend(row.description.as_deref());
                parts
            }
            Self::Category(row) => {
                let mut parts = vec![row.name.as_str(), row.slug.as_str(), row.path.as_str()];
                parts.extend(row.description.as_deref());
                parts
            }
            Self::Classification(row) => vec![row.entity_type.as_str(), row.entity_id.as_str()],
        }
    }
}

/// One scored search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub namespace: String,
    #[serde(flatten)]
    pub record: SearchRecord,
}

/// One page of ordered results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub items: Vec<SearchHit>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Text(String),
    Number(f64),
}

/// Search facade over the three repositories.
pub struct SearchService<N, C, K>
where
    N: NamespaceRepository,
    C: CategoryRepository,
    K: ClassificationRepository,
{
    namespaces: N,
    categories: C,
    classifications: K,
    scorer: Box<dyn RelevanceScorer>,
    default_limit: u32,
    max_limit: u32,
}

impl<N, C, K> SearchService<N, C, K>
where
    N: NamespaceRepository,
    C: CategoryRepository,
    K: ClassificationRepository,
{
    pub fn new(namespaces: N, categories: C, classifications: K) -> Self {
        Self {
            namespaces,
            categories,
            classifications,
            scorer: Box::new(NeutralScorer),
            default_limit: DEFAULT_SEARCH_LIMIT,
            max_limit: MAX_SEARCH_LIMIT,
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Overrides page size bounds; `max_limit` is at least 1 and
    /// `default_limit` never exceeds it.
    pub fn with_limits(mut self, default_limit: u32, max_limit: u32) -> Self {
        self.max_limit = max_limit.max(1);
        self.default_limit = default_limit.clamp(1, self.max_limit);
        self
    }

    pub fn search(&self, ctx: &RequestContext, query: &SearchQuery) -> SearchResult<SearchPage> {
        ctx.require(Permission::TaxonomyRead)?;
        query.validate()?;

        let page = query.page.unwrap_or(1);
        let limit = query
            .limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit);
        let text = query.normalized_text();
        let filters = query.all_filters();

        let mut hits = Vec::new();
        for (namespace, record) in self.collect_candidates(ctx, query)? {
            if !matches_text(&record, text) {
                continue;
            }
            if !filters
                .iter()
                .all(|filter| matches_filter(&record, &namespace, filter))
            {
                continue;
            }
            hits.push(SearchHit {
                score: self.scorer.score(text, &record),
                namespace,
                record,
            });
        }

        hits.sort_by(|left, right| compare_hits(left, right, query.sort, query.order));

        let total = hits.len() as u64;
        let total_pages = total.div_ceil(u64::from(limit));
        let offset = (u64::from(page) - 1).saturating_mul(u64::from(limit));
        let items: Vec<SearchHit> = hits
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();

        info!(
            "event=search module=search status=ok tenant_id={} total={} page={} limit={} returned={}",
            ctx.tenant_id(),
            total,
            page,
            limit,
            items.len()
        );
        Ok(SearchPage {
            items,
            total,
            page,
            limit,
            total_pages,
        })
    }

    fn collect_candidates(
        &self,
        ctx: &RequestContext,
        query: &SearchQuery,
    ) -> SearchResult<Vec<(String, SearchRecord)>> {
        let namespace = query
            .namespace
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let taxonomies = self.namespaces.list_taxonomies(ctx.tenant_id(), namespace)?;
        let namespace_of: HashMap<TaxonomyId, String> = taxonomies
            .iter()
            .map(|taxonomy| (taxonomy.id, taxonomy.namespace.clone()))
            .collect();

        let mut candidates = Vec::new();
        for kind in query.effective_kinds() {
            match kind {
                SearchEntityKind::Taxonomy => {
                    for taxonomy in &taxonomies {
                        candidates.push((
                            taxonomy.namespace.clone(),
                            SearchRecord::Taxonomy(taxonomy.clone()),
                        ));
                    }
                }
                SearchEntityKind::Category => {
                    for taxonomy in &taxonomies {
                        for category in self.categories.list_taxonomy_categories(taxonomy.id)? {
                            candidates.push((
                                taxonomy.namespace.clone(),
                                SearchRecord::Category(category),
                            ));
                        }
                    }
                }
                SearchEntityKind::Classification => {
                    let mut list_query = ClassificationListQuery::for_tenant(ctx.tenant_id());
                    list_query.entity_type = query
                        .entity_type
                        .as_deref()
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                        .map(str::to_string);
                    let now = now_epoch_ms();
                    for classification in self.classifications.list_classifications(&list_query)? {
                        if let Some(namespace) = namespace_of.get(&classification.taxonomy_id) {
                            candidates.push((
                                namespace.clone(),
                                SearchRecord::Classification(classification.observed_at(now)),
                            ));
                        }
                    }
                }
            }
        }
        Ok(candidates)
    }
}

/// Runs `query` against SQLite-backed repositories with default settings.
pub fn search_all(
    conn: &Connection,
    ctx: &RequestContext,
    query: &SearchQuery,
) -> SearchResult<SearchPage> {
    SearchService::new(
        SqliteNamespaceRepository::try_new(conn)?,
        SqliteCategoryRepository::try_new(conn)?,
        SqliteClassificationRepository::try_new(conn)?,
    )
    .search(ctx, query)
}

fn field_value(record: &SearchRecord, namespace: &str, field: FilterField) -> Option<FieldValue> {
    use FieldValue::{Number, Text};

    let text = |value: &str| Some(Text(value.to_string()));
    match (field, record) {
        (FilterField::Namespace, _) => text(namespace),
        (FilterField::Status, _) => text(record.status()),
        (FilterField::CreatedAt, _) => Some(Number(record.created_at() as f64)),
        (FilterField::UpdatedAt, _) => Some(Number(record.updated_at() as f64)),

        (FilterField::Name, SearchRecord::Taxonomy(row)) => text(&row.name),
        (FilterField::Name, SearchRecord::Category(row)) => text(&row.name),
        (FilterField::Slug, SearchRecord::Taxonomy(row)) => text(&row.slug),
        (FilterField::Slug, SearchRecord::Category(row)) => text(&row.slug),
        (FilterField::Version, SearchRecord::Taxonomy(row)) => Some(Number(f64::from(row.version))),
        (FilterField::TaxonomyId, SearchRecord::Taxonomy(row)) => text(&row.id.to_string()),
        (FilterField::CreatedBy, SearchRecord::Taxonomy(row)) => text(&row.created_by),
        (FilterField::UpdatedBy, SearchRecord::Taxonomy(row)) => text(&row.updated_by),

        (FilterField::Path, SearchRecord::Category(row)) => text(&row.path),
        (FilterField::Level, SearchRecord::Category(row)) => Some(Number(f64::from(row.level))),
        (FilterField::TaxonomyId, SearchRecord::Category(row)) => {
            text(&row.taxonomy_id.to_string())
        }
        (FilterField::CategoryId, SearchRecord::Category(row)) => text(&row.id.to_string()),
        (FilterField::ConfidenceScore, SearchRecord::Category(row)) => {
            row.confidence_score.map(Number)
        }
        (FilterField::CreatedBy, SearchRecord::Category(row)) => text(&row.created_by),
        (FilterField::UpdatedBy, SearchRecord::Category(row)) => text(&row.updated_by),

        (FilterField::TaxonomyId, SearchRecord::Classification(row)) => {
            text(&row.taxonomy_id.to_string())
        }
        (FilterField::CategoryId, SearchRecord::Classification(row)) => {
            text(&row.category_id.to_string())
        }
        (FilterField::EntityType, SearchRecord::Classification(row)) => text(&row.entity_type),
        (FilterField::EntityId, SearchRecord::Classification(row)) => text(&row.entity_id),
        (FilterField::AssignedBy, SearchRecord::Classification(row)) => {
            text(row.assigned_by.as_str())
        }
        (FilterField::ConfidenceScore, SearchRecord::Classification(row)) => {
            Some(Number(row.confidence_score))
        }
        (FilterField::ExpiresAt, SearchRecord::Classification(row)) => {
            row.expires_at.map(|value| Number(value as f64))
        }
        (FilterField::CreatedBy, SearchRecord::Classification(row)) => text(&row.created_by),
        (FilterField::UpdatedBy, SearchRecord::Classification(row)) => text(&row.updated_by),

        _ => None,
    }
}

fn matches_text(record: &SearchRecord, text: Option<&str>) -> bool {
    let Some(text) = text else {
        return true;
    };
    let needle = text.to_lowercase();
    record
        .searchable_text()
        .iter()
        .any(|part| part.to_lowercase().contains(&needle))
}

fn matches_filter(record: &SearchRecord, namespace: &str, filter: &FilterSpec) -> bool {
    let Some(actual) = field_value(record, namespace, filter.field) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => values_equal(&actual, &filter.value),
        FilterOp::Ne => !values_equal(&actual, &filter.value),
        FilterOp::Contains => text_pair(&actual, &filter.value)
            .is_some_and(|(actual, expected)| actual.contains(&expected)),
        FilterOp::StartsWith => text_pair(&actual, &filter.value)
            .is_some_and(|(actual, expected)| actual.starts_with(&expected)),
        FilterOp::Gt => compare_values(&actual, &filter.value) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(
            compare_values(&actual, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOp::Lt => compare_values(&actual, &filter.value) == Some(Ordering::Less),
        FilterOp::Lte => matches!(
            compare_values(&actual, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOp::In => match &filter.value {
            FilterValue::List(items) => items.iter().any(|item| values_equal(&actual, item)),
            _ => false,
        },
    }
}

fn values_equal(actual: &FieldValue, expected: &FilterValue) -> bool {
    compare_values(actual, expected) == Some(Ordering::Equal)
}

fn compare_values(actual: &FieldValue, expected: &FilterValue) -> Option<Ordering> {
    match (actual, expected) {
        (FieldValue::Text(actual), FilterValue::Text(expected)) => {
            Some(actual.as_str().cmp(expected.as_str()))
        }
        (FieldValue::Number(actual), FilterValue::Integer(expected)) => {
            actual.partial_cmp(&(*expected as f64))
        }
        (FieldValue::Number(actual), FilterValue::Float(expected)) => actual.partial_cmp(expected),
        _ => None,
    }
}

fn text_pair(actual: &FieldValue, expected: &FilterValue) -> Option<(String, String)> {
    match (actual, expected) {
        (FieldValue::Text(actual), FilterValue::Text(expected)) => {
            Some((actual.to_lowercase(), expected.to_lowercase()))
        }
        _ => None,
    }
}

fn compare_hits(left: &SearchHit, right: &SearchHit, sort: SearchSort, order: SortOrder) -> Ordering {
    let primary = match sort {
        SearchSort::Relevance => left
            .score
            .total_cmp(&right.score)
            .then_with(|| left.record.updated_at().cmp(&right.record.updated_at())),
        SearchSort::UpdatedAt => left.record.updated_at().cmp(&right.record.updated_at()),
        SearchSort::CreatedAt => left.record.created_at().cmp(&right.record.created_at()),
        SearchSort::Name => left
            .record
            .name()
            .to_lowercase()
            .cmp(&right.record.name().to_lowercase()),
    };
    let primary = match order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary.then_with(|| left.record.id().cmp(&right.record.id()))
}

#[cfg(test)]
mod tests {
    use super::{compare_hits, matches_filter, SearchHit, SearchRecord};
    use crate::model::metadata::Metadata;
    use crate::model::taxonomy::{Taxonomy, TaxonomyStatus};
    use crate::search::query::{FilterField, FilterOp, FilterSpec, FilterValue, SearchSort, SortOrder};
    use std::cmp::Ordering;
    use uuid::Uuid;

    fn taxonomy(name: &str, updated_at: i64) -> Taxonomy {
        Taxonomy {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            namespace: "media".to_string(),
            name: name.to_string(),
            slug: name.to_lowercase(),
            description: None,
            version: 2,
            status: TaxonomyStatus::Active,
            is_hierarchical: true,
            max_depth: 5,
            metadata: Metadata::new(),
            created_by: "alice".to_string(),
            updated_by: "alice".to_string(),
            created_at: 1,
            updated_at,
            deleted_at: None,
        }
    }

    fn hit(taxonomy: Taxonomy) -> SearchHit {
        SearchHit {
            score: 0.0,
            namespace: taxonomy.namespace.clone(),
            record: SearchRecord::Taxonomy(taxonomy),
        }
    }

    #[test]
    fn missing_field_never_matches_even_for_ne() {
        let record = SearchRecord::Taxonomy(taxonomy("Genres", 10));
        let filter = FilterSpec::new(
            FilterField::EntityType,
            FilterOp::Ne,
            FilterValue::Text("track".to_string()),
        );
        assert!(!matches_filter(&record, "media", &filter));
    }

    #[test]
    fn numeric_filters_accept_integer_and_float_literals() {
        let record = SearchRecord::Taxonomy(taxonomy("Genres", 10));
        let gte = FilterSpec::new(FilterField::Version, FilterOp::Gte, FilterValue::Integer(2));
        let lt = FilterSpec::new(FilterField::Version, FilterOp::Lt, FilterValue::Float(2.5));
        assert!(matches_filter(&record, "media", &gte));
        assert!(matches_filter(&record, "media", &lt));
    }

    #[test]
    fn neutral_relevance_degrades_to_recency_then_id() {
        let older = hit(taxonomy("Genres", 10));
        let newer = hit(taxonomy("Moods", 20));
        assert_eq!(
            compare_hits(&newer, &older, SearchSort::Relevance, SortOrder::Desc),
            Ordering::Less
        );

        let mut twin = older.clone();
        if let SearchRecord::Taxonomy(row) = &mut twin.record {
            row.id = Uuid::from_u128(u128::MAX);
        }
        assert_eq!(
            compare_hits(&older, &twin, SearchSort::Relevance, SortOrder::Desc),
            older.record.id().cmp(&twin.record.id())
        );
    }
}
