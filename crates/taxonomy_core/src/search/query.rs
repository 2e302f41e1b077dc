//! Search request shape.
//!
//! Filters are a flat list of `(field, op, value)` specs combined with AND.

use crate::search::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};

/// Record kind a search can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEntityKind {
    Taxonomy,
    Category,
    Classification,
}

impl SearchEntityKind {
    pub const ALL: [SearchEntityKind; 3] = [
        SearchEntityKind::Taxonomy,
        SearchEntityKind::Category,
        SearchEntityKind::Classification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Taxonomy => "taxonomy",
            Self::Category => "category",
            Self::Classification => "classification",
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    /// Scorer output, then recency.
    #[default]
    Relevance,
    UpdatedAt,
    CreatedAt,
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Field a filter spec can address. Kinds without the field never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Namespace,
    Status,
    Name,
    Slug,
    Path,
    Level,
    Version,
    TaxonomyId,
    CategoryId,
    EntityType,
    EntityId,
    AssignedBy,
    ConfidenceScore,
    ExpiresAt,
    CreatedBy,
    UpdatedBy,
    CreatedAt,
    UpdatedAt,
}

impl FilterField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Status => "status",
            Self::Name => "name",
            Self::Slug => "slug",
            Self::Path => "path",
            Self::Level => "level",
            Self::Version => "version",
            Self::TaxonomyId => "taxonomy_id",
            Self::CategoryId => "category_id",
            Self::EntityType => "entity_type",
            Self::EntityId => "entity_id",
            Self::AssignedBy => "assigned_by",
            Self::ConfidenceScore => "confidence_score",
            Self::ExpiresAt => "expires_at",
            Self::CreatedBy => "created_by",
            Self::UpdatedBy => "updated_by",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    /// Case-insensitive substring.
    Contains,
    /// Case-insensitive prefix.
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Equals any list element.
    In,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
        }
    }
}

/// Literal on the right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_))
    }

    fn contains_bool(&self) -> bool {
        match self {
            Self::Bool(_) => true,
            Self::List(items) => items.iter().any(Self::contains_bool),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterSpec {
    pub fn new(field: FilterField, op: FilterOp, value: FilterValue) -> Self {
        Self { field, op, value }
    }

    /// Checks that `value` fits `op`. No searchable field holds a boolean,
    /// so boolean literals are rejected outright.
    pub fn validate(&self) -> SearchResult<()> {
        let problem = match (&self.op, &self.value) {
            (_, value) if value.contains_bool() => Some("expects a number or text value"),
            (FilterOp::Contains | FilterOp::StartsWith, FilterValue::Text(_)) => None,
            (FilterOp::Contains | FilterOp::StartsWith, _) => Some("expects a text value"),
            (FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte, value) => {
                match value {
                    FilterValue::Integer(_) | FilterValue::Float(_) | FilterValue::Text(_) => None,
                    _ => Some("expects a number or text value"),
                }
            }
            (FilterOp::In, FilterValue::List(items)) => {
                if items.is_empty() {
                    Some("expects a non-empty list")
                } else if !items.iter().all(FilterValue::is_scalar) {
                    Some("expects a flat list")
                } else {
                    None
                }
            }
            (FilterOp::In, _) => Some("expects a list value"),
            (FilterOp::Eq | FilterOp::Ne, value) if !value.is_scalar() => {
                Some("expects a single value")
            }
            (FilterOp::Eq | FilterOp::Ne, _) => None,
        };
        match problem {
            Some(reason) => Err(SearchError::InvalidFilter {
                field: self.field,
                op: self.op,
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Search request. Tenant scoping comes from the request context, never
/// from the query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Free text matched case-insensitively against names, slugs, paths,
    /// descriptions and entity identifiers.
    pub text: Option<String>,
    /// Kinds to search; empty means every kind.
    pub kinds: Vec<SearchEntityKind>,
    pub namespace: Option<String>,
    pub entity_type: Option<String>,
    pub status: Option<String>,
    pub filters: Vec<FilterSpec>,
    pub sort: SearchSort,
    pub order: SortOrder,
    /// 1-based page, default 1.
    pub page: Option<u32>,
    /// Page size, clamped into the configured bounds.
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Kinds this query fans out to, in a stable order.
    pub fn effective_kinds(&self) -> Vec<SearchEntityKind> {
        if self.kinds.is_empty() {
            return SearchEntityKind::ALL.to_vec();
        }
        let mut kinds = self.kinds.clone();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Trimmed, non-blank free text.
    pub fn normalized_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// Every constraint as a filter spec, shorthand fields included.
    pub fn all_filters(&self) -> Vec<FilterSpec> {
        let mut filters = Vec::with_capacity(self.filters.len() + 3);
        let shorthand = [
            (FilterField::Namespace, &self.namespace),
            (FilterField::EntityType, &self.entity_type),
            (FilterField::Status, &self.status),
        ];
        for (field, value) in shorthand {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                filters.push(FilterSpec::new(
                    field,
                    FilterOp::Eq,
                    FilterValue::Text(value.to_string()),
                ));
            }
        }
        filters.extend(self.filters.iter().cloned());
        filters
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.page == Some(0) {
            return Err(SearchError::InvalidQuery("page starts at 1".to_string()));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FilterField, FilterOp, FilterSpec, FilterValue, SearchEntityKind, SearchQuery, SearchSort,
        SortOrder,
    };
    use crate::search::SearchError;
    use serde_json::json;

    #[test]
    fn deserializes_wire_shape_with_defaults() {
        let query: SearchQuery = serde_json::from_value(json!({
            "text": "rock",
            "filters": [
                {"field": "level", "op": "lte", "value": 2},
                {"field": "confidence_score", "op": "gte", "value": 0.5},
                {"field": "status", "op": "in", "value": ["pending", "confirmed"]}
            ]
        }))
        .unwrap();

        assert_eq!(query.sort, SearchSort::Relevance);
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.filters[0].value, FilterValue::Integer(2));
        assert_eq!(query.filters[1].value, FilterValue::Float(0.5));
        assert_eq!(query.effective_kinds(), SearchEntityKind::ALL.to_vec());
        query.validate().unwrap();
    }

    #[test]
    fn shorthand_fields_become_eq_filters() {
        let query = SearchQuery {
            namespace: Some("media".to_string()),
            status: Some("  ".to_string()),
            ..SearchQuery::default()
        };
        assert_eq!(
            query.all_filters(),
            vec![FilterSpec::new(
                FilterField::Namespace,
                FilterOp::Eq,
                FilterValue::Text("media".to_string())
            )]
        );
    }

    #[test]
    fn rejects_mismatched_operator_values() {
        let contains_number =
            FilterSpec::new(FilterField::Name, FilterOp::Contains, FilterValue::Integer(1));
        assert!(matches!(
            contains_number.validate(),
            Err(SearchError::InvalidFilter { .. })
        ));

        let empty_in = FilterSpec::new(FilterField::Status, FilterOp::In, FilterValue::List(vec![]));
        assert!(empty_in.validate().is_err());

        let eq_bool = FilterSpec::new(FilterField::Status, FilterOp::Eq, FilterValue::Bool(true));
        assert!(matches!(eq_bool.validate(), Err(SearchError::InvalidFilter { .. })));

        let in_with_bool = FilterSpec::new(
            FilterField::Status,
            FilterOp::In,
            FilterValue::List(vec![FilterValue::Text("active".to_string()), FilterValue::Bool(false)]),
        );
        assert!(in_with_bool.validate().is_err());

        let page_zero = SearchQuery {
            page: Some(0),
            ..SearchQuery::default()
        };
        assert!(matches!(page_zero.validate(), Err(SearchError::InvalidQuery(_))));
    }
}
