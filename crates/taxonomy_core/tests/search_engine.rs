use rusqlite::Connection;
use serde_json::json;
use taxonomy_core::db::open_db_in_memory;
use taxonomy_core::repo::category_repo::SqliteCategoryRepository;
use taxonomy_core::repo::classification_repo::SqliteClassificationRepository;
use taxonomy_core::repo::namespace_repo::SqliteNamespaceRepository;
use taxonomy_core::search::query::{FilterField, FilterOp};
use taxonomy_core::search::{
    FilterSpec, FilterValue, RelevanceScorer, SearchEntityKind, SearchRecord, SearchService,
    SearchSort, SortOrder,
};
use taxonomy_core::service::category_service::NewCategory;
use taxonomy_core::service::classification_service::AssignRequest;
use taxonomy_core::service::namespace_service::{NewNamespace, NewTaxonomy};
use taxonomy_core::{
    search_all, AssignedBy, Category, CategoryService, ClassificationService, ClassifiedError,
    ErrorKind, Metadata, NamespaceService, Permission, RequestContext, SearchError, SearchQuery,
    Taxonomy, TaxonomyStatus,
};

fn admin() -> RequestContext {
    RequestContext::admin("tenant-a", "alice").unwrap()
}

fn add_taxonomy(conn: &Connection, ctx: &RequestContext, namespace: &str, slug: &str) -> Taxonomy {
    let registry = NamespaceService::new(SqliteNamespaceRepository::try_new(conn).unwrap());
    if registry.find_namespace(ctx, namespace).is_err() {
        registry
            .create_namespace(
                ctx,
                NewNamespace {
                    slug: namespace.to_string(),
                    name: namespace.to_string(),
                    ..NewNamespace::default()
                },
            )
            .unwrap();
    }
    let taxonomy = registry
        .create_taxonomy(
            ctx,
            NewTaxonomy {
                namespace: namespace.to_string(),
                name: slug.to_string(),
                slug: slug.to_string(),
                description: None,
                is_hierarchical: true,
                max_depth: None,
                metadata: Metadata::new(),
            },
        )
        .unwrap();
    registry
        .set_taxonomy_status(ctx, taxonomy.id, TaxonomyStatus::Active, None)
        .unwrap()
}

fn add_category(
    conn: &Connection,
    ctx: &RequestContext,
    taxonomy: &Taxonomy,
    parent: Option<&Category>,
    slug: &str,
) -> Category {
    CategoryService::new(
        SqliteCategoryRepository::try_new(conn).unwrap(),
        SqliteNamespaceRepository::try_new(conn).unwrap(),
    )
    .create_category(
        ctx,
        NewCategory {
            taxonomy_id: taxonomy.id,
            parent_id: parent.map(|row| row.id),
            name: slug.replace('-', " "),
            slug: slug.to_string(),
            description: None,
            confidence_score: None,
            is_active: true,
            metadata: Metadata::new(),
        },
    )
    .unwrap()
}

fn assign(conn: &Connection, ctx: &RequestContext, category: &Category, entity_id: &str, score: f64) {
    ClassificationService::new(
        SqliteClassificationRepository::try_new(conn).unwrap(),
        SqliteCategoryRepository::try_new(conn).unwrap(),
        SqliteNamespaceRepository::try_new(conn).unwrap(),
    )
    .assign(
        ctx,
        AssignRequest {
            entity_type: "track".to_string(),
            entity_id: entity_id.to_string(),
            category_id: category.id,
            assigned_by: AssignedBy::Ai,
            confidence_score: score,
            expires_at: None,
            metadata: Metadata::new(),
        },
    )
    .unwrap();
}

/// media/genres: rock > punk-rock, jazz; books/shelves: rock-biographies.
/// Tracks t-1 (rock, 0.9) and t-2 (jazz, 0.3).
fn seed(conn: &Connection) {
    let ctx = admin();
    let genres = add_taxonomy(conn, &ctx, "media", "genres");
    let rock = add_category(conn, &ctx, &genres, None, "rock");
    add_category(conn, &ctx, &genres, Some(&rock), "punk-rock");
    let jazz = add_category(conn, &ctx, &genres, None, "jazz");
    let shelves = add_taxonomy(conn, &ctx, "books", "shelves");
    add_category(conn, &ctx, &shelves, None, "rock-biographies");
    assign(conn, &ctx, &rock, "t-1", 0.9);
    assign(conn, &ctx, &jazz, "t-2", 0.3);
}

fn names(page: &taxonomy_core::SearchPage) -> Vec<String> {
    page.items.iter().map(|hit| hit.record.name()).collect()
}

#[test]
fn free_text_matches_across_kinds_case_insensitively() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let page = search_all(&conn, &admin(), &SearchQuery::text("ROCK")).unwrap();
    assert_eq!(page.total, 3);
    assert!(page
        .items
        .iter()
        .all(|hit| hit.record.kind() == SearchEntityKind::Category));

    let page = search_all(&conn, &admin(), &SearchQuery::text("t-2")).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].record.kind(), SearchEntityKind::Classification);
    assert_eq!(page.items[0].namespace, "media");
}

#[test]
fn empty_query_lists_everything_of_the_tenant() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let page = search_all(&conn, &admin(), &SearchQuery::default()).unwrap();
    // 2 taxonomies + 4 categories + 2 classifications
    assert_eq!(page.total, 8);

    let stranger = RequestContext::admin("tenant-b", "eve").unwrap();
    let page = search_all(&conn, &stranger, &SearchQuery::default()).unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(page.total_pages, 0);
}

#[test]
fn namespace_and_kind_narrow_the_fan_out() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let query = SearchQuery {
        text: Some("rock".to_string()),
        namespace: Some("books".to_string()),
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(names(&page), vec!["rock biographies"]);

    let query = SearchQuery {
        kinds: vec![SearchEntityKind::Taxonomy],
        sort: SearchSort::Name,
        order: SortOrder::Asc,
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(names(&page), vec!["genres", "shelves"]);
}

#[test]
fn filter_specs_are_and_combined() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let query = SearchQuery {
        kinds: vec![SearchEntityKind::Category],
        filters: vec![
            FilterSpec::new(FilterField::Level, FilterOp::Gte, FilterValue::Integer(1)),
            FilterSpec::new(
                FilterField::Path,
                FilterOp::StartsWith,
                FilterValue::Text("Rock/".to_string()),
            ),
        ],
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(names(&page), vec!["punk rock"]);
}

#[test]
fn kinds_without_the_filtered_field_never_match() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let query = SearchQuery {
        filters: vec![FilterSpec::new(
            FilterField::ConfidenceScore,
            FilterOp::Gt,
            FilterValue::Float(0.5),
        )],
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(page.total, 1);
    match &page.items[0].record {
        SearchRecord::Classification(row) => assert_eq!(row.entity_id, "t-1"),
        other => panic!("unexpected record: {other:?}"),
    }
}

#[test]
fn status_shorthand_and_in_filter() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let query: SearchQuery = serde_json::from_value(json!({
        "kinds": ["taxonomy", "classification"],
        "filters": [{"field": "status", "op": "in", "value": ["active", "pending"]}]
    }))
    .unwrap();
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(page.total, 4);

    let query = SearchQuery {
        status: Some("pending".to_string()),
        entity_type: Some("track".to_string()),
        ..SearchQuery::default()
    };
    assert_eq!(search_all(&conn, &admin(), &query).unwrap().total, 2);
}

#[test]
fn pagination_reports_totals_and_clamps_limit() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let query = SearchQuery {
        sort: SearchSort::Name,
        order: SortOrder::Asc,
        limit: Some(3),
        page: Some(3),
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    assert_eq!(page.total, 8);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 2);

    let beyond = SearchQuery {
        page: Some(9),
        ..query.clone()
    };
    assert!(search_all(&conn, &admin(), &beyond).unwrap().items.is_empty());

    let huge = SearchQuery {
        limit: Some(10_000),
        ..SearchQuery::default()
    };
    assert_eq!(search_all(&conn, &admin(), &huge).unwrap().limit, 100);

    let zero = SearchQuery {
        limit: Some(0),
        ..SearchQuery::default()
    };
    assert_eq!(search_all(&conn, &admin(), &zero).unwrap().limit, 1);
}

#[test]
fn invalid_queries_are_validation_errors() {
    let conn = open_db_in_memory().unwrap();
    let query = SearchQuery {
        filters: vec![FilterSpec::new(
            FilterField::Name,
            FilterOp::In,
            FilterValue::Text("rock".to_string()),
        )],
        ..SearchQuery::default()
    };
    let err = search_all(&conn, &admin(), &query).unwrap_err();
    assert!(matches!(err, SearchError::InvalidFilter { .. }));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn search_requires_read_permission() {
    let conn = open_db_in_memory().unwrap();
    let ctx = RequestContext::new("tenant-a", "bob", [Permission::ClassificationWrite]).unwrap();
    let err = search_all(&conn, &ctx, &SearchQuery::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

struct ConfidenceScorer;

impl RelevanceScorer for ConfidenceScorer {
    fn score(&self, _text: Option<&str>, record: &SearchRecord) -> f64 {
        match record {
            SearchRecord::Classification(row) => row.confidence_score,
            _ => 0.0,
        }
    }
}

#[test]
fn custom_scorer_drives_relevance_order() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);

    let service = SearchService::new(
        SqliteNamespaceRepository::try_new(&conn).unwrap(),
        SqliteCategoryRepository::try_new(&conn).unwrap(),
        SqliteClassificationRepository::try_new(&conn).unwrap(),
    )
    .with_scorer(Box::new(ConfidenceScorer));

    let query = SearchQuery {
        kinds: vec![SearchEntityKind::Classification],
        ..SearchQuery::default()
    };
    let page = service.search(&admin(), &query).unwrap();
    let scores: Vec<f64> = page.items.iter().map(|hit| hit.score).collect();
    assert_eq!(scores, vec![0.9, 0.3]);

    let ascending = SearchQuery {
        order: SortOrder::Asc,
        ..query
    };
    let page = service.search(&admin(), &ascending).unwrap();
    assert_eq!(page.items[0].score, 0.3);
}

#[test]
fn hits_serialize_with_kind_tag() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let query = SearchQuery {
        kinds: vec![SearchEntityKind::Taxonomy],
        namespace: Some("media".to_string()),
        ..SearchQuery::default()
    };
    let page = search_all(&conn, &admin(), &query).unwrap();
    let wire = serde_json::to_value(&page).unwrap();
    assert_eq!(wire["items"][0]["kind"], "taxonomy");
    assert_eq!(wire["items"][0]["record"]["slug"], "genres");
    assert_eq!(wire["total_pages"], 1);
}
