use rusqlite::Connection;
use serde_json::json;
use taxonomy_core::db::open_db_in_memory;
use taxonomy_core::model::metadata::MetadataValue;
use taxonomy_core::repo::category_repo::SqliteCategoryRepository;
use taxonomy_core::repo::namespace_repo::SqliteNamespaceRepository;
use taxonomy_core::service::category_service::NewCategory;
use taxonomy_core::service::namespace_service::{
    NamespaceUpdate, NewNamespace, NewTaxonomy, TaxonomyUpdate,
};
use taxonomy_core::{
    CategoryService, CategoryServiceError, ClassifiedError, ErrorKind, Metadata, MetadataSchema,
    NamespaceService, NamespaceServiceError, Permission, RequestContext, Taxonomy,
    TaxonomyStatus,
};

fn admin() -> RequestContext {
    RequestContext::admin("tenant-a", "alice").unwrap()
}

fn registry(conn: &Connection) -> NamespaceService<SqliteNamespaceRepository<'_>> {
    NamespaceService::new(SqliteNamespaceRepository::try_new(conn).unwrap())
}

fn categories(
    conn: &Connection,
) -> CategoryService<SqliteCategoryRepository<'_>, SqliteNamespaceRepository<'_>> {
    CategoryService::new(
        SqliteCategoryRepository::try_new(conn).unwrap(),
        SqliteNamespaceRepository::try_new(conn).unwrap(),
    )
}

fn namespace(slug: &str) -> NewNamespace {
    NewNamespace {
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        ..NewNamespace::default()
    }
}

fn taxonomy(namespace: &str, slug: &str) -> NewTaxonomy {
    NewTaxonomy {
        namespace: namespace.to_string(),
        name: slug.to_string(),
        slug: slug.to_string(),
        description: None,
        is_hierarchical: true,
        max_depth: None,
        metadata: Metadata::new(),
    }
}

fn root_category(taxonomy: &Taxonomy, slug: &str) -> NewCategory {
    NewCategory {
        taxonomy_id: taxonomy.id,
        parent_id: None,
        name: slug.to_string(),
        slug: slug.to_string(),
        description: None,
        confidence_score: None,
        is_active: true,
        metadata: Metadata::new(),
    }
}

#[test]
fn namespace_slugs_are_unique_per_tenant() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);

    service.create_namespace(&admin(), namespace("media")).unwrap();
    let err = service
        .create_namespace(&admin(), namespace("media"))
        .unwrap_err();
    assert!(matches!(err, NamespaceServiceError::DuplicateNamespace(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let other = RequestContext::admin("tenant-b", "eve").unwrap();
    service.create_namespace(&other, namespace("media")).unwrap();
    assert_eq!(service.list_namespaces(&admin()).unwrap().len(), 1);
    assert_eq!(service.list_namespaces(&other).unwrap().len(), 1);
}

#[test]
fn taxonomy_slugs_are_unique_within_a_namespace() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    service.create_namespace(&admin(), namespace("media")).unwrap();
    service.create_namespace(&admin(), namespace("books")).unwrap();

    let created = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.status, TaxonomyStatus::Draft);
    assert_eq!(created.max_depth, 5);

    let err = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap_err();
    assert!(matches!(err, NamespaceServiceError::DuplicateTaxonomy { .. }));

    service
        .create_taxonomy(&admin(), taxonomy("books", "genres"))
        .unwrap();
    assert_eq!(
        service
            .find_taxonomy(&admin(), "books", "genres")
            .unwrap()
            .namespace,
        "books"
    );
    assert_eq!(service.list_taxonomies(&admin(), None).unwrap().len(), 2);
    assert_eq!(
        service
            .list_taxonomies(&admin(), Some("media"))
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn unknown_namespace_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let err = registry(&conn)
        .create_taxonomy(&admin(), taxonomy("ghost", "genres"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn default_max_depth_is_configurable() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn).with_default_max_depth(2);
    service.create_namespace(&admin(), namespace("media")).unwrap();
    let created = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();
    assert_eq!(created.max_depth, 2);
}

#[test]
fn taxonomy_updates_bump_version_and_honor_expected_version() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    service.create_namespace(&admin(), namespace("media")).unwrap();
    let created = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();

    let renamed = service
        .update_taxonomy(
            &admin(),
            created.id,
            TaxonomyUpdate {
                name: Some("Music Genres".to_string()),
                expected_version: Some(1),
                ..TaxonomyUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.version, 2);
    assert_eq!(renamed.name, "Music Genres");

    let stale = service
        .update_taxonomy(
            &admin(),
            created.id,
            TaxonomyUpdate {
                name: Some("Stale".to_string()),
                expected_version: Some(1),
                ..TaxonomyUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        stale,
        NamespaceServiceError::VersionConflict {
            expected: 1,
            actual: 2,
            ..
        }
    ));
    assert_eq!(stale.kind(), ErrorKind::Conflict);
}

#[test]
fn taxonomy_status_follows_lifecycle() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    service.create_namespace(&admin(), namespace("media")).unwrap();
    let created = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();

    let err = service
        .set_taxonomy_status(&admin(), created.id, TaxonomyStatus::Deprecated, None)
        .unwrap_err();
    assert!(matches!(
        err,
        NamespaceServiceError::InvalidStatusTransition { .. }
    ));

    let active = service
        .set_taxonomy_status(&admin(), created.id, TaxonomyStatus::Active, Some(1))
        .unwrap();
    assert_eq!(active.status, TaxonomyStatus::Active);
    assert_eq!(active.version, 2);

    let deprecated = service
        .set_taxonomy_status(&admin(), created.id, TaxonomyStatus::Deprecated, None)
        .unwrap();
    assert_eq!(deprecated.version, 3);
}

#[test]
fn category_quota_counts_live_categories() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    service
        .create_namespace(
            &admin(),
            NewNamespace {
                quota_categories: Some(2),
                ..namespace("media")
            },
        )
        .unwrap();
    let genres = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();
    let moods = service
        .create_taxonomy(&admin(), taxonomy("media", "moods"))
        .unwrap();

    let hierarchy = categories(&conn);
    hierarchy
        .create_category(&admin(), root_category(&genres, "rock"))
        .unwrap();
    let calm = hierarchy
        .create_category(&admin(), root_category(&moods, "calm"))
        .unwrap();

    let err = hierarchy
        .create_category(&admin(), root_category(&moods, "angry"))
        .unwrap_err();
    assert!(matches!(err, CategoryServiceError::Quota(ref quota) if quota.limit == 2));
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);

    let usage = service.usage(&admin(), "media").unwrap();
    assert_eq!((usage.taxonomies, usage.categories), (2, 2));

    hierarchy
        .delete_category(&admin(), calm.id, Default::default())
        .unwrap();
    hierarchy
        .create_category(&admin(), root_category(&moods, "angry"))
        .unwrap();

    // Lifting the quota with an explicit null.
    let patch: NamespaceUpdate =
        serde_json::from_value(json!({ "quota_categories": null })).unwrap();
    let id = service.find_namespace(&admin(), "media").unwrap().id;
    let updated = service.update_namespace(&admin(), id, patch).unwrap();
    assert_eq!(updated.quota_categories, None);
    hierarchy
        .create_category(&admin(), root_category(&moods, "happy"))
        .unwrap();
}

#[test]
fn namespace_patch_keeps_absent_quota() {
    let patch: NamespaceUpdate = serde_json::from_value(json!({ "name": "Media" })).unwrap();
    assert_eq!(patch.quota_categories, None);
    let patch: NamespaceUpdate =
        serde_json::from_value(json!({ "quota_categories": 10 })).unwrap();
    assert_eq!(patch.quota_categories, Some(Some(10)));
}

#[test]
fn namespace_with_live_taxonomies_cannot_be_deleted() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    let media = service.create_namespace(&admin(), namespace("media")).unwrap();
    let genres = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();

    let err = service.delete_namespace(&admin(), media.id).unwrap_err();
    assert!(matches!(
        err,
        NamespaceServiceError::NamespaceInUse { taxonomies: 1, .. }
    ));

    service.delete_taxonomy(&admin(), genres.id).unwrap();
    service.delete_namespace(&admin(), media.id).unwrap();
    assert_eq!(
        service.get_namespace(&admin(), media.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    // Slug is free again once tombstoned.
    service.create_namespace(&admin(), namespace("media")).unwrap();
}

#[test]
fn deleting_a_taxonomy_tombstones_its_categories() {
    let conn = open_db_in_memory().unwrap();
    let service = registry(&conn);
    service.create_namespace(&admin(), namespace("media")).unwrap();
    let genres = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap();
    let hierarchy = categories(&conn);
    let rock = hierarchy
        .create_category(&admin(), root_category(&genres, "rock"))
        .unwrap();

    let deletion = service.delete_taxonomy(&admin(), genres.id).unwrap();
    assert_eq!(deletion.categories, 1);
    assert_eq!(
        hierarchy.get_category(&admin(), rock.id).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(service.usage(&admin(), "media").unwrap().categories, 0);
}

#[test]
fn metadata_is_validated_against_the_namespace_schema() {
    let conn = open_db_in_memory().unwrap();
    let schema: MetadataSchema = serde_json::from_value(json!({
        "color": {"kind": "text", "required": true}
    }))
    .unwrap();
    let service = registry(&conn);
    service
        .create_namespace(
            &admin(),
            NewNamespace {
                metadata_schema: schema,
                ..namespace("media")
            },
        )
        .unwrap();

    let missing = service
        .create_taxonomy(&admin(), taxonomy("media", "genres"))
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::Validation);

    let mut metadata = Metadata::new();
    metadata.insert("color", MetadataValue::Text("red".to_string())).unwrap();
    let created = service
        .create_taxonomy(
            &admin(),
            NewTaxonomy {
                metadata,
                ..taxonomy("media", "genres")
            },
        )
        .unwrap();
    assert_eq!(
        created.metadata.get("color"),
        Some(&MetadataValue::Text("red".to_string()))
    );
}

#[test]
fn namespace_admin_is_required_for_registry_writes() {
    let conn = open_db_in_memory().unwrap();
    let writer = RequestContext::new("tenant-a", "bob", [Permission::TaxonomyWrite]).unwrap();
    let err = registry(&conn)
        .create_namespace(&writer, namespace("media"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(err.code(), "forbidden");
}
