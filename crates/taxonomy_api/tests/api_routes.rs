use serde_json::{json, Value};
use std::sync::Arc;
use taxonomy_api::{ApiRequest, ApiResponse, Method, TaxonomyApi};
use taxonomy_core::{CoreConfig, MemoryAuditSink};

const ADMIN_PERMISSIONS: &str = "namespace:admin";

fn as_admin(request: ApiRequest) -> ApiRequest {
    request
        .header("X-Tenant-Id", "tenant-a")
        .header("X-User-Id", "alice")
        .header("X-Permissions", ADMIN_PERMISSIONS)
}

fn send(api: &TaxonomyApi, request: ApiRequest) -> ApiResponse {
    api.handle(&as_admin(request))
}

fn data(response: &ApiResponse) -> &Value {
    &response.body["data"]
}

fn id_of(response: &ApiResponse) -> String {
    data(response)["id"].as_str().unwrap().to_string()
}

/// Namespace `media` with an active taxonomy `genres`; returns the taxonomy id.
fn seed_active_taxonomy(api: &TaxonomyApi) -> String {
    let created = send(
        api,
        ApiRequest::post("/api/v1/namespaces", json!({"slug": "media", "name": "Media"})),
    );
    assert_eq!(created.status, 201, "{}", created.body);

    let taxonomy = send(
        api,
        ApiRequest::post(
            "/api/v1/taxonomies",
            json!({"namespace": "media", "name": "Genres", "slug": "genres", "max_depth": 3}),
        ),
    );
    assert_eq!(taxonomy.status, 201, "{}", taxonomy.body);
    let taxonomy_id = id_of(&taxonomy);

    let activated = send(
        api,
        ApiRequest::post(
            &format!("/api/v1/taxonomies/{taxonomy_id}/status"),
            json!({"status": "active", "expected_version": 1}),
        ),
    );
    assert_eq!(activated.status, 200, "{}", activated.body);
    assert_eq!(data(&activated)["version"], 2);
    taxonomy_id
}

fn create_category(api: &TaxonomyApi, taxonomy_id: &str, parent: Option<&str>, slug: &str) -> ApiResponse {
    send(
        api,
        ApiRequest::post(
            "/api/v1/categories",
            json!({
                "taxonomy_id": taxonomy_id,
                "parent_id": parent,
                "name": slug.to_uppercase(),
                "slug": slug,
            }),
        ),
    )
}

#[test]
fn health_does_not_need_a_principal() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let response = api.handle(&ApiRequest::get("/api/v1/health"));
    assert_eq!(response.status, 200);
    assert_eq!(data(&response)["status"], "pong");
}

#[test]
fn missing_principal_is_forbidden() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let response = api.handle(&ApiRequest::get("/api/v1/namespaces"));
    assert_eq!(response.status, 403);
    assert_eq!(response.body["error"]["code"], "missing_principal");
    assert_eq!(response.body["error"]["kind"], "forbidden");
}

#[test]
fn read_only_principal_cannot_create_namespaces() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let request = ApiRequest::post("/api/v1/namespaces", json!({"slug": "media", "name": "Media"}))
        .header("x-tenant-id", "tenant-a")
        .header("x-user-id", "bob")
        .header("x-permissions", "taxonomy:read");
    let response = api.handle(&request);
    assert_eq!(response.status, 403);
}

#[test]
fn unknown_routes_render_not_found() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let response = send(&api, ApiRequest::new(Method::Delete, "/api/v1/search"));
    assert_eq!(response.status, 404);
    assert_eq!(response.body["error"]["code"], "route_not_found");

    let outside = send(&api, ApiRequest::get("/api/v2/namespaces"));
    assert_eq!(outside.status, 404);
}

#[test]
fn category_lifecycle_over_the_wire() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let taxonomy_id = seed_active_taxonomy(&api);

    let rock = create_category(&api, &taxonomy_id, None, "rock");
    assert_eq!(rock.status, 201, "{}", rock.body);
    let rock_id = id_of(&rock);
    let punk = create_category(&api, &taxonomy_id, Some(&rock_id), "punk");
    assert_eq!(data(&punk)["path"], "rock/punk");
    assert_eq!(data(&punk)["level"], 1);

    let tree = send(&api, ApiRequest::get(format!("/api/v1/taxonomies/{taxonomy_id}/tree")));
    assert_eq!(tree.status, 200);
    assert_eq!(data(&tree)[0]["children"][0]["category"]["slug"], "punk");

    let restrict = send(
        &api,
        ApiRequest::new(Method::Delete, format!("/api/v1/categories/{rock_id}")),
    );
    assert_eq!(restrict.status, 409);
    assert_eq!(restrict.body["error"]["code"], "has_children");

    let cascade = send(
        &api,
        ApiRequest::new(Method::Delete, format!("/api/v1/categories/{rock_id}")).query("mode", "cascade"),
    );
    assert_eq!(cascade.status, 200, "{}", cascade.body);
    assert_eq!(data(&cascade)["categories"], 2);

    let bad_mode = send(
        &api,
        ApiRequest::new(Method::Delete, format!("/api/v1/categories/{rock_id}")).query("mode", "purge"),
    );
    assert_eq!(bad_mode.status, 422);
}

#[test]
fn moving_under_a_descendant_is_a_conflict() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let taxonomy_id = seed_active_taxonomy(&api);
    let rock_id = id_of(&create_category(&api, &taxonomy_id, None, "rock"));
    let punk_id = id_of(&create_category(&api, &taxonomy_id, Some(&rock_id), "punk"));

    let response = send(
        &api,
        ApiRequest::post(
            &format!("/api/v1/categories/{rock_id}/move"),
            json!({"parent_id": punk_id}),
        ),
    );
    assert_eq!(response.status, 409);
    assert_eq!(response.body["error"]["code"], "cycle_detected");
}

#[test]
fn classification_flow_and_error_statuses() {
    let audit = Arc::new(MemoryAuditSink::new());
    let api = TaxonomyApi::open_in_memory().unwrap().with_audit(audit.clone());
    let taxonomy_id = seed_active_taxonomy(&api);
    let rock_id = id_of(&create_category(&api, &taxonomy_id, None, "rock"));

    let too_confident = send(
        &api,
        ApiRequest::post(
            "/api/v1/classifications",
            json!({
                "entity_type": "track",
                "entity_id": "t-1",
                "category_id": rock_id,
                "assigned_by": "user",
                "confidence_score": 1.5,
            }),
        ),
    );
    assert_eq!(too_confident.status, 422);
    assert_eq!(too_confident.body["error"]["code"], "invalid_score");

    let assigned = send(
        &api,
        ApiRequest::post(
            "/api/v1/classifications",
            json!({
                "entity_type": "track",
                "entity_id": "t-1",
                "category_id": rock_id,
                "assigned_by": "user",
                "confidence_score": 0.5,
            }),
        ),
    );
    assert_eq!(assigned.status, 201, "{}", assigned.body);
    assert_eq!(data(&assigned)["status"], "pending");
    let classification_id = id_of(&assigned);

    let duplicate = send(
        &api,
        ApiRequest::post(
            "/api/v1/classifications",
            json!({
                "entity_type": "track",
                "entity_id": "t-1",
                "category_id": rock_id,
                "assigned_by": "ai",
                "confidence_score": 0.9,
            }),
        ),
    );
    assert_eq!(duplicate.status, 409);

    let confirmed = send(
        &api,
        ApiRequest::post(&format!("/api/v1/classifications/{classification_id}/confirm"), json!({})),
    );
    assert_eq!(data(&confirmed)["status"], "confirmed");

    let listed = send(
        &api,
        ApiRequest::get("/api/v1/classifications")
            .query("entity_type", "track")
            .query("entity_id", "t-1"),
    );
    assert_eq!(data(&listed).as_array().unwrap().len(), 1);

    let removed = send(
        &api,
        ApiRequest::new(Method::Delete, format!("/api/v1/classifications/{classification_id}")),
    );
    assert_eq!(removed.status, 204);

    assert!(!audit.events().is_empty());
}

#[test]
fn bulk_assign_reports_each_item() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let taxonomy_id = seed_active_taxonomy(&api);
    let rock_id = id_of(&create_category(&api, &taxonomy_id, None, "rock"));

    let response = send(
        &api,
        ApiRequest::post(
            "/api/v1/classifications/bulk",
            json!([
                {"entity_type": "track", "entity_id": "t-1", "category_id": rock_id,
                 "assigned_by": "import", "confidence_score": 1.0},
                {"entity_type": "track", "entity_id": "t-2", "category_id": rock_id,
                 "assigned_by": "import", "confidence_score": 7.0},
            ]),
        ),
    );
    assert_eq!(response.status, 200);
    let items = data(&response).as_array().unwrap();
    assert_eq!(items[0]["data"]["status"], "confirmed");
    assert_eq!(items[1]["error"]["code"], "invalid_score");
}

#[test]
fn quota_exceeded_renders_429() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    send(
        &api,
        ApiRequest::post(
            "/api/v1/namespaces",
            json!({"slug": "tiny", "name": "Tiny", "quota_categories": 1}),
        ),
    );
    let taxonomy = send(
        &api,
        ApiRequest::post(
            "/api/v1/taxonomies",
            json!({"namespace": "tiny", "name": "Tags", "slug": "tags"}),
        ),
    );
    let taxonomy_id = id_of(&taxonomy);

    assert_eq!(create_category(&api, &taxonomy_id, None, "first").status, 201);
    let second = create_category(&api, &taxonomy_id, None, "second");
    assert_eq!(second.status, 429);
    assert_eq!(second.body["error"]["kind"], "quota_exceeded");
}

#[test]
fn search_returns_paged_envelope() {
    let api = TaxonomyApi::open_in_memory().unwrap();
    let taxonomy_id = seed_active_taxonomy(&api);
    let rock_id = id_of(&create_category(&api, &taxonomy_id, None, "rock"));
    create_category(&api, &taxonomy_id, Some(&rock_id), "punk-rock");

    let response = send(
        &api,
        ApiRequest::post(
            "/api/v1/search",
            json!({"text": "ROCK", "kinds": ["category"], "sort": "name", "order": "asc"}),
        ),
    );
    assert_eq!(response.status, 200, "{}", response.body);
    let page = data(&response);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["kind"], "category");
    assert_eq!(page["items"][0]["namespace"], "media");

    let invalid = send(&api, ApiRequest::post("/api/v1/search", json!({"page": 0})));
    assert_eq!(invalid.status, 422);
}

#[test]
fn file_backed_api_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        db_path: Some(dir.path().join("taxonomy.sqlite3")),
        ..CoreConfig::default()
    };

    {
        let api = TaxonomyApi::open(config.clone()).unwrap();
        seed_active_taxonomy(&api);
    }

    let reopened = TaxonomyApi::open(config).unwrap();
    let listed = send(&reopened, ApiRequest::get("/api/v1/taxonomies").query("namespace", "media"));
    assert_eq!(data(&listed).as_array().unwrap().len(), 1);
}
