//! Versioned request dispatcher over the taxonomy core.
//!
//! # Responsibility
//! - Map `/api/v1/...` requests onto core service calls.
//! - Build the request principal from `x-tenant-id`, `x-user-id` and
//!   `x-permissions` headers.
//! - Render results as `{"data": ...}` and failures as
//!   `{"error": {"code", "kind", "message"}}`.
//!
//! # Invariants
//! - `handle` never panics; every failure becomes a response.
//! - Status codes derive from the core error kind only.
//!
//! The HTTP listener itself lives outside this crate.

use log::{info, warn};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use taxonomy_core::context::parse_permission_list;
use taxonomy_core::repo::category_repo::SqliteCategoryRepository;
use taxonomy_core::repo::classification_repo::SqliteClassificationRepository;
use taxonomy_core::repo::namespace_repo::SqliteNamespaceRepository;
use taxonomy_core::search::SearchService;
use taxonomy_core::service::category_service::{CategoryUpdate, NewCategory};
use taxonomy_core::service::classification_service::AssignRequest;
use taxonomy_core::service::namespace_service::{
    NamespaceUpdate, NewNamespace, NewTaxonomy, TaxonomyUpdate,
};
use taxonomy_core::service::now_epoch_ms;
use taxonomy_core::{
    open_db, open_db_in_memory, AuditSink, CategoryDeleteMode, CategoryService, ClassificationService,
    ClassifiedError, CoreConfig, DbError, ErrorKind, LogAuditSink, NamespaceService,
    RepoError, RequestContext, SearchQuery, TaxonomyStatus,
};
use uuid::Uuid;

pub const API_PREFIX: &str = "/api/v1";
pub const HEADER_TENANT_ID: &str = "x-tenant-id";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_PERMISSIONS: &str = "x-permissions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Transport-neutral request. Header names are case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).json(body)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn data(status: u16, data: Value) -> Self {
        Self {
            status,
            body: json!({ "data": data }),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Rendered failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: u16,
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: status_for_kind(kind),
            kind,
            code,
            message: message.into(),
        }
    }

    fn from_classified<E: ClassifiedError>(err: E) -> Self {
        Self::new(err.kind(), err.code(), err.to_string())
    }

    fn storage(err: RepoError) -> Self {
        Self::new(ErrorKind::Internal, "storage_error", err.to_string())
    }

    fn route_not_found(method: Method, path: &str) -> Self {
        Self::new(
            ErrorKind::NotFound,
            "route_not_found",
            format!("no route for {} {path}", method.as_str()),
        )
    }

    fn invalid(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    fn into_response(self) -> ApiResponse {
        ApiResponse {
            status: self.status,
            body: json!({
                "error": {
                    "code": self.code,
                    "kind": self.kind,
                    "message": self.message,
                }
            }),
        }
    }
}

/// HTTP status for an error kind.
pub fn status_for_kind(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::Validation => 422,
        ErrorKind::Conflict => 409,
        ErrorKind::QuotaExceeded => 429,
        ErrorKind::Forbidden => 403,
        ErrorKind::Internal => 500,
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: TaxonomyStatus,
    #[serde(default)]
    expected_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    #[serde(default)]
    parent_id: Option<Uuid>,
    #[serde(default)]
    target_order: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExpireRequest {
    now: Option<i64>,
}

/// Request dispatcher bound to one database connection.
pub struct TaxonomyApi {
    conn: Connection,
    audit: Arc<dyn AuditSink>,
    config: CoreConfig,
}

impl TaxonomyApi {
    /// Opens the database named by `config`, in memory when it names none.
    pub fn open(config: CoreConfig) -> Result<Self, DbError> {
        let conn = match &config.db_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        Ok(Self::from_connection(conn, config))
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(CoreConfig::default())
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection, config: CoreConfig) -> Self {
        Self {
            conn,
            audit: Arc::new(LogAuditSink),
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let response = match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "event=api_request module=api status=error method={} path={} http_status={} code={}",
                    request.method.as_str(),
                    request.path,
                    err.status,
                    err.code
                );
                return err.into_response();
            }
        };
        info!(
            "event=api_request module=api status=ok method={} path={} http_status={}",
            request.method.as_str(),
            request.path,
            response.status
        );
        response
    }

    fn dispatch(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let Some(rest) = request.path.strip_prefix(API_PREFIX) else {
            return Err(ApiError::route_not_found(request.method, &request.path));
        };
        let segments: Vec<&str> = rest.split('/').filter(|part| !part.is_empty()).collect();

        if let (Method::Get, ["health"]) = (request.method, segments.as_slice()) {
            return Ok(ApiResponse::data(
                200,
                json!({ "status": taxonomy_core::ping(), "version": taxonomy_core::core_version() }),
            ));
        }

        let ctx = request_context(request)?;
        match segments.first().copied() {
            Some("namespaces") => self.namespace_routes(&ctx, request, &segments[1..]),
            Some("taxonomies") => self.taxonomy_routes(&ctx, request, &segments[1..]),
            Some("categories") => self.category_routes(&ctx, request, &segments[1..]),
            Some("classifications") => self.classification_routes(&ctx, request, &segments[1..]),
            Some("search") if request.method == Method::Post && segments.len() == 1 => {
                let query: SearchQuery = parse_body_or_default(request)?;
                let page = self.search_service()?.search(&ctx, &query).map_err(ApiError::from_classified)?;
                Ok(ApiResponse::data(200, to_json(&page)?))
            }
            _ => Err(ApiError::route_not_found(request.method, &request.path)),
        }
    }

    fn namespace_routes(
        &self,
        ctx: &RequestContext,
        request: &ApiRequest,
        segments: &[&str],
    ) -> ApiResult<ApiResponse> {
        let service = self.namespace_service()?;
        let result = match (request.method, segments) {
            (Method::Get, []) => service.list_namespaces(ctx).map(|rows| (200, to_json(&rows))),
            (Method::Post, []) => {
                let input: NewNamespace = parse_body(request)?;
                service.create_namespace(ctx, input).map(|row| (201, to_json(&row)))
            }
            (Method::Get, [slug, "usage"]) => service.usage(ctx, slug).map(|usage| (200, to_json(&usage))),
            (Method::Get, [id]) => service
                .get_namespace(ctx, parse_id(id)?)
                .map(|row| (200, to_json(&row))),
            (Method::Patch, [id]) => {
                let patch: NamespaceUpdate = parse_body(request)?;
                service
                    .update_namespace(ctx, parse_id(id)?, patch)
                    .map(|row| (200, to_json(&row)))
            }
            (Method::Delete, [id]) => {
                return service
                    .delete_namespace(ctx, parse_id(id)?)
                    .map(|()| ApiResponse::no_content())
                    .map_err(ApiError::from_classified);
            }
            _ => return Err(ApiError::route_not_found(request.method, &request.path)),
        };
        respond(result)
    }

    fn taxonomy_routes(
        &self,
        ctx: &RequestContext,
        request: &ApiRequest,
        segments: &[&str],
    ) -> ApiResult<ApiResponse> {
        match (request.method, segments) {
            (Method::Get, [id, "tree"]) => {
                let service = self.category_service()?;
                return respond(
                    service
                        .category_tree(ctx, parse_id(id)?)
                        .map(|tree| (200, to_json(&tree))),
                );
            }
            (Method::Get, [id, "categories"]) => {
                let parent_id = request.query_value("parent_id").map(parse_id).transpose()?;
                let service = self.category_service()?;
                return respond(
                    service
                        .list_children(ctx, parse_id(id)?, parent_id)
                        .map(|rows| (200, to_json(&rows))),
                );
            }
            (Method::Get, [id, "verify"]) => {
                let service = self.category_service()?;
                return respond(
                    service
                        .verify_hierarchy(ctx, parse_id(id)?)
                        .map(|issues| (200, to_json(&issues))),
                );
            }
            _ => {}
        }

        let service = self.namespace_service()?;
        let result = match (request.method, segments) {
            (Method::Get, []) => service
                .list_taxonomies(ctx, request.query_value("namespace"))
                .map(|rows| (200, to_json(&rows))),
            (Method::Post, []) => {
                let input: NewTaxonomy = parse_body(request)?;
                service.create_taxonomy(ctx, input).map(|row| (201, to_json(&row)))
            }
            (Method::Get, [id]) => service
                .get_taxonomy(ctx, parse_id(id)?)
                .map(|row| (200, to_json(&row))),
            (Method::Patch, [id]) => {
                let patch: TaxonomyUpdate = parse_body(request)?;
                service
                    .update_taxonomy(ctx, parse_id(id)?, patch)
                    .map(|row| (200, to_json(&row)))
            }
            (Method::Post, [id, "status"]) => {
                let change: StatusChange = parse_body(request)?;
                service
                    .set_taxonomy_status(ctx, parse_id(id)?, change.status, change.expected_version)
                    .map(|row| (200, to_json(&row)))
            }
            (Method::Delete, [id]) => service
                .delete_taxonomy(ctx, parse_id(id)?)
                .map(|deleted| (200, to_json(&deleted))),
            _ => return Err(ApiError::route_not_found(request.method, &request.path)),
        };
        respond(result)
    }

    fn category_routes(
        &self,
        ctx: &RequestContext,
        request: &ApiRequest,
        segments: &[&str],
    ) -> ApiResult<ApiResponse> {
        if let (Method::Get, [id, "classifications"]) = (request.method, segments) {
            let include_inactive = query_flag(request, "include_inactive")?;
            let service = self.classification_service()?;
            return respond(
                service
                    .list_for_category(ctx, parse_id(id)?, include_inactive)
                    .map(|rows| (200, to_json(&rows))),
            );
        }

        let service = self.category_service()?;
        let result = match (request.method, segments) {
            (Method::Post, []) => {
                let input: NewCategory = parse_body(request)?;
                service.create_category(ctx, input).map(|row| (201, to_json(&row)))
            }
            (Method::Get, [id]) => service
                .get_category(ctx, parse_id(id)?)
                .map(|row| (200, to_json(&row))),
            (Method::Patch, [id]) => {
                let patch: CategoryUpdate = parse_body(request)?;
                service
                    .update_category(ctx, parse_id(id)?, patch)
                    .map(|row| (200, to_json(&row)))
            }
            (Method::Delete, [id]) => {
                let mode = match request.query_value("mode") {
                    Some(raw) => CategoryDeleteMode::parse(raw).ok_or_else(|| {
                        ApiError::invalid(
                            "invalid_mode",
                            format!("delete mode must be restrict|cascade|reparent, got `{raw}`"),
                        )
                    })?,
                    None => CategoryDeleteMode::default(),
                };
                service
                    .delete_category(ctx, parse_id(id)?, mode)
                    .map(|outcome| (200, to_json(&outcome)))
            }
            (Method::Post, [id, "move"]) => {
                let request: MoveRequest = parse_body(request)?;
                service
                    .move_category(ctx, parse_id(id)?, request.parent_id, request.target_order)
                    .map(|row| (200, to_json(&row)))
            }
            (Method::Get, [id, "ancestors"]) => service
                .ancestors(ctx, parse_id(id)?)
                .map(|rows| (200, to_json(&rows))),
            _ => return Err(ApiError::route_not_found(request.method, &request.path)),
        };
        respond(result)
    }

    fn classification_routes(
        &self,
        ctx: &RequestContext,
        request: &ApiRequest,
        segments: &[&str],
    ) -> ApiResult<ApiResponse> {
        let service = self.classification_service()?;
        let result = match (request.method, segments) {
            (Method::Get, []) => {
                let (Some(entity_type), Some(entity_id)) = (
                    request.query_value("entity_type"),
                    request.query_value("entity_id"),
                ) else {
                    return Err(ApiError::invalid(
                        "missing_entity",
                        "entity_type and entity_id query parameters are required",
                    ));
                };
                let include_inactive = query_flag(request, "include_inactive")?;
                service
                    .list_for_entity(ctx, entity_type, entity_id, include_inactive)
                    .map(|rows| (200, to_json(&rows)))
            }
            (Method::Post, []) => {
                let input: AssignRequest = parse_body(request)?;
                service.assign(ctx, input).map(|row| (201, to_json(&row)))
            }
            (Method::Post, ["bulk"]) => {
                let inputs: Vec<AssignRequest> = parse_body(request)?;
                let items: Vec<Value> = service
                    .bulk_assign(ctx, inputs)
                    .into_iter()
                    .map(|result| match result {
                        Ok(row) => to_json(&row).map(|row| json!({ "ok": true, "data": row })),
                        Err(err) => Ok(ApiError::from_classified(err).into_response().body),
                    })
                    .collect::<ApiResult<_>>()?;
                return Ok(ApiResponse::data(200, Value::Array(items)));
            }
            (Method::Post, ["expire"]) => {
                let input: ExpireRequest = parse_body_or_default(request)?;
                let now = input.now.unwrap_or_else(now_epoch_ms);
                service
                    .expire_due(ctx, now)
                    .map(|ids| (200, to_json(&json!({ "expired": ids }))))
            }
            (Method::Get, [id]) => service.get(ctx, parse_id(id)?).map(|row| (200, to_json(&row))),
            (Method::Delete, [id]) => {
                return service
                    .remove(ctx, parse_id(id)?)
                    .map(|()| ApiResponse::no_content())
                    .map_err(ApiError::from_classified);
            }
            (Method::Post, [id, "confirm"]) => service
                .confirm(ctx, parse_id(id)?)
                .map(|row| (200, to_json(&row))),
            (Method::Post, [id, "reject"]) => service
                .reject(ctx, parse_id(id)?)
                .map(|row| (200, to_json(&row))),
            _ => return Err(ApiError::route_not_found(request.method, &request.path)),
        };
        respond(result)
    }

    fn namespace_service(&self) -> ApiResult<NamespaceService<SqliteNamespaceRepository<'_>>> {
        let repo = SqliteNamespaceRepository::try_new(&self.conn).map_err(ApiError::storage)?;
        Ok(NamespaceService::new(repo)
            .with_audit(Arc::clone(&self.audit))
            .with_default_max_depth(self.config.default_max_depth))
    }

    fn category_service(
        &self,
    ) -> ApiResult<CategoryService<SqliteCategoryRepository<'_>, SqliteNamespaceRepository<'_>>> {
        Ok(CategoryService::new(
            SqliteCategoryRepository::try_new(&self.conn).map_err(ApiError::storage)?,
            SqliteNamespaceRepository::try_new(&self.conn).map_err(ApiError::storage)?,
        )
        .with_audit(Arc::clone(&self.audit)))
    }

    fn classification_service(
        &self,
    ) -> ApiResult<
        ClassificationService<
            SqliteClassificationRepository<'_>,
            SqliteCategoryRepository<'_>,
            SqliteNamespaceRepository<'_>,
        >,
    > {
        Ok(ClassificationService::new(
            SqliteClassificationRepository::try_new(&self.conn).map_err(ApiError::storage)?,
            SqliteCategoryRepository::try_new(&self.conn).map_err(ApiError::storage)?,
            SqliteNamespaceRepository::try_new(&self.conn).map_err(ApiError::storage)?,
        )
        .with_audit(Arc::clone(&self.audit)))
    }

    fn search_service(
        &self,
    ) -> ApiResult<
        SearchService<
            SqliteNamespaceRepository<'_>,
            SqliteCategoryRepository<'_>,
            SqliteClassificationRepository<'_>,
        >,
    > {
        Ok(SearchService::new(
            SqliteNamespaceRepository::try_new(&self.conn).map_err(ApiError::storage)?,
            SqliteCategoryRepository::try_new(&self.conn).map_err(ApiError::storage)?,
            SqliteClassificationRepository::try_new(&self.conn).map_err(ApiError::storage)?,
        )
        .with_limits(self.config.search_default_limit, self.config.search_max_limit))
    }
}

fn respond<E: ClassifiedError>(result: Result<(u16, ApiResult<Value>), E>) -> ApiResult<ApiResponse> {
    let (status, data) = result.map_err(ApiError::from_classified)?;
    Ok(ApiResponse::data(status, data?))
}

fn request_context(request: &ApiRequest) -> ApiResult<RequestContext> {
    let forbidden = |code, message: String| ApiError::new(ErrorKind::Forbidden, code, message);
    let tenant = request.header_value(HEADER_TENANT_ID).unwrap_or_default();
    let user = request.header_value(HEADER_USER_ID).unwrap_or_default();
    let permissions = parse_permission_list(request.header_value(HEADER_PERMISSIONS).unwrap_or_default())
        .map_err(|err| forbidden("invalid_permissions", err.to_string()))?;
    RequestContext::new(tenant, user, permissions)
        .map_err(|err| forbidden("missing_principal", err.to_string()))
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::invalid("invalid_id", format!("`{raw}` is not a valid id")))
}

fn query_flag(request: &ApiRequest, name: &str) -> ApiResult<bool> {
    match request.query_value(name) {
        None => Ok(false),
        Some("true" | "1") => Ok(true),
        Some("false" | "0") => Ok(false),
        Some(other) => Err(ApiError::invalid(
            "invalid_query_param",
            format!("`{name}` must be true or false, got `{other}`"),
        )),
    }
}

fn parse_body<T: DeserializeOwned>(request: &ApiRequest) -> ApiResult<T> {
    let Some(body) = &request.body else {
        return Err(ApiError::invalid("missing_body", "request body is required"));
    };
    serde_json::from_value(body.clone())
        .map_err(|err| ApiError::invalid("invalid_body", err.to_string()))
}

fn parse_body_or_default<T: DeserializeOwned + Default>(request: &ApiRequest) -> ApiResult<T> {
    match &request.body {
        None | Some(Value::Null) => Ok(T::default()),
        Some(_) => parse_body(request),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| ApiError::new(ErrorKind::Internal, "serialization_error", err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{parse_id, query_flag, status_for_kind, ApiRequest, Method};
    use taxonomy_core::ErrorKind;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for_kind(ErrorKind::NotFound), 404);
        assert_eq!(status_for_kind(ErrorKind::Validation), 422);
        assert_eq!(status_for_kind(ErrorKind::Conflict), 409);
        assert_eq!(status_for_kind(ErrorKind::QuotaExceeded), 429);
        assert_eq!(status_for_kind(ErrorKind::Forbidden), 403);
        assert_eq!(status_for_kind(ErrorKind::Internal), 500);
    }

    #[test]
    fn header_names_are_case_insensitive() {
        let request = ApiRequest::new(Method::Get, "/api/v1/namespaces").header("X-Tenant-Id", "t1");
        assert_eq!(request.header_value("x-tenant-id"), Some("t1"));
    }

    #[test]
    fn rejects_malformed_ids_and_flags() {
        assert_eq!(parse_id("nope").unwrap_err().status, 422);
        let request = ApiRequest::get("/api/v1/classifications").query("include_inactive", "maybe");
        assert_eq!(query_flag(&request, "include_inactive").unwrap_err().code, "invalid_query_param");
    }
}
