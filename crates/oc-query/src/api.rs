//! OrgCache query HTTP API
//!
//! Read-only endpoints for:
//! - Account lookups by id, email, status, OU subtree and tags
//! - Health, liveness and readiness checks
//! - OpenAPI document and Swagger UI

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use oc_common::DirectoryEntry;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::query::split_list;
use crate::{ErrorResponse, Query, QueryError, QueryOutcome, QueryService, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: QueryService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultKind {
    Found,
    NoResults,
}

/// Lookup response: `NO_RESULTS` always comes with an empty list
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountsResponse {
    pub result: ResultKind,
    pub entries: Vec<DirectoryEntry>,
}

impl From<QueryOutcome> for AccountsResponse {
    fn from(outcome: QueryOutcome) -> Self {
        match outcome {
            QueryOutcome::Found(entries) => Self { result: ResultKind::Found, entries },
            QueryOutcome::NoResults => Self { result: ResultKind::NoResults, entries: Vec::new() },
        }
    }
}

/// Comma-separated account ids
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IdsParams {
    pub ids: Option<String>,
}

/// Comma-separated email addresses
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmailsParams {
    pub emails: Option<String>,
}

/// Comma-separated organizational unit ids
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OusParams {
    pub ous: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TagParams {
    pub name: Option<String>,
    pub value: Option<String>,
}

/// Every tag must be present on a matching account
#[derive(Debug, Deserialize, ToSchema)]
pub struct TagsRequest {
    pub tags: BTreeMap<String, String>,
}

/// Simple health response for basic health check
#[derive(Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// Health status: UP, DEGRADED
    pub status: String,
    /// Application version
    pub version: String,
}

/// Kubernetes liveness/readiness response
#[derive(Serialize, ToSchema)]
pub struct HealthStatusResponse {
    /// Status: LIVE, READY, NOT_READY
    pub status: String,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "OrgCache Query API",
        version = "0.1.0",
        description = "Read-only lookups over the synchronized organization directory"
    ),
    paths(
        accounts_by_ids,
        accounts_by_emails,
        accounts_by_status,
        accounts_by_ous,
        accounts_by_tag,
        accounts_by_tags,
        health_handler,
        liveness_check,
        readiness_check,
    ),
    components(schemas(
        AccountsResponse,
        ResultKind,
        DirectoryEntry,
        TagsRequest,
        ErrorResponse,
        SimpleHealthResponse,
        HealthStatusResponse,
    )),
    tags(
        (name = "accounts", description = "Account lookups"),
        (name = "health", description = "Health and readiness checks")
    )
)]
pub struct ApiDoc;

pub fn create_router(service: QueryService) -> Router {
    let state = AppState { service };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/accounts", get(accounts_by_ids))
        .route("/accounts/emails", get(accounts_by_emails))
        .route("/accounts/status/:status", get(accounts_by_status))
        .route("/accounts/ous", get(accounts_by_ous))
        .route("/accounts/tag", get(accounts_by_tag))
        .route("/accounts/tags", post(accounts_by_tags))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state)
}

async fn respond(state: &AppState, query: Query) -> Result<Json<AccountsResponse>> {
    let outcome = state.service.resolve(query).await?;
    Ok(Json(outcome.into()))
}

/// Look up accounts by id
#[utoipa::path(
    get,
    path = "/accounts",
    tag = "accounts",
    params(IdsParams),
    responses(
        (status = 200, description = "Matching accounts", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_ids(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<IdsParams>,
) -> Result<Json<AccountsResponse>> {
    respond(&state, Query::ByIds(split_list(params.ids.as_deref()))).await
}

/// Look up accounts by email address
#[utoipa::path(
    get,
    path = "/accounts/emails",
    tag = "accounts",
    params(EmailsParams),
    responses(
        (status = 200, description = "Matching accounts", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_emails(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<EmailsParams>,
) -> Result<Json<AccountsResponse>> {
    respond(&state, Query::ByEmails(split_list(params.emails.as_deref()))).await
}

/// Look up accounts by status
#[utoipa::path(
    get,
    path = "/accounts/status/{status}",
    tag = "accounts",
    params(("status" = String, Path, description = "Account status, e.g. ACTIVE")),
    responses(
        (status = 200, description = "Matching accounts", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Result<Json<AccountsResponse>> {
    respond(&state, Query::ByStatus(status)).await
}

/// Look up every account within the given organizational units
#[utoipa::path(
    get,
    path = "/accounts/ous",
    tag = "accounts",
    params(OusParams),
    responses(
        (status = 200, description = "Accounts in the units' subtrees", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_ous(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<OusParams>,
) -> Result<Json<AccountsResponse>> {
    respond(&state, Query::ByOus(split_list(params.ous.as_deref()))).await
}

/// Look up accounts carrying one tag
#[utoipa::path(
    get,
    path = "/accounts/tag",
    tag = "accounts",
    params(TagParams),
    responses(
        (status = 200, description = "Matching accounts", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_tag(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<TagParams>,
) -> Result<Json<AccountsResponse>> {
    // `value=` asks for tags stored with an empty value; leaving it out is an error
    let value = params
        .value
        .ok_or_else(|| QueryError::input("tag value is required (it may be empty)"))?;
    let query = Query::ByTag {
        name: params.name.unwrap_or_default(),
        value,
    };
    respond(&state, query).await
}

/// Look up accounts carrying all of the given tags
#[utoipa::path(
    post,
    path = "/accounts/tags",
    tag = "accounts",
    request_body = TagsRequest,
    responses(
        (status = 200, description = "Matching accounts", body = AccountsResponse),
        (status = 400, description = "Invalid query", body = ErrorResponse)
    )
)]
async fn accounts_by_tags(
    State(state): State<AppState>,
    Json(request): Json<TagsRequest>,
) -> Result<Json<AccountsResponse>> {
    respond(&state, Query::ByTags(request.tags)).await
}

/// Basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status", body = SimpleHealthResponse)
    )
)]
async fn health_handler(State(state): State<AppState>) -> Json<SimpleHealthResponse> {
    let status = if state.service.is_ready().await { "UP" } else { "DEGRADED" };
    Json(SimpleHealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Kubernetes liveness check
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is live", body = HealthStatusResponse)
    )
)]
async fn liveness_check() -> Json<HealthStatusResponse> {
    Json(HealthStatusResponse { status: "LIVE".to_string() })
}

/// Kubernetes readiness check - returns 200 if the cache store can serve reads
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready", body = HealthStatusResponse),
        (status = 503, description = "Application is not ready", body = HealthStatusResponse)
    )
)]
async fn readiness_check(State(state): State<AppState>) -> Response {
    if state.service.is_ready().await {
        (StatusCode::OK, Json(HealthStatusResponse { status: "READY".to_string() })).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthStatusResponse { status: "NOT_READY".to_string() }))
            .into_response()
    }
}
