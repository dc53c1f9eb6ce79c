//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API, plus the
//! [`ApiError`] type handlers use to short-circuit with a status code
//! and the pagination envelope list endpoints share.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use glimpse_core::{
    Alert, AlertId, AlertState, Application, ApplicationId, Dashboard, DashboardId, GlimpseError,
    GroupId, QueryId, UserId, primitives::SECRET_TOKEN_MASK_LEN,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// ERROR RESPONSE
// =============================================================================

/// JSON error/status body: `{"message": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A handler failure carrying the status code and client message.
///
/// Store and validation errors convert via `?`; anything that is not a
/// not-found or bad-input case is logged and reported as an opaque 500.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not found")
    }

    #[must_use]
    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "You don't have permission to perform this action.",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(MessageResponse::new(self.message))).into_response()
    }
}

impl From<GlimpseError> for ApiError {
    fn from(err: GlimpseError) -> Self {
        match err {
            GlimpseError::NotFound(message) => Self::new(StatusCode::NOT_FOUND, message),
            GlimpseError::InvalidInput(message) => Self::new(StatusCode::BAD_REQUEST, message),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

/// 400 unless the request body carried the field.
pub fn require_field<T>(value: Option<T>, name: &str) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::bad_request(format!("Missing required field: {name}.")))
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Query-string parameters shared by list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub q: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    pub order: Option<String>,
}

/// Standard list envelope: total count plus one page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub page: u64,
    pub page_size: u64,
    pub results: Vec<T>,
}

/// Slice `items` into the requested page.
///
/// Page numbers are 1-based. Asking past the end of a non-empty list is
/// an error rather than an empty page.
pub fn paginate<T>(items: Vec<T>, page: u64, page_size: u64) -> Result<Paginated<T>, ApiError> {
    if page < 1 {
        return Err(ApiError::bad_request("Page must be positive integer."));
    }
    if !(1..=250).contains(&page_size) {
        return Err(ApiError::bad_request(
            "Page size should be between 1 and 250.",
        ));
    }

    let count = items.len() as u64;
    let start = (page - 1).saturating_mul(page_size);
    if count > 0 && start >= count {
        return Err(ApiError::bad_request("Page is out of range."));
    }

    let results = items
        .into_iter()
        .skip(start as usize)
        .take(page_size as usize)
        .collect();
    Ok(Paginated {
        count,
        page,
        page_size,
        results,
    })
}

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// APPLICATION REQUEST/RESPONSE
// =============================================================================

/// Application create request. Only `name` is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApplicationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub active: Option<bool>,
}

/// Application update request; absent fields stay unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateApplicationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub active: Option<bool>,
}

/// Application response.
///
/// `secret_key` is the public embed identifier and is always included;
/// `secret_token` is the signing secret and is masked everywhere except
/// the create and regenerate responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationResponse {
    pub id: ApplicationId,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub active: bool,
    pub secret_key: String,
    pub secret_token: String,
    pub created_by: Option<UserId>,
    pub created_at: i64,
}

impl ApplicationResponse {
    pub fn masked(app: &Application) -> Self {
        Self::build(app, "*".repeat(SECRET_TOKEN_MASK_LEN))
    }

    pub fn revealed(app: &Application) -> Self {
        Self::build(app, app.secret_token.clone())
    }

    fn build(app: &Application, secret_token: String) -> Self {
        Self {
            id: app.id,
            name: app.name.clone(),
            description: app.description.clone(),
            icon_url: app.icon_url.clone(),
            active: app.active,
            secret_key: app.secret_key.clone(),
            secret_token,
            created_by: app.created_by,
            created_at: app.created_at,
        }
    }
}

/// Body of `POST /api/applications/{id}/dashboards`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDashboardRequest {
    pub dashboard_id: Option<DashboardId>,
}

/// Body of `POST /api/dashboards/{id}/applications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkApplicationRequest {
    pub application_id: Option<ApplicationId>,
}

// =============================================================================
// DASHBOARD RESPONSE
// =============================================================================

/// Dashboard response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub id: DashboardId,
    pub name: String,
    pub user_id: UserId,
    pub is_archived: bool,
    pub is_draft: bool,
    pub created_at: i64,
}

impl DashboardResponse {
    pub fn from_dashboard(dashboard: &Dashboard) -> Self {
        Self {
            id: dashboard.id,
            name: dashboard.name.clone(),
            user_id: dashboard.user_id,
            is_archived: dashboard.is_archived,
            is_draft: dashboard.is_draft,
            created_at: dashboard.created_at,
        }
    }
}

/// Response of `GET /embed/dashboard/{id}`: the dashboard plus a
/// short-lived access token for follow-up result requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedDashboardResponse {
    pub dashboard: DashboardResponse,
    pub access_token: String,
}

// =============================================================================
// ALERT REQUEST/RESPONSE
// =============================================================================

/// Alert create request. `name`, `query_id` and `options` are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    pub name: Option<String>,
    pub query_id: Option<QueryId>,
    pub options: Option<Value>,
    pub rearm: Option<i64>,
}

/// Alert update request; absent fields stay unchanged. Retargeting
/// `query_id` re-checks access against the new query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAlertRequest {
    pub name: Option<String>,
    pub query_id: Option<QueryId>,
    pub options: Option<Value>,
    pub rearm: Option<i64>,
}

/// Alert response. `options` is the stored condition JSON, re-inflated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertResponse {
    pub id: AlertId,
    pub name: String,
    pub query_id: QueryId,
    pub user_id: UserId,
    pub state: AlertState,
    pub muted: bool,
    pub rearm: Option<i64>,
    pub options: Value,
    pub created_at: i64,
}

impl AlertResponse {
    pub fn from_alert(alert: &Alert) -> Self {
        Self {
            id: alert.id,
            name: alert.name.clone(),
            query_id: alert.query_id,
            user_id: alert.user_id,
            state: alert.state,
            muted: alert.muted,
            rearm: alert.rearm,
            options: serde_json::from_str(&alert.options_json).unwrap_or(Value::Null),
            created_at: alert.created_at,
        }
    }
}

// =============================================================================
// QUERY RESULT RESPONSE
// =============================================================================

/// Metadata stub returned for an authorized result request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResultResponse {
    pub query_id: QueryId,
    pub name: String,
    pub retrieved_at: i64,
}

// =============================================================================
// SESSION / LOGIN RESPONSES
// =============================================================================

/// Who the current request is authenticated as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: Option<UserId>,
    pub name: String,
    pub groups: Vec<GroupId>,
    pub is_api_principal: bool,
    pub org_slug: String,
}

/// Login page payload; `next` is the sanitized post-login destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginPageResponse {
    pub next: String,
}
