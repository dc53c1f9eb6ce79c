//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Handlers trust the authentication middleware: the resolved
//! [`Organization`] is always in request extensions, the principal (when
//! there is one) arrives through [`CurrentPrincipal`]. What remains here
//! is authorization (admin, owner, group access) and the operation
//! itself.

use super::{
    AppState,
    auth::{
        CurrentPrincipal, append_session_cookie, clear_session_cookie, require_admin,
        require_admin_or_owner,
    },
    types::{
        AlertResponse, ApiError, ApplicationResponse, CreateAlertRequest,
        CreateApplicationRequest, DashboardResponse, EmbedDashboardResponse, HealthResponse,
        LinkApplicationRequest, LinkDashboardRequest, ListParams, LoginPageResponse, Paginated,
        QueryResultResponse, SessionResponse, UpdateAlertRequest, UpdateApplicationRequest,
        paginate, require_field,
    },
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use glimpse_core::{
    Alert, AlertId, AlertState, Application, ApplicationId, Dashboard, DashboardId, Organization,
    Principal, Query as StoredQuery, QueryId, Strategy, Subject, generate_token,
    primitives::{APPLICATION_SECRET_KEY_BYTES, APPLICATION_SECRET_TOKEN_BYTES, MAX_NAME_LENGTH},
    safe_next_path,
};
use serde::Deserialize;

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Allowed `order` values on list endpoints.
const ALLOWED_ORDERS: &[&str] = &["name", "-name", "created_at", "-created_at"];

/// Apply a list ordering: the explicit `order` if recognized, newest
/// first otherwise. Search results keep their match order unless an
/// order was asked for.
fn apply_order<T>(
    items: &mut [T],
    order: Option<&str>,
    searching: bool,
    name_key: impl Fn(&T) -> String,
    created_key: impl Fn(&T) -> (i64, u64),
) {
    let requested = order.filter(|o| ALLOWED_ORDERS.contains(o));
    let effective = match requested {
        Some(order) => order,
        None if searching => return,
        None => "-created_at",
    };
    match effective {
        "name" => items.sort_by(|a, b| name_key(a).cmp(&name_key(b))),
        "-name" => items.sort_by(|a, b| name_key(b).cmp(&name_key(a))),
        "created_at" => items.sort_by(|a, b| created_key(a).cmp(&created_key(b))),
        _ => items.sort_by(|a, b| created_key(b).cmp(&created_key(a))),
    }
}

/// Trimmed, length-checked entity name.
fn normalized_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name must not be empty."));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Name must be at most {MAX_NAME_LENGTH} characters."
        )));
    }
    Ok(name.to_string())
}

/// Audit trail entry; actions on named objects are always recorded.
fn record_event(action: &str, object_type: &str, object_id: u64) {
    tracing::info!(event = "audit", action, object_type, object_id);
}

fn fetch_application(
    state: &AppState,
    org: &Organization,
    id: u64,
) -> Result<Application, ApiError> {
    let app = state.directory.application(org.id, ApplicationId(id))?;
    app.ok_or_else(ApiError::not_found)
}

fn fetch_dashboard(state: &AppState, org: &Organization, id: u64) -> Result<Dashboard, ApiError> {
    let dashboard = state.directory.dashboard(org.id, DashboardId(id))?;
    dashboard.ok_or_else(ApiError::not_found)
}

fn fetch_alert(state: &AppState, org: &Organization, id: u64) -> Result<Alert, ApiError> {
    let alert = state.directory.alert(org.id, AlertId(id))?;
    alert.ok_or_else(ApiError::not_found)
}

fn fetch_query(state: &AppState, org: &Organization, id: QueryId) -> Result<StoredQuery, ApiError> {
    let query = state.directory.query(org.id, id)?;
    query.ok_or_else(ApiError::not_found)
}

/// Whether the principal may read this query's results: admins, the
/// owner, embed access tokens, and anyone sharing one of the query's
/// groups. Query-scoped API keys carry the query's groups and pass the
/// same test.
fn can_view_query(org: &Organization, principal: &Principal, query: &StoredQuery) -> bool {
    if principal.in_group(org.admin_group_id) {
        return true;
    }
    if principal.user_id() == Some(query.user_id) {
        return true;
    }
    if matches!(principal.subject, Subject::AccessToken(_)) {
        return true;
    }
    principal
        .group_ids
        .intersection(&query.group_ids)
        .next()
        .is_some()
}

/// Alert visibility follows the underlying query's access rules.
fn can_view_alert(
    state: &AppState,
    org: &Organization,
    principal: &Principal,
    alert: &Alert,
) -> Result<bool, ApiError> {
    if principal.in_group(org.admin_group_id) || principal.user_id() == Some(alert.user_id) {
        return Ok(true);
    }
    let query = state.directory.query(org.id, alert.query_id)?;
    Ok(query.is_some_and(|q| can_view_query(org, principal, &q)))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// EMBED HANDLERS
// =============================================================================

/// Serve an embedded dashboard.
///
/// Only application principals get here with a result: the signature
/// check already ran in the chain, so what is left is the link check
/// and minting a short-lived access token for the widget's follow-up
/// result requests.
pub async fn embed_dashboard_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(dashboard_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let Subject::Application(app_id) = principal.subject else {
        return Err(ApiError::forbidden());
    };

    let dashboard = fetch_dashboard(&state, &org, dashboard_id)?;
    if !state
        .directory
        .is_dashboard_linked(org.id, app_id, dashboard.id)?
    {
        return Err(ApiError::forbidden());
    }

    let access_token = state.tokens.issue(org.settings.embed_window_secs)?;
    record_event("view", "dashboard", dashboard.id.0);

    Ok(Json(EmbedDashboardResponse {
        dashboard: DashboardResponse::from_dashboard(&dashboard),
        access_token,
    }))
}

/// Serve a share-link dashboard. Reached through both the browser path
/// (`/public/dashboards/{token}`) and the API path; the difference is
/// only in how anonymous requests are rejected.
pub async fn public_dashboard_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .directory
        .api_key_record(org.id, &token)?
        .ok_or_else(ApiError::not_found)?;
    if record.object_type != "dashboard" {
        return Err(ApiError::not_found());
    }

    let dashboard = fetch_dashboard(&state, &org, record.object_id)?;
    record_event("view", "dashboard", dashboard.id.0);
    Ok(Json(DashboardResponse::from_dashboard(&dashboard)))
}

// =============================================================================
// APPLICATION HANDLERS
// =============================================================================

/// List applications, with search, ordering and pagination. Secret
/// tokens are masked.
pub async fn list_applications_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let term = params.q.as_deref().unwrap_or("").trim().to_lowercase();
    let searching = !term.is_empty();

    let mut apps = state.directory.applications(org.id)?;
    if searching {
        apps.retain(|a| {
            a.name.to_lowercase().contains(&term)
                || a.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&term))
        });
        tracing::info!(event = "audit", action = "search", object_type = "application", term = %term);
    } else {
        tracing::info!(event = "audit", action = "list", object_type = "application");
    }

    apply_order(
        &mut apps,
        params.order.as_deref(),
        searching,
        |a| a.name.to_lowercase(),
        |a| (a.created_at, a.id.0),
    );

    let page = paginate(
        apps,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(25),
    )?;
    let results = page.results.iter().map(ApplicationResponse::masked).collect();
    Ok(Json(Paginated {
        count: page.count,
        page: page.page,
        page_size: page.page_size,
        results,
    }))
}

/// Register an embedding application. The response is the one place the
/// generated secret token appears in the clear.
pub async fn create_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&org, &principal)?;

    let name = normalized_name(&require_field(req.name, "name")?)?;
    if state.directory.application_by_name(org.id, &name)?.is_some() {
        return Err(ApiError::bad_request("Name already taken"));
    }

    let app = state.directory.insert_application(Application {
        id: ApplicationId(0),
        org_id: org.id,
        name,
        description: req.description.filter(|d| !d.is_empty()),
        icon_url: req.icon_url.filter(|u| !u.is_empty()),
        secret_key: generate_token(APPLICATION_SECRET_KEY_BYTES),
        secret_token: generate_token(APPLICATION_SECRET_TOKEN_BYTES),
        active: req.active.unwrap_or(true),
        created_by: principal.user_id(),
        created_at: state.clock.now_unix(),
    })?;

    record_event("create", "application", app.id.0);
    Ok(Json(ApplicationResponse::revealed(&app)))
}

/// Fetch a single application, token masked.
pub async fn get_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let app = fetch_application(&state, &org, application_id)?;
    record_event("view", "application", app.id.0);
    Ok(Json(ApplicationResponse::masked(&app)))
}

/// Update name, description, icon or active flag.
pub async fn update_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
    Json(req): Json<UpdateApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&org, &principal)?;
    let mut app = fetch_application(&state, &org, application_id)?;

    if let Some(raw) = req.name {
        let name = normalized_name(&raw)?;
        let taken = state
            .directory
            .application_by_name(org.id, &name)?
            .is_some_and(|other| other.id != app.id);
        if taken {
            return Err(ApiError::bad_request("Name already taken"));
        }
        app.name = name;
    }
    if let Some(description) = req.description {
        app.description = Some(description).filter(|d| !d.is_empty());
    }
    if let Some(icon_url) = req.icon_url {
        app.icon_url = Some(icon_url).filter(|u| !u.is_empty());
    }
    if let Some(active) = req.active {
        app.active = active;
    }

    state.directory.update_application(app.clone())?;
    record_event("edit", "application", app.id.0);
    Ok(Json(ApplicationResponse::masked(&app)))
}

/// Delete an application and all of its dashboard links.
pub async fn delete_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    require_admin(&org, &principal)?;
    if !state
        .directory
        .delete_application(org.id, ApplicationId(application_id))?
    {
        return Err(ApiError::not_found());
    }
    record_event("delete", "application", application_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Rotate the signing secret. Outstanding embed URLs signed with the
/// old token stop verifying immediately.
pub async fn regenerate_secret_token_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&org, &principal)?;
    let mut app = fetch_application(&state, &org, application_id)?;

    app.secret_token = generate_token(APPLICATION_SECRET_TOKEN_BYTES);
    state.directory.update_application(app.clone())?;

    record_event("regenerate_secret_token", "application", app.id.0);
    Ok(Json(ApplicationResponse::revealed(&app)))
}

// =============================================================================
// APPLICATION <-> DASHBOARD LINKS
// =============================================================================

/// Dashboards linked to an application.
pub async fn application_dashboards_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&org, &principal)?;
    let app = fetch_application(&state, &org, application_id)?;

    let dashboards = state.directory.application_dashboards(org.id, app.id)?;
    let results: Vec<_> = dashboards.iter().map(DashboardResponse::from_dashboard).collect();
    Ok(Json(results))
}

/// Link a dashboard to an application.
pub async fn link_dashboard_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(application_id): Path<u64>,
    Json(req): Json<LinkDashboardRequest>,
) -> Result<StatusCode, ApiError> {
    require_admin(&org, &principal)?;
    let dashboard_id = require_field(req.dashboard_id, "dashboard_id")?;
    let app = fetch_application(&state, &org, application_id)?;

    state.directory.link_dashboard(org.id, app.id, dashboard_id)?;
    tracing::info!(
        event = "audit",
        action = "add_dashboard_to_application",
        object_type = "application",
        object_id = app.id.0,
        member_id = dashboard_id.0,
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Remove a dashboard from an application. Unlinking a dashboard that
/// was never linked is a no-op.
pub async fn unlink_dashboard_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path((application_id, dashboard_id)): Path<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    require_admin(&org, &principal)?;
    let _removed = state.directory.unlink_dashboard(
        org.id,
        ApplicationId(application_id),
        DashboardId(dashboard_id),
    )?;
    tracing::info!(
        event = "audit",
        action = "delete_dashboard_from_application",
        object_type = "application",
        object_id = application_id,
        member_id = dashboard_id,
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Applications embedding a dashboard.
pub async fn dashboard_applications_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(_principal): CurrentPrincipal,
    Path(dashboard_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let dashboard = fetch_dashboard(&state, &org, dashboard_id)?;
    let apps = state
        .directory
        .dashboard_applications(org.id, dashboard.id)?;
    let results: Vec<_> = apps.iter().map(ApplicationResponse::masked).collect();
    Ok(Json(results))
}

/// Link an application, addressed from the dashboard side. Dashboard
/// owners may manage their own dashboards' links.
pub async fn link_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(dashboard_id): Path<u64>,
    Json(req): Json<LinkApplicationRequest>,
) -> Result<StatusCode, ApiError> {
    let application_id = require_field(req.application_id, "application_id")?;
    let dashboard = fetch_dashboard(&state, &org, dashboard_id)?;
    require_admin_or_owner(&org, &principal, dashboard.user_id)?;

    state
        .directory
        .link_dashboard(org.id, application_id, dashboard.id)?;
    tracing::info!(
        event = "audit",
        action = "add_dashboard_to_application",
        object_type = "dashboard",
        object_id = dashboard.id.0,
        member_id = application_id.0,
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Unlink an application, addressed from the dashboard side.
pub async fn unlink_application_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path((dashboard_id, application_id)): Path<(u64, u64)>,
) -> Result<StatusCode, ApiError> {
    let dashboard = fetch_dashboard(&state, &org, dashboard_id)?;
    require_admin_or_owner(&org, &principal, dashboard.user_id)?;

    let _removed = state.directory.unlink_dashboard(
        org.id,
        ApplicationId(application_id),
        dashboard.id,
    )?;
    tracing::info!(
        event = "audit",
        action = "delete_dashboard_from_application",
        object_type = "dashboard",
        object_id = dashboard_id,
        member_id = application_id,
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Dashboards that can be offered for embedding: not archived, not
/// drafts.
pub async fn embeddable_dashboards_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&org, &principal)?;

    let term = params.q.as_deref().unwrap_or("").trim().to_lowercase();
    let searching = !term.is_empty();

    let mut dashboards = state.directory.dashboards(org.id)?;
    dashboards.retain(|d| !d.is_archived && !d.is_draft);
    if searching {
        dashboards.retain(|d| d.name.to_lowercase().contains(&term));
    }

    apply_order(
        &mut dashboards,
        params.order.as_deref(),
        searching,
        |d| d.name.to_lowercase(),
        |d| (d.created_at, d.id.0),
    );

    let page = paginate(
        dashboards,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(25),
    )?;
    let results = page
        .results
        .iter()
        .map(DashboardResponse::from_dashboard)
        .collect();
    Ok(Json(Paginated {
        count: page.count,
        page: page.page,
        page_size: page.page_size,
        results,
    }))
}

// =============================================================================
// ALERT HANDLERS
// =============================================================================

/// List the alerts the principal can see: admins see everything,
/// everyone else their own plus those on queries they share a group
/// with.
pub async fn list_alerts_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let term = params.q.as_deref().unwrap_or("").trim().to_lowercase();
    let searching = !term.is_empty();

    let mut visible = Vec::new();
    for alert in state.directory.alerts(org.id)? {
        if searching && !alert.name.to_lowercase().contains(&term) {
            continue;
        }
        if can_view_alert(&state, &org, &principal, &alert)? {
            visible.push(alert);
        }
    }

    apply_order(
        &mut visible,
        params.order.as_deref(),
        searching,
        |a| a.name.to_lowercase(),
        |a| (a.created_at, a.id.0),
    );

    let page = paginate(
        visible,
        params.page.unwrap_or(1),
        params.page_size.unwrap_or(25),
    )?;
    let results = page.results.iter().map(AlertResponse::from_alert).collect();
    Ok(Json(Paginated {
        count: page.count,
        page: page.page,
        page_size: page.page_size,
        results,
    }))
}

/// Create an alert on a query the principal can read.
pub async fn create_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(req): Json<CreateAlertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = normalized_name(&require_field(req.name, "name")?)?;
    let query_id = require_field(req.query_id, "query_id")?;
    let options = require_field(req.options, "options")?;
    let user_id = principal.user_id().ok_or_else(ApiError::forbidden)?;

    let query = fetch_query(&state, &org, query_id)?;
    if !can_view_query(&org, &principal, &query) {
        return Err(ApiError::forbidden());
    }

    let options_json = serde_json::to_string(&options)
        .map_err(|e| ApiError::bad_request(format!("Invalid options: {e}")))?;

    let alert = state.directory.insert_alert(Alert {
        id: AlertId(0),
        org_id: org.id,
        name,
        query_id: query.id,
        user_id,
        state: AlertState::Unknown,
        muted: false,
        rearm: req.rearm,
        options_json,
        created_at: state.clock.now_unix(),
    })?;

    record_event("create", "alert", alert.id.0);
    Ok(Json(AlertResponse::from_alert(&alert)))
}

/// Fetch one alert.
pub async fn get_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(alert_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let alert = fetch_alert(&state, &org, alert_id)?;
    if !can_view_alert(&state, &org, &principal, &alert)? {
        return Err(ApiError::forbidden());
    }
    record_event("view", "alert", alert.id.0);
    Ok(Json(AlertResponse::from_alert(&alert)))
}

/// Update an alert (admin or owner).
pub async fn update_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(alert_id): Path<u64>,
    Json(req): Json<UpdateAlertRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut alert = fetch_alert(&state, &org, alert_id)?;
    require_admin_or_owner(&org, &principal, alert.user_id)?;

    if let Some(raw) = req.name {
        alert.name = normalized_name(&raw)?;
    }
    if let Some(query_id) = req.query_id {
        let query = fetch_query(&state, &org, query_id)?;
        if !can_view_query(&org, &principal, &query) {
            return Err(ApiError::forbidden());
        }
        alert.query_id = query.id;
    }
    if let Some(options) = req.options {
        alert.options_json = serde_json::to_string(&options)
            .map_err(|e| ApiError::bad_request(format!("Invalid options: {e}")))?;
    }
    if let Some(rearm) = req.rearm {
        alert.rearm = Some(rearm);
    }

    state.directory.update_alert(alert.clone())?;
    record_event("edit", "alert", alert.id.0);
    Ok(Json(AlertResponse::from_alert(&alert)))
}

/// Delete an alert (admin or owner).
pub async fn delete_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(alert_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let alert = fetch_alert(&state, &org, alert_id)?;
    require_admin_or_owner(&org, &principal, alert.user_id)?;

    if !state.directory.delete_alert(org.id, alert.id)? {
        return Err(ApiError::not_found());
    }
    record_event("delete", "alert", alert.id.0);
    Ok(StatusCode::NO_CONTENT)
}

/// Silence notifications without touching the trigger condition.
pub async fn mute_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(alert_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    set_alert_muted(&state, &org, &principal, alert_id, true)
}

/// Resume notifications.
pub async fn unmute_alert_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(alert_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    set_alert_muted(&state, &org, &principal, alert_id, false)
}

fn set_alert_muted(
    state: &AppState,
    org: &Organization,
    principal: &Principal,
    alert_id: u64,
    muted: bool,
) -> Result<StatusCode, ApiError> {
    let mut alert = fetch_alert(state, org, alert_id)?;
    require_admin_or_owner(org, principal, alert.user_id)?;

    alert.muted = muted;
    state.directory.update_alert(alert.clone())?;
    record_event(if muted { "mute" } else { "unmute" }, "alert", alert.id.0);
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// QUERY RESULT HANDLER
// =============================================================================

/// Authorize a result fetch and answer with the query's metadata.
///
/// This is the endpoint the signed-URL, query-API-key and access-token
/// strategies exist for; execution itself lives in the query runner
/// service, not here.
pub async fn query_results_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(query_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let query = fetch_query(&state, &org, QueryId(query_id))?;
    if !can_view_query(&org, &principal, &query) {
        return Err(ApiError::forbidden());
    }

    record_event("view", "query_result", query.id.0);
    Ok(Json(QueryResultResponse {
        query_id: query.id,
        name: query.name.clone(),
        retrieved_at: state.clock.now_unix(),
    }))
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct LoginQuery {
    next: Option<String>,
}

/// Who the request is authenticated as.
pub async fn session_handler(
    Extension(org): Extension<Organization>,
    CurrentPrincipal(principal): CurrentPrincipal,
) -> impl IntoResponse {
    Json(SessionResponse {
        user_id: principal.user_id(),
        name: principal.name.clone(),
        groups: principal.group_ids.iter().copied().collect(),
        is_api_principal: principal.is_api_principal,
        org_slug: org.slug.clone(),
    })
}

/// Login page stub: echoes the sanitized `next` destination the client
/// should continue to after authenticating.
pub async fn login_page_handler(Query(params): Query<LoginQuery>) -> impl IntoResponse {
    Json(LoginPageResponse {
        next: safe_next_path(params.next.as_deref().unwrap_or("/")),
    })
}

/// Establish a session for an already-authenticated user principal.
///
/// Password logins are out of scope; this endpoint turns a header-based
/// authentication (JWT) or an existing session into a fresh cookie.
pub async fn login_handler(
    State(state): State<AppState>,
    Extension(org): Extension<Organization>,
    principal: Option<Extension<Principal>>,
    strategy: Option<Extension<Strategy>>,
    Query(params): Query<LoginQuery>,
) -> Result<Response, ApiError> {
    let user_id = principal
        .as_ref()
        .and_then(|ext| ext.0.user_id())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authentication required."))?;

    let user = state
        .directory
        .user(org.id, user_id)?
        .ok_or_else(ApiError::not_found)?;

    let next = safe_next_path(params.next.as_deref().unwrap_or("/"));
    let mut response = Json(LoginPageResponse { next }).into_response();

    // The middleware already set the cookie for JWT-strategy requests.
    let jwt_login = matches!(strategy, Some(Extension(Strategy::Jwt)));
    if !jwt_login {
        if let Some(cookie) = state.sessions.issue(&user) {
            append_session_cookie(response.headers_mut(), &cookie);
        }
    }
    record_event("login", "user", user.id.0);
    Ok(response)
}

/// Drop the session and bounce to the login page.
pub async fn logout_handler() -> impl IntoResponse {
    let mut response = (
        StatusCode::FOUND,
        [(header::LOCATION, HeaderValue::from_static("/login"))],
    )
        .into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, clear_session_cookie());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(values: &[(&str, i64, u64)]) -> Vec<(String, i64, u64)> {
        values
            .iter()
            .map(|(n, c, i)| ((*n).to_string(), *c, *i))
            .collect()
    }

    #[test]
    fn default_order_is_newest_first() {
        let mut items = named(&[("a", 10, 1), ("b", 30, 2), ("c", 20, 3)]);
        apply_order(&mut items, None, false, |i| i.0.clone(), |i| (i.1, i.2));
        let names: Vec<_> = items.iter().map(|i| i.0.as_str()).collect();
        assert_eq!(names, ["b", "c", "a"]);
    }

    #[test]
    fn search_results_keep_match_order_without_explicit_order() {
        let mut items = named(&[("a", 10, 1), ("b", 30, 2)]);
        apply_order(&mut items, None, true, |i| i.0.clone(), |i| (i.1, i.2));
        let names: Vec<_> = items.iter().map(|i| i.0.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn explicit_name_order_is_case_insensitive() {
        let mut items = named(&[("Zeta", 1, 1), ("alpha", 2, 2), ("Beta", 3, 3)]);
        apply_order(
            &mut items,
            Some("name"),
            true,
            |i| i.0.to_lowercase(),
            |i| (i.1, i.2),
        );
        let names: Vec<_> = items.iter().map(|i| i.0.as_str()).collect();
        assert_eq!(names, ["alpha", "Beta", "Zeta"]);
    }

    #[test]
    fn unknown_order_falls_back_to_default() {
        let mut items = named(&[("a", 10, 1), ("b", 30, 2)]);
        apply_order(
            &mut items,
            Some("made_up"),
            false,
            |i| i.0.clone(),
            |i| (i.1, i.2),
        );
        let names: Vec<_> = items.iter().map(|i| i.0.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn name_normalization_trims_and_bounds() {
        assert_eq!(normalized_name("  Acme  ").ok().as_deref(), Some("Acme"));
        assert!(normalized_name("   ").is_err());
        assert!(normalized_name(&"x".repeat(MAX_NAME_LENGTH + 1)).is_err());
        assert!(normalized_name(&"x".repeat(MAX_NAME_LENGTH)).is_ok());
    }
}
