//! # Authentication Module
//!
//! Bridges incoming HTTP requests to the core strategy chain: builds a
//! [`RequestContext`] from the raw request, runs the resolver, and turns
//! the outcome into request extensions (success), a 401 (hard failure),
//! or a session-cookie fallback (absent).
//!
//! Handlers declare their requirement with the [`CurrentPrincipal`]
//! extractor: anonymous requests get a 404-shaped JSON body on API/XHR
//! paths and a redirect to `/login` everywhere else.

use super::types::{ApiError, MessageResponse};
use super::{AppState, DEFAULT_ORG_ID};
use axum::{
    Json,
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use glimpse_core::{
    JwtKey, Organization, Principal, RequestContext, ResolutionOutcome, SESSION_COOKIE,
    SessionManager, Strategy, keys_from_jwks, safe_next_path,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Body of the JSON 404 served to unauthenticated API/XHR callers.
pub const LOGIN_REQUIRED_MESSAGE: &str = "Couldn't find resource. Please login and try again.";

// =============================================================================
// JWT KEY CACHE
// =============================================================================

/// Per-organization JWT verification keys.
///
/// The core resolver is synchronous and takes keys as a slice; this
/// cache does the async part, fetching the organization's JWKS endpoint
/// once and remembering the parsed keys. Fetch failures resolve to no
/// keys and are retried on the next request.
pub struct JwtKeyCache {
    cached: tokio::sync::RwLock<BTreeMap<u64, Arc<Vec<JwtKey>>>>,
    http: reqwest::Client,
}

impl Default for JwtKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwtKeyCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cached: tokio::sync::RwLock::new(BTreeMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Verification keys for `org`, fetching its JWKS endpoint on first
    /// use.
    pub async fn keys_for(&self, org: &Organization) -> Arc<Vec<JwtKey>> {
        let cached = self.cached.read().await.get(&org.id.0).cloned();
        if let Some(keys) = cached {
            return keys;
        }

        match self.fetch(&org.settings.jwt_auth_public_certs_url).await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                self.cached.write().await.insert(org.id.0, keys.clone());
                keys
            }
            Err(reason) => {
                tracing::warn!(
                    url = %org.settings.jwt_auth_public_certs_url,
                    error = %reason,
                    "JWKS fetch failed"
                );
                Arc::new(Vec::new())
            }
        }
    }

    /// Preload keys for an organization, bypassing the fetch. Used by
    /// tests and by deployments with statically configured keys.
    pub async fn install(&self, org_id: glimpse_core::OrgId, keys: Vec<JwtKey>) {
        self.cached.write().await.insert(org_id.0, Arc::new(keys));
    }

    async fn fetch(&self, url: &str) -> Result<Vec<JwtKey>, String> {
        if url.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let body = response
            .error_for_status()
            .map_err(|e| e.to_string())?
            .text()
            .await
            .map_err(|e| e.to_string())?;
        keys_from_jwks(&body).map_err(|e| e.to_string())
    }
}

// =============================================================================
// REQUEST AUTHENTICATION MIDDLEWARE
// =============================================================================

/// Run the strategy chain for every matched route except `/health`.
///
/// - `Found` puts the [`Organization`] and [`Principal`] into request
///   extensions; a JWT-strategy match additionally mints a session
///   cookie on the response.
/// - `Failed` short-circuits with 401 and the failure's exact message.
/// - `Absent` falls back to the session cookie, then anonymous.
pub async fn request_auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let org = match state.directory.organization(DEFAULT_ORG_ID) {
        Ok(Some(org)) => org,
        Ok(None) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Directory is not initialized",
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "organization lookup failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let context = request_context(&request);

    let jwt_keys = if org.settings.jwt_login_enabled {
        state.jwt_keys.keys_for(&org).await
    } else {
        Arc::new(Vec::new())
    };

    let outcome = match state.authenticator.resolve(&org, &context, &jwt_keys) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "authentication resolution failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    match outcome {
        ResolutionOutcome::Failed { strategy, failure } => {
            // Reasons only; raw secrets, signatures, and tokens never
            // reach the log stream.
            tracing::warn!(
                event = "auth_failure",
                strategy = strategy.as_str(),
                reason = %failure,
                "request rejected"
            );
            error_response(StatusCode::UNAUTHORIZED, &failure.to_string())
        }
        ResolutionOutcome::Found {
            strategy,
            principal,
        } => {
            tracing::debug!(
                event = "auth_success",
                strategy = strategy.as_str(),
                principal = %principal.name,
                "request authenticated"
            );

            // A verified JWT login becomes a remembered session.
            let session_user = if strategy == Strategy::Jwt {
                principal
                    .user_id()
                    .and_then(|id| state.directory.user(org.id, id).ok().flatten())
            } else {
                None
            };

            request.extensions_mut().insert(org);
            request.extensions_mut().insert(principal);
            request.extensions_mut().insert(strategy);
            let mut response = next.run(request).await;

            if let Some(user) = session_user {
                if let Some(cookie) = state.sessions.issue(&user) {
                    append_session_cookie(response.headers_mut(), &cookie);
                }
            }
            response
        }
        ResolutionOutcome::Absent => {
            let principal = session_principal(&state, &org, &context);
            request.extensions_mut().insert(org);
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
    }
}

/// Resolve the session cookie into a principal.
///
/// Claims alone are not enough: the user must still exist, still be
/// enabled, and still carry the identity tag the cookie was minted
/// with (email or API key rotation kills outstanding sessions).
fn session_principal(
    state: &AppState,
    org: &Organization,
    context: &RequestContext,
) -> Option<Principal> {
    let cookie = context.cookie(SESSION_COOKIE)?;
    let claims = state.sessions.verify(cookie)?;
    if claims.org_id != org.id {
        return None;
    }
    let user = state
        .directory
        .user(claims.org_id, claims.user_id)
        .ok()
        .flatten()?;
    if user.is_disabled || SessionManager::identity_tag(&user) != claims.identity {
        return None;
    }
    Some(Principal::user(org.id, user.id, &user.name, user.group_ids))
}

/// Project the axum request into the resolver's view.
fn request_context(request: &Request<Body>) -> RequestContext {
    let uri = request.uri();
    let path = uri.path().to_string();

    let query: Vec<(String, String)> = uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    // Embed signatures cover the full URL as the client built it, so
    // reconstruct scheme and authority the way a proxy-fronted app
    // would see them. Requests may arrive in absolute form (test
    // transports) or origin form (hyper), hence the authority/header
    // fallbacks.
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
        })
        .unwrap_or("localhost");
    let scheme = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |pq| pq.as_str());
    let url = format!("{scheme}://{host}{path_and_query}");

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let mut headers = BTreeMap::new();
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let cookies = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(parse_cookies)
        .unwrap_or_default();

    let (route_query_id, route_token) = route_captures(&path);

    RequestContext {
        path,
        url,
        query,
        authorization,
        headers,
        cookies,
        route_query_id,
        route_token,
    }
}

/// Path parameters the strategy chain consumes, read off the two
/// capturing route shapes that carry them.
fn route_captures(path: &str) -> (Option<u64>, Option<String>) {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "queries", id, "results"] => (id.parse().ok(), None),
        ["public", "dashboards", token] | ["api", "dashboards", "public", token] => {
            (None, Some((*token).to_string()))
        }
        _ => (None, None),
    }
}

fn parse_cookies(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

pub(super) fn append_session_cookie(headers: &mut HeaderMap, cookie: &str) {
    let value = format!("{SESSION_COOKIE}={cookie}; Path=/; HttpOnly; SameSite=Lax");
    if let Ok(value) = HeaderValue::try_from(value) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Expired cookie clearing the session, for logout.
#[must_use]
pub fn clear_session_cookie() -> HeaderValue {
    let value = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0");
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(MessageResponse::new(message))).into_response()
}

// =============================================================================
// CURRENT PRINCIPAL EXTRACTOR
// =============================================================================

/// The principal the middleware resolved for this request.
///
/// Absent principal means the request is anonymous; the rejection then
/// mirrors the login flow: API and XHR callers get a JSON 404 (no
/// resource existence leak), browsers get a redirect to `/login` with
/// the original path in `next`.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(Self(principal.clone()));
        }

        let is_xhr = parts
            .headers
            .get("x-requested-with")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));

        let path = parts.uri.path();
        if is_xhr || path.contains("/api/") {
            Err(AuthRejection::NotFoundJson)
        } else {
            let next = match parts.uri.query() {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            };
            Err(AuthRejection::LoginRedirect { next })
        }
    }
}

/// Rejection for [`CurrentPrincipal`].
#[derive(Debug)]
pub enum AuthRejection {
    NotFoundJson,
    LoginRedirect { next: String },
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::NotFoundJson => (
                StatusCode::NOT_FOUND,
                Json(MessageResponse::new(LOGIN_REQUIRED_MESSAGE)),
            )
                .into_response(),
            Self::LoginRedirect { next } => {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("next", &safe_next_path(&next))
                    .finish();
                let location = HeaderValue::try_from(format!("/login?{query}"))
                    .unwrap_or_else(|_| HeaderValue::from_static("/login"));
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
        }
    }
}

/// 403 unless the principal is in the organization's admin group.
pub fn require_admin(org: &Organization, principal: &Principal) -> Result<(), ApiError> {
    if principal.in_group(org.admin_group_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

/// 403 unless the principal is an admin or the named owning user.
pub fn require_admin_or_owner(
    org: &Organization,
    principal: &Principal,
    owner: glimpse_core::UserId,
) -> Result<(), ApiError> {
    if principal.in_group(org.admin_group_id) || principal.user_id() == Some(owner) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_parse_with_spaces_and_extra_semicolons() {
        let cookies = parse_cookies("a=1; glimpse_session=v1:2:1:99:dead; ; b==x");
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(
            cookies.get("glimpse_session").map(String::as_str),
            Some("v1:2:1:99:dead")
        );
        assert_eq!(cookies.get("b").map(String::as_str), Some("=x"));
    }

    #[test]
    fn route_captures_only_match_their_shapes() {
        assert_eq!(route_captures("/api/queries/42/results"), (Some(42), None));
        assert_eq!(
            route_captures("/public/dashboards/tok3n"),
            (None, Some("tok3n".to_string()))
        );
        assert_eq!(
            route_captures("/api/dashboards/public/tok3n"),
            (None, Some("tok3n".to_string()))
        );
        assert_eq!(route_captures("/api/queries/nan/results"), (None, None));
        assert_eq!(route_captures("/api/applications"), (None, None));
    }

    #[test]
    fn clear_cookie_names_the_session_cookie() {
        let value = clear_session_cookie();
        let text = value.to_str().expect("static cookie is ascii");
        assert!(text.starts_with(&format!("{SESSION_COOKIE}=;")));
        assert!(text.contains("Max-Age=0"));
    }
}
