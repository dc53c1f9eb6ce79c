//! # Glimpse HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET  /embed/dashboard/{id}` - Embed entry point (signature-authenticated)
//! - `GET  /public/dashboards/{token}` - Share-link dashboard (browser)
//! - `GET  /api/dashboards/public/{token}` - Share-link dashboard (API)
//! - `GET/POST /api/applications[...]` - Application management
//! - `GET/POST/DELETE /api/applications/{id}/dashboards[...]` - Dashboard links
//! - `GET  /api/dashboards/embed` - Embeddable dashboards (admin)
//! - `GET/POST/DELETE /api/alerts[...]` - Alert CRUD and muting
//! - `GET  /api/queries/{id}/results` - Query results (signed URLs, query keys)
//! - `GET  /api/session` - Current principal introspection
//! - `GET/POST /login`, `GET /logout` - Session surface
//! - `GET  /health` - Health check
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `GLIMPSE_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `GLIMPSE_RATE_LIMIT`: Requests per second on login/embed/public paths (default: 100, 0 to disable)

mod auth;
mod handlers;
mod middleware;
mod types;

// Re-exports for external use
pub use auth::{CurrentPrincipal, JwtKeyCache};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
// Re-export handlers and types for integration tests (via `glimpse::api::*`)
#[allow(unused_imports)]
pub use types::{
    AlertResponse, ApplicationResponse, DashboardResponse, EmbedDashboardResponse,
    HealthResponse, LoginPageResponse, MessageResponse, Paginated, QueryResultResponse,
    SessionResponse,
};

use crate::config::ServerConfig;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{delete, get, post},
};
use glimpse_core::{
    AccessTokenStore, Authenticator, Clock, DirectoryStore, GlimpseError, InMemoryEphemeralStore,
    OrgId, SessionManager,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// The organization every request is resolved against. Glimpse runs
/// single-tenant; the directory model stays org-scoped so the store
/// layer never has to change if that does.
pub const DEFAULT_ORG_ID: OrgId = OrgId(1);

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state wiring the core engine to the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    /// Tenant directory (users, applications, dashboards, alerts).
    pub directory: Arc<dyn DirectoryStore>,
    /// The strategy chain resolver.
    pub authenticator: Arc<Authenticator>,
    /// Ephemeral embed access tokens.
    pub tokens: AccessTokenStore,
    /// Session cookie minting and verification.
    pub sessions: Arc<SessionManager>,
    /// Per-organization JWT verification keys (JWKS fetch + cache).
    pub jwt_keys: Arc<JwtKeyCache>,
    /// Time source shared with the core.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire up state from a directory and a clock.
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        clock: Arc<dyn Clock>,
        cookie_secret: &str,
        session_lifetime_secs: i64,
    ) -> Self {
        let tokens = AccessTokenStore::new(Arc::new(InMemoryEphemeralStore::new(clock.clone())));
        let authenticator = Arc::new(Authenticator::new(
            directory.clone(),
            tokens.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            cookie_secret,
            session_lifetime_secs,
            clock.clone(),
        ));

        Self {
            directory,
            authenticator,
            tokens,
            sessions,
            jwt_keys: Arc::new(JwtKeyCache::new()),
            clock,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from environment configuration.
///
/// Reads `GLIMPSE_CORS_ORIGINS` environment variable:
/// - If "*": allows all origins (development mode - use with caution!)
/// - If not set: defaults to localhost only (restrictive default)
/// - Otherwise: parses comma-separated list of allowed origins
///
/// # Security Note
///
/// The default is restrictive (localhost only). Set `GLIMPSE_CORS_ORIGINS=*`
/// explicitly only for development or if you understand the security implications.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("GLIMPSE_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            // Explicit wildcard - warn about security implications
            tracing::warn!(
                "CORS: Allowing ALL origins (GLIMPSE_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            // Parse comma-separated origins
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in GLIMPSE_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers(cors_request_headers())
            }
        }
        None => {
            // No configuration - default to localhost only (restrictive)
            tracing::info!("CORS: No GLIMPSE_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let localhost_origins = vec![
        "http://localhost:3000".parse::<HeaderValue>().ok(),
        "http://localhost:8080".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:3000".parse::<HeaderValue>().ok(),
        "http://127.0.0.1:8080".parse::<HeaderValue>().ok(),
    ];
    let origins: Vec<HeaderValue> = localhost_origins.into_iter().flatten().collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(cors_request_headers())
}

fn cors_request_headers() -> [header::HeaderName; 3] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::HeaderName::from_static("x-requested-with"),
    ]
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Security headers - frame-ancestors policy per route class
/// 5. Rate limiting - login/embed/public paths (if enabled)
/// 6. Authentication - runs the strategy chain after route matching
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    // Check if rate limiting is enabled
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        // Embed and share-link surface
        .route(
            "/embed/dashboard/{dashboard_id}",
            get(handlers::embed_dashboard_handler),
        )
        .route(
            "/public/dashboards/{token}",
            get(handlers::public_dashboard_handler),
        )
        .route(
            "/api/dashboards/public/{token}",
            get(handlers::public_dashboard_handler),
        )
        // Application management
        .route(
            "/api/applications",
            get(handlers::list_applications_handler).post(handlers::create_application_handler),
        )
        .route(
            "/api/applications/{application_id}",
            get(handlers::get_application_handler)
                .post(handlers::update_application_handler)
                .delete(handlers::delete_application_handler),
        )
        .route(
            "/api/applications/{application_id}/regenerate_secret_token",
            post(handlers::regenerate_secret_token_handler),
        )
        // Application <-> dashboard links
        .route(
            "/api/applications/{application_id}/dashboards",
            get(handlers::application_dashboards_handler).post(handlers::link_dashboard_handler),
        )
        .route(
            "/api/applications/{application_id}/dashboards/{dashboard_id}",
            delete(handlers::unlink_dashboard_handler),
        )
        .route(
            "/api/dashboards/{dashboard_id}/applications",
            get(handlers::dashboard_applications_handler)
                .post(handlers::link_application_handler),
        )
        .route(
            "/api/dashboards/{dashboard_id}/applications/{application_id}",
            delete(handlers::unlink_application_handler),
        )
        .route(
            "/api/dashboards/embed",
            get(handlers::embeddable_dashboards_handler),
        )
        // Alerts
        .route(
            "/api/alerts",
            get(handlers::list_alerts_handler).post(handlers::create_alert_handler),
        )
        .route(
            "/api/alerts/{alert_id}",
            get(handlers::get_alert_handler)
                .post(handlers::update_alert_handler)
                .delete(handlers::delete_alert_handler),
        )
        .route(
            "/api/alerts/{alert_id}/mute",
            post(handlers::mute_alert_handler).delete(handlers::unmute_alert_handler),
        )
        // Query results (exercises signed URLs and query API keys)
        .route(
            "/api/queries/{query_id}/results",
            get(handlers::query_results_handler),
        )
        // Session surface
        .route("/api/session", get(handlers::session_handler))
        .route(
            "/login",
            get(handlers::login_page_handler).post(handlers::login_handler),
        )
        .route("/logout", get(handlers::logout_handler));

    // Authentication only runs for matched routes; unknown paths 404
    // without entering the strategy chain.
    router = router.route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        auth::request_auth_middleware,
    ));

    // Apply rate limiting middleware
    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    // Apply security headers, body limit, CORS, and tracing (outermost layers)
    router
        .layer(axum_middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(config: &ServerConfig, state: AppState) -> Result<(), GlimpseError> {
    let router = create_router(state);
    let addr = config.bind_addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GlimpseError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Glimpse HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| GlimpseError::Io(format!("Server error: {}", e)))
}
