//! # Middleware Module
//!
//! Rate limiting and frame-embedding headers for the Glimpse HTTP API.
//!
//! ## Configuration
//!
//! Rate limiting is configured via environment variable:
//! - `GLIMPSE_RATE_LIMIT`: Requests per second (default: 100)

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Default rate limit: 100 requests per second.
const DEFAULT_RPS: NonZeroU32 = NonZeroU32::new(100).unwrap();

// =============================================================================
// RATE LIMITER
// =============================================================================

/// Global rate limiter type alias.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new global rate limiter.
///
/// # Arguments
/// * `requests_per_second` - Maximum requests per second
///
/// # Returns
/// A thread-safe rate limiter wrapped in Arc.
pub fn create_rate_limiter(requests_per_second: u32) -> GlobalRateLimiter {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_RPS);
    let quota = Quota::per_second(rps);
    Arc::new(RateLimiter::direct(quota))
}

/// Get rate limit from environment variable.
///
/// Returns the value of `GLIMPSE_RATE_LIMIT` or 100 if not set.
pub fn get_rate_limit_from_env() -> u32 {
    std::env::var("GLIMPSE_RATE_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100)
}

/// Paths that accept credentials from outside a session and therefore
/// get throttled: login, embeds, and share links.
fn is_rate_limited_path(path: &str) -> bool {
    path.starts_with("/login") || path.starts_with("/embed/") || path.starts_with("/public/")
}

/// Rate limiting middleware.
///
/// Checks the global rate limiter before allowing requests to the
/// throttled path classes through. Returns 429 Too Many Requests if
/// the limit is exceeded.
pub async fn rate_limit_middleware(
    State(limiter): State<GlobalRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if !is_rate_limited_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }
    match limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = request.uri().path(), "Rate limit exceeded");
            Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"))
        }
    }
}

// =============================================================================
// SECURITY HEADERS
// =============================================================================

/// Paths whose responses are meant to render inside third-party
/// iframes: embedded dashboards and share links.
fn is_embeddable_path(path: &str) -> bool {
    path.starts_with("/embed/")
        || path.starts_with("/public/")
        || path.starts_with("/api/dashboards/public/")
}

/// Frame-embedding headers on every response.
///
/// Embeddable surfaces announce `frame-ancestors *` and carry no
/// `X-Frame-Options` at all, since `deny` there would defeat the whole
/// feature. Everything else gets both the CSP form and the legacy
/// header.
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let embeddable = is_embeddable_path(request.uri().path());
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    if embeddable {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("frame-ancestors *"),
        );
        headers.remove(header::X_FRAME_OPTIONS);
    } else {
        headers.insert(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("frame-ancestors 'none'"),
        );
        headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    }
    response
}

// =============================================================================
// TESTS
// =============================================================================
