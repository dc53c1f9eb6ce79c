//! # Request Authentication
//!
//! The strategy chain that turns an incoming request into a
//! [`Principal`]. Strategies run in a fixed order:
//!
//! 1. embed access token (`access_token` parameter on API paths)
//! 2. embed signature (signed `/embed/dashboard` URLs)
//! 3. legacy signed URL (`signature` + `expires` parameters)
//! 4. API key (parameter, `Authorization` header, or route token)
//! 5. external JWT
//!
//! A strategy either finds a principal (chain stops), fails the request
//! outright (chain stops, caller answers 401 with the failure message),
//! or reports nothing applicable (chain moves on). Only the embed and
//! token strategies can fail hard; the legacy and API-key strategies
//! fall through silently so a stale link degrades to "not signed in"
//! rather than an error page.
//!
//! Store errors are infrastructure problems and propagate as
//! [`GlimpseError`]; they never masquerade as authentication failures.

use crate::access_token::AccessTokenStore;
use crate::clock::Clock;
use crate::directory::{DirectoryStore, Organization};
use crate::jwt::{JwtKey, verify_token};
use crate::primitives::MAX_CREDENTIAL_LENGTH;
use crate::session::upsert_verified_user;
use crate::signing::{constant_time_str_eq, sign, verify_embed_signature};
use crate::types::{GlimpseError, Principal, QueryId, UserId};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// REQUEST VIEW
// =============================================================================

/// What the resolver sees of an HTTP request. The web layer fills this
/// in; nothing here depends on any particular HTTP stack.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path, e.g. `/api/queries/7/results`.
    pub path: String,
    /// Full request URL as the client sent it; embed signatures cover it.
    pub url: String,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    /// `Authorization` header, verbatim.
    pub authorization: Option<String>,
    /// Remaining headers, names lowercased.
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    /// `query_id` path parameter, when the route has one.
    pub route_query_id: Option<u64>,
    /// `token` path parameter, when the route has one.
    pub route_token: Option<String>,
}

impl RequestContext {
    /// First value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name.to_lowercase().as_str())
            .map(String::as_str)
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Which strategy produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AccessToken,
    EmbedSignature,
    SignedUrl,
    ApiKey,
    Jwt,
}

impl Strategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::AccessToken => "access_token",
            Strategy::EmbedSignature => "embed_signature",
            Strategy::SignedUrl => "signed_url",
            Strategy::ApiKey => "api_key",
            Strategy::Jwt => "jwt",
        }
    }
}

/// Why a strategy rejected the request. The display text is the exact
/// message returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("invalid embed request")]
    InvalidEmbedRequest,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("unknown application")]
    UnknownApplication,
    #[error("inactive application")]
    InactiveApplication,
    #[error("invalid secret token")]
    InvalidSecretToken,
    #[error("invalid access token")]
    InvalidAccessToken,
    #[error("invalid JWT token")]
    InvalidJwtToken,
}

/// Result of running the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// A strategy authenticated the request.
    Found {
        strategy: Strategy,
        principal: Principal,
    },
    /// No strategy applied; the caller may fall back to a session.
    Absent,
    /// A strategy claimed the request and rejected it.
    Failed {
        strategy: Strategy,
        failure: AuthFailure,
    },
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Runs the strategy chain against requests of one deployment.
pub struct Authenticator {
    directory: Arc<dyn DirectoryStore>,
    tokens: AccessTokenStore,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        directory: Arc<dyn DirectoryStore>,
        tokens: AccessTokenStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            tokens,
            clock,
        }
    }

    /// Run the chain. First non-[`ResolutionOutcome::Absent`] outcome
    /// wins.
    pub fn resolve(
        &self,
        org: &Organization,
        request: &RequestContext,
        jwt_keys: &[JwtKey],
    ) -> Result<ResolutionOutcome, GlimpseError> {
        const ORDER: [Strategy; 5] = [
            Strategy::AccessToken,
            Strategy::EmbedSignature,
            Strategy::SignedUrl,
            Strategy::ApiKey,
            Strategy::Jwt,
        ];

        for strategy in ORDER {
            let outcome = match strategy {
                Strategy::AccessToken => self.resolve_access_token(org, request)?,
                Strategy::EmbedSignature => self.resolve_embed(org, request)?,
                Strategy::SignedUrl => self.resolve_signed_url(org, request)?,
                Strategy::ApiKey => self.resolve_api_key(org, request)?,
                Strategy::Jwt => self.resolve_jwt(org, request, jwt_keys)?,
            };
            if !matches!(outcome, ResolutionOutcome::Absent) {
                return Ok(outcome);
            }
        }
        Ok(ResolutionOutcome::Absent)
    }

    // =========================================================================
    // STRATEGIES
    // =========================================================================

    fn resolve_access_token(
        &self,
        org: &Organization,
        request: &RequestContext,
    ) -> Result<ResolutionOutcome, GlimpseError> {
        if !request.path.contains("/api") {
            return Ok(ResolutionOutcome::Absent);
        }
        let Some(token) = request.query_param("access_token") else {
            return Ok(ResolutionOutcome::Absent);
        };
        if token.is_empty() || token.len() > MAX_CREDENTIAL_LENGTH {
            return Ok(ResolutionOutcome::Absent);
        }

        if self.tokens.is_valid(token)? {
            Ok(ResolutionOutcome::Found {
                strategy: Strategy::AccessToken,
                principal: Principal::access_token(org.id, token),
            })
        } else {
            Ok(ResolutionOutcome::Failed {
                strategy: Strategy::AccessToken,
                failure: AuthFailure::InvalidAccessToken,
            })
        }
    }

    fn resolve_embed(
        &self,
        org: &Organization,
        request: &RequestContext,
    ) -> Result<ResolutionOutcome, GlimpseError> {
        if !request.path.contains("/embed/dashboard") {
            return Ok(ResolutionOutcome::Absent);
        }
        // Embed paths never fall through: from here every exit is a
        // verdict.
        let failed = |failure| {
            Ok(ResolutionOutcome::Failed {
                strategy: Strategy::EmbedSignature,
                failure,
            })
        };

        let secret_key = request.query_param("secret_key").unwrap_or("");
        let signature = request.query_param("signature").unwrap_or("");
        if secret_key.is_empty() || signature.is_empty() {
            return failed(AuthFailure::InvalidEmbedRequest);
        }

        let timestamp_raw = request.query_param("timestamp").unwrap_or("");
        if timestamp_raw.is_empty() {
            return failed(AuthFailure::MissingTimestamp);
        }
        let Ok(timestamp) = timestamp_raw.parse::<i64>() else {
            return failed(AuthFailure::InvalidTimestamp);
        };

        let window = org.settings.embed_window_secs;
        let now = self.clock.now_unix();
        if timestamp + window < now || timestamp - window > now {
            return failed(AuthFailure::InvalidTimestamp);
        }

        let Some(application) = self.directory.application_by_secret_key(org.id, secret_key)?
        else {
            return failed(AuthFailure::UnknownApplication);
        };
        if !application.active {
            return failed(AuthFailure::InactiveApplication);
        }

        if !verify_embed_signature(&application.secret_token, &request.url, timestamp, signature) {
            return failed(AuthFailure::InvalidSecretToken);
        }

        Ok(ResolutionOutcome::Found {
            strategy: Strategy::EmbedSignature,
            principal: Principal::application(org.id, application.id, &application.name),
        })
    }

    fn resolve_signed_url(
        &self,
        org: &Organization,
        request: &RequestContext,
    ) -> Result<ResolutionOutcome, GlimpseError> {
        let signature = request.query_param("signature").unwrap_or("");
        if signature.is_empty() {
            return Ok(ResolutionOutcome::Absent);
        }
        let expires: i64 = request
            .query_param("expires")
            .and_then(|e| e.parse().ok())
            .unwrap_or(0);
        let now = self.clock.now_unix();
        if !(now < expires && expires <= now + crate::primitives::LEGACY_SIGNATURE_WINDOW_SECS) {
            return Ok(ResolutionOutcome::Absent);
        }

        // A link signed with a user's personal API key.
        if let Some(user_id) = request
            .query_param("user_id")
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<u64>().ok())
        {
            if let Some(user) = self.directory.user(org.id, UserId(user_id))? {
                let api_key = user.api_key.as_deref().unwrap_or("");
                if !user.is_disabled
                    && !api_key.is_empty()
                    && sign(api_key, &request.path, expires)
                        .is_some_and(|expected| constant_time_str_eq(&expected, signature))
                {
                    return Ok(ResolutionOutcome::Found {
                        strategy: Strategy::SignedUrl,
                        principal: Principal::user(
                            org.id,
                            user.id,
                            &user.name,
                            user.group_ids.clone(),
                        ),
                    });
                }
            }
        }

        // A link signed with a query's result API key.
        if let Some(query_id) = request.route_query_id {
            if let Some(query) = self.directory.query(org.id, QueryId(query_id))? {
                let api_key = query.api_key.as_deref().unwrap_or("");
                if !api_key.is_empty()
                    && sign(api_key, &request.path, expires)
                        .is_some_and(|expected| constant_time_str_eq(&expected, signature))
                {
                    return Ok(ResolutionOutcome::Found {
                        strategy: Strategy::SignedUrl,
                        principal: Principal::api_key(
                            org.id,
                            api_key,
                            format!("ApiKey: Query {}", query.id.0),
                            query.group_ids.clone(),
                        ),
                    });
                }
            }
        }

        Ok(ResolutionOutcome::Absent)
    }

    fn resolve_api_key(
        &self,
        org: &Organization,
        request: &RequestContext,
    ) -> Result<ResolutionOutcome, GlimpseError> {
        let Some(api_key) = extract_api_key(request) else {
            return Ok(ResolutionOutcome::Absent);
        };
        if api_key.is_empty() || api_key.len() > MAX_CREDENTIAL_LENGTH {
            return Ok(ResolutionOutcome::Absent);
        }

        // A user's personal key. Disabled accounts keep their key in the
        // directory but it no longer authenticates anything.
        if let Some(user) = self.directory.user_by_api_key(org.id, &api_key)? {
            if !user.is_disabled {
                return Ok(ResolutionOutcome::Found {
                    strategy: Strategy::ApiKey,
                    principal: Principal::user(org.id, user.id, &user.name, user.group_ids),
                });
            }
        }

        // A standalone key record (e.g. a public dashboard share).
        if self.directory.api_key_record(org.id, &api_key)?.is_some() {
            return Ok(ResolutionOutcome::Found {
                strategy: Strategy::ApiKey,
                principal: Principal::api_key(
                    org.id,
                    &api_key,
                    format!("ApiKey: {api_key}"),
                    Default::default(),
                ),
            });
        }

        // The result key of the query addressed by the route.
        if let Some(query_id) = request.route_query_id {
            if let Some(query) = self.directory.query(org.id, QueryId(query_id))? {
                if let Some(query_key) = query.api_key.as_deref().filter(|k| !k.is_empty()) {
                    if constant_time_str_eq(query_key, &api_key) {
                        return Ok(ResolutionOutcome::Found {
                            strategy: Strategy::ApiKey,
                            principal: Principal::api_key(
                                org.id,
                                &api_key,
                                format!("ApiKey: Query {}", query.id.0),
                                query.group_ids.clone(),
                            ),
                        });
                    }
                }
            }
        }

        Ok(ResolutionOutcome::Absent)
    }

    fn resolve_jwt(
        &self,
        org: &Organization,
        request: &RequestContext,
        jwt_keys: &[JwtKey],
    ) -> Result<ResolutionOutcome, GlimpseError> {
        let settings = &org.settings;
        if !settings.jwt_login_enabled {
            return Ok(ResolutionOutcome::Absent);
        }

        let token = if !settings.jwt_auth_cookie_name.is_empty() {
            request.cookie(&settings.jwt_auth_cookie_name)
        } else if !settings.jwt_auth_header_name.is_empty() {
            request.header(&settings.jwt_auth_header_name)
        } else {
            return Ok(ResolutionOutcome::Absent);
        };
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(ResolutionOutcome::Absent);
        };

        let Some(claims) = verify_token(jwt_keys, token, settings) else {
            return Ok(ResolutionOutcome::Failed {
                strategy: Strategy::Jwt,
                failure: AuthFailure::InvalidJwtToken,
            });
        };
        let Some(email) = claims.email.filter(|e| !e.is_empty()) else {
            // Verified, but useless: there is no account to map it to.
            return Ok(ResolutionOutcome::Failed {
                strategy: Strategy::Jwt,
                failure: AuthFailure::InvalidJwtToken,
            });
        };

        let now = self.clock.now_unix();
        match upsert_verified_user(self.directory.as_ref(), org, &email, &email, now)? {
            Some(user) => Ok(ResolutionOutcome::Found {
                strategy: Strategy::Jwt,
                principal: Principal::user(org.id, user.id, &user.name, user.group_ids),
            }),
            None => Ok(ResolutionOutcome::Absent),
        }
    }
}

/// Pull the API key out of a request: `api_key` parameter first, then
/// the `Authorization` header (with its `Key ` scheme marker removed),
/// then a `token` path parameter.
fn extract_api_key(request: &RequestContext) -> Option<String> {
    if let Some(key) = request.query_param("api_key") {
        return Some(key.to_string());
    }
    if let Some(auth) = request.authorization.as_deref().filter(|a| !a.is_empty()) {
        return Some(auth.replacen("Key ", "", 1));
    }
    if let Some(token) = request.route_token.as_deref() {
        return Some(token.to_string());
    }
    None
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::access_token::InMemoryEphemeralStore;
    use crate::clock::ManualClock;
    use crate::directory::{
        Application, Directory, OrgSettings, Organization, Query, User,
    };
    use crate::signing::embed_signature;
    use crate::types::{ApplicationId, GroupId, OrgId, Subject};

    const NOW: i64 = 1_722_000_000;

    struct Fixture {
        directory: Arc<Directory>,
        authenticator: Authenticator,
        tokens: AccessTokenStore,
        clock: ManualClock,
        org: Organization,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::at(NOW);
        let directory = Arc::new(Directory::new());
        let org = directory
            .insert_organization(Organization {
                id: OrgId(0),
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                default_group_id: GroupId(100),
                admin_group_id: GroupId(101),
                settings: OrgSettings::default(),
            })
            .expect("insert org");
        let tokens = AccessTokenStore::new(Arc::new(InMemoryEphemeralStore::new(Arc::new(
            clock.clone(),
        ))));
        let authenticator = Authenticator::new(
            directory.clone(),
            tokens.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            directory,
            authenticator,
            tokens,
            clock,
            org,
        }
    }

    impl Fixture {
        fn seed_application(&self, name: &str, active: bool) -> Application {
            self.directory
                .insert_application(Application {
                    id: ApplicationId(0),
                    org_id: self.org.id,
                    name: name.to_string(),
                    description: None,
                    icon_url: None,
                    secret_key: format!("{name}-key"),
                    secret_token: format!("{name}-token"),
                    active,
                    created_by: None,
                    created_at: NOW,
                })
                .expect("insert application")
        }

        fn seed_user(&self, email: &str, api_key: &str, disabled: bool) -> User {
            self.directory
                .insert_user(User {
                    id: UserId(0),
                    org_id: self.org.id,
                    name: email.to_string(),
                    email: email.to_string(),
                    api_key: Some(api_key.to_string()),
                    group_ids: [GroupId(100)].into_iter().collect(),
                    is_disabled: disabled,
                    is_invitation_pending: false,
                    created_at: NOW,
                })
                .expect("insert user")
        }

        fn seed_query(&self, api_key: &str, owner: UserId) -> Query {
            self.directory
                .insert_query(Query {
                    id: QueryId(0),
                    org_id: self.org.id,
                    name: "Weekly revenue".to_string(),
                    api_key: Some(api_key.to_string()),
                    group_ids: [GroupId(100)].into_iter().collect(),
                    user_id: owner,
                    created_at: NOW,
                })
                .expect("insert query")
        }

        fn resolve(&self, request: &RequestContext) -> ResolutionOutcome {
            self.authenticator
                .resolve(&self.org, request, &[])
                .expect("resolve succeeds")
        }
    }

    fn request_for(url: &str) -> RequestContext {
        let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
        let path_start = without_scheme.find('/').unwrap_or(0);
        let path_and_query = &without_scheme[path_start..];
        let (path, raw_query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));

        RequestContext {
            path: path.to_string(),
            url: url.to_string(),
            query: form_urlencoded::parse(raw_query.as_bytes())
                .into_owned()
                .collect(),
            ..Default::default()
        }
    }

    fn signed_embed_url(app: &Application, timestamp: i64) -> String {
        let base = format!(
            "http://localhost/acme/embed/dashboard/5?secret_key={}&timestamp={timestamp}",
            app.secret_key
        );
        let sig = embed_signature(&app.secret_token, &base, timestamp).expect("signs");
        format!("{base}&signature={sig}")
    }

    fn expect_failure(outcome: &ResolutionOutcome, expected: AuthFailure) {
        match outcome {
            ResolutionOutcome::Failed { failure, .. } => assert_eq!(*failure, expected),
            other => panic!("expected Failed({expected:?}), got {other:?}"),
        }
    }

    #[test]
    fn access_token_wins_on_api_paths() {
        let f = fixture();
        let token = f.tokens.issue(300).expect("issue");
        // A valid API key is also present; the token still takes the
        // request.
        f.seed_user("ada@acme.test", "ada-key", false);

        let request = request_for(&format!(
            "http://localhost/api/queries/1/results?access_token={token}&api_key=ada-key"
        ));
        match f.resolve(&request) {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::AccessToken);
                assert_eq!(principal.name, format!("AccessToken: {token}"));
                assert_eq!(principal.subject, Subject::AccessToken(token));
                assert!(principal.is_api_principal);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn unknown_access_token_fails_the_request() {
        let f = fixture();
        let request = request_for(
            "http://localhost/api/queries/1/results?access_token=never-issued",
        );
        let outcome = f.resolve(&request);
        expect_failure(&outcome, AuthFailure::InvalidAccessToken);
        assert_eq!(
            AuthFailure::InvalidAccessToken.to_string(),
            "invalid access token"
        );
    }

    #[test]
    fn expired_access_token_fails_the_request() {
        let f = fixture();
        let token = f.tokens.issue(300).expect("issue");
        f.clock.advance(301);

        let request =
            request_for(&format!("http://localhost/api/dashboards?access_token={token}"));
        expect_failure(&f.resolve(&request), AuthFailure::InvalidAccessToken);
    }

    #[test]
    fn access_token_ignored_off_api_paths() {
        let f = fixture();
        let request = request_for("http://localhost/dashboards/1?access_token=whatever");
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn valid_embed_signature_yields_application_principal() {
        let f = fixture();
        let app = f.seed_application("Portal", true);
        let request = request_for(&signed_embed_url(&app, NOW));

        match f.resolve(&request) {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::EmbedSignature);
                assert_eq!(principal.subject, Subject::Application(app.id));
                assert_eq!(principal.name, "Application: Portal");
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn embed_failures_report_in_protocol_order() {
        let f = fixture();
        let app = f.seed_application("Portal", true);

        // No secret_key / signature at all.
        let request = request_for("http://localhost/acme/embed/dashboard/5");
        expect_failure(&f.resolve(&request), AuthFailure::InvalidEmbedRequest);

        // Credentials present but no timestamp.
        let request = request_for(&format!(
            "http://localhost/acme/embed/dashboard/5?secret_key={}&signature=deadbeef",
            app.secret_key
        ));
        expect_failure(&f.resolve(&request), AuthFailure::MissingTimestamp);

        // Unparseable timestamp.
        let request = request_for(&format!(
            "http://localhost/acme/embed/dashboard/5?secret_key={}&signature=deadbeef&timestamp=yesterday",
            app.secret_key
        ));
        expect_failure(&f.resolve(&request), AuthFailure::InvalidTimestamp);

        // Unknown application comes before signature verification.
        let request = request_for(&format!(
            "http://localhost/acme/embed/dashboard/5?secret_key=nobody&signature=deadbeef&timestamp={NOW}"
        ));
        expect_failure(&f.resolve(&request), AuthFailure::UnknownApplication);

        // Known application, wrong signature.
        let request = request_for(&format!(
            "http://localhost/acme/embed/dashboard/5?secret_key={}&signature=deadbeef&timestamp={NOW}",
            app.secret_key
        ));
        expect_failure(&f.resolve(&request), AuthFailure::InvalidSecretToken);
    }

    #[test]
    fn inactive_application_is_reported_before_signature_check() {
        let f = fixture();
        let app = f.seed_application("Mothballed", false);
        // Even a perfectly signed URL is refused.
        let request = request_for(&signed_embed_url(&app, NOW));
        expect_failure(&f.resolve(&request), AuthFailure::InactiveApplication);
    }

    #[test]
    fn embed_timestamp_window_is_symmetric_and_inclusive() {
        let f = fixture();
        let app = f.seed_application("Portal", true);
        let window = f.org.settings.embed_window_secs;

        for timestamp in [NOW - window, NOW + window] {
            let request = request_for(&signed_embed_url(&app, timestamp));
            assert!(
                matches!(f.resolve(&request), ResolutionOutcome::Found { .. }),
                "timestamp {timestamp} should be inside the window"
            );
        }
        for timestamp in [NOW - window - 1, NOW + window + 1] {
            let request = request_for(&signed_embed_url(&app, timestamp));
            expect_failure(&f.resolve(&request), AuthFailure::InvalidTimestamp);
        }
    }

    #[test]
    fn embed_paths_never_fall_through_to_other_strategies() {
        let f = fixture();
        f.seed_user("ada@acme.test", "ada-key", false);
        // The API key is valid, but on an embed path the embed strategy
        // owns the verdict.
        let request = request_for("http://localhost/acme/embed/dashboard/5?api_key=ada-key");
        expect_failure(&f.resolve(&request), AuthFailure::InvalidEmbedRequest);
    }

    #[test]
    fn signed_url_authenticates_the_user() {
        let f = fixture();
        let user = f.seed_user("ada@acme.test", "ada-key", false);
        let path = "/api/queries/42/results.json";
        let expires = NOW + 600;
        let sig = sign("ada-key", path, expires).expect("signs");

        let request = request_for(&format!(
            "http://localhost{path}?signature={sig}&expires={expires}&user_id={}",
            user.id.0
        ));
        match f.resolve(&request) {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::SignedUrl);
                assert_eq!(principal.subject, Subject::User(user.id));
                assert!(!principal.is_api_principal);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn signed_url_expiry_bounds() {
        let f = fixture();
        let user = f.seed_user("ada@acme.test", "ada-key", false);
        let path = "/api/queries/42/results.json";

        let build = |expires: i64| {
            let sig = sign("ada-key", path, expires).expect("signs");
            request_for(&format!(
                "http://localhost{path}?signature={sig}&expires={expires}&user_id={}",
                user.id.0
            ))
        };

        // Already expired, and expiry exactly now.
        assert_eq!(f.resolve(&build(NOW - 1)), ResolutionOutcome::Absent);
        assert_eq!(f.resolve(&build(NOW)), ResolutionOutcome::Absent);
        // Upper bound is inclusive; one past it is out.
        assert!(matches!(
            f.resolve(&build(NOW + 3_600)),
            ResolutionOutcome::Found { .. }
        ));
        assert_eq!(f.resolve(&build(NOW + 3_601)), ResolutionOutcome::Absent);
    }

    #[test]
    fn tampered_signed_url_falls_through_silently() {
        let f = fixture();
        let user = f.seed_user("ada@acme.test", "ada-key", false);
        let path = "/api/queries/42/results.json";
        let expires = NOW + 600;
        let sig = sign("ada-key", "/other/path", expires).expect("signs");

        let request = request_for(&format!(
            "http://localhost{path}?signature={sig}&expires={expires}&user_id={}",
            user.id.0
        ));
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn signed_url_resolves_query_key_via_route() {
        let f = fixture();
        let owner = f.seed_user("ada@acme.test", "ada-key", false);
        let query = f.seed_query("query-api-key", owner.id);
        let path = format!("/api/queries/{}/results", query.id.0);
        let expires = NOW + 600;
        let sig = sign("query-api-key", &path, expires).expect("signs");

        let mut request = request_for(&format!(
            "http://localhost{path}?signature={sig}&expires={expires}"
        ));
        request.route_query_id = Some(query.id.0);

        match f.resolve(&request) {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::SignedUrl);
                assert_eq!(principal.name, format!("ApiKey: Query {}", query.id.0));
                assert_eq!(
                    principal.subject,
                    Subject::ApiKey("query-api-key".to_string())
                );
                assert!(principal.in_group(GroupId(100)));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn api_key_parameter_authenticates_user() {
        let f = fixture();
        let user = f.seed_user("ada@acme.test", "ada-key", false);
        let request = request_for("http://localhost/api/dashboards?api_key=ada-key");

        match f.resolve(&request) {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::ApiKey);
                assert_eq!(principal.subject, Subject::User(user.id));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn authorization_header_key_scheme() {
        let f = fixture();
        let user = f.seed_user("ada@acme.test", "ada-key", false);

        let mut request = request_for("http://localhost/api/dashboards");
        request.authorization = Some("Key ada-key".to_string());
        match f.resolve(&request) {
            ResolutionOutcome::Found { principal, .. } => {
                assert_eq!(principal.subject, Subject::User(user.id));
            }
            other => panic!("expected Found, got {other:?}"),
        }

        // Bare key without the scheme marker works too.
        let mut request = request_for("http://localhost/api/dashboards");
        request.authorization = Some("ada-key".to_string());
        assert!(matches!(
            f.resolve(&request),
            ResolutionOutcome::Found { .. }
        ));
    }

    #[test]
    fn disabled_user_key_does_not_authenticate() {
        let f = fixture();
        f.seed_user("gone@acme.test", "stale-key", true);
        let request = request_for("http://localhost/api/dashboards?api_key=stale-key");
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn route_token_resolves_standalone_key_record() {
        let f = fixture();
        f.directory
            .insert_api_key_record(crate::directory::ApiKeyRecord {
                id: 0,
                org_id: f.org.id,
                api_key: "share-token".to_string(),
                active: true,
                object_type: "dashboard".to_string(),
                object_id: 5,
                created_at: NOW,
            })
            .expect("insert record");

        let mut request = request_for("http://localhost/public/dashboards/share-token");
        request.route_token = Some("share-token".to_string());

        match f.resolve(&request) {
            ResolutionOutcome::Found { principal, .. } => {
                assert_eq!(principal.name, "ApiKey: share-token");
                assert!(principal.is_api_principal);
                assert!(principal.group_ids.is_empty());
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[test]
    fn query_api_key_matches_only_its_own_route() {
        let f = fixture();
        let owner = f.seed_user("ada@acme.test", "ada-key", false);
        let query = f.seed_query("query-api-key", owner.id);

        let mut request = request_for(&format!(
            "http://localhost/api/queries/{}/results?api_key=query-api-key",
            query.id.0
        ));
        request.route_query_id = Some(query.id.0);
        match f.resolve(&request) {
            ResolutionOutcome::Found { principal, .. } => {
                assert_eq!(principal.name, format!("ApiKey: Query {}", query.id.0));
            }
            other => panic!("expected Found, got {other:?}"),
        }

        // Same key against a different route: nothing to match.
        let mut request =
            request_for("http://localhost/api/queries/999/results?api_key=query-api-key");
        request.route_query_id = Some(999);
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn empty_api_key_parameter_is_ignored() {
        let f = fixture();
        f.seed_user("ada@acme.test", "ada-key", false);
        let request = request_for("http://localhost/api/dashboards?api_key=");
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn jwt_header_logs_user_in_and_creates_the_account() {
        use jsonwebtoken::{EncodingKey, Header, encode};

        let f = fixture();
        let mut org = f.org.clone();
        org.settings.jwt_login_enabled = true;
        org.settings.jwt_auth_header_name = "X-Auth-Token".to_string();
        org.settings.jwt_auth_algorithms = vec!["HS256".to_string()];
        f.directory.update_organization(org.clone()).expect("update org");

        #[derive(serde::Serialize)]
        struct Claims {
            email: String,
            exp: i64,
        }
        let real_now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let token = encode(
            &Header::default(),
            &Claims {
                email: "new@acme.test".to_string(),
                exp: real_now + 600,
            },
            &EncodingKey::from_secret(b"jwt-secret"),
        )
        .expect("encode");
        let keys = vec![crate::jwt::key_from_secret("jwt-secret")];

        let mut request = request_for("http://localhost/dashboards/1");
        request
            .headers
            .insert("x-auth-token".to_string(), token);

        match f
            .authenticator
            .resolve(&org, &request, &keys)
            .expect("resolve succeeds")
        {
            ResolutionOutcome::Found {
                strategy,
                principal,
            } => {
                assert_eq!(strategy, Strategy::Jwt);
                assert!(principal.user_id().is_some());
            }
            other => panic!("expected Found, got {other:?}"),
        }

        // The account now exists, in the default group.
        let user = f
            .directory
            .user_by_email(org.id, "new@acme.test")
            .expect("lookup")
            .expect("created");
        assert!(user.group_ids.contains(&org.default_group_id));
    }

    #[test]
    fn invalid_jwt_fails_the_request() {
        let f = fixture();
        let mut org = f.org.clone();
        org.settings.jwt_login_enabled = true;
        org.settings.jwt_auth_header_name = "X-Auth-Token".to_string();

        let keys = vec![crate::jwt::key_from_secret("jwt-secret")];
        let mut request = request_for("http://localhost/dashboards/1");
        request
            .headers
            .insert("x-auth-token".to_string(), "garbage".to_string());

        match f
            .authenticator
            .resolve(&org, &request, &keys)
            .expect("resolve succeeds")
        {
            ResolutionOutcome::Failed { failure, .. } => {
                assert_eq!(failure, AuthFailure::InvalidJwtToken);
                assert_eq!(failure.to_string(), "invalid JWT token");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn jwt_disabled_org_ignores_the_header() {
        let f = fixture();
        let mut request = request_for("http://localhost/dashboards/1");
        request
            .headers
            .insert("x-auth-token".to_string(), "anything".to_string());
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }

    #[test]
    fn bare_request_resolves_to_absent() {
        let f = fixture();
        let request = request_for("http://localhost/api/dashboards");
        assert_eq!(f.resolve(&request), ResolutionOutcome::Absent);
    }
}
