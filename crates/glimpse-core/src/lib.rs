//! # glimpse-core
//!
//! Request authentication and embed signatures for Glimpse - THE LOGIC.
//!
//! This crate implements the CORE of the backend: given a view of an
//! incoming HTTP request and the tenant directory, decide who (if
//! anyone) the request acts as. Five strategies run in a fixed order:
//! embed access tokens, embed signatures, legacy signed URLs, API keys,
//! and externally issued JWTs; browser sessions ride on top in the web
//! layer.
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust): JWKS fetching,
//!   cookies, and HTTP wiring live in the server binary
//! - Deterministic where it matters: `BTreeMap`/`BTreeSet` everywhere,
//!   time through an injected [`clock::Clock`], randomness confined to
//!   credential generation
//! - Closed: the strategy chain is a fixed enumeration, not plugins

// =============================================================================
// MODULES
// =============================================================================

pub mod access_token;
pub mod auth;
pub mod clock;
pub mod directory;
pub mod jwt;
pub mod primitives;
pub mod redirect;
pub mod session;
pub mod signing;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AlertId, ApplicationId, DashboardId, GlimpseError, GroupId, OrgId, Principal, QueryId,
    Subject, UserId,
};

// =============================================================================
// RE-EXPORTS: Authentication Chain
// =============================================================================

pub use access_token::{AccessTokenStore, EphemeralStore, InMemoryEphemeralStore, generate_token};
pub use auth::{AuthFailure, Authenticator, RequestContext, ResolutionOutcome, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use jwt::{JwtClaims, JwtKey, key_from_secret, keys_from_jwks, verify_token};
pub use redirect::safe_next_path;
pub use session::{SESSION_COOKIE, SessionClaims, SessionManager, upsert_verified_user};
pub use signing::{
    canonical_signing_url, constant_time_str_eq, embed_signature, encode_params, sign,
    verify_embed_signature,
};

// =============================================================================
// RE-EXPORTS: Directory (entities and stores)
// =============================================================================

pub use directory::{
    Alert, AlertState, ApiKeyRecord, Application, Dashboard, Directory, DirectoryStore,
    OrgSettings, Organization, Query, User,
};
pub use storage::RedbDirectory;
