//! # Protocol Constants
//!
//! Hardcoded constants for the Glimpse authentication core.
//!
//! These values are part of the wire protocol shared with external
//! embedders and stored credentials. Changing any of them invalidates
//! previously issued links and tokens, so they are compiled in and
//! immutable at runtime.

/// Namespace prefix for access-token keys in the ephemeral store.
///
/// The full key is `ACCESS_TOKEN_PREFIX + token`. The prefix keeps the
/// token keyspace separate from anything else sharing the store.
pub const ACCESS_TOKEN_PREFIX: &str = "glimpse:embed:access_token:";

/// Number of random bytes in an access token (before URL-safe encoding).
pub const ACCESS_TOKEN_BYTES: usize = 24;

/// Validity window for legacy signed URLs, in seconds.
///
/// A legacy signature is accepted only while `now < expires <= now + window`.
/// Intentionally not configurable: the embed window (`OrgSettings`) is the
/// tunable knob, this one is frozen for interop with already-issued links.
pub const LEGACY_SIGNATURE_WINDOW_SECS: i64 = 3600;

/// Default embed-signature timestamp window, in seconds.
///
/// Per-organization override lives in `OrgSettings::embed_window_secs`.
pub const DEFAULT_EMBED_WINDOW_SECS: i64 = 3600;

/// Base64 MD5 of an empty request body.
///
/// Embed requests are always bodyless GETs, so the content digest slot in
/// the signing string is this fixed constant.
pub const EMPTY_BODY_MD5_BASE64: &str = "1B2M2Y8AsgTpgAmY7PhCfg==";

/// Number of `*` characters shown in place of an application secret token.
pub const SECRET_TOKEN_MASK_LEN: usize = 16;

/// Random bytes in a generated application secret key (the lookup id).
pub const APPLICATION_SECRET_KEY_BYTES: usize = 16;

/// Random bytes in a generated application secret token (the signing key).
pub const APPLICATION_SECRET_TOKEN_BYTES: usize = 32;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for an application name.
///
/// Names longer than this are rejected at the API boundary.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum length for a raw credential string accepted from a request
/// (API key, signature, access token). Anything longer is noise and is
/// rejected before any lookup happens.
pub const MAX_CREDENTIAL_LENGTH: usize = 512;
