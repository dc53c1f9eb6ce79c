//! # External JWT Verification
//!
//! Verification of bearer tokens issued by an external identity
//! provider (e.g. Cloudflare Access or a corporate SSO proxy sitting in
//! front of Glimpse). The provider's keys arrive either as a JWKS
//! document fetched from the org's configured URL or as a shared
//! HS256 secret; which header or cookie carries the token is part of
//! [`OrgSettings`].
//!
//! Verification here is pure: fetching and caching the JWKS document is
//! the caller's job.

use crate::directory::OrgSettings;
use crate::types::GlimpseError;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use std::str::FromStr;

/// A verification key with its JWKS key id, when it has one.
pub struct JwtKey {
    pub kid: Option<String>,
    pub key: DecodingKey,
}

impl std::fmt::Debug for JwtKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Claims Glimpse cares about. Everything else in the token is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Parse a JWKS document into verification keys.
///
/// Entries with an unsupported key type are skipped; an empty result
/// simply means no token will verify.
pub fn keys_from_jwks(json: &str) -> Result<Vec<JwtKey>, GlimpseError> {
    let set: JwkSet = serde_json::from_str(json)
        .map_err(|e| GlimpseError::InvalidInput(format!("invalid JWKS document: {e}")))?;

    let mut keys = Vec::new();
    for jwk in &set.keys {
        if let Ok(key) = DecodingKey::from_jwk(jwk) {
            keys.push(JwtKey {
                kid: jwk.common.key_id.clone(),
                key,
            });
        }
    }
    Ok(keys)
}

/// Verification key for orgs configured with a shared HS256 secret
/// instead of a JWKS URL.
#[must_use]
pub fn key_from_secret(secret: &str) -> JwtKey {
    JwtKey {
        kid: None,
        key: DecodingKey::from_secret(secret.as_bytes()),
    }
}

/// Verify `token` against `keys` under the org's JWT settings.
///
/// Keys whose `kid` matches the token header are tried first, then the
/// rest in order; the first key that verifies wins. Expiry is enforced
/// when the token carries `exp`; issuer and audience are enforced when
/// the org configures them. Returns `None` when nothing verifies.
#[must_use]
pub fn verify_token(keys: &[JwtKey], token: &str, settings: &OrgSettings) -> Option<JwtClaims> {
    let algorithms: Vec<Algorithm> = settings
        .jwt_auth_algorithms
        .iter()
        .filter_map(|name| Algorithm::from_str(name).ok())
        .collect();
    let first = *algorithms.first()?;

    let mut validation = Validation::new(first);
    validation.algorithms = algorithms;
    validation.required_spec_claims = Default::default();
    if !settings.jwt_auth_issuer.is_empty() {
        validation.set_issuer(&[settings.jwt_auth_issuer.as_str()]);
    }
    if settings.jwt_auth_audience.is_empty() {
        validation.validate_aud = false;
    } else {
        validation.set_audience(&[settings.jwt_auth_audience.as_str()]);
    }

    let header_kid = decode_header(token).ok().and_then(|h| h.kid);

    let matching = keys
        .iter()
        .filter(|k| header_kid.is_some() && k.kid == header_kid);
    let remaining = keys
        .iter()
        .filter(|k| header_kid.is_none() || k.kid != header_kid);

    for key in matching.chain(remaining) {
        if let Ok(data) = decode::<JwtClaims>(token, &key.key, &validation) {
            return Some(data.claims);
        }
    }
    None
}
