//! # Browser Sessions
//!
//! Cookie-based sessions for users who signed in through the login flow
//! (or were signed in automatically after JWT verification).
//!
//! The cookie is self-contained: `v1:<user>:<org>:<expires>:<identity>`
//! plus an HMAC-SHA256 tag over that payload, keyed by the server
//! secret. The identity field is a short digest of the user's email and
//! API key, so rotating either one invalidates every outstanding session
//! without any server-side session state.

use crate::clock::Clock;
use crate::directory::{DirectoryStore, Organization, User};
use crate::signing::constant_time_str_eq;
use crate::types::{GlimpseError, OrgId, UserId};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "glimpse_session";

/// Contents of a verified session cookie.
///
/// Holding claims is not the same as being signed in: the caller must
/// re-load the user and confirm it is still enabled and still carries
/// the same identity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: UserId,
    pub org_id: OrgId,
    pub identity: String,
}

/// Mints and verifies session cookies.
pub struct SessionManager {
    secret: String,
    lifetime_secs: i64,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    #[must_use]
    pub fn new(secret: impl Into<String>, lifetime_secs: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            lifetime_secs,
            clock,
        }
    }

    /// Short digest binding a session to the user's current email and
    /// API key.
    #[must_use]
    pub fn identity_tag(user: &User) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user.email.as_bytes());
        hasher.update(b"\0");
        hasher.update(user.api_key.as_deref().unwrap_or("").as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..8].to_string()
    }

    /// Mint a cookie for `user`. Returns `None` when the server secret
    /// is empty, since an unkeyed tag would authenticate nothing.
    #[must_use]
    pub fn issue(&self, user: &User) -> Option<String> {
        if self.secret.is_empty() {
            return None;
        }
        let expires = self.clock.now_unix() + self.lifetime_secs;
        let payload = format!(
            "v1:{}:{}:{}:{}",
            user.id.0,
            user.org_id.0,
            expires,
            Self::identity_tag(user)
        );
        let tag = self.tag(&payload)?;
        Some(format!("{payload}:{tag}"))
    }

    /// Check the tag and expiry of a cookie and return its claims.
    #[must_use]
    pub fn verify(&self, cookie: &str) -> Option<SessionClaims> {
        if self.secret.is_empty() {
            return None;
        }
        let (payload, provided_tag) = cookie.rsplit_once(':')?;
        let expected_tag = self.tag(payload)?;
        if !constant_time_str_eq(&expected_tag, provided_tag) {
            return None;
        }

        let fields: Vec<&str> = payload.split(':').collect();
        let [version, user_id, org_id, expires, identity] = fields.as_slice() else {
            return None;
        };
        if *version != "v1" {
            return None;
        }
        let expires: i64 = expires.parse().ok()?;
        if expires <= self.clock.now_unix() {
            return None;
        }

        Some(SessionClaims {
            user_id: UserId(user_id.parse().ok()?),
            org_id: OrgId(org_id.parse().ok()?),
            identity: (*identity).to_string(),
        })
    }

    fn tag(&self, payload: &str) -> Option<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Find or create the account for an externally verified login.
///
/// Used after a JWT checks out: the issuer has vouched for `email`, so a
/// missing account is created on the spot in the organization's default
/// group. Existing accounts get their pending-invitation flag cleared
/// and their display name synced, as separate writes. Disabled accounts
/// never come back, created or not.
pub fn upsert_verified_user(
    store: &dyn DirectoryStore,
    org: &Organization,
    name: &str,
    email: &str,
    now: i64,
) -> Result<Option<User>, GlimpseError> {
    if let Some(mut user) = store.user_by_email(org.id, email)? {
        if user.is_disabled {
            return Ok(None);
        }
        if user.is_invitation_pending {
            user.is_invitation_pending = false;
            store.update_user(user.clone())?;
        }
        if user.name != name {
            user.name = name.to_string();
            store.update_user(user.clone())?;
        }
        return Ok(Some(user));
    }

    let user = store.insert_user(User {
        id: UserId(0),
        org_id: org.id,
        name: name.to_string(),
        email: email.to_string(),
        api_key: None,
        group_ids: [org.default_group_id].into_iter().collect(),
        is_disabled: false,
        is_invitation_pending: false,
        created_at: now,
    })?;
    Ok(Some(user))
}
