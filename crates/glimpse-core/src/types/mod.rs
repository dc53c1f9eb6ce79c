//! # Core Type Definitions
//!
//! This module contains the shared types for the Glimpse authentication core:
//! - Tenant and entity identifiers (`OrgId`, `UserId`, `GroupId`, ...)
//! - The per-request resolved identity (`Principal`, `Subject`)
//! - Infrastructure error type (`GlimpseError`)
//!
//! ## Determinism Guarantees
//!
//! All collection-bearing types use `BTreeSet`/`BTreeMap` so iteration
//! order is stable across runs and across serialization round trips.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

// =============================================================================
// TENANT & ENTITY IDENTIFIERS
// =============================================================================

/// Unique identifier for an organization (tenant boundary).
/// Every directory lookup is scoped to exactly one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrgId(pub u64);

/// Unique identifier for a user within the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

/// Unique identifier for a permission group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Unique identifier for a registered embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub u64);

/// Unique identifier for a dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DashboardId(pub u64);

/// Unique identifier for a saved query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(pub u64);

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(pub u64);

// =============================================================================
// PRINCIPAL
// =============================================================================

/// The entity a resolved principal acts as.
///
/// A request is authenticated either as a durable user or as one of the
/// synthetic API identities. The distinction is type-level so callers never
/// have to parse a display name to learn what kind of credential matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subject {
    /// A durable directory user.
    User(UserId),
    /// A raw API key (user key presented for a query, or a standalone
    /// key record). Carries the key so downstream code can re-scope it.
    ApiKey(String),
    /// A registered embedding application, resolved via embed signature.
    Application(ApplicationId),
    /// An ephemeral embed access token.
    AccessToken(String),
}

/// Resolved identity for a single request.
///
/// Constructed fresh per request by the resolution chain; never persisted.
/// Only the underlying directory entities are durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// The organization this principal is scoped to.
    pub org_id: OrgId,
    /// What the principal acts as.
    pub subject: Subject,
    /// Display name ("ApiKey: Query 7", "Application: Acme BI", a user name).
    pub name: String,
    /// Permission groups. Empty for embed/application principals.
    pub group_ids: BTreeSet<GroupId>,
    /// True for synthetic API identities (key, application, access token).
    pub is_api_principal: bool,
}

impl Principal {
    /// Principal acting as a durable user.
    #[must_use]
    pub fn user(org_id: OrgId, id: UserId, name: impl Into<String>, groups: BTreeSet<GroupId>) -> Self {
        Self {
            org_id,
            subject: Subject::User(id),
            name: name.into(),
            group_ids: groups,
            is_api_principal: false,
        }
    }

    /// Synthetic principal for a raw API key.
    #[must_use]
    pub fn api_key(org_id: OrgId, key: impl Into<String>, name: impl Into<String>, groups: BTreeSet<GroupId>) -> Self {
        Self {
            org_id,
            subject: Subject::ApiKey(key.into()),
            name: name.into(),
            group_ids: groups,
            is_api_principal: true,
        }
    }

    /// Synthetic principal for an embedding application.
    #[must_use]
    pub fn application(org_id: OrgId, id: ApplicationId, app_name: &str) -> Self {
        Self {
            org_id,
            subject: Subject::Application(id),
            name: format!("Application: {app_name}"),
            group_ids: BTreeSet::new(),
            is_api_principal: true,
        }
    }

    /// Synthetic principal for an embed access token.
    #[must_use]
    pub fn access_token(org_id: OrgId, token: &str) -> Self {
        Self {
            org_id,
            subject: Subject::AccessToken(token.to_string()),
            name: format!("AccessToken: {token}"),
            group_ids: BTreeSet::new(),
            is_api_principal: true,
        }
    }

    /// The user id, when the principal is a durable user.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self.subject {
            Subject::User(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the principal belongs to the given group.
    #[must_use]
    pub fn in_group(&self, group: GroupId) -> bool {
        self.group_ids.contains(&group)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Infrastructure errors for the Glimpse core.
///
/// These are store/serialization/input faults, not authentication
/// judgments — a credential that fails to authenticate is expressed
/// through `auth::AuthFailure`, never through this type.
#[derive(Debug, Error)]
pub enum GlimpseError {
    /// A storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input that the caller should have validated.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_principal_has_no_groups() {
        let p = Principal::application(OrgId(1), ApplicationId(7), "Acme BI");
        assert!(p.group_ids.is_empty());
        assert!(p.is_api_principal);
        assert_eq!(p.name, "Application: Acme BI");
        assert_eq!(p.user_id(), None);
    }

    #[test]
    fn user_principal_keeps_groups() {
        let groups: BTreeSet<GroupId> = [GroupId(2), GroupId(9)].into_iter().collect();
        let p = Principal::user(OrgId(1), UserId(4), "Dana", groups);
        assert!(p.in_group(GroupId(9)));
        assert!(!p.in_group(GroupId(3)));
        assert!(!p.is_api_principal);
        assert_eq!(p.user_id(), Some(UserId(4)));
    }

    #[test]
    fn access_token_principal_name() {
        let p = Principal::access_token(OrgId(1), "abc123");
        assert_eq!(p.name, "AccessToken: abc123");
        assert_eq!(p.subject, Subject::AccessToken("abc123".to_string()));
    }
}
