//! # Directory
//!
//! The tenant directory: organizations and the entities requests get
//! authenticated against. [`DirectoryStore`] is the lookup surface the
//! resolver and the HTTP handlers share; [`Directory`] is the in-memory
//! implementation used by tests and by `init`-less dev servers. The
//! persistent implementation lives in [`crate::storage`].
//!
//! Every lookup is org-scoped. A credential minted in one organization
//! must never resolve inside another, so the `org_id` parameter is part
//! of the key on every method rather than a filter applied afterwards.

use crate::types::{AlertId, ApplicationId, DashboardId, GlimpseError, GroupId, OrgId, QueryId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

// =============================================================================
// ENTITIES
// =============================================================================

/// Per-organization authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgSettings {
    /// Seconds an embed timestamp may deviate from server time, and the
    /// TTL of access tokens minted for embeds.
    pub embed_window_secs: i64,
    pub jwt_login_enabled: bool,
    pub jwt_auth_issuer: String,
    pub jwt_auth_audience: String,
    pub jwt_auth_algorithms: Vec<String>,
    pub jwt_auth_cookie_name: String,
    pub jwt_auth_header_name: String,
    pub jwt_auth_public_certs_url: String,
}

impl Default for OrgSettings {
    fn default() -> Self {
        Self {
            embed_window_secs: crate::primitives::DEFAULT_EMBED_WINDOW_SECS,
            jwt_login_enabled: false,
            jwt_auth_issuer: String::new(),
            jwt_auth_audience: String::new(),
            jwt_auth_algorithms: vec![
                "HS256".to_string(),
                "RS256".to_string(),
                "ES256".to_string(),
            ],
            jwt_auth_cookie_name: String::new(),
            jwt_auth_header_name: String::new(),
            jwt_auth_public_certs_url: String::new(),
        }
    }
}

/// A tenant. Groups are opaque ids carried on users; the two
/// distinguished ones (default membership, admin) live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    pub slug: String,
    pub default_group_id: GroupId,
    pub admin_group_id: GroupId,
    pub settings: OrgSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub org_id: OrgId,
    pub name: String,
    pub email: String,
    /// Personal API key; `None` until one is issued.
    pub api_key: Option<String>,
    pub group_ids: BTreeSet<GroupId>,
    pub is_disabled: bool,
    pub is_invitation_pending: bool,
    pub created_at: i64,
}

/// A standalone API key bound to some object (e.g. a public dashboard
/// share link). Not tied to a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: u64,
    pub org_id: OrgId,
    pub api_key: String,
    pub active: bool,
    pub object_type: String,
    pub object_id: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub org_id: OrgId,
    pub name: String,
    /// Result-access key for this query's signed and keyed links.
    pub api_key: Option<String>,
    /// Groups allowed to read this query's results.
    pub group_ids: BTreeSet<GroupId>,
    pub user_id: UserId,
    pub created_at: i64,
}

/// An external application registered for dashboard embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub org_id: OrgId,
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    /// Public identifier the application sends in embed URLs.
    pub secret_key: String,
    /// Private HMAC key the application signs embed URLs with.
    pub secret_token: String,
    pub active: bool,
    pub created_by: Option<UserId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: DashboardId,
    pub org_id: OrgId,
    pub name: String,
    pub user_id: UserId,
    pub is_archived: bool,
    pub is_draft: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Unknown,
    Ok,
    Triggered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub org_id: OrgId,
    pub name: String,
    pub query_id: QueryId,
    pub user_id: UserId,
    pub state: AlertState,
    pub muted: bool,
    /// Seconds between re-notifications; `None` notifies once per trigger.
    pub rearm: Option<i64>,
    /// Trigger condition as opaque JSON text.
    pub options_json: String,
    pub created_at: i64,
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Lookup and mutation surface over the tenant directory.
///
/// Inserts assign the entity id themselves and return the stored value;
/// the id on the passed entity is ignored. Updates match on id and fail
/// with [`GlimpseError::NotFound`] when the entity is gone. Methods take
/// `&self`; implementations handle their own interior locking.
pub trait DirectoryStore: Send + Sync {
    fn organization(&self, org_id: OrgId) -> Result<Option<Organization>, GlimpseError>;
    fn insert_organization(&self, org: Organization) -> Result<Organization, GlimpseError>;
    fn update_organization(&self, org: Organization) -> Result<(), GlimpseError>;

    fn user(&self, org_id: OrgId, id: UserId) -> Result<Option<User>, GlimpseError>;
    fn user_by_email(&self, org_id: OrgId, email: &str) -> Result<Option<User>, GlimpseError>;
    fn user_by_api_key(&self, org_id: OrgId, api_key: &str) -> Result<Option<User>, GlimpseError>;
    fn insert_user(&self, user: User) -> Result<User, GlimpseError>;
    fn update_user(&self, user: User) -> Result<(), GlimpseError>;

    /// Look up an **active** standalone key record. Inactive records are
    /// treated as nonexistent.
    fn api_key_record(
        &self,
        org_id: OrgId,
        api_key: &str,
    ) -> Result<Option<ApiKeyRecord>, GlimpseError>;
    fn insert_api_key_record(&self, record: ApiKeyRecord)
    -> Result<ApiKeyRecord, GlimpseError>;

    fn query(&self, org_id: OrgId, id: QueryId) -> Result<Option<Query>, GlimpseError>;
    fn insert_query(&self, query: Query) -> Result<Query, GlimpseError>;

    fn application(
        &self,
        org_id: OrgId,
        id: ApplicationId,
    ) -> Result<Option<Application>, GlimpseError>;
    /// Inactive applications are returned too; the embed flow reports
    /// them differently from unknown ones.
    fn application_by_secret_key(
        &self,
        org_id: OrgId,
        secret_key: &str,
    ) -> Result<Option<Application>, GlimpseError>;
    /// Case-insensitive name lookup, for uniqueness checks.
    fn application_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<Application>, GlimpseError>;
    fn applications(&self, org_id: OrgId) -> Result<Vec<Application>, GlimpseError>;
    fn insert_application(&self, app: Application) -> Result<Application, GlimpseError>;
    fn update_application(&self, app: Application) -> Result<(), GlimpseError>;
    /// Removes the application and all of its dashboard links.
    fn delete_application(&self, org_id: OrgId, id: ApplicationId)
    -> Result<bool, GlimpseError>;

    /// Idempotent; both sides must exist in `org_id`.
    fn link_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<(), GlimpseError>;
    fn unlink_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError>;
    fn is_dashboard_linked(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError>;
    fn application_dashboards(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
    ) -> Result<Vec<Dashboard>, GlimpseError>;
    fn dashboard_applications(
        &self,
        org_id: OrgId,
        dashboard_id: DashboardId,
    ) -> Result<Vec<Application>, GlimpseError>;

    fn dashboard(
        &self,
        org_id: OrgId,
        id: DashboardId,
    ) -> Result<Option<Dashboard>, GlimpseError>;
    fn dashboards(&self, org_id: OrgId) -> Result<Vec<Dashboard>, GlimpseError>;
    fn insert_dashboard(&self, dashboard: Dashboard) -> Result<Dashboard, GlimpseError>;

    fn alert(&self, org_id: OrgId, id: AlertId) -> Result<Option<Alert>, GlimpseError>;
    fn alerts(&self, org_id: OrgId) -> Result<Vec<Alert>, GlimpseError>;
    fn insert_alert(&self, alert: Alert) -> Result<Alert, GlimpseError>;
    fn update_alert(&self, alert: Alert) -> Result<(), GlimpseError>;
    fn delete_alert(&self, org_id: OrgId, id: AlertId) -> Result<bool, GlimpseError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct DirectoryInner {
    organizations: BTreeMap<u64, Organization>,
    users: BTreeMap<u64, User>,
    api_keys: BTreeMap<u64, ApiKeyRecord>,
    queries: BTreeMap<u64, Query>,
    applications: BTreeMap<u64, Application>,
    dashboards: BTreeMap<u64, Dashboard>,
    alerts: BTreeMap<u64, Alert>,
    /// `(application id, dashboard id)` link pairs.
    app_dashboards: BTreeSet<(u64, u64)>,
    next_id: u64,
}

impl DirectoryInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`DirectoryStore`]. Ids are assigned from a single
/// monotonic counter shared by all entity kinds.
#[derive(Debug, Default)]
pub struct Directory {
    inner: Mutex<DirectoryInner>,
}

impl Directory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DirectoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn scoped<T: Clone>(entity: Option<&T>, org_id: OrgId, entity_org: impl Fn(&T) -> OrgId) -> Option<T> {
    entity.filter(|e| entity_org(e) == org_id).cloned()
}

impl DirectoryStore for Directory {
    fn organization(&self, org_id: OrgId) -> Result<Option<Organization>, GlimpseError> {
        Ok(self.lock().organizations.get(&org_id.0).cloned())
    }

    fn insert_organization(&self, mut org: Organization) -> Result<Organization, GlimpseError> {
        let mut inner = self.lock();
        org.id = OrgId(inner.next_id());
        inner.organizations.insert(org.id.0, org.clone());
        Ok(org)
    }

    fn update_organization(&self, org: Organization) -> Result<(), GlimpseError> {
        let mut inner = self.lock();
        match inner.organizations.get_mut(&org.id.0) {
            Some(slot) => {
                *slot = org;
                Ok(())
            }
            None => Err(GlimpseError::NotFound(format!(
                "organization {} does not exist",
                org.id.0
            ))),
        }
    }

    fn user(&self, org_id: OrgId, id: UserId) -> Result<Option<User>, GlimpseError> {
        Ok(scoped(self.lock().users.get(&id.0), org_id, |u| u.org_id))
    }

    fn user_by_email(&self, org_id: OrgId, email: &str) -> Result<Option<User>, GlimpseError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.org_id == org_id && u.email == email)
            .cloned())
    }

    fn user_by_api_key(&self, org_id: OrgId, api_key: &str) -> Result<Option<User>, GlimpseError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.org_id == org_id && u.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    fn insert_user(&self, mut user: User) -> Result<User, GlimpseError> {
        let mut inner = self.lock();
        user.id = UserId(inner.next_id());
        inner.users.insert(user.id.0, user.clone());
        Ok(user)
    }

    fn update_user(&self, user: User) -> Result<(), GlimpseError> {
        let mut inner = self.lock();
        match inner.users.get_mut(&user.id.0) {
            Some(slot) => {
                *slot = user;
                Ok(())
            }
            None => Err(GlimpseError::NotFound(format!(
                "user {} does not exist",
                user.id.0
            ))),
        }
    }

    fn api_key_record(
        &self,
        org_id: OrgId,
        api_key: &str,
    ) -> Result<Option<ApiKeyRecord>, GlimpseError> {
        Ok(self
            .lock()
            .api_keys
            .values()
            .find(|r| r.org_id == org_id && r.active && r.api_key == api_key)
            .cloned())
    }

    fn insert_api_key_record(
        &self,
        mut record: ApiKeyRecord,
    ) -> Result<ApiKeyRecord, GlimpseError> {
        let mut inner = self.lock();
        record.id = inner.next_id();
        inner.api_keys.insert(record.id, record.clone());
        Ok(record)
    }

    fn query(&self, org_id: OrgId, id: QueryId) -> Result<Option<Query>, GlimpseError> {
        Ok(scoped(self.lock().queries.get(&id.0), org_id, |q| q.org_id))
    }

    fn insert_query(&self, mut query: Query) -> Result<Query, GlimpseError> {
        let mut inner = self.lock();
        query.id = QueryId(inner.next_id());
        inner.queries.insert(query.id.0, query.clone());
        Ok(query)
    }

    fn application(
        &self,
        org_id: OrgId,
        id: ApplicationId,
    ) -> Result<Option<Application>, GlimpseError> {
        Ok(scoped(self.lock().applications.get(&id.0), org_id, |a| a.org_id))
    }

    fn application_by_secret_key(
        &self,
        org_id: OrgId,
        secret_key: &str,
    ) -> Result<Option<Application>, GlimpseError> {
        Ok(self
            .lock()
            .applications
            .values()
            .find(|a| a.org_id == org_id && a.secret_key == secret_key)
            .cloned())
    }

    fn application_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<Application>, GlimpseError> {
        let wanted = name.to_lowercase();
        Ok(self
            .lock()
            .applications
            .values()
            .find(|a| a.org_id == org_id && a.name.to_lowercase() == wanted)
            .cloned())
    }

    fn applications(&self, org_id: OrgId) -> Result<Vec<Application>, GlimpseError> {
        Ok(self
            .lock()
            .applications
            .values()
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect())
    }

    fn insert_application(&self, mut app: Application) -> Result<Application, GlimpseError> {
        let mut inner = self.lock();
        app.id = ApplicationId(inner.next_id());
        inner.applications.insert(app.id.0, app.clone());
        Ok(app)
    }

    fn update_application(&self, app: Application) -> Result<(), GlimpseError> {
        let mut inner = self.lock();
        match inner.applications.get_mut(&app.id.0) {
            Some(slot) => {
                *slot = app;
                Ok(())
            }
            None => Err(GlimpseError::NotFound(format!(
                "application {} does not exist",
                app.id.0
            ))),
        }
    }

    fn delete_application(
        &self,
        org_id: OrgId,
        id: ApplicationId,
    ) -> Result<bool, GlimpseError> {
        let mut inner = self.lock();
        let existed = inner
            .applications
            .get(&id.0)
            .is_some_and(|a| a.org_id == org_id);
        if existed {
            inner.applications.remove(&id.0);
            inner.app_dashboards.retain(|(app, _)| *app != id.0);
        }
        Ok(existed)
    }

    fn link_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<(), GlimpseError> {
        let mut inner = self.lock();
        let app_ok = inner
            .applications
            .get(&app_id.0)
            .is_some_and(|a| a.org_id == org_id);
        let dash_ok = inner
            .dashboards
            .get(&dashboard_id.0)
            .is_some_and(|d| d.org_id == org_id);
        if !app_ok {
            return Err(GlimpseError::NotFound(format!(
                "application {} does not exist",
                app_id.0
            )));
        }
        if !dash_ok {
            return Err(GlimpseError::NotFound(format!(
                "dashboard {} does not exist",
                dashboard_id.0
            )));
        }
        inner.app_dashboards.insert((app_id.0, dashboard_id.0));
        Ok(())
    }

    fn unlink_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError> {
        let mut inner = self.lock();
        let app_ok = inner
            .applications
            .get(&app_id.0)
            .is_some_and(|a| a.org_id == org_id);
        if !app_ok {
            return Ok(false);
        }
        Ok(inner.app_dashboards.remove(&(app_id.0, dashboard_id.0)))
    }

    fn is_dashboard_linked(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError> {
        let inner = self.lock();
        let app_ok = inner
            .applications
            .get(&app_id.0)
            .is_some_and(|a| a.org_id == org_id);
        Ok(app_ok && inner.app_dashboards.contains(&(app_id.0, dashboard_id.0)))
    }

    fn application_dashboards(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
    ) -> Result<Vec<Dashboard>, GlimpseError> {
        let inner = self.lock();
        Ok(inner
            .app_dashboards
            .iter()
            .filter(|(app, _)| *app == app_id.0)
            .filter_map(|(_, dash)| inner.dashboards.get(dash))
            .filter(|d| d.org_id == org_id)
            .cloned()
            .collect())
    }

    fn dashboard_applications(
        &self,
        org_id: OrgId,
        dashboard_id: DashboardId,
    ) -> Result<Vec<Application>, GlimpseError> {
        let inner = self.lock();
        Ok(inner
            .app_dashboards
            .iter()
            .filter(|(_, dash)| *dash == dashboard_id.0)
            .filter_map(|(app, _)| inner.applications.get(app))
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect())
    }

    fn dashboard(
        &self,
        org_id: OrgId,
        id: DashboardId,
    ) -> Result<Option<Dashboard>, GlimpseError> {
        Ok(scoped(self.lock().dashboards.get(&id.0), org_id, |d| d.org_id))
    }

    fn dashboards(&self, org_id: OrgId) -> Result<Vec<Dashboard>, GlimpseError> {
        Ok(self
            .lock()
            .dashboards
            .values()
            .filter(|d| d.org_id == org_id)
            .cloned()
            .collect())
    }

    fn insert_dashboard(&self, mut dashboard: Dashboard) -> Result<Dashboard, GlimpseError> {
        let mut inner = self.lock();
        dashboard.id = DashboardId(inner.next_id());
        inner.dashboards.insert(dashboard.id.0, dashboard.clone());
        Ok(dashboard)
    }

    fn alert(&self, org_id: OrgId, id: AlertId) -> Result<Option<Alert>, GlimpseError> {
        Ok(scoped(self.lock().alerts.get(&id.0), org_id, |a| a.org_id))
    }

    fn alerts(&self, org_id: OrgId) -> Result<Vec<Alert>, GlimpseError> {
        Ok(self
            .lock()
            .alerts
            .values()
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect())
    }

    fn insert_alert(&self, mut alert: Alert) -> Result<Alert, GlimpseError> {
        let mut inner = self.lock();
        alert.id = AlertId(inner.next_id());
        inner.alerts.insert(alert.id.0, alert.clone());
        Ok(alert)
    }

    fn update_alert(&self, alert: Alert) -> Result<(), GlimpseError> {
        let mut inner = self.lock();
        match inner.alerts.get_mut(&alert.id.0) {
            Some(slot) => {
                *slot = alert;
                Ok(())
            }
            None => Err(GlimpseError::NotFound(format!(
                "alert {} does not exist",
                alert.id.0
            ))),
        }
    }

    fn delete_alert(&self, org_id: OrgId, id: AlertId) -> Result<bool, GlimpseError> {
        let mut inner = self.lock();
        let existed = inner.alerts.get(&id.0).is_some_and(|a| a.org_id == org_id);
        if existed {
            inner.alerts.remove(&id.0);
        }
        Ok(existed)
    }
}
