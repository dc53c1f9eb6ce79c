//! # redb-backed Directory Storage
//!
//! A disk-backed [`DirectoryStore`] using the redb embedded database.
//! Entities are postcard-serialized into per-kind tables keyed by id;
//! the lookups the request path hits on every call (user by API key,
//! application by secret key, user by email) get their own index tables
//! so they stay point reads.
//!
//! Ids come from a single `next_id` counter in the metadata table,
//! bumped inside the same write transaction as the insert, so crash
//! recovery can never hand out an id twice.

use crate::directory::{
    Alert, ApiKeyRecord, Application, Dashboard, DirectoryStore, Organization, Query, User,
};
use crate::types::{AlertId, ApplicationId, DashboardId, GlimpseError, OrgId, QueryId, UserId};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Organizations: OrgId(u64) -> serialized Organization bytes
const ORGANIZATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("organizations");

/// Users: UserId(u64) -> serialized User bytes
const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Index: (org id, email) -> UserId(u64)
const USER_EMAIL_INDEX: TableDefinition<(u64, &str), u64> =
    TableDefinition::new("user_email_index");

/// Index: (org id, api key) -> UserId(u64)
const USER_API_KEY_INDEX: TableDefinition<(u64, &str), u64> =
    TableDefinition::new("user_api_key_index");

/// Standalone API keys: (org id, api key) -> serialized ApiKeyRecord bytes
const API_KEYS: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("api_keys");

/// Queries: QueryId(u64) -> serialized Query bytes
const QUERIES: TableDefinition<u64, &[u8]> = TableDefinition::new("queries");

/// Applications: ApplicationId(u64) -> serialized Application bytes
const APPLICATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("applications");

/// Index: (org id, secret key) -> ApplicationId(u64)
const APP_SECRET_INDEX: TableDefinition<(u64, &str), u64> =
    TableDefinition::new("app_secret_index");

/// Dashboards: DashboardId(u64) -> serialized Dashboard bytes
const DASHBOARDS: TableDefinition<u64, &[u8]> = TableDefinition::new("dashboards");

/// Embed links: (application id, dashboard id) -> 1
const APP_DASHBOARDS: TableDefinition<(u64, u64), u8> = TableDefinition::new("app_dashboards");

/// Alerts: AlertId(u64) -> serialized Alert bytes
const ALERTS: TableDefinition<u64, &[u8]> = TableDefinition::new("alerts");

/// Metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn storage_err(e: impl std::fmt::Display) -> GlimpseError {
    GlimpseError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GlimpseError> {
    postcard::to_allocvec(value).map_err(|e| GlimpseError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GlimpseError> {
    postcard::from_bytes(bytes).map_err(|e| GlimpseError::Serialization(e.to_string()))
}

fn bump_next_id(meta: &mut redb::Table<'_, &str, u64>) -> Result<u64, GlimpseError> {
    let current = meta
        .get("next_id")
        .map_err(storage_err)?
        .map(|v| v.value())
        .unwrap_or(0);
    let id = current + 1;
    meta.insert("next_id", id).map_err(storage_err)?;
    Ok(id)
}

/// A disk-backed directory store using redb.
pub struct RedbDirectory {
    db: Database,
}

impl std::fmt::Debug for RedbDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDirectory").finish_non_exhaustive()
    }
}

impl RedbDirectory {
    /// Open or create a directory database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GlimpseError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Create tables upfront so read transactions never race table
        // creation.
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(ORGANIZATIONS).map_err(storage_err)?;
            let _ = write_txn.open_table(USERS).map_err(storage_err)?;
            let _ = write_txn.open_table(USER_EMAIL_INDEX).map_err(storage_err)?;
            let _ = write_txn
                .open_table(USER_API_KEY_INDEX)
                .map_err(storage_err)?;
            let _ = write_txn.open_table(API_KEYS).map_err(storage_err)?;
            let _ = write_txn.open_table(QUERIES).map_err(storage_err)?;
            let _ = write_txn.open_table(APPLICATIONS).map_err(storage_err)?;
            let _ = write_txn.open_table(APP_SECRET_INDEX).map_err(storage_err)?;
            let _ = write_txn.open_table(DASHBOARDS).map_err(storage_err)?;
            let _ = write_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
            let _ = write_txn.open_table(ALERTS).map_err(storage_err)?;
            let _ = write_txn.open_table(METADATA).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        Ok(Self { db })
    }

    fn read_by_id<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
    ) -> Result<Option<T>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(def).map_err(storage_err)?;
        match table.get(id).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
    ) -> Result<Vec<T>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(def).map_err(storage_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, bytes) = entry.map_err(storage_err)?;
            out.push(decode(bytes.value())?);
        }
        Ok(out)
    }

    /// Insert an entity under a freshly assigned id, with extra writes
    /// (index rows) applied in the same transaction.
    fn insert_with<T, F>(
        &self,
        def: TableDefinition<'static, u64, &'static [u8]>,
        mut entity: T,
        assign_id: impl FnOnce(&mut T, u64),
        extra: F,
    ) -> Result<T, GlimpseError>
    where
        T: Serialize,
        F: FnOnce(&redb::WriteTransaction, &T, u64) -> Result<(), GlimpseError>,
    {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let id;
        {
            let mut meta = write_txn.open_table(METADATA).map_err(storage_err)?;
            id = bump_next_id(&mut meta)?;
        }
        assign_id(&mut entity, id);
        {
            let mut table = write_txn.open_table(def).map_err(storage_err)?;
            let bytes = encode(&entity)?;
            table.insert(id, bytes.as_slice()).map_err(storage_err)?;
        }
        extra(&write_txn, &entity, id)?;
        write_txn.commit().map_err(storage_err)?;
        Ok(entity)
    }
}

impl DirectoryStore for RedbDirectory {
    fn organization(&self, org_id: OrgId) -> Result<Option<Organization>, GlimpseError> {
        self.read_by_id(ORGANIZATIONS, org_id.0)
    }

    fn insert_organization(&self, org: Organization) -> Result<Organization, GlimpseError> {
        self.insert_with(ORGANIZATIONS, org, |o, id| o.id = OrgId(id), |_, _, _| Ok(()))
    }

    fn update_organization(&self, org: Organization) -> Result<(), GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(ORGANIZATIONS).map_err(storage_err)?;
            if table.get(org.id.0).map_err(storage_err)?.is_none() {
                return Err(GlimpseError::NotFound(format!(
                    "organization {} does not exist",
                    org.id.0
                )));
            }
            let bytes = encode(&org)?;
            table
                .insert(org.id.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn user(&self, org_id: OrgId, id: UserId) -> Result<Option<User>, GlimpseError> {
        let user: Option<User> = self.read_by_id(USERS, id.0)?;
        Ok(user.filter(|u| u.org_id == org_id))
    }

    fn user_by_email(&self, org_id: OrgId, email: &str) -> Result<Option<User>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let index = read_txn.open_table(USER_EMAIL_INDEX).map_err(storage_err)?;
        let Some(id) = index.get((org_id.0, email)).map_err(storage_err)? else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS).map_err(storage_err)?;
        match users.get(id.value()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn user_by_api_key(&self, org_id: OrgId, api_key: &str) -> Result<Option<User>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let index = read_txn
            .open_table(USER_API_KEY_INDEX)
            .map_err(storage_err)?;
        let Some(id) = index.get((org_id.0, api_key)).map_err(storage_err)? else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS).map_err(storage_err)?;
        match users.get(id.value()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn insert_user(&self, user: User) -> Result<User, GlimpseError> {
        self.insert_with(
            USERS,
            user,
            |u, id| u.id = UserId(id),
            |txn, u, id| {
                let mut emails = txn.open_table(USER_EMAIL_INDEX).map_err(storage_err)?;
                emails
                    .insert((u.org_id.0, u.email.as_str()), id)
                    .map_err(storage_err)?;
                if let Some(key) = u.api_key.as_deref().filter(|k| !k.is_empty()) {
                    let mut keys = txn.open_table(USER_API_KEY_INDEX).map_err(storage_err)?;
                    keys.insert((u.org_id.0, key), id).map_err(storage_err)?;
                }
                Ok(())
            },
        )
    }

    fn update_user(&self, user: User) -> Result<(), GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut users = write_txn.open_table(USERS).map_err(storage_err)?;
            let old: User = match users.get(user.id.0).map_err(storage_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => {
                    return Err(GlimpseError::NotFound(format!(
                        "user {} does not exist",
                        user.id.0
                    )));
                }
            };
            let bytes = encode(&user)?;
            users
                .insert(user.id.0, bytes.as_slice())
                .map_err(storage_err)?;

            if old.email != user.email {
                let mut emails = write_txn.open_table(USER_EMAIL_INDEX).map_err(storage_err)?;
                emails
                    .remove((old.org_id.0, old.email.as_str()))
                    .map_err(storage_err)?;
                emails
                    .insert((user.org_id.0, user.email.as_str()), user.id.0)
                    .map_err(storage_err)?;
            }
            if old.api_key != user.api_key {
                let mut keys = write_txn
                    .open_table(USER_API_KEY_INDEX)
                    .map_err(storage_err)?;
                if let Some(key) = old.api_key.as_deref().filter(|k| !k.is_empty()) {
                    keys.remove((old.org_id.0, key)).map_err(storage_err)?;
                }
                if let Some(key) = user.api_key.as_deref().filter(|k| !k.is_empty()) {
                    keys.insert((user.org_id.0, key), user.id.0)
                        .map_err(storage_err)?;
                }
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn api_key_record(
        &self,
        org_id: OrgId,
        api_key: &str,
    ) -> Result<Option<ApiKeyRecord>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(API_KEYS).map_err(storage_err)?;
        let record: Option<ApiKeyRecord> = match table
            .get((org_id.0, api_key))
            .map_err(storage_err)?
        {
            Some(bytes) => Some(decode(bytes.value())?),
            None => None,
        };
        Ok(record.filter(|r| r.active))
    }

    fn insert_api_key_record(
        &self,
        mut record: ApiKeyRecord,
    ) -> Result<ApiKeyRecord, GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut meta = write_txn.open_table(METADATA).map_err(storage_err)?;
            record.id = bump_next_id(&mut meta)?;
        }
        {
            let mut table = write_txn.open_table(API_KEYS).map_err(storage_err)?;
            let bytes = encode(&record)?;
            table
                .insert((record.org_id.0, record.api_key.as_str()), bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(record)
    }

    fn query(&self, org_id: OrgId, id: QueryId) -> Result<Option<Query>, GlimpseError> {
        let query: Option<Query> = self.read_by_id(QUERIES, id.0)?;
        Ok(query.filter(|q| q.org_id == org_id))
    }

    fn insert_query(&self, query: Query) -> Result<Query, GlimpseError> {
        self.insert_with(QUERIES, query, |q, id| q.id = QueryId(id), |_, _, _| Ok(()))
    }

    fn application(
        &self,
        org_id: OrgId,
        id: ApplicationId,
    ) -> Result<Option<Application>, GlimpseError> {
        let app: Option<Application> = self.read_by_id(APPLICATIONS, id.0)?;
        Ok(app.filter(|a| a.org_id == org_id))
    }

    fn application_by_secret_key(
        &self,
        org_id: OrgId,
        secret_key: &str,
    ) -> Result<Option<Application>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let index = read_txn.open_table(APP_SECRET_INDEX).map_err(storage_err)?;
        let Some(id) = index.get((org_id.0, secret_key)).map_err(storage_err)? else {
            return Ok(None);
        };
        let apps = read_txn.open_table(APPLICATIONS).map_err(storage_err)?;
        match apps.get(id.value()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn application_by_name(
        &self,
        org_id: OrgId,
        name: &str,
    ) -> Result<Option<Application>, GlimpseError> {
        // Uniqueness checks only run on admin mutations; a scan is fine.
        let wanted = name.to_lowercase();
        let apps: Vec<Application> = self.read_all(APPLICATIONS)?;
        Ok(apps
            .into_iter()
            .find(|a| a.org_id == org_id && a.name.to_lowercase() == wanted))
    }

    fn applications(&self, org_id: OrgId) -> Result<Vec<Application>, GlimpseError> {
        let apps: Vec<Application> = self.read_all(APPLICATIONS)?;
        Ok(apps.into_iter().filter(|a| a.org_id == org_id).collect())
    }

    fn insert_application(&self, app: Application) -> Result<Application, GlimpseError> {
        self.insert_with(
            APPLICATIONS,
            app,
            |a, id| a.id = ApplicationId(id),
            |txn, a, id| {
                let mut index = txn.open_table(APP_SECRET_INDEX).map_err(storage_err)?;
                index
                    .insert((a.org_id.0, a.secret_key.as_str()), id)
                    .map_err(storage_err)?;
                Ok(())
            },
        )
    }

    fn update_application(&self, app: Application) -> Result<(), GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut apps = write_txn.open_table(APPLICATIONS).map_err(storage_err)?;
            let old: Application = match apps.get(app.id.0).map_err(storage_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => {
                    return Err(GlimpseError::NotFound(format!(
                        "application {} does not exist",
                        app.id.0
                    )));
                }
            };
            let bytes = encode(&app)?;
            apps.insert(app.id.0, bytes.as_slice())
                .map_err(storage_err)?;

            if old.secret_key != app.secret_key {
                let mut index = write_txn.open_table(APP_SECRET_INDEX).map_err(storage_err)?;
                index
                    .remove((old.org_id.0, old.secret_key.as_str()))
                    .map_err(storage_err)?;
                index
                    .insert((app.org_id.0, app.secret_key.as_str()), app.id.0)
                    .map_err(storage_err)?;
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn delete_application(
        &self,
        org_id: OrgId,
        id: ApplicationId,
    ) -> Result<bool, GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let existed;
        {
            let mut apps = write_txn.open_table(APPLICATIONS).map_err(storage_err)?;
            let old: Option<Application> = match apps.get(id.0).map_err(storage_err)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            match old.filter(|a| a.org_id == org_id) {
                Some(old) => {
                    existed = true;
                    apps.remove(id.0).map_err(storage_err)?;
                    let mut index =
                        write_txn.open_table(APP_SECRET_INDEX).map_err(storage_err)?;
                    index
                        .remove((old.org_id.0, old.secret_key.as_str()))
                        .map_err(storage_err)?;

                    let mut links = write_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
                    let stale: Vec<(u64, u64)> = {
                        let mut keys = Vec::new();
                        for entry in links
                            .range((id.0, 0)..=(id.0, u64::MAX))
                            .map_err(storage_err)?
                        {
                            let (key, _) = entry.map_err(storage_err)?;
                            keys.push(key.value());
                        }
                        keys
                    };
                    for key in stale {
                        links.remove(key).map_err(storage_err)?;
                    }
                }
                None => existed = false,
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(existed)
    }

    fn link_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<(), GlimpseError> {
        if self.application(org_id, app_id)?.is_none() {
            return Err(GlimpseError::NotFound(format!(
                "application {} does not exist",
                app_id.0
            )));
        }
        if self.dashboard(org_id, dashboard_id)?.is_none() {
            return Err(GlimpseError::NotFound(format!(
                "dashboard {} does not exist",
                dashboard_id.0
            )));
        }

        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut links = write_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
            links
                .insert((app_id.0, dashboard_id.0), 1)
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn unlink_dashboard(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError> {
        if self.application(org_id, app_id)?.is_none() {
            return Ok(false);
        }
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let removed;
        {
            let mut links = write_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
            removed = links
                .remove((app_id.0, dashboard_id.0))
                .map_err(storage_err)?
                .is_some();
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(removed)
    }

    fn is_dashboard_linked(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
        dashboard_id: DashboardId,
    ) -> Result<bool, GlimpseError> {
        if self.application(org_id, app_id)?.is_none() {
            return Ok(false);
        }
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let links = read_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
        Ok(links
            .get((app_id.0, dashboard_id.0))
            .map_err(storage_err)?
            .is_some())
    }

    fn application_dashboards(
        &self,
        org_id: OrgId,
        app_id: ApplicationId,
    ) -> Result<Vec<Dashboard>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let links = read_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
        let dashboards = read_txn.open_table(DASHBOARDS).map_err(storage_err)?;

        let mut out = Vec::new();
        for entry in links
            .range((app_id.0, 0)..=(app_id.0, u64::MAX))
            .map_err(storage_err)?
        {
            let (key, _) = entry.map_err(storage_err)?;
            let (_, dashboard_id) = key.value();
            if let Some(bytes) = dashboards.get(dashboard_id).map_err(storage_err)? {
                let dashboard: Dashboard = decode(bytes.value())?;
                if dashboard.org_id == org_id {
                    out.push(dashboard);
                }
            }
        }
        Ok(out)
    }

    fn dashboard_applications(
        &self,
        org_id: OrgId,
        dashboard_id: DashboardId,
    ) -> Result<Vec<Application>, GlimpseError> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let links = read_txn.open_table(APP_DASHBOARDS).map_err(storage_err)?;
        let apps = read_txn.open_table(APPLICATIONS).map_err(storage_err)?;

        let mut out = Vec::new();
        for entry in links.iter().map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            let (app_id, linked_dashboard) = key.value();
            if linked_dashboard != dashboard_id.0 {
                continue;
            }
            if let Some(bytes) = apps.get(app_id).map_err(storage_err)? {
                let app: Application = decode(bytes.value())?;
                if app.org_id == org_id {
                    out.push(app);
                }
            }
        }
        Ok(out)
    }

    fn dashboard(
        &self,
        org_id: OrgId,
        id: DashboardId,
    ) -> Result<Option<Dashboard>, GlimpseError> {
        let dashboard: Option<Dashboard> = self.read_by_id(DASHBOARDS, id.0)?;
        Ok(dashboard.filter(|d| d.org_id == org_id))
    }

    fn dashboards(&self, org_id: OrgId) -> Result<Vec<Dashboard>, GlimpseError> {
        let dashboards: Vec<Dashboard> = self.read_all(DASHBOARDS)?;
        Ok(dashboards
            .into_iter()
            .filter(|d| d.org_id == org_id)
            .collect())
    }

    fn insert_dashboard(&self, dashboard: Dashboard) -> Result<Dashboard, GlimpseError> {
        self.insert_with(
            DASHBOARDS,
            dashboard,
            |d, id| d.id = DashboardId(id),
            |_, _, _| Ok(()),
        )
    }

    fn alert(&self, org_id: OrgId, id: AlertId) -> Result<Option<Alert>, GlimpseError> {
        let alert: Option<Alert> = self.read_by_id(ALERTS, id.0)?;
        Ok(alert.filter(|a| a.org_id == org_id))
    }

    fn alerts(&self, org_id: OrgId) -> Result<Vec<Alert>, GlimpseError> {
        let alerts: Vec<Alert> = self.read_all(ALERTS)?;
        Ok(alerts.into_iter().filter(|a| a.org_id == org_id).collect())
    }

    fn insert_alert(&self, alert: Alert) -> Result<Alert, GlimpseError> {
        self.insert_with(ALERTS, alert, |a, id| a.id = AlertId(id), |_, _, _| Ok(()))
    }

    fn update_alert(&self, alert: Alert) -> Result<(), GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn.open_table(ALERTS).map_err(storage_err)?;
            if table.get(alert.id.0).map_err(storage_err)?.is_none() {
                return Err(GlimpseError::NotFound(format!(
                    "alert {} does not exist",
                    alert.id.0
                )));
            }
            let bytes = encode(&alert)?;
            table
                .insert(alert.id.0, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn delete_alert(&self, org_id: OrgId, id: AlertId) -> Result<bool, GlimpseError> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let existed;
        {
            let mut table = write_txn.open_table(ALERTS).map_err(storage_err)?;
            let old: Option<Alert> = match table.get(id.0).map_err(storage_err)? {
                Some(bytes) => Some(decode(bytes.value())?),
                None => None,
            };
            if old.is_some_and(|a| a.org_id == org_id) {
                existed = true;
                table.remove(id.0).map_err(storage_err)?;
            } else {
                existed = false;
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::OrgSettings;
    use crate::types::GroupId;
    use std::collections::BTreeSet;

    fn open_store(dir: &tempfile::TempDir) -> RedbDirectory {
        RedbDirectory::open(dir.path().join("directory.redb")).expect("open store")
    }

    fn seed_org(store: &RedbDirectory) -> Organization {
        store
            .insert_organization(Organization {
                id: OrgId(0),
                name: "Acme".to_string(),
                slug: "acme".to_string(),
                default_group_id: GroupId(1),
                admin_group_id: GroupId(2),
                settings: OrgSettings::default(),
            })
            .expect("insert org")
    }

    fn seed_user(store: &RedbDirectory, org: OrgId, email: &str, api_key: &str) -> User {
        store
            .insert_user(User {
                id: UserId(0),
                org_id: org,
                name: email.to_string(),
                email: email.to_string(),
                api_key: Some(api_key.to_string()),
                group_ids: BTreeSet::new(),
                is_disabled: false,
                is_invitation_pending: false,
                created_at: 0,
            })
            .expect("insert user")
    }

    #[test]
    fn entities_survive_reopen() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let org_id;
        let user_id;
        {
            let store = open_store(&dir);
            let org = seed_org(&store);
            let user = seed_user(&store, org.id, "a@acme.test", "key-a");
            org_id = org.id;
            user_id = user.id;
        }

        let store = open_store(&dir);
        let user = store
            .user(org_id, user_id)
            .expect("lookup")
            .expect("user persisted");
        assert_eq!(user.email, "a@acme.test");
        assert_eq!(
            store
                .user_by_api_key(org_id, "key-a")
                .expect("lookup")
                .map(|u| u.id),
            Some(user_id)
        );

        // The id counter picked up where it left off.
        let next = seed_user(&store, org_id, "b@acme.test", "key-b");
        assert!(next.id.0 > user_id.0);
    }

    #[test]
    fn user_indexes_follow_updates() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let org = seed_org(&store);
        let mut user = seed_user(&store, org.id, "old@acme.test", "old-key");

        user.email = "new@acme.test".to_string();
        user.api_key = Some("new-key".to_string());
        store.update_user(user.clone()).expect("update");

        assert!(store.user_by_email(org.id, "old@acme.test").expect("lookup").is_none());
        assert!(store.user_by_api_key(org.id, "old-key").expect("lookup").is_none());
        assert_eq!(
            store
                .user_by_email(org.id, "new@acme.test")
                .expect("lookup")
                .map(|u| u.id),
            Some(user.id)
        );
        assert_eq!(
            store
                .user_by_api_key(org.id, "new-key")
                .expect("lookup")
                .map(|u| u.id),
            Some(user.id)
        );
    }

    #[test]
    fn secret_key_index_follows_regeneration() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let org = seed_org(&store);
        let mut app = store
            .insert_application(Application {
                id: ApplicationId(0),
                org_id: org.id,
                name: "Portal".to_string(),
                description: None,
                icon_url: None,
                secret_key: "sk-old".to_string(),
                secret_token: "tok".to_string(),
                active: true,
                created_by: None,
                created_at: 0,
            })
            .expect("insert app");

        app.secret_key = "sk-new".to_string();
        store.update_application(app.clone()).expect("update");

        assert!(
            store
                .application_by_secret_key(org.id, "sk-old")
                .expect("lookup")
                .is_none()
        );
        assert_eq!(
            store
                .application_by_secret_key(org.id, "sk-new")
                .expect("lookup")
                .map(|a| a.id),
            Some(app.id)
        );
    }

    #[test]
    fn delete_application_cascades_links() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let org = seed_org(&store);
        let app = store
            .insert_application(Application {
                id: ApplicationId(0),
                org_id: org.id,
                name: "Portal".to_string(),
                description: None,
                icon_url: None,
                secret_key: "sk".to_string(),
                secret_token: "tok".to_string(),
                active: true,
                created_by: None,
                created_at: 0,
            })
            .expect("insert app");
        let dashboard = store
            .insert_dashboard(Dashboard {
                id: DashboardId(0),
                org_id: org.id,
                name: "Revenue".to_string(),
                user_id: UserId(1),
                is_archived: false,
                is_draft: false,
                created_at: 0,
            })
            .expect("insert dashboard");

        store
            .link_dashboard(org.id, app.id, dashboard.id)
            .expect("link");
        assert!(
            store
                .is_dashboard_linked(org.id, app.id, dashboard.id)
                .expect("lookup")
        );

        assert!(store.delete_application(org.id, app.id).expect("delete"));
        assert!(
            store
                .dashboard_applications(org.id, dashboard.id)
                .expect("lookup")
                .is_empty()
        );
        assert!(
            store
                .application_by_secret_key(org.id, "sk")
                .expect("lookup")
                .is_none()
        );
    }

    #[test]
    fn cross_org_reads_come_back_empty() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = open_store(&dir);
        let acme = seed_org(&store);
        let other = store
            .insert_organization(Organization {
                id: OrgId(0),
                name: "Other".to_string(),
                slug: "other".to_string(),
                default_group_id: GroupId(1),
                admin_group_id: GroupId(2),
                settings: OrgSettings::default(),
            })
            .expect("insert org");
        let user = seed_user(&store, acme.id, "a@acme.test", "key-a");

        assert!(store.user(other.id, user.id).expect("lookup").is_none());
        assert!(store.user_by_api_key(other.id, "key-a").expect("lookup").is_none());
    }
}
