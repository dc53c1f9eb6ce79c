//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api::{self, AppState, DEFAULT_ORG_ID};
use crate::config::ServerConfig;
use glimpse_core::{
    Application, ApplicationId, Clock, DirectoryStore, GlimpseError, GroupId, OrgSettings,
    Organization, RedbDirectory, SystemClock, User, UserId, embed_signature, generate_token,
    primitives::{APPLICATION_SECRET_KEY_BYTES, APPLICATION_SECRET_TOKEN_BYTES},
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Bytes of entropy in a user API key.
const USER_API_KEY_BYTES: usize = 20;

fn open_directory(config: &ServerConfig) -> Result<Arc<RedbDirectory>, GlimpseError> {
    Ok(Arc::new(RedbDirectory::open(&config.database)?))
}

fn load_org(directory: &dyn DirectoryStore) -> Result<Organization, GlimpseError> {
    directory.organization(DEFAULT_ORG_ID)?.ok_or_else(|| {
        GlimpseError::NotFound("No organization found. Run `glimpse init` first.".to_string())
    })
}

// =============================================================================
// SERVE COMMAND
// =============================================================================

/// Start the HTTP gateway.
pub async fn cmd_serve(config: ServerConfig) -> Result<(), GlimpseError> {
    let directory = open_directory(&config)?;
    if directory.organization(DEFAULT_ORG_ID)?.is_none() {
        tracing::warn!("directory has no organization; run `glimpse init` before serving traffic");
    }
    if config.cookie_secret.is_empty() {
        tracing::warn!("cookie secret is empty; session cookies are disabled");
    }

    println!("Glimpse BI Embed Gateway Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.host);
    println!("  Port:     {}", config.port);
    println!("  Database: {:?}", config.database);
    println!();
    println!("Endpoints:");
    println!("  GET  /embed/dashboard/{{id}}  - Signed dashboard embed");
    println!("  GET  /public/dashboards/{{t}} - Share-link dashboard");
    println!("  *    /api/applications      - Application management");
    println!("  *    /api/alerts            - Alert management");
    println!("  GET  /api/queries/{{id}}/results - Query results");
    println!("  GET  /api/session           - Current principal");
    println!("  GET  /health                - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(
        directory,
        Arc::new(SystemClock),
        &config.cookie_secret,
        config.session_lifetime_secs,
    );
    api::run_server(&config, state).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize the directory: one organization, one admin user.
pub fn cmd_init(
    config: &ServerConfig,
    org_name: &str,
    admin_email: &str,
    force: bool,
    json_mode: bool,
) -> Result<(), GlimpseError> {
    let directory = open_directory(config)?;

    let existing = directory.organization(DEFAULT_ORG_ID)?;
    if existing.is_some() && !force {
        return Err(GlimpseError::InvalidInput(
            "Directory is already initialized (use --force to overwrite the organization)"
                .to_string(),
        ));
    }

    let slug = org_name
        .trim()
        .to_lowercase()
        .replace(|c: char| !c.is_ascii_alphanumeric(), "-");
    let org = Organization {
        id: DEFAULT_ORG_ID,
        name: org_name.trim().to_string(),
        slug,
        default_group_id: GroupId(2),
        admin_group_id: GroupId(1),
        settings: OrgSettings::default(),
    };

    let org = if existing.is_some() {
        directory.update_organization(org.clone())?;
        org
    } else {
        directory.insert_organization(org)?
    };

    let api_key = generate_token(USER_API_KEY_BYTES);
    let admin = directory.insert_user(User {
        id: UserId(0),
        org_id: org.id,
        name: "Admin".to_string(),
        email: admin_email.trim().to_lowercase(),
        api_key: Some(api_key.clone()),
        group_ids: BTreeSet::from([org.admin_group_id, org.default_group_id]),
        is_disabled: false,
        is_invitation_pending: false,
        created_at: SystemClock.now_unix(),
    })?;

    if json_mode {
        let output = serde_json::json!({
            "organization": { "id": org.id.0, "name": org.name, "slug": org.slug },
            "admin": { "id": admin.id.0, "email": admin.email, "api_key": api_key }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Glimpse Directory Initialized");
    println!("=============================");
    println!("Organization: {} (slug: {})", org.name, org.slug);
    println!("Admin user:   {} (id {})", admin.email, admin.id.0);
    println!("Admin API key: {api_key}");
    println!();
    println!("Keep the API key safe; it authenticates as the admin.");

    Ok(())
}

// =============================================================================
// APP COMMANDS
// =============================================================================

/// Register an application and print its credentials. This is the one
/// place outside the create/regenerate API responses where the secret
/// token is shown in the clear.
pub fn cmd_app_create(
    config: &ServerConfig,
    name: &str,
    json_mode: bool,
) -> Result<(), GlimpseError> {
    let directory = open_directory(config)?;
    let org = load_org(directory.as_ref())?;

    if directory.application_by_name(org.id, name.trim())?.is_some() {
        return Err(GlimpseError::InvalidInput("Name already taken".to_string()));
    }

    let app = directory.insert_application(Application {
        id: ApplicationId(0),
        org_id: org.id,
        name: name.trim().to_string(),
        description: None,
        icon_url: None,
        secret_key: generate_token(APPLICATION_SECRET_KEY_BYTES),
        secret_token: generate_token(APPLICATION_SECRET_TOKEN_BYTES),
        active: true,
        created_by: None,
        created_at: SystemClock.now_unix(),
    })?;

    if json_mode {
        let output = serde_json::json!({
            "id": app.id.0,
            "name": app.name,
            "secret_key": app.secret_key,
            "secret_token": app.secret_token
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Application Created");
    println!("===================");
    println!("Id:           {}", app.id.0);
    println!("Name:         {}", app.name);
    println!("Secret key:   {}", app.secret_key);
    println!("Secret token: {}", app.secret_token);

    Ok(())
}

/// List applications with masked tokens.
pub fn cmd_app_list(config: &ServerConfig, json_mode: bool) -> Result<(), GlimpseError> {
    let directory = open_directory(config)?;
    let org = load_org(directory.as_ref())?;
    let apps = directory.applications(org.id)?;

    if json_mode {
        let output: Vec<_> = apps
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id.0,
                    "name": a.name,
                    "active": a.active,
                    "secret_key": a.secret_key
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Applications ({})", apps.len());
    println!("================");
    for app in &apps {
        let state = if app.active { "active" } else { "inactive" };
        println!(
            "  {:>4}  {:<30}  {}  key={}",
            app.id.0, app.name, state, app.secret_key
        );
    }

    Ok(())
}

/// Rotate an application's secret token and print the new one.
pub fn cmd_app_regenerate(
    config: &ServerConfig,
    id: u64,
    json_mode: bool,
) -> Result<(), GlimpseError> {
    let directory = open_directory(config)?;
    let org = load_org(directory.as_ref())?;

    let mut app = directory
        .application(org.id, ApplicationId(id))?
        .ok_or_else(|| GlimpseError::NotFound(format!("Application {id} not found")))?;
    app.secret_token = generate_token(APPLICATION_SECRET_TOKEN_BYTES);
    directory.update_application(app.clone())?;

    if json_mode {
        let output = serde_json::json!({
            "id": app.id.0,
            "name": app.name,
            "secret_token": app.secret_token
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Secret Token Regenerated");
    println!("========================");
    println!("Application:  {} (id {})", app.name, app.id.0);
    println!("Secret token: {}", app.secret_token);

    Ok(())
}

// =============================================================================
// SIGN COMMAND
// =============================================================================

/// Sign an embed URL the way a client application would, for manual
/// testing with curl.
pub fn cmd_sign_embed_url(
    url: &str,
    secret_token: &str,
    timestamp: Option<i64>,
    json_mode: bool,
) -> Result<(), GlimpseError> {
    let timestamp = timestamp.unwrap_or_else(|| SystemClock.now_unix());
    let separator = if url.contains('?') { '&' } else { '?' };
    let stamped = format!("{url}{separator}timestamp={timestamp}");

    let signature = embed_signature(secret_token, &stamped, timestamp).ok_or_else(|| {
        GlimpseError::InvalidInput("Cannot sign an empty secret token".to_string())
    })?;
    let signed = format!("{stamped}&signature={signature}");

    if json_mode {
        let output = serde_json::json!({
            "url": signed,
            "timestamp": timestamp,
            "signature": signature
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{signed}");
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show directory status.
pub fn cmd_status(config: &ServerConfig, json_mode: bool) -> Result<(), GlimpseError> {
    let directory = open_directory(config)?;
    let org = directory.organization(DEFAULT_ORG_ID)?;

    let (initialized, name, slug, apps, dashboards, alerts) = match &org {
        Some(org) => (
            true,
            org.name.clone(),
            org.slug.clone(),
            directory.applications(org.id)?.len(),
            directory.dashboards(org.id)?.len(),
            directory.alerts(org.id)?.len(),
        ),
        None => (false, String::new(), String::new(), 0, 0, 0),
    };

    if json_mode {
        let output = serde_json::json!({
            "database": config.database.to_string_lossy(),
            "initialized": initialized,
            "organization": if initialized {
                serde_json::json!({ "name": name, "slug": slug })
            } else {
                serde_json::Value::Null
            },
            "applications": apps,
            "dashboards": dashboards,
            "alerts": alerts
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Glimpse Directory Status");
    println!("========================");
    println!("Database: {:?}", config.database);
    if initialized {
        println!("Organization: {name} (slug: {slug})");
        println!();
        println!("Applications: {apps}");
        println!("Dashboards:   {dashboards}");
        println!("Alerts:       {alerts}");
    } else {
        println!("Not initialized. Run `glimpse init --admin-email you@example.com`.");
    }

    Ok(())
}
