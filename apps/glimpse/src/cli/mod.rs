//! # Glimpse CLI Module
//!
//! This module implements the CLI interface for Glimpse.
//!
//! ## Available Commands
//!
//! - `serve` - Start the HTTP gateway
//! - `init` - Initialize the directory with an organization and admin
//! - `app` - Manage embedding applications (create/list/regenerate)
//! - `sign-embed-url` - Sign an embed URL for manual testing
//! - `status` - Show directory status

mod commands;

use clap::{Parser, Subcommand};
use glimpse_core::GlimpseError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Glimpse - BI Embed Gateway
///
/// Request authentication and embed signing for dashboards: embed
/// signatures, access tokens, signed URLs, API keys and JWT login,
/// resolved in one fixed order.
#[derive(Parser, Debug)]
#[command(name = "glimpse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the directory database (overrides config)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize the directory with an organization and an admin user
    Init {
        /// Organization name
        #[arg(long, default_value = "Default")]
        org_name: String,

        /// Admin user email
        #[arg(long)]
        admin_email: String,

        /// Reinitialize even if an organization already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Manage embedding applications
    App {
        #[command(subcommand)]
        action: AppCommands,
    },

    /// Sign an embed URL with an application secret token
    SignEmbedUrl {
        /// The full embed URL, without signature parameters
        #[arg(long)]
        url: String,

        /// The application's secret token
        #[arg(long)]
        secret_token: String,

        /// Unix timestamp to embed (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Show directory status
    Status,
}

/// Application management subcommands.
#[derive(Subcommand, Debug)]
pub enum AppCommands {
    /// Register a new application and print its credentials
    Create {
        /// Application name
        #[arg(long)]
        name: String,
    },

    /// List registered applications (secret tokens masked)
    List,

    /// Rotate an application's secret token
    Regenerate {
        /// Application id
        #[arg(long)]
        id: u64,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GlimpseError> {
    let mut config = crate::config::ServerConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            cmd_serve(config).await
        }
        Some(Commands::Init {
            org_name,
            admin_email,
            force,
        }) => cmd_init(&config, &org_name, &admin_email, force, json_mode),
        Some(Commands::App { action }) => match action {
            AppCommands::Create { name } => cmd_app_create(&config, &name, json_mode),
            AppCommands::List => cmd_app_list(&config, json_mode),
            AppCommands::Regenerate { id } => cmd_app_regenerate(&config, id, json_mode),
        },
        Some(Commands::SignEmbedUrl {
            url,
            secret_token,
            timestamp,
        }) => cmd_sign_embed_url(&url, &secret_token, timestamp, json_mode),
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}
