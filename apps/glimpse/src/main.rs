//! # Glimpse - BI Embed Gateway
//!
//! The main binary for the Glimpse request-authentication service.
//!
//! This application provides:
//! - HTTP REST API server (axum-based) running the authentication chain
//! - CLI interface for directory administration and embed-URL signing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      apps/glimpse (THE BINARY)                  │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐   │
//! │  │   CLI       │    │   HTTP API  │    │   JWKS Fetcher   │   │
//! │  │  (clap)     │    │   (axum)    │    │   (reqwest)      │   │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘   │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │                    ┌───────────────┐                           │
//! │                    │ glimpse-core  │                           │
//! │                    │ (THE LOGIC)   │                           │
//! │                    └───────────────┘                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Seed the directory and start the HTTP server
//! glimpse init --org-name "Acme" --admin-email admin@acme.test
//! glimpse serve --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! glimpse app create --name "Acme Portal"
//! glimpse sign-embed-url --url "http://localhost:8080/embed/dashboard/1?secret_key=K" --secret-token T
//! ```

use clap::Parser;
use glimpse::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing; GLIMPSE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("GLIMPSE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "glimpse=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Glimpse startup banner.
fn print_banner() {
    println!(
        r#"
   ██████╗ ██╗     ██╗███╗   ███╗██████╗ ███████╗███████╗
  ██╔════╝ ██║     ██║████╗ ████║██╔══██╗██╔════╝██╔════╝
  ██║  ███╗██║     ██║██╔████╔██║██████╔╝███████╗█████╗
  ██║   ██║██║     ██║██║╚██╔╝██║██╔═══╝ ╚════██║██╔══╝
  ╚██████╔╝███████╗██║██║ ╚═╝ ██║██║     ███████║███████╗
   ╚═════╝ ╚══════╝╚═╝╚═╝     ╚═╝╚═╝     ╚══════╝╚══════╝

  BI Embed Gateway v{}

  Signed • Scoped • Single-purpose
"#,
        env!("CARGO_PKG_VERSION")
    );
}
