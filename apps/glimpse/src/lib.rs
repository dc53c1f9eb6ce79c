//! # Glimpse application library
//!
//! Library target backing the `glimpse` binary. Exposes the HTTP API,
//! the CLI, and the configuration loader so integration tests can drive
//! the router without a real listener.

pub mod api;
pub mod cli;
pub mod config;
