//! Tokio UDP runtime for the Go-back-N state machines, shared by the
//! `gbn-server` and `gbn-client` binaries.

pub mod client;
pub mod server;
pub mod sink;

use anyhow::{Context, Result};
use gbn_ftp_abstract::ConfigOverride;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub use client::send_file;
pub use server::Server;
pub use sink::FileSink;

/// Largest datagram we will ever read.
pub const MAX_DATAGRAM: usize = 65_535;

/// Diagnostics go to stderr; stdout is reserved for protocol event lines.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Read a partial protocol configuration from a TOML file.
pub fn load_config_file(path: &Path) -> Result<ConfigOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}
