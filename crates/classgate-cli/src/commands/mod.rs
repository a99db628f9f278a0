//! CLI command implementations.

pub mod check_config;
pub mod init_admin;
pub mod serve;

pub use check_config::run_check_config;
pub use init_admin::run_init_admin;
pub use serve::run_serve;

use std::path::Path;

use anyhow::{Context, Result};
use classgate_core::Config;

/// Load config from `path`, or the default location when absent.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load_default().with_context(|| {
            format!(
                "Failed to load config from {}",
                Config::default_path().display()
            )
        }),
    }
}
