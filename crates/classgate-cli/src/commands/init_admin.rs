//! Offline admin bootstrap.

use std::path::Path;

use anyhow::Result;
use classgate_gateway::{AuthError, Gateway};

use crate::ui;

/// Create the admin account and print its token.
///
/// Must not run while a server holds the same data directory.
pub fn run_init_admin(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let gateway = Gateway::new(config)?;

    let result = match gateway.state().bootstrap.initialize_admin() {
        Ok(result) => result,
        Err(AuthError::Conflict(_)) => {
            ui::warning("System is already initialized");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    ui::success("Admin account created");
    ui::kv("Public key", &result.public_key_path.display().to_string());
    ui::header("Admin token");
    println!("{}", result.admin_token);
    println!();
    ui::warning("Store this token securely; it will not be shown again");

    Ok(())
}
