//! Config validation.

use std::path::Path;

use anyhow::Result;

use crate::ui;

/// Load and validate config, then print the effective settings.
pub fn run_check_config(config_path: Option<&Path>) -> Result<()> {
    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            return Err(e);
        }
    };

    ui::success("Configuration is valid");
    ui::header("Server");
    ui::kv(
        "Address",
        &format!("{}:{}", config.server.bind_address, config.server.port),
    );
    ui::kv("Data", &config.server.data_dir.display().to_string());

    ui::header("Tokens");
    ui::kv("Access TTL", &format!("{:?}", config.jwt.access_token_ttl()));
    ui::kv("Refresh TTL", &format!("{:?}", config.jwt.refresh_token_ttl()));
    ui::kv("Invitation TTL", &format!("{:?}", config.jwt.invitation_ttl()));
    ui::kv(
        "Admin public key",
        &config.admin_public_key_path().display().to_string(),
    );

    ui::header("Rate limits");
    ui::kv("Window", &format!("{:?}", config.rate_limit.window()));
    ui::kv("Admin", &config.rate_limit.admin.to_string());
    ui::kv("Teacher", &config.rate_limit.teacher.to_string());
    ui::kv("Student", &config.rate_limit.student.to_string());
    ui::kv("Anonymous", &config.rate_limit.default.to_string());

    if !config.admin_public_key_path().exists() {
        println!();
        ui::warning("No admin key found; run `classgate init-admin`");
    }

    Ok(())
}
