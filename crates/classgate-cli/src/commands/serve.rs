//! Run the gateway server.

use std::path::Path;

use anyhow::Result;

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Run the gateway until Ctrl-C.
pub async fn run_serve(config_path: Option<&Path>, args: ServeArgs) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    ui::header("Starting Classgate");
    ui::kv(
        "Address",
        &format!("{}:{}", config.server.bind_address, config.server.port),
    );
    ui::kv("Data", &config.server.data_dir.display().to_string());
    println!();
    ui::info("Press Ctrl+C to stop");

    classgate_gateway::start(config).await?;

    ui::success("Gateway stopped");
    Ok(())
}
