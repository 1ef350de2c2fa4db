use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info};
use volna::{init_logging, BrokerNode, Settings};

/// Путь к TOML-файлу настроек; без него используются значения по умолчанию
/// и окружение.
const CONFIG_PATH_ENV: &str = "VOLNA_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let settings =
        Settings::load_from(config_path.as_deref()).context("Failed to load settings")?;

    let logging = init_logging(&settings.logging).context("Failed to initialize logging")?;

    let node = BrokerNode::start(settings)
        .await
        .context("Failed to start broker node")?;
    info!(node_id = %node.node_id(), "volna is running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown signal received");
    node.shutdown().await;
    logging.shutdown().await;
    Ok(())
}
