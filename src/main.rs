use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use crabgate::{Config, GatewayServer};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🦀 crabgate";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> std::io::Result<()> {
    setup().await;
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> std::io::Result<()> {
    let config = Config::snapshot();

    let server = GatewayServer::bind(config.listen_addr, config.settings).await?;
    info!(
        "{} serving {} static service(s)",
        APP_NAME,
        server.state().registry.get_all_services().await.len()
    );

    if let Err(e) = server.serve().await {
        error!("{} stopped: {e}", APP_NAME);
        return Err(e);
    }

    info!("{} shut down", APP_NAME);
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
