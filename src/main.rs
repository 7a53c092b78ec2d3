use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use home_deployer::config::{DEFAULT_CONFIG_PATH, Settings};
use home_deployer::deploy::ScriptDeployer;
use home_deployer::error::{DeployError, Result};
use home_deployer::{AppState, api, db, logging};
use tracing::{info, warn};

async fn run() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path =
        std::env::var("HOME_DEPLOYER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let settings = Settings::load(Path::new(&config_path))?;

    // Held until shutdown so buffered file logs get flushed
    let _log_guard = logging::setup_logging(&settings)?;

    info!("Using config at {:?}", config_path);
    if settings.webhook_secret().is_none() {
        warn!("GITHUB_WEBHOOK_SECRET is not set; webhook deliveries will be rejected");
    }
    info!(
        "Pushes to '{}' run {:?}",
        settings.deploy.target_ref,
        settings.deploy.script_path()
    );

    let db = db::connect_lazy(&settings.database_url)?;
    let deployer = Arc::new(ScriptDeployer::new(&settings.deploy));
    let bind_address = settings.bind_address();
    let state = Arc::new(AppState::new(settings, deployer, db));
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|source| DeployError::BindError {
            address: bind_address.clone(),
            source,
        })?;
    info!("Listening on {}", bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
