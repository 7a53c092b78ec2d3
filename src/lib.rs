pub mod api;
pub mod config;
pub mod db;
pub mod deploy;
pub mod error;
pub mod logging;
pub mod signature;
pub mod webhook;

use sqlx::SqlitePool;
use std::sync::Arc;

use config::Settings;
use deploy::Deployer;
use webhook::DeployPolicy;

/// Everything a request handler needs; built once at startup and never mutated.
pub struct AppState {
    pub settings: Settings,
    pub policy: DeployPolicy,
    pub deployer: Arc<dyn Deployer>,
    pub db: SqlitePool,
}

impl AppState {
    pub fn new(settings: Settings, deployer: Arc<dyn Deployer>, db: SqlitePool) -> Self {
        let policy = DeployPolicy::new(settings.deploy.target_ref.clone());
        Self {
            settings,
            policy,
            deployer,
            db,
        }
    }
}

pub type SharedState = Arc<AppState>;
