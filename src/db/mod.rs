use std::time::Duration;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::error::DeployError;

/// Create the SQLite connection pool without opening a connection yet.
///
/// The database is only checked by the health endpoint, so an unreachable
/// database must not keep the webhook from starting.
pub fn connect_lazy(database_url: &str) -> Result<SqlitePool, DeployError> {
    info!("Using database at {}", database_url);
    SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect_lazy(database_url)
        .map_err(|e| DeployError::DatabaseError(format!("Invalid database URL: {}", e)))
}

/// Runs `SELECT 1`; returns false on any failure.
pub async fn ping(pool: &SqlitePool) -> bool {
    match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => {
            debug!("Database ping succeeded");
            true
        }
        Err(e) => {
            warn!("Database ping failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_in_memory_database() {
        let pool = connect_lazy("sqlite::memory:").unwrap();
        assert!(ping(&pool).await);
    }

    #[tokio::test]
    async fn test_ping_unreachable_database() {
        let pool = connect_lazy("sqlite:///nonexistent/dir/app.db").unwrap();
        assert!(!ping(&pool).await);
    }
}
