//! Database connection pool and health check.

mod settings;

pub use settings::DatabaseSettings;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        tracing::info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.name,
            "connecting to database"
        );
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(settings.connect_options())
            .await?;
        Ok(Self { pool })
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
