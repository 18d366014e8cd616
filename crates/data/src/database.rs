use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

use screener_core::config::DatabaseConfig;

/// Connects to the screener database.
///
/// # Errors
/// Returns an error if the database connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}
