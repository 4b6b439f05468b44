//! SQLite persistence for the iteration journal.

pub mod connection;
pub mod journal;
pub mod migrations;

pub use connection::{create_pool, create_test_pool, database_url, ConnectionError, PoolConfig};
pub use journal::SqliteJournal;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};

use sqlx::SqlitePool;

use crate::domain::models::DatabaseConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

pub async fn initialize_database(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Open (creating if needed) the journal described by the database config.
pub async fn open_journal(config: &DatabaseConfig) -> Result<SqliteJournal, DatabaseError> {
    let pool_config = PoolConfig {
        max_connections: config.max_connections,
        ..PoolConfig::default()
    };
    let pool = initialize_database(&database_url(&config.path), Some(pool_config)).await?;
    Ok(SqliteJournal::new(pool))
}
