//! Database layer for Achievo
//!
//! Provides:
//! - SeaORM entity models
//! - Repository over the relational database
//! - Content store over the document database
//! - Connection pool management and embedded migrations

mod content;
pub mod models;
mod repository;

pub use content::PgContentStore;
pub use repository::Repository;

use crate::config::{DatabaseConfig, DocumentStoreConfig};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = connect(
            &config.url,
            config.max_connections,
            config.min_connections,
            config.connect_timeout_secs,
            config.idle_timeout_secs,
        )
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect to primary: {}", e),
        })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = connect(
                read_url,
                config.max_connections,
                config.min_connections,
                config.connect_timeout_secs,
                config.idle_timeout_secs,
            )
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to replica: {}", e),
            })?;

            Some(replica_conn)
        } else {
            None
        };

        if config.run_migrations {
            run_migrations(&primary, Store::Relational).await?;
        }

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

/// Open the document store connection
pub async fn connect_document_store(config: &DocumentStoreConfig) -> Result<DatabaseConnection> {
    info!("Connecting to document store...");

    let conn = connect(
        &config.url,
        config.max_connections,
        config.min_connections,
        config.connect_timeout_secs,
        300,
    )
    .await
    .map_err(|e| AppError::DatabaseConnection {
        message: format!("Failed to connect to document store: {}", e),
    })?;

    if config.run_migrations {
        run_migrations(&conn, Store::Documents).await?;
    }

    Ok(conn)
}

async fn connect(
    url: &str,
    max_connections: u32,
    min_connections: u32,
    connect_timeout_secs: u64,
    idle_timeout_secs: u64,
) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .idle_timeout(Duration::from_secs(idle_timeout_secs))
        .sqlx_logging(true);

    Database::connect(opts).await
}

#[derive(Debug, Clone, Copy)]
enum Store {
    Relational,
    Documents,
}

/// Apply the embedded SQL migrations of one store
async fn run_migrations(conn: &DatabaseConnection, store: Store) -> Result<()> {
    let mut migrator = match store {
        Store::Relational => sqlx::migrate!("../../migrations/relational"),
        Store::Documents => sqlx::migrate!("../../migrations/documents"),
    };
    // Both stores may share one database in development
    migrator.set_ignore_missing(true);

    migrator.run(conn.get_postgres_connection_pool()).await?;
    info!(store = ?store, "Migrations applied");
    Ok(())
}
