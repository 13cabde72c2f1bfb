//! Database layer with `SeaORM` entities and repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions
//! - PostgreSQL implementations of the core repository, audit and GL ports
//! - Database migrations

pub mod entities;
pub mod migration;
pub mod repositories;

use std::sync::Arc;
use std::time::Duration;

pub use repositories::{AuditLogRepository, DocumentRepository, GlOutboxRepository};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tally_core::ports::Stores;
use tally_shared::config::DatabaseConfig;

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Database::connect(options).await
}

/// Builds the core repository bundle over one connection pool.
#[must_use]
pub fn stores(db: &DatabaseConnection) -> Stores {
    Stores {
        purchase_orders: Arc::new(DocumentRepository::new(db.clone())),
        invoices: Arc::new(DocumentRepository::new(db.clone())),
        payments: Arc::new(DocumentRepository::new(db.clone())),
        deductions: Arc::new(DocumentRepository::new(db.clone())),
        settlements: Arc::new(DocumentRepository::new(db.clone())),
        accruals: Arc::new(DocumentRepository::new(db.clone())),
        spend_agreements: Arc::new(DocumentRepository::new(db.clone())),
    }
}
