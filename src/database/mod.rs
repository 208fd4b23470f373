/// Database module for SQLite persistence
///
/// This module provides:
/// - A fixed-size connection pool handing out exclusive leases
/// - The persistence gateway (upserts, paging, ranked listing, index checks)
/// - Database models and schema
/// - Diesel ORM integration with embedded migrations

pub mod connection;
pub mod enums;
pub mod gateway;
pub mod models;
pub mod schema;

pub use connection::{establish_connection_pool, ConnectionPool, DatabaseError, Lease};
pub use gateway::{FetchMode, PersistenceGateway, QueryOutcome, SqlParam, REQUIRED_INDEXES};

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Migrated on-disk store in a temp dir; keep the `TempDir` alive
    pub(crate) fn temp_gateway(pool_size: u32) -> (TempDir, Arc<PersistenceGateway>) {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("stock_sense.db").to_string_lossy().into_owned();
        let pool = establish_connection_pool(&url, pool_size, Duration::from_secs(5)).unwrap();
        (dir, Arc::new(PersistenceGateway::new(pool)))
    }
}
