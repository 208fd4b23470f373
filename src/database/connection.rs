use dashmap::DashMap;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Schema migrations compiled into the binary
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Type alias for the SQLite connection manager
pub type SqliteManager = ConnectionManager<SqliteConnection>;

/// Type alias for a raw pooled SQLite connection
pub type SqlitePooledConnection = PooledConnection<SqliteManager>;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Database-related errors
///
/// # Error Categories
///
/// - **Contention** (retry with backoff): `PoolTimeout`, `PoolExhausted`
/// - **Programmer errors** (fatal): `ProtocolViolation`
/// - **Statement errors** (absorbed by the gateway): `QueryError`, `DieselError`
/// - **Setup errors**: `ConnectionPoolError`, `MigrationError`
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    #[error("Connection pool exhausted: all {0} connections are leased")]
    PoolExhausted(u32),

    #[error("Connection pool protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Database query error: {0}")]
    QueryError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Diesel error: {0}")]
    DieselError(#[from] diesel::result::Error),
}

impl DatabaseError {
    /// Returns true if waiting and trying again can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::PoolTimeout(_) | DatabaseError::PoolExhausted(_))
    }

    /// Returns true if this is pool misuse rather than a runtime condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, DatabaseError::ProtocolViolation(_))
    }
}

/// Applied to every physical connection the pool opens
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas {
    busy_timeout: Duration,
    wal: bool,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        let mut pragmas = format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        );
        if self.wal {
            pragmas.push_str(" PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
        }
        conn.batch_execute(&pragmas).map_err(r2d2::Error::QueryError)
    }
}

/// Fixed-size pool of SQLite connections handed out as [`Lease`]s
///
/// Wraps an r2d2 pool with `min_idle == max_size`, so the number of physical
/// connections stays constant. r2d2 discards connections that report themselves
/// broken on return and opens a replacement.
pub struct ConnectionPool {
    id: u64,
    inner: Pool<SqliteManager>,
    leases: Arc<DashMap<u64, Instant>>,
    next_lease: AtomicU64,
    peak_in_use: AtomicUsize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Open a pool of `size` connections to `database_url`
    pub fn new(database_url: &str, size: u32, acquire_timeout: Duration) -> Result<Self, DatabaseError> {
        if size == 0 {
            return Err(DatabaseError::ConnectionPoolError(
                "pool size must be at least 1".to_string(),
            ));
        }
        if acquire_timeout.is_zero() {
            return Err(DatabaseError::ConnectionPoolError(
                "acquire timeout must be greater than zero".to_string(),
            ));
        }

        let in_memory = database_url == ":memory:" || database_url.contains("mode=memory");
        let manager = SqliteManager::new(database_url);
        let inner = Pool::builder()
            .max_size(size)
            .min_idle(Some(size))
            .connection_timeout(acquire_timeout)
            .test_on_check_out(true)
            .connection_customizer(Box::new(SqlitePragmas {
                busy_timeout: acquire_timeout,
                wal: !in_memory,
            }))
            .build(manager)
            .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))?;

        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            inner,
            leases: Arc::new(DashMap::new()),
            next_lease: AtomicU64::new(1),
            peak_in_use: AtomicUsize::new(0),
            acquire_timeout,
        })
    }

    /// Block until a connection is free, or fail with `PoolTimeout`
    pub fn acquire(&self) -> Result<Lease, DatabaseError> {
        let conn = self.inner.get_timeout(self.acquire_timeout).map_err(|e| {
            tracing::warn!(pool_id = self.id, "Connection acquire failed: {}", e);
            DatabaseError::PoolTimeout(self.acquire_timeout)
        })?;
        Ok(self.lease(conn))
    }

    /// Take a connection only if one is idle right now
    pub fn try_acquire(&self) -> Result<Lease, DatabaseError> {
        self.inner
            .try_get()
            .map(|conn| self.lease(conn))
            .ok_or(DatabaseError::PoolExhausted(self.max_size()))
    }

    /// Return a lease to the pool
    ///
    /// The lease is consumed, so releasing the same handle twice does not compile:
    ///
    /// ```compile_fail
    /// # use stock_sense_api::database::ConnectionPool;
    /// # fn demo(pool: &ConnectionPool) -> Result<(), Box<dyn std::error::Error>> {
    /// let lease = pool.acquire()?;
    /// pool.release(lease)?;
    /// pool.release(lease)?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// A lease issued by a different pool is rejected with `ProtocolViolation`;
    /// its connection still goes back to the pool that issued it.
    pub fn release(&self, lease: Lease) -> Result<(), DatabaseError> {
        if lease.pool_id != self.id {
            return Err(DatabaseError::ProtocolViolation(format!(
                "lease {} belongs to pool {}, not pool {}",
                lease.lease_id, lease.pool_id, self.id
            )));
        }
        if !self.leases.contains_key(&lease.lease_id) {
            return Err(DatabaseError::ProtocolViolation(format!(
                "lease {} is not outstanding in pool {}",
                lease.lease_id, self.id
            )));
        }
        drop(lease);
        Ok(())
    }

    /// Scoped acquisition: the lease is released whether `f` succeeds or fails
    pub fn with_connection<R, F>(&self, f: F) -> Result<R, DatabaseError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R, DatabaseError>,
    {
        let mut lease = self.acquire()?;
        let result = f(lease.connection());
        self.release(lease)?;
        result
    }

    /// Apply pending embedded migrations
    pub fn run_migrations(&self) -> Result<usize, DatabaseError> {
        self.with_connection(|conn| {
            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| DatabaseError::MigrationError(e.to_string()))?;
            for version in &applied {
                tracing::info!("Applied migration {}", version);
            }
            Ok(applied.len())
        })
    }

    /// Configured number of connections
    pub fn max_size(&self) -> u32 {
        self.inner.max_size()
    }

    /// Leases currently outstanding
    pub fn in_use(&self) -> usize {
        self.leases.len()
    }

    /// Highest number of simultaneous leases seen so far
    pub fn peak_in_use(&self) -> usize {
        self.peak_in_use.load(Ordering::Relaxed)
    }

    /// Physical connections currently open (idle + leased)
    pub fn open_connections(&self) -> u32 {
        self.inner.state().connections
    }

    fn lease(&self, conn: SqlitePooledConnection) -> Lease {
        let lease_id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        self.leases.insert(lease_id, Instant::now());
        self.peak_in_use.fetch_max(self.leases.len(), Ordering::Relaxed);

        tracing::trace!(pool_id = self.id, lease_id, "Connection leased");

        Lease {
            pool_id: self.id,
            lease_id,
            conn,
            leases: Arc::clone(&self.leases),
        }
    }
}

/// Exclusive handle over one pooled connection
///
/// Dropping the lease releases it, so every exit path (including `?` and panics)
/// returns the connection.
pub struct Lease {
    pool_id: u64,
    lease_id: u64,
    conn: SqlitePooledConnection,
    leases: Arc<DashMap<u64, Instant>>,
}

impl Lease {
    /// Identifier unique within the issuing pool
    pub fn id(&self) -> u64 {
        self.lease_id
    }

    /// Mutable access to the underlying connection
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }
}

impl Deref for Lease {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some((_, leased_at)) = self.leases.remove(&self.lease_id) {
            tracing::trace!(
                pool_id = self.pool_id,
                lease_id = self.lease_id,
                held_ms = leased_at.elapsed().as_millis() as u64,
                "Connection released"
            );
        }
    }
}

/// Open the pool and bring the schema up to date
///
/// # Arguments
/// * `database_url` - SQLite path or URI
/// * `pool_size` - Number of connections kept open
/// * `acquire_timeout` - Upper bound on waiting for a free connection
pub fn establish_connection_pool(
    database_url: &str,
    pool_size: u32,
    acquire_timeout: Duration,
) -> Result<Arc<ConnectionPool>, DatabaseError> {
    tracing::info!("Establishing database connection pool...");

    let pool = ConnectionPool::new(database_url, pool_size, acquire_timeout)?;

    tracing::info!("Database pool created with {} connections", pool.max_size());

    let applied = pool.run_migrations()?;

    tracing::info!("Database schema ready ({} migrations applied)", applied);

    Ok(Arc::new(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn temp_pool(size: u32, timeout: Duration) -> (TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("pool.db").to_string_lossy().into_owned();
        let pool = ConnectionPool::new(&url, size, timeout).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_zero_sized_pool_rejected() {
        let result = ConnectionPool::new(":memory:", 0, Duration::from_secs(1));
        assert!(matches!(result, Err(DatabaseError::ConnectionPoolError(_))));
    }

    #[test]
    fn test_zero_acquire_timeout_rejected() {
        let result = ConnectionPool::new(":memory:", 1, Duration::ZERO);
        assert!(matches!(result, Err(DatabaseError::ConnectionPoolError(_))));
    }

    #[test]
    fn test_acquire_and_release_tracks_leases() {
        let (_dir, pool) = temp_pool(2, Duration::from_secs(1));

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.in_use(), 2);

        pool.release(a).unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.peak_in_use(), 2);
        assert_eq!(pool.open_connections(), 2);
    }

    #[test]
    fn test_saturated_pool_blocks_until_release() {
        let (_dir, pool) = temp_pool(2, Duration::from_millis(200));
        let pool = Arc::new(pool);

        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();

        // N+1-th acquire gives up after the bound
        let started = Instant::now();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, DatabaseError::PoolTimeout(_)));
        assert!(err.is_retryable());
        assert!(started.elapsed() >= Duration::from_millis(150));

        assert!(matches!(pool.try_acquire(), Err(DatabaseError::PoolExhausted(2))));

        // ...and succeeds once a holder releases
        let (tx, rx) = mpsc::channel();
        let waiter_pool = Arc::clone(&pool);
        let waiter = std::thread::spawn(move || {
            tx.send(()).unwrap();
            waiter_pool.acquire().map(|lease| lease.id())
        });
        rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pool.release(first).unwrap();

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(pool.open_connections(), 2);
    }

    #[test]
    fn test_release_into_foreign_pool_is_protocol_violation() {
        let (_dir_a, pool_a) = temp_pool(1, Duration::from_millis(200));
        let (_dir_b, pool_b) = temp_pool(1, Duration::from_millis(200));

        let lease = pool_a.acquire().unwrap();
        let err = pool_b.release(lease).unwrap_err();

        assert!(matches!(err, DatabaseError::ProtocolViolation(_)));
        assert!(err.is_fatal());
        // The rejected lease still went home
        assert_eq!(pool_a.in_use(), 0);
        assert!(pool_a.try_acquire().is_ok());
    }

    #[test]
    fn test_with_connection_releases_on_error() {
        let (_dir, pool) = temp_pool(1, Duration::from_millis(200));

        let result: Result<(), DatabaseError> =
            pool.with_connection(|_| Err(DatabaseError::QueryError("boom".to_string())));
        assert!(result.is_err());
        assert_eq!(pool.in_use(), 0);

        let value = pool.with_connection(|_| Ok(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let (_dir, pool) = temp_pool(1, Duration::from_secs(1));

        assert_eq!(pool.run_migrations().unwrap(), 2);
        assert_eq!(pool.run_migrations().unwrap(), 0);
    }
}
