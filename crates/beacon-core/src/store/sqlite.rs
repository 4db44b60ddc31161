//! SQLite identity and presence store.
//!
//! Uses the registration subsystem's `profile_users` table so the relay and
//! the registration service can share one database file.
//!
//! Queries run on tokio's blocking pool against a small set of connections.
//! File databases use WAL so lookups for unrelated identities proceed in
//! parallel; SQLite still admits one writer at a time.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::{parse_surrogate_key, IdentityStore, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::identity::{Endpoint, Identity, NewIdentity};
use crate::presence::{LivenessPolicy, PresenceStore};

/// Default number of pooled connections for a database file.
pub const DEFAULT_POOL_SIZE: usize = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const IDENTITY_COLUMNS: &str =
    "id, phone, name, email, ip, port, last_seen, is_photo_public, photo";

/// Fixed set of connections handed out to blocking tasks.
#[derive(Debug)]
struct ConnectionPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ConnectionPool {
    fn new(conns: Vec<Connection>) -> Self {
        Self {
            conns: conns.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.conns.len()
    }

    /// Take the first idle connection, or wait on one if all are busy.
    fn acquire(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.conns.len() {
            match self.conns[(start + offset) % self.conns.len()].try_lock() {
                Ok(conn) => return Ok(conn),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::LockPoisoned),
            }
        }
        self.conns[start % self.conns.len()]
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }
}

#[derive(Debug)]
struct Inner {
    pool: ConnectionPool,
    policy: LivenessPolicy,
    clock: Arc<dyn Clock>,
}

/// SQLite storage backend.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
}

impl SqliteStore {
    /// Open or create a database file with [`DEFAULT_POOL_SIZE`] connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P, policy: LivenessPolicy) -> Result<Self, StoreError> {
        Self::open_with(path, policy, Arc::new(SystemClock), DEFAULT_POOL_SIZE)
    }

    /// Open or create a database file with an explicit clock and pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        policy: LivenessPolicy,
        clock: Arc<dyn Clock>,
        pool_size: usize,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let first = Connection::open(path)?;
        first.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        init_schema(&first)?;

        let mut conns = vec![first];
        for _ in 1..pool_size.max(1) {
            conns.push(Connection::open(path)?);
        }
        for conn in &conns {
            conn.busy_timeout(BUSY_TIMEOUT)?;
        }

        info!(path = %path.display(), connections = conns.len(), "SQLite store opened");
        Ok(Self::from_pool(ConnectionPool::new(conns), policy, clock))
    }

    /// Create an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory(policy: LivenessPolicy, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self::from_pool(ConnectionPool::new(vec![conn]), policy, clock))
    }

    fn from_pool(pool: ConnectionPool, policy: LivenessPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                policy,
                clock,
            }),
        }
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.inner.pool.len()
    }

    /// Run `f` on a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let conn = inner.pool.acquire()?;
            f(&*conn)
        })
        .await?
    }

    /// Total number of registered identities.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn identity_count(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM profile_users", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS profile_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT NOT NULL UNIQUE,
            email TEXT UNIQUE,
            photo TEXT,
            is_photo_public INTEGER NOT NULL DEFAULT 0,
            ip TEXT,
            port INTEGER,
            last_seen INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_profile_users_last_seen ON profile_users(last_seen);
        "#,
    )?;

    info!("Storage schema initialized");
    Ok(())
}

fn find_one(
    conn: &Connection,
    clause: &str,
    param: &dyn rusqlite::ToSql,
) -> Result<Option<Identity>, StoreError> {
    let sql = format!("SELECT {IDENTITY_COLUMNS} FROM profile_users WHERE {clause}");
    let row = conn
        .query_row(&sql, params![param], RawIdentity::from_row)
        .optional()?;
    row.map(RawIdentity::into_identity).transpose()
}

/// A `profile_users` row before validation.
struct RawIdentity {
    id: i64,
    phone: String,
    name: String,
    email: Option<String>,
    ip: Option<String>,
    port: Option<i64>,
    last_seen: i64,
    is_photo_public: bool,
    photo: Option<String>,
}

impl RawIdentity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            phone: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            ip: row.get(4)?,
            port: row.get(5)?,
            last_seen: row.get(6)?,
            is_photo_public: row.get(7)?,
            photo: row.get(8)?,
        })
    }

    fn into_identity(self) -> Result<Identity, StoreError> {
        let id = u64::try_from(self.id)
            .map_err(|_| StoreError::Corrupt(format!("negative id {}", self.id)))?;
        let port = self
            .port
            .map(|p| {
                u16::try_from(p).map_err(|_| {
                    StoreError::Corrupt(format!("port {} out of range for {}", p, self.phone))
                })
            })
            .transpose()?;

        Ok(Identity {
            id,
            canonical_address: self.phone,
            display_name: self.name,
            email: self.email,
            endpoint: self.ip.map(|address| Endpoint { address, port }),
            last_seen: self.last_seen.max(0) as u64,
            photo_public: self.is_photo_public,
            photo: self.photo,
        })
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn find_by_surrogate_key(&self, key: &str) -> Result<Option<Identity>, StoreError> {
        let Some(key) = parse_surrogate_key(key).and_then(|k| i64::try_from(k).ok()) else {
            return Ok(None);
        };
        self.with_conn(move |conn| find_one(conn, "id = ?1", &key))
            .await
    }

    async fn find_by_canonical_address(
        &self,
        address: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let address = address.to_string();
        self.with_conn(move |conn| find_one(conn, "phone = ?1", &address))
            .await
    }

    async fn upsert(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO profile_users (phone, name, email, photo, is_photo_public)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(phone) DO UPDATE SET
                    name = excluded.name,
                    email = excluded.email,
                    photo = excluded.photo,
                    is_photo_public = excluded.is_photo_public",
                params![
                    new.canonical_address,
                    new.display_name,
                    new.email,
                    new.photo,
                    new.photo_public,
                ],
            )?;

            debug!(identity = %new.canonical_address, "Identity upserted in storage");
            find_one(conn, "phone = ?1", &new.canonical_address)?.ok_or_else(|| {
                StoreError::Corrupt(format!("{} missing after upsert", new.canonical_address))
            })
        })
        .await
    }
}

#[async_trait]
impl PresenceStore for SqliteStore {
    async fn touch(&self, identity: &str, endpoint: Option<Endpoint>) -> Result<bool, StoreError> {
        let now = self.inner.clock.now_millis() as i64;
        let (ip, port) = match endpoint {
            Some(e) => (Some(e.address), e.port),
            None => (None, None),
        };
        let identity = identity.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE profile_users
                 SET last_seen = MAX(last_seen, ?1),
                     ip = COALESCE(?2, ip),
                     port = COALESCE(?3, port)
                 WHERE phone = ?4",
                params![now, ip, port, identity],
            )?;

            if updated == 0 {
                debug!(identity = %identity, "Touch for unregistered identity ignored");
            }
            Ok(updated > 0)
        })
        .await
    }

    async fn mark_stale(&self, identity: &str) -> Result<bool, StoreError> {
        let stale = self.inner.policy.stale_timestamp(self.inner.clock.now_millis()) as i64;
        let identity = identity.to_string();

        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE profile_users SET last_seen = MIN(last_seen, ?1) WHERE phone = ?2",
                params![stale, identity],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn list_online(
        &self,
        window: Duration,
        exclude: Option<&str>,
    ) -> Result<Vec<Identity>, StoreError> {
        let cutoff = self.inner.clock.now_millis() as i64 - window.as_millis() as i64;
        let exclude = exclude.map(str::to_string);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {IDENTITY_COLUMNS} FROM profile_users
                 WHERE last_seen > ?1 AND (?2 IS NULL OR phone != ?2)"
            ))?;
            let rows = stmt.query_map(params![cutoff, exclude], RawIdentity::from_row)?;

            let identities = rows
                .map(|r| r.map_err(StoreError::from).and_then(RawIdentity::into_identity))
                .collect();
            identities
        })
        .await
    }

    async fn get_endpoint(&self, identity: &str) -> Result<Option<Endpoint>, StoreError> {
        let identity = identity.to_string();
        self.with_conn(move |conn| {
            Ok(find_one(conn, "phone = ?1", &identity)?.and_then(|i| i.endpoint))
        })
        .await
    }
}
