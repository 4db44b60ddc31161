//! Identity and presence storage backends.
//!
//! - [`MemoryStore`] - lock-sharded in-process store
//! - [`SqliteStore`] - shares the registration subsystem's `profile_users` table

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{Identity, NewIdentity};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Mutex lock was poisoned (a thread panicked while holding the lock).
    #[error("Lock poisoned: a thread panicked while holding the lock")]
    LockPoisoned,

    /// A stored row could not be interpreted.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Read access to registered identities, plus the registration write hook.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up an identity by surrogate key, given as presented by a client.
    ///
    /// Keys that do not parse as a surrogate key find nothing.
    async fn find_by_surrogate_key(&self, key: &str) -> Result<Option<Identity>, StoreError>;

    /// Look up an identity by canonical address.
    async fn find_by_canonical_address(&self, address: &str)
        -> Result<Option<Identity>, StoreError>;

    /// Create or update an identity's registration data.
    ///
    /// New identities get a fresh surrogate key and no liveness. Updates
    /// leave liveness fields untouched.
    async fn upsert(&self, identity: NewIdentity) -> Result<Identity, StoreError>;
}

/// Parse a client-presented surrogate key.
///
/// Surrounding whitespace is ignored; a sign is not (`"+42"` is an address).
pub(crate) fn parse_surrogate_key(key: &str) -> Option<crate::identity::SurrogateKey> {
    let key = key.trim();
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}
