//! In-memory identity and presence store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{parse_surrogate_key, IdentityStore, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::identity::{Endpoint, Identity, NewIdentity, SurrogateKey};
use crate::presence::{is_online, LivenessPolicy, PresenceStore};

/// A `DashMap`-backed store.
///
/// Each identity's record is locked independently (per shard), so touches
/// from unrelated identities never serialize on a global lock.
#[derive(Debug)]
pub struct MemoryStore {
    /// Identities indexed by canonical address.
    identities: DashMap<String, Identity>,
    /// Surrogate key to canonical address.
    keys: DashMap<SurrogateKey, String>,
    next_key: AtomicU64,
    policy: LivenessPolicy,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with the default policy and system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(LivenessPolicy::default(), Arc::new(SystemClock))
    }

    /// Create an empty store with a custom policy and clock.
    #[must_use]
    pub fn with_clock(policy: LivenessPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            identities: DashMap::new(),
            keys: DashMap::new(),
            next_key: AtomicU64::new(1),
            policy,
            clock,
        }
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Whether no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_surrogate_key(&self, key: &str) -> Result<Option<Identity>, StoreError> {
        let Some(key) = parse_surrogate_key(key) else {
            return Ok(None);
        };
        let Some(address) = self.keys.get(&key).map(|a| a.clone()) else {
            return Ok(None);
        };
        Ok(self.identities.get(&address).map(|i| i.clone()))
    }

    async fn find_by_canonical_address(
        &self,
        address: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self.identities.get(address).map(|i| i.clone()))
    }

    async fn upsert(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let mut entry = self
            .identities
            .entry(new.canonical_address.clone())
            .or_insert_with(|| {
                let id = self.next_key.fetch_add(1, Ordering::Relaxed);
                self.keys.insert(id, new.canonical_address.clone());
                debug!(identity = %new.canonical_address, id, "Registered identity");
                Identity {
                    id,
                    canonical_address: new.canonical_address.clone(),
                    display_name: String::new(),
                    email: None,
                    endpoint: None,
                    last_seen: 0,
                    photo_public: false,
                    photo: None,
                }
            });

        entry.display_name = new.display_name;
        entry.email = new.email;
        entry.photo = new.photo;
        entry.photo_public = new.photo_public;
        Ok(entry.clone())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn touch(&self, identity: &str, endpoint: Option<Endpoint>) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let Some(mut record) = self.identities.get_mut(identity) else {
            debug!(identity = %identity, "Touch for unregistered identity ignored");
            return Ok(false);
        };

        record.last_seen = record.last_seen.max(now);
        if let Some(update) = endpoint {
            match record.endpoint.as_mut() {
                Some(current) => current.merge(update),
                None => record.endpoint = Some(update),
            }
        }
        Ok(true)
    }

    async fn mark_stale(&self, identity: &str) -> Result<bool, StoreError> {
        let stale = self.policy.stale_timestamp(self.clock.now_millis());
        let Some(mut record) = self.identities.get_mut(identity) else {
            return Ok(false);
        };
        record.last_seen = record.last_seen.min(stale);
        Ok(true)
    }

    async fn list_online(
        &self,
        window: Duration,
        exclude: Option<&str>,
    ) -> Result<Vec<Identity>, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .identities
            .iter()
            .filter(|r| exclude != Some(r.key().as_str()))
            .filter(|r| is_online(r.last_seen, now, window))
            .map(|r| r.value().clone())
            .collect())
    }

    async fn get_endpoint(&self, identity: &str) -> Result<Option<Endpoint>, StoreError> {
        Ok(self
            .identities
            .get(identity)
            .and_then(|r| r.endpoint.clone()))
    }
}
