//! Target reference resolution.
//!
//! Clients address a peer either by canonical address (`+15551234567`) or
//! by surrogate key (`42`). Precedence:
//!
//! 1. an all-digit reference is tried as a surrogate key;
//! 2. an address-shaped reference is accepted as-is, without a lookup;
//! 3. any other reference is tried as a surrogate key verbatim;
//! 4. otherwise the reference is unresolved.
//!
//! A bare-digit canonical address can therefore be shadowed by a surrogate
//! key with the same digits. The order is relied on by existing clients.
//!
//! Bare digits count as an address only from [`MIN_BARE_ADDRESS_DIGITS`]
//! digits up. A registered bare-digit address shorter than that is never
//! reachable by its address: it resolves only if it happens to match a
//! surrogate key, and then to that key's identity. Register such peers with a
//! `+` prefix or address them by surrogate key.

use std::sync::Arc;

use tracing::trace;

use crate::identity::Identity;
use crate::store::{IdentityStore, StoreError};

/// Shortest all-digit reference treated as a canonical address.
pub const MIN_BARE_ADDRESS_DIGITS: usize = 7;

/// How a reference was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched a registered surrogate key.
    SurrogateKey(Identity),
    /// Accepted as a canonical address without consulting the store.
    CanonicalAddress(String),
    /// No identity corresponds to the reference.
    NotFound,
}

impl Resolution {
    /// The canonical address to route to, if resolved.
    #[must_use]
    pub fn canonical_address(&self) -> Option<&str> {
        match self {
            Resolution::SurrogateKey(identity) => Some(&identity.canonical_address),
            Resolution::CanonicalAddress(address) => Some(address),
            Resolution::NotFound => None,
        }
    }

    /// Whether the reference resolved.
    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }
}

/// Whether `reference` is a non-empty run of ASCII digits.
#[must_use]
pub fn is_numeric(reference: &str) -> bool {
    !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit())
}

/// Whether `reference` looks like a canonical address.
///
/// Either `+` followed by one or more digits, or a bare run of at least
/// [`MIN_BARE_ADDRESS_DIGITS`] digits.
#[must_use]
pub fn is_address_shaped(reference: &str) -> bool {
    match reference.strip_prefix('+') {
        Some(rest) => is_numeric(rest),
        None => is_numeric(reference) && reference.len() >= MIN_BARE_ADDRESS_DIGITS,
    }
}

/// Resolves client-supplied target references.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    /// Create a resolver over an identity store.
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Resolve a target reference.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store fails.
    pub async fn resolve(&self, reference: &str) -> Result<Resolution, StoreError> {
        let numeric = is_numeric(reference);

        if numeric {
            if let Some(identity) = self.store.find_by_surrogate_key(reference).await? {
                trace!(reference = %reference, id = identity.id, "Resolved by surrogate key");
                return Ok(Resolution::SurrogateKey(identity));
            }
        }

        if is_address_shaped(reference) {
            trace!(reference = %reference, "Resolved as canonical address");
            return Ok(Resolution::CanonicalAddress(reference.to_string()));
        }

        // Step 1 already tried numeric references.
        if !numeric {
            if let Some(identity) = self.store.find_by_surrogate_key(reference).await? {
                trace!(reference = %reference, id = identity.id, "Resolved by raw surrogate key");
                return Ok(Resolution::SurrogateKey(identity));
            }
        }

        Ok(Resolution::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NewIdentity;
    use crate::store::MemoryStore;

    async fn resolver_with(addresses: &[&str]) -> (IdentityResolver, Vec<Identity>) {
        let store = Arc::new(MemoryStore::new());
        let mut registered = Vec::new();
        for address in addresses {
            registered.push(store.upsert(NewIdentity::new(*address, "peer")).await.unwrap());
        }
        (IdentityResolver::new(store), registered)
    }

    #[test]
    fn test_reference_shapes() {
        assert!(is_numeric("42"));
        assert!(!is_numeric(""));
        assert!(!is_numeric("+42"));

        assert!(is_address_shaped("+1000"));
        assert!(is_address_shaped("5551234567"));
        assert!(!is_address_shaped("9999"));
        assert!(!is_address_shaped("+"));
        assert!(!is_address_shaped("+12ab"));
        assert!(!is_address_shaped("alice"));
    }

    #[tokio::test]
    async fn test_surrogate_key_resolves_to_canonical() {
        let (resolver, ids) = resolver_with(&["+1000"]).await;
        let res = resolver.resolve(&ids[0].id.to_string()).await.unwrap();
        assert_eq!(res.canonical_address(), Some("+1000"));
        assert!(matches!(res, Resolution::SurrogateKey(_)));
    }

    #[tokio::test]
    async fn test_address_fast_path_needs_no_registration() {
        let (resolver, _) = resolver_with(&[]).await;
        assert_eq!(
            resolver.resolve("+2000").await.unwrap(),
            Resolution::CanonicalAddress("+2000".into())
        );
        assert_eq!(
            resolver.resolve("5551234567").await.unwrap(),
            Resolution::CanonicalAddress("5551234567".into())
        );
    }

    #[tokio::test]
    async fn test_surrogate_key_shadows_bare_address() {
        let store = Arc::new(MemoryStore::new());
        let first = store.upsert(NewIdentity::new("+1000", "first")).await.unwrap();
        let resolver = IdentityResolver::new(store.clone());

        // A bare-digit address equal to the surrogate key of "+1000".
        let colliding = first.id.to_string();
        store
            .upsert(NewIdentity::new(colliding.clone(), "bare"))
            .await
            .unwrap();

        let res = resolver.resolve(&colliding).await.unwrap();
        assert_eq!(res.canonical_address(), Some("+1000"));
    }

    #[tokio::test]
    async fn test_unknown_short_number_is_not_found() {
        let (resolver, _) = resolver_with(&["+1000", "+2000"]).await;
        assert_eq!(resolver.resolve("9999").await.unwrap(), Resolution::NotFound);
        assert!(!resolver.resolve("alice").await.unwrap().is_found());
        assert!(!resolver.resolve("").await.unwrap().is_found());
    }

    #[tokio::test]
    async fn test_raw_reference_fallback() {
        let (resolver, ids) = resolver_with(&["+1000"]).await;
        // Not numeric and not address-shaped, but the store accepts it.
        let padded = format!(" {} ", ids[0].id);
        let res = resolver.resolve(&padded).await.unwrap();
        assert_eq!(res.canonical_address(), Some("+1000"));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic() {
        let (resolver, _) = resolver_with(&["+1000", "+2000", "+3000"]).await;
        for reference in ["1", "2", "+3000", "9999", "x", "12345678"] {
            let a = resolver.resolve(reference).await.unwrap();
            let b = resolver.resolve(reference).await.unwrap();
            assert_eq!(a, b, "{reference}");
        }
    }

    #[tokio::test]
    async fn test_short_bare_address_is_unreachable() {
        let (resolver, ids) = resolver_with(&["+1000", "123456", "1234567"]).await;

        // Six digits: not address-shaped and no surrogate key matches.
        assert_eq!(resolver.resolve("123456").await.unwrap(), Resolution::NotFound);
        // Seven digits take the address fast path.
        assert_eq!(
            resolver.resolve("1234567").await.unwrap(),
            Resolution::CanonicalAddress("1234567".into())
        );
        // The short address stays reachable by its own surrogate key.
        let res = resolver.resolve(&ids[1].id.to_string()).await.unwrap();
        assert_eq!(res.canonical_address(), Some("123456"));
    }
}
