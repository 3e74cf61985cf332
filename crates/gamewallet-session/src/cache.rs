//! Address-keyed profile cache.
//!
//! Constructed once and handed to every consumer by clone; clones share the
//! same entries. No eviction and no TTL: entries live as long as the last
//! handle.

use gamewallet_core::{Address, Profile};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    inner: Arc<RwLock<HashMap<Address, Profile>>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<Profile> {
        match self.inner.read() {
            Ok(entries) => entries.get(address).cloned(),
            Err(_) => {
                tracing::error!("Profile cache lock poisoned, treating as miss");
                None
            }
        }
    }

    /// Store `profile` for `address`, replacing any previous entry.
    pub fn insert(&self, address: Address, profile: Profile) {
        match self.inner.write() {
            Ok(mut entries) => {
                entries.insert(address, profile);
            }
            Err(_) => tracing::error!("Profile cache lock poisoned, dropping entry"),
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.inner
            .read()
            .map(|entries| entries.contains_key(address))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_miss_then_hit() {
        let cache = ProfileCache::new();
        let addr = Address::from("addr1");
        assert!(cache.get(&addr).is_none());

        cache.insert(addr.clone(), Profile::new("Alice", None));
        assert_eq!(cache.get(&addr).unwrap().display_name, "Alice");
        assert!(cache.contains(&addr));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = ProfileCache::new();
        let other = cache.clone();
        other.insert(Address::from("addr1"), Profile::new("Bob", None));
        assert!(cache.contains(&Address::from("addr1")));
    }

    #[test]
    fn test_separate_caches_are_isolated() {
        let a = ProfileCache::new();
        let b = ProfileCache::new();
        a.insert(Address::from("addr1"), Profile::new("Bob", None));
        assert!(b.is_empty());
    }

    #[test]
    fn test_insert_overwrites() {
        let cache = ProfileCache::new();
        let addr = Address::from("addr1");
        cache.insert(addr.clone(), Profile::new("Old", None));
        cache.insert(addr.clone(), Profile::new("New", None));
        assert_eq!(cache.get(&addr).unwrap().display_name, "New");
        assert_eq!(cache.len(), 1);
    }
}
