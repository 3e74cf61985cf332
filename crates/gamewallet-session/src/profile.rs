//! Profile resolution with caching, retry and in-flight de-duplication.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use gamewallet_core::{Address, Profile};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::ProfileCache;
use crate::capability::ProfileLookup;
use crate::error::SessionError;
use crate::retry::RetryPolicy;

type SharedLookup = Shared<BoxFuture<'static, Option<Profile>>>;

/// Maps an address to its profile.
///
/// Concurrent `resolve` calls for the same uncached address share one lookup
/// sequence, so the remote service sees at most `max_attempts` calls no
/// matter how many callers are waiting.
#[derive(Clone)]
pub struct ProfileResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    lookup: Arc<dyn ProfileLookup>,
    cache: ProfileCache,
    policy: RetryPolicy,
    in_flight: Mutex<HashMap<Address, SharedLookup>>,
}

impl ProfileResolver {
    pub fn new(lookup: Arc<dyn ProfileLookup>, cache: ProfileCache, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                lookup,
                cache,
                policy,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.inner.cache
    }

    /// Resolve the profile for `address`. Never fails: gives `None` once the
    /// retry budget is spent.
    pub async fn resolve(&self, address: &Address) -> Option<Profile> {
        if let Some(profile) = self.inner.cache.get(address) {
            tracing::debug!("Using cached profile for {}", address);
            return Some(profile);
        }

        let lookup = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            // A lookup may have finished between the first check and the lock.
            if let Some(profile) = self.inner.cache.get(address) {
                return Some(profile);
            }

            in_flight
                .entry(address.clone())
                .or_insert_with(|| {
                    tracing::debug!("Starting profile lookup for {}", address);
                    let inner = self.inner.clone();
                    let address = address.clone();
                    async move {
                        let profile = inner.fetch_with_retry(&address).await;
                        inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&address);
                        profile
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        lookup.await
    }
}

impl ResolverInner {
    async fn fetch_with_retry(&self, address: &Address) -> Option<Profile> {
        let max_attempts = self.policy.max_attempts;
        for attempt in self.policy.attempts() {
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.lookup.lookup(address).await {
                Ok(profile) => {
                    tracing::info!("Fetched profile for {}", address);
                    self.cache.insert(address.clone(), profile.clone());
                    return Some(profile);
                }
                Err(e) => {
                    let err = SessionError::ProfileFetchFailed(e);
                    if attempt < max_attempts {
                        tracing::warn!(
                            "{} (attempt {}/{}) - retrying in {}ms",
                            err,
                            attempt,
                            max_attempts,
                            self.policy.delay_before(attempt + 1).as_millis()
                        );
                    } else {
                        tracing::error!(
                            "{} - giving up after {} attempts",
                            err,
                            max_attempts
                        );
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyLookup {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyLookup {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProfileLookup for FlakyLookup {
        async fn lookup(&self, address: &Address) -> Result<Profile, CapabilityError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if call <= self.failures {
                Err(CapabilityError::Remote("gateway timeout".to_string()))
            } else {
                Ok(Profile::new(format!("name-{}", address), None))
            }
        }
    }

    fn resolver(lookup: Arc<FlakyLookup>) -> ProfileResolver {
        ProfileResolver::new(lookup, ProfileCache::new(), RetryPolicy::profile_default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_resolve_hits_cache() {
        let lookup = FlakyLookup::new(0);
        let resolver = resolver(lookup.clone());
        let addr = Address::from("addr1");

        let first = resolver.resolve(&addr).await;
        let second = resolver.resolve(&addr).await;

        assert_eq!(first, second);
        assert_eq!(first.unwrap().display_name, "name-addr1");
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_lookup_uses_four_attempts() {
        let lookup = FlakyLookup::new(u32::MAX);
        let resolver = resolver(lookup.clone());

        let start = tokio::time::Instant::now();
        let result = resolver.resolve(&Address::from("addr1")).await;

        assert!(result.is_none());
        assert_eq!(lookup.calls(), 4);
        // 1s + 2s + 3s of backoff plus four 10ms calls.
        assert!(start.elapsed() >= Duration::from_millis(6040));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let lookup = FlakyLookup::new(2);
        let resolver = resolver(lookup.clone());

        let result = resolver.resolve(&Address::from("addr1")).await;

        assert!(result.is_some());
        assert_eq!(lookup.calls(), 3);
        assert!(resolver.cache().contains(&Address::from("addr1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resolve_is_retried_on_next_call() {
        let lookup = FlakyLookup::new(4);
        let resolver = resolver(lookup.clone());
        let addr = Address::from("addr1");

        assert!(resolver.resolve(&addr).await.is_none());
        assert!(resolver.resolve(&addr).await.is_some());
        assert_eq!(lookup.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_share_one_lookup() {
        let lookup = FlakyLookup::new(0);
        let resolver = resolver(lookup.clone());
        let addr = Address::from("addr1");

        let (a, b, c) = tokio::join!(
            resolver.resolve(&addr),
            resolver.resolve(&addr),
            resolver.resolve(&addr)
        );

        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_addresses_are_not_deduplicated() {
        let lookup = FlakyLookup::new(0);
        let resolver = resolver(lookup.clone());

        let addr1 = Address::from("addr1");
        let addr2 = Address::from("addr2");
        let (a, b) = tokio::join!(resolver.resolve(&addr1), resolver.resolve(&addr2));

        assert_ne!(a, b);
        assert_eq!(lookup.calls(), 2);
        assert_eq!(resolver.cache().len(), 2);
    }
}
