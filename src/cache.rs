//! Vehicle API response caching
//!
//! [`ApiCache`] is shared by every consumer of vehicle capabilities. Calling
//! [`ApiCache::invalidate`] forces the next read of every [`Cached`] value to
//! go to the device again.

use crate::clock::Clock;
use crate::error::Result;
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Cache generation counter
#[derive(Debug, Default)]
pub struct ApiCache {
    generation: AtomicU64,
}

impl ApiCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached values
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

struct Entry<T> {
    updated: DateTime<Utc>,
    generation: u64,
    value: T,
}

/// A single cached value with time-to-live
pub struct Cached<T> {
    cache: Arc<ApiCache>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    entry: Mutex<Option<Entry<T>>>,
}

impl<T: Clone + Send> Cached<T> {
    pub fn new(cache: Arc<ApiCache>, clock: Arc<dyn Clock>, ttl: TimeDelta) -> Self {
        Self {
            cache,
            clock,
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Return the cached value or fetch a new one. Errors are not cached.
    pub async fn get<F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let now = self.clock.now();
        let generation = self.cache.generation();

        if let Some(value) = self.fresh(now, generation) {
            return Ok(value);
        }

        let value = fetch().await?;
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = Some(Entry {
            updated: now,
            generation,
            value: value.clone(),
        });
        Ok(value)
    }

    fn fresh(&self, now: DateTime<Utc>, generation: u64) -> Option<T> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .filter(|e| e.generation == generation && now - e.updated < self.ttl)
            .map(|e| e.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::error::HeliosError;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<ApiCache>, Arc<MockClock>, Cached<f64>) {
        let cache = Arc::new(ApiCache::new());
        let clock = Arc::new(MockClock::default());
        let cached = Cached::new(cache.clone(), clock.clone(), TimeDelta::minutes(15));
        (cache, clock, cached)
    }

    #[tokio::test]
    async fn serves_until_ttl_or_invalidate() {
        let (cache, clock, cached) = setup();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let fetch = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42.0)
        };

        assert_eq!(cached.get(fetch).await.unwrap(), 42.0);
        assert_eq!(cached.get(fetch).await.unwrap(), 42.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cached.get(fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.add(TimeDelta::minutes(16));
        cached.get(fetch).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn must_retry_is_not_cached() {
        let (_cache, _clock, cached) = setup();
        let err = cached
            .get(|| async { Err(HeliosError::MustRetry) })
            .await
            .unwrap_err();
        assert!(err.is_must_retry());

        assert_eq!(cached.get(|| async { Ok(55.0) }).await.unwrap(), 55.0);
    }
}
