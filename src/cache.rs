//! Short-lived memoization of collection query results.

use crate::error::StoreError;
use crate::types::{Entity, SubscriptionId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedQuery {
    rows: Arc<Vec<Entity>>,
    fetched_at: Instant,
}

/// Last query result per subscription, reused while younger than the TTL.
pub struct QueryCache {
    entries: LruCache<SubscriptionId, CachedQuery>,
}

impl QueryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Return the cached rows for `id` if fresh, otherwise run `fetch` and
    /// cache its result. A zero `ttl` disables caching entirely.
    pub fn get_or_fetch<F>(
        &mut self,
        id: SubscriptionId,
        ttl: Duration,
        now: Instant,
        fetch: F,
    ) -> Result<Arc<Vec<Entity>>, StoreError>
    where
        F: FnOnce() -> Result<Vec<Entity>, StoreError>,
    {
        if ttl.is_zero() {
            return fetch().map(Arc::new);
        }

        if let Some(cached) = self.entries.get(&id) {
            if now.saturating_duration_since(cached.fetched_at) < ttl {
                return Ok(Arc::clone(&cached.rows));
            }
        }

        let rows = Arc::new(fetch()?);
        self.entries.put(
            id,
            CachedQuery {
                rows: Arc::clone(&rows),
                fetched_at: now,
            },
        );
        Ok(rows)
    }

    pub fn evict(&mut self, id: SubscriptionId) -> bool {
        self.entries.pop(&id).is_some()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
