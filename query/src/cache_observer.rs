use crate::QueryKey;

/// Subscribing to cache events
pub trait CacheObserver {
    /// receive a cache event.
    fn process_cache_event(&self, event: CacheEvent);
}

impl<F> CacheObserver for F
where
    F: Fn(CacheEvent),
{
    fn process_cache_event(&self, event: CacheEvent) {
        self(event)
    }
}

/// The events that can be observed from the query cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new entry was added to the cache.
    Created(QueryKey),
    /// An entry received new data or an error.
    Updated(QueryKey),
    /// An entry was marked invalid.
    Invalidated(QueryKey),
    /// An entry was removed from the cache.
    Removed(QueryKey),
    /// Every entry was removed from the cache.
    Cleared,
}

impl CacheEvent {
    /// The key the event refers to. [`Cleared`](CacheEvent::Cleared) has none.
    pub fn key(&self) -> Option<&QueryKey> {
        match self {
            CacheEvent::Created(key)
            | CacheEvent::Updated(key)
            | CacheEvent::Invalidated(key)
            | CacheEvent::Removed(key) => Some(key),
            CacheEvent::Cleared => None,
        }
    }
}
