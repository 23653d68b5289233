use std::{future::Future, rc::Rc};

use futures::future::{FutureExt, LocalBoxFuture};

use crate::{
    query::Fetcher,
    QueryClient, QueryError, QueryKey, QueryOptions, QueryResult, QueryState, QueryValue, Rollback,
};

/// Creates a new [`QueryScope`] for managing queries with specific key and value types. This reduces the need to use the [`QueryClient`] directly.
///
/// Useful for having typed invalidation, setting, and updating of queries.
///
/// # Parameters
///
/// * `client`: The client whose cache the scope reads and writes.
/// * `fetcher`: The execution function to use for fetching query data.
/// * `options`: Query options used to configure all queries within this scope.
///
/// Returns a new [`QueryScope`].
///
/// # Example
///
/// ```
/// use bookshelf_query::*;
/// use futures::executor::LocalPool;
///
/// // Make a key type.
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// struct TrackId(i32);
///
/// impl From<TrackId> for QueryKey {
///     fn from(id: TrackId) -> Self {
///         QueryKey::new("track").with("trackId", id.0)
///     }
/// }
///
/// // The result of the query fetcher.
/// #[derive(Debug, Clone, PartialEq)]
/// struct TrackData {
///    name: String,
/// }
///
/// // Query fetcher.
/// async fn get_track(id: TrackId) -> Result<TrackData, String> {
///     Ok(TrackData { name: format!("Track {}", id.0) })
/// }
///
/// let mut pool = LocalPool::new();
/// let client = QueryClient::new(pool.spawner());
/// let scope = create_query(&client, get_track, QueryOptions::default());
///
/// let track = scope.use_query(TrackId(1));
/// pool.run_until_stalled();
///
/// assert_eq!(Some("Track 1".to_string()), track.data().map(|t| t.name));
/// ```
pub fn create_query<K, V, E, Fu>(
    client: &QueryClient,
    fetcher: impl Fn(K) -> Fu + 'static,
    options: QueryOptions<V>,
) -> QueryScope<K, V, E>
where
    K: Into<QueryKey> + Clone + 'static,
    V: QueryValue,
    E: QueryError,
    Fu: Future<Output = Result<V, E>> + 'static,
{
    let fetcher = Rc::new(move |key| fetcher(key).boxed_local());
    QueryScope {
        client: client.clone(),
        fetcher,
        options,
    }
}

/// A scope for managing queries with specific key and value types within a type-safe environment.
///
/// Encapsulates operations such as fetching, prefetching, updating, and invalidating queries.
#[derive(Clone)]
pub struct QueryScope<K, V, E> {
    client: QueryClient,
    #[allow(clippy::type_complexity)]
    fetcher: Rc<dyn Fn(K) -> LocalBoxFuture<'static, Result<V, E>>>,
    options: QueryOptions<V>,
}

impl<K, V, E> QueryScope<K, V, E>
where
    K: Into<QueryKey> + Clone + 'static,
    V: QueryValue,
    E: QueryError,
{
    /// Observes the query for `key` using the fetcher specified at creation.
    pub fn use_query(&self, key: K) -> QueryResult<V, E> {
        self.use_query_with_options(key, self.options.clone())
    }

    /// Observes a query with options that override the ones provided at the scope's creation.
    pub fn use_query_with_options(&self, key: K, options: QueryOptions<V>) -> QueryResult<V, E> {
        QueryResult::new(
            self.client.clone(),
            key.clone().into(),
            self.make_fetcher(key),
            options,
        )
    }

    /// Observes a query with options derived from the scope's options.
    pub fn use_query_map_options(
        &self,
        key: K,
        options: impl FnOnce(QueryOptions<V>) -> QueryOptions<V>,
    ) -> QueryResult<V, E> {
        self.use_query_with_options(key, options(self.options.clone()))
    }

    /// Retrieves the default options for this scope.
    pub fn get_options(&self) -> &QueryOptions<V> {
        &self.options
    }

    /// The client this scope operates on.
    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Prefetches a query and stores it in the cache. Useful for preloading data before it is needed.
    /// If you need the result opt for [`fetch_query()`](Self::fetch_query)
    pub fn prefetch_query(&self, key: K) -> impl Future<Output = ()> + 'static {
        let request = self.fetch_query(key);
        async move {
            let _ = request.await;
        }
    }

    /// Fetch a query and store it in cache, honoring the scope's stale time.
    ///
    /// If you don't need the result opt for [`prefetch_query()`](Self::prefetch_query)
    pub fn fetch_query(&self, key: K) -> impl Future<Output = Result<V, E>> + 'static {
        self.client.fetch_with(
            key.clone().into(),
            self.make_fetcher(key),
            self.options.stale_time,
        )
    }

    /// Retrieve the current state for an existing query.
    /// Useful for when you want to introspect the state of a query without subscribing to it.
    ///
    /// If the query does not exist, [`None`](Option::None) will be returned.
    pub fn peek_query_state(&self, key: K) -> Option<QueryState<V, E>> {
        self.client.peek_query_state::<V, E>(key)
    }

    /// The data of an existing query, if it has any.
    pub fn get_query_data(&self, key: K) -> Option<V> {
        self.client.get_query_data::<V, E>(key)
    }

    /// Invalidates a query in the cache, identified by a specific key, marking it as needing a refetch.
    ///
    /// Returns a boolean indicating whether the query was successfully invalidated.
    pub fn invalidate_query(&self, key: K) -> bool {
        self.client.invalidate_query::<V, E>(key)
    }

    /// Updates the data of an existing query in the cache, identified by a specific key.
    ///
    /// # Parameters
    ///
    /// * `key`: The key that identifies the query to update.
    /// * `updater`: A closure that takes the current query data as an argument and returns updated data.
    ///
    /// If the updater returns `None`, the query data is not updated.
    pub fn update_query_data(&self, key: K, updater: impl FnOnce(Option<&V>) -> Option<V>) -> bool {
        self.client.update_query_data::<V, E>(key, updater)
    }

    /// Sets the data of a query in the cache, creating it if needed.
    pub fn set_query_data(&self, key: K, data: V) {
        self.client.set_query_data::<V, E>(key, data);
    }

    /// Mutates the data of an existing query in the cache, identified by a specific key.
    /// If the query does not exist, this method does nothing.
    /// If query does exist, all listeners will be notified.
    ///
    /// # Returns a boolean indicating whether the query data was successfully mutated.
    pub fn update_query_data_mut(&self, key: K, updater: impl FnOnce(&mut V)) -> bool {
        self.client.update_query_data_mut::<V, E>(key, updater)
    }

    /// Cancels an ongoing fetch operation for a query, identified by a specific key.
    ///
    /// Returns a boolean indicating whether the fetch operation was active and successfully cancelled.
    pub fn cancel_query(&self, key: K) -> bool {
        self.client.cancel_query::<V, E>(key)
    }

    /// Captures the data of a query for a later [`Rollback`].
    pub fn snapshot(&self, key: K) -> Rollback {
        self.client.snapshot::<V, E>(key)
    }

    /// Removes a query from the cache.
    pub fn evict_query(&self, key: K) -> bool {
        self.client.evict_query::<V, E>(key)
    }

    fn make_fetcher(&self, key: K) -> Fetcher<V, E> {
        let fetcher = self.fetcher.clone();
        Rc::new(move || fetcher(key.clone()))
    }

    #[cfg(test)]
    pub(crate) fn query(&self, key: K) -> Option<crate::query::Query<V, E>> {
        self.client.cache.get_query::<V, E>(&key.into())
    }
}
