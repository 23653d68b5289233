use std::{future::Future, rc::Rc, time::Duration};

use futures::{
    future::{self, Either},
    task::LocalSpawn,
};

use crate::{
    cache_observer::{CacheEvent, CacheObserver},
    query::{into_fetcher, Fetcher, Query},
    query_cache::{CacheObserverKey, QueryCache},
    DefaultQueryOptions, QueryData, QueryError, QueryKey, QueryOptions, QueryResult, QueryState,
    QueryValue, Rollback, Subscription,
};

/// The Cache Client to store query data.
/// Exposes utility functions to manage queries.
///
/// The client is a cheap handle: clones share the same cache.
///
/// Queries can be:
/// - [Prefetched](Self::prefetch_query)
///     - Query will start loading before you invoke [use_query](Self::use_query).
/// - [Invalidated](Self::invalidate_queries)
///     - Query will refetch on next usage. Active queries are immediately refetched in the background.
/// - [Introspected](Self::peek_query_state)
///     - Let's you see what the current value is of a query is.
/// - [Manually updated](Self::set_query_data)
///     - Useful when you have updated a value and you want to manually set it in cache instead of waiting for query to refetch.
#[derive(Clone)]
pub struct QueryClient {
    pub(crate) cache: QueryCache,
    pub(crate) default_options: DefaultQueryOptions,
}

impl QueryClient {
    /// Creates a new Query Client. Background refetches run on `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        Self::with_options(spawner, DefaultQueryOptions::default())
    }

    /// Creates a new Query Client with custom options.
    pub fn with_options(spawner: impl LocalSpawn + 'static, default_options: DefaultQueryOptions) -> Self {
        Self {
            cache: QueryCache::new(Rc::new(spawner), default_options.refetch_on_invalidate),
            default_options,
        }
    }

    /// The client wide defaults.
    pub fn default_options(&self) -> DefaultQueryOptions {
        self.default_options
    }

    /// Query options that inherit the client wide defaults.
    pub fn query_options<V>(&self) -> QueryOptions<V> {
        QueryOptions::from_defaults(&self.default_options)
    }

    /// Fetch a query and store it in cache.
    ///
    /// Resolves immediately with the cached value when it is loaded and not stale.
    /// Otherwise the fetcher runs, unless a fetch for the key is already in flight,
    /// in which case the returned future attaches to it.
    ///
    /// If you don't need the result opt for [`prefetch_query()`](Self::prefetch_query)
    pub fn fetch_query<V, E, Fu>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: impl Fn() -> Fu + 'static,
    ) -> impl Future<Output = Result<V, E>> + 'static
    where
        V: QueryValue,
        E: QueryError,
        Fu: Future<Output = Result<V, E>> + 'static,
    {
        self.fetch_with(key.into(), into_fetcher(fetcher), self.default_options.stale_time)
    }

    /// Prefetch a query and store it in cache.
    ///
    /// If you need the result opt for [`fetch_query()`](Self::fetch_query)
    pub fn prefetch_query<V, E, Fu>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: impl Fn() -> Fu + 'static,
    ) -> impl Future<Output = ()> + 'static
    where
        V: QueryValue,
        E: QueryError,
        Fu: Future<Output = Result<V, E>> + 'static,
    {
        let request = self.fetch_query(key, fetcher);
        async move {
            let _ = request.await;
        }
    }

    pub(crate) fn fetch_with<V, E>(
        &self,
        key: QueryKey,
        fetcher: Fetcher<V, E>,
        stale_time: Option<Duration>,
    ) -> impl Future<Output = Result<V, E>> + 'static
    where
        V: QueryValue,
        E: QueryError,
    {
        let query = self.cache.get_or_create_query::<V, E>(key);
        query.set_fetcher(fetcher.clone());

        let fresh = query.with_state(|state| match state {
            QueryState::Loaded(data) => Some(data.data.clone()),
            _ => None,
        });

        match fresh {
            Some(data) if !query.is_stale(stale_time) => Either::Left(future::ready(Ok(data))),
            _ => Either::Right(query.execute(&self.cache, fetcher)),
        }
    }

    /// Observes a query.
    ///
    /// The entry is fetched in the background when it has no data yet, is invalid or stale.
    /// While the returned [`QueryResult`] is alive the query counts as active, so
    /// invalidating it triggers a background refetch. Dropping the result stops observing.
    pub fn use_query<V, E, Fu>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: impl Fn() -> Fu + 'static,
        options: QueryOptions<V>,
    ) -> QueryResult<V, E>
    where
        V: QueryValue,
        E: QueryError,
        Fu: Future<Output = Result<V, E>> + 'static,
    {
        QueryResult::new(self.clone(), key.into(), into_fetcher(fetcher), options)
    }

    /// Ensures an observed query has data, starting a background fetch when needed.
    pub(crate) fn ensure_query_data<V, E>(&self, query: &Query<V, E>, stale_time: Option<Duration>)
    where
        V: QueryValue,
        E: QueryError,
    {
        if !query.needs_fetch(stale_time) {
            return;
        }
        if let Some(fetcher) = query.fetcher() {
            let request = query.execute(&self.cache, fetcher);
            self.cache.spawn(async move {
                let _ = request.await;
            });
        }
    }

    /// Listens to every state change of a query without activating it.
    ///
    /// The entry is created if it doesn't exist yet.
    pub fn subscribe<V, E>(
        &self,
        key: impl Into<QueryKey>,
        listener: impl Fn(&QueryState<V, E>) + 'static,
    ) -> Subscription
    where
        V: QueryValue,
        E: QueryError,
    {
        let query = self.cache.get_or_create_query::<V, E>(key.into());
        let listener_key = query.add_listener(listener);
        Subscription::new(move || {
            query.remove_listener(listener_key);
        })
    }

    /// Retrieve the current state for an existing query.
    /// If the query does not exist, [`None`](Option::None) will be returned.
    /// Useful for when you want to introspect the state of a query without subscribing to it.
    pub fn peek_query_state<V, E>(&self, key: impl Into<QueryKey>) -> Option<QueryState<V, E>>
    where
        V: QueryValue,
        E: QueryError,
    {
        self.cache
            .get_query::<V, E>(&key.into())
            .map(|q| q.get_state())
    }

    /// The data of an existing query, if it has any.
    pub fn get_query_data<V, E>(&self, key: impl Into<QueryKey>) -> Option<V>
    where
        V: QueryValue,
        E: QueryError,
    {
        self.cache
            .get_query::<V, E>(&key.into())
            .and_then(|q| q.with_state(|state| state.data().cloned()))
    }

    /// Attempts to invalidate an entry in the Query Cache.
    /// Matching query is marked as invalid, and will be refetched in background once it's active.
    ///
    /// Returns true if the entry was successfully invalidated.
    ///
    /// Example:
    /// ```
    /// use bookshelf_query::*;
    /// use futures::executor::LocalPool;
    ///
    /// let pool = LocalPool::new();
    /// let client = QueryClient::new(pool.spawner());
    /// client.set_query_data::<u32, ()>("count", 0);
    /// assert!(client.invalidate_query::<u32, ()>("count"));
    /// ```
    pub fn invalidate_query<V, E>(&self, key: impl Into<QueryKey>) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        self.cache
            .get_query::<V, E>(&key.into())
            .map(|query| self.cache.invalidate(&query))
            .unwrap_or(false)
    }

    /// Invalidates every entry whose key starts with `prefix`, regardless of value type.
    /// All matching queries are immediately marked as invalid and active queries are refetched in the background.
    ///
    /// Returns the keys that were successfully invalidated.
    ///
    /// Example:
    /// ```
    /// use bookshelf_query::*;
    /// use futures::executor::LocalPool;
    ///
    /// let pool = LocalPool::new();
    /// let client = QueryClient::new(pool.spawner());
    /// client.set_query_data::<String, ()>(QueryKey::new("book").with("bookId", 1), "Dune".into());
    /// client.set_query_data::<String, ()>(QueryKey::new("book").with("bookId", 2), "Emma".into());
    ///
    /// let invalidated = client.invalidate_queries("book");
    /// assert_eq!(2, invalidated.len());
    /// ```
    pub fn invalidate_queries(&self, prefix: impl Into<QueryKey>) -> Vec<QueryKey> {
        self.cache.invalidate_matching(Some(&prefix.into()))
    }

    /// Invalidates all queries in the cache.
    pub fn invalidate_all_queries(&self) -> Vec<QueryKey> {
        self.cache.invalidate_matching(None)
    }

    /// Returns the current size of the cache.
    pub fn size(&self) -> usize {
        self.cache.size()
    }

    /// A synchronous function that can be used to immediately set a query's data.
    ///
    /// If the query does not exist, it will be created.
    ///
    /// If you need to fetch the data asynchronously, use [`fetch_query`](Self::fetch_query) or [`prefetch_query`](Self::prefetch_query).
    ///
    /// If the updater function returns [`None`](Option::None), the query data will not be updated.
    ///
    /// If the updater function receives [`None`](Option::None) as input, you can return [`None`](Option::None) to bail out of the update and thus not create a new cache entry.
    ///
    /// Example:
    /// ```
    /// use bookshelf_query::*;
    /// use futures::executor::LocalPool;
    ///
    /// #[derive(Debug, Clone, PartialEq)]
    /// struct Monkey {
    ///     name: String
    /// }
    ///
    /// let pool = LocalPool::new();
    /// let client = QueryClient::new(pool.spawner());
    /// let key = QueryKey::new("monkey").with("id", 0);
    ///
    /// // Overwrite existing data.
    /// client.update_query_data::<Monkey, ()>(key.clone(), |_| Some(Monkey { name: "George".to_string() }));
    ///
    /// // Don't overwrite George.
    /// client.update_query_data::<Monkey, ()>(key.clone(), |probably_george| {
    ///    if let Some(Monkey { name }) = probably_george {
    ///        if name == "George" {
    ///           return None;
    ///        }
    ///    }
    ///    Some(Monkey { name: "Luffy".to_string() })
    /// });
    ///
    /// assert_eq!(
    ///     Some(Monkey { name: "George".to_string() }),
    ///     client.get_query_data::<Monkey, ()>(key),
    /// );
    /// ```
    pub fn update_query_data<V, E>(
        &self,
        key: impl Into<QueryKey>,
        updater: impl FnOnce(Option<&V>) -> Option<V>,
    ) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        let key = key.into();
        let updated = match self.cache.get_query::<V, E>(&key) {
            Some(query) => query.maybe_map_state(|state| match state {
                QueryState::Created | QueryState::Loading | QueryState::Failed(_) => {
                    if let Some(result) = updater(None) {
                        Ok(QueryState::Loaded(QueryData::now(result)))
                    } else {
                        Err(state)
                    }
                }
                QueryState::Fetching(ref data) => {
                    if let Some(result) = updater(Some(&data.data)) {
                        Ok(QueryState::Fetching(QueryData::now(result)))
                    } else {
                        Err(state)
                    }
                }
                QueryState::Loaded(ref data) | QueryState::Invalid(ref data) => {
                    if let Some(result) = updater(Some(&data.data)) {
                        Ok(QueryState::Loaded(QueryData::now(result)))
                    } else {
                        Err(state)
                    }
                }
            }),
            None => match updater(None) {
                Some(result) => {
                    let query = self.cache.get_or_create_query::<V, E>(key.clone());
                    query.set_state(QueryState::Loaded(QueryData::now(result)));
                    true
                }
                None => false,
            },
        };

        if updated {
            self.cache.notify_observers(CacheEvent::Updated(key));
        }
        updated
    }

    /// Update the query's data.
    /// If the query does not exist, it will be created.
    pub fn set_query_data<V, E>(&self, key: impl Into<QueryKey>, data: V)
    where
        V: QueryValue,
        E: QueryError,
    {
        self.update_query_data::<V, E>(key, |_| Some(data));
    }

    /// Mutate the existing data if it exists.
    /// All listeners will be notified, regardless of whether the data was updated or not.
    pub fn update_query_data_mut<V, E>(
        &self,
        key: impl Into<QueryKey>,
        updater: impl FnOnce(&mut V),
    ) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        let key = key.into();
        let Some(query) = self.cache.get_query::<V, E>(&key) else {
            return false;
        };

        let mut updated = false;
        query.update_state(|state| {
            if let Some(data) = state.data_mut() {
                updater(data);
                updated = true;
            }
        });
        if updated {
            self.cache.notify_observers(CacheEvent::Updated(key));
        }
        updated
    }

    /// Cancel any currently executing query.
    /// Returns whether the query was cancelled or not.
    pub fn cancel_query<V, E>(&self, key: impl Into<QueryKey>) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        self.cache
            .get_query::<V, E>(&key.into())
            .map(|query| query.cancel())
            .unwrap_or(false)
    }

    /// Removes a single entry from the cache.
    pub fn evict_query<V, E>(&self, key: impl Into<QueryKey>) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        self.cache.evict_query::<V, E>(&key.into())
    }

    /// Captures the data of an entry. Running the returned [`Rollback`] puts it back.
    ///
    /// If the entry had no data, rolling back resets it to [`QueryState::Created`].
    pub fn snapshot<V, E>(&self, key: impl Into<QueryKey>) -> Rollback
    where
        V: QueryValue,
        E: QueryError,
    {
        let key = key.into();
        let previous = self.get_query_data::<V, E>(key.clone());
        let client = self.clone();

        Rollback::new(move || match previous {
            Some(data) => client.set_query_data::<V, E>(key, data),
            None => {
                if let Some(query) = client.cache.get_query::<V, E>(&key) {
                    query.set_state(QueryState::Created);
                    client.cache.notify_observers(CacheEvent::Updated(key));
                }
            }
        })
    }

    /// Registers the cache observer.
    pub fn register_cache_observer(&self, observer: impl CacheObserver + 'static) -> CacheObserverKey {
        self.cache.register_observer(observer)
    }

    /// Removes a cache observer. Returns false if it was not registered.
    pub fn unregister_cache_observer(&self, key: CacheObserverKey) -> bool {
        self.cache.unregister_observer(key)
    }

    /// Clears the cache. All queries will be removed.
    pub fn clear(&self) {
        self.cache.clear_all_queries()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("size", &self.size())
            .field("default_options", &self.default_options)
            .finish()
    }
}
