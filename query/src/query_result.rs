use std::{cell::RefCell, rc::Rc, time::Duration};

use crate::{
    query::{Fetcher, Query},
    query_observer::{ListenerKey, Listeners},
    QueryClient, QueryError, QueryKey, QueryOptions, QueryState, QueryValue, Subscription,
};

/// An active observer of a query, created by [`QueryClient::use_query`].
///
/// While it is alive, invalidating the query refetches it in the background.
/// If the cache is cleared, the next read re-attaches to a fresh entry for the
/// same key and fetches it again.
pub struct QueryResult<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    client: QueryClient,
    key: QueryKey,
    fetcher: Fetcher<V, E>,
    default_value: Option<V>,
    stale_time: Option<Duration>,
    attached: RefCell<Attached<V, E>>,
    listeners: Rc<Listeners<QueryState<V, E>>>,
}

struct Attached<V, E> {
    query: Query<V, E>,
    forward: ListenerKey,
}

impl<V, E> QueryResult<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    pub(crate) fn new(
        client: QueryClient,
        key: QueryKey,
        fetcher: Fetcher<V, E>,
        options: QueryOptions<V>,
    ) -> Self {
        let options = options.validate();
        let listeners = Rc::new(Listeners::new());
        let query = client.cache.get_or_create_query::<V, E>(key.clone());
        let attached = Self::attach(&query, &fetcher, &listeners);

        let result = Self {
            client,
            key,
            fetcher,
            default_value: options.default_value,
            stale_time: options.stale_time,
            attached: RefCell::new(attached),
            listeners,
        };
        result.client.ensure_query_data(&query, result.stale_time);
        result
    }

    fn attach(
        query: &Query<V, E>,
        fetcher: &Fetcher<V, E>,
        listeners: &Rc<Listeners<QueryState<V, E>>>,
    ) -> Attached<V, E> {
        query.set_fetcher(fetcher.clone());
        query.activate();
        let forward = query.add_listener({
            let listeners = listeners.clone();
            move |state| listeners.notify(state)
        });

        Attached {
            query: query.clone(),
            forward,
        }
    }

    fn detach(attached: &Attached<V, E>) {
        attached.query.remove_listener(attached.forward);
        attached.query.deactivate();
    }

    // The entry for the key, re-attaching if the cache dropped the one we observed.
    fn query(&self) -> Query<V, E> {
        let current = self.client.cache.get_query::<V, E>(&self.key);
        let observed = self
            .attached
            .try_borrow()
            .expect("query_result borrow")
            .query
            .clone();

        match current {
            Some(current) if current.ptr_eq(&observed) => observed,
            _ => {
                tracing::debug!(key = %self.key, "re-attaching observer to a new cache entry");
                let query = self
                    .client
                    .cache
                    .get_or_create_query::<V, E>(self.key.clone());
                let attached = Self::attach(&query, &self.fetcher, &self.listeners);
                let previous = self.attached.replace(attached);
                Self::detach(&previous);
                self.client.ensure_query_data(&query, self.stale_time);
                query
            }
        }
    }

    /// The key of the observed query.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The current state of the query.
    pub fn state(&self) -> QueryState<V, E> {
        self.query().get_state()
    }

    /// The current value of the query, or the default value while there is none.
    pub fn data(&self) -> Option<V> {
        self.query()
            .with_state(|state| state.data().cloned())
            .or_else(|| self.default_value.clone())
    }

    /// The error of the last fetch, if it failed.
    pub fn error(&self) -> Option<E> {
        self.query().with_state(|state| state.error().cloned())
    }

    /// No data has been loaded yet.
    pub fn is_loading(&self) -> bool {
        self.query().with_state(|state| state.is_loading())
    }

    /// A fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.query().with_state(|state| state.is_fetching())
    }

    /// The query holds data.
    pub fn is_success(&self) -> bool {
        self.query().with_state(|state| state.is_success())
    }

    /// The last fetch failed.
    pub fn is_error(&self) -> bool {
        self.query().with_state(|state| state.is_error())
    }

    /// Refetch the query in the background.
    /// Attaches to the request in flight if there is one.
    pub fn refetch(&self) {
        let query = self.query();
        let request = query.execute(&self.client.cache, self.fetcher.clone());
        self.client.cache.spawn(async move {
            let _ = request.await;
        });
    }

    /// Listens to every state change of the observed query.
    pub fn subscribe(&self, listener: impl Fn(&QueryState<V, E>) + 'static) -> Subscription {
        let key = self.listeners.add(listener);
        let listeners = Rc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.remove(key);
            }
        })
    }
}

impl<V, E> Drop for QueryResult<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    fn drop(&mut self) {
        if let Ok(attached) = self.attached.try_borrow() {
            Self::detach(&attached);
        }
        self.listeners.clear();
    }
}

impl<V, E> std::fmt::Debug for QueryResult<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use futures::executor::LocalPool;

    use super::*;

    #[test]
    fn default_value_while_loading() {
        let mut pool = LocalPool::new();
        let client = QueryClient::new(pool.spawner());

        let result = client.use_query(
            "numbers",
            || async { Ok::<_, ()>(vec![1, 2, 3]) },
            QueryOptions::default().set_default_value(Some(Vec::new())),
        );

        assert_eq!(Some(Vec::new()), result.data());
        assert!(result.is_loading());

        pool.run_until_stalled();

        assert_eq!(Some(vec![1, 2, 3]), result.data());
        assert!(result.is_success());
    }

    #[test]
    fn subscribers_follow_the_entry_across_clear() {
        let mut pool = LocalPool::new();
        let client = QueryClient::new(pool.spawner());
        let calls = Rc::new(Cell::new(0));
        let notified = Rc::new(Cell::new(0));

        let result = client.use_query(
            "count",
            {
                let calls = calls.clone();
                move || {
                    calls.set(calls.get() + 1);
                    let value = calls.get();
                    async move { Ok::<u32, ()>(value) }
                }
            },
            QueryOptions::default(),
        );
        let _subscription = result.subscribe({
            let notified = notified.clone();
            move |_| notified.set(notified.get() + 1)
        });

        pool.run_until_stalled();
        assert_eq!(Some(1), result.data());

        client.clear();
        assert_eq!(0, client.size());

        // Reading re-attaches and fetches again.
        assert!(result.is_loading());
        pool.run_until_stalled();
        assert_eq!(Some(2), result.data());
        assert!(notified.get() >= 3);
    }

    #[test]
    fn dropping_the_result_deactivates_the_query() {
        let pool = LocalPool::new();
        let client = QueryClient::new(pool.spawner());

        let result = client.use_query(
            "inactive",
            || async { Ok::<u32, ()>(1) },
            QueryOptions::default(),
        );
        let query = client.cache.get_query::<u32, ()>(&"inactive".into());
        assert!(query.as_ref().is_some_and(|q| q.is_active()));

        drop(result);
        assert!(query.is_some_and(|q| !q.is_active()));
    }

    #[test]
    fn failed_fetch_exposes_error() {
        let mut pool = LocalPool::new();
        let client = QueryClient::new(pool.spawner());

        let result = client.use_query(
            "failing",
            || async { Err::<u32, _>("nope") },
            QueryOptions::default(),
        );
        pool.run_until_stalled();

        assert!(result.is_error());
        assert_eq!(Some("nope"), result.error());
        assert_eq!(None, result.data());
    }

    // Counts warnings emitted while it is the default subscriber.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn zero_stale_time_is_reported() {
        use tracing_subscriber::layer::SubscriberExt;

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let pool = LocalPool::new();
        let client = QueryClient::new(pool.spawner());

        tracing::subscriber::with_default(subscriber, || {
            let _result = client.use_query(
                "numbers",
                || async { Ok::<_, ()>(1) },
                QueryOptions::default().set_stale_time(Some(Duration::ZERO)),
            );
        });

        assert_eq!(1, warnings.load(Ordering::SeqCst));
    }
}
