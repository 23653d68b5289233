use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::Rc,
    time::Duration,
};

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::{
    cache_observer::CacheEvent,
    instant::time_until_stale,
    query_cache::QueryCache,
    query_observer::{ListenerKey, Listeners},
    QueryData, QueryKey, QueryState,
};

pub(crate) type Fetcher<V, E> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<V, E>>>;

/// The canonical in-flight request of a query. Every caller attaches to it.
pub(crate) type SharedRequest<V, E> = Shared<LocalBoxFuture<'static, Result<V, E>>>;

#[derive(Clone)]
pub(crate) struct Query<V, E> {
    pub(crate) key: QueryKey,

    // State
    state: Rc<Cell<QueryState<V, E>>>,

    // Execution. A fetch only commits while the generation it started in is current.
    generation: Rc<Cell<u64>>,
    current_request: Rc<RefCell<Option<SharedRequest<V, E>>>>,
    fetcher: Rc<RefCell<Option<Fetcher<V, E>>>>,

    // Synchronization
    listeners: Rc<Listeners<QueryState<V, E>>>,
    active_observers: Rc<Cell<usize>>,
}

impl<V, E> PartialEq for Query<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<V, E> Eq for Query<V, E> {}

/// Boxes a fetch function so it can be stored on a query and called again on refetch.
pub(crate) fn into_fetcher<V, E, Fu>(fetcher: impl Fn() -> Fu + 'static) -> Fetcher<V, E>
where
    Fu: Future<Output = Result<V, E>> + 'static,
{
    Rc::new(move || fetcher().boxed_local())
}

impl<V, E> Query<V, E>
where
    V: crate::QueryValue,
    E: crate::QueryError,
{
    pub(crate) fn new(key: QueryKey) -> Self {
        Query {
            key,
            state: Rc::new(Cell::new(QueryState::Created)),
            generation: Rc::new(Cell::new(0)),
            current_request: Rc::new(RefCell::new(None)),
            fetcher: Rc::new(RefCell::new(None)),
            listeners: Rc::new(Listeners::new()),
            active_observers: Rc::new(Cell::new(0)),
        }
    }

    /// Whether both handles point at the same cache entry.
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub(crate) fn set_state(&self, state: QueryState<V, E>) {
        self.state.set(state.clone());
        // Notify listeners after the state is stored so they read the new value.
        self.listeners.notify(&state);
    }

    pub(crate) fn update_state(&self, update_fn: impl FnOnce(&mut QueryState<V, E>)) {
        let mut state = self.state.take();
        update_fn(&mut state);
        self.set_state(state);
    }

    /// Be careful with this function. Used to avoid cloning.
    /// If update returns Ok(_) the state will be updated and subscribers will be notified.
    /// If update returns Err(_) the state will not be updated and subscribers will not be notified.
    /// Err(_) should always contain the previous state.
    pub(crate) fn maybe_map_state(
        &self,
        update_fn: impl FnOnce(QueryState<V, E>) -> Result<QueryState<V, E>, QueryState<V, E>>,
    ) -> bool {
        let current_state = self.state.take();

        match update_fn(current_state) {
            Ok(new_state) => {
                self.set_state(new_state);
                true
            }
            Err(old_state) => {
                self.state.set(old_state);
                false
            }
        }
    }

    pub(crate) fn get_state(&self) -> QueryState<V, E> {
        let state = self.state.take();
        let state_clone = state.clone();
        self.state.set(state);
        state_clone
    }

    // Useful to avoid clones.
    pub(crate) fn with_state<T>(&self, func: impl FnOnce(&QueryState<V, E>) -> T) -> T {
        let state = self.state.take();
        let result = func(&state);
        self.state.set(state);
        result
    }

    /// Marks the query as invalid. A fetch in flight is superseded and will not commit.
    pub(crate) fn mark_invalid(&self) -> bool {
        let in_flight = self.current_request.borrow().is_some();
        let updated = self.maybe_map_state(|state| match state {
            QueryState::Loaded(data) | QueryState::Fetching(data) => Ok(QueryState::Invalid(data)),
            QueryState::Loading => Ok(QueryState::Created),
            state => Err(state),
        });
        if in_flight {
            self.supersede();
        }
        updated
    }

    pub(crate) fn is_stale(&self, stale_time: Option<Duration>) -> bool {
        let last_update = self.with_state(|state| state.updated_at());

        match (last_update, stale_time) {
            (Some(updated_at), Some(stale_time)) => {
                time_until_stale(updated_at, stale_time).is_zero()
            }
            _ => false,
        }
    }

    /// Whether an observer mounting now has to start a fetch.
    pub(crate) fn needs_fetch(&self, stale_time: Option<Duration>) -> bool {
        let needs_data = self.with_state(|state| {
            matches!(
                state,
                QueryState::Created | QueryState::Invalid(_) | QueryState::Failed(_)
            )
        });
        let loaded = self.with_state(|state| matches!(state, QueryState::Loaded(_)));
        needs_data || (loaded && self.is_stale(stale_time))
    }

    /**
     * Observers.
     */

    pub(crate) fn add_listener(&self, listener: impl Fn(&QueryState<V, E>) + 'static) -> ListenerKey {
        self.listeners.add(listener)
    }

    pub(crate) fn remove_listener(&self, key: ListenerKey) -> bool {
        self.listeners.remove(key)
    }

    pub(crate) fn activate(&self) {
        self.active_observers.set(self.active_observers.get() + 1);
    }

    pub(crate) fn deactivate(&self) {
        self.active_observers
            .set(self.active_observers.get().saturating_sub(1));
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active_observers.get() > 0
    }

    pub(crate) fn set_fetcher(&self, fetcher: Fetcher<V, E>) {
        *self.fetcher.try_borrow_mut().expect("set_fetcher borrow_mut") = Some(fetcher);
    }

    pub(crate) fn fetcher(&self) -> Option<Fetcher<V, E>> {
        self.fetcher.try_borrow().expect("fetcher borrow").clone()
    }

    /**
     * Execution and Cancellation.
     */

    /// Starts a fetch, or attaches to the one already in flight.
    pub(crate) fn execute(&self, cache: &QueryCache, fetcher: Fetcher<V, E>) -> SharedRequest<V, E> {
        if let Some(request) = self.current_request() {
            return request;
        }

        let generation = self.supersede();

        self.maybe_map_state(|state| match state {
            QueryState::Created | QueryState::Loading | QueryState::Failed(_) => {
                Ok(QueryState::Loading)
            }
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Ok(QueryState::Fetching(data))
            }
        });

        let request = {
            let query = self.clone();
            let cache = cache.clone();
            async move {
                tracing::debug!(key = %query.key, generation, "fetching query");
                let result = fetcher().await;
                query.commit(&cache, generation, &result);
                result
            }
            .boxed_local()
            .shared()
        };

        *self
            .current_request
            .try_borrow_mut()
            .expect("execute borrow_mut") = Some(request.clone());

        request
    }

    fn commit(&self, cache: &QueryCache, generation: u64, result: &Result<V, E>) {
        if self.generation.get() != generation {
            tracing::debug!(key = %self.key, generation, "discarding superseded query result");
            return;
        }
        self.current_request
            .try_borrow_mut()
            .expect("commit borrow_mut")
            .take();

        match result {
            Ok(data) => self.set_state(QueryState::Loaded(QueryData::now(data.clone()))),
            Err(error) => {
                tracing::debug!(key = %self.key, ?error, "query failed");
                self.set_state(QueryState::Failed(error.clone()))
            }
        }
        cache.notify_observers(CacheEvent::Updated(self.key.clone()));
    }

    pub(crate) fn current_request(&self) -> Option<SharedRequest<V, E>> {
        self.current_request
            .try_borrow()
            .expect("current_request borrow")
            .clone()
    }

    /// Starts a new generation. Whatever is in flight will not commit.
    fn supersede(&self) -> u64 {
        self.current_request
            .try_borrow_mut()
            .expect("supersede borrow_mut")
            .take();
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        generation
    }

    /// Cooperative cancellation: the transport call keeps running, but its
    /// result is dropped and the state reverts to what it was before the fetch.
    pub(crate) fn cancel(&self) -> bool {
        if self.current_request().is_none() {
            return false;
        }
        self.supersede();
        self.maybe_map_state(|state| match state {
            QueryState::Loading => Ok(QueryState::Created),
            QueryState::Fetching(data) => Ok(QueryState::Loaded(data)),
            state => Err(state),
        });
        true
    }

    /// Detaches the query from the cache. Listeners see it reset to Created.
    pub(crate) fn dispose(&self) {
        self.supersede();
        self.set_state(QueryState::Created);
    }
}
