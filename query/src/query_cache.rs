use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::{hash_map::Entry, HashMap},
    future::Future,
    rc::Rc,
};

use futures::task::{LocalFutureObj, LocalSpawn};
use slotmap::SlotMap;

use crate::{
    cache_observer::{CacheEvent, CacheObserver},
    query::Query,
    QueryError, QueryKey, QueryValue,
};

#[derive(Clone)]
pub(crate) struct QueryCache {
    cache: Rc<RefCell<HashMap<(TypeId, TypeId), Box<dyn CacheEntryTrait>>>>,
    observers: Rc<RefCell<SlotMap<CacheObserverKey, Rc<dyn CacheObserver>>>>,
    spawner: Rc<dyn LocalSpawn>,
    refetch_on_invalidate: bool,
}

slotmap::new_key_type! {
    /// Identifies a registered [`CacheObserver`].
    pub struct CacheObserverKey;
}

pub(crate) struct CacheEntry<V, E>(HashMap<QueryKey, Query<V, E>>);

// Trait to enable cache introspection among distinct cache entry maps.
pub(crate) trait CacheEntryTrait: CacheSize + CacheQueries {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V, E> CacheEntryTrait for CacheEntry<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) trait CacheSize {
    fn size(&self) -> usize;
}

impl<V, E> CacheSize for CacheEntry<V, E> {
    fn size(&self) -> usize {
        self.0.len()
    }
}

// Type-erased access to the queries of one entry map.
pub(crate) trait CacheQueries {
    fn matching(&self, prefix: Option<&QueryKey>) -> Vec<Box<dyn AnyQuery>>;
    fn drain(&mut self) -> Vec<Box<dyn AnyQuery>>;
}

impl<V, E> CacheQueries for CacheEntry<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    fn matching(&self, prefix: Option<&QueryKey>) -> Vec<Box<dyn AnyQuery>> {
        self.0
            .values()
            .filter(|query| prefix.map_or(true, |prefix| query.key.starts_with(prefix)))
            .map(|query| Box::new(query.clone()) as Box<dyn AnyQuery>)
            .collect()
    }

    fn drain(&mut self) -> Vec<Box<dyn AnyQuery>> {
        self.0
            .drain()
            .map(|(_, query)| Box::new(query) as Box<dyn AnyQuery>)
            .collect()
    }
}

pub(crate) trait AnyQuery {
    fn key(&self) -> &QueryKey;
    fn invalidate(&self, cache: &QueryCache) -> bool;
    fn dispose(&self);
}

impl<V, E> AnyQuery for Query<V, E>
where
    V: QueryValue,
    E: QueryError,
{
    fn key(&self) -> &QueryKey {
        &self.key
    }

    fn invalidate(&self, cache: &QueryCache) -> bool {
        cache.invalidate(self)
    }

    fn dispose(&self) {
        Query::dispose(self)
    }
}

impl QueryCache {
    pub(crate) fn new(spawner: Rc<dyn LocalSpawn>, refetch_on_invalidate: bool) -> Self {
        Self {
            cache: Rc::new(RefCell::new(HashMap::new())),
            observers: Rc::new(RefCell::new(SlotMap::with_key())),
            spawner,
            refetch_on_invalidate,
        }
    }

    pub(crate) fn get_or_create_query<V, E>(&self, key: QueryKey) -> Query<V, E>
    where
        V: QueryValue,
        E: QueryError,
    {
        let (query, created) = self.use_cache(move |cache| match cache.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let query = Query::new(entry.key().clone());
                (entry.insert(query).clone(), true)
            }
        });

        // Notify on insert, outside of the cache borrow.
        if created {
            self.notify_observers(CacheEvent::Created(query.key.clone()));
        }

        query
    }

    pub(crate) fn get_query<V, E>(&self, key: &QueryKey) -> Option<Query<V, E>>
    where
        V: QueryValue,
        E: QueryError,
    {
        self.use_cache_option(move |cache| cache.get(key).cloned())
    }

    pub(crate) fn size(&self) -> usize {
        RefCell::try_borrow(&self.cache)
            .expect("size borrow")
            .values()
            .map(|b| b.size())
            .sum()
    }

    pub(crate) fn evict_query<V, E>(&self, key: &QueryKey) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        let result = self.use_cache_option_mut::<V, E, _, _>(move |cache| cache.remove(key));

        if let Some(query) = result {
            query.dispose();
            self.notify_observers(CacheEvent::Removed(query.key.clone()));
            true
        } else {
            false
        }
    }

    /// Marks a query invalid and refetches it in the background when observed.
    ///
    /// An observed entry without data (never fetched, cancelled or failed) is
    /// refetched as well, although there is nothing to mark invalid.
    pub(crate) fn invalidate<V, E>(&self, query: &Query<V, E>) -> bool
    where
        V: QueryValue,
        E: QueryError,
    {
        let invalidated = query.mark_invalid();
        if invalidated {
            tracing::debug!(key = %query.key, "invalidated query");
            self.notify_observers(CacheEvent::Invalidated(query.key.clone()));
        }

        let refetch = invalidated || query.needs_fetch(None);
        if self.refetch_on_invalidate && refetch && query.is_active() {
            if let Some(fetcher) = query.fetcher() {
                let request = query.execute(self, fetcher);
                self.spawn(async move {
                    let _ = request.await;
                });
            }
        }
        invalidated
    }

    /// Invalidates every query addressed by `prefix`, or all queries when `None`.
    pub(crate) fn invalidate_matching(&self, prefix: Option<&QueryKey>) -> Vec<QueryKey> {
        // Collect first, then invalidate: refetching re-enters the cache.
        let queries = RefCell::try_borrow(&self.cache)
            .expect("invalidate_matching borrow")
            .values()
            .flat_map(|entry| entry.matching(prefix))
            .collect::<Vec<_>>();

        queries
            .into_iter()
            .filter(|query| query.invalidate(self))
            .map(|query| query.key().clone())
            .collect()
    }

    pub(crate) fn clear_all_queries(&self) {
        let queries = {
            let mut cache = RefCell::try_borrow_mut(&self.cache).expect("clear borrow_mut");
            let queries = cache
                .values_mut()
                .flat_map(|entry| entry.drain())
                .collect::<Vec<_>>();
            cache.clear();
            queries
        };

        tracing::debug!(removed = queries.len(), "cleared query cache");
        for query in queries {
            query.dispose();
        }
        self.notify_observers(CacheEvent::Cleared);
    }

    pub(crate) fn use_cache_option<V, E, F, R>(&self, func: F) -> Option<R>
    where
        V: QueryValue,
        E: QueryError,
        F: FnOnce(&HashMap<QueryKey, Query<V, E>>) -> Option<R>,
    {
        let cache = RefCell::try_borrow(&self.cache).expect("use_cache_option borrow");
        let type_key = (TypeId::of::<V>(), TypeId::of::<E>());
        let cache = cache.get(&type_key)?;
        let cache = cache
            .as_any()
            .downcast_ref::<CacheEntry<V, E>>()
            .expect(EXPECT_CACHE_ERROR);
        func(&cache.0)
    }

    pub(crate) fn use_cache_option_mut<V, E, F, R>(&self, func: F) -> Option<R>
    where
        V: QueryValue,
        E: QueryError,
        F: FnOnce(&mut HashMap<QueryKey, Query<V, E>>) -> Option<R>,
    {
        let mut cache = RefCell::try_borrow_mut(&self.cache).expect("use_cache_option_mut borrow");
        let type_key = (TypeId::of::<V>(), TypeId::of::<E>());
        let cache = cache.get_mut(&type_key)?;
        let cache = cache
            .as_any_mut()
            .downcast_mut::<CacheEntry<V, E>>()
            .expect(EXPECT_CACHE_ERROR);
        func(&mut cache.0)
    }

    pub(crate) fn use_cache<V, E, R>(
        &self,
        func: impl FnOnce(&mut HashMap<QueryKey, Query<V, E>>) -> R,
    ) -> R
    where
        V: QueryValue,
        E: QueryError,
    {
        let mut cache = RefCell::try_borrow_mut(&self.cache).expect("use_cache borrow");

        let type_key = (TypeId::of::<V>(), TypeId::of::<E>());

        let cache: &mut Box<dyn CacheEntryTrait> = match cache.entry(type_key) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                let wrapped: CacheEntry<V, E> = CacheEntry(HashMap::new());
                v.insert(Box::new(wrapped))
            }
        };

        let cache: &mut CacheEntry<V, E> = cache
            .as_any_mut()
            .downcast_mut::<CacheEntry<V, E>>()
            .expect(EXPECT_CACHE_ERROR);

        func(&mut cache.0)
    }

    pub(crate) fn register_observer(&self, observer: impl CacheObserver + 'static) -> CacheObserverKey {
        self.observers
            .try_borrow_mut()
            .expect("register_observer borrow_mut")
            .insert(Rc::new(observer))
    }

    pub(crate) fn unregister_observer(&self, key: CacheObserverKey) -> bool {
        self.observers
            .try_borrow_mut()
            .expect("unregister_observer borrow_mut")
            .remove(key)
            .is_some()
    }

    pub(crate) fn notify_observers(&self, event: CacheEvent) {
        let observers = self
            .observers
            .try_borrow()
            .expect("notify_observers borrow")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for observer in observers {
            observer.process_cache_event(event.clone())
        }
    }

    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        if let Err(error) = self
            .spawner
            .spawn_local_obj(LocalFutureObj::new(Box::new(future)))
        {
            tracing::error!(%error, "failed to spawn background query fetch");
        }
    }
}

const EXPECT_CACHE_ERROR: &str =
    "Error: Query Cache Type Mismatch. This should not happen. Please file a bug report.";
