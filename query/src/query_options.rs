use std::time::Duration;

/// Default options for all queries under this client.
/// Only differs from [`QueryOptions`] in that it doesn't have a default value.
#[derive(Debug, Clone, Copy)]
pub struct DefaultQueryOptions {
    /// Time before a query is considered stale.
    pub stale_time: Option<Duration>,
    /// Whether invalidated queries with active observers refetch in the background.
    pub refetch_on_invalidate: bool,
}

impl Default for DefaultQueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Some(DEFAULT_STALE_TIME),
            refetch_on_invalidate: true,
        }
    }
}

const DEFAULT_STALE_TIME: Duration = Duration::from_secs(10);

/**
 * Options for a query [`use_query()`](crate::QueryClient::use_query)
 */
#[derive(Debug, Clone)]
pub struct QueryOptions<V> {
    /// Placeholder value to use while the query is loading for the first time.
    pub default_value: Option<V>,
    /// The duration that should pass before a query is considered stale.
    /// If the query is stale, it will be refetched.
    /// If no stale_time, the query will never be considered stale.
    /// Stale time is checked when a [`QueryResult`](crate::QueryResult) is created
    /// and when [`fetch_query()`](crate::QueryClient::fetch_query) is called.
    /// Default is 10 seconds.
    pub stale_time: Option<Duration>,
}

impl<V> QueryOptions<V> {
    /// Options that inherit the client wide defaults.
    pub fn from_defaults(defaults: &DefaultQueryOptions) -> Self {
        QueryOptions {
            default_value: None,
            stale_time: defaults.stale_time,
        }
    }

    /// Set the default value.
    pub fn set_default_value(self, default_value: Option<V>) -> Self {
        QueryOptions {
            default_value,
            ..self
        }
    }

    /// Set the stale_time.
    pub fn set_stale_time(self, stale_time: Option<Duration>) -> Self {
        QueryOptions { stale_time, ..self }
    }

    /// Transform the default value.
    pub fn map_value<R>(self, func: impl FnOnce(V) -> R) -> QueryOptions<R> {
        QueryOptions {
            default_value: self.default_value.map(func),
            stale_time: self.stale_time,
        }
    }

    /// Treats a zero stale_time as "always stale" and warns about it.
    pub fn validate(self) -> Self {
        let stale_time = ensure_valid_stale_time(self.stale_time);

        QueryOptions { stale_time, ..self }
    }
}

impl<V> Default for QueryOptions<V> {
    fn default() -> Self {
        Self::from_defaults(&DefaultQueryOptions::default()).validate()
    }
}

fn ensure_valid_stale_time(stale_time: Option<Duration>) -> Option<Duration> {
    match stale_time {
        Some(stale_time) if stale_time.is_zero() => {
            tracing::warn!("stale_time is zero. Every read will refetch the query.");
            Some(stale_time)
        }
        stale_time => stale_time,
    }
}
