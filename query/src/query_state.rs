use crate::Instant;

/// The lifecycle of a cache entry.
///
/// Each variant corresponds to a particular state of a query, starting from
/// creation and covering all transitions up to invalidation and failure.
#[derive(Clone, PartialEq, Eq)]
pub enum QueryState<V, E> {
    /// The entry exists but no fetch has been started yet.
    Created,

    /// The first fetch is in flight. No data is available.
    Loading,

    /// A subsequent fetch is in flight.
    ///
    /// The associated `QueryData<V>` holds the previously fetched data.
    Fetching(QueryData<V>),

    /// The entry holds fresh data.
    Loaded(QueryData<V>),

    /// The entry holds data that has been invalidated and will be refetched on
    /// next use (immediately, if the entry has an active observer).
    Invalid(QueryData<V>),

    /// The last fetch failed.
    Failed(E),
}

impl<V, E> QueryState<V, E> {
    /// Returns the QueryData for the current QueryState, if present.
    pub fn query_data(&self) -> Option<&QueryData<V>> {
        match self {
            QueryState::Created | QueryState::Loading | QueryState::Failed(_) => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(data)
            }
        }
    }

    /// Returns the data contained within the QueryState, if present.
    pub fn data(&self) -> Option<&V> {
        self.query_data().map(|s| &s.data)
    }

    /// Returns the error of a failed fetch.
    pub fn error(&self) -> Option<&E> {
        match self {
            QueryState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Returns the last updated timestamp for the QueryState, if present.
    pub fn updated_at(&self) -> Option<Instant> {
        self.query_data().map(|s| s.updated_at)
    }

    /// No data has been loaded yet.
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Created | QueryState::Loading)
    }

    /// A fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        matches!(self, QueryState::Loading | QueryState::Fetching(_))
    }

    /// Data is available.
    pub fn is_success(&self) -> bool {
        self.query_data().is_some()
    }

    /// The last fetch failed.
    pub fn is_error(&self) -> bool {
        matches!(self, QueryState::Failed(_))
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut V> {
        match self {
            QueryState::Created | QueryState::Loading | QueryState::Failed(_) => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(&mut data.data)
            }
        }
    }

    pub(crate) fn into_data(self) -> Option<QueryData<V>> {
        match self {
            QueryState::Created | QueryState::Loading | QueryState::Failed(_) => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(data)
            }
        }
    }
}

impl<V, E> Default for QueryState<V, E> {
    fn default() -> Self {
        QueryState::Created
    }
}

impl<V, E> std::fmt::Debug for QueryState<V, E>
where
    V: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Fetching(arg0) => f.debug_tuple("Fetching").field(arg0).finish(),
            Self::Loaded(arg0) => f.debug_tuple("Loaded").field(arg0).finish(),
            Self::Invalid(arg0) => f.debug_tuple("Invalid").field(arg0).finish(),
            Self::Failed(arg0) => f.debug_tuple("Failed").field(arg0).finish(),
        }
    }
}

/// The latest data for a Query.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryData<V> {
    /// The Data.
    pub data: V,
    /// The instant this data was retrieved.
    pub updated_at: Instant,
}

impl<V> QueryData<V> {
    /// Creates a new QueryData with the given data and the current time as the updated_at timestamp.
    pub fn now(data: V) -> Self {
        Self {
            data,
            updated_at: Instant::now(),
        }
    }
}

impl<V> std::fmt::Debug for QueryData<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryData")
            .field("data", &self.data)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
