#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About Query
//!
//! Bookshelf Query is an asynchronous state management library for single-threaded
//! Rust clients. It does not depend on a UI framework: state changes are delivered
//! to explicit listeners and background work runs on an executor you provide.
//!
//! Queries are useful for data fetching, caching, and synchronization with server state.
//!
//! A Query provides:
//! - caching
//! - de-duplication
//! - invalidation
//! - background refetching
//! - cancellation
//! - optimistic updates
//!
//! ## The main entry points are:
//! - [`QueryClient`] - The cache. Fetch, observe, invalidate and update queries.
//! - [`create_query`] - **Recommended**: Creates a [`QueryScope`] which encapsulates `use_query` and other methods for managing queries of one type.
//! - [`create_mutation`] - Writes with optimistic updates and rollback.
//! - [`use_async`] - A controller for a single asynchronous operation.
//!
//! # A Simple Example
//!
//! Create a client with the executor that should run background fetches.
//!
//! ```
//! use bookshelf_query::*;
//! use futures::executor::LocalPool;
//!
//! let mut pool = LocalPool::new();
//! let client = QueryClient::new(pool.spawner());
//!
//! let greeting = client.use_query(
//!     QueryKey::new("greeting").with("name", "world"),
//!     || async { Ok::<_, ()>("Hello, world".to_string()) },
//!     QueryOptions::default(),
//! );
//!
//! assert!(greeting.is_loading());
//! pool.run_until_stalled();
//! assert_eq!(Some("Hello, world".to_string()), greeting.data());
//! ```

/// Subcriptions to cache-wide query events.
pub mod cache_observer;
mod create_query;
mod instant;
mod mutation;
mod query;
mod query_cache;
mod query_client;
mod query_key;
mod query_observer;
mod query_options;
mod query_result;
mod query_state;
mod use_async;

pub use create_query::*;
pub use instant::*;
pub use mutation::*;
pub use query_cache::CacheObserverKey;
pub use query_client::*;
pub use query_key::*;
pub use query_observer::{ListenerKey, Subscription};
pub use query_options::*;
pub use query_result::*;
pub use query_state::*;
pub use use_async::*;

/// Convenience trait for query value requirements.
pub trait QueryValue: std::fmt::Debug + Clone + 'static {}
impl<V> QueryValue for V where V: std::fmt::Debug + Clone + 'static {}

/// Convenience trait for query error requirements.
pub trait QueryError: std::fmt::Debug + Clone + 'static {}
impl<E> QueryError for E where E: std::fmt::Debug + Clone + 'static {}
