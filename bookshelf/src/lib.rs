#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Client core of the Bookshelf reading-list app.
//!
//! [`ApiClient`] talks to the backend and handles expired sessions,
//! [`AuthSession`] tracks the signed-in user, and the `use_*` functions observe
//! books and list items through a shared [`QueryClient`](bookshelf_query::QueryClient).
//!
//! ```no_run
//! use std::rc::Rc;
//!
//! use bookshelf::*;
//! use bookshelf_query::QueryClient;
//! use futures::executor::LocalPool;
//!
//! let mut pool = LocalPool::new();
//! let config = Config::from_env().unwrap();
//! let transport: Rc<dyn Transport> = Rc::new(ReqwestTransport::new());
//! let auth = Rc::new(HttpAuthProvider::new(
//!     config.auth_url.clone(),
//!     transport.clone(),
//!     Rc::new(MemoryTokenStore::new()),
//! ));
//! let api = ApiClient::new(config, transport, auth, QueryClient::new(pool.spawner()));
//!
//! let session = AuthSession::new(api.clone());
//! let user = pool.run_until(session.bootstrap()).unwrap();
//!
//! if let Some(user) = user {
//!     let reading_list = use_list_items(&api, &user);
//!     pool.run_until_stalled();
//!     println!("{} books on the list", reading_list.data().unwrap_or_default().len());
//! }
//! ```

mod api_client;
mod auth;
mod auth_provider;
mod books;
mod config;
mod error;
mod list_items;
mod model;
mod transport;

pub use api_client::*;
pub use auth::*;
pub use auth_provider::*;
pub use books::*;
pub use config::*;
pub use error::*;
pub use list_items::{
    use_create_list_item, use_list_item, use_list_items, use_remove_list_item,
    use_update_list_item, ListItemQuery, LIST_ITEMS_KEY,
};
pub use model::*;
pub use transport::Transport;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
