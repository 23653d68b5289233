use std::{future::Future, rc::Rc};

use bookshelf_query::{
    cache_observer::CacheEvent, AsyncController, AsyncState, AsyncStatus, CacheObserverKey,
    QueryClient, Subscription,
};

use crate::{
    api_client::{ApiClient, RequestConfig},
    books::refetch_book_search_query,
    error::ClientError,
    list_items::seed_list_items,
    model::{BootstrapResponse, Credentials, User},
};

/// The signed-in user of an application session.
///
/// [`bootstrap`](Self::bootstrap) restores a stored session. Until it settles
/// the session is pending; afterwards it holds the user, or `None` when
/// nobody is signed in.
///
/// Clearing the query cache signs the session out, so a 401 from any request
/// ends it.
#[derive(Clone)]
pub struct AuthSession {
    api: ApiClient,
    state: AsyncController<Option<User>, ClientError>,
    _on_clear: Rc<ClearObserver>,
}

// Unregisters the cache observer once the last session handle is dropped.
struct ClearObserver {
    queries: QueryClient,
    key: CacheObserverKey,
}

impl Drop for ClearObserver {
    fn drop(&mut self) {
        self.queries.unregister_cache_observer(self.key);
    }
}

impl AuthSession {
    /// Creates a signed-out session that has not been bootstrapped.
    pub fn new(api: ApiClient) -> Self {
        let state = AsyncController::new();
        let key = api.queries().register_cache_observer({
            let state = state.clone();
            move |event: CacheEvent| {
                if event == CacheEvent::Cleared && signed_in_or_pending(&state) {
                    tracing::debug!("query cache cleared, signing out");
                    state.set_data(None);
                }
            }
        });

        Self {
            _on_clear: Rc::new(ClearObserver {
                queries: api.queries().clone(),
                key,
            }),
            api,
            state,
        }
    }

    /// Loads the user and their reading list when a token is stored.
    ///
    /// The list items and their books are written to the query cache, so the
    /// first screens render without fetching.
    pub fn bootstrap(&self) -> impl Future<Output = Result<Option<User>, ClientError>> + 'static {
        self.state.run(restore_session(self.api.clone()))
    }

    /// Signs in with `credentials`.
    pub fn login(&self, credentials: Credentials) -> impl Future<Output = Result<User, ClientError>> + 'static {
        let api = self.api.clone();
        let state = self.state.clone();
        async move {
            let user = api.auth().login(&credentials).await?;
            signed_in(&api, &state, &user).await;
            Ok(user)
        }
    }

    /// Creates an account and signs in.
    pub fn register(&self, credentials: Credentials) -> impl Future<Output = Result<User, ClientError>> + 'static {
        let api = self.api.clone();
        let state = self.state.clone();
        async move {
            let user = api.auth().register(&credentials).await?;
            signed_in(&api, &state, &user).await;
            Ok(user)
        }
    }

    /// Forgets the token and everything cached for the previous user.
    pub fn logout(&self) -> impl Future<Output = ()> + 'static {
        let api = self.api.clone();
        let state = self.state.clone();
        async move {
            api.auth().logout().await;
            api.queries().clear();
            state.set_data(None);
        }
    }

    /// The signed-in user.
    pub fn user(&self) -> Option<User> {
        self.state.data().flatten()
    }

    /// Snapshot of the session state.
    pub fn state(&self) -> AsyncState<Option<User>, ClientError> {
        self.state.state()
    }

    /// Status of the last session change.
    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    /// Why the last bootstrap failed.
    pub fn error(&self) -> Option<ClientError> {
        self.state.error()
    }

    /// Whether bootstrap has not started.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Whether bootstrap is in flight.
    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    /// Whether the session is settled, signed in or not.
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }

    /// Whether bootstrap failed.
    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }

    /// Registers a listener called on every session change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&AsyncState<Option<User>, ClientError>) + 'static,
    ) -> Subscription {
        self.state.subscribe(listener)
    }
}

fn signed_in_or_pending(state: &AsyncController<Option<User>, ClientError>) -> bool {
    state.with_state(|state| match state {
        AsyncState::Pending => true,
        AsyncState::Resolved(user) => user.is_some(),
        _ => false,
    })
}

async fn restore_session(api: ApiClient) -> Result<Option<User>, ClientError> {
    let Some(token) = api.auth().get_token().await else {
        tracing::debug!("no stored token, signed out");
        return Ok(None);
    };

    let BootstrapResponse { user, list_items } = api
        .request("bootstrap", RequestConfig::new().token(token))
        .await?;
    seed_list_items(api.queries(), list_items);
    Ok(Some(user))
}

async fn signed_in(api: &ApiClient, state: &AsyncController<Option<User>, ClientError>, user: &User) {
    tracing::debug!(username = %user.username, "signed in");
    state.set_data(Some(user.clone()));
    refetch_book_search_query(api, user).await;
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("status", &self.status())
            .finish()
    }
}
