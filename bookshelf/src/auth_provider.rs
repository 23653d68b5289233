use std::{cell::RefCell, collections::HashMap, rc::Rc};

use async_trait::async_trait;
use http::{header, Method, Request};

use crate::{
    error::ClientError,
    model::{AuthResponse, Credentials, User},
    transport::{read_json, Transport},
};

/// Storage key of the session token.
pub const LOCAL_STORAGE_KEY: &str = "__auth_provider_token__";

/// Identity service the API client and the auth session delegate to.
///
/// `logout` must be idempotent: it is called on every 401 response.
#[async_trait(?Send)]
pub trait AuthProvider {
    /// The stored session token.
    async fn get_token(&self) -> Option<String>;
    /// Signs in and stores the token.
    async fn login(&self, credentials: &Credentials) -> Result<User, ClientError>;
    /// Creates an account, signs in and stores the token.
    async fn register(&self, credentials: &Credentials) -> Result<User, ClientError>;
    /// Forgets the token.
    async fn logout(&self);
}

/// Where the session token is kept between runs.
pub trait TokenStore {
    /// Reads a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Writes a value.
    fn set(&self, key: &str, value: String);
    /// Deletes a value. Missing keys are ignored.
    fn remove(&self, key: &str);
}

/// A [`TokenStore`] that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: RefCell<HashMap<String, String>>,
}

impl MemoryTokenStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.borrow_mut().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.values.borrow_mut().remove(key);
    }
}

/// Auth provider speaking to the `{auth_url}/login` and `{auth_url}/register` endpoints.
pub struct HttpAuthProvider {
    auth_url: String,
    transport: Rc<dyn Transport>,
    store: Rc<dyn TokenStore>,
}

impl HttpAuthProvider {
    /// Creates a provider posting to `auth_url` and keeping the token in `store`.
    pub fn new(
        auth_url: impl Into<String>,
        transport: Rc<dyn Transport>,
        store: Rc<dyn TokenStore>,
    ) -> Self {
        Self {
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            transport,
            store,
        }
    }

    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<User, ClientError> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/{}", self.auth_url, endpoint))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Some(serde_json::to_string(credentials)?))
            .map_err(|error| ClientError::Transport(error.to_string()))?;

        let response = self.transport.send(request).await?;
        let AuthResponse { user } = read_json(&response)?;

        self.store.set(LOCAL_STORAGE_KEY, user.token.clone());
        tracing::debug!(username = %user.username, endpoint, "authenticated");
        Ok(user)
    }
}

impl std::fmt::Debug for HttpAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuthProvider")
            .field("auth_url", &self.auth_url)
            .finish()
    }
}

#[async_trait(?Send)]
impl AuthProvider for HttpAuthProvider {
    async fn get_token(&self) -> Option<String> {
        self.store.get(LOCAL_STORAGE_KEY)
    }

    async fn login(&self, credentials: &Credentials) -> Result<User, ClientError> {
        self.authenticate("login", credentials).await
    }

    async fn register(&self, credentials: &Credentials) -> Result<User, ClientError> {
        self.authenticate("register", credentials).await
    }

    async fn logout(&self) {
        self.store.remove(LOCAL_STORAGE_KEY);
    }
}
