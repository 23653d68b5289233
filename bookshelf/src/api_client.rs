use std::{fmt, rc::Rc};

use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use bookshelf_query::QueryClient;

use crate::{
    auth_provider::AuthProvider,
    config::Config,
    error::{ClientError, ErrorBody},
    transport::{read_json, Transport},
};

/// Options of a single [`ApiClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    data: Option<Value>,
    token: Option<String>,
    method: Option<Method>,
    headers: HeaderMap,
}

impl RequestConfig {
    /// Options for a plain GET.
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON body. Without an explicit method the request becomes a POST.
    pub fn data(self, data: Value) -> Self {
        Self {
            data: Some(data),
            ..self
        }
    }

    /// Bearer token sent in the `Authorization` header.
    pub fn token(self, token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..self
        }
    }

    /// Overrides the inferred method.
    pub fn method(self, method: Method) -> Self {
        Self {
            method: Some(method),
            ..self
        }
    }

    /// Extra header. Applied last, so it overrides the defaults.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn resolved_method(&self) -> Method {
        match (&self.method, &self.data) {
            (Some(method), _) => method.clone(),
            (None, Some(_)) => Method::POST,
            (None, None) => Method::GET,
        }
    }
}

/// Typed client of the bookshelf API.
///
/// A 401 response logs the user out and clears the query cache before the
/// error reaches the caller.
#[derive(Clone)]
pub struct ApiClient {
    config: Rc<Config>,
    transport: Rc<dyn Transport>,
    auth: Rc<dyn AuthProvider>,
    queries: QueryClient,
}

impl ApiClient {
    /// Creates a client. `queries` is the cache cleared on 401.
    pub fn new(
        config: Config,
        transport: Rc<dyn Transport>,
        auth: Rc<dyn AuthProvider>,
        queries: QueryClient,
    ) -> Self {
        Self {
            config: Rc::new(config),
            transport,
            auth,
            queries,
        }
    }

    /// Where the backend lives.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The auth provider logged out on 401.
    pub fn auth(&self) -> &Rc<dyn AuthProvider> {
        &self.auth
    }

    /// The query cache this client clears on 401.
    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    /// Builds the HTTP request for `endpoint` without sending it.
    pub fn build_request(
        &self,
        endpoint: &str,
        config: &RequestConfig,
    ) -> Result<Request<Option<String>>, ClientError> {
        let mut headers = HeaderMap::new();
        if config.data.is_some() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = &config.token {
            let value = HeaderValue::try_from(format!("Bearer {token}"))
                .map_err(|error| ClientError::Transport(error.to_string()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        for (name, value) in &config.headers {
            headers.insert(name.clone(), value.clone());
        }

        let body = config.data.as_ref().map(serde_json::to_string).transpose()?;

        let mut request = Request::builder()
            .method(config.resolved_method())
            .uri(self.config.endpoint_url(endpoint))
            .body(body)
            .map_err(|error| ClientError::Transport(error.to_string()))?;
        *request.headers_mut() = headers;
        Ok(request)
    }

    /// Calls `endpoint` and decodes the JSON response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        config: RequestConfig,
    ) -> Result<T, ClientError> {
        let request = self.build_request(endpoint, &config)?;
        let method = request.method().clone();
        let response = self.transport.send(request).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(%method, endpoint, "unauthorized, logging out");
            self.auth.logout().await;
            self.queries.clear();
            return Err(ClientError::Response {
                status: StatusCode::UNAUTHORIZED.as_u16(),
                body: ErrorBody::from_response(StatusCode::UNAUTHORIZED.as_u16(), response.body()),
            });
        }

        let result = read_json(&response);
        if let Err(error) = &result {
            tracing::debug!(%method, endpoint, %error, "request failed");
        }
        result
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("queries", &self.queries)
            .finish()
    }
}
