use async_trait::async_trait;
use http::{Request, Response};
use serde::de::DeserializeOwned;

use crate::error::{ClientError, ErrorBody};

/// Sends HTTP requests.
///
/// Bodies are already serialized; the response body is read as text.
#[async_trait(?Send)]
pub trait Transport {
    /// Sends `request` and reads the whole response.
    async fn send(&self, request: Request<Option<String>>) -> Result<Response<String>, ClientError>;
}

/// Decodes a JSON response, turning non-2xx statuses into [`ClientError::Response`].
pub(crate) fn read_json<T: DeserializeOwned>(response: &Response<String>) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(serde_json::from_str(response.body())?)
    } else {
        Err(ClientError::Response {
            status: status.as_u16(),
            body: ErrorBody::from_response(status.as_u16(), response.body()),
        })
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::*;

    /// [`Transport`] backed by a [`reqwest::Client`].
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Uses a default client.
        pub fn new() -> Self {
            Self::default()
        }

        /// Uses a configured client.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn transport_error(error: impl std::fmt::Display) -> ClientError {
        ClientError::Transport(error.to_string())
    }

    #[async_trait(?Send)]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: Request<Option<String>>) -> Result<Response<String>, ClientError> {
            let (parts, body) = request.into_parts();
            tracing::trace!(method = %parts.method, uri = %parts.uri, "sending request");

            let mut builder = self
                .client
                .request(parts.method, parts.uri.to_string())
                .headers(parts.headers);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(transport_error)?;
            let status = response.status();
            let headers = response.headers().clone();
            let text = response.text().await.map_err(transport_error)?;

            let mut result = Response::builder().status(status);
            if let Some(result_headers) = result.headers_mut() {
                *result_headers = headers;
            }
            result.body(text).map_err(transport_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn response(status: u16, body: &str) -> Response<String> {
        Response::builder().status(status).body(body.to_string()).unwrap()
    }

    #[test]
    fn decodes_success() {
        let value: Value = read_json(&response(200, r#"{"a":1}"#)).unwrap();
        assert_eq!(1, value["a"]);
    }

    #[test]
    fn error_status_carries_the_body() {
        let error = read_json::<Value>(&response(404, r#"{"status":404,"message":"No book"}"#)).unwrap_err();
        assert_eq!(Some(404), error.status());
        assert_eq!("No book", error.body().unwrap().message);
    }

    #[test]
    fn malformed_success_body() {
        let error = read_json::<Value>(&response(200, "<html>")).unwrap_err();
        assert!(matches!(error, ClientError::Decode(_)));
    }
}
