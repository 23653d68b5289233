use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `{status, message}` body the backend sends with every error response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ErrorBody {
    /// HTTP status echoed by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Human readable reason.
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    /// An error body with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Parses an error response. A body that is not JSON, or has no
    /// `message`, becomes the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed,
            _ => Self {
                status: Some(status),
                message: body.to_string(),
            },
        }
    }
}

/// Failure of a call to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The backend answered with a non-2xx status.
    #[error("request failed with status {status}: {body}")]
    Response {
        /// HTTP status of the response.
        status: u16,
        /// What the backend said went wrong.
        body: ErrorBody,
    },
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// A success response did not match the expected shape.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// HTTP status of a [`ClientError::Response`].
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Response { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The error body sent by the backend, if any.
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            ClientError::Response { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the backend answered 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(error: serde_json::Error) -> Self {
        ClientError::Decode(error.to_string())
    }
}

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The variable is not set.
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    /// The variable is not an http(s) url.
    #[error("invalid url in {name}: {value:?}")]
    InvalidUrl {
        /// Name of the variable.
        name: &'static str,
        /// Its value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_error_body() {
        let body = ErrorBody::from_response(400, r#"{"status":400,"message":"bad request"}"#);
        assert_eq!(Some(400), body.status);
        assert_eq!("bad request", body.message);

        let body = ErrorBody::from_response(400, r#"{"message":"no status"}"#);
        assert_eq!(None, body.status);
    }

    #[test]
    fn non_json_body_becomes_the_message() {
        let body = ErrorBody::from_response(502, "Bad Gateway");
        assert_eq!(Some(502), body.status);
        assert_eq!("Bad Gateway", body.message);
    }

    #[test]
    fn json_without_message_keeps_the_body() {
        let body = ErrorBody::from_response(500, r#"{"error":"x"}"#);
        assert_eq!(Some(500), body.status);
        assert_eq!(r#"{"error":"x"}"#, body.message);
    }

    #[test]
    fn unauthorized() {
        let error = ClientError::Response {
            status: 401,
            body: ErrorBody::new("Please re-authenticate."),
        };
        assert!(error.is_unauthorized());
        assert_eq!("Please re-authenticate.", error.body().map_or("", |b| b.message.as_str()));
        assert!(!ClientError::Transport("offline".into()).is_unauthorized());
    }
}
