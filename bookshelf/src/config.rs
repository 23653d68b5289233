use crate::error::ConfigError;

/// Environment variable holding [`Config::api_url`].
pub const API_URL_VAR: &str = "BOOKSHELF_API_URL";
/// Environment variable holding [`Config::auth_url`].
pub const AUTH_URL_VAR: &str = "BOOKSHELF_AUTH_URL";

/// Where the backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base url of the bookshelf API. Endpoints are appended as `{api_url}/{endpoint}`.
    pub api_url: String,
    /// Base url of the auth provider (`{auth_url}/login`, `{auth_url}/register`).
    pub auth_url: String,
}

impl Config {
    /// Creates a config. Trailing slashes are dropped.
    pub fn new(api_url: impl Into<String>, auth_url: impl Into<String>) -> Self {
        Self {
            api_url: trim_url(api_url.into()),
            auth_url: trim_url(auth_url.into()),
        }
    }

    /// Reads `BOOKSHELF_API_URL` and `BOOKSHELF_AUTH_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name: &'static str| -> Result<String, ConfigError> {
            let value = lookup(name).ok_or(ConfigError::Missing(name))?;
            if value.starts_with("http://") || value.starts_with("https://") {
                Ok(value)
            } else {
                Err(ConfigError::InvalidUrl { name, value })
            }
        };

        let config = Self::new(read(API_URL_VAR)?, read(AUTH_URL_VAR)?);
        tracing::debug!(api_url = %config.api_url, auth_url = %config.auth_url, "loaded config");
        Ok(config)
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_url, endpoint)
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn reads_both_urls() {
        let vars = HashMap::from([
            (API_URL_VAR, "https://api.example.com/"),
            (AUTH_URL_VAR, "https://auth.example.com"),
        ]);

        let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(
            Ok(Config::new("https://api.example.com", "https://auth.example.com")),
            config
        );
    }

    #[test]
    fn missing_variable() {
        let config = Config::from_lookup(|name| {
            (name == API_URL_VAR).then(|| "https://api.example.com".to_string())
        });

        assert_eq!(Err(ConfigError::Missing(AUTH_URL_VAR)), config);
    }

    #[test]
    fn rejects_relative_urls() {
        let config = Config::from_lookup(|_| Some("api".to_string()));

        assert!(matches!(config, Err(ConfigError::InvalidUrl { name, .. }) if name == API_URL_VAR));
    }

    #[test]
    fn joins_endpoints() {
        let config = Config::new("https://api.example.com///", "https://auth.example.com");
        assert_eq!("https://api.example.com/books/1", config.endpoint_url("books/1"));
    }
}
