//! Request, response, configuration, and error types.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Whole-request timeout, including reading the body.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("pledge/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Unparsed; validated when the request is issued.
    pub url: String,
    pub method: Method,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, method: Method) -> Self {
        Self {
            url: url.into(),
            method,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::GET)
    }
}

/// A response with status below 400 and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// `Value::Null` when the body was empty.
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid URL {url:?}: {detail}")]
    InvalidUrl { url: String, detail: String },
    #[error("Status {status}, Request failed")]
    Status { status: u16 },
    /// Connection, TLS, or timeout failure. `detail` is kept for logs only.
    #[error("Request failed, check your preference")]
    Transport { detail: String },
    #[error("response body is not JSON: {detail}")]
    Decode { detail: String },
    #[error("failed to build HTTP client: {detail}")]
    Client { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_message() {
        let err = FetchError::Status { status: 404 };
        assert_eq!(err.to_string(), "Status 404, Request failed");
    }

    #[test]
    fn transport_error_hides_detail() {
        let err = FetchError::Transport {
            detail: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Request failed, check your preference");
    }

    #[test]
    fn request_defaults_to_get() {
        let request = FetchRequest::get("https://example.com/todos/1");
        assert_eq!(request.method, Method::GET);
    }

    #[test]
    fn default_user_agent_names_the_crate() {
        let config = FetchConfig::default();
        assert!(config.user_agent.starts_with("pledge/"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
