use crate::domain_model::*;
use reqwest::Method;
use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session expired: {0}")]
    SessionExpired(String),
    #[error("request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("store error: {0}")]
    Store(String),
}

impl SessionError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, SessionError::SessionExpired(_))
    }

    /// Builds a `RequestFailed` from a non-2xx response, preferring the
    /// server's `{message}` over the status reason.
    pub async fn from_response(response: reqwest::Response) -> Self {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: String,
        }

        let status = response.status();
        let fallback = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        let message = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or(fallback),
            Err(_) => fallback,
        };
        SessionError::RequestFailed {
            status: status.as_u16(),
            message,
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            SessionError::InvalidResponse(error.to_string())
        } else {
            SessionError::Transport(error.to_string())
        }
    }
}

/// A replayable description of an authenticated call. `path` is appended to
/// the API base URL; an absolute URL is accepted only on the API's origin.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Read-only view of the current credential. Never refreshes.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn current_access_token(&self) -> Option<AccessToken>;
}
