//! Network collaborator boundary.
//!
//! The host application supplies a [`Transport`] that performs the HTTP
//! exchange and a [`TokenSource`] for the session's bearer token. Both are
//! bundled into an [`ApiClient`] that the cache and mutation helpers share.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::record::Patch;

/// REST fetchers for paginated collections.
pub mod rest;

/// HTTP verb of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Remove.
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// Rejected request: HTTP status (absent for network failures) and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    /// HTTP status of a non-2xx response.
    pub status: Option<u16>,
    /// Server or transport message, passed through unmodified.
    pub message: String,
}

impl FetchError {
    /// Error carrying an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error with no response, e.g. a dropped connection.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// True for network failures and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(s) => (500..600).contains(&s),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "request failed with status {status}: {}", self.message),
            None => write!(f, "request failed: {}", self.message),
        }
    }
}

impl std::error::Error for FetchError {}

/// A single REST call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Verb.
    pub method: Method,
    /// Path relative to the API base, e.g. `/courses/3`.
    pub endpoint: String,
    /// Query-string pairs.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Bearer token, attached by [`ApiClient`].
    pub bearer: Option<String>,
}

impl Request {
    /// Request with no query, body, or token.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    /// Sets the query-string pairs.
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `Authorization` header value, when a token is attached.
    pub fn authorization(&self) -> Option<String> {
        self.bearer.as_ref().map(|t| format!("Bearer {t}"))
    }
}

/// Performs HTTP exchanges against the REST backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request`, returning the decoded JSON body of a 2xx response.
    async fn request(&self, request: Request) -> Result<Value, FetchError>;
}

/// Source of the current session's bearer token.
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when signed out.
    fn bearer_token(&self) -> Option<String>;
}

/// Token source for unauthenticated clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Fixed token, handy for service accounts and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Transport plus token source, passed explicitly to everything that talks
/// to the backend.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    /// Bundles a transport and a token source.
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>) -> Self {
        Self { transport, tokens }
    }

    /// Attaches the bearer token and sends `request`.
    pub async fn send(&self, mut request: Request) -> Result<Value, FetchError> {
        request.bearer = self.tokens.bearer_token();
        debug!(method = %request.method, endpoint = %request.endpoint, "api request");
        self.transport.request(request).await
    }

    /// `GET endpoint` with query pairs.
    pub async fn get(&self, endpoint: &str, query: Vec<(String, String)>) -> Result<Value, FetchError> {
        self.send(Request::new(Method::Get, endpoint).with_query(query)).await
    }

    /// `POST endpoint` with a JSON body.
    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value, FetchError> {
        self.send(Request::new(Method::Post, endpoint).with_body(body)).await
    }

    /// `PATCH endpoint` with only the changed fields.
    pub async fn patch(&self, endpoint: &str, patch: Patch) -> Result<Value, FetchError> {
        self.send(Request::new(Method::Patch, endpoint).with_body(patch.into())).await
    }

    /// `DELETE endpoint`.
    pub async fn delete(&self, endpoint: &str) -> Result<Value, FetchError> {
        self.send(Request::new(Method::Delete, endpoint)).await
    }
}
