//! Capability-typed HTTP client.
//!
//! Transports never talk to an HTTP library directly; they go through
//! [`HttpClient`], which exposes only what the protocol needs: issue a
//! request with query/form parameters and a per-request timeout, get a
//! body or an error back. The `reqwest` feature supplies a production
//! implementation; tests script their own.

#[cfg(feature = "reqwest")]
mod reqwest_client;

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestHttpClient;

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

/// HTTP method. The protocol only ever issues GETs and POSTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET request (negotiate, poll).
    Get,
    /// POST request (send, abort), form-encoded body.
    Post,
}

/// One outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Fully built URL including query parameters.
    pub url: Url,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Form-encoded body parameters (POST only).
    pub form: Vec<(String, String)>,
    /// Per-request timeout override.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Build a GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            form: Vec::new(),
            timeout: None,
        }
    }

    /// Build a POST request.
    #[must_use]
    pub fn post(url: Url) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            form: Vec::new(),
            timeout: None,
        }
    }

    /// Attach request headers.
    #[must_use]
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a form-encoded body parameter.
    #[must_use]
    pub fn form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    /// Set a per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One inbound HTTP response.
///
/// Non-success statuses are returned as responses, not errors; the
/// transport decides what a given status means for the connection.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body.
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Problem executing an HTTP request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The request failed at the network level.
    #[error("request failed: {0}")]
    Network(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,
}

/// A minimal async HTTP client.
///
/// Implementations handle the mechanics of making requests (TLS,
/// connection pooling, encodings) while this trait exposes only what
/// the transports need.
pub trait HttpClient: Clone + Send + Sync + 'static {
    /// Issue one request and resolve with its response or an error.
    fn issue(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>>;
}
