//! [`reqwest`]-backed implementation of [`HttpClient`].

use futures::FutureExt;

use super::{HttpClient, HttpError, HttpRequest, HttpResponse, Method};

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new reqwest-backed HTTP client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// Create a client with a default timeout applied to every request
    /// that does not carry its own.
    #[must_use]
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn issue(
        &self,
        request: HttpRequest,
    ) -> futures::future::BoxFuture<'_, Result<HttpResponse, HttpError>> {
        let mut builder = match request.method {
            Method::Get => self.inner.get(request.url),
            Method::Post => self.inner.post(request.url).form(&request.form),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        async move {
            let resp = builder.send().await.map_err(map_error)?;
            let status = resp.status().as_u16();
            let body = resp.text().await.map_err(map_error)?;

            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

fn map_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Network(err.to_string())
    }
}
