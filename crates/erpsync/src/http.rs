//! HTTP transport boundary shared by the ERP and CRM clients.
//!
//! Clients build [`HttpRequest`]s and hand them to an [`HttpTransport`].
//! Production code uses the reqwest-backed transport; unit tests use the
//! in-memory [`MockTransport`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Methods the ERP and CRM APIs are called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }
}

/// Header list in send order. Lookups ignore name case.
pub type HttpHeaders = Vec<(String, String)>;

/// One outgoing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Request with a JSON body and the matching content type.
    pub fn json(
        method: HttpMethod,
        url: impl Into<String>,
        mut headers: HttpHeaders,
        body: &serde_json::Value,
    ) -> Result<Self, HttpError> {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        let body = serde_json::to_vec(body).map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self {
            method,
            url: url.into(),
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in seconds, when the server sent one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Sends requests. Non-2xx statuses are responses, not errors; only a failure
/// to get any response at all is an [`HttpError`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// First value of header `name`, ignoring case.
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(feature = "reqwest")]
pub mod reqwest_transport {
    use super::*;

    /// A real HTTP transport backed by reqwest.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("erpsync/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
            };

            let mut builder = self.client.request(method, &request.url);
            for (k, v) in request.headers {
                builder = builder.header(&k, &v);
            }

            if !request.body.is_empty() {
                builder = builder.body(request.body);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let headers: HttpHeaders = resp
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();

            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

#[cfg(test)]
pub use mock::MockTransport;

#[cfg(test)]
mod mock {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Default)]
    struct Script {
        /// Scripted responses, consumed first-in first-out per (method, url).
        replies: Vec<((HttpMethod, String), VecDeque<HttpResponse>)>,
        sent: Vec<HttpRequest>,
    }

    /// Scripted transport for client tests. Routes match on method and full
    /// URL, query string included.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        script: Arc<Mutex<Script>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn script(&self) -> MutexGuard<'_, Script> {
            self.script.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn push_response(&self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) {
            let route = (method, url.into());
            let mut script = self.script();
            match script.replies.iter_mut().find(|(r, _)| *r == route) {
                Some((_, queue)) => queue.push_back(response),
                None => script.replies.push((route, VecDeque::from([response]))),
            }
        }

        pub fn push_json(&self, method: HttpMethod, url: impl Into<String>, status: u16, body: serde_json::Value) {
            let body = serde_json::to_vec(&body).unwrap_or_default();
            self.push_response(
                method,
                url,
                HttpResponse {
                    status,
                    headers: vec![("Content-Type".to_string(), "application/json".to_string())],
                    body,
                },
            );
        }

        /// Everything sent so far, in order.
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.script().sent.clone()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut script = self.script();
            let reply = script
                .replies
                .iter_mut()
                .find(|((method, url), _)| *method == request.method && *url == request.url)
                .and_then(|(_, queue)| queue.pop_front());
            let missing = HttpError::NoMockResponse {
                method: request.method.as_str().to_string(),
                url: request.url.clone(),
            };
            script.sent.push(request);
            reply.ok_or(missing)
        }
    }
}
