//! Blocking HTTP transport used by the Nest client.
//!
//! - `Transport` is the seam the rest of the crate talks to; tests script it.
//! - `UreqTransport` is the production implementation on top of `ureq`.
//! - Non-success statuses come back as an `HttpResponse`, only connection
//!   level failures are errors.

use http::StatusCode;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header pairs, e.g. `("Authorization", "Bearer abc")`.
pub type Headers<'a> = [(&'a str, &'a str)];

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// DNS, TLS, connect or timeout failures.
    Connection(String),
    /// Response arrived but the body could not be read.
    Body(String),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Connection(s) => write!(f, "connection failed: {}", s),
            TransportError::Body(s) => write!(f, "reading response body failed: {}", s),
        }
    }
}

impl std::error::Error for TransportError {}

pub trait Transport: Send {
    fn get(&self, url: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError>;

    /// Form-encoded POST. Redirects are followed.
    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &Headers<'_>,
    ) -> Result<HttpResponse, TransportError>;

    fn put(&self, url: &str, body: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        UreqTransport {
            agent: ureq::Agent::new_with_config(config),
        }
    }

    fn finish(result: Result<http::Response<ureq::Body>, ureq::Error>) -> Result<HttpResponse, TransportError> {
        let mut response = result.map_err(|e| TransportError::Connection(e.to_string()))?;
        let status = response.status();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError> {
        let mut req = self.agent.get(url).header("Accept", "application/json");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        Self::finish(req.call())
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &Headers<'_>,
    ) -> Result<HttpResponse, TransportError> {
        let mut req = self.agent.post(url).header("Accept", "application/json");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        Self::finish(req.send_form(form.iter().copied()))
    }

    fn put(&self, url: &str, body: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError> {
        let mut req = self.agent.put(url);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        Self::finish(req.send(body.as_bytes()))
    }
}
