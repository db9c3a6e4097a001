//! HTTP request model shared by the executor and its transports
//!
//! Requests are described with [`Method`] and [`RequestOptions`], executed by a
//! [`RequestExecutor`], and answered with a normalized [`Response`] whose body is
//! decided once at the boundary: JSON when it parses, raw text otherwise.

pub mod executor;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use executor::RequestExecutor;
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{OutgoingRequest, RawResponse, ReqwestTransport, Transport, TransportError};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// HTTP methods the engine knows how to issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// Canonical upper-case name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Parses a method name case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "PATCH" => Some(Method::Patch),
            "DELETE" => Some(Method::Delete),
            "HEAD" => Some(Method::Head),
            "OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to an outgoing request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `Content-Type: application/json`
    Json(Value),
    /// URL-encoded form fields
    Form(BTreeMap<String, String>),
    /// Raw text sent as-is
    Text(String),
}

/// Per-call options for [`RequestExecutor::send`]
///
/// Headers and params are kept in sorted maps so that the cache fingerprint of
/// a request does not depend on insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    /// Only consulted for GET requests
    pub use_cache: bool,
    /// Overrides the engine timeout for this call
    pub timeout: Option<Duration>,
    /// Overrides the engine attempt count for this call
    pub max_retries: Option<u32>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            use_cache: true,
            timeout: None,
            max_retries: None,
        }
    }
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn form(mut self, fields: BTreeMap<String, String>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Bypasses the response cache for this call
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }
}

/// Response payload, decoded once when the response is normalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Body {
    Json(Value),
    Text(String),
}

impl Body {
    /// Decodes `text` as JSON, keeping the raw text when it is not valid JSON
    pub fn from_text(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(text),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Json(_) => None,
            Body::Text(text) => Some(text),
        }
    }
}

/// Normalized response returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response headers with lower-cased names; repeated headers are joined with ", "
    pub headers: BTreeMap<String, String>,
    /// Every `Set-Cookie` header value, in the order received
    #[serde(default)]
    pub set_cookie: Vec<String>,
    /// Decoded body
    pub data: Body,
    /// When the response was received from the network
    ///
    /// Cached responses keep the timestamp of the original network response.
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// Builds a normalized response from what the transport returned
    pub fn from_raw(raw: RawResponse) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let mut set_cookie = Vec::new();

        for (name, value) in raw.headers {
            let name = name.to_ascii_lowercase();
            if name == "set-cookie" {
                set_cookie.push(value.clone());
            }
            headers
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        Self {
            status: raw.status,
            headers,
            set_cookie,
            data: Body::from_text(raw.body),
            timestamp: Utc::now(),
        }
    }

    /// Looks up a header by name, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Errors surfaced by [`RequestExecutor`]
#[derive(Debug, Error)]
pub enum RequestError {
    /// The URL could not be parsed
    #[error("Invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The per-call deadline passed on every attempt
    #[error("Request to {url} timed out after {}s", .after.as_secs_f64())]
    Timeout { url: String, after: Duration },

    /// Connection-level failure on every attempt
    #[error("Request to {url} failed: {detail}")]
    Transport { url: String, detail: String },

    /// The server answered with a status of 400 or above
    #[error("Request to {url} failed with status {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },
}

impl RequestError {
    /// Whether resending the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RequestError::Timeout { .. } | RequestError::Transport { .. }
        )
    }

    /// Status code for [`RequestError::HttpStatus`]
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
