//! Per-domain sessions
//!
//! A [`Session`] records the cookies, extra headers and bearer token that
//! outbound calls to one domain key share. The [`SessionManager`] owns the
//! domain key → session map; callers hold [`SessionHandle`]s that observe the
//! same session the manager mutates.

mod manager;
mod store;

pub use manager::{SessionManager, SessionStats};
pub use store::{SessionStore, StoreError};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::config::DomainScope;
use crate::http::{Body, RequestError};

/// Response body keys that may carry a bearer token, in priority order
pub const TOKEN_KEYS: [&str; 4] = ["token", "access_token", "auth_token", "jwt"];

/// Errors raised by the session layer
#[derive(Debug, Error)]
pub enum SessionError {
    /// The URL has no resolvable host
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    /// No live session exists and creation was not requested
    #[error("No live session for {0}")]
    Expired(String),

    /// The authentication request failed; the session was left untouched
    #[error("Authentication failed for {url}: {source}")]
    AuthFailed {
        url: String,
        #[source]
        source: RequestError,
    },

    /// A credentialed request failed in the executor
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Lifecycle state of a session instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Terminal; the manager replaces the instance on next access
    Expired,
}

/// Authentication and cookie state for one domain key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identity of this instance; a replacement session gets a new id
    pub id: Uuid,
    /// Key under which the manager stores this session
    pub domain_key: String,
    /// Cookies collected from `Set-Cookie`, last write wins
    pub cookies: BTreeMap<String, String>,
    /// Extra headers attached to every request made with this session
    pub headers: BTreeMap<String, String>,
    pub last_accessed: DateTime<Utc>,
    pub is_authenticated: bool,
    pub auth_token: Option<String>,
    /// The session is invalid once this passes; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates an unauthenticated session that expires after `timeout`
    pub fn new(domain_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            domain_key: domain_key.into(),
            cookies: BTreeMap::new(),
            headers: BTreeMap::new(),
            last_accessed: Utc::now(),
            is_authenticated: false,
            auth_token: None,
            expires_at: deadline(timeout),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() > at)
    }

    pub fn state(&self) -> SessionState {
        if self.is_expired() {
            SessionState::Expired
        } else if self.is_authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Refreshes `last_accessed`
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Merges raw `Set-Cookie` header values into the cookie map
    pub fn merge_set_cookies(&mut self, values: &[String]) {
        for value in values {
            if let Some((name, cookie)) = parse_set_cookie(value) {
                self.cookies.insert(name, cookie);
            }
        }
    }

    /// `Cookie` header value for the current cookies, if any
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let header = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    /// Adds this session's credentials to an outgoing header map
    ///
    /// Extra session headers only fill names the caller did not set;
    /// `Cookie` and `Authorization` always come from the session when it has them.
    pub fn apply_to(&self, headers: &mut BTreeMap<String, String>) {
        for (name, value) in &self.headers {
            if !headers.keys().any(|own| own.eq_ignore_ascii_case(name)) {
                headers.insert(name.clone(), value.clone());
            }
        }
        if let Some(cookie) = self.cookie_header() {
            replace_header(headers, "Cookie", cookie);
        }
        if let Some(token) = &self.auth_token {
            replace_header(headers, "Authorization", format!("Bearer {token}"));
        }
    }
}

/// Shared reference to a stored session
///
/// Clones point at the same session; mutations made by the manager (cookie
/// merges, authentication, access time) are visible through every clone.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Copy of the session as it is now
    pub fn snapshot(&self) -> Session {
        self.0.lock().clone()
    }

    pub fn id(&self) -> Uuid {
        self.0.lock().id
    }

    pub fn domain_key(&self) -> String {
        self.0.lock().domain_key.clone()
    }

    pub fn cookies(&self) -> BTreeMap<String, String> {
        self.0.lock().cookies.clone()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.0.lock().auth_token.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.0.lock().is_authenticated
    }

    pub fn is_expired(&self) -> bool {
        self.0.lock().is_expired()
    }

    pub fn state(&self) -> SessionState {
        self.0.lock().state()
    }

    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.0.lock().last_accessed
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.0.lock().expires_at
    }

    /// Moves the expiry, e.g. to force a session out early
    pub fn set_expires_at(&self, at: Option<DateTime<Utc>>) {
        self.0.lock().expires_at = at;
    }

    /// Whether both handles refer to the same session instance
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.0.lock())
    }
}

/// Parses `url`, requiring a host
pub fn parse_url(raw: &str) -> Result<Url, SessionError> {
    let url = Url::parse(raw).map_err(|e| SessionError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(SessionError::InvalidUrl(format!("{raw}: no host found"))),
    }
}

/// Bare host of a parsed URL
pub fn base_domain(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_string()
}

/// Session store key for a parsed URL
///
/// `HostAndPath` keys are `host + path` with the query dropped and `/` for
/// an empty path.
pub fn domain_key(url: &Url, scope: DomainScope) -> String {
    let host = base_domain(url);
    match scope {
        DomainScope::Host => host,
        DomainScope::HostAndPath => {
            let path = url.path();
            if path.is_empty() {
                format!("{host}/")
            } else {
                format!("{host}{path}")
            }
        }
    }
}

/// Whether `key` belongs to `host`: the bare host or a path under it
pub fn key_belongs_to_host(key: &str, host: &str) -> bool {
    key == host
        || key
            .strip_prefix(host)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Splits a `Set-Cookie` value into its cookie name and value
///
/// Attributes after the first `;` are ignored.
pub fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');
    Some((name.to_string(), value.to_string()))
}

/// First bearer token found under one of [`TOKEN_KEYS`]
pub fn extract_token(body: &Body) -> Option<String> {
    let object = body.as_json().and_then(Value::as_object)?;
    TOKEN_KEYS.iter().find_map(|key| match object.get(*key) {
        Some(Value::String(token)) => Some(token.clone()),
        _ => None,
    })
}

/// Now plus `timeout`, or `None` when that is not representable
pub(crate) fn deadline(timeout: Duration) -> Option<DateTime<Utc>> {
    let timeout = chrono::Duration::from_std(timeout).ok()?;
    Utc::now().checked_add_signed(timeout)
}

fn replace_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|own, _| !own.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}
