//! Session manager
//!
//! Owns the domain key → session map, bounds it to `max_sessions` by evicting
//! the least recently accessed session, and composes with the
//! [`RequestExecutor`] to make credentialed calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::store::{SessionStore, StoreError};
use super::{
    base_domain, deadline, domain_key, extract_token, key_belongs_to_host, parse_url, Session,
    SessionError, SessionHandle,
};
use crate::config::{DomainScope, EngineConfig};
use crate::http::{Method, RequestExecutor, RequestOptions, Response};

/// Counters describing the session store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Every stored session, expired or not
    pub total_sessions: usize,
    /// Sessions whose expiry is still in the future
    pub active_sessions: usize,
    /// Active sessions that have authenticated
    pub authenticated_sessions: usize,
    /// Oldest `last_accessed` among active sessions
    pub oldest_session: Option<DateTime<Utc>>,
    /// Newest `last_accessed` among active sessions
    pub newest_session: Option<DateTime<Utc>>,
}

enum Lookup {
    Live(SessionHandle),
    Expired,
    Missing,
}

/// Tracks per-domain authentication state across outbound calls
pub struct SessionManager {
    executor: Arc<RequestExecutor>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    /// One gate per domain key currently being created through `get_session`
    creating: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    session_timeout: Duration,
    max_sessions: usize,
    scope: DomainScope,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.lock().len())
            .field("session_timeout", &self.session_timeout)
            .field("max_sessions", &self.max_sessions)
            .field("scope", &self.scope)
            .finish()
    }
}

impl SessionManager {
    /// Creates a manager issuing its requests through `executor`
    pub fn new(executor: Arc<RequestExecutor>, config: &EngineConfig) -> Self {
        Self {
            executor,
            sessions: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
            session_timeout: config.session_timeout,
            max_sessions: config.max_sessions.max(1),
            scope: config.domain_scope,
        }
    }

    /// Creates and stores a fresh session for `url`, replacing any existing one
    ///
    /// The session is stored before the seed `GET url` is issued so that
    /// concurrent lookups see it at once. A failed seed request is logged
    /// and otherwise ignored; the session stays valid without cookies.
    pub async fn create_session(&self, url: &str) -> Result<SessionHandle, SessionError> {
        let parsed = parse_url(url)?;
        let key = domain_key(&parsed, self.scope);

        let handle = SessionHandle::new(Session::new(key.clone(), self.session_timeout));
        self.insert(key.clone(), handle.clone());
        info!(domain_key = %key, "session created");

        match self
            .executor
            .get(url, RequestOptions::default().no_cache())
            .await
        {
            Ok(response) => handle.update(|s| s.merge_set_cookies(&response.set_cookie)),
            Err(err) => warn!(domain_key = %key, error = %err, "seed request failed, session has no cookies"),
        }

        Ok(handle)
    }

    /// Returns the live session for `url`
    ///
    /// Expired sessions are dropped. When no exact match exists, an
    /// authenticated session for the bare host is reused. Otherwise a new
    /// session is created if `create_if_missing`; concurrent callers for the
    /// same key share one creation.
    pub async fn get_session(
        &self,
        url: &str,
        create_if_missing: bool,
    ) -> Result<SessionHandle, SessionError> {
        let parsed = parse_url(url)?;
        let key = domain_key(&parsed, self.scope);

        if let Lookup::Live(handle) = self.lookup(&key) {
            debug!(domain_key = %key, "session found");
            return Ok(handle);
        }

        let host = base_domain(&parsed);
        if host != key {
            if let Lookup::Live(handle) = self.peek(&host) {
                if handle.is_authenticated() {
                    handle.update(Session::touch);
                    debug!(domain_key = %host, "using authenticated host session");
                    return Ok(handle);
                }
            }
        }

        if !create_if_missing {
            return Err(SessionError::Expired(key));
        }

        self.create_once(url, &key).await
    }

    /// Authenticates against `url`, sending `credentials` as a JSON body
    ///
    /// Reuses a live session of the same host or creates one. On success the
    /// session gains the response cookies and any bearer token, becomes
    /// authenticated, gets a fresh expiry, and is re-keyed under the bare host.
    /// On failure the session is not modified.
    pub async fn authenticate(
        &self,
        url: &str,
        credentials: &Value,
        method: Method,
    ) -> Result<SessionHandle, SessionError> {
        let parsed = parse_url(url)?;
        let host = base_domain(&parsed);

        let handle = match self.find_host_session(&host) {
            Some(handle) => handle,
            None => self.create_session(url).await?,
        };

        let mut options = RequestOptions::default().json(credentials.clone()).no_cache();
        if let Some(cookie) = handle.snapshot().cookie_header() {
            options = options.header("Cookie", cookie);
        }

        let response = self
            .executor
            .send(method, url, options)
            .await
            .map_err(|source| {
                warn!(%url, error = %source, "authentication failed");
                SessionError::AuthFailed {
                    url: url.to_string(),
                    source,
                }
            })?;

        let token = extract_token(&response.data);
        let timeout = self.session_timeout;
        let previous_key = handle.update(|s| {
            s.merge_set_cookies(&response.set_cookie);
            if let Some(token) = token {
                s.auth_token = Some(token);
            }
            s.is_authenticated = true;
            s.touch();
            s.expires_at = deadline(timeout);
            std::mem::replace(&mut s.domain_key, host.clone())
        });

        {
            let mut sessions = self.sessions.lock();
            if previous_key != host
                && sessions
                    .get(&previous_key)
                    .is_some_and(|stored| stored.same_session(&handle))
            {
                sessions.remove(&previous_key);
            }
            Self::insert_bounded(&mut sessions, self.max_sessions, host.clone(), handle.clone());
        }
        info!(domain_key = %host, previous_key = %previous_key, "session authenticated");

        Ok(handle)
    }

    /// Clears the bearer token and authenticated flag, keeping cookies
    pub async fn logout(&self, url: &str) -> Result<SessionHandle, SessionError> {
        let handle = self.get_session(url, false).await?;
        handle.update(|s| {
            s.auth_token = None;
            s.is_authenticated = false;
            s.touch();
        });
        info!(domain_key = %handle.domain_key(), "session logged out");
        Ok(handle)
    }

    /// Sends a request carrying the session's cookies, token and headers
    ///
    /// Resolves the session with [`get_session`](Self::get_session) when none
    /// is given. Cookies set by the response are merged back into the session.
    pub async fn make_request(
        &self,
        method: Method,
        url: &str,
        session: Option<&SessionHandle>,
        options: RequestOptions,
    ) -> Result<Response, SessionError> {
        let handle = match session {
            Some(handle) => handle.clone(),
            None => self.get_session(url, true).await?,
        };

        let mut options = options;
        handle.update(|s| s.apply_to(&mut options.headers));

        let response = self.executor.send(method, url, options).await?;

        handle.update(|s| {
            s.merge_set_cookies(&response.set_cookie);
            s.touch();
        });
        Ok(response)
    }

    /// Records an extra header sent with every request on the live session for `url`
    pub async fn set_header(
        &self,
        url: &str,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        let handle = self.get_session(url, false).await?;
        let (name, value) = (name.into(), value.into());
        handle.update(|s| {
            s.headers.insert(name, value);
        });
        Ok(())
    }

    /// Removes the session stored under the key of `url`
    pub fn clear_session(&self, url: &str) -> bool {
        let Ok(parsed) = parse_url(url) else {
            return false;
        };
        let key = domain_key(&parsed, self.scope);
        let removed = self.sessions.lock().remove(&key).is_some();
        if removed {
            info!(domain_key = %key, "session cleared");
        }
        removed
    }

    pub fn clear_all_sessions(&self) {
        self.sessions.lock().clear();
        info!("all sessions cleared");
    }

    /// Sessions whose expiry is set and still in the future
    pub fn active_sessions(&self) -> Vec<SessionHandle> {
        let now = Utc::now();
        self.sessions
            .lock()
            .values()
            .filter(|handle| handle.expires_at().is_some_and(|at| at > now))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SessionStats {
        let total_sessions = self.sessions.lock().len();
        let active = self.active_sessions();
        let accessed: Vec<DateTime<Utc>> = active.iter().map(SessionHandle::last_accessed).collect();

        SessionStats {
            total_sessions,
            active_sessions: active.len(),
            authenticated_sessions: active.iter().filter(|h| h.is_authenticated()).count(),
            oldest_session: accessed.iter().min().copied(),
            newest_session: accessed.iter().max().copied(),
        }
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes every active session to `store`
    pub fn persist(&self, store: &SessionStore) -> Result<usize, StoreError> {
        let sessions: Vec<Session> = self
            .active_sessions()
            .iter()
            .map(SessionHandle::snapshot)
            .collect();
        store.save(&sessions)?;
        info!(count = sessions.len(), "sessions persisted");
        Ok(sessions.len())
    }

    /// Loads sessions from `store`, skipping expired ones
    ///
    /// Restored sessions replace stored ones with the same key; the
    /// `max_sessions` bound still applies.
    pub fn restore(&self, store: &SessionStore) -> Result<usize, StoreError> {
        let loaded = store.load()?;
        let mut restored = 0;
        {
            let mut sessions = self.sessions.lock();
            for session in loaded.into_iter().filter(|s| !s.is_expired()) {
                let key = session.domain_key.clone();
                Self::insert_bounded(&mut sessions, self.max_sessions, key, SessionHandle::new(session));
                restored += 1;
            }
        }
        info!(count = restored, "sessions restored");
        Ok(restored)
    }

    /// Looks up `key`, dropping the entry if it has expired
    fn lookup(&self, key: &str) -> Lookup {
        let found = self.peek(key);
        if let Lookup::Live(handle) = &found {
            handle.update(Session::touch);
        }
        found
    }

    /// Like [`lookup`](Self::lookup) but leaves `last_accessed` alone
    fn peek(&self, key: &str) -> Lookup {
        let mut sessions = self.sessions.lock();
        let Some(handle) = sessions.get(key).cloned() else {
            return Lookup::Missing;
        };
        if handle.is_expired() {
            sessions.remove(key);
            debug!(domain_key = %key, "session expired");
            return Lookup::Expired;
        }
        Lookup::Live(handle)
    }

    /// Live session for `host`, preferring the bare-host entry, then the most
    /// recently used path-scoped one
    fn find_host_session(&self, host: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(host).filter(|h| !h.is_expired()) {
            return Some(handle.clone());
        }
        sessions
            .iter()
            .filter(|(key, handle)| key_belongs_to_host(key, host) && !handle.is_expired())
            .max_by_key(|(_, handle)| handle.last_accessed())
            .map(|(_, handle)| handle.clone())
    }

    /// Creates the session for `key` unless a concurrent caller already did
    async fn create_once(&self, url: &str, key: &str) -> Result<SessionHandle, SessionError> {
        let gate = Arc::clone(
            self.creating
                .lock()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );

        let result = {
            let _guard = gate.lock().await;
            match self.lookup(key) {
                Lookup::Live(handle) => Ok(handle),
                Lookup::Expired | Lookup::Missing => self.create_session(url).await,
            }
        };

        let mut creating = self.creating.lock();
        if Arc::strong_count(&gate) <= 2 {
            creating.remove(key);
        }
        result
    }

    fn insert(&self, key: String, handle: SessionHandle) {
        let mut sessions = self.sessions.lock();
        Self::insert_bounded(&mut sessions, self.max_sessions, key, handle);
    }

    /// Inserts under `key`, first evicting the least recently accessed session
    /// if a new key would exceed `max_sessions`
    fn insert_bounded(
        sessions: &mut HashMap<String, SessionHandle>,
        max_sessions: usize,
        key: String,
        handle: SessionHandle,
    ) {
        if !sessions.contains_key(&key) && sessions.len() >= max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, stored)| stored.last_accessed())
                .map(|(key, _)| key.clone());
            if let Some(evicted) = oldest {
                sessions.remove(&evicted);
                info!(domain_key = %evicted, "session evicted");
            }
        }
        sessions.insert(key, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::transport::mock::MockTransport;
    use crate::http::{RawResponse, RequestBody, TransportError};
    use serde_json::json;
    use std::thread;
    use tempfile::TempDir;

    fn manager_with(config: EngineConfig) -> (SessionManager, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let executor = Arc::new(RequestExecutor::with_transport(&config, transport.clone()));
        (SessionManager::new(executor, &config), transport)
    }

    fn manager() -> (SessionManager, Arc<MockTransport>) {
        manager_with(EngineConfig::default())
    }

    #[tokio::test]
    async fn test_create_session_keys_by_host_and_path() {
        let (manager, _transport) = manager();

        let session = manager
            .create_session("https://example.test/get?id=1")
            .await
            .unwrap();

        assert_eq!(session.domain_key(), "example.test/get");
        assert!(session.cookies().is_empty());
        assert!(!session.is_authenticated());
        assert!(session.auth_token().is_none());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_create_session_captures_seed_cookies() {
        let (manager, transport) = manager();
        transport.respond(RawResponse::new(200, "ok").with_header("Set-Cookie", "sid=seed; Path=/"));

        let session = manager.create_session("https://example.test/").await.unwrap();

        assert_eq!(session.cookies().get("sid").map(String::as_str), Some("seed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_session_survives_failed_seed_request() {
        let (manager, transport) = manager_with(EngineConfig::default().with_max_retries(1));
        transport.fail(TransportError::Connection("refused".to_string()));

        let session = manager.create_session("https://down.test/").await.unwrap();

        assert!(!session.is_expired());
        assert!(session.cookies().is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_create_session_rejects_url_without_host() {
        let (manager, transport) = manager();

        let err = manager.create_session("not-a-url").await.unwrap_err();

        assert!(matches!(err, SessionError::InvalidUrl(_)));
        assert!(manager.is_empty());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_get_session_returns_existing() {
        let (manager, transport) = manager();
        let created = manager.create_session("https://example.test/get").await.unwrap();

        let found = manager.get_session("https://example.test/get", true).await.unwrap();

        assert!(found.same_session(&created));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_get_session_without_create_fails_when_missing() {
        let (manager, _transport) = manager();

        let err = manager
            .get_session("https://example.test/", false)
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Expired(ref key) if key == "example.test/"));
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced_by_new_instance() {
        let (manager, _transport) = manager();
        let url = "https://example.test/get";
        let old = manager.create_session(url).await.unwrap();
        old.set_expires_at(Some(Utc::now() - chrono::Duration::hours(1)));

        let new = manager.get_session(url, true).await.unwrap();

        assert!(!new.same_session(&old));
        assert_ne!(new.id(), old.id());
        assert!(!new.is_expired());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_without_create_fails_and_is_dropped() {
        let (manager, _transport) = manager();
        let url = "https://example.test/get";
        let old = manager.create_session(url).await.unwrap();
        old.set_expires_at(Some(Utc::now() - chrono::Duration::seconds(1)));

        let err = manager.get_session(url, false).await.unwrap_err();

        assert!(matches!(err, SessionError::Expired(_)));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_accessed() {
        let (manager, _transport) = manager_with(EngineConfig::default().with_max_sessions(3));

        manager.create_session("https://one.test/").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        manager.create_session("https://two.test/").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        manager.create_session("https://three.test/").await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));

        // Touch the oldest so "two" becomes the least recently accessed
        manager.get_session("https://one.test/", false).await.unwrap();
        thread::sleep(std::time::Duration::from_millis(2));
        manager.create_session("https://four.test/").await.unwrap();

        assert_eq!(manager.stats().total_sessions, 3);
        assert!(manager.get_session("https://two.test/", false).await.is_err());
        assert!(manager.get_session("https://one.test/", false).await.is_ok());
        assert!(manager.get_session("https://three.test/", false).await.is_ok());
        assert!(manager.get_session("https://four.test/", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_same_key_does_not_grow_store() {
        let (manager, _transport) = manager_with(EngineConfig::default().with_max_sessions(5));

        for i in 0..6 {
            manager
                .create_session(&format!("https://example.test/get?id={i}"))
                .await
                .unwrap();
        }

        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_authenticate_extracts_token_and_rekeys_to_host() {
        let (manager, transport) = manager();
        let session = manager.get_session("https://example.test/get", true).await.unwrap();
        assert_eq!(session.domain_key(), "example.test/get");

        transport.respond(
            RawResponse::new(200, r#"{"access_token": "abc123"}"#)
                .with_header("Set-Cookie", "auth=yes"),
        );
        let authed = manager
            .authenticate(
                "https://example.test/post",
                &json!({"username": "test", "password": "test123"}),
                Method::Post,
            )
            .await
            .unwrap();

        assert!(authed.same_session(&session));
        assert!(authed.is_authenticated());
        assert_eq!(authed.auth_token().as_deref(), Some("abc123"));
        assert_eq!(authed.domain_key(), "example.test");
        assert_eq!(authed.cookies().get("auth").map(String::as_str), Some("yes"));

        let by_host = manager.get_session("https://example.test", false).await;
        assert!(by_host.is_ok());
        assert_eq!(manager.len(), 1);

        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.method, Method::Post);
        assert_eq!(
            sent.body,
            Some(RequestBody::Json(json!({"username": "test", "password": "test123"})))
        );
    }

    #[tokio::test]
    async fn test_authenticate_sends_existing_cookies() {
        let (manager, transport) = manager();
        transport.respond(RawResponse::new(200, "").with_header("Set-Cookie", "csrf=xyz"));
        manager.create_session("https://example.test/login").await.unwrap();

        transport.respond(RawResponse::new(200, r#"{"token": "t"}"#));
        manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap();

        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.headers.get("Cookie").map(String::as_str), Some("csrf=xyz"));
    }

    #[tokio::test]
    async fn test_authenticate_creates_session_when_none_exists() {
        let (manager, transport) = manager();
        transport
            .respond(RawResponse::new(200, "seed"))
            .respond(RawResponse::new(200, r#"{"jwt": "j"}"#));

        let session = manager
            .authenticate("https://fresh.test/auth", &json!({"k": "v"}), Method::Post)
            .await
            .unwrap();

        assert_eq!(session.auth_token().as_deref(), Some("j"));
        assert_eq!(session.domain_key(), "fresh.test");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_authenticate_ignores_lookalike_hosts() {
        let (manager, _transport) = manager();
        let lookalike = manager
            .create_session("https://example.test.evil.test/")
            .await
            .unwrap();

        let session = manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap();

        assert!(!session.same_session(&lookalike));
        assert!(!lookalike.is_authenticated());
    }

    #[tokio::test]
    async fn test_authenticate_failure_leaves_session_untouched() {
        let (manager, transport) = manager();
        let session = manager.create_session("https://example.test/login").await.unwrap();
        let before = session.snapshot();

        transport.respond(RawResponse::new(401, "bad credentials"));
        let err = manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap_err();

        match err {
            SessionError::AuthFailed { source, .. } => assert_eq!(source.status(), Some(401)),
            other => panic!("expected AuthFailed, got {other:?}"),
        }
        let after = session.snapshot();
        assert!(!after.is_authenticated);
        assert_eq!(after.domain_key, before.domain_key);
        assert_eq!(after.expires_at, before.expires_at);
        assert!(manager.get_session("https://example.test/login", false).await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticated_host_session_serves_other_paths() {
        let (manager, transport) = manager();
        transport
            .respond(RawResponse::new(200, ""))
            .respond(RawResponse::new(200, r#"{"token": "t"}"#));
        let authed = manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap();

        let other = manager
            .get_session("https://example.test/reports", true)
            .await
            .unwrap();

        assert!(other.same_session(&authed));
    }

    #[tokio::test]
    async fn test_unauthenticated_host_session_is_not_touched_by_other_paths() {
        let (manager, transport) = manager();
        transport
            .respond(RawResponse::new(200, ""))
            .respond(RawResponse::new(200, r#"{"token": "t"}"#));
        manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap();
        let host_session = manager.logout("https://example.test").await.unwrap();
        let accessed = host_session.last_accessed();
        thread::sleep(std::time::Duration::from_millis(5));

        let other = manager
            .get_session("https://example.test/reports", true)
            .await
            .unwrap();

        assert!(!other.same_session(&host_session));
        assert_eq!(host_session.last_accessed(), accessed);
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_make_request_attaches_credentials_and_merges_cookies() {
        let (manager, transport) = manager();
        transport
            .respond(RawResponse::new(200, ""))
            .respond(RawResponse::new(200, r#"{"token": "t0k"}"#).with_header("Set-Cookie", "sid=1"));
        let session = manager
            .authenticate("https://api.test/login", &json!({}), Method::Post)
            .await
            .unwrap();
        manager.set_header("https://api.test/", "X-Tenant", "acme").await.unwrap();

        transport.respond(RawResponse::new(200, r#"{"items": []}"#).with_header("Set-Cookie", "sid=2"));
        let response = manager
            .make_request(Method::Get, "https://api.test/items", Some(&session), RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.headers.get("Cookie").map(String::as_str), Some("sid=1"));
        assert_eq!(sent.headers.get("Authorization").map(String::as_str), Some("Bearer t0k"));
        assert_eq!(sent.headers.get("X-Tenant").map(String::as_str), Some("acme"));
        assert_eq!(session.cookies().get("sid").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_make_request_resolves_session_when_not_given() {
        let (manager, transport) = manager();

        manager
            .make_request(Method::Get, "https://example.test/a", None, RequestOptions::default().no_cache())
            .await
            .unwrap();

        assert_eq!(manager.len(), 1);
        // Seed GET plus the request itself
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_make_request_wraps_request_errors() {
        let (manager, transport) = manager();
        manager.create_session("https://example.test/").await.unwrap();

        transport.respond(RawResponse::new(500, "boom"));
        let err = manager
            .make_request(Method::Get, "https://example.test/", None, RequestOptions::default().no_cache())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Request(ref e) if e.status() == Some(500)));
    }

    #[tokio::test]
    async fn test_logout_clears_token_keeps_cookies() {
        let (manager, transport) = manager();
        transport
            .respond(RawResponse::new(200, ""))
            .respond(RawResponse::new(200, r#"{"token": "t"}"#).with_header("Set-Cookie", "sid=9"));
        manager
            .authenticate("https://example.test/login", &json!({}), Method::Post)
            .await
            .unwrap();

        let session = manager.logout("https://example.test").await.unwrap();

        assert!(!session.is_authenticated());
        assert!(session.auth_token().is_none());
        assert_eq!(session.cookies().get("sid").map(String::as_str), Some("9"));
    }

    #[tokio::test]
    async fn test_clear_session_and_clear_all() {
        let (manager, _transport) = manager();
        manager.create_session("https://a.test/").await.unwrap();
        manager.create_session("https://b.test/").await.unwrap();

        assert!(manager.clear_session("https://a.test/"));
        assert!(!manager.clear_session("https://a.test/"));
        assert_eq!(manager.len(), 1);

        manager.clear_all_sessions();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_stats_count_active_and_authenticated() {
        let (manager, transport) = manager();
        let stale = manager.create_session("https://stale.test/").await.unwrap();
        stale.set_expires_at(Some(Utc::now() - chrono::Duration::minutes(5)));
        manager.create_session("https://plain.test/").await.unwrap();
        transport
            .respond(RawResponse::new(200, ""))
            .respond(RawResponse::new(200, r#"{"token": "t"}"#));
        manager
            .authenticate("https://secure.test/login", &json!({}), Method::Post)
            .await
            .unwrap();

        let stats = manager.stats();

        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.active_sessions, 2);
        assert_eq!(stats.authenticated_sessions, 1);
        assert!(stats.oldest_session.is_some());
        assert!(stats.oldest_session <= stats.newest_session);
        assert_eq!(manager.active_sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_stats_empty_store() {
        let (manager, _transport) = manager();
        let stats = manager.stats();
        assert_eq!(stats.total_sessions, 0);
        assert!(stats.oldest_session.is_none());
        assert!(stats.newest_session.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_get_session_creates_once() {
        let (manager, transport) = manager();
        let manager = Arc::new(manager);

        let lookups = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.get_session("https://race.test/", true).await }
        });
        let handles: Vec<SessionHandle> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(handles.iter().all(|h| h.same_session(&handles[0])));
        assert_eq!(manager.len(), 1);
        assert_eq!(transport.calls(), 1);
        assert!(manager.creating.lock().is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_restore_sessions() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = SessionStore::with_dir(dir.path().to_path_buf());

        let (manager, transport) = manager();
        transport.respond(RawResponse::new(200, "").with_header("Set-Cookie", "sid=keep"));
        manager.create_session("https://keep.test/").await.unwrap();
        let stale = manager.create_session("https://stale.test/").await.unwrap();
        stale.set_expires_at(Some(Utc::now() - chrono::Duration::minutes(1)));

        assert_eq!(manager.persist(&store).unwrap(), 1);

        let (fresh, _transport) = manager_with(EngineConfig::default());
        assert_eq!(fresh.restore(&store).unwrap(), 1);
        let restored = fresh.get_session("https://keep.test/", false).await.unwrap();
        assert_eq!(restored.cookies().get("sid").map(String::as_str), Some("keep"));
    }
}
