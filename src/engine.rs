//! Engine wiring
//!
//! An [`Engine`] owns one [`RequestExecutor`] and one [`SessionManager`]
//! sharing it, so stateless and session-bound calls draw from the same
//! rate-limit budget and response cache.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::http::{Method, RequestError, RequestExecutor, RequestOptions, Response, Transport};
use crate::session::{SessionError, SessionManager};

/// The HTTP request and session engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    executor: Arc<RequestExecutor>,
    sessions: SessionManager,
}

impl Engine {
    /// Creates an engine that talks to the network with reqwest
    pub fn new(config: EngineConfig) -> Self {
        let executor = Arc::new(RequestExecutor::new(&config));
        Self::assemble(config, executor)
    }

    /// Creates an engine over a custom transport
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let executor = Arc::new(RequestExecutor::with_transport(&config, transport));
        Self::assemble(config, executor)
    }

    fn assemble(config: EngineConfig, executor: Arc<RequestExecutor>) -> Self {
        let sessions = SessionManager::new(Arc::clone(&executor), &config);
        Self {
            config,
            executor,
            sessions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Sends a request without session state
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, RequestError> {
        self.executor.send(method, url, options).await
    }

    /// Sends a request through the session resolved for `url`
    pub async fn session_request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, SessionError> {
        self.sessions.make_request(method, url, None, options).await
    }
}
