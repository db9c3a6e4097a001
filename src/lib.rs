//! courier - HTTP request and session engine
//!
//! A [`RequestExecutor`](http::RequestExecutor) issues HTTP calls with response
//! caching, sliding-window rate limiting and retry with backoff. A
//! [`SessionManager`](session::SessionManager) layers per-domain cookies and
//! bearer tokens on top of it. [`Engine`](engine::Engine) wires the two
//! together from an [`EngineConfig`](config::EngineConfig).

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod http;
pub mod session;
