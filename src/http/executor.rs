//! Request executor: caching, rate limiting and retry around one HTTP call
//!
//! The executor holds no session state. Each [`RequestExecutor::send`] call
//! checks the response cache (GET only), waits for rate-limit admission,
//! issues the call through a [`Transport`] under a per-attempt deadline, and
//! retries timeouts and connection failures with exponential backoff. HTTP
//! error statuses are never retried.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};
use url::Url;

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::transport::{OutgoingRequest, RawResponse, ReqwestTransport, Transport, TransportError};
use super::{Method, RequestError, RequestOptions, Response};
use crate::cache::{fingerprint, CacheStats, ResponseCache};
use crate::config::EngineConfig;

/// Executes HTTP calls with caching, admission control and resilience
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    cache: ResponseCache,
    retry: RetryPolicy,
    timeout: Duration,
    default_headers: BTreeMap<String, String>,
}

impl fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Create an executor that talks to the network with reqwest
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Create an executor over a custom transport
    pub fn with_transport(config: &EngineConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(config.rate_limit, config.rate_window),
            cache: ResponseCache::new(config.cache_capacity, config.cache_ttl),
            retry: RetryPolicy::new(
                config.max_retries,
                config.retry_base_delay,
                config.retry_max_delay,
            ),
            timeout: config.timeout,
            default_headers: config.default_headers.clone(),
        }
    }

    /// Sends one logical request
    ///
    /// # Returns
    /// * `Ok(Response)` - a fresh or cached response with status below 400
    /// * `Err(RequestError::HttpStatus)` - on the first response with status >= 400
    /// * `Err(RequestError::Timeout | RequestError::Transport)` - once every attempt failed
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response, RequestError> {
        let mut target = Url::parse(url).map_err(|e| RequestError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let cacheable = method == Method::Get && options.use_cache;
        let key = fingerprint(method, url, &options.params, &options.headers);
        if cacheable {
            if let Some(cached) = self.cache.get(&key) {
                debug!(%url, "cache hit");
                return Ok(cached);
            }
            debug!(%url, "cache miss");
        }

        if !options.params.is_empty() {
            target.query_pairs_mut().extend_pairs(options.params.iter());
        }

        let attempts = options
            .max_retries
            .map_or(self.retry, |n| self.retry.with_attempts(n));
        let request = OutgoingRequest {
            method,
            url: target,
            headers: self.merge_headers(options.headers),
            body: options.body,
            timeout: options.timeout.unwrap_or(self.timeout),
        };

        self.limiter.acquire().await;
        let raw = self.execute_with_retry(url, request, attempts).await?;
        if raw.status >= 400 {
            debug!(%url, status = raw.status, "request failed with error status");
            return Err(RequestError::HttpStatus {
                url: url.to_string(),
                status: raw.status,
                body: raw.body,
            });
        }

        let response = Response::from_raw(raw);
        if cacheable {
            self.cache.insert(key, response.clone());
        }
        Ok(response)
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, RequestError> {
        self.send(Method::Get, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response, RequestError> {
        self.send(Method::Post, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response, RequestError> {
        self.send(Method::Put, url, options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response, RequestError> {
        self.send(Method::Delete, url, options).await
    }

    pub async fn head(&self, url: &str, options: RequestOptions) -> Result<Response, RequestError> {
        self.send(Method::Head, url, options).await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The limiter shared by every call on this executor
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Default headers first, then per-call headers replacing any name they share
    fn merge_headers(&self, call_headers: BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = self
            .default_headers
            .iter()
            .filter(|(name, _)| {
                !call_headers
                    .keys()
                    .any(|own| own.eq_ignore_ascii_case(name))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        headers.extend(call_headers);
        headers
    }

    /// Runs attempts until one yields a response or the policy is exhausted
    ///
    /// The caller has already been admitted by the rate limiter; retries
    /// share that admission. Only timeouts and connection failures reach the
    /// retry path.
    async fn execute_with_retry(
        &self,
        url: &str,
        request: OutgoingRequest,
        policy: RetryPolicy,
    ) -> Result<RawResponse, RequestError> {
        let deadline = request.timeout;
        let mut attempt = 1;

        loop {
            let outcome =
                tokio::time::timeout(deadline, self.transport.execute(request.clone())).await;
            let failure = match outcome {
                Ok(Ok(raw)) => return Ok(raw),
                Ok(Err(TransportError::Timeout)) | Err(_) => RequestError::Timeout {
                    url: url.to_string(),
                    after: deadline,
                },
                Ok(Err(TransportError::Connection(detail))) => RequestError::Transport {
                    url: url.to_string(),
                    detail,
                },
            };

            if attempt >= policy.max_attempts() {
                error!(%url, attempts = attempt, error = %failure, "request failed, giving up");
                return Err(failure);
            }

            let delay = policy.delay_after(attempt);
            warn!(
                %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
