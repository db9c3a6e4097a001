//! Command-line interface parsing for courier
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a [`StartupConfig`]: the request to issue plus the [`EngineConfig`] to run
//! it with. Flags given on the command line override a `--config` file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::http::{Method, RequestOptions};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The HTTP method is not recognized
    #[error("Invalid method: '{0}'. Valid methods: GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS")]
    InvalidMethod(String),

    /// A header is not in `Name: value` form
    #[error("Invalid header: '{0}'. Expected NAME:VALUE")]
    InvalidHeader(String),

    /// A query parameter or form field is not in `key=value` form
    #[error("Invalid parameter: '{0}'. Expected KEY=VALUE")]
    InvalidParam(String),

    /// `--json` or `--credentials` is not valid JSON
    #[error("Invalid JSON in {flag}: {source}")]
    InvalidJson {
        flag: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// More than one body flag was given
    #[error("Only one of --json, --data and --form may be given")]
    ConflictingBody,

    /// `--auth-url` was given without `--credentials`
    #[error("--auth-url requires --credentials")]
    MissingCredentials,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// courier - HTTP requests with caching, rate limiting and sessions
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "HTTP requests with caching, rate limiting, retries and sessions")]
#[command(version)]
pub struct Cli {
    /// Target URL
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Request header, repeatable
    ///
    /// Example: -H 'Accept: application/json'
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Query parameter, repeatable
    #[arg(short = 'q', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// JSON request body
    #[arg(long, value_name = "JSON")]
    pub json: Option<String>,

    /// Raw text request body
    #[arg(short = 'd', long, value_name = "TEXT")]
    pub data: Option<String>,

    /// Form field, repeatable; sent URL-encoded
    #[arg(short = 'F', long = "form", value_name = "KEY=VALUE")]
    pub form: Vec<String>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Send the request through a session (cookies and auth token)
    #[arg(long)]
    pub session: bool,

    /// Authenticate against this URL before the request; implies --session
    #[arg(long, value_name = "URL", requires = "credentials")]
    pub auth_url: Option<String>,

    /// Credentials posted as JSON to --auth-url
    #[arg(long, value_name = "JSON")]
    pub credentials: Option<String>,

    /// Restore sessions from the data directory and save them afterwards
    #[arg(long)]
    pub persist_sessions: bool,

    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Attempts per request, including the first
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Requests admitted per rate window
    #[arg(long, value_name = "N")]
    pub rate_limit: Option<u32>,

    /// Response cache lifetime in seconds
    #[arg(long, value_name = "SECS")]
    pub cache_ttl: Option<u64>,

    /// Send the request this many times
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub repeat: u32,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

/// Authentication to perform before the request
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub url: String,
    pub credentials: Value,
}

/// Configuration derived from CLI arguments for startup
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub method: Method,
    pub url: String,
    pub options: RequestOptions,
    pub engine: EngineConfig,
    /// Whether the request goes through the session manager
    pub use_session: bool,
    pub auth: Option<AuthRequest>,
    pub persist_sessions: bool,
    pub repeat: u32,
    pub verbose: bool,
}

/// Parses a method name, case-insensitively.
///
/// # Arguments
/// * `s` - The method string from CLI
///
/// # Returns
/// * `Ok(Method)` if the string names a known method
/// * `Err(CliError::InvalidMethod)` otherwise
pub fn parse_method_arg(s: &str) -> Result<Method, CliError> {
    Method::parse(s).ok_or_else(|| CliError::InvalidMethod(s.to_string()))
}

/// Parses a `Name: value` header argument.
///
/// Whitespace around the name and value is trimmed; the value may be empty.
pub fn parse_header_arg(s: &str) -> Result<(String, String), CliError> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| CliError::InvalidHeader(s.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidHeader(s.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parses a `key=value` query parameter or form field argument.
pub fn parse_param_arg(s: &str) -> Result<(String, String), CliError> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::InvalidParam(s.to_string())),
    }
}

fn parse_json_arg(flag: &'static str, s: &str) -> Result<Value, CliError> {
    serde_json::from_str(s).map_err(|source| CliError::InvalidJson { flag, source })
}

impl StartupConfig {
    /// Creates a StartupConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(StartupConfig)` with the request and engine settings
    /// * `Err(CliError)` if an argument is malformed or the config file fails to load
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let method = parse_method_arg(&cli.method)?;
        let options = Self::request_options(cli)?;
        let engine = Self::engine_config(cli)?;

        let auth = match (&cli.auth_url, &cli.credentials) {
            (Some(url), Some(credentials)) => Some(AuthRequest {
                url: url.clone(),
                credentials: parse_json_arg("--credentials", credentials)?,
            }),
            (Some(_), None) => return Err(CliError::MissingCredentials),
            (None, _) => None,
        };

        Ok(StartupConfig {
            method,
            url: cli.url.clone(),
            options,
            engine,
            use_session: cli.session || auth.is_some(),
            auth,
            persist_sessions: cli.persist_sessions,
            repeat: cli.repeat.max(1),
            verbose: cli.verbose,
        })
    }

    fn request_options(cli: &Cli) -> Result<RequestOptions, CliError> {
        let body_flags = [cli.json.is_some(), cli.data.is_some(), !cli.form.is_empty()];
        if body_flags.iter().filter(|given| **given).count() > 1 {
            return Err(CliError::ConflictingBody);
        }

        let mut options = RequestOptions::default();
        for header in &cli.headers {
            let (name, value) = parse_header_arg(header)?;
            options = options.header(name, value);
        }
        for param in &cli.params {
            let (key, value) = parse_param_arg(param)?;
            options = options.param(key, value);
        }

        if let Some(json) = &cli.json {
            options = options.json(parse_json_arg("--json", json)?);
        } else if let Some(text) = &cli.data {
            options = options.text(text.clone());
        } else if !cli.form.is_empty() {
            let fields = cli
                .form
                .iter()
                .map(|field| parse_param_arg(field))
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            options = options.form(fields);
        }

        if cli.no_cache {
            options = options.no_cache();
        }
        Ok(options)
    }

    fn engine_config(cli: &Cli) -> Result<EngineConfig, CliError> {
        let mut config = match &cli.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };

        if let Some(secs) = cli.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(attempts) = cli.max_retries {
            config = config.with_max_retries(attempts);
        }
        if let Some(calls) = cli.rate_limit {
            let window = config.rate_window;
            config = config.with_rate_limit(calls, window);
        }
        if let Some(secs) = cli.cache_ttl {
            config = config.with_cache_ttl(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
