//! courier - send HTTP requests through the request and session engine
//!
//! Issues one request (optionally several times) with response caching,
//! rate limiting, retries and cookie/token sessions, and prints each
//! normalized response as JSON on stdout. Logs go to stderr.

use std::process;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier::cli::{Cli, StartupConfig};
use courier::engine::Engine;
use courier::http::{Method, Response};
use courier::session::SessionStore;

/// Installs the stderr log subscriber; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: bool) {
    let fallback = if verbose { "courier=debug" } else { "courier=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_response(response: &Response) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

async fn run(config: StartupConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::new(config.engine.clone());

    let store = if config.persist_sessions {
        let store = SessionStore::new();
        if store.is_none() {
            warn!("no data directory available, sessions will not be persisted");
        }
        store
    } else {
        None
    };
    if let Some(store) = &store {
        engine.sessions().restore(store)?;
    }

    if let Some(auth) = &config.auth {
        engine
            .sessions()
            .authenticate(&auth.url, &auth.credentials, Method::Post)
            .await?;
    }

    for round in 1..=config.repeat {
        let response = if config.use_session {
            engine
                .session_request(config.method, &config.url, config.options.clone())
                .await?
        } else {
            engine
                .request(config.method, &config.url, config.options.clone())
                .await?
        };
        info!(round, status = response.status, "response received");
        print_response(&response)?;
    }

    if let Some(store) = &store {
        engine.sessions().persist(store)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match StartupConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    init_logging(config.verbose);
    run(config).await
}
