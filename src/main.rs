//! tilesmith - operator tool for the tile source and render layers.
//!
//! `fetch` resolves any supported URI through the configured cache;
//! `fingerprint` prints the pool key fingerprint of a style.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilesmith::{
    build_cache,
    config::{Cli, Command, FetchArgs, FingerprintArgs, ServiceConfig},
    MinimalStyleValidator, SourceResolver, StyleRef, StyleStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Fetch(args) => run_fetch(args).await,
        Command::Fingerprint(args) => run_fingerprint(args).await,
    }
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(args: FetchArgs) -> ExitCode {
    let resolver = match build_resolver(&args.config).await {
        Some(resolver) => resolver,
        None => return ExitCode::FAILURE,
    };

    let data = match resolver.resolve(&args.uri).await {
        Ok(Some(data)) => data,
        Ok(None) => {
            error!(uri = %args.uri, "Nothing found at URI");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(uri = %args.uri, error = %e, "Fetch failed");
            return ExitCode::FAILURE;
        }
    };

    let written = match &args.output {
        Some(path) => tokio::fs::write(path, &data).await,
        None => {
            let mut stdout = tokio::io::stdout();
            match stdout.write_all(&data).await {
                Ok(()) => stdout.flush().await,
                Err(e) => Err(e),
            }
        }
    };

    match written {
        Ok(()) => {
            info!(uri = %args.uri, bytes = data.len(), "Fetched");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Failed to write output");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Fingerprint Command
// =============================================================================

async fn run_fingerprint(args: FingerprintArgs) -> ExitCode {
    let resolver = match build_resolver(&args.config).await {
        Some(resolver) => resolver,
        None => return ExitCode::FAILURE,
    };

    let styles = StyleStore::new(
        Arc::new(resolver),
        Arc::new(MinimalStyleValidator),
        args.config.pool.fingerprint,
        1,
    );

    match styles.load(&StyleRef::uri(&args.style)).await {
        Ok(style) => {
            println!("{}", style.fingerprint);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(style = %args.style, error = %e, "Could not load style");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Validate `config` and build the cache-backed resolver, logging failures.
async fn build_resolver(config: &ServiceConfig) -> Option<SourceResolver> {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return None;
    }

    let cache = match build_cache(&config.cache, &config.storage).await {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "Cache setup failed");
            return None;
        }
    };

    match SourceResolver::from_config(cache, &config.storage).await {
        Ok(resolver) => Some(resolver),
        Err(e) => {
            error!(error = %e, "Object storage setup failed");
            None
        }
    }
}

/// Initialize the tracing subscriber; logs go to stderr so `fetch` output
/// on stdout stays clean.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilesmith=debug"
    } else {
        "tilesmith=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
