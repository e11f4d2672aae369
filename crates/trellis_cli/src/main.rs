//! TRELLIS CLI
//!
//! Preprocesses project trees and resolves framework libraries from the
//! command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use config::{CliConfig, enterprise_token};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trellis_core::{Distribution, VersionSpec};
use trellis_framework::{FrameworkResolver, ResolveError};
use trellis_project::{PreprocessOptions, Preprocessor, ProjectNode, StaticTranslator, normalize};
use trellis_storage::{CacheStore, StoreError};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "TRELLIS - project trees and framework resolution", long_about = None)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Framework cache directory
    #[arg(long, global = true, env = "TRELLIS_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
    /// Use only cached catalogs and libraries
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess a project tree and print its build order
    Tree {
        /// Path to project descriptor
        #[arg(short, long)]
        file: PathBuf,
        /// Framework distribution, overriding the root project
        #[arg(long)]
        distribution: Option<String>,
        /// Framework version specifier, overriding the root project
        #[arg(long)]
        framework_version: Option<String>,
    },
    /// Resolve framework libraries
    Resolve {
        /// Framework distribution
        #[arg(short, long)]
        distribution: String,
        /// Version specifier
        #[arg(short, long, default_value = "latest")]
        version: String,
        /// Library names
        #[arg(required = true)]
        libraries: Vec<String>,
    },
    /// Manage the framework cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Remove every cached catalog and library
    Clear,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeOutput<'a> {
    root: &'a str,
    build_order: &'a [String],
    nodes: Vec<&'a ProjectNode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = CliConfig::load(cli.config.as_deref()).await?;
    if let Some(dir) = cli.cache_dir {
        config.cache.root = dir;
    }
    if cli.offline {
        config.resolver.offline = true;
    }

    let store = CacheStore::open(config.cache.clone())
        .await
        .wrap_err_with(|| format!("failed to open cache {}", config.cache.root.display()))?;
    let store = Arc::new(store);

    let result = run(cli.command, &config, store.clone()).await;
    finish(result, store.close().await)
}

/// Command outcome after closing the cache; a close failure never hides the
/// command's own error
fn finish(result: Result<()>, closed: Result<(), StoreError>) -> Result<()> {
    match (result, closed) {
        (Err(e), Err(close)) => {
            warn!(error = %close, "failed to close cache");
            Err(e)
        }
        (Ok(()), Err(close)) => Err(close).wrap_err("failed to close cache"),
        (result, Ok(())) => result,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands, config: &CliConfig, store: Arc<CacheStore>) -> Result<()> {
    match command {
        Commands::Tree {
            file,
            distribution,
            framework_version,
        } => {
            let mut options = PreprocessOptions::default().with_policy(config.policy.clone());
            if let Some(distribution) = distribution {
                options = options.with_distribution(Distribution::parse(&distribution)?);
            }
            if let Some(version) = framework_version {
                options = options.with_version(version);
            }

            let resolver = resolver(config, store)?;
            let translator = StaticTranslator::from_path(file);
            let preprocessor = Preprocessor::new().with_options(options);
            let tree = normalize(&translator, &preprocessor, &resolver).await?;

            print_json(&TreeOutput {
                root: tree.root(),
                build_order: tree.build_order(),
                nodes: tree.ordered_nodes().collect(),
            })
        }
        Commands::Resolve {
            distribution,
            version,
            libraries,
        } => {
            let distribution = Distribution::parse(&distribution)?;
            let spec = VersionSpec::parse(&version).map_err(|e| ResolveError::InvalidSpecifier(e.to_string()))?;
            let libraries: BTreeSet<String> = libraries.into_iter().collect();

            let resolver = resolver(config, store)?;
            let resolved = resolver.resolve(distribution, &spec, &libraries).await?;
            print_json(&resolved)
        }
        Commands::Cache {
            command: CacheCommand::Clear,
        } => {
            store.clear().await?;
            info!(root = %store.config().root.display(), "cache cleared");
            Ok(())
        }
    }
}

/// Resolver for `config`, cancelled on Ctrl-C
fn resolver(config: &CliConfig, store: Arc<CacheStore>) -> Result<FrameworkResolver> {
    let resolver = config.resolver(store, enterprise_token())?;
    let token = resolver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling resolution");
            token.cancel();
        }
    });
    Ok(resolver)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;

    #[test]
    fn test_close_failure_keeps_command_error() {
        let err = finish(Err(eyre!("resolution failed")), Err(StoreError::Closed)).unwrap_err();
        assert_eq!(err.to_string(), "resolution failed");
    }

    #[test]
    fn test_close_failure_after_success() {
        let err = finish(Ok(()), Err(StoreError::Closed)).unwrap_err();
        assert_eq!(err.to_string(), "failed to close cache");
        assert!(finish(Ok(()), Ok(())).is_ok());
    }
}
