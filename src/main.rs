//! Media Resource Manager CLI
//!
//! Resolves images through the three-tier manager from the command line and
//! inspects or clears the on-disk storage.
//!
//! ```text
//! media-resource-manager fetch https://host/a.png https://host/b.jpg --output ./out
//! media-resource-manager stats
//! media-resource-manager clear --all
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use media_resource_manager::{
    ManagerConfig, MediaManager, Priority, Resolution, ResolveRequest,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Media Resource Manager - memory, disk and network image resolution
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, global = true, env = "MEDIA_CONFIG")]
    config: Option<PathBuf>,

    /// Storage root directory (overrides the configuration file)
    #[arg(long, global = true, env = "MEDIA_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Maximum concurrent downloads (overrides the configuration file)
    #[arg(long, global = true, env = "MEDIA_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one or more URLs, printing one JSON line per URL
    Fetch {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Cache tier for the resolved images
        #[arg(long, default_value = "low")]
        priority: Priority,

        /// Do not write downloads through to storage
        #[arg(long)]
        no_persist: bool,

        /// Skip cache and storage
        #[arg(long)]
        force: bool,

        /// Retry transport failures with backoff
        #[arg(long)]
        retry: bool,

        /// Write each image as PNG into this directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print manager statistics as JSON
    Stats,

    /// Clear storage, or everything with --all
    Clear {
        /// Clear storage only (default)
        #[arg(long, conflicts_with = "all")]
        storage: bool,

        /// Cancel downloads and clear cache and storage
        #[arg(long)]
        all: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting Media Resource Manager");
    info!("  Version: {}", media_resource_manager::VERSION);
    info!("  Storage root: {}", config.storage.root_path.display());
    info!(
        "  Max concurrent downloads: {}",
        config.network.max_concurrent_downloads
    );

    let manager = MediaManager::new(config)
        .await
        .context("failed to initialize media manager")?;

    match args.command {
        Command::Fetch {
            urls,
            priority,
            no_persist,
            force,
            retry,
            output,
        } => {
            if let Some(dir) = &output {
                tokio::fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("cannot create {}", dir.display()))?;
            }
            let options = FetchOptions {
                priority,
                persist: !no_persist,
                force,
                retry,
                output,
            };
            let failures = fetch(&manager, urls, &options).await;
            if failures > 0 {
                anyhow::bail!("{} URL(s) failed to resolve", failures);
            }
        }
        Command::Stats => {
            let stats = manager.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Clear { storage: _, all } => {
            let ok = if all {
                manager.hard_reset().await
            } else {
                manager.clear_storage().await
            };
            if !ok {
                anyhow::bail!("storage could not be cleared");
            }
            println!("{}", json!({ "cleared": if all { "all" } else { "storage" } }));
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<ManagerConfig> {
    let mut config = match &args.config {
        Some(path) => ManagerConfig::from_yaml_file(path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => ManagerConfig::default(),
    };
    if let Some(root) = &args.storage_root {
        config.storage.root_path = root.clone();
    }
    if let Some(max) = args.max_concurrent {
        config.network.max_concurrent_downloads = max;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Fetch
// =============================================================================

struct FetchOptions {
    priority: Priority,
    persist: bool,
    force: bool,
    retry: bool,
    output: Option<PathBuf>,
}

/// Resolve every URL concurrently; returns the number of failures
async fn fetch(manager: &Arc<MediaManager>, urls: Vec<String>, options: &FetchOptions) -> usize {
    let resolves = urls.into_iter().map(|url| async move {
        let request = ResolveRequest::new(url.clone())
            .priority(options.priority)
            .persist(options.persist)
            .force_reload(options.force);
        let outcome = if options.retry {
            manager.resolve_with_retry(request).await
        } else {
            manager.resolve(request).await
        };
        (url, outcome)
    });

    let mut failures = 0;
    for (url, outcome) in join_all(resolves).await {
        match outcome {
            Ok(resolution) => {
                let saved = match &options.output {
                    Some(dir) => save_png(manager, &resolution, dir).await,
                    None => None,
                };
                println!(
                    "{}",
                    json!({
                        "url": url,
                        "source": resolution.source,
                        "width": resolution.image.width(),
                        "height": resolution.image.height(),
                        "saved": saved,
                    })
                );
            }
            Err(e) => {
                failures += 1;
                println!(
                    "{}",
                    json!({ "url": url, "kind": e.kind(), "error": e.to_string() })
                );
            }
        }
    }
    failures
}

async fn save_png(manager: &MediaManager, resolution: &Resolution, dir: &Path) -> Option<String> {
    let path = dir.join(format!("{}.png", manager.key_for(&resolution.url)));
    let image = resolution.image.clone();
    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || {
        image
            .as_dynamic()
            .save_with_format(&target, image::ImageFormat::Png)
    })
    .await;

    match written {
        Ok(Ok(())) => Some(path.display().to_string()),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "Failed to write image");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Image writer task failed");
            None
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // logs go to stderr so stdout stays machine-readable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
