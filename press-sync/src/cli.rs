//! # press-sync CLI interface
//!
//! Command parsing and the async [`run`] entrypoint. All pipeline logic lives in
//! [`press_sync_core`]; this module only wires the production capabilities
//! ([`HttpSource`], [`GitCli`]) to [`synchronise`] and prints the report.
//!
//! For programmatic or integration use, call [`run`] with a constructed [`Cli`].

use crate::load_config::load_config;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use press_sync_core::download::HttpSource;
use press_sync_core::publish::GitCli;
use press_sync_core::synchronise::{synchronise, SyncReport};
use std::path::PathBuf;

/// Migrate WordPress posts into a Hexo site and commit the result.
#[derive(Parser, Debug)]
#[clap(
    name = "press-sync",
    version,
    about = "Sync published WordPress posts into Hexo markdown with localized images"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, convert and write all published posts, then commit and push
    Sync {
        /// Path to the YAML config file
        #[clap(long, env = "PRESS_SYNC_CONFIG")]
        config: PathBuf,
        /// Write files but skip stage/commit/push
        #[clap(long)]
        no_commit: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, no_commit } => {
            let mut config = load_config(&config)?;
            if no_commit {
                config.commit.enabled = false;
            }
            config.trace_loaded();
            tracing::info!(command = "sync", "Starting synchronisation process");

            let source = HttpSource::new(config.source.request_timeout())
                .context("Failed to construct HTTP client")?;
            let git = GitCli::new(
                &config.commit.repo_dir,
                &config.commit.remote,
                &config.commit.branch,
            );

            match synchronise(&config, &source, &git).await {
                Ok(report) => {
                    tracing::info!(command = "sync", "Synchronisation complete");
                    println!("Synchronise complete.\n{}", summary(&report));
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e).context("Synchronisation failed"))
                }
            }
        }
    }
}

/// Human-readable report for stdout.
pub fn summary(report: &SyncReport) -> String {
    let mut lines = vec![format!(
        "Report: attempted={} written={} unchanged={} skipped={} failed={} removed={} images_written={}",
        report.attempted,
        report.written,
        report.unchanged,
        report.skipped,
        report.failed,
        report.removed,
        report.images_written
    )];
    for failure in &report.post_failures {
        lines.push(format!("  post failed: {}: {}", failure.identifier, failure.error));
    }
    for skipped in &report.skipped_posts {
        lines.push(format!("  post skipped: {}: {}", skipped.identifier, skipped.error));
    }
    for failure in &report.asset_failures {
        lines.push(format!(
            "  image kept remote: {} ({}): {}",
            failure.url, failure.identifier, failure.error
        ));
    }
    if let Some(warning) = &report.prune_warning {
        lines.push(format!("Prune warning: {warning}"));
    }
    lines.push(format!("Committed: {}", report.committed));
    if let Some(warning) = &report.vcs_warning {
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}
