//! `load_config`: read the YAML config file into a validated [`SyncConfig`].
//!
//! This is the only place where user-supplied YAML is parsed. Relative paths in
//! the file (`output.content_root`, `output.images_root`, `commit.repo_dir`) are
//! resolved against the directory containing the file, so a run behaves the
//! same regardless of the working directory. The results are always absolute.
//!
//! # Errors
//! Everything surfaces as `anyhow::Error` with the config path attached.

use anyhow::{Context, Result};
use press_sync_core::config::SyncConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let mut config: SyncConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML {:?}: {e}", path_ref)
    })?;

    let absolute = if path_ref.is_absolute() {
        path_ref.to_path_buf()
    } else {
        env::current_dir()
            .context("Failed to read the working directory")?
            .join(path_ref)
    };
    let base = absolute.parent().unwrap_or(absolute.as_path());
    config.output.content_root = resolve(base, &config.output.content_root);
    config.output.images_root = resolve(base, &config.output.images_root);
    config.commit.repo_dir = resolve(base, &config.commit.repo_dir);

    config
        .validate()
        .with_context(|| format!("Invalid config {:?}", path_ref))?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");
    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
