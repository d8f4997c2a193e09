use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::SyncError;

/// WordPress caps `per_page` at 100.
pub const MAX_PAGE_SIZE: u32 = 100;

/// The top-level sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub source: SourceConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub commit: CommitConfig,
}

/// Where posts and categories come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// e.g. `https://example.com/wp-json/wp/v2/posts?status=publish`
    pub posts_endpoint: String,
    /// e.g. `https://example.com/wp-json/wp/v2/categories`
    pub taxonomy_endpoint: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Where and how documents and images are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub content_root: PathBuf,
    pub images_root: PathBuf,
    /// URL path under which `images_root` is served by the site.
    #[serde(default = "default_images_url_prefix")]
    pub images_url_prefix: String,
    #[serde(default = "default_permalink_prefix")]
    pub permalink_prefix: String,
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    /// Remove previously generated documents whose post no longer exists upstream.
    #[serde(default)]
    pub prune_stale: bool,
}

/// Version-control step settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            repo_dir: default_repo_dir(),
            remote: default_remote(),
            branch: default_branch(),
            message_prefix: default_message_prefix(),
        }
    }
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_images_url_prefix() -> String {
    "/images/wp".to_string()
}

fn default_permalink_prefix() -> String {
    "/posts/".to_string()
}

fn default_fallback_category() -> String {
    "未分类".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["wordpress".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_message_prefix() -> String {
    "sync: update from WordPress".to_string()
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    /// Config with defaults for everything but endpoints and roots. Mostly for tests.
    pub fn new(
        posts_endpoint: impl Into<String>,
        taxonomy_endpoint: impl Into<String>,
        content_root: impl Into<PathBuf>,
        images_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: SourceConfig {
                posts_endpoint: posts_endpoint.into(),
                taxonomy_endpoint: taxonomy_endpoint.into(),
                page_size: default_page_size(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            output: OutputConfig {
                content_root: content_root.into(),
                images_root: images_root.into(),
                images_url_prefix: default_images_url_prefix(),
                permalink_prefix: default_permalink_prefix(),
                fallback_category: default_fallback_category(),
                tags: default_tags(),
                prune_stale: false,
            },
            commit: CommitConfig::default(),
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SyncError> {
        for (key, endpoint) in [
            ("source.posts_endpoint", &self.source.posts_endpoint),
            ("source.taxonomy_endpoint", &self.source.taxonomy_endpoint),
        ] {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| SyncError::Config(format!("{key} is not a valid URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::Config(format!(
                    "{key} must be an http(s) URL, got {endpoint}"
                )));
            }
        }
        if self.source.page_size == 0 || self.source.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "source.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.source.page_size
            )));
        }
        if self.source.request_timeout_secs == 0 {
            return Err(SyncError::Config(
                "source.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            posts_endpoint = %self.source.posts_endpoint,
            taxonomy_endpoint = %self.source.taxonomy_endpoint,
            content_root = %self.output.content_root.display(),
            images_root = %self.output.images_root.display(),
            commit = self.commit.enabled,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
