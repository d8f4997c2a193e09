//! Error types shared by the sync pipeline.
//!
//! Only [`SyncError::SourceUnavailable`] and [`SyncError::Config`] abort a run.
//! Every other variant is recorded per item in the [`crate::synchronise::SyncReport`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the pipeline stages.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Taxonomy or post listing could not be fetched or parsed. Fatal.
    #[error("source unavailable at {endpoint}: {reason}")]
    SourceUnavailable { endpoint: String, reason: String },

    /// A single image could not be downloaded.
    #[error("asset download failed for {url}: {reason}")]
    AssetDownloadFailed { url: String, reason: String },

    /// A post with empty or placeholder content. Counted as skipped.
    #[error("invalid post {identifier}: {reason}")]
    InvalidPost { identifier: String, reason: String },

    /// A post record that does not have the expected shape.
    #[error("malformed post record {record}: {reason}")]
    InvalidRecord { record: String, reason: String },

    /// Filesystem write failed for a document or an image.
    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stage, commit or push failed after documents were written.
    #[error("version control step failed: {0}")]
    VcsFailed(#[from] VcsError),

    /// Configuration rejected before any fetch.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failures of the [`crate::contract::SourceClient`] capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("{url} returned an empty payload")]
    EmptyPayload { url: String },
}

/// Failures of the [`crate::contract::VersionControl`] capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    #[error("failed to launch `{command}`: {reason}")]
    Launch { command: String, reason: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("cannot stage `{}`: {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },
}

impl SyncError {
    pub(crate) fn source_unavailable(endpoint: &str, reason: impl ToString) -> Self {
        SyncError::SourceUnavailable {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error aborts the whole run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable { .. } | SyncError::Config(_)
        )
    }
}

impl From<FetchError> for SyncError {
    fn from(e: FetchError) -> Self {
        let url = match &e {
            FetchError::Timeout { url }
            | FetchError::Network { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Decode { url, .. }
            | FetchError::EmptyPayload { url } => url.clone(),
        };
        SyncError::AssetDownloadFailed {
            url,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_source_and_config_errors_are_fatal() {
        assert!(SyncError::source_unavailable("https://x/posts", "boom").is_fatal());
        assert!(SyncError::Config("bad".into()).is_fatal());
        let asset: SyncError = FetchError::Timeout {
            url: "https://x/a.png".into(),
        }
        .into();
        assert!(!asset.is_fatal());
        assert!(!SyncError::VcsFailed(VcsError::Launch {
            command: "git push".into(),
            reason: "missing".into()
        })
        .is_fatal());
    }

    #[test]
    fn fetch_error_converts_to_asset_failure_with_url() {
        let err: SyncError = FetchError::Status {
            url: "https://cdn.example/a.png".into(),
            status: 404,
        }
        .into();
        match err {
            SyncError::AssetDownloadFailed { url, reason } => {
                assert_eq!(url, "https://cdn.example/a.png");
                assert!(reason.contains("404"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
