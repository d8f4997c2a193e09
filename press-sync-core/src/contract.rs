#![allow(unused)]

//! # contract: capabilities the pipeline depends on
//!
//! The sync core never talks to the network or to git directly. It goes
//! through two traits:
//!
//! - [`SourceClient`]: read-only HTTP access to the CMS API and to image hosts.
//! - [`VersionControl`]: stage, commit and push of the generated files.
//!
//! ## Implementations
//! - [`crate::download::HttpSource`] implements [`SourceClient`] on top of reqwest.
//! - [`crate::publish::GitCli`] implements [`VersionControl`] by invoking the `git` binary.
//!
//! ## Mocking & Testing
//! Both traits are annotated for `mockall`, so tests can run the whole pipeline
//! against `MockSourceClient` and `MockVersionControl` without a network or a
//! repository. The mocks are exported under the `test-export-mocks` feature
//! (enabled by default) so integration tests in `tests/` can use them.

use std::path::PathBuf;

use async_trait::async_trait;
use mockall::{automock, predicate::*};

use crate::error::{FetchError, VcsError};

/// Read-only HTTP capability used for taxonomy, posts and image downloads.
///
/// Implementors must apply a per-request timeout and report it as
/// [`FetchError::Timeout`]. Non-2xx responses are [`FetchError::Status`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// GET `url` and decode the body as JSON.
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, FetchError>;

    /// GET `url` and return the raw body. An empty body is [`FetchError::EmptyPayload`].
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Version-control capability invoked once at the end of a run that changed files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage all changes (additions, modifications, deletions) under `paths`.
    async fn stage(&self, paths: Vec<PathBuf>) -> Result<(), VcsError>;

    /// Commit staged changes. Returns `false` when there was nothing to commit.
    async fn commit(&self, message: &str) -> Result<bool, VcsError>;

    /// Push the current branch to the configured remote.
    async fn push(&self) -> Result<(), VcsError>;
}
