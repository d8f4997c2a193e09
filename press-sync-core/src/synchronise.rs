//! High-level pipeline: categories → posts → transform → write → commit.
//!
//! The orchestration runs strictly in this order:
//!   - Resolve the category taxonomy (fatal on failure)
//!   - List published posts, following pagination (fatal on failure)
//!   - For each post in turn: parse, transform (images localized concurrently), write
//!   - Optionally prune generated documents whose post disappeared upstream
//!   - Stage, commit and push through the injected [`VersionControl`], if anything changed
//!
//! A failure of one post is recorded in the [`SyncReport`] and the loop moves on.
//! A version control failure is surfaced as [`SyncReport::vcs_warning`]; the
//! documents are on disk regardless.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::contract::{SourceClient, VersionControl};
use crate::error::SyncError;
use crate::images::{AssetFailure, ImageLocalizer};
use crate::output::{OutputWriter, WriteResult};
use crate::posts::{record_label, Post, PostSource};
use crate::taxonomy::CategoryResolver;
use crate::transform::ContentTransformer;

/// Result of writing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub identifier: String,
    pub path: PathBuf,
    pub result: WriteResult,
}

/// A post that was not written.
#[derive(Debug)]
pub struct PostFailure {
    pub identifier: String,
    pub error: SyncError,
}

/// Summary of one run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Published posts seen.
    pub attempted: usize,
    /// Documents created or updated.
    pub written: usize,
    pub unchanged: usize,
    /// Posts excluded for empty or placeholder content.
    pub skipped: usize,
    /// Posts that failed to parse, transform or write.
    pub failed: usize,
    /// Stale documents pruned.
    pub removed: usize,
    /// Image files created or updated.
    pub images_written: usize,
    pub documents: Vec<DocumentReport>,
    pub skipped_posts: Vec<PostFailure>,
    pub post_failures: Vec<PostFailure>,
    pub asset_failures: Vec<AssetFailure>,
    pub removed_paths: Vec<PathBuf>,
    pub committed: bool,
    pub vcs_warning: Option<SyncError>,
    /// Pruning failed; written documents are kept and the run still succeeds.
    pub prune_warning: Option<SyncError>,
}

impl SyncReport {
    /// Whether a document was created, updated or removed.
    ///
    /// Image files alone do not count: they only matter through the
    /// documents that reference them.
    pub fn has_changes(&self) -> bool {
        self.written > 0 || self.removed > 0
    }
}

/// Run the whole migration once.
///
/// Returns `Err` only for configuration errors and an unavailable source, in
/// which case nothing has been written.
pub async fn synchronise<S, V>(
    config: &SyncConfig,
    source: &S,
    vcs: &V,
) -> Result<SyncReport, SyncError>
where
    S: SourceClient + ?Sized,
    V: VersionControl + ?Sized,
{
    config.validate()?;
    info!("[SYNC] Starting synchronisation");

    let base_url = Url::parse(&config.source.posts_endpoint)
        .map_err(|e| SyncError::Config(format!("source.posts_endpoint: {e}")))?;

    let categories = CategoryResolver::new(
        source,
        &config.source.taxonomy_endpoint,
        config.source.page_size,
    )
    .resolve()
    .await
    .inspect_err(|e| error!(error = %e, "[SYNC][ERROR] Failed to resolve categories"))?;

    let records = PostSource::new(source, &config.source.posts_endpoint, config.source.page_size)
        .list_published()
        .await
        .inspect_err(|e| error!(error = %e, "[SYNC][ERROR] Failed to list posts"))?;

    let localizer = ImageLocalizer::new(
        source,
        &config.output.images_root,
        &config.output.images_url_prefix,
        base_url,
    );
    let transformer = ContentTransformer::new(localizer, &config.output);
    let writer = OutputWriter::new(&config.output.content_root);

    let mut report = SyncReport {
        attempted: records.len(),
        ..Default::default()
    };
    let mut keep: HashSet<String> = HashSet::new();

    for record in &records {
        let post = match Post::from_record(record) {
            Ok(post) => post,
            Err(e) => {
                warn!(post = %record_label(record), error = %e, "[SYNC] Skipping malformed post record");
                report.failed += 1;
                report.post_failures.push(PostFailure {
                    identifier: record_label(record),
                    error: e,
                });
                continue;
            }
        };
        let identifier = post.identifier();
        keep.insert(identifier.clone());
        info!(post = %identifier, "[SYNC] Processing post");

        let transformed = match transformer.transform(&post, &categories).await {
            Ok(transformed) => transformed,
            Err(e @ SyncError::InvalidPost { .. }) => {
                info!(post = %identifier, reason = %e, "[SYNC] Skipping post without content");
                report.skipped += 1;
                report.skipped_posts.push(PostFailure {
                    identifier,
                    error: e,
                });
                continue;
            }
            Err(e) => {
                warn!(post = %identifier, error = %e, "[SYNC] Post transform failed");
                report.failed += 1;
                report.post_failures.push(PostFailure {
                    identifier,
                    error: e,
                });
                continue;
            }
        };
        report.images_written += transformed
            .images
            .iter()
            .filter(|image| image.result.changed())
            .count();
        report.asset_failures.extend(transformed.image_failures);

        match writer.write(&transformed.document) {
            Ok(result) => {
                if result.changed() {
                    report.written += 1;
                } else {
                    report.unchanged += 1;
                }
                report.documents.push(DocumentReport {
                    path: writer.path_for(&identifier),
                    identifier,
                    result,
                });
            }
            Err(e) => {
                error!(post = %identifier, error = %e, "[SYNC][ERROR] Failed to write document");
                report.failed += 1;
                report.post_failures.push(PostFailure {
                    identifier,
                    error: e,
                });
            }
        }
    }

    if config.output.prune_stale {
        if report.failed > 0 {
            warn!(failed = report.failed, "[SYNC] Not pruning after failed posts");
        } else {
            match writer.prune(&keep) {
                Ok(removed) => {
                    report.removed = removed.len();
                    report.removed_paths = removed;
                }
                Err(e) => {
                    warn!(error = %e, "[SYNC] Pruning stale documents failed");
                    report.prune_warning = Some(e);
                }
            }
        }
    }

    info!(
        attempted = report.attempted,
        written = report.written,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failed,
        removed = report.removed,
        images_written = report.images_written,
        asset_failures = report.asset_failures.len(),
        "[SYNC] Documents processed"
    );

    if !report.has_changes() {
        info!("[SYNC] Nothing changed, skipping version control");
    } else if !config.commit.enabled {
        info!("[SYNC] Commit disabled, leaving changes in the working tree");
    } else {
        match publish(config, vcs).await {
            Ok(committed) => report.committed = committed,
            Err(e) => {
                warn!(error = %e, "[SYNC] Version control step failed; documents are written");
                report.vcs_warning = Some(e);
            }
        }
    }

    info!(committed = report.committed, "[SYNC] Synchronisation complete");
    Ok(report)
}

async fn publish<V: VersionControl + ?Sized>(
    config: &SyncConfig,
    vcs: &V,
) -> Result<bool, SyncError> {
    // Without any localized image the images root may never have been created.
    let mut paths = vec![config.output.content_root.clone()];
    if config.output.images_root.exists() {
        paths.push(config.output.images_root.clone());
    }
    vcs.stage(paths).await?;
    let message = commit_message(&config.commit.message_prefix);
    if !vcs.commit(&message).await? {
        return Ok(false);
    }
    vcs.push().await?;
    Ok(true)
}

/// `"{prefix} {UTC timestamp}"`, e.g. `sync: update from WordPress 2024-03-01T09:30:00Z`.
pub fn commit_message(prefix: &str) -> String {
    format!(
        "{} {}",
        prefix.trim_end(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_message_has_prefix_and_timestamp() {
        let message = commit_message("sync: update from WordPress ");
        let stamp = message
            .strip_prefix("sync: update from WordPress ")
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");
        assert!(stamp.ends_with('Z'));
    }

    #[test]
    fn report_changes() {
        let mut report = SyncReport::default();
        assert!(!report.has_changes());
        report.images_written = 1;
        assert!(!report.has_changes());
        report.removed = 1;
        assert!(report.has_changes());
    }
}
