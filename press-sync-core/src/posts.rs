//! Post listing and the raw-record → [`Post`] conversion.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::contract::SourceClient;
use crate::download::fetch_all_pages;
use crate::error::SyncError;

/// A published post as delivered by the CMS. Never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: u64,
    /// Rendered title, may contain HTML entities.
    pub title: String,
    /// Source timestamp, e.g. `2024-03-01T09:30:00`.
    pub published_at: String,
    pub slug: String,
    pub category_ids: Vec<u64>,
    pub body_html: String,
}

#[derive(Deserialize)]
struct Rendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Deserialize)]
struct PostRecord {
    id: u64,
    title: Rendered,
    date: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    categories: Vec<u64>,
    content: Rendered,
}

impl Post {
    /// Convert one raw record from the posts endpoint.
    pub fn from_record(record: &Value) -> Result<Self, SyncError> {
        let raw: PostRecord =
            serde_json::from_value(record.clone()).map_err(|e| SyncError::InvalidRecord {
                record: record_label(record),
                reason: e.to_string(),
            })?;
        Ok(Post {
            id: raw.id,
            title: raw.title.rendered,
            published_at: raw.date,
            slug: raw.slug,
            category_ids: raw.categories,
            body_html: raw.content.rendered,
        })
    }

    /// Stable identifier of this post; see [`identifier_for`].
    pub fn identifier(&self) -> String {
        identifier_for(self)
    }
}

/// Derive the output identifier of a post.
///
/// Pure function of source data: the slug, or `post-{id}` for posts without one.
pub fn identifier_for(post: &Post) -> String {
    let slug = post.slug.trim();
    if slug.is_empty() {
        format!("post-{}", post.id)
    } else {
        slug.to_string()
    }
}

/// Best-effort label for a record in error reports.
pub fn record_label(record: &Value) -> String {
    match (record.get("slug").and_then(Value::as_str), record.get("id")) {
        (Some(slug), _) if !slug.is_empty() => slug.to_string(),
        (_, Some(id)) => format!("post-{id}"),
        _ => "<unknown>".to_string(),
    }
}

/// Fetches published posts.
pub struct PostSource<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    endpoint: &'a str,
    page_size: u32,
}

impl<'a, S: SourceClient + ?Sized> PostSource<'a, S> {
    pub fn new(source: &'a S, endpoint: &'a str, page_size: u32) -> Self {
        Self {
            source,
            endpoint,
            page_size,
        }
    }

    /// Fetch all published post records, following pagination to the end.
    ///
    /// Records carrying a `status` other than `publish` are dropped.
    pub async fn list_published(&self) -> Result<Vec<Value>, SyncError> {
        let records = fetch_all_pages(self.source, self.endpoint, self.page_size).await?;
        let total = records.len();
        let published: Vec<Value> = records
            .into_iter()
            .filter(|record| match record.get("status").and_then(Value::as_str) {
                Some("publish") | None => true,
                Some(status) => {
                    debug!(post = %record_label(record), status, "Dropping unpublished post");
                    false
                }
            })
            .collect();
        info!(total, published = published.len(), "Listed posts");
        Ok(published)
    }
}
