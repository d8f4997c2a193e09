//! Post → [`MarkdownDocument`] conversion.

use tracing::debug;

use crate::config::OutputConfig;
use crate::contract::SourceClient;
use crate::document::{format_date, FrontMatter, MarkdownDocument};
use crate::error::SyncError;
use crate::images::{rewrite_urls, AssetFailure, ImageLocalizer, LocalizedImage};
use crate::markdown::{decode_html_text, html_to_markdown};
use crate::posts::Post;
use crate::taxonomy::CategoryMap;

/// Placeholder WordPress serves in place of missing content.
pub const NOT_FOUND_MARKER: &str = "Page Not Found";

#[derive(Debug)]
pub struct TransformedPost {
    pub document: MarkdownDocument,
    pub images: Vec<LocalizedImage>,
    pub image_failures: Vec<AssetFailure>,
}

impl TransformedPost {
    pub fn images_changed(&self) -> bool {
        self.images.iter().any(|image| image.result.changed())
    }
}

pub struct ContentTransformer<'a, S: SourceClient + ?Sized> {
    localizer: ImageLocalizer<'a, S>,
    output: &'a OutputConfig,
}

impl<'a, S: SourceClient + ?Sized> ContentTransformer<'a, S> {
    pub fn new(localizer: ImageLocalizer<'a, S>, output: &'a OutputConfig) -> Self {
        Self { localizer, output }
    }

    /// Build the document for `post`, localizing its images on the way.
    ///
    /// Returns [`SyncError::InvalidPost`] for empty or placeholder bodies.
    /// Image failures are reported in the result and never fail the post.
    pub async fn transform(
        &self,
        post: &Post,
        categories: &CategoryMap,
    ) -> Result<TransformedPost, SyncError> {
        let identifier = post.identifier();
        check_content(post, &identifier)?;

        let category_labels = categories.labels(&post.category_ids, &self.output.fallback_category);
        let category_labels = if category_labels.is_empty() {
            vec![self.output.fallback_category.clone()]
        } else {
            category_labels
        };

        let localized = self.localizer.localize(&post.body_html, &identifier).await;
        let body = rewrite_urls(&html_to_markdown(&post.body_html), &localized.mapping);
        debug!(post = %identifier, chars = body.len(), "Rendered body");

        let document = MarkdownDocument {
            front_matter: FrontMatter {
                title: decode_html_text(&post.title),
                date: format_date(&post.published_at),
                permalink: format!("{}{identifier}/", self.output.permalink_prefix),
                categories: category_labels,
                tags: self.output.tags.clone(),
            },
            identifier,
            body,
        };
        Ok(TransformedPost {
            document,
            images: localized.images,
            image_failures: localized.failures,
        })
    }
}

fn check_content(post: &Post, identifier: &str) -> Result<(), SyncError> {
    let invalid = |reason: &str| SyncError::InvalidPost {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };
    if post.body_html.trim().is_empty() {
        return Err(invalid("empty body"));
    }
    if post.body_html.contains(NOT_FOUND_MARKER) {
        return Err(invalid("placeholder body"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::contract::MockSourceClient;
    use crate::error::FetchError;
    use crate::taxonomy::Category;
    use tempfile::tempdir;
    use url::Url;

    fn post(body: &str, categories: Vec<u64>) -> Post {
        Post {
            id: 42,
            title: "Tom &amp; Jerry&#8217;s \"best\"".into(),
            published_at: "2024-03-01T09:30:00".into(),
            slug: "tom-and-jerry".into(),
            category_ids: categories,
            body_html: body.into(),
        }
    }

    fn config(root: &std::path::Path) -> SyncConfig {
        SyncConfig::new(
            "https://blog.example.com/wp-json/wp/v2/posts",
            "https://blog.example.com/wp-json/wp/v2/categories",
            root.join("_posts"),
            root.join("images"),
        )
    }

    fn categories() -> CategoryMap {
        CategoryMap::from_categories([Category {
            id: 1,
            name: "News".into(),
        }])
    }

    #[tokio::test]
    async fn builds_document_with_localized_images() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|_| Ok(vec![1]));
        let root = tempdir().unwrap();
        let config = config(root.path());
        let localizer = ImageLocalizer::new(
            &source,
            &config.output.images_root,
            &config.output.images_url_prefix,
            Url::parse(&config.source.posts_endpoint).unwrap(),
        );
        let transformer = ContentTransformer::new(localizer, &config.output);

        let html = r#"<h2>Intro</h2><p>See <img src="https://cdn.example/a.png" alt="a"></p>"#;
        let transformed = transformer
            .transform(&post(html, vec![1, 99]), &categories())
            .await
            .unwrap();
        let doc = &transformed.document;

        assert_eq!(doc.identifier, "tom-and-jerry");
        assert_eq!(doc.front_matter.title, "Tom & Jerry\u{2019}s \"best\"");
        assert_eq!(doc.front_matter.date, "2024-03-01 09:30:00");
        assert_eq!(doc.front_matter.permalink, "/posts/tom-and-jerry/");
        assert_eq!(doc.front_matter.categories, vec!["News", "未分类"]);
        assert_eq!(doc.front_matter.tags, vec!["wordpress"]);
        let local = &transformed.images[0].image.local_url;
        assert!(doc.body.starts_with("## Intro"));
        assert!(doc.body.contains(&format!("![a]({local})")));
        assert!(!doc.body.contains("cdn.example"));
        assert!(transformed.image_failures.is_empty());
        assert!(transformed.images_changed());
    }

    #[tokio::test]
    async fn relative_image_leaves_other_urls_intact() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|_| Ok(vec![1]));
        let root = tempdir().unwrap();
        let config = config(root.path());
        let localizer = ImageLocalizer::new(
            &source,
            &config.output.images_root,
            &config.output.images_url_prefix,
            Url::parse(&config.source.posts_endpoint).unwrap(),
        );
        let transformer = ContentTransformer::new(localizer, &config.output);

        let html = r#"<p><img src="a.png"> see <a href="https://other.example/data.png">data</a></p>"#;
        let transformed = transformer
            .transform(&post(html, vec![1]), &categories())
            .await
            .unwrap();
        let body = &transformed.document.body;
        let local = &transformed.images[0].image.local_url;

        assert!(body.contains(&format!("![]({local})")), "{body}");
        assert!(body.contains("[data](https://other.example/data.png)"), "{body}");
    }

    #[tokio::test]
    async fn failed_image_keeps_remote_url() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|url| {
            Err(FetchError::Timeout {
                url: url.to_string(),
            })
        });
        let root = tempdir().unwrap();
        let config = config(root.path());
        let localizer = ImageLocalizer::new(
            &source,
            &config.output.images_root,
            &config.output.images_url_prefix,
            Url::parse(&config.source.posts_endpoint).unwrap(),
        );
        let transformer = ContentTransformer::new(localizer, &config.output);

        let transformed = transformer
            .transform(
                &post(r#"<p><img src="https://cdn.example/a.png"></p>"#, vec![]),
                &categories(),
            )
            .await
            .unwrap();

        assert!(transformed
            .document
            .body
            .contains("![](https://cdn.example/a.png)"));
        assert_eq!(transformed.image_failures.len(), 1);
        assert_eq!(transformed.document.front_matter.categories, vec!["未分类"]);
    }

    #[tokio::test]
    async fn rejects_empty_and_placeholder_bodies() {
        let source = MockSourceClient::new();
        let root = tempdir().unwrap();
        let config = config(root.path());
        let localizer = ImageLocalizer::new(
            &source,
            &config.output.images_root,
            &config.output.images_url_prefix,
            Url::parse(&config.source.posts_endpoint).unwrap(),
        );
        let transformer = ContentTransformer::new(localizer, &config.output);

        for body in ["", "  \n ", "<h1>Page Not Found</h1>"] {
            let err = transformer
                .transform(&post(body, vec![1]), &categories())
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidPost { .. }), "{body:?}");
        }
    }
}
