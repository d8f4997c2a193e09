//! Image discovery, download and local storage for one post body.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use futures::future::join_all;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::contract::SourceClient;
use crate::error::{FetchError, SyncError};
use crate::output::{sanitize_identifier, short_digest, write_if_changed, WriteResult};

const DEFAULT_EXTENSION: &str = ".jpg";

/// One distinct image reference of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// `src` as written in the body (trimmed).
    pub remote_url: String,
    /// Absolute URL the bytes are fetched from.
    pub download_url: String,
    pub file_name: String,
    pub local_url: String,
    /// With leading dot, e.g. `.png`.
    pub extension: String,
}

/// An image that is now available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizedImage {
    pub image: ImageRef,
    pub result: WriteResult,
}

/// A reference that could not be localized. The body keeps the remote URL.
#[derive(Debug)]
pub struct AssetFailure {
    pub identifier: String,
    pub url: String,
    pub error: SyncError,
}

#[derive(Debug, Default)]
pub struct LocalizedImages {
    /// remote URL → local URL, successful images only.
    pub mapping: BTreeMap<String, String>,
    pub images: Vec<LocalizedImage>,
    pub failures: Vec<AssetFailure>,
}

impl LocalizedImages {
    /// Whether any image file was created or updated.
    pub fn changed(&self) -> bool {
        self.images.iter().any(|image| image.result.changed())
    }
}

/// All distinct `img` sources of an HTML fragment, in document order.
///
/// Empty sources and `data:` URIs are ignored.
pub fn extract_image_sources(html: &str) -> Vec<String> {
    let fragment = Html::parse_fragment(html);
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    fragment
        .select(&selector)
        .filter_map(|img| img.value().attr("src"))
        .map(str::trim)
        .filter(|src| !src.is_empty() && !src.to_ascii_lowercase().starts_with("data:"))
        .filter(|src| seen.insert(src.to_string()))
        .map(str::to_string)
        .collect()
}

/// File extension from the last path segment, `.jpg` when absent or implausible.
pub fn extension_for(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Replace each remote URL with its local URL, longest first.
///
/// Absolute `http(s)` URLs are replaced wherever they occur. Any other source
/// (relative or protocol-relative) is only replaced where it is the whole
/// target of a Markdown link or image, so `a.png` never touches
/// `https://other.example/data.png`.
pub fn rewrite_urls(markdown: &str, mapping: &BTreeMap<String, String>) -> String {
    let mut pairs: Vec<(&String, &String)> = mapping.iter().collect();
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    pairs
        .into_iter()
        .fold(markdown.to_string(), |body, (remote, local)| {
            if is_absolute(remote) {
                body.replace(remote.as_str(), local)
            } else {
                replace_link_targets(&body, remote, local)
            }
        })
}

fn is_absolute(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Replace `remote` only where it fills a `](…)` target, optionally followed
/// by a ` "title"`.
fn replace_link_targets(body: &str, remote: &str, local: &str) -> String {
    if remote.is_empty() {
        return body.to_string();
    }
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for (start, _) in body.match_indices(remote) {
        let end = start + remote.len();
        let after = &body[end..];
        if body[..start].ends_with("](") && (after.starts_with(')') || after.starts_with(" \"")) {
            out.push_str(&body[last..start]);
            out.push_str(local);
            last = end;
        }
    }
    out.push_str(&body[last..]);
    out
}

pub struct ImageLocalizer<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    images_root: &'a Path,
    url_prefix: &'a str,
    base_url: Url,
}

impl<'a, S: SourceClient + ?Sized> ImageLocalizer<'a, S> {
    /// `base_url` resolves relative and protocol-relative sources.
    pub fn new(source: &'a S, images_root: &'a Path, url_prefix: &'a str, base_url: Url) -> Self {
        Self {
            source,
            images_root,
            url_prefix,
            base_url,
        }
    }

    /// Work out download URL, file name and local URL for each image in `html`.
    pub fn plan(&self, html: &str, identifier: &str) -> (Vec<ImageRef>, Vec<AssetFailure>) {
        let mut refs = Vec::new();
        let mut failures = Vec::new();
        for src in extract_image_sources(html) {
            match self.image_ref(&src, identifier) {
                Ok(image) => refs.push(image),
                Err(error) => failures.push(AssetFailure {
                    identifier: identifier.to_string(),
                    url: src,
                    error,
                }),
            }
        }
        (refs, failures)
    }

    fn image_ref(&self, src: &str, identifier: &str) -> Result<ImageRef, SyncError> {
        let unsupported = |reason: String| SyncError::AssetDownloadFailed {
            url: src.to_string(),
            reason,
        };
        let resolved = self
            .base_url
            .join(src)
            .map_err(|e| unsupported(format!("unresolvable source: {e}")))?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return Err(unsupported(format!(
                "unsupported scheme `{}`",
                resolved.scheme()
            )));
        }
        let extension = extension_for(&resolved);
        let download_url = resolved.to_string();
        let file_name = format!(
            "{}-{}{extension}",
            sanitize_identifier(identifier),
            short_digest(&download_url)
        );
        let local_url = format!("{}/{file_name}", self.url_prefix.trim_end_matches('/'));
        Ok(ImageRef {
            remote_url: src.to_string(),
            download_url,
            file_name,
            local_url,
            extension,
        })
    }

    /// Download and store every image of `html` concurrently.
    ///
    /// Never fails as a whole: each unavailable image becomes an
    /// [`AssetFailure`] and is left out of the mapping.
    pub async fn localize(&self, html: &str, identifier: &str) -> LocalizedImages {
        let (refs, mut failures) = self.plan(html, identifier);
        if refs.is_empty() {
            return LocalizedImages {
                failures,
                ..Default::default()
            };
        }

        // Distinct sources may resolve to the same file; fetch it once.
        let mut targets: Vec<&ImageRef> = Vec::new();
        let mut seen = HashSet::new();
        for image in &refs {
            if seen.insert(image.file_name.as_str()) {
                targets.push(image);
            }
        }
        debug!(post = identifier, images = targets.len(), "Downloading images");

        let settled = join_all(targets.into_iter().map(|image| async move {
            (image.file_name.as_str(), self.store(image).await)
        }))
        .await;

        let mut stored: HashMap<String, WriteResult> = HashMap::new();
        for (file_name, outcome) in settled {
            match outcome {
                Ok(result) => {
                    stored.insert(file_name.to_string(), result);
                }
                Err((url, error)) => {
                    warn!(post = identifier, url = %url, error = %error, "Image download failed, keeping remote URL");
                    failures.push(AssetFailure {
                        identifier: identifier.to_string(),
                        url,
                        error,
                    });
                }
            }
        }

        let mut localized = LocalizedImages {
            failures,
            ..Default::default()
        };
        for image in refs {
            if let Some(result) = stored.get(image.file_name.as_str()) {
                localized
                    .mapping
                    .insert(image.remote_url.clone(), image.local_url.clone());
                localized.images.push(LocalizedImage {
                    image,
                    result: *result,
                });
            }
        }
        info!(
            post = identifier,
            localized = localized.images.len(),
            failed = localized.failures.len(),
            "Localized images"
        );
        localized
    }

    async fn store(&self, image: &ImageRef) -> Result<WriteResult, (String, SyncError)> {
        let fail = |error: SyncError| (image.remote_url.clone(), error);
        let bytes = self
            .source
            .fetch_bytes(&image.download_url)
            .await
            .map_err(|e| fail(e.into()))?;
        if bytes.is_empty() {
            return Err(fail(
                FetchError::EmptyPayload {
                    url: image.download_url.clone(),
                }
                .into(),
            ));
        }
        write_if_changed(&self.images_root.join(&image.file_name), &bytes).map_err(fail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockSourceClient;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Barrier;

    const BASE: &str = "https://blog.example.com/wp-json/wp/v2/posts";

    fn base() -> Url {
        Url::parse(BASE).unwrap()
    }

    #[test]
    fn extracts_distinct_sources_in_order() {
        let html = r#"<p><img src=" https://cdn.example/a.png "><img src="data:image/png;base64,AAAA">
            <img src=""><img alt="no source"><img src="https://cdn.example/b.gif">
            <img src="https://cdn.example/a.png"></p>"#;
        assert_eq!(
            extract_image_sources(html),
            vec!["https://cdn.example/a.png", "https://cdn.example/b.gif"]
        );
    }

    #[test]
    fn extension_rules() {
        let ext = |u: &str| extension_for(&Url::parse(u).unwrap());
        assert_eq!(ext("https://x/a/photo.PNG"), ".png");
        assert_eq!(ext("https://x/a/photo.webp?w=300"), ".webp");
        assert_eq!(ext("https://x/a/photo"), ".jpg");
        assert_eq!(ext("https://x/a/archive.toolongext"), ".jpg");
        assert_eq!(ext("https://x/a/.hidden"), ".jpg");
        assert_eq!(ext("https://x/"), ".jpg");
    }

    #[test]
    fn plan_resolves_relative_sources() {
        let source = MockSourceClient::new();
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp/", base());
        let html = r#"<img src="/wp-content/uploads/a.png"><img src="//cdn.example/b.jpg"><img src="mailto:x@y">"#;
        let (refs, failures) = localizer.plan(html, "post");

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].remote_url, "/wp-content/uploads/a.png");
        assert_eq!(
            refs[0].download_url,
            "https://blog.example.com/wp-content/uploads/a.png"
        );
        assert_eq!(refs[1].download_url, "https://cdn.example/b.jpg");
        assert!(refs[0].file_name.starts_with("post-"));
        assert!(refs[0].file_name.ends_with(".png"));
        assert_eq!(refs[0].local_url, format!("/images/wp/{}", refs[0].file_name));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].url, "mailto:x@y");
    }

    #[test]
    fn file_names_do_not_depend_on_order() {
        let source = MockSourceClient::new();
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp", base());
        let (first, _) = localizer.plan(r#"<img src="https://c/a.png"><img src="https://c/b.png">"#, "p");
        let (second, _) = localizer.plan(r#"<img src="https://c/b.png"><img src="https://c/a.png">"#, "p");
        assert_eq!(first[0].file_name, second[1].file_name);
        assert_eq!(first[1].file_name, second[0].file_name);
    }

    #[tokio::test]
    async fn file_names_stay_inside_the_images_root() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|_| Ok(vec![5]));
        let root = tempdir().unwrap();
        let images_root = root.path().join("images");
        let localizer = ImageLocalizer::new(&source, &images_root, "/images/wp", base());

        let localized = localizer
            .localize(r#"<img src="https://c/a.png">"#, "../../escape")
            .await;

        let image = &localized.images[0].image;
        assert!(image.file_name.starts_with("escape-"), "{}", image.file_name);
        assert!(!image.file_name.contains('/'));
        assert!(images_root.join(&image.file_name).is_file());
        assert!(!root.path().join("escape").exists());
        assert_eq!(image.local_url, format!("/images/wp/{}", image.file_name));
    }

    /// Each download waits until `barrier` is full, so it only finishes when
    /// all of them are in flight at once.
    struct RendezvousSource {
        barrier: Barrier,
    }

    #[async_trait]
    impl SourceClient for RendezvousSource {
        async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
            Err(FetchError::Network {
                url: url.to_string(),
                reason: "not served".to_string(),
            })
        }

        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.barrier.wait().await;
            Ok(url.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn images_of_a_post_download_concurrently() {
        let source = RendezvousSource {
            barrier: Barrier::new(2),
        };
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp", base());
        let html = r#"<img src="https://c/a.png"><img src="https://c/b.png">"#;

        let localized = tokio::time::timeout(Duration::from_secs(5), localizer.localize(html, "p"))
            .await
            .expect("downloads ran one after another");

        assert_eq!(localized.images.len(), 2);
        assert!(localized.failures.is_empty());
    }

    #[tokio::test]
    async fn repeated_image_is_downloaded_once() {
        let mut source = MockSourceClient::new();
        source
            .expect_fetch_bytes()
            .withf(|url| url == "https://cdn.example/a.png")
            .times(1)
            .returning(|_| Ok(vec![1, 2, 3]));
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp", base());
        let html = r#"<img src="https://cdn.example/a.png"><p><img src="https://cdn.example/a.png"></p>"#;

        let localized = localizer.localize(html, "post").await;

        assert!(localized.failures.is_empty());
        assert_eq!(localized.images.len(), 1);
        assert!(localized.changed());
        let image = &localized.images[0].image;
        assert_eq!(
            std::fs::read(root.path().join(&image.file_name)).unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            localized.mapping.get("https://cdn.example/a.png"),
            Some(&image.local_url)
        );
    }

    #[tokio::test]
    async fn failures_are_recorded_and_unmapped() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|url| {
            if url.ends_with("ok.png") {
                Ok(vec![9])
            } else if url.ends_with("empty.png") {
                Ok(Vec::new())
            } else {
                Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            }
        });
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp", base());
        let html = r#"<img src="https://c/ok.png"><img src="https://c/missing.png"><img src="https://c/empty.png">"#;

        let localized = localizer.localize(html, "post").await;

        assert_eq!(localized.images.len(), 1);
        assert_eq!(localized.mapping.len(), 1);
        let mut failed: Vec<&str> = localized.failures.iter().map(|f| f.url.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["https://c/empty.png", "https://c/missing.png"]);
        assert!(localized
            .failures
            .iter()
            .all(|f| matches!(f.error, SyncError::AssetDownloadFailed { .. })));
    }

    #[tokio::test]
    async fn unchanged_image_is_not_rewritten() {
        let mut source = MockSourceClient::new();
        source.expect_fetch_bytes().returning(|_| Ok(vec![7, 7]));
        let root = tempdir().unwrap();
        let localizer = ImageLocalizer::new(&source, root.path(), "/images/wp", base());
        let html = r#"<img src="https://c/a.png">"#;

        assert!(localizer.localize(html, "p").await.changed());
        let again = localizer.localize(html, "p").await;
        assert!(!again.changed());
        assert_eq!(again.images[0].result, WriteResult::Unchanged);
    }

    #[test]
    fn rewrites_longest_url_first() {
        let mut mapping = BTreeMap::new();
        mapping.insert("https://c/a.png".to_string(), "/images/wp/short.png".to_string());
        mapping.insert(
            "https://c/a.png?w=300".to_string(),
            "/images/wp/long.png".to_string(),
        );
        let body = "![](https://c/a.png?w=300) and ![](https://c/a.png) and https://c/a.png";
        assert_eq!(
            rewrite_urls(body, &mapping),
            "![](/images/wp/long.png) and ![](/images/wp/short.png) and /images/wp/short.png"
        );
    }

    #[test]
    fn relative_source_only_rewrites_link_targets() {
        let mut mapping = BTreeMap::new();
        mapping.insert("a.png".to_string(), "/images/wp/p-1.png".to_string());
        let body = "![](a.png) ![x](a.png \"t\") [data](https://other.example/data.png) a.png";
        assert_eq!(
            rewrite_urls(body, &mapping),
            "![](/images/wp/p-1.png) ![x](/images/wp/p-1.png \"t\") [data](https://other.example/data.png) a.png"
        );
    }
}
