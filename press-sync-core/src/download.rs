//! HTTP side of the pipeline: the reqwest-backed [`SourceClient`] and the
//! pagination loop shared by the taxonomy and post endpoints.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::contract::SourceClient;
use crate::error::{FetchError, SyncError};

/// Production [`SourceClient`]: one reqwest client with a per-request timeout.
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("press-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        info!(timeout_secs = timeout.as_secs(), "Initialized HTTP source client");
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Non-success HTTP status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url = %url, "Fetching JSON");
        let response = self.get(url).await?;
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!(url = %url, "Fetching bytes");
        let response = self.get(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(url, e))?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyPayload {
                url: url.to_string(),
            });
        }
        Ok(bytes.to_vec())
    }
}

/// Build the URL for page `page` of a collection endpoint.
///
/// Existing query parameters are preserved in order; `per_page` and `page`
/// are replaced and appended last.
pub fn paged_url(endpoint: &str, per_page: u32, page: u32) -> Result<String, SyncError> {
    let mut url =
        url::Url::parse(endpoint).map_err(|e| SyncError::source_unavailable(endpoint, e))?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "per_page" && k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("per_page", &per_page.to_string())
        .append_pair("page", &page.to_string());
    Ok(url.to_string())
}

/// Fetch every page of a WordPress collection endpoint.
///
/// Stops on an empty page, a short page, a page of already-seen ids, or an
/// HTTP 400 past the first page (WordPress answers `rest_post_invalid_page_number`).
/// Any other failure is [`SyncError::SourceUnavailable`].
pub async fn fetch_all_pages<S>(
    source: &S,
    endpoint: &str,
    per_page: u32,
) -> Result<Vec<Value>, SyncError>
where
    S: SourceClient + ?Sized,
{
    let mut records = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut page = 1;

    loop {
        let url = paged_url(endpoint, per_page, page)?;
        debug!(url = %url, page, "Fetching collection page");
        let body = match source.fetch_json(&url).await {
            Ok(body) => body,
            Err(FetchError::Status { status: 400, .. }) if page > 1 => {
                debug!(url = %url, page, "Page past the end of the collection");
                break;
            }
            Err(e) => {
                error!(url = %url, error = %e, "Failed to fetch collection page");
                return Err(SyncError::source_unavailable(endpoint, e));
            }
        };

        let items = match body {
            Value::Array(items) => items,
            other => {
                error!(url = %url, "Collection page is not a JSON array");
                return Err(SyncError::source_unavailable(
                    endpoint,
                    format!("expected a JSON array, got {}", json_kind(&other)),
                ));
            }
        };

        let count = items.len();
        let mut new_items = 0;
        for item in items {
            let id = item.get("id").map(|v| v.to_string()).unwrap_or_default();
            if id.is_empty() || seen_ids.insert(id) {
                new_items += 1;
                records.push(item);
            }
        }

        if count == 0 || new_items == 0 || count < per_page as usize {
            break;
        }
        page += 1;
    }

    info!(endpoint = %endpoint, records = records.len(), pages = page, "Fetched collection");
    Ok(records)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
