//! Category taxonomy: fetch once per run, look up by id.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{info, warn};

use crate::contract::SourceClient;
use crate::download::fetch_all_pages;
use crate::error::SyncError;
use crate::markdown::decode_html_text;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// Immutable id → name lookup built from the taxonomy endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMap {
    names: HashMap<u64, String>,
}

impl CategoryMap {
    pub fn from_categories(categories: impl IntoIterator<Item = Category>) -> Self {
        Self {
            names: categories.into_iter().map(|c| (c.id, c.name)).collect(),
        }
    }

    pub fn get(&self, id: u64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Name for `id`, or `fallback` when the id is unknown.
    pub fn label<'a>(&'a self, id: u64, fallback: &'a str) -> &'a str {
        match self.get(id) {
            Some(name) => name,
            None => {
                warn!(category_id = id, fallback, "Unknown category id, using fallback label");
                fallback
            }
        }
    }

    /// Labels for `ids` in order, falling back for misses.
    pub fn labels(&self, ids: &[u64], fallback: &str) -> Vec<String> {
        ids.iter()
            .map(|id| self.label(*id, fallback).to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Fetches the category taxonomy.
pub struct CategoryResolver<'a, S: SourceClient + ?Sized> {
    source: &'a S,
    endpoint: &'a str,
    page_size: u32,
}

impl<'a, S: SourceClient + ?Sized> CategoryResolver<'a, S> {
    pub fn new(source: &'a S, endpoint: &'a str, page_size: u32) -> Self {
        Self {
            source,
            endpoint,
            page_size,
        }
    }

    /// Fetch all categories. Any failure is fatal to the run.
    pub async fn resolve(&self) -> Result<CategoryMap, SyncError> {
        let records = fetch_all_pages(self.source, self.endpoint, self.page_size).await?;
        let mut categories = Vec::with_capacity(records.len());
        for record in records {
            let category: Category = serde_json::from_value(record).map_err(|e| {
                SyncError::source_unavailable(self.endpoint, format!("malformed category: {e}"))
            })?;
            categories.push(Category {
                id: category.id,
                name: decode_html_text(&category.name),
            });
        }
        info!(count = categories.len(), "Resolved categories");
        Ok(CategoryMap::from_categories(categories))
    }
}
