//! Preview search client
//!
//! Finds short streamable previews: environmental clips for the ambience
//! loop and the matched track for the closing playback. [`DeezerClient`]
//! talks to the public Deezer search API, which needs no key.

use crate::error::SearchError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = "Melo/0.1.0";

/// Remote search for preview URLs
#[async_trait]
pub trait PreviewSearch: Send + Sync {
    /// Up to `limit` environmental preview URLs for one keyword
    async fn ambience_previews(&self, keyword: &str, limit: usize) -> Result<Vec<String>, SearchError>;

    /// Preview URL of the best hit for a title/artist pair
    async fn track_preview(&self, title: &str, artist: &str) -> Result<Option<String>, SearchError>;
}

/// Deezer `/search` response (only the fields used)
#[derive(Debug, Clone, Deserialize)]
pub struct DeezerSearchResponse {
    #[serde(default)]
    pub data: Vec<DeezerTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeezerTrack {
    #[serde(default)]
    pub title: String,
    /// Empty or absent when the track has no preview
    #[serde(default)]
    pub preview: Option<String>,
}

impl DeezerTrack {
    fn preview_url(&self) -> Option<&str> {
        self.preview.as_deref().filter(|p| !p.trim().is_empty())
    }
}

pub fn ambience_query(keyword: &str) -> String {
    format!("{} ambient OR nature OR environment OR sound", keyword)
}

pub fn track_query(title: &str, artist: &str) -> String {
    format!("track:\"{}\" artist:\"{}\"", title, artist)
}

/// Keep previews whose title mentions `keyword`, in response order
pub fn filter_ambience(items: &[DeezerTrack], keyword: &str, limit: usize) -> Vec<String> {
    let keyword = keyword.to_lowercase();
    items
        .iter()
        .filter(|item| item.title.to_lowercase().contains(&keyword))
        .filter_map(|item| item.preview_url().map(str::to_string))
        .take(limit)
        .collect()
}

/// Deezer API client
pub struct DeezerClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl DeezerClient {
    /// Create a client against `base_url` (normally `https://api.deezer.com`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SearchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn search(&self, query: &str) -> Result<DeezerSearchResponse, SearchError> {
        let url = format!("{}/search", self.base_url);

        debug!(url = %url, query = %query, "Querying Deezer search");

        let response = self
            .http_client
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| SearchError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SearchError::ApiError(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl PreviewSearch for DeezerClient {
    async fn ambience_previews(&self, keyword: &str, limit: usize) -> Result<Vec<String>, SearchError> {
        let response = self.search(&ambience_query(keyword)).await?;
        Ok(filter_ambience(&response.data, keyword, limit))
    }

    async fn track_preview(&self, title: &str, artist: &str) -> Result<Option<String>, SearchError> {
        let response = self.search(&track_query(title, artist)).await?;
        Ok(response
            .data
            .first()
            .and_then(|item| item.preview_url())
            .map(str::to_string))
    }
}

/// Collect ambience URLs for every keyword
///
/// A keyword whose search fails is logged and skipped. Duplicate URLs are
/// dropped, keeping first-seen order.
pub async fn collect_ambience_urls(
    search: &dyn PreviewSearch,
    keywords: &[String],
    per_keyword: usize,
) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for keyword in keywords {
        match search.ambience_previews(keyword, per_keyword).await {
            Ok(found) => {
                debug!(keyword = %keyword, found = found.len(), "Ambience previews");
                for url in found {
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
            }
            Err(e) => warn!(keyword = %keyword, error = %e, "Ambience search failed"),
        }
    }
    urls
}
