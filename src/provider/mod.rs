// src/provider/mod.rs
pub mod newsapi;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamProviderError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSource {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Article as reported by the upstream provider (NewsAPI field names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: ArticleSource,
}

/// Upstream feed of raw articles keyed by source id. No ordering or
/// completeness guarantee: callers must cope with missing sources.
#[async_trait]
pub trait ArticleProvider: Send + Sync {
    async fn fetch_articles_for_sources(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<RawArticle>, UpstreamProviderError>;
    fn name(&self) -> &'static str;
}

/// Serves a fixed article list, filtered to the requested source ids.
/// Counts calls so callers can observe caching.
pub struct FixtureProvider {
    articles: Vec<RawArticle>,
    filter_by_source: bool,
    calls: AtomicUsize,
}

impl FixtureProvider {
    pub fn new(articles: Vec<RawArticle>) -> Self {
        Self {
            articles,
            filter_by_source: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Parse a JSON array of articles (same shape as the NewsAPI `articles` field).
    pub fn from_fixture(json: &str) -> anyhow::Result<Self> {
        let articles: Vec<RawArticle> = serde_json::from_str(json)?;
        Ok(Self::new(articles))
    }

    /// Return every article regardless of the ids requested.
    pub fn unfiltered(mut self) -> Self {
        self.filter_by_source = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArticleProvider for FixtureProvider {
    async fn fetch_articles_for_sources(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<RawArticle>, UpstreamProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.filter_by_source {
            return Ok(self.articles.clone());
        }
        let wanted: HashSet<&str> = source_ids.iter().map(String::as_str).collect();
        Ok(self
            .articles
            .iter()
            .filter(|a| a.source.id.as_deref().is_some_and(|id| wanted.contains(id)))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
