// src/provider/newsapi.rs
//! NewsAPI-compatible provider: `GET {base}/v2/top-headlines?sources=a,b,...`.
//! The upstream accepts at most 20 sources per request, so ids are batched.

use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;

use super::{ArticleProvider, RawArticle};
use crate::error::UpstreamProviderError;

pub const DEFAULT_BASE_URL: &str = "https://newsapi.org";
const MAX_SOURCES_PER_REQUEST: usize = 20;

#[derive(Debug, Deserialize)]
struct HeadlinesResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

pub struct NewsApiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl NewsApiProvider {
    pub fn new(
        base_url: &str,
        api_key: String,
        page_size: u32,
        timeout: Duration,
    ) -> Result<Self, UpstreamProviderError> {
        let http = reqwest::Client::builder()
            .user_agent("balanced-feed/0.1 (+github.com/lumlich/balanced-feed)")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: page_size.clamp(1, 100),
        })
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<RawArticle>, UpstreamProviderError> {
        let url = format!("{}/v2/top-headlines", self.base_url);
        let sources = ids.join(",");
        let page_size = self.page_size.to_string();

        let resp = self
            .http
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(&[("sources", sources.as_str()), ("pageSize", page_size.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(UpstreamProviderError::Status {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let body: HeadlinesResponse = resp.json().await?;
        if body.status != "ok" {
            return Err(UpstreamProviderError::Unavailable(
                body.message.unwrap_or_else(|| format!("status {}", body.status)),
            ));
        }
        Ok(body.articles)
    }
}

#[async_trait]
impl ArticleProvider for NewsApiProvider {
    async fn fetch_articles_for_sources(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<RawArticle>, UpstreamProviderError> {
        if self.api_key.is_empty() {
            return Err(UpstreamProviderError::Unavailable(
                "NEWS_API_KEY is not set".into(),
            ));
        }

        let t0 = std::time::Instant::now();
        let mut out = Vec::new();
        for batch in source_ids.chunks(MAX_SOURCES_PER_REQUEST) {
            match self.fetch_batch(batch).await {
                Ok(mut v) => out.append(&mut v),
                Err(e) => {
                    counter!("provider_errors_total", "provider" => "newsapi").increment(1);
                    return Err(e);
                }
            }
        }

        histogram!("provider_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("provider_articles_total").increment(out.len() as u64);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "newsapi"
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
