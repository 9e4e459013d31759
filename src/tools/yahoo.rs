//! Yahoo Finance news search

use super::SearchTool;
use crate::config::SearchConfig;
use crate::error::CollaboratorError;
use crate::models::Article;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

const COLLABORATOR: &str = "yahoo finance news";
const DEFAULT_SOURCE: &str = "Yahoo Finance News";

#[derive(Clone)]
pub struct YahooFinanceNews {
    client: Client,
    base_url: String,
    max_results: usize,
}

impl YahooFinanceNews {
    pub fn new(config: &SearchConfig, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; stock-research/0.1)")
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/v1/finance/search", self.base_url)
    }
}

#[async_trait]
impl SearchTool for YahooFinanceNews {
    fn name(&self) -> &'static str {
        COLLABORATOR
    }

    async fn search(&self, query: &str) -> Result<Vec<Article>, CollaboratorError> {
        let url = self.search_url();
        let news_count = self.max_results.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("newsCount", news_count.as_str()),
                ("quotesCount", "0"),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Yahoo Finance request failed: {}", e);
                CollaboratorError::unavailable(COLLABORATOR, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("{} returned {}: {}", url, status, body),
            ));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::malformed(COLLABORATOR, format!("invalid search body: {}", e)))?;

        let articles: Vec<Article> = parsed
            .news
            .into_iter()
            .take(self.max_results)
            .filter_map(NewsItem::into_article)
            .collect();

        debug!(query = %query, results = articles.len(), "Yahoo Finance news search");
        Ok(articles)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    provider_publish_time: Option<i64>,
    #[serde(default)]
    related_tickers: Vec<String>,
}

impl NewsItem {
    fn into_article(self) -> Option<Article> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let publisher = self.publisher.as_deref().unwrap_or("Unknown publisher");
        let published = self
            .provider_publish_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|ts| ts.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "undated".to_string());

        let mut content = format!("{} ({}): {}", publisher, published, title);
        if !self.related_tickers.is_empty() {
            content.push_str(&format!(" [{}]", self.related_tickers.join(", ")));
        }
        if let Some(link) = &self.link {
            content.push_str(&format!(" <{}>", link));
        }

        let source = self
            .link
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        Some(Article::new(title, content, source))
    }
}
