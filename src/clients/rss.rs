//! RSS/Atom source adapter.
//!
//! Each catalog source may list several feeds; the source fails only when every feed fails.
use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, warn};

use crate::{
    catalog::SourceConfig,
    error::FetchError,
    util::retry::is_retryable_error,
};

use super::source::{RawArticle, SourceAdapter};

#[derive(Debug, Clone)]
pub struct RssSourceAdapter {
    client: Client,
    feeds: HashMap<String, Vec<String>>,
}

impl RssSourceAdapter {
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(sources: &[SourceConfig], request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .user_agent(concat!("bulletin-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build feed HTTP client")?;

        let feeds = sources
            .iter()
            .map(|source| (source.id.clone(), source.feeds.clone()))
            .collect();

        Ok(Self { client, feeds })
    }

    async fn fetch_feed(
        &self,
        source_id: &str,
        feed_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawArticle>, FetchError> {
        let response = self
            .client
            .get(feed_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| transport_error(feed_url, &error))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|error| transport_error(feed_url, &error))?;

        let feed = feed_rs::parser::parse(&bytes[..]).map_err(|error| FetchError::Parse {
            target: feed_url.to_string(),
            message: error.to_string(),
        })?;

        let articles: Vec<RawArticle> = feed
            .entries
            .into_iter()
            .map(|entry| RawArticle {
                source_id: source_id.to_string(),
                title: entry.title.map(|text| text.content),
                body: entry
                    .content
                    .and_then(|content| content.body)
                    .or_else(|| entry.summary.map(|text| text.content)),
                url: entry.links.into_iter().next().map(|link| link.href),
                published_at: entry.published.or(entry.updated),
            })
            .filter(|article| article.published_at.is_none_or(|at| at >= since))
            .collect();

        debug!(source_id, feed_url, count = articles.len(), "parsed feed");
        Ok(articles)
    }
}

#[async_trait]
impl SourceAdapter for RssSourceAdapter {
    async fn fetch(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawArticle>, FetchError> {
        let feeds = self
            .feeds
            .get(source_id)
            .filter(|feeds| !feeds.is_empty())
            .ok_or_else(|| FetchError::UnknownSource(source_id.to_string()))?;

        let mut articles = Vec::new();
        let mut errors = Vec::new();
        for feed_url in feeds {
            match self.fetch_feed(source_id, feed_url, since).await {
                Ok(mut fetched) => articles.append(&mut fetched),
                Err(error) => {
                    warn!(source_id, feed_url, error = %error, "feed fetch failed");
                    errors.push(error);
                }
            }
        }

        if errors.len() == feeds.len() {
            // Surface a retryable error when any feed might recover on retry.
            let position = errors.iter().position(FetchError::is_retryable).unwrap_or(0);
            return Err(errors.swap_remove(position));
        }

        Ok(articles)
    }
}

fn transport_error(feed_url: &str, error: &reqwest::Error) -> FetchError {
    let target = feed_url.to_string();
    let message = error.to_string();
    if is_retryable_error(error) {
        FetchError::Transient { target, message }
    } else {
        FetchError::Permanent { target, message }
    }
}
