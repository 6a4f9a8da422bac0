//! Source adapter contract.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// A record as returned by a source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArticle {
    pub source_id: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fetches the records a source published since a point in time.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(
        &self,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawArticle>, FetchError>;
}
