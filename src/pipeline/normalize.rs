use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::{
    clients::source::RawArticle,
    error::NormalizationError,
    util::text::{collapse_whitespace, hash_text},
};

/// Wide enough that html2text never wraps a paragraph.
const HTML_RENDER_WIDTH: usize = 10_000;

/// A canonical article. `id` is the dedup key and equals `raw_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub source: String,
    pub title: String,
    pub body: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub raw_hash: String,
}

/// A record the normalizer skipped, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub source_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedCorpus {
    pub articles: Vec<Article>,
    pub rejected: Vec<RejectedRecord>,
}

/// Lower-cased, NFC, whitespace-collapsed title used for key derivation only.
#[must_use]
pub fn title_key(title: &str) -> String {
    collapse_whitespace(&title.nfc().collect::<String>().to_lowercase())
}

#[must_use]
pub fn url_key(url: &str) -> String {
    url.trim().to_lowercase()
}

/// Stable dedup key over the normalized title and URL.
#[must_use]
pub fn dedup_key(title: &str, url: &str) -> String {
    let material = format!("{}\n{}", title_key(title), url_key(url));
    format!("{:016x}", hash_text(&material))
}

/// Canonicalizes one raw record.
///
/// `fallback_published_at` is used when the source gave no publication time.
///
/// # Errors
/// Returns [`NormalizationError`] when the title or URL is missing, or the URL is not http(s).
pub fn normalize(
    raw: &RawArticle,
    fallback_published_at: DateTime<Utc>,
) -> Result<Article, NormalizationError> {
    let title = required(raw, raw.title.as_deref(), "title")?;
    let url = required(raw, raw.url.as_deref(), "url")?;

    let valid_url = Url::parse(url)
        .ok()
        .filter(|parsed| matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some());
    if valid_url.is_none() {
        return Err(NormalizationError::InvalidUrl {
            source_id: raw.source_id.clone(),
            url: url.to_string(),
        });
    }

    let raw_hash = dedup_key(title, url);
    Ok(Article {
        id: raw_hash.clone(),
        source: raw.source_id.clone(),
        title: collapse_whitespace(title),
        body: raw.body.as_deref().map(strip_markup).unwrap_or_default(),
        url: url.to_string(),
        published_at: raw.published_at.unwrap_or(fallback_published_at),
        raw_hash,
    })
}

/// Normalizes every record, skipping (and recording) the ones that fail.
#[must_use]
pub fn normalize_all(raw: &[RawArticle], fallback_published_at: DateTime<Utc>) -> NormalizedCorpus {
    let mut articles = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for record in raw {
        match normalize(record, fallback_published_at) {
            Ok(article) => articles.push(article),
            Err(error) => {
                debug!(source_id = %record.source_id, error = %error, "skipping record");
                rejected.push(RejectedRecord {
                    source_id: record.source_id.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    NormalizedCorpus { articles, rejected }
}

fn required<'a>(
    raw: &RawArticle,
    value: Option<&'a str>,
    field: &'static str,
) -> Result<&'a str, NormalizationError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| NormalizationError::MissingField {
            source_id: raw.source_id.clone(),
            field,
        })
}

fn strip_markup(body: &str) -> String {
    if !(body.contains('<') && body.contains('>')) {
        return collapse_whitespace(body);
    }
    let text = html2text::from_read(body.as_bytes(), HTML_RENDER_WIDTH)
        .unwrap_or_else(|_| body.to_string());
    collapse_whitespace(&text)
}
