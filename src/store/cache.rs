//! Bulletin text cache keyed by a segment's ranked article set.
//!
//! Unlike run artifacts, cache entries are overwritten freely and expire after a TTL.
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::util::text::hash_text;

use super::ArtifactStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBulletin {
    pub key: String,
    pub segment_name: String,
    pub content: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedBulletin {
    /// Whether the entry is younger than `ttl` at `now`.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .is_none_or(|expires_at| now < expires_at)
    }
}

/// Key over the segment, its focus and the set of ranked article ids. Id order is ignored.
#[must_use]
pub fn generation_cache_key<'a>(
    segment_name: &str,
    focus: &str,
    article_ids: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut ids: Vec<&str> = article_ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    let material = format!("{segment_name}\n{focus}\n{}", ids.join("\n"));
    format!("{:016x}", hash_text(&material))
}

#[async_trait]
pub trait GenerationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedBulletin>, ArtifactStoreError>;

    /// Stores `entry`, replacing any previous entry under the same key.
    async fn put(&self, entry: &CachedBulletin) -> Result<(), ArtifactStoreError>;
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FsGenerationCache {
    dir: PathBuf,
}

impl FsGenerationCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl GenerationCache for FsGenerationCache {
    async fn get(&self, key: &str) -> Result<Option<CachedBulletin>, ArtifactStoreError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io(&path, source)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn put(&self, entry: &CachedBulletin) -> Result<(), ArtifactStoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| io(&self.dir, source))?;

        let path = self.entry_path(&entry.key);
        let temp_path = self
            .dir
            .join(format!(".{}.{}.tmp", entry.key, Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(entry)?;
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|source| io(&temp_path, source))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|source| io(&path, source))?;

        debug!(key = %entry.key, path = %path.display(), "cached bulletin text");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryGenerationCache {
    entries: RwLock<HashMap<String, CachedBulletin>>,
}

impl MemoryGenerationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl GenerationCache for MemoryGenerationCache {
    async fn get(&self, key: &str) -> Result<Option<CachedBulletin>, ArtifactStoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: &CachedBulletin) -> Result<(), ArtifactStoreError> {
        self.entries
            .write()
            .await
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }
}

fn io(path: &Path, source: std::io::Error) -> ArtifactStoreError {
    ArtifactStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(key: &str, content: &str) -> CachedBulletin {
        CachedBulletin {
            key: key.into(),
            segment_name: "tech".into(),
            content: content.into(),
            cached_at: Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn key_ignores_id_order_but_not_membership() {
        let key = generation_cache_key("tech", "ia", ["b", "a"]);
        assert_eq!(key, generation_cache_key("tech", "ia", ["a", "b"]));
        assert_ne!(key, generation_cache_key("tech", "ia", ["a", "c"]));
        assert_ne!(key, generation_cache_key("rh", "ia", ["a", "b"]));
        assert_ne!(key, generation_cache_key("tech", "startups", ["a", "b"]));
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn freshness_follows_ttl() {
        let cached = entry("k", "texto");
        let ttl = Duration::from_secs(24 * 3_600);

        assert!(cached.is_fresh(ttl, cached.cached_at + TimeDelta::hours(23)));
        assert!(!cached.is_fresh(ttl, cached.cached_at + TimeDelta::hours(24)));
        assert!(cached.is_fresh(Duration::MAX, cached.cached_at + TimeDelta::days(9_999)));
    }

    #[tokio::test]
    async fn fs_cache_round_trips_and_overwrites() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = FsGenerationCache::new(dir.path().join("cache"));

        assert_eq!(cache.get("abc").await.expect("lookup"), None);

        cache.put(&entry("abc", "primeiro")).await.expect("put");
        cache.put(&entry("abc", "segundo")).await.expect("overwrite");

        let stored = cache.get("abc").await.expect("lookup").expect("hit");
        assert_eq!(stored.content, "segundo");

        let leftovers = std::fs::read_dir(dir.path().join("cache"))
            .expect("cache dir")
            .filter_map(Result::ok)
            .filter(|file| file.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn fs_cache_reports_corrupt_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = FsGenerationCache::new(dir.path());
        std::fs::write(cache.entry_path("bad"), b"{not json").expect("write");

        assert!(matches!(
            cache.get("bad").await,
            Err(ArtifactStoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn memory_cache_keeps_latest_entry() {
        let cache = MemoryGenerationCache::new();
        assert!(cache.is_empty().await);

        cache.put(&entry("k", "a")).await.expect("put");
        cache.put(&entry("k", "b")).await.expect("put");

        assert_eq!(cache.len().await, 1);
        assert_eq!(
            cache.get("k").await.expect("lookup").map(|hit| hit.content),
            Some("b".to_string())
        );
    }
}
