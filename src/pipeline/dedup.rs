use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::util::text::is_near_duplicate;

use super::normalize::{Article, title_key};

/// Character window for near-duplicate title comparison.
const TITLE_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub dropped_id: String,
    pub dropped_source: String,
    pub kept_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub articles: Vec<Article>,
    pub duplicates: Vec<DuplicateRecord>,
}

impl DedupOutcome {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.duplicates.len()
    }
}

/// Collapses articles that share a dedup key, keeping the earliest published report.
///
/// Ties on `published_at` keep input order. With `title_similarity` set, an article whose
/// normalized title is a near duplicate of an already kept one is dropped as well.
#[must_use]
pub fn dedupe(mut articles: Vec<Article>, title_similarity: Option<f64>) -> DedupOutcome {
    articles.sort_by_key(|article| article.published_at);

    let mut seen: HashSet<String> = HashSet::with_capacity(articles.len());
    let mut kept: Vec<Article> = Vec::with_capacity(articles.len());
    let mut kept_titles: Vec<String> = Vec::new();
    let mut duplicates = Vec::new();

    for article in articles {
        if seen.contains(&article.raw_hash) {
            let kept_id = article.raw_hash.clone();
            duplicates.push(DuplicateRecord {
                dropped_id: article.id,
                dropped_source: article.source,
                kept_id,
            });
            continue;
        }

        let normalized_title = title_key(&article.title);
        if let Some(threshold) = title_similarity {
            let similar = kept_titles
                .iter()
                .position(|title| is_near_duplicate(title, &normalized_title, TITLE_WINDOW, threshold));
            if let Some(index) = similar {
                duplicates.push(DuplicateRecord {
                    dropped_id: article.id,
                    dropped_source: article.source,
                    kept_id: kept[index].id.clone(),
                });
                continue;
            }
        }

        seen.insert(article.raw_hash.clone());
        kept_titles.push(normalized_title);
        kept.push(article);
    }

    DedupOutcome {
        articles: kept,
        duplicates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::dedup_key;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
    }

    fn article(source: &str, title: &str, url: &str, published_at: DateTime<Utc>) -> Article {
        let key = dedup_key(title, url);
        Article {
            id: key.clone(),
            source: source.into(),
            title: title.into(),
            body: String::new(),
            url: url.into(),
            published_at,
            raw_hash: key,
        }
    }

    #[test]
    fn identical_title_and_url_keeps_earliest_report() {
        let later = article("g1", "Nova lei de IA", "https://x.com/lei", at(14, 9));
        let earlier = article("uol", "NOVA LEI DE IA", "https://X.com/lei", at(12, 9));

        let outcome = dedupe(vec![later, earlier.clone()], None);

        assert_eq!(outcome.articles, vec![earlier]);
        assert_eq!(outcome.removed(), 1);
        assert_eq!(outcome.duplicates[0].dropped_source, "g1");
    }

    #[test]
    fn equal_timestamps_keep_input_order() {
        let first = article("g1", "Mesmo título", "https://x.com/1", at(12, 9));
        let second = article("uol", "Mesmo título", "https://x.com/1", at(12, 9));

        let outcome = dedupe(vec![first.clone(), second], None);

        assert_eq!(outcome.articles.len(), 1);
        assert_eq!(outcome.articles[0].source, first.source);
    }

    #[test]
    fn output_is_sorted_by_publication() {
        let a = article("g1", "A", "https://x.com/a", at(15, 0));
        let b = article("g1", "B", "https://x.com/b", at(10, 0));
        let c = article("g1", "C", "https://x.com/c", at(12, 0));

        let outcome = dedupe(vec![a, b, c], None);
        let titles: Vec<&str> = outcome.articles.iter().map(|a| a.title.as_str()).collect();

        assert_eq!(titles, vec!["B", "C", "A"]);
        assert!(outcome.duplicates.is_empty());
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![
            article("g1", "Governo anuncia plano de IA", "https://x.com/1", at(12, 9)),
            article("uol", "Governo anuncia plano de IA", "https://x.com/1", at(11, 9)),
            article("uol", "Governo anuncia plano de IA!", "https://y.com/1", at(13, 9)),
            article("gizmodo-br", "Outro assunto", "https://z.com/2", at(13, 9)),
        ];

        for similarity in [None, Some(0.8)] {
            let once = dedupe(input.clone(), similarity);
            let twice = dedupe(once.articles.clone(), similarity);
            assert_eq!(twice.articles, once.articles);
            assert!(twice.duplicates.is_empty());
        }
    }

    #[test]
    fn near_duplicate_titles_fold_only_when_enabled() {
        let original = article("g1", "Governo anuncia novo plano de IA", "https://x.com/1", at(12, 9));
        let echo = article("uol", "Governo anuncia novo plano de IA!", "https://y.com/9", at(13, 9));

        let exact = dedupe(vec![original.clone(), echo.clone()], None);
        assert_eq!(exact.articles.len(), 2);

        let folded = dedupe(vec![original.clone(), echo], Some(0.8));
        assert_eq!(folded.articles, vec![original.clone()]);
        assert_eq!(folded.duplicates[0].kept_id, original.id);
    }

    #[test]
    fn keys_are_unique_after_dedupe() {
        let input: Vec<Article> = (0..20)
            .map(|i| article("g1", &format!("Título {}", i % 5), &format!("https://x.com/{}", i % 5), at(10 + i % 3, 0)))
            .collect();

        let outcome = dedupe(input, None);
        let keys: HashSet<&str> = outcome.articles.iter().map(|a| a.raw_hash.as_str()).collect();

        assert_eq!(keys.len(), outcome.articles.len());
        assert_eq!(outcome.articles.len(), 5);
        assert_eq!(outcome.removed(), 15);
    }
}
