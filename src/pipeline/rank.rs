use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{normalize::Article, segment::{ScoredArticle, Segment}};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub article_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSegment {
    pub segment_name: String,
    pub entries: Vec<RankedEntry>,
}

impl RankedSegment {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn article_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.article_id.as_str())
    }
}

/// Tie-break facts about one article.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RankKey<'a> {
    pub(crate) score: f64,
    pub(crate) published_at: DateTime<Utc>,
    pub(crate) source_rank: usize,
    pub(crate) article_id: &'a str,
}

/// Score desc, then newest first, then source priority, then id asc.
pub(crate) fn compare_rank_keys(left: &RankKey<'_>, right: &RankKey<'_>) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| right.published_at.cmp(&left.published_at))
        .then_with(|| left.source_rank.cmp(&right.source_rank))
        .then_with(|| left.article_id.cmp(right.article_id))
}

/// Builds rank keys, resolving each scored id against `articles`.
///
/// Sources missing from `source_priority` rank after every known source. Scored ids with no
/// matching article are skipped.
pub(crate) fn rank_keys<'a>(
    scored: &'a [ScoredArticle],
    articles: &HashMap<&str, &Article>,
    source_priority: &HashMap<String, usize>,
) -> Vec<RankKey<'a>> {
    scored
        .iter()
        .filter_map(|entry| {
            let article = articles.get(entry.article_id.as_str())?;
            Some(RankKey {
                score: entry.score,
                published_at: article.published_at,
                source_rank: source_priority
                    .get(&article.source)
                    .copied()
                    .unwrap_or(usize::MAX),
                article_id: entry.article_id.as_str(),
            })
        })
        .collect()
}

/// Orders a segment's scored articles and truncates to its cap. Pure.
#[must_use]
pub fn rank(
    segment: &Segment,
    scored: &[ScoredArticle],
    articles: &HashMap<&str, &Article>,
    source_priority: &HashMap<String, usize>,
) -> RankedSegment {
    let mut keys = rank_keys(scored, articles, source_priority);
    keys.sort_by(compare_rank_keys);
    keys.truncate(segment.max_articles.get());

    RankedSegment {
        segment_name: segment.name.clone(),
        entries: keys
            .into_iter()
            .map(|key| RankedEntry {
                article_id: key.article_id.to_string(),
                score: key.score,
            })
            .collect(),
    }
}

#[must_use]
pub fn index_articles(articles: &[Article]) -> HashMap<&str, &Article> {
    articles
        .iter()
        .map(|article| (article.id.as_str(), article))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::num::NonZeroUsize;

    fn segment(max: usize) -> Segment {
        Segment {
            name: "tech".into(),
            display_name: "Tech".into(),
            focus: "tech".into(),
            max_articles: NonZeroUsize::new(max).unwrap(),
            terms: vec![("startup".into(), 1.0)],
        }
    }

    fn article(id: &str, source: &str, day: u32) -> Article {
        Article {
            id: id.into(),
            source: source.into(),
            title: id.into(),
            body: String::new(),
            url: format!("https://x.com/{id}"),
            published_at: Utc.with_ymd_and_hms(2026, 10, day, 9, 0, 0).unwrap(),
            raw_hash: id.into(),
        }
    }

    fn scored(id: &str, score: f64) -> ScoredArticle {
        ScoredArticle {
            article_id: id.into(),
            segment_name: "tech".into(),
            score,
        }
    }

    fn priority() -> HashMap<String, usize> {
        HashMap::from([("g1".to_string(), 0), ("uol".to_string(), 1)])
    }

    #[test]
    fn rank_applies_full_tie_break_chain() {
        let articles = vec![
            article("low", "g1", 15),
            article("old", "g1", 10),
            article("new", "g1", 14),
            article("uol", "uol", 12),
            article("g1", "g1", 12),
            article("unknown", "blog", 12),
            article("b", "g1", 11),
            article("a", "g1", 11),
        ];
        let scores = vec![
            scored("low", 1.0),
            scored("old", 5.0),
            scored("new", 5.0),
            scored("uol", 3.0),
            scored("g1", 3.0),
            scored("unknown", 3.0),
            scored("b", 2.0),
            scored("a", 2.0),
        ];
        let index = index_articles(&articles);

        let ranked = rank(&segment(10), &scores, &index, &priority());
        let order: Vec<&str> = ranked.article_ids().collect();

        assert_eq!(order, vec!["new", "old", "g1", "uol", "unknown", "a", "b", "low"]);

        let keys = rank_keys(&scores, &index, &priority());
        let by_id: HashMap<&str, RankKey<'_>> = keys.iter().map(|key| (key.article_id, *key)).collect();
        for pair in order.windows(2) {
            let ordering = compare_rank_keys(&by_id[pair[0]], &by_id[pair[1]]);
            assert_eq!(ordering, Ordering::Less, "{} should precede {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn rank_truncates_to_cap() {
        let articles: Vec<Article> = (1..=9).map(|day| article(&format!("a{day}"), "g1", day)).collect();
        let scores: Vec<ScoredArticle> = articles.iter().map(|a| scored(&a.id, 1.0)).collect();

        let ranked = rank(&segment(3), &scores, &index_articles(&articles), &priority());

        assert_eq!(ranked.entries.len(), 3);
        assert_eq!(ranked.article_ids().collect::<Vec<_>>(), vec!["a9", "a8", "a7"]);
    }

    #[test]
    fn rank_is_independent_of_input_order() {
        let articles = vec![article("x", "g1", 12), article("y", "uol", 12), article("z", "g1", 13)];
        let mut scores = vec![scored("x", 2.0), scored("y", 2.0), scored("z", 2.0)];
        let index = index_articles(&articles);

        let forward = rank(&segment(5), &scores, &index, &priority());
        scores.reverse();
        let backward = rank(&segment(5), &scores, &index, &priority());

        assert_eq!(forward, backward);
    }

    #[test]
    fn empty_segment_ranks_empty() {
        let ranked = rank(&segment(5), &[], &HashMap::new(), &priority());
        assert!(ranked.is_empty());
        assert_eq!(ranked.segment_name, "tech");
    }
}
