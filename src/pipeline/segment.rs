//! Weighted-term segment scoring.
//!
//! Text and terms are folded the same way (NFC, lowercase, collapsed whitespace) before
//! matching, so matching is Unicode case-insensitive. Matches must sit on word boundaries and
//! overlapping matches of different terms each count.
use std::num::NonZeroUsize;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, SegmentConfig, fold_term};

use super::normalize::Article;

/// A segment as used by one run. Terms are kept in sorted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub display_name: String,
    pub focus: String,
    pub max_articles: NonZeroUsize,
    pub terms: Vec<(String, f64)>,
}

impl Segment {
    #[must_use]
    pub fn from_config(config: &SegmentConfig, default_max_articles: NonZeroUsize) -> Self {
        let mut terms: Vec<(String, f64)> = config
            .terms
            .iter()
            .map(|(term, weight)| (fold_term(term), *weight))
            .collect();
        terms.sort_by(|left, right| left.0.cmp(&right.0));

        Self {
            name: config.name.clone(),
            display_name: config.display_name().to_string(),
            focus: config.focus().to_string(),
            max_articles: config.max_articles.unwrap_or(default_max_articles),
            terms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredArticle {
    pub article_id: String,
    pub segment_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentScores {
    pub segment_name: String,
    pub scored: Vec<ScoredArticle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub segments: Vec<SegmentScores>,
    /// Articles that passed the relevance gate but qualified for no segment.
    pub unassigned: Vec<String>,
    /// Articles that matched no relevance term and were never scored.
    pub gated: Vec<String>,
}

impl SegmentationResult {
    #[must_use]
    pub fn scores_for(&self, segment_name: &str) -> &[ScoredArticle] {
        self.segments
            .iter()
            .find(|segment| segment.segment_name == segment_name)
            .map(|segment| segment.scored.as_slice())
            .unwrap_or_default()
    }
}

/// Whole-word, overlapping, per-pattern match counter over folded text.
#[derive(Debug, Clone)]
struct TermMatcher {
    automaton: AhoCorasick,
    pattern_count: usize,
}

impl TermMatcher {
    fn new<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = terms.into_iter().map(|t| t.as_ref().to_string()).collect();
        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .context("failed to build term matcher")?;
        Ok(Self {
            automaton,
            pattern_count: patterns.len(),
        })
    }

    /// Count of whole-word occurrences of each pattern in `folded`.
    fn counts(&self, folded: &str) -> Vec<usize> {
        let mut counts = vec![0; self.pattern_count];
        for found in self.automaton.find_overlapping_iter(folded) {
            if is_word_bounded(folded, found.start(), found.end()) {
                counts[found.pattern().as_usize()] += 1;
            }
        }
        counts
    }

    fn matches_any(&self, folded: &str) -> bool {
        self.automaton
            .find_overlapping_iter(folded)
            .any(|found| is_word_bounded(folded, found.start(), found.end()))
    }
}

fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
}

#[derive(Debug, Clone)]
struct CompiledSegment {
    segment: Segment,
    matcher: TermMatcher,
}

/// Scores every article against every segment. Pure: same inputs, same scores.
#[derive(Debug, Clone)]
pub struct SegmentScorer {
    segments: Vec<CompiledSegment>,
    relevance: Option<TermMatcher>,
    title_boost: f64,
    threshold: f64,
}

impl SegmentScorer {
    /// # Errors
    /// Returns an error when a term automaton cannot be built.
    pub fn new(
        segments: Vec<Segment>,
        relevance_terms: &[String],
        title_boost: f64,
        threshold: f64,
    ) -> Result<Self> {
        let segments = segments
            .into_iter()
            .map(|segment| -> Result<CompiledSegment> {
                let matcher = TermMatcher::new(segment.terms.iter().map(|(term, _)| term))?;
                Ok(CompiledSegment { segment, matcher })
            })
            .collect::<Result<Vec<_>>>()?;

        let relevance = if relevance_terms.is_empty() {
            None
        } else {
            Some(TermMatcher::new(relevance_terms.iter().map(|term| fold_term(term)))?)
        };

        Ok(Self {
            segments,
            relevance,
            title_boost,
            threshold,
        })
    }

    /// # Errors
    /// Returns an error when a term automaton cannot be built.
    pub fn from_catalog(
        catalog: &Catalog,
        default_max_articles: NonZeroUsize,
        title_boost: f64,
        threshold: f64,
    ) -> Result<Self> {
        let segments = catalog
            .segments
            .iter()
            .map(|config| Segment::from_config(config, default_max_articles))
            .collect();
        Self::new(segments, &catalog.relevance_terms, title_boost, threshold)
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().map(|compiled| &compiled.segment)
    }

    /// Relevance of `article` to the segment called `segment_name`, or `None` for an unknown segment.
    #[must_use]
    pub fn score(&self, article: &Article, segment_name: &str) -> Option<f64> {
        let compiled = self
            .segments
            .iter()
            .find(|compiled| compiled.segment.name == segment_name)?;
        Some(self.score_folded(
            compiled,
            &fold_term(&article.title),
            &fold_term(&article.body),
        ))
    }

    #[must_use]
    pub fn is_relevant(&self, article: &Article) -> bool {
        self.relevance.as_ref().is_none_or(|matcher| {
            matcher.matches_any(&fold_term(&article.title))
                || matcher.matches_any(&fold_term(&article.body))
        })
    }

    /// Scores `articles` against every segment and keeps the qualifying pairs.
    #[must_use]
    pub fn score_all(&self, articles: &[Article]) -> SegmentationResult {
        let mut segments: Vec<SegmentScores> = self
            .segments
            .iter()
            .map(|compiled| SegmentScores {
                segment_name: compiled.segment.name.clone(),
                scored: Vec::new(),
            })
            .collect();
        let mut unassigned = Vec::new();
        let mut gated = Vec::new();

        for article in articles {
            if !self.is_relevant(article) {
                gated.push(article.id.clone());
                continue;
            }

            let title = fold_term(&article.title);
            let body = fold_term(&article.body);
            let mut qualified = false;
            for (compiled, scores) in self.segments.iter().zip(segments.iter_mut()) {
                let score = self.score_folded(compiled, &title, &body);
                if score > self.threshold {
                    qualified = true;
                    scores.scored.push(ScoredArticle {
                        article_id: article.id.clone(),
                        segment_name: compiled.segment.name.clone(),
                        score,
                    });
                }
            }
            if !qualified {
                unassigned.push(article.id.clone());
            }
        }

        SegmentationResult {
            segments,
            unassigned,
            gated,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn score_folded(&self, compiled: &CompiledSegment, title: &str, body: &str) -> f64 {
        let title_counts = compiled.matcher.counts(title);
        let body_counts = compiled.matcher.counts(body);

        compiled
            .segment
            .terms
            .iter()
            .zip(title_counts.iter().zip(body_counts.iter()))
            .map(|((_, weight), (title_count, body_count))| {
                weight * (*body_count as f64 + self.title_boost * *title_count as f64)
            })
            .sum()
    }
}
