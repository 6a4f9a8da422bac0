//! Post-stage consistency checks. A failure here means a logic defect, and the run fails.
use std::collections::{HashMap, HashSet};

use crate::error::InvariantViolation;

use super::{
    normalize::Article,
    rank::{RankedSegment, compare_rank_keys, rank_keys},
    run::{PipelineRun, PipelineStage},
    segment::{ScoredArticle, Segment},
};

/// No two articles share a dedup key or an id.
///
/// # Errors
/// Returns [`InvariantViolation`] naming the first repeated key.
pub fn check_unique_keys(articles: &[Article]) -> Result<(), InvariantViolation> {
    let mut keys = HashSet::with_capacity(articles.len());
    let mut ids = HashSet::with_capacity(articles.len());
    for article in articles {
        if !keys.insert(article.raw_hash.as_str()) {
            return Err(InvariantViolation::new(
                "unique_dedup_keys",
                format!("dedup key {} appears more than once", article.raw_hash),
            ));
        }
        if !ids.insert(article.id.as_str()) {
            return Err(InvariantViolation::new(
                "unique_article_ids",
                format!("article id {} appears more than once", article.id),
            ));
        }
    }
    Ok(())
}

/// Each ranked segment is within its cap, sorted, and only references deduplicated articles.
///
/// # Errors
/// Returns [`InvariantViolation`] for the first segment that breaks a rule.
pub fn check_ranking(
    ranked: &RankedSegment,
    segment: &Segment,
    articles: &HashMap<&str, &Article>,
    source_priority: &HashMap<String, usize>,
) -> Result<(), InvariantViolation> {
    if ranked.entries.len() > segment.max_articles.get() {
        return Err(InvariantViolation::new(
            "ranking_cap",
            format!(
                "segment {} has {} entries, cap is {}",
                ranked.segment_name,
                ranked.entries.len(),
                segment.max_articles
            ),
        ));
    }

    if let Some(missing) = ranked.article_ids().find(|id| !articles.contains_key(id)) {
        return Err(InvariantViolation::new(
            "ranking_membership",
            format!(
                "segment {} references article {missing} that did not pass dedup",
                ranked.segment_name
            ),
        ));
    }

    let scored: Vec<ScoredArticle> = ranked
        .entries
        .iter()
        .map(|entry| ScoredArticle {
            article_id: entry.article_id.clone(),
            segment_name: ranked.segment_name.clone(),
            score: entry.score,
        })
        .collect();
    let keys = rank_keys(&scored, articles, source_priority);
    if let Some(position) = keys
        .windows(2)
        .position(|pair| compare_rank_keys(&pair[0], &pair[1]).is_gt())
    {
        return Err(InvariantViolation::new(
            "ranking_order",
            format!(
                "segment {} is out of order at position {position}",
                ranked.segment_name
            ),
        ));
    }

    Ok(())
}

/// Every stage the run's command executes, other than the final persist, has finished.
///
/// # Errors
/// Returns [`InvariantViolation`] listing the stages that never finished.
pub fn check_stage_coverage(run: &PipelineRun) -> Result<(), InvariantViolation> {
    let unfinished: Vec<&str> = run
        .command
        .stages()
        .iter()
        .filter(|stage| **stage != PipelineStage::Persist)
        .filter(|stage| {
            run.stage(**stage)
                .is_none_or(|record| record.finished_at.is_none())
        })
        .map(|stage| stage.as_str())
        .collect();
    if unfinished.is_empty() {
        return Ok(());
    }
    Err(InvariantViolation::new(
        "stage_coverage",
        format!(
            "{:?} run ended without finishing {}",
            run.command,
            unfinished.join(", ")
        ),
    ))
}
