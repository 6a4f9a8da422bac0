//! Text helpers: hashing, whitespace folding, near-duplicate detection.
use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;
use xxhash_rust::xxh3::xxh3_64;

/// XXH3 hash of the UTF-8 bytes.
#[must_use]
pub(crate) fn hash_text(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

/// Collapses every run of whitespace into a single space and trims the ends.
#[must_use]
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to at most `max` grapheme clusters, appending an ellipsis when cut.
#[must_use]
pub(crate) fn truncate_graphemes(text: &str, max: usize) -> String {
    let mut graphemes = text.graphemes(true);
    let head: String = graphemes.by_ref().take(max).collect();
    if graphemes.next().is_some() {
        format!("{}…", head.trim_end())
    } else {
        head
    }
}

/// Hashes of every `window_size`-character window of `text`.
#[must_use]
pub(crate) fn rolling_hash_windows(text: &str, window_size: usize) -> Vec<u64> {
    let chars: Vec<char> = text.chars().collect();
    if window_size == 0 || chars.len() < window_size {
        return vec![hash_text(text)];
    }

    chars
        .windows(window_size)
        .map(|window| hash_text(&window.iter().collect::<String>()))
        .collect()
}

/// Jaccard similarity of the rolling window hashes is at least `threshold`.
#[must_use]
pub(crate) fn is_near_duplicate(text1: &str, text2: &str, window_size: usize, threshold: f64) -> bool {
    if text1.is_empty() || text2.is_empty() {
        return false;
    }

    let set1: HashSet<u64> = rolling_hash_windows(text1, window_size).into_iter().collect();
    let set2: HashSet<u64> = rolling_hash_windows(text2, window_size).into_iter().collect();

    let union = set1.union(&set2).count();
    if union == 0 {
        return false;
    }
    let intersection = set1.intersection(&set2).count();

    #[allow(clippy::cast_precision_loss)]
    let similarity = intersection as f64 / union as f64;
    similarity >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_text_is_deterministic() {
        assert_eq!(hash_text("Olá, mundo!"), hash_text("Olá, mundo!"));
        assert_ne!(hash_text("Olá, mundo!"), hash_text("Adeus, mundo!"));
    }

    #[test]
    fn collapse_whitespace_folds_runs() {
        assert_eq!(collapse_whitespace("  a \n\t b   c "), "a b c");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn truncate_graphemes_keeps_short_text() {
        assert_eq!(truncate_graphemes("curto", 10), "curto");
    }

    #[test]
    fn truncate_graphemes_cuts_on_cluster_boundaries() {
        let text = "ação e reação";
        let cut = truncate_graphemes(text, 4);
        assert_eq!(cut, "ação…");
    }

    #[test]
    fn rolling_hash_windows_handles_short_text() {
        assert_eq!(rolling_hash_windows("Short", 100).len(), 1);
    }

    #[test]
    fn rolling_hash_windows_counts_characters_not_bytes() {
        // 5 chars, 10 bytes.
        assert_eq!(rolling_hash_windows("ééééé", 3).len(), 3);
    }

    #[test]
    fn is_near_duplicate_detects_identical_and_similar() {
        assert!(is_near_duplicate("texto idêntico", "texto idêntico", 5, 0.9));
        assert!(is_near_duplicate(
            "governo anuncia novo plano de ia",
            "governo anuncia novo plano de ia!",
            5,
            0.8
        ));
    }

    #[test]
    fn is_near_duplicate_rejects_different_and_empty() {
        assert!(!is_near_duplicate(
            "completamente diferente",
            "outro assunto qualquer",
            5,
            0.8
        ));
        assert!(!is_near_duplicate("", "texto", 5, 0.5));
    }
}
