//! Source and segment catalog loaded from YAML.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::util::text::collapse_whitespace;

const EMBEDDED_CATALOG: &str = include_str!("../config/catalog.yaml");

/// A configured feed source. Position in the catalog is its ranking priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub feeds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Subject the bulletin prompt should stay on.
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub max_articles: Option<NonZeroUsize>,
    pub terms: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub sources: Vec<SourceConfig>,
    pub segments: Vec<SegmentConfig>,
    #[serde(default)]
    pub relevance_terms: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

impl Catalog {
    /// Loads the catalog from `path`, or the built-in catalog when no path is given.
    ///
    /// # Errors
    /// Returns [`CatalogError`] when the file cannot be read, parsed, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml_str(&contents)
            }
            None => Self::from_yaml_str(EMBEDDED_CATALOG),
        }
    }

    /// # Errors
    /// Returns [`CatalogError`] when the YAML is malformed or fails validation.
    pub fn from_yaml_str(contents: &str) -> Result<Self, CatalogError> {
        let catalog: Self = serde_yaml::from_str(contents)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.sources.is_empty() {
            return Err(CatalogError::Invalid("at least one source is required".into()));
        }
        if self.segments.is_empty() {
            return Err(CatalogError::Invalid("at least one segment is required".into()));
        }

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(CatalogError::Invalid("source id must not be blank".into()));
            }
            if !source_ids.insert(source.id.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate source id `{}`",
                    source.id
                )));
            }
            if source.feeds.iter().all(|feed| feed.trim().is_empty()) {
                return Err(CatalogError::Invalid(format!(
                    "source `{}` lists no feeds",
                    source.id
                )));
            }
        }

        let mut relevance = HashSet::new();
        for term in &self.relevance_terms {
            let key = fold_term(term);
            if key.is_empty() {
                return Err(CatalogError::Invalid("relevance term must not be blank".into()));
            }
            if !relevance.insert(key) {
                return Err(CatalogError::Invalid(format!(
                    "relevance term `{term}` is repeated"
                )));
            }
        }

        let mut segment_names = HashSet::new();
        for segment in &self.segments {
            if segment.name.trim().is_empty() {
                return Err(CatalogError::Invalid("segment name must not be blank".into()));
            }
            if !segment_names.insert(segment.name.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate segment `{}`",
                    segment.name
                )));
            }
            if segment.terms.is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "segment `{}` has no terms",
                    segment.name
                )));
            }

            let mut folded = HashSet::new();
            for (term, weight) in &segment.terms {
                let key = fold_term(term);
                if key.is_empty() {
                    return Err(CatalogError::Invalid(format!(
                        "segment `{}` has a blank term",
                        segment.name
                    )));
                }
                if !folded.insert(key) {
                    return Err(CatalogError::Invalid(format!(
                        "segment `{}` repeats term `{term}`",
                        segment.name
                    )));
                }
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(CatalogError::Invalid(format!(
                        "segment `{}` term `{term}` has invalid weight {weight}",
                        segment.name
                    )));
                }
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|source| source.id.clone()).collect()
    }

    /// Source id to priority rank (0 is highest).
    #[must_use]
    pub fn source_priority(&self) -> HashMap<String, usize> {
        self.sources
            .iter()
            .enumerate()
            .map(|(rank, source)| (source.id.clone(), rank))
            .collect()
    }

    #[must_use]
    pub fn segment(&self, name: &str) -> Option<&SegmentConfig> {
        self.segments.iter().find(|segment| segment.name == name)
    }
}

impl SegmentConfig {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn focus(&self) -> &str {
        self.focus.as_deref().unwrap_or_else(|| self.display_name())
    }
}

/// Case-folded, NFC, whitespace-collapsed form used for matching.
#[must_use]
pub(crate) fn fold_term(term: &str) -> String {
    collapse_whitespace(&term.nfc().collect::<String>().to_lowercase())
}
