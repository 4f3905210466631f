//! Affect vector → catalog track matching
//!
//! Full O(n) scan of the catalog with one metric per scan. The first track in
//! catalog order wins ties, so repeated calls on an unchanged catalog always
//! return the same track and score.

use crate::affect::AffectVector;
use crate::catalog::{Catalog, Track};
use melo_common::config::MetricName;
use std::fmt;
use std::sync::Arc;

/// Guards the cosine denominator against zero-length vectors
const EPSILON: f64 = 1e-8;

/// Similarity metric; higher scores are better for both variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimilarityMetric {
    /// `a·b / (|a||b| + ε)`
    #[default]
    Cosine,
    /// Nearest neighbour, reported as `1 / (1 + distance)`
    Euclidean,
}

impl SimilarityMetric {
    pub fn score(&self, query: &AffectVector, candidate: &AffectVector) -> f64 {
        match self {
            SimilarityMetric::Cosine => {
                query.dot(candidate) / (query.norm() * candidate.norm() + EPSILON)
            }
            SimilarityMetric::Euclidean => 1.0 / (1.0 + query.distance(candidate)),
        }
    }
}

impl From<MetricName> for SimilarityMetric {
    fn from(name: MetricName) -> Self {
        match name {
            MetricName::Cosine => SimilarityMetric::Cosine,
            MetricName::Euclidean => SimilarityMetric::Euclidean,
        }
    }
}

/// Narrows the candidate set before scoring
#[derive(Clone, Default)]
pub enum TrackFilter {
    #[default]
    Any,
    /// Track's emotion tag equals the label (case-insensitive)
    Emotion(String),
    Custom(Arc<dyn Fn(&Track) -> bool + Send + Sync>),
}

impl TrackFilter {
    pub fn emotion(label: impl Into<String>) -> Self {
        TrackFilter::Emotion(label.into())
    }

    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&Track) -> bool + Send + Sync + 'static,
    {
        TrackFilter::Custom(Arc::new(predicate))
    }

    pub fn accepts(&self, track: &Track) -> bool {
        match self {
            TrackFilter::Any => true,
            TrackFilter::Emotion(label) => track.has_emotion(label),
            TrackFilter::Custom(predicate) => predicate(track),
        }
    }
}

impl fmt::Debug for TrackFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackFilter::Any => write!(f, "Any"),
            TrackFilter::Emotion(label) => write!(f, "Emotion({:?})", label),
            TrackFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Result of a catalog scan
///
/// `NoMatch` is a normal outcome (empty catalog or nothing passed the
/// filter); callers report it and play nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Match { track: Track, score: f64 },
    NoMatch,
}

impl MatchOutcome {
    pub fn track(&self) -> Option<&Track> {
        match self {
            MatchOutcome::Match { track, .. } => Some(track),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            MatchOutcome::Match { score, .. } => Some(*score),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match { .. })
    }
}

/// Catalog scanner bound to one metric
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher {
    metric: SimilarityMetric,
}

impl Matcher {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Best-scoring track passing `filter`
    pub fn best_match(&self, query: &AffectVector, catalog: &Catalog, filter: &TrackFilter) -> MatchOutcome {
        let mut best: Option<(&Track, f64)> = None;

        for track in catalog.tracks().iter().filter(|t| filter.accepts(t)) {
            let score = self.metric.score(query, &track.affect);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((track, score)),
            }
        }

        match best {
            Some((track, score)) => MatchOutcome::Match {
                track: track.clone(),
                score,
            },
            None => MatchOutcome::NoMatch,
        }
    }

    /// Top `limit` tracks passing `filter`, best first
    ///
    /// Equal scores keep catalog order.
    pub fn rank(
        &self,
        query: &AffectVector,
        catalog: &Catalog,
        filter: &TrackFilter,
        limit: usize,
    ) -> Vec<(Track, f64)> {
        let mut scored: Vec<(&Track, f64)> = catalog
            .tracks()
            .iter()
            .filter(|t| filter.accepts(t))
            .map(|t| (t, self.metric.score(query, &t.affect)))
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(limit)
            .map(|(t, s)| (t.clone(), s))
            .collect()
    }
}
