//! Emotion vocabulary and per-utterance analysis types
//!
//! An utterance is described by two collaborator outputs:
//! - [`EmotionDistribution`]: label → non-negative score (need not sum to 1)
//! - [`Entity`]: surface text + type tag from the named-entity recognizer
//!
//! Labels produced by a classifier are free-form strings. The closed
//! [`EmotionLabel`] enum names the labels the engine knows how to interpret;
//! anything else is kept verbatim in the distribution and handled by the
//! fallback paths of the consumers.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Label returned by [`EmotionDistribution::dominant`] when no scores exist
pub const NEUTRAL_LABEL: &str = "neutral";

/// Emotion labels known to the engine
///
/// The first seven are the classifier's base vocabulary; the rest come from
/// the fine-tuned memoir model and the question templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Anger,
    Disgust,
    Fear,
    Joy,
    Neutral,
    Sadness,
    Surprise,
    Love,
    Optimism,
    Pessimism,
    Nostalgia,
    Pride,
    Humor,
    Resilience,
}

impl EmotionLabel {
    /// Fixed label set, in aggregation order
    pub const ALL: [EmotionLabel; 14] = [
        EmotionLabel::Anger,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Joy,
        EmotionLabel::Neutral,
        EmotionLabel::Sadness,
        EmotionLabel::Surprise,
        EmotionLabel::Love,
        EmotionLabel::Optimism,
        EmotionLabel::Pessimism,
        EmotionLabel::Nostalgia,
        EmotionLabel::Pride,
        EmotionLabel::Humor,
        EmotionLabel::Resilience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Anger => "anger",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Joy => "joy",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Love => "love",
            EmotionLabel::Optimism => "optimism",
            EmotionLabel::Pessimism => "pessimism",
            EmotionLabel::Nostalgia => "nostalgia",
            EmotionLabel::Pride => "pride",
            EmotionLabel::Humor => "humor",
            EmotionLabel::Resilience => "resilience",
        }
    }

    /// Case-insensitive lookup; `None` for labels outside the vocabulary
    pub fn parse(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmotionLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidInput(format!("Unknown emotion label: {}", s)))
    }
}

/// Per-utterance emotion scores
///
/// Labels are stored lower-cased in first-seen order. Repeated labels are
/// summed; negative and non-finite scores are clamped to zero. Immutable once
/// built.
///
/// Serialized as a JSON-style map. Entry order is kept in both directions, so
/// tie-breaking in [`EmotionDistribution::dominant`] follows the order the
/// classifier reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmotionDistribution {
    scores: Vec<(String, f64)>,
}

impl EmotionDistribution {
    /// Build from `(label, score)` pairs
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut scores: Vec<(String, f64)> = Vec::new();
        for (label, score) in pairs {
            let label = label.as_ref().trim().to_lowercase();
            let score = if score.is_finite() { score.max(0.0) } else { 0.0 };
            match scores.iter_mut().find(|(l, _)| *l == label) {
                Some(entry) => entry.1 += score,
                None => scores.push((label, score)),
            }
        }
        Self { scores }
    }

    /// Distribution used before the participant has said anything
    pub fn neutral() -> Self {
        Self::from_pairs([(NEUTRAL_LABEL, 1.0)])
    }

    /// Score for a label (case-insensitive), zero when absent
    pub fn score(&self, label: &str) -> f64 {
        let wanted = label.trim().to_lowercase();
        self.scores
            .iter()
            .find(|(l, _)| *l == wanted)
            .map(|(_, s)| *s)
            .unwrap_or(0.0)
    }

    pub fn label_score(&self, label: EmotionLabel) -> f64 {
        self.score(label.as_str())
    }

    /// Highest-scoring label; earlier labels win ties, empty → `"neutral"`
    pub fn dominant(&self) -> &str {
        let mut best: Option<(&str, f64)> = None;
        for (label, score) in &self.scores {
            match best {
                Some((_, s)) if *score <= s => {}
                _ => best = Some((label.as_str(), *score)),
            }
        }
        best.map(|(l, _)| l).unwrap_or(NEUTRAL_LABEL)
    }

    /// Highest-scoring label among `labels`, earlier entries winning ties
    ///
    /// Labels missing from the distribution score zero. `None` only when
    /// `labels` is empty.
    pub fn dominant_among<'a, S>(&self, labels: &'a [S]) -> Option<&'a str>
    where
        S: AsRef<str>,
    {
        let mut best: Option<(&str, f64)> = None;
        for label in labels {
            let score = self.score(label.as_ref());
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((label.as_ref(), score)),
            }
        }
        best.map(|(l, _)| l)
    }

    /// Dominant label when it belongs to the known vocabulary
    pub fn dominant_label(&self) -> Option<EmotionLabel> {
        EmotionLabel::parse(self.dominant())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.scores.iter().map(|(l, s)| (l.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Element-wise mean over the fixed label set
    ///
    /// Labels outside [`EmotionLabel::ALL`] do not take part. An empty input
    /// yields an empty distribution.
    pub fn mean(distributions: &[EmotionDistribution]) -> Self {
        if distributions.is_empty() {
            return Self::default();
        }
        let n = distributions.len() as f64;
        Self::from_pairs(EmotionLabel::ALL.iter().map(|label| {
            let total: f64 = distributions.iter().map(|d| d.label_score(*label)).sum();
            (label.as_str(), total / n)
        }))
    }
}

impl Serialize for EmotionDistribution {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for (label, score) in &self.scores {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

struct DistributionVisitor;

impl<'de> Visitor<'de> for DistributionVisitor {
    type Value = EmotionDistribution;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of emotion label to score")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut pairs: Vec<(String, f64)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(entry) = access.next_entry::<String, f64>()? {
            pairs.push(entry);
        }
        Ok(EmotionDistribution::from_pairs(pairs))
    }
}

impl<'de> Deserialize<'de> for EmotionDistribution {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(DistributionVisitor)
    }
}

/// Named entity extracted from an utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface text as it appeared in the utterance
    pub text: String,
    /// Entity type tag (e.g. "PER", "LOC")
    pub label: String,
}

impl Entity {
    pub fn new(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: label.into(),
        }
    }
}
