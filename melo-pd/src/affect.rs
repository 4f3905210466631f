//! Emotion distribution → affect vector mapping
//!
//! Each known emotion label has a fixed anchor point in
//! (valence, arousal, dominance) space. An utterance's affect is the
//! score-weighted centroid of the anchors of the labels it mentions.

use melo_common::{EmotionDistribution, EmotionLabel};
use serde::{Deserialize, Serialize};

/// Point in (valence, arousal, dominance) space, each coordinate in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffectVector {
    pub valence: f64,
    pub arousal: f64,
    pub dominance: f64,
}

impl AffectVector {
    /// Neutral point returned when a distribution carries no usable weight
    pub const CENTROID: AffectVector = AffectVector {
        valence: 0.5,
        arousal: 0.5,
        dominance: 0.5,
    };

    /// Build a vector, clamping into [0, 1] (non-finite coordinates become 0.5)
    pub fn new(valence: f64, arousal: f64, dominance: f64) -> Self {
        Self {
            valence: unit(valence),
            arousal: unit(arousal),
            dominance: unit(dominance),
        }
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.valence, self.arousal, self.dominance]
    }

    pub fn dot(&self, other: &AffectVector) -> f64 {
        self.valence * other.valence + self.arousal * other.arousal + self.dominance * other.dominance
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(&self, other: &AffectVector) -> f64 {
        let dv = self.valence - other.valence;
        let da = self.arousal - other.arousal;
        let dd = self.dominance - other.dominance;
        (dv * dv + da * da + dd * dd).sqrt()
    }
}

fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Default label → anchor table
const DEFAULT_ANCHORS: [(EmotionLabel, [f64; 3]); 11] = [
    (EmotionLabel::Joy, [0.9, 0.6, 0.7]),
    (EmotionLabel::Sadness, [0.1, 0.3, 0.4]),
    (EmotionLabel::Anger, [0.2, 0.7, 0.8]),
    (EmotionLabel::Fear, [0.2, 0.8, 0.6]),
    (EmotionLabel::Surprise, [0.7, 0.7, 0.6]),
    (EmotionLabel::Disgust, [0.1, 0.6, 0.5]),
    (EmotionLabel::Neutral, [0.5, 0.5, 0.5]),
    (EmotionLabel::Love, [0.9, 0.6, 0.8]),
    (EmotionLabel::Optimism, [0.8, 0.5, 0.7]),
    (EmotionLabel::Pessimism, [0.2, 0.4, 0.5]),
    (EmotionLabel::Nostalgia, [0.6, 0.4, 0.6]),
];

/// Maps emotion distributions onto affect vectors
#[derive(Debug, Clone)]
pub struct AffectMapper {
    anchors: Vec<(EmotionLabel, AffectVector)>,
}

impl AffectMapper {
    /// Mapper over a custom anchor table
    ///
    /// A label listed twice keeps its first anchor.
    pub fn with_anchors<I>(anchors: I) -> Self
    where
        I: IntoIterator<Item = (EmotionLabel, AffectVector)>,
    {
        let mut table: Vec<(EmotionLabel, AffectVector)> = Vec::new();
        for (label, vector) in anchors {
            if !table.iter().any(|(l, _)| *l == label) {
                table.push((label, vector));
            }
        }
        Self { anchors: table }
    }

    pub fn anchor(&self, label: EmotionLabel) -> Option<AffectVector> {
        self.anchors
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| *v)
    }

    /// Score-weighted centroid of the anchors present in `dist`
    ///
    /// Labels without an anchor are ignored. When no label contributes
    /// weight the result is [`AffectVector::CENTROID`].
    pub fn to_affect(&self, dist: &EmotionDistribution) -> AffectVector {
        let mut sum = [0.0_f64; 3];
        let mut total = 0.0_f64;

        for (label, score) in dist.iter() {
            let Some(anchor) = EmotionLabel::parse(label).and_then(|l| self.anchor(l)) else {
                continue;
            };
            for (acc, coord) in sum.iter_mut().zip(anchor.as_array()) {
                *acc += score * coord;
            }
            total += score;
        }

        if total > 0.0 {
            AffectVector::new(sum[0] / total, sum[1] / total, sum[2] / total)
        } else {
            AffectVector::CENTROID
        }
    }
}

impl Default for AffectMapper {
    fn default() -> Self {
        Self::with_anchors(
            DEFAULT_ANCHORS
                .iter()
                .map(|(label, [v, a, d])| (*label, AffectVector::new(*v, *a, *d))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_joy_sadness_weighted_centroid() {
        let mapper = AffectMapper::default();
        let dist = EmotionDistribution::from_pairs([("joy", 0.9), ("sadness", 0.05)]);

        let affect = mapper.to_affect(&dist);

        // (0.9 * joy + 0.05 * sadness) / 0.95
        assert!(approx(affect.valence, (0.9 * 0.9 + 0.05 * 0.1) / 0.95));
        assert!(approx(affect.arousal, (0.9 * 0.6 + 0.05 * 0.3) / 0.95));
        assert!(approx(affect.dominance, (0.9 * 0.7 + 0.05 * 0.4) / 0.95));
        assert!((affect.valence - 0.858).abs() < 0.001);
    }

    #[test]
    fn test_no_overlap_returns_centroid() {
        let mapper = AffectMapper::default();
        for dist in [
            EmotionDistribution::default(),
            EmotionDistribution::from_pairs([("confusion", 0.7), ("boredom", 0.3)]),
            EmotionDistribution::from_pairs([("pride", 1.0)]),
            EmotionDistribution::from_pairs([("joy", 0.0), ("sadness", 0.0)]),
        ] {
            assert_eq!(mapper.to_affect(&dist), AffectVector::CENTROID);
        }
    }

    #[test]
    fn test_unknown_labels_do_not_dilute() {
        let mapper = AffectMapper::default();
        let dist = EmotionDistribution::from_pairs([("anger", 0.5), ("confusion", 10.0)]);
        let affect = mapper.to_affect(&dist);
        assert!(approx(affect.valence, 0.2));
        assert!(approx(affect.arousal, 0.7));
        assert!(approx(affect.dominance, 0.8));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = AffectMapper::default();
        let dist = EmotionDistribution::from_pairs([("fear", 0.3), ("surprise", 0.6), ("love", 0.1)]);
        assert_eq!(mapper.to_affect(&dist), mapper.to_affect(&dist));
    }

    #[test]
    fn test_custom_anchor_table() {
        let mapper = AffectMapper::with_anchors([
            (EmotionLabel::Pride, AffectVector::new(0.8, 0.6, 0.9)),
            (EmotionLabel::Pride, AffectVector::new(0.0, 0.0, 0.0)),
        ]);
        let affect = mapper.to_affect(&EmotionDistribution::from_pairs([("pride", 2.0)]));
        assert!(approx(affect.dominance, 0.9));
        assert_eq!(mapper.anchor(EmotionLabel::Joy), None);
    }

    #[test]
    fn test_vector_clamps_into_unit_cube() {
        let v = AffectVector::new(1.5, -0.2, f64::NAN);
        assert_eq!(v.as_array(), [1.0, 0.0, 0.5]);
    }
}
