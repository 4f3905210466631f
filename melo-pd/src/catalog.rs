//! Read-only track catalog
//!
//! A catalog is either the small built-in list or a JSON file of records:
//!
//! ```json
//! [{"id": "t1", "title": "Yesterday", "artist": "The Beatles",
//!   "emotion": "nostalgia", "valence": 0.45, "arousal": 0.3, "dominance": 0.45}]
//! ```
//!
//! `emotion` is optional; `dominance` defaults to 0.5 for datasets that only
//! provide valence and arousal.

use crate::affect::AffectVector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Catalog loading errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate track id in catalog: {0}")]
    DuplicateId(String),
}

/// Catalog entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Lower-cased emotion tag, if the dataset labels one
    pub emotion: Option<String>,
    pub affect: AffectVector,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        emotion: Option<&str>,
        affect: AffectVector,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            emotion: emotion.map(|e| e.trim().to_lowercase()),
            affect,
        }
    }

    /// Case-insensitive emotion tag comparison
    pub fn has_emotion(&self, label: &str) -> bool {
        self.emotion
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(label.trim()))
    }
}

/// On-disk record shape
#[derive(Debug, Deserialize)]
struct TrackRecord {
    id: String,
    title: String,
    artist: String,
    #[serde(default)]
    emotion: Option<String>,
    valence: f64,
    arousal: f64,
    #[serde(default = "default_dominance")]
    dominance: f64,
}

fn default_dominance() -> f64 {
    0.5
}

impl From<TrackRecord> for Track {
    fn from(r: TrackRecord) -> Self {
        Track::new(
            r.id,
            r.title,
            r.artist,
            r.emotion.as_deref(),
            AffectVector::new(r.valence, r.arousal, r.dominance),
        )
    }
}

/// Ordered, immutable list of tracks
///
/// Iteration order is load order; the matcher's tie-break depends on it.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    pub fn new(tracks: Vec<Track>) -> Result<Self, CatalogError> {
        for (i, track) in tracks.iter().enumerate() {
            if tracks[..i].iter().any(|t| t.id == track.id) {
                return Err(CatalogError::DuplicateId(track.id.clone()));
            }
        }
        Ok(Self { tracks })
    }

    /// Three-song catalog used when no dataset is configured
    pub fn builtin() -> Self {
        Self {
            tracks: vec![
                Track::new(
                    "here-comes-the-sun",
                    "Here Comes the Sun",
                    "The Beatles",
                    Some("joy"),
                    AffectVector::new(0.85, 0.6, 0.65),
                ),
                Track::new(
                    "nocturne-e-minor",
                    "Nocturne in E Minor",
                    "Chopin",
                    Some("sadness"),
                    AffectVector::new(0.15, 0.25, 0.35),
                ),
                Track::new(
                    "yesterday",
                    "Yesterday",
                    "The Beatles",
                    Some("nostalgia"),
                    AffectVector::new(0.45, 0.3, 0.45),
                ),
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let records: Vec<TrackRecord> = serde_json::from_str(json)?;
        Self::new(records.into_iter().map(Track::from).collect())
    }

    pub fn load_json(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&content)?;
        info!(path = %path.display(), tracks = catalog.len(), "Loaded track catalog");
        Ok(catalog)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Distinct emotion tags carried by the tracks, in first-seen order
    pub fn emotion_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self.tracks.iter().filter_map(|t| t.emotion.as_deref()) {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
