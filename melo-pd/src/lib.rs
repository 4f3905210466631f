//! # Melo Program Director Library (melo-pd)
//!
//! Turns the emotional tone of a conversation into a track choice.
//!
//! **Purpose:** Map an emotion distribution to a (valence, arousal, dominance)
//! affect vector and rank catalog tracks against it.
//!
//! **Architecture:** Pure, synchronous functions over a read-only catalog.
//! Nothing here performs I/O except [`catalog::Catalog::load_json`].

pub mod affect;
pub mod catalog;
pub mod matcher;

pub use affect::{AffectMapper, AffectVector};
pub use catalog::{Catalog, CatalogError, Track};
pub use matcher::{MatchOutcome, Matcher, SimilarityMetric, TrackFilter};
