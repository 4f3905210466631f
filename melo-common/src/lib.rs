//! # Melo Common Library
//!
//! Shared code for all Melo crates including:
//! - Emotion vocabulary and per-utterance analysis types
//! - Interview category tags
//! - Event types (MeloEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Common error type

pub mod category;
pub mod config;
pub mod emotion;
pub mod error;
pub mod events;

pub use category::CategoryTag;
pub use emotion::{EmotionDistribution, EmotionLabel, Entity};
pub use error::{Error, Result};
