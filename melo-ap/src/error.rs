//! Error types for melo-ap
//!
//! One enum per boundary: the controller handle, a single clip, the
//! preview search service, and the sound devices.

use thiserror::Error;

/// Errors returned by [`crate::AmbiencePlayer`] handle methods
#[derive(Debug, Error)]
pub enum AmbienceError {
    /// Controller task has exited (shutdown or panic)
    #[error("Ambience controller is not running")]
    ControllerGone,
}

/// Failure playing one clip
///
/// Never fatal to an ambience session; the loop logs it and moves on.
#[derive(Debug, Error)]
pub enum ClipError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0} fetching clip")]
    Http(u16),

    #[error("Audio decode error: {0}")]
    Decode(String),
}

/// Preview search client errors
#[derive(Debug, Error)]
pub enum SearchError {
    /// Network communication error (including timeouts)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Search API returned error response
    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    /// Failed to parse API response JSON
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Sound device errors (speaker or microphone)
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device missing, unsupported format, or host failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Stream could not be built, started, or died mid-capture
    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    /// Listening window passed without the participant speaking
    #[error("No speech detected within {0} ms")]
    NoSpeech(u64),

    #[error("WAV encoding failed: {0}")]
    Encode(String),
}
