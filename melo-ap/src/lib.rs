//! # Melo Ambience Player Library (melo-ap)
//!
//! Background soundscape playback for an interview session.
//!
//! **Purpose:** Keep exactly one environmental-sound loop running while the
//! participant talks, replace it as the conversation moves on, and stop it
//! cleanly before any foreground track plays.
//!
//! **Architecture:** A controller task owns the loop session and is driven
//! over an mpsc command channel. Clip playback and preview search are
//! collaborator traits so tests can substitute scripted fakes.
//!
//! The crate also owns the sound devices: [`CpalSink`] plays decoded audio
//! and [`MicRecorder`] captures spoken answers.

pub mod ambience;
pub mod capture;
pub mod error;
pub mod output;
pub mod player;
pub mod search;

pub use ambience::{AmbiencePlayer, AmbienceSettings, AmbienceState};
pub use capture::{
    list_input_devices, ListenSettings, ListenState, MicRecorder, PhraseDetector, PhraseRecorder,
    Recording,
};
pub use error::{AmbienceError, AudioError, ClipError, SearchError};
pub use output::{list_output_devices, CpalSink, DeviceFormat, FormatConverter, OutputSettings};
pub use player::{ClipDecoder, ClipPlayer, HttpClipPlayer, NullSink, PcmChunk, PcmSink, PLAYBACK_LEAD};
pub use search::{collect_ambience_urls, DeezerClient, PreviewSearch};
