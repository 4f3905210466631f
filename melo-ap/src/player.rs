//! Clip playback collaborator
//!
//! A [`ClipPlayer`] plays one URL to completion or until its cancellation
//! token fires. [`HttpClipPlayer`] fetches the clip with reqwest, decodes it
//! packet by packet with symphonia and hands PCM to a [`PcmSink`], pacing
//! writes against the wall clock so the sink stays [`PLAYBACK_LEAD`] ahead of
//! what the listener hears.
//!
//! Cancellation is checked before every packet and while pacing, so a
//! cancelled clip stops within one decoded packet; the sink is flushed so
//! queued audio stops with it. A cancelled clip returns `Ok(())`;
//! cancellation is not a failure.

use crate::error::ClipError;
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const USER_AGENT: &str = "Melo/0.1.0";

/// How far ahead of real time decoded audio is queued in the sink
pub const PLAYBACK_LEAD: Duration = Duration::from_millis(250);

/// Plays a single clip
#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Play `url` to completion, returning early (with `Ok`) once `cancel` fires
    async fn play(&self, url: &str, cancel: &CancellationToken) -> Result<(), ClipError>;
}

/// Block of interleaved f32 samples from one decoded packet
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
    pub frames: usize,
}

impl PcmChunk {
    /// Wall-clock duration of the chunk at its native rate
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64)
    }
}

/// Destination for decoded audio
pub trait PcmSink: Send + Sync {
    fn write(&self, chunk: &PcmChunk);

    /// Discard anything queued but not yet audible
    fn flush(&self) {}
}

/// Sink that discards samples (headless runs and tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PcmSink for NullSink {
    fn write(&self, _chunk: &PcmChunk) {}
}

/// Incremental symphonia decoder over an in-memory clip
pub struct ClipDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
}

impl ClipDecoder {
    /// Detect the container format of `bytes` and open the first audio track
    ///
    /// `extension` is a format hint (e.g. `"mp3"`); detection still works without it.
    pub fn open(bytes: Vec<u8>, extension: Option<&str>) -> Result<Self, ClipError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let detected = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| ClipError::Decode(format!("Unrecognized container format: {}", e)))?;

        let format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| ClipError::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| ClipError::Decode(format!("Failed to create decoder: {}", e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
        })
    }

    /// Decode the next packet of the audio track
    ///
    /// Returns `Ok(None)` at end of stream. Corrupt packets are skipped.
    pub fn next_chunk(&mut self) -> Result<Option<PcmChunk>, ClipError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(ClipError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let frames = decoded.frames();
                    if frames == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    return Ok(Some(PcmChunk {
                        samples: buffer.samples().to_vec(),
                        sample_rate: spec.rate,
                        channels: spec.channels.count(),
                        frames,
                    }));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = %e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(ClipError::Decode(e.to_string())),
            }
        }
    }
}

/// Extension of the URL path, ignoring query string and fragment
fn extension_hint(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 {
        None
    } else {
        Some(ext)
    }
}

/// Fetch-decode-pace clip player
pub struct HttpClipPlayer {
    http_client: reqwest::Client,
    sink: Arc<dyn PcmSink>,
}

impl HttpClipPlayer {
    /// Create a player whose downloads are bounded by `timeout`
    pub fn new(timeout: Duration, sink: Arc<dyn PcmSink>) -> Result<Self, ClipError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ClipError::Network(e.to_string()))?;

        Ok(Self { http_client, sink })
    }

    /// Decode and pace an already-downloaded clip
    pub async fn play_bytes(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ClipError> {
        let mut decoder = ClipDecoder::open(bytes, extension)?;
        let started = tokio::time::Instant::now();
        let mut queued = Duration::ZERO;

        while let Some(chunk) = decoder.next_chunk()? {
            if cancel.is_cancelled() {
                self.sink.flush();
                return Ok(());
            }
            queued += chunk.duration();
            self.sink.write(&chunk);

            let wake = started + queued.saturating_sub(PLAYBACK_LEAD);
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.sink.flush();
                    return Ok(());
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ClipPlayer for HttpClipPlayer {
    async fn play(&self, url: &str, cancel: &CancellationToken) -> Result<(), ClipError> {
        debug!(url = %url, "Fetching clip");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = self.http_client.get(url).send() => {
                response.map_err(|e| ClipError::Network(e.to_string()))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ClipError::Http(status.as_u16()));
        }

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            bytes = response.bytes() => bytes.map_err(|e| ClipError::Network(e.to_string()))?,
        };

        self.play_bytes(bytes.to_vec(), extension_hint(url), cancel).await
    }
}
