//! Microphone capture for spoken answers
//!
//! [`MicRecorder`] opens the input device for one answer at a time and feeds
//! mono blocks into a [`PhraseDetector`], which samples the room first, then
//! waits for speech and stops after a trailing pause. The result is a mono
//! [`Recording`] that encodes to 16-bit WAV for upload.
//!
//! Recording blocks the calling thread; async callers go through
//! `spawn_blocking`.

use crate::error::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use melo_common::config::AudioConfig;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Analysis window length
const WINDOW_MS: u64 = 30;

/// Ambient level multiplier giving the speech threshold
const AMBIENT_MULTIPLIER: f32 = 2.0;

/// Windows kept from before speech starts so the first syllable survives
const PREROLL_WINDOWS: usize = 10;

/// How long the capture loop tolerates a silent device callback
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Speech detection options
#[derive(Debug, Clone, PartialEq)]
pub struct ListenSettings {
    pub calibration: Duration,
    pub pause: Duration,
    pub max_phrase: Duration,
    pub listen_timeout: Duration,
    pub min_energy: f32,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for ListenSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            calibration: Duration::from_millis(config.calibration_ms),
            pause: Duration::from_millis(config.pause_ms),
            max_phrase: Duration::from_millis(config.max_phrase_ms),
            listen_timeout: Duration::from_millis(config.listen_timeout_ms),
            min_energy: config.min_energy,
        }
    }
}

/// Mono capture of one spoken answer
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Recording {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Encode as 16-bit PCM mono WAV
    pub fn to_wav(&self) -> Result<Vec<u8>, AudioError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| AudioError::Encode(e.to_string()))?;
            for sample in &self.samples {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(value)
                    .map_err(|e| AudioError::Encode(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| AudioError::Encode(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}

/// Blocking source of one spoken phrase
pub trait PhraseRecorder: Send + Sync {
    fn record_phrase(&self) -> Result<Recording, AudioError>;
}

/// Progress of a [`PhraseDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    /// Sampling room noise to set the threshold
    Calibrating,
    /// Threshold set; no speech yet
    Waiting,
    Speaking,
    /// Trailing pause heard or phrase limit reached
    Finished,
    /// Listen timeout passed without speech
    TimedOut,
}

/// Energy-based speech endpointing over a mono stream
pub struct PhraseDetector {
    settings: ListenSettings,
    sample_rate: u32,
    window: usize,
    state: ListenState,
    partial: Vec<f32>,
    ambient_sum: f64,
    ambient_windows: u32,
    calibrated: Duration,
    threshold: f32,
    waited: Duration,
    preroll: VecDeque<Vec<f32>>,
    phrase: Vec<f32>,
    spoken: Duration,
    silence: Duration,
}

impl PhraseDetector {
    pub fn new(settings: ListenSettings, sample_rate: u32) -> Self {
        let window = ((sample_rate as u64 * WINDOW_MS) / 1000).max(1) as usize;
        let state = if settings.calibration.is_zero() {
            ListenState::Waiting
        } else {
            ListenState::Calibrating
        };
        let threshold = settings.min_energy;

        Self {
            settings,
            sample_rate,
            window,
            state,
            partial: Vec::new(),
            ambient_sum: 0.0,
            ambient_windows: 0,
            calibrated: Duration::ZERO,
            threshold,
            waited: Duration::ZERO,
            preroll: VecDeque::with_capacity(PREROLL_WINDOWS + 1),
            phrase: Vec::new(),
            spoken: Duration::ZERO,
            silence: Duration::ZERO,
        }
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    /// RMS level speech must exceed
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Feed captured samples; input past the end of the phrase is ignored
    pub fn push(&mut self, samples: &[f32]) -> ListenState {
        if self.is_done() {
            return self.state;
        }

        self.partial.extend_from_slice(samples);
        while self.partial.len() >= self.window && !self.is_done() {
            let window: Vec<f32> = self.partial.drain(..self.window).collect();
            self.process_window(window);
        }
        self.state
    }

    pub fn into_recording(self) -> Recording {
        Recording {
            samples: self.phrase,
            sample_rate: self.sample_rate,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, ListenState::Finished | ListenState::TimedOut)
    }

    fn window_duration(&self) -> Duration {
        Duration::from_nanos(self.window as u64 * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }

    fn process_window(&mut self, window: Vec<f32>) {
        let level = rms(&window);
        let step = self.window_duration();

        match self.state {
            ListenState::Calibrating => {
                self.ambient_sum += level as f64;
                self.ambient_windows += 1;
                self.calibrated += step;
                if self.calibrated >= self.settings.calibration {
                    let ambient = (self.ambient_sum / self.ambient_windows as f64) as f32;
                    self.threshold = (ambient * AMBIENT_MULTIPLIER).max(self.settings.min_energy);
                    self.state = ListenState::Waiting;
                    debug!(ambient, threshold = self.threshold, "Ambient noise calibrated");
                }
            }
            ListenState::Waiting => {
                self.waited += step;
                if level > self.threshold {
                    self.phrase.extend(self.preroll.drain(..).flatten());
                    self.phrase.extend_from_slice(&window);
                    self.spoken = step;
                    self.state = ListenState::Speaking;
                } else {
                    self.preroll.push_back(window);
                    if self.preroll.len() > PREROLL_WINDOWS {
                        self.preroll.pop_front();
                    }
                    if self.waited >= self.settings.listen_timeout {
                        self.state = ListenState::TimedOut;
                    }
                }
            }
            ListenState::Speaking => {
                self.phrase.extend_from_slice(&window);
                self.spoken += step;
                if level > self.threshold {
                    self.silence = Duration::ZERO;
                } else {
                    self.silence += step;
                }
                if self.silence >= self.settings.pause || self.spoken >= self.settings.max_phrase {
                    self.state = ListenState::Finished;
                }
            }
            ListenState::Finished | ListenState::TimedOut => {}
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// List available audio input devices
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .input_devices()
        .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} input devices", devices.len());
    Ok(devices)
}

/// [`PhraseRecorder`] reading the system microphone through cpal
pub struct MicRecorder {
    device: Option<String>,
    settings: ListenSettings,
}

impl MicRecorder {
    pub fn new(device: Option<String>, settings: ListenSettings) -> Self {
        Self { device, settings }
    }

    /// Upper bound on one capture, including calibration
    fn capture_limit(&self) -> Duration {
        self.settings.calibration
            + self.settings.listen_timeout
            + self.settings.max_phrase
            + STALL_TIMEOUT
    }
}

impl From<&AudioConfig> for MicRecorder {
    fn from(config: &AudioConfig) -> Self {
        Self::new(config.input_device.clone(), ListenSettings::from(config))
    }
}

impl PhraseRecorder for MicRecorder {
    fn record_phrase(&self) -> Result<Recording, AudioError> {
        let device = select_input_device(self.device.as_deref())?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::Device(format!("Failed to get default input config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config = supported.config();
        let sample_rate = config.sample_rate.0;

        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, tx, Arc::clone(&failed))?,
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, tx, Arc::clone(&failed))?,
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, tx, Arc::clone(&failed))?,
            sample_format => {
                return Err(AudioError::Device(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };
        stream
            .play()
            .map_err(|e| AudioError::Stream(format!("Failed to start capture: {}", e)))?;

        let mut detector = PhraseDetector::new(self.settings.clone(), sample_rate);
        let deadline = Instant::now() + self.capture_limit();

        loop {
            if failed.load(Ordering::Acquire) {
                return Err(AudioError::Stream("Microphone stream failed".to_string()));
            }
            if Instant::now() >= deadline {
                return Err(AudioError::Stream("Microphone capture overran its limit".to_string()));
            }

            match rx.recv_timeout(STALL_TIMEOUT) {
                Ok(block) => match detector.push(&block) {
                    ListenState::Finished => break,
                    ListenState::TimedOut => {
                        return Err(AudioError::NoSpeech(
                            self.settings.listen_timeout.as_millis() as u64,
                        ));
                    }
                    _ => {}
                },
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(AudioError::Stream("Microphone stopped delivering audio".to_string()));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::Stream("Microphone stream closed".to_string()));
                }
            }
        }

        drop(stream);
        let recording = detector.into_recording();
        info!(
            duration_ms = recording.duration().as_millis() as u64,
            "Captured spoken answer"
        );
        Ok(recording)
    }
}

fn select_input_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let mut devices = host
            .input_devices()
            .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            return Ok(device);
        }
        warn!("Requested microphone '{}' not found, falling back to default device", name);
    }

    host.default_input_device()
        .ok_or_else(|| AudioError::Device("No default input device found".to_string()))
}

/// Input stream that downmixes each callback buffer to mono
fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: mpsc::Sender<Vec<f32>>,
    failed: Arc<AtomicBool>,
) -> Result<Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<f32> = data
                    .chunks(channels)
                    .map(|frame| {
                        frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / frame.len() as f32
                    })
                    .collect();
                // Receiver is gone once the phrase is complete
                let _ = tx.send(mono);
            },
            move |err| {
                error!("Microphone stream error: {}", err);
                failed.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(format!("Failed to build capture stream: {}", e)))
}
