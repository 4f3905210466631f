//! Speaker output using cpal
//!
//! [`CpalSink`] is the production [`PcmSink`]: decoded chunks are converted
//! to the device's channel layout and sample rate, pushed into a lock-free
//! ring buffer, and drained by the cpal callback on the audio thread. An
//! empty ring plays silence, so a gap between clips never stalls the device.
//!
//! `cpal::Stream` is not `Send`; the stream lives on a dedicated thread that
//! parks until the sink is dropped.

use crate::error::AudioError;
use crate::player::{PcmChunk, PcmSink};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use melo_common::config::AudioConfig;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Frames handed to rubato per resampling block
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Preferred device rate (preview clips are 44.1kHz)
const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// Output device options
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Device name (None = default device)
    pub device: Option<String>,
    pub volume: f32,
    /// Ring buffer capacity
    pub buffer: Duration,
}

impl From<&AudioConfig> for OutputSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            device: config.output_device.clone(),
            volume: config.volume,
            buffer: Duration::from_millis(config.output_buffer_ms),
        }
    }
}

/// Rate and channel layout the device was opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: usize,
}

/// List available audio output devices
pub fn list_output_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// Producer half plus the converter feeding it
struct SinkState {
    producer: HeapProd<f32>,
    converter: FormatConverter,
}

/// [`PcmSink`] that plays through the system's sound device
pub struct CpalSink {
    state: Mutex<SinkState>,
    format: DeviceFormat,
    volume: Arc<Mutex<f32>>,
    flush_requested: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
    shutdown: Option<mpsc::SyncSender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the output device and start its stream
    ///
    /// A named device that cannot be found falls back to the default device.
    pub fn open(settings: OutputSettings) -> Result<Self, AudioError> {
        let volume = Arc::new(Mutex::new(settings.volume.clamp(0.0, 1.0)));
        let flush_requested = Arc::new(AtomicBool::new(false));
        let error_count = Arc::new(AtomicU32::new(0));

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::sync_channel::<()>(1);

        let thread = {
            let shared = StreamShared {
                volume: Arc::clone(&volume),
                flush_requested: Arc::clone(&flush_requested),
                error_count: Arc::clone(&error_count),
            };
            std::thread::Builder::new()
                .name("melo-audio-out".to_string())
                .spawn(move || match start_stream(&settings, shared) {
                    Ok((stream, format, producer)) => {
                        if ready_tx.send(Ok((format, producer))).is_err() {
                            return;
                        }
                        // Returns once the sink drops its sender
                        let _ = shutdown_rx.recv();
                        drop(stream);
                        debug!("Audio output stream closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(|e| AudioError::Device(format!("Failed to spawn audio thread: {}", e)))?
        };

        let (format, producer) = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("Audio thread exited during setup".to_string()))??;

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio output started"
        );

        Ok(Self {
            state: Mutex::new(SinkState {
                producer,
                converter: FormatConverter::new(format),
            }),
            format,
            volume,
            flush_requested,
            error_count,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn format(&self) -> DeviceFormat {
        self.format
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap_or_else(PoisonError::into_inner) = volume.clamp(0.0, 1.0);
    }

    /// Stream errors reported by the audio callback since the device opened
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl PcmSink for CpalSink {
    fn write(&self, chunk: &PcmChunk) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let samples = match state.converter.convert(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(error = %e, "Dropping chunk that could not be converted");
                return;
            }
        };

        let pushed = state.producer.push_slice(&samples);
        if pushed < samples.len() {
            trace!(dropped = samples.len() - pushed, "Output buffer full");
        }
    }

    fn flush(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.converter.reset();
        self.flush_requested.store(true, Ordering::Release);
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

/// State shared between the sink and the audio callback
struct StreamShared {
    volume: Arc<Mutex<f32>>,
    flush_requested: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

fn start_stream(
    settings: &OutputSettings,
    shared: StreamShared,
) -> Result<(Stream, DeviceFormat, HeapProd<f32>), AudioError> {
    let device = select_output_device(settings.device.as_deref())?;
    let (config, sample_format) = best_output_config(&device)?;

    let format = DeviceFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels.max(1) as usize,
    };
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        format.sample_rate, format.channels, sample_format
    );

    let capacity = ring_capacity(format, settings.buffer);
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, consumer, shared)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, consumer, shared)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, consumer, shared)?,
        sample_format => {
            return Err(AudioError::Device(format!(
                "Unsupported sample format: {:?}",
                sample_format
            )));
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("Failed to start stream: {}", e)))?;

    Ok((stream, format, producer))
}

fn select_output_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let mut devices = host
            .output_devices()
            .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?;

        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok(device);
        }
        warn!("Requested device '{}' not found, falling back to default device", name);
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// Prefers 44.1kHz stereo f32, otherwise the device default
fn best_output_config(device: &Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let mut supported_configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::Device(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported_configs.find(|config| {
        config.channels() == 2
            && config.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
            && config.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
            && config.sample_format() == SampleFormat::F32
    });

    if let Some(supported_config) = preferred {
        let sample_format = supported_config.sample_format();
        let config = supported_config
            .with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE))
            .config();
        return Ok((config, sample_format));
    }

    let supported_config = device
        .default_output_config()
        .map_err(|e| AudioError::Device(format!("Failed to get default config: {}", e)))?;

    let sample_format = supported_config.sample_format();
    Ok((supported_config.config(), sample_format))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut consumer: HeapCons<f32>,
    shared: StreamShared,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let StreamShared {
        volume,
        flush_requested,
        error_count,
    } = shared;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if flush_requested.swap(false, Ordering::AcqRel) {
                    while consumer.try_pop().is_some() {}
                }

                let gain = *volume.lock().unwrap_or_else(PoisonError::into_inner);
                for sample in data.iter_mut() {
                    let value = consumer.try_pop().unwrap_or(0.0) * gain;
                    *sample = T::from_sample(value.clamp(-1.0, 1.0));
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                error_count.fetch_add(1, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::Stream(format!("Failed to build stream: {}", e)))
}

/// Interleaved samples needed to hold `buffer` of audio
fn ring_capacity(format: DeviceFormat, buffer: Duration) -> usize {
    let frames = (format.sample_rate as f64 * buffer.as_secs_f64()).ceil() as usize;
    (frames * format.channels).max(RESAMPLE_CHUNK_FRAMES * format.channels)
}

/// Converts decoded chunks to the device's layout
///
/// Resampler state persists across chunks of one clip so packet boundaries
/// stay seamless; [`FormatConverter::reset`] discards it between clips.
pub struct FormatConverter {
    target: DeviceFormat,
    resampler: Option<(u32, FastFixedIn<f32>)>,
    pending: Vec<Vec<f32>>,
}

impl FormatConverter {
    pub fn new(target: DeviceFormat) -> Self {
        Self {
            target,
            resampler: None,
            pending: Vec::new(),
        }
    }

    /// Convert one chunk to interleaved samples at the device rate
    ///
    /// While resampling, up to one block of input is held back until the
    /// next chunk arrives.
    pub fn convert(&mut self, chunk: &PcmChunk) -> Result<Vec<f32>, AudioError> {
        let channels = self.target.channels;
        let remixed = remix_channels(&chunk.samples, chunk.channels, channels);

        if chunk.sample_rate == self.target.sample_rate || chunk.sample_rate == 0 {
            self.reset();
            return Ok(remixed);
        }

        if self.resampler.as_ref().map(|(rate, _)| *rate) != Some(chunk.sample_rate) {
            debug!(
                "Resampling from {}Hz to {}Hz ({} channels)",
                chunk.sample_rate, self.target.sample_rate, channels
            );
            let ratio = self.target.sample_rate as f64 / chunk.sample_rate as f64;
            let resampler = FastFixedIn::<f32>::new(
                ratio,
                1.0,
                PolynomialDegree::Septic,
                RESAMPLE_CHUNK_FRAMES,
                channels,
            )
            .map_err(|e| AudioError::Resample(format!("Failed to create resampler: {}", e)))?;
            self.resampler = Some((chunk.sample_rate, resampler));
            self.pending = vec![Vec::new(); channels];
        }

        for (i, sample) in remixed.iter().enumerate() {
            self.pending[i % channels].push(*sample);
        }

        let mut output = Vec::new();
        if let Some((_, resampler)) = self.resampler.as_mut() {
            loop {
                let needed = resampler.input_frames_next();
                if self.pending[0].len() < needed {
                    break;
                }
                let block: Vec<Vec<f32>> = self
                    .pending
                    .iter_mut()
                    .map(|channel| channel.drain(..needed).collect())
                    .collect();
                let planar = resampler
                    .process(&block, None)
                    .map_err(|e| AudioError::Resample(e.to_string()))?;
                interleave_into(&planar, &mut output);
            }
        }

        Ok(output)
    }

    /// Drop resampler state and any held-back input
    pub fn reset(&mut self) {
        self.resampler = None;
        self.pending.clear();
    }
}

/// Map interleaved audio from `from` channels to `to` channels
///
/// Downmixing to mono averages; mono input is copied to every output
/// channel; otherwise channels map by index and extra outputs are silent.
pub fn remix_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
            continue;
        }
        for c in 0..to {
            let value = if from == 1 {
                frame[0]
            } else {
                frame.get(c).copied().unwrap_or(0.0)
            };
            out.push(value);
        }
    }
    out
}

fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    let Some(first) = planar.first() else {
        return;
    };
    out.reserve(first.len() * planar.len());
    for frame in 0..first.len() {
        for channel in planar {
            out.push(channel[frame]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: Vec<f32>, sample_rate: u32, channels: usize) -> PcmChunk {
        let frames = samples.len() / channels;
        PcmChunk {
            samples,
            sample_rate,
            channels,
            frames,
        }
    }

    #[test]
    fn test_list_devices() {
        // Headless CI has no sound server; either result is acceptable
        match list_output_devices() {
            Ok(devices) => println!("Found {} devices", devices.len()),
            Err(e) => println!("Device enumeration failed: {}", e),
        }
    }

    #[test]
    fn test_settings_from_config() {
        let config = AudioConfig {
            output_device: Some("USB Speakers".to_string()),
            volume: 0.25,
            ..AudioConfig::default()
        };
        let settings = OutputSettings::from(&config);
        assert_eq!(settings.device.as_deref(), Some("USB Speakers"));
        assert_eq!(settings.volume, 0.25);
        assert_eq!(settings.buffer, Duration::from_secs(2));
    }

    #[test]
    fn test_remix_mono_to_stereo_duplicates() {
        assert_eq!(remix_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remix_stereo_to_mono_averages() {
        assert_eq!(remix_channels(&[0.25, 0.75, -1.0, 1.0], 2, 1), vec![0.5, 0.0]);
    }

    #[test]
    fn test_remix_stereo_to_surround_pads_silence() {
        assert_eq!(
            remix_channels(&[0.5, -0.5], 2, 4),
            vec![0.5, -0.5, 0.0, 0.0]
        );
    }

    #[test]
    fn test_ring_capacity_covers_buffer() {
        let format = DeviceFormat {
            sample_rate: 48000,
            channels: 2,
        };
        assert_eq!(ring_capacity(format, Duration::from_secs(2)), 192_000);
        // Never smaller than one resampled block
        assert_eq!(ring_capacity(format, Duration::ZERO), 2048);
    }

    #[test]
    fn test_converter_passes_through_matching_rate() {
        let mut converter = FormatConverter::new(DeviceFormat {
            sample_rate: 44100,
            channels: 2,
        });
        let out = converter.convert(&chunk(vec![0.1, 0.2, 0.3], 44100, 1)).unwrap();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_converter_resamples_across_chunks() {
        let mut converter = FormatConverter::new(DeviceFormat {
            sample_rate: 48000,
            channels: 2,
        });

        // 1 second of 44.1kHz stereo in MP3-sized packets
        let mut produced = 0;
        for _ in 0..(44100 / 1152) {
            let out = converter
                .convert(&chunk(vec![0.25; 1152 * 2], 44100, 2))
                .unwrap();
            assert_eq!(out.len() % 2, 0);
            produced += out.len() / 2;
        }

        // Held-back input is at most one block
        let consumed = 44100 / 1152 * 1152;
        let expected = consumed as f64 * 48000.0 / 44100.0;
        let slack = RESAMPLE_CHUNK_FRAMES as f64 * 48000.0 / 44100.0 + 64.0;
        assert!((produced as f64) <= expected + 64.0);
        assert!((produced as f64) >= expected - slack);
    }

    #[test]
    fn test_converter_reset_discards_pending() {
        let mut converter = FormatConverter::new(DeviceFormat {
            sample_rate: 48000,
            channels: 1,
        });
        // Less than one block: everything is held back
        let out = converter.convert(&chunk(vec![0.5; 100], 44100, 1)).unwrap();
        assert!(out.is_empty());

        converter.reset();
        assert!(converter.resampler.is_none());
        assert!(converter.pending.is_empty());
    }
}
