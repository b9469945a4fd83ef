//! # Platform Audio Devices
//!
//! cpal-backed [`Microphone`] and [`Speaker`], enabled with the `device` feature.
//!
//! ## Threading:
//! cpal streams are not `Send` on every platform, so each stream lives on its own OS
//! thread for its whole life. The microphone thread writes into a shared
//! [`CaptureBuffer`] and exits when the capture is released; the speaker decodes and
//! plays inside `spawn_blocking`.
//!
//! ## Formats:
//! Input is captured at the device's native rate and channel count, then downmixed and
//! resampled to the requested format in the callback. Agent clips (mp3 or wav) are
//! decoded with symphonia and resampled to the output device's native rate.

use crate::audio::buffer::{f32_to_i16, CaptureBuffer};
use crate::audio::capture::{CaptureConstraints, InputStream, MicPermission, Microphone};
use crate::audio::playback::Speaker;
use crate::error::{ClientError, ClientResult};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::io::Cursor;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into())
}

fn select_input(name: Option<&str>) -> ClientResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .input_devices()
            .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ClientError::Device(format!("input device '{name}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| ClientError::Device("no default input device".into())),
    }
}

fn select_output(name: Option<&str>) -> ClientResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| ClientError::Unsupported(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ClientError::Playback(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| ClientError::Playback("no default output device".into())),
    }
}

/// Names of the available input devices.
pub fn list_input_devices() -> ClientResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| ClientError::Device(format!("cannot enumerate devices: {e}")))?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

/// Names of the available output devices.
pub fn list_output_devices() -> ClientResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| ClientError::Playback(format!("cannot enumerate devices: {e}")))?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

/// Stream-building failures that look like an OS privacy refusal become `Permission`.
fn classify_open_error(message: String) -> ClientError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed") {
        ClientError::Permission(message)
    } else {
        ClientError::Device(message)
    }
}

/// System microphone.
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    /// `device_name` empty or `None` selects the platform default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name: device_name.filter(|name| !name.is_empty()),
        }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn query_permission(&self) -> ClientResult<MicPermission> {
        // cpal exposes no silent permission query; the OS asks on first open
        Err(ClientError::Unsupported(
            "no permission query for native audio hosts".to_string(),
        ))
    }

    async fn open(&self, constraints: &CaptureConstraints) -> ClientResult<Box<dyn InputStream>> {
        let buffer = CaptureBuffer::new(constraints.format(), constraints.max_recording_ms);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let name = self.device_name.clone();
        let target_rate = constraints.sample_rate;
        let target_channels = constraints.channels;
        let thread_buffer = buffer.clone();

        std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match build_input_stream(
                    name.as_deref(),
                    target_rate,
                    target_channels,
                    thread_buffer,
                ) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until released (or the handle is dropped)
                let _ = stop_rx.recv();
                drop(stream);
                info!("audio capture stopped");
            })
            .map_err(|e| ClientError::Device(format!("cannot spawn capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| ClientError::Device("capture thread exited".to_string()))??;

        Ok(Box::new(CpalInputStream {
            buffer,
            stop: Some(stop_tx),
        }))
    }
}

fn build_input_stream(
    name: Option<&str>,
    target_rate: u32,
    target_channels: u16,
    buffer: CaptureBuffer,
) -> ClientResult<cpal::Stream> {
    let device = select_input(name)?;
    info!("using input device: {}", device_name(&device));

    let default_config = device
        .default_input_config()
        .map_err(|e| classify_open_error(format!("no default input config: {e}")))?;
    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();

    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, native_channels);
                let resampled = resample(&mono, native_rate, target_rate);
                let samples: Vec<i16> = resampled
                    .iter()
                    .flat_map(|&s| std::iter::repeat(f32_to_i16(s)).take(target_channels as usize))
                    .collect();
                buffer.push_samples(&samples);
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| classify_open_error(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| classify_open_error(format!("failed to start input stream: {e}")))?;

    info!(
        "audio capture started: native {}Hz/{}ch -> target {}Hz",
        native_rate, native_channels, target_rate
    );
    Ok(stream)
}

struct CpalInputStream {
    buffer: CaptureBuffer,
    stop: Option<std_mpsc::Sender<()>>,
}

impl InputStream for CpalInputStream {
    fn drain(&mut self) -> Vec<i16> {
        self.buffer.take()
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
            debug!("capture release requested");
        }
    }
}

/// System speaker.
pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name: device_name.filter(|name| !name.is_empty()),
        }
    }
}

#[async_trait]
impl Speaker for CpalSpeaker {
    async fn play(&self, payload: Vec<u8>) -> ClientResult<()> {
        let name = self.device_name.clone();
        tokio::task::spawn_blocking(move || {
            let clip = decode_clip(payload)?;
            play_blocking(name.as_deref(), &clip)
        })
        .await
        .map_err(|e| ClientError::Playback(format!("playback task failed: {e}")))?
    }
}

/// Decoded mono clip.
struct Clip {
    samples: Vec<f32>,
    sample_rate: u32,
}

fn decode_clip(payload: Vec<u8>) -> ClientResult<Clip> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mut hint = Hint::new();
    hint.with_extension(if payload.starts_with(b"RIFF") { "wav" } else { "mp3" });

    let mss = MediaSourceStream::new(Box::new(Cursor::new(payload)), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ClientError::Playback(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ClientError::Playback("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| ClientError::Playback("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ClientError::Playback(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ClientError::Playback(format!("audio read error: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(ClientError::Playback(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = (frames as usize).saturating_mul(channels);

        if sample_buf.as_ref().map_or(true, |b| b.capacity() < required) {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);

        out.extend(to_mono(buf.samples(), channels as u16));
    }

    Ok(Clip {
        samples: out,
        sample_rate,
    })
}

struct PlaybackCursor {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

fn play_blocking(name: Option<&str>, clip: &Clip) -> ClientResult<()> {
    let device = select_output(name)?;
    let default_config = device
        .default_output_config()
        .map_err(|e| ClientError::Playback(format!("no default output config: {e}")))?;
    let native_rate = default_config.sample_rate();
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let cursor = Arc::new(Mutex::new(PlaybackCursor {
        samples: resample(&clip.samples, clip.sample_rate, native_rate),
        position: 0,
        finished: false,
    }));
    let callback_cursor = Arc::clone(&cursor);
    let ch = channels as usize;

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut cur = match callback_cursor.lock() {
                    Ok(c) => c,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(ch) {
                    let value = if cur.position < cur.samples.len() {
                        let v = cur.samples[cur.position];
                        cur.position += 1;
                        v
                    } else {
                        cur.finished = true;
                        0.0
                    };
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| ClientError::Playback(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ClientError::Playback(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(Duration::from_millis(10));
        let cur = cursor
            .lock()
            .map_err(|e| ClientError::Playback(format!("playback buffer lock poisoned: {e}")))?;
        if cur.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

/// Average interleaved channels into one.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Linear-interpolation resampler.
fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || src_rate == 0 || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] as f64 * (1.0 - frac) + samples[idx + 1] as f64 * frac
        } else {
            samples[idx.min(samples.len() - 1)] as f64
        };
        output.push(sample as f32);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{encode_wav, PcmFormat};

    #[test]
    fn test_wav_clip_decodes_to_mono() {
        let stereo: Vec<i16> = (0..2000).map(|i| ((i % 50) * 100) as i16).collect();
        let wav = encode_wav(
            &stereo,
            PcmFormat {
                sample_rate: 22050,
                channels: 2,
            },
        )
        .unwrap();

        let clip = decode_clip(wav).unwrap();
        assert_eq!(clip.sample_rate, 22050);
        assert_eq!(clip.samples.len(), 1000);
    }

    #[test]
    fn test_garbage_clip_is_playback_error() {
        let result = decode_clip(vec![0u8; 64]);
        assert!(matches!(result, Err(ClientError::Playback(_))));
    }

    #[test]
    fn test_open_error_classification() {
        assert!(matches!(
            classify_open_error("Permission denied by user".into()),
            ClientError::Permission(_)
        ));
        assert!(matches!(
            classify_open_error("device busy".into()),
            ClientError::Device(_)
        ));
    }
}
