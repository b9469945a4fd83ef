//! # Capture Buffer
//!
//! Accumulates microphone samples between push-to-talk press and release, and turns them
//! into the single WAV payload sent to the trial server.
//!
//! ## Key Features:
//! - **Bounded**: keeps at most `max_recording_ms` of audio; the oldest samples are dropped
//! - **Thread safety**: device callbacks write from the audio thread while the engine drains
//!   from the async side, so the samples live behind `Arc<Mutex<VecDeque<i16>>>`
//! - **Format**: 16-bit signed PCM, little-endian on the wire, wrapped in a RIFF/WAV header

use crate::error::{ClientError, ClientResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Format of the samples held by a [`CaptureBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Shared, bounded sample store for one capture.
///
/// Cloning is cheap and every clone writes into the same samples, which is how a device
/// callback and the capture engine share one recording.
#[derive(Debug, Clone)]
pub struct CaptureBuffer {
    samples: Arc<Mutex<VecDeque<i16>>>,
    format: PcmFormat,
    max_samples: usize,
}

impl CaptureBuffer {
    /// ## Calculation:
    /// max_samples = max_duration_ms * sample_rate * channels / 1000
    ///
    /// For two minutes of 16kHz mono: 120_000 * 16000 / 1000 = 1,920,000 samples
    pub fn new(format: PcmFormat, max_duration_ms: u32) -> Self {
        let max_samples = (max_duration_ms as usize
            * format.sample_rate as usize
            * format.channels as usize)
            / 1000;

        Self {
            samples: Arc::new(Mutex::new(VecDeque::new())),
            format,
            max_samples: max_samples.max(1),
        }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append samples, discarding the oldest once the buffer is full.
    pub fn push_samples(&self, samples: &[i16]) {
        let mut buffer = self.lock();
        buffer.extend(samples.iter().copied());

        let overflow = buffer.len().saturating_sub(self.max_samples);
        if overflow > 0 {
            buffer.drain(..overflow);
        }
    }

    /// Append normalized float samples (`[-1.0, 1.0]`), as delivered by most audio hosts.
    pub fn push_f32(&self, samples: &[f32]) {
        let converted: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        self.push_samples(&converted);
    }

    /// Append raw little-endian 16-bit PCM bytes.
    ///
    /// ## Rust Concepts:
    /// - **Cursor**: reads from a byte slice as if it were a file
    /// - **while let Ok(...)**: keeps reading until the bytes run out
    pub fn push_pcm_bytes(&self, data: &[u8]) -> ClientResult<()> {
        if data.len() % 2 != 0 {
            return Err(ClientError::Device(
                "PCM data length must be even for 16-bit samples".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        self.push_samples(&samples);
        Ok(())
    }

    /// Remove and return everything captured so far.
    pub fn take(&self) -> Vec<i16> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Duration of audio currently held, in seconds.
    pub fn duration_seconds(&self) -> f64 {
        let frames = self.len() / self.format.channels.max(1) as usize;
        frames as f64 / self.format.sample_rate as f64
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Scale a float sample into the 16-bit range.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Wrap 16-bit PCM samples in a WAV container.
pub fn encode_wav(samples: &[i16], format: PcmFormat) -> ClientResult<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, format.channels, format.sample_rate, 16);
    let track = wav::BitDepth::Sixteen(samples.to_vec());

    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &track, &mut cursor)
        .map_err(|e| ClientError::Device(format!("failed to encode WAV: {}", e)))?;
    Ok(cursor.into_inner())
}

/// Read a WAV payload back into 16-bit samples and their format.
///
/// 8-bit, 24-bit and float WAVs are converted to 16-bit.
pub fn decode_wav(bytes: &[u8]) -> ClientResult<(PcmFormat, Vec<i16>)> {
    let mut cursor = Cursor::new(bytes);
    let (header, data) = wav::read(&mut cursor)
        .map_err(|e| ClientError::Playback(format!("invalid WAV data: {}", e)))?;

    let samples = match data {
        wav::BitDepth::Sixteen(samples) => samples,
        wav::BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| ((s as i16) - 128) << 8)
            .collect(),
        wav::BitDepth::TwentyFour(samples) => {
            samples.into_iter().map(|s| (s >> 8) as i16).collect()
        }
        wav::BitDepth::ThirtyTwoFloat(samples) => {
            samples.into_iter().map(f32_to_i16).collect()
        }
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok((
        PcmFormat {
            sample_rate: header.sampling_rate,
            channels: header.channel_count,
        },
        samples,
    ))
}

/// Average interleaved channels into one.
pub fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / ch as i32) as i16)
        .collect()
}

/// Linear-interpolation resampler. Adequate for speech.
pub fn resample(samples: &[i16], src_rate: u32, dst_rate: u32) -> Vec<i16> {
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
        output.push(sample.round() as i16);
    }

    output
}
