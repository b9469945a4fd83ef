//! # Audio Capture Engine
//!
//! Push-to-talk microphone capture. The engine owns the microphone exclusively between
//! `start()` and `stop()`, and always gives it back: the active stream is released when the
//! capture is dropped, so an error half-way through `stop()` cannot leak the device.
//!
//! The platform side sits behind the [`Microphone`] trait. `device::CpalMicrophone` talks to
//! real hardware; `memory::ScriptedMicrophone` replays fixed samples for tests and headless runs.

use crate::audio::buffer::{encode_wav, PcmFormat};
use crate::audio::processor::SpeechFilter;
use crate::config::AudioConfig;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Microphone permission as the client tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicPermission {
    /// Not decided yet; starting a capture will ask
    Prompt,
    Granted,
    Denied,
}

impl fmt::Display for MicPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MicPermission::Prompt => "prompt",
            MicPermission::Granted => "granted",
            MicPermission::Denied => "denied",
        };
        f.write_str(label)
    }
}

/// What the capture asks of the device.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub max_recording_ms: u32,
}

impl CaptureConstraints {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            max_recording_ms: config.max_recording_ms,
        }
    }

    pub fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from_config(&crate::config::AppConfig::default().audio)
    }
}

/// A platform microphone.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Ask the platform for the current permission without prompting.
    ///
    /// Platforms that cannot answer return `ClientError::Unsupported`.
    async fn query_permission(&self) -> ClientResult<MicPermission>;

    /// Acquire the device and start capturing in the requested format.
    ///
    /// Fails with `Permission`, `Device` or `Unsupported`.
    async fn open(&self, constraints: &CaptureConstraints) -> ClientResult<Box<dyn InputStream>>;

    /// Whether the platform already applies its own noise suppression.
    fn suppresses_noise(&self) -> bool {
        false
    }
}

/// A live capture stream. Samples are already in the requested format.
pub trait InputStream: Send {
    /// Everything captured since the previous call.
    fn drain(&mut self) -> Vec<i16>;

    /// Stop every track and give the device back. Must be idempotent.
    fn release(&mut self);
}

struct ActiveCapture {
    stream: Box<dyn InputStream>,
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        self.stream.release();
    }
}

/// Push-to-talk capture over one [`Microphone`].
///
/// At most one capture is active. The caller's state machine decides when `start()` is
/// allowed; the engine only refuses to stack a second capture on top of the first.
pub struct CaptureEngine {
    microphone: Arc<dyn Microphone>,
    constraints: CaptureConstraints,
    permission: MicPermission,
    active: Option<ActiveCapture>,
}

impl CaptureEngine {
    pub fn new(microphone: Arc<dyn Microphone>, constraints: CaptureConstraints) -> Self {
        Self {
            microphone,
            constraints,
            permission: MicPermission::Prompt,
            active: None,
        }
    }

    /// Last known permission (updated by checks, requests and captures).
    pub fn permission(&self) -> MicPermission {
        self.permission
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Query permission without prompting.
    ///
    /// Returns `Granted` or `Prompt` only: a platform that reports `Denied`, can't answer,
    /// or errors is treated as `Prompt` so the user still gets an explicit request.
    pub async fn check_permission(&mut self) -> MicPermission {
        let permission = match self.microphone.query_permission().await {
            Ok(MicPermission::Granted) => MicPermission::Granted,
            Ok(other) => {
                debug!(reported = %other, "Microphone permission not granted yet");
                MicPermission::Prompt
            }
            Err(err) => {
                debug!(error = %err, "Permission query unavailable, assuming prompt");
                MicPermission::Prompt
            }
        };
        self.permission = permission;
        permission
    }

    /// Explicitly ask for access by opening and immediately releasing the device.
    pub async fn request_permission(&mut self) -> ClientResult<MicPermission> {
        if self.active.is_some() {
            self.permission = MicPermission::Granted;
            return Ok(self.permission);
        }

        match self.microphone.open(&self.constraints).await {
            Ok(stream) => {
                drop(ActiveCapture { stream });
                self.permission = MicPermission::Granted;
                info!("Microphone permission granted");
                Ok(self.permission)
            }
            Err(err) => {
                if matches!(err, ClientError::Permission(_)) {
                    self.permission = MicPermission::Denied;
                }
                warn!(error = %err, "Microphone permission request failed");
                Err(err)
            }
        }
    }

    /// Acquire the microphone and begin buffering.
    pub async fn start(&mut self) -> ClientResult<()> {
        if self.active.is_some() {
            warn!("Capture already active, ignoring start");
            return Ok(());
        }

        match self.microphone.open(&self.constraints).await {
            Ok(stream) => {
                self.permission = MicPermission::Granted;
                self.active = Some(ActiveCapture { stream });
                info!(
                    sample_rate = self.constraints.sample_rate,
                    channels = self.constraints.channels,
                    "Recording started"
                );
                Ok(())
            }
            Err(err) => {
                if matches!(err, ClientError::Permission(_)) {
                    self.permission = MicPermission::Denied;
                }
                warn!(error = %err, "Could not start recording");
                Err(err)
            }
        }
    }

    /// Finish the capture, release the device and return the encoded WAV payload.
    pub async fn stop(&mut self) -> ClientResult<Vec<u8>> {
        let mut capture = self.active.take().ok_or(ClientError::NotStarted)?;
        let mut samples = capture.stream.drain();
        // Release before encoding; the device is free even if encoding fails
        drop(capture);

        let max_samples = (self.constraints.max_recording_ms as usize
            * self.constraints.sample_rate as usize
            * self.constraints.channels as usize)
            / 1000;
        if samples.len() > max_samples {
            let excess = samples.len() - max_samples;
            samples.drain(..excess);
        }

        if !self.microphone.suppresses_noise() {
            SpeechFilter::new(self.constraints.noise_suppression).apply(&mut samples);
        }

        let payload = encode_wav(&samples, self.constraints.format())?;
        info!(
            samples = samples.len(),
            bytes = payload.len(),
            "Recording stopped"
        );
        Ok(payload)
    }
}
