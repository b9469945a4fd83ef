//! In-memory audio backends.
//!
//! `ScriptedMicrophone` replays a fixed recording every time it is opened (from samples
//! or a WAV file) and counts how often the device is held. `RecordingSpeaker` keeps every
//! clip it is asked to play and pretends each one lasts a fixed time.

use crate::audio::buffer::{decode_wav, resample, to_mono, PcmFormat};
use crate::audio::capture::{CaptureConstraints, InputStream, MicPermission, Microphone};
use crate::audio::playback::Speaker;
use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

pub struct ScriptedMicrophone {
    samples: Vec<i16>,
    source: PcmFormat,
    permission: Mutex<MicPermission>,
    queryable: bool,
    present: bool,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    /// A granted microphone that yields `samples` (16kHz mono) on every capture.
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            source: PcmFormat::default(),
            permission: Mutex::new(MicPermission::Granted),
            queryable: true,
            present: true,
            opens: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// No input device at all.
    pub fn missing() -> Self {
        Self {
            present: false,
            ..Self::new(Vec::new())
        }
    }

    /// Replay a WAV recording, converted to the capture format on open.
    pub fn from_wav_bytes(bytes: &[u8]) -> ClientResult<Self> {
        let (source, samples) = decode_wav(bytes).map_err(|e| match e {
            ClientError::Playback(msg) => ClientError::Device(msg),
            other => other,
        })?;
        Ok(Self {
            source,
            ..Self::new(samples)
        })
    }

    pub fn from_wav_file(path: &Path) -> ClientResult<Self> {
        let bytes = std::fs::read(path)?;
        let mic = Self::from_wav_bytes(&bytes)?;
        info!(
            path = %path.display(),
            sample_rate = mic.source.sample_rate,
            channels = mic.source.channels,
            "Loaded scripted microphone input"
        );
        Ok(mic)
    }

    pub fn with_permission(self, permission: MicPermission) -> Self {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = permission;
        self
    }

    /// Behave like a platform without a silent permission query.
    pub fn without_permission_query(mut self) -> Self {
        self.queryable = false;
        self
    }

    /// How many times the device was opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet released.
    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn current_permission(&self) -> MicPermission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(&self, constraints: &CaptureConstraints) -> Vec<i16> {
        let mono = to_mono(&self.samples, self.source.channels);
        let mono = resample(&mono, self.source.sample_rate, constraints.sample_rate);
        if constraints.channels <= 1 {
            return mono;
        }
        mono.iter()
            .flat_map(|&s| std::iter::repeat(s).take(constraints.channels as usize))
            .collect()
    }
}

#[async_trait]
impl Microphone for ScriptedMicrophone {
    async fn query_permission(&self) -> ClientResult<MicPermission> {
        if !self.queryable {
            return Err(ClientError::Unsupported(
                "permission query not available".to_string(),
            ));
        }
        Ok(self.current_permission())
    }

    async fn open(&self, constraints: &CaptureConstraints) -> ClientResult<Box<dyn InputStream>> {
        if !self.present {
            return Err(ClientError::Device("no microphone found".to_string()));
        }
        if self.current_permission() == MicPermission::Denied {
            return Err(ClientError::Permission("NotAllowedError".to_string()));
        }

        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = MicPermission::Granted;
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedStream {
            pending: self.render(constraints),
            live: Arc::clone(&self.live),
            released: false,
        }))
    }

    fn suppresses_noise(&self) -> bool {
        // Scripted input is already clean; leave it byte-for-byte
        true
    }
}

struct ScriptedStream {
    pending: Vec<i16>,
    live: Arc<AtomicUsize>,
    released: bool,
}

impl InputStream for ScriptedStream {
    fn drain(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.pending)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Speaker that records clips instead of playing them.
#[derive(Default)]
pub struct RecordingSpeaker {
    played: Mutex<Vec<Vec<u8>>>,
    duration: Duration,
    fail: bool,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every clip "plays" for `duration`.
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    /// Every clip fails to decode.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Speaker for RecordingSpeaker {
    async fn play(&self, payload: Vec<u8>) -> ClientResult<()> {
        if self.fail {
            return Err(ClientError::Playback("unsupported audio format".to_string()));
        }
        self.played
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
