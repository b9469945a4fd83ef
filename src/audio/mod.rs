//! # Audio Module
//!
//! Push-to-talk capture and agent-speech playback for the voice trial.
//!
//! ## Key Components:
//! - **Capture Engine**: exclusive microphone ownership between press and release
//! - **Capture Buffer**: bounded PCM accumulation and WAV encoding
//! - **Speech Filter**: software cleanup when the platform doesn't do it
//! - **Playback Engine**: one agent clip at a time, duplicates dropped
//! - **Memory backends**: scripted microphone and recording speaker
//!
//! ## Capture Format:
//! - **Sample Rate**: 16kHz target
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//! - **Container**: WAV (`audio/wav`), base64-encoded on the wire

pub mod buffer;
pub mod capture;
pub mod memory;
pub mod playback;
pub mod processor;

pub use capture::{CaptureConstraints, CaptureEngine, InputStream, MicPermission, Microphone};
pub use playback::{PlaybackEngine, PlaybackOutcome, Speaker};
