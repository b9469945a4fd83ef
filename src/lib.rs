//! # Trial Session Client
//!
//! Real-time client for the mock trial simulator: a fact-gathering text chat and a
//! push-to-talk voice trial, both over reconnecting WebSocket channels.
//!
//! ## Module Organization:
//! - `socket`: reconnecting JSON channel with typed and wildcard handlers
//! - `protocol`: wire messages for both channels
//! - `session`: the fact-gathering and voice-trial state machines and clients
//! - `transcript`: append-only message list and its reducer
//! - `audio`: capture and playback engines with in-memory backends
//! - `api`: REST calls at session boundaries
//! - `config` / `error` / `state`: configuration, error taxonomy, shared metrics
//! - `device` (feature `device`): cpal microphone and speaker

pub mod api;
pub mod audio;
pub mod config;
#[cfg(feature = "device")]
pub mod device;
pub mod error;
pub mod protocol;
pub mod session;
pub mod socket;
pub mod state;
pub mod transcript;
