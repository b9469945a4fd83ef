//! # Session Clients
//!
//! The two real-time channels a user passes through:
//! - **Fact gathering**: text chat with the intake flow (`/ws/fact-gathering/{id}`)
//! - **Voice trial**: push-to-talk courtroom session (`/ws/trial/{id}`)
//!
//! Each module has a pure state machine (unit-testable, no IO) and an async client that
//! binds it to a [`crate::socket::SessionSocket`].

pub mod fact_gathering;
pub mod voice_trial;

pub use fact_gathering::{FactGatheringClient, FactGatheringSession, FactNotice, FactPhase};
pub use voice_trial::{
    AudioDevices, RecordingState, StopOutcome, VoiceNotice, VoiceTrialClient, VoiceTrialSession,
};
