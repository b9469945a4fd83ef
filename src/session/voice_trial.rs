//! # Voice Trial Session
//!
//! Push-to-talk courtroom session with AI judge, prosecutor and defense.
//!
//! ## Recording sub-machine:
//! ```text
//! Idle → Recording → Processing → Idle
//!            └── (payload too short) ──→ Idle
//! ```
//! - start is refused unless connected, permitted, idle and no agent is being played
//! - `processing` from the server means "still working" and changes nothing
//! - `agent_response`, `transcription` and `error` end the processing phase
//!
//! ## Indicators:
//! Thinking and speaking markers are kept apart from the recording state. A speaking
//! marker carries a generation number: playback completion clears it when the
//! generation matches, and a fallback timer clears it if playback never reports back.
//!
//! [`VoiceTrialSession`] is the pure state machine and queues [`VoiceEffect`]s.
//! [`VoiceTrialClient`] executes them: it plays audio, arms timers and forwards notices.

use crate::api::{Roster, TrialInfo};
use crate::audio::capture::{CaptureConstraints, CaptureEngine, MicPermission, Microphone};
use crate::audio::playback::{PlaybackEngine, PlaybackOutcome, Speaker};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{body_of, Envelope, TrialClientMessage, TrialServerMessage};
use crate::socket::{ConnectionState, ReconnectPolicy, SessionSocket, WeakSessionSocket};
use crate::state::ClientState;
use crate::transcript::{Message, RoleType, Transcript, TranscriptEvent};

use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Inbound message types handled on this channel.
pub const TRIAL_MESSAGE_TYPES: &[&str] = &[
    "connected",
    "user_message",
    "transcription",
    "agent_thinking",
    "agent_response",
    "synthesizing",
    "agent_audio",
    "processing",
    "trial_ended",
    "error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Processing,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordingState::Idle => "ready",
            RecordingState::Recording => "recording",
            RecordingState::Processing => "processing",
        };
        f.write_str(label)
    }
}

/// Why a push-to-talk press was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRefusal {
    NotConnected,
    PermissionNotGranted(MicPermission),
    PlaybackInFlight,
    Busy(RecordingState),
    TrialEnded,
}

impl fmt::Display for StartRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartRefusal::NotConnected => write!(f, "not connected"),
            StartRefusal::PermissionNotGranted(p) => write!(f, "microphone permission is {}", p),
            StartRefusal::PlaybackInFlight => write!(f, "an agent is speaking"),
            StartRefusal::Busy(state) => write!(f, "already {}", state),
            StartRefusal::TrialEnded => write!(f, "the trial has ended"),
        }
    }
}

/// Who is currently speaking, and which delivery put them there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakingMarker {
    /// `None` is an unscoped "an agent is speaking"
    pub role: Option<RoleType>,
    pub generation: u64,
}

/// Agents currently preparing a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkingMarkers {
    all: bool,
    roles: BTreeSet<RoleType>,
}

impl ThinkingMarkers {
    pub fn is_thinking(&self, role: RoleType) -> bool {
        self.all || self.roles.contains(&role)
    }

    pub fn any(&self) -> bool {
        self.all || !self.roles.is_empty()
    }

    /// An unscoped `agent_thinking` is active.
    pub fn is_unscoped(&self) -> bool {
        self.all
    }

    pub fn roles(&self) -> impl Iterator<Item = RoleType> + '_ {
        self.roles.iter().copied()
    }

    fn set(&mut self, role: Option<RoleType>) {
        match role {
            Some(role) => {
                self.roles.insert(role);
            }
            None => self.all = true,
        }
    }

    /// A response from `role` ends its own marker and any unscoped one.
    fn clear_for(&mut self, role: RoleType) -> bool {
        let had = self.is_thinking(role);
        self.roles.remove(&role);
        self.all = false;
        had
    }

    fn clear(&mut self) -> bool {
        let had = self.any();
        self.all = false;
        self.roles.clear();
        had
    }
}

/// Events for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceNotice {
    Connected { session_id: Option<String> },
    RecordingChanged(RecordingState),
    /// What the server heard; informational only, never a transcript entry
    Transcription(String),
    MessageCommitted(Message),
    ThinkingStarted(Option<RoleType>),
    ThinkingStopped(Option<RoleType>),
    SpeakingStarted(Option<RoleType>),
    SpeakingStopped(Option<RoleType>),
    /// Audio arrived while another clip was playing and was discarded
    AudioDropped(RoleType),
    PlaybackFailed(String),
    /// An `error` event, as `ClientError::ServerReported`
    ServerError(ClientError),
    TrialEnded,
}

/// Work the state machine asks its driver to do.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEffect {
    Notify(VoiceNotice),
    Play { payload: Vec<u8>, generation: u64 },
    ArmFallback { generation: u64 },
    Close,
}

/// Voice-trial state machine. Performs no IO.
#[derive(Debug)]
pub struct VoiceTrialSession {
    recording: RecordingState,
    thinking: ThinkingMarkers,
    speaking: Option<SpeakingMarker>,
    playing: Option<u64>,
    generation: u64,
    transcript: Transcript,
    min_payload_bytes: usize,
    ended: bool,
    server_session_id: Option<String>,
    effects: Vec<VoiceEffect>,
}

impl VoiceTrialSession {
    pub fn new(min_payload_bytes: usize) -> Self {
        Self::seeded(min_payload_bytes, Vec::new())
    }

    /// Start from messages the server already holds.
    pub fn seeded(min_payload_bytes: usize, messages: Vec<Message>) -> Self {
        Self {
            recording: RecordingState::Idle,
            thinking: ThinkingMarkers::default(),
            speaking: None,
            playing: None,
            generation: 0,
            transcript: Transcript::seeded(messages),
            min_payload_bytes,
            ended: false,
            server_session_id: None,
            effects: Vec::new(),
        }
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    pub fn thinking(&self) -> &ThinkingMarkers {
        &self.thinking
    }

    pub fn speaking(&self) -> Option<SpeakingMarker> {
        self.speaking
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn server_session_id(&self) -> Option<&str> {
        self.server_session_id.as_deref()
    }

    /// Drain the queued effects.
    pub fn take_effects(&mut self) -> Vec<VoiceEffect> {
        std::mem::take(&mut self.effects)
    }

    fn notify(&mut self, notice: VoiceNotice) {
        self.effects.push(VoiceEffect::Notify(notice));
    }

    fn set_recording(&mut self, state: RecordingState) {
        if self.recording != state {
            debug!(from = %self.recording, to = %state, "Recording state changed");
            self.recording = state;
            self.notify(VoiceNotice::RecordingChanged(state));
        }
    }

    /// Guard for a push-to-talk press.
    pub fn check_start(&self, connected: bool, permission: MicPermission) -> Result<(), StartRefusal> {
        if self.ended {
            return Err(StartRefusal::TrialEnded);
        }
        if !connected {
            return Err(StartRefusal::NotConnected);
        }
        if permission != MicPermission::Granted {
            return Err(StartRefusal::PermissionNotGranted(permission));
        }
        if self.playing.is_some() {
            return Err(StartRefusal::PlaybackInFlight);
        }
        if self.recording != RecordingState::Idle {
            return Err(StartRefusal::Busy(self.recording));
        }
        Ok(())
    }

    /// Check the guard and enter `Recording` in one step.
    pub fn try_begin_recording(
        &mut self,
        connected: bool,
        permission: MicPermission,
    ) -> Result<(), StartRefusal> {
        self.check_start(connected, permission)?;
        self.set_recording(RecordingState::Recording);
        Ok(())
    }

    /// Capture could not start or stop; back to `Idle`.
    pub fn abort_recording(&mut self) {
        if self.recording == RecordingState::Recording {
            self.set_recording(RecordingState::Idle);
        }
    }

    /// The push-to-talk key was released and the capture produced `payload`.
    ///
    /// Returns the message to submit, or `None` if the recording is too short to be
    /// anything but an accidental tap.
    pub fn finish_recording(&mut self, payload: &[u8]) -> Option<TrialClientMessage> {
        if self.recording != RecordingState::Recording {
            warn!(state = %self.recording, "finish_recording outside of Recording");
            return None;
        }

        if payload.len() < self.min_payload_bytes {
            info!(
                bytes = payload.len(),
                min = self.min_payload_bytes,
                "Recording too short, discarding"
            );
            self.set_recording(RecordingState::Idle);
            return None;
        }

        self.set_recording(RecordingState::Processing);
        Some(TrialClientMessage::Audio {
            audio: general_purpose::STANDARD.encode(payload),
        })
    }

    /// A submission never reached the socket.
    pub fn submission_failed(&mut self) {
        if self.recording == RecordingState::Processing {
            self.set_recording(RecordingState::Idle);
        }
    }

    /// Typed input instead of speech. Same guard as a recording, minus the microphone.
    pub fn compose_text(&mut self, text: &str, connected: bool) -> ClientResult<TrialClientMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::InvalidState("Message is empty".to_string()));
        }
        if self.ended {
            return Err(ClientError::InvalidState(StartRefusal::TrialEnded.to_string()));
        }
        if !connected {
            return Err(ClientError::InvalidState(StartRefusal::NotConnected.to_string()));
        }
        if self.recording != RecordingState::Idle {
            return Err(ClientError::InvalidState(
                StartRefusal::Busy(self.recording).to_string(),
            ));
        }
        self.set_recording(RecordingState::Processing);
        Ok(TrialClientMessage::Text {
            text: text.to_string(),
        })
    }

    pub fn compose_end_trial(&self) -> Option<TrialClientMessage> {
        if self.ended {
            None
        } else {
            Some(TrialClientMessage::EndTrial)
        }
    }

    /// Apply one inbound message.
    pub fn handle(&mut self, message: TrialServerMessage) {
        match message {
            TrialServerMessage::Connected { session_id } => {
                info!(session_id = ?session_id, "Trial session connected");
                self.server_session_id = session_id.clone();
                self.notify(VoiceNotice::Connected { session_id });
            }
            TrialServerMessage::UserMessage {
                content,
                text,
                timestamp,
            } => {
                let content = body_of(content, text);
                if let Some(message) = self
                    .transcript
                    .apply(TranscriptEvent::User { content, timestamp })
                    .cloned()
                {
                    self.notify(VoiceNotice::MessageCommitted(message));
                }
            }
            TrialServerMessage::Transcription { text } => {
                debug!(text = %text, "Transcription received");
                self.notify(VoiceNotice::Transcription(text));
                self.finish_processing();
            }
            TrialServerMessage::AgentThinking { role } => {
                self.thinking.set(role);
                self.notify(VoiceNotice::ThinkingStarted(role));
            }
            TrialServerMessage::AgentResponse {
                role,
                content,
                text,
                timestamp,
            } => {
                if self.thinking.clear_for(role) {
                    self.notify(VoiceNotice::ThinkingStopped(Some(role)));
                }
                let content = body_of(content, text);
                if let Some(message) = self
                    .transcript
                    .apply(TranscriptEvent::Agent {
                        role: Some(role),
                        content,
                        timestamp,
                    })
                    .cloned()
                {
                    self.notify(VoiceNotice::MessageCommitted(message));
                }
                self.finish_processing();
            }
            TrialServerMessage::Synthesizing { role } => {
                let generation = self.mark_speaking(role);
                self.effects.push(VoiceEffect::ArmFallback { generation });
            }
            TrialServerMessage::AgentAudio { role, audio, .. } => {
                self.receive_audio(role, &audio);
            }
            TrialServerMessage::Processing => {
                debug!(state = %self.recording, "Server still processing");
            }
            TrialServerMessage::TrialEnded => {
                info!("Trial ended by server");
                self.ended = true;
                if self.recording == RecordingState::Processing {
                    self.set_recording(RecordingState::Idle);
                }
                if self.thinking.clear() {
                    self.notify(VoiceNotice::ThinkingStopped(None));
                }
                self.notify(VoiceNotice::TrialEnded);
                self.effects.push(VoiceEffect::Close);
            }
            TrialServerMessage::Error { message } => {
                error!(message = %message, "Server reported error");
                if self.thinking.clear() {
                    self.notify(VoiceNotice::ThinkingStopped(None));
                }
                self.notify(VoiceNotice::ServerError(ClientError::ServerReported(message)));
                self.finish_processing();
            }
        }
    }

    fn finish_processing(&mut self) {
        if self.recording == RecordingState::Processing {
            self.set_recording(RecordingState::Idle);
        }
    }

    /// The channel came back after a drop. Replies owed to the old
    /// connection will not arrive, so pending turns are released.
    pub fn on_reconnect(&mut self) {
        if self.recording == RecordingState::Processing || self.thinking.any() {
            warn!(
                recording = ?self.recording,
                "Reconnected with a turn in flight, releasing it"
            );
        }
        if self.thinking.clear() {
            self.notify(VoiceNotice::ThinkingStopped(None));
        }
        self.finish_processing();
    }

    fn mark_speaking(&mut self, role: Option<RoleType>) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.speaking = Some(SpeakingMarker { role, generation });
        self.notify(VoiceNotice::SpeakingStarted(role));
        generation
    }

    fn receive_audio(&mut self, role: RoleType, audio: &str) {
        if self.playing.is_some() {
            warn!(role = %role, "Audio arrived during playback, dropping it");
            self.notify(VoiceNotice::AudioDropped(role));
            return;
        }

        let payload = match general_purpose::STANDARD.decode(audio) {
            Ok(payload) if !payload.is_empty() => payload,
            Ok(_) => {
                warn!(role = %role, "Empty audio payload");
                return;
            }
            Err(err) => {
                warn!(role = %role, error = %err, "Audio payload is not valid base64");
                self.notify(VoiceNotice::PlaybackFailed(format!(
                    "invalid audio from {}",
                    role
                )));
                return;
            }
        };

        let generation = self.mark_speaking(Some(role));
        self.playing = Some(generation);
        self.effects.push(VoiceEffect::Play {
            payload,
            generation,
        });
        self.effects.push(VoiceEffect::ArmFallback { generation });
    }

    /// Playback of the clip started for `generation` is over.
    pub fn playback_finished(&mut self, generation: u64, result: ClientResult<PlaybackOutcome>) {
        if self.playing == Some(generation) {
            self.playing = None;
        }
        if let Err(err) = result {
            warn!(generation, error = %err, "Playback failed");
            self.notify(VoiceNotice::PlaybackFailed(err.to_string()));
        }
        self.clear_speaking(generation);
    }

    /// The fallback timer for `generation` fired.
    pub fn fallback_elapsed(&mut self, generation: u64) {
        if self.playing == Some(generation) {
            debug!(generation, "Fallback elapsed during playback, keeping marker");
            return;
        }
        self.clear_speaking(generation);
    }

    fn clear_speaking(&mut self, generation: u64) {
        if let Some(marker) = self.speaking {
            if marker.generation == generation {
                self.speaking = None;
                self.notify(VoiceNotice::SpeakingStopped(marker.role));
            }
        }
    }
}

fn lock(session: &Mutex<VoiceTrialSession>) -> MutexGuard<'_, VoiceTrialSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes queued effects: notices, playback, fallback timers, teardown.
#[derive(Clone)]
struct EffectDriver {
    session: Arc<Mutex<VoiceTrialSession>>,
    playback: PlaybackEngine,
    notices: mpsc::UnboundedSender<VoiceNotice>,
    fallback: Duration,
    socket: WeakSessionSocket,
}

impl EffectDriver {
    fn drain(&self) {
        let effects = lock(&self.session).take_effects();
        self.run(effects);
    }

    fn run(&self, effects: Vec<VoiceEffect>) {
        for effect in effects {
            match effect {
                VoiceEffect::Notify(notice) => {
                    let _ = self.notices.send(notice);
                }
                VoiceEffect::Play {
                    payload,
                    generation,
                } => match self.playback.try_reserve() {
                    Some(slot) => {
                        let driver = self.clone();
                        tokio::spawn(async move {
                            let result = slot.play(payload).await;
                            lock(&driver.session).playback_finished(generation, result);
                            driver.drain();
                        });
                    }
                    None => {
                        warn!(generation, "Speaker busy, dropping clip");
                        lock(&self.session).playback_finished(generation, Ok(PlaybackOutcome::Dropped));
                        self.drain();
                    }
                },
                VoiceEffect::ArmFallback { generation } => {
                    let driver = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(driver.fallback).await;
                        lock(&driver.session).fallback_elapsed(generation);
                        driver.drain();
                    });
                }
                VoiceEffect::Close => {
                    if let Some(socket) = self.socket.upgrade() {
                        socket.close();
                    }
                }
            }
        }
    }
}

/// Platform audio for one trial.
#[derive(Clone)]
pub struct AudioDevices {
    pub microphone: Arc<dyn Microphone>,
    pub speaker: Arc<dyn Speaker>,
}

/// What happened to a push-to-talk release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Not recording; nothing to stop
    Refused,
    /// Shorter than the minimum; discarded without sending
    TooShort,
    /// Sent; waiting for the server
    Submitted,
    /// The socket closed before the audio could be sent
    NotSent,
}

/// A connected voice trial.
pub struct VoiceTrialClient {
    session_id: String,
    socket: SessionSocket,
    session: Arc<Mutex<VoiceTrialSession>>,
    capture: tokio::sync::Mutex<CaptureEngine>,
    driver: EffectDriver,
    roster: Roster,
}

impl VoiceTrialClient {
    /// Open `/ws/trial/{session_id}`.
    ///
    /// `seed` (from `GET /api/trial/{id}`) provides the roster and the transcript so far.
    pub async fn connect(
        state: &ClientState,
        session_id: &str,
        devices: AudioDevices,
        seed: Option<TrialInfo>,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<VoiceNotice>)> {
        let config = state.get_config();
        let (agents, messages) = match seed {
            Some(info) => (info.agents, info.messages),
            None => (Vec::new(), Vec::new()),
        };

        let socket = SessionSocket::new(
            config.trial_url(session_id),
            ReconnectPolicy::from_config(&config.connection),
            state.clone(),
        );
        let session = Arc::new(Mutex::new(VoiceTrialSession::seeded(
            config.audio.min_payload_bytes,
            messages,
        )));
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let driver = EffectDriver {
            session: Arc::clone(&session),
            playback: PlaybackEngine::new(devices.speaker),
            notices: notice_tx,
            fallback: config.audio.speaking_fallback(),
            socket: socket.downgrade(),
        };

        for &kind in TRIAL_MESSAGE_TYPES {
            let driver = driver.clone();
            socket.on(kind, move |envelope: &Envelope| {
                let message = match envelope.decode::<TrialServerMessage>() {
                    Ok(message) => message,
                    Err(err) => {
                        error!(error = %err, "Dropping undecodable message");
                        return;
                    }
                };
                lock(&driver.session).handle(message);
                driver.drain();
            });
        }

        socket.on_any(|envelope: &Envelope| {
            if !TRIAL_MESSAGE_TYPES.contains(&envelope.kind.as_str()) {
                warn!(message_type = %envelope.kind, "Unhandled message type");
            }
        });

        {
            let driver = driver.clone();
            socket.on_reconnect(move |attempt, _outbox| {
                info!(attempt, "Trial channel reconnected");
                lock(&driver.session).on_reconnect();
                driver.drain();
            });
        }

        let mut capture = CaptureEngine::new(
            devices.microphone,
            CaptureConstraints::from_config(&config.audio),
        );
        let permission = capture.check_permission().await;
        info!(permission = %permission, "Microphone permission checked");

        socket.connect().await?;
        info!(session_id = %session_id, agents = agents.len(), "Trial connected");

        Ok((
            Self {
                session_id: session_id.to_string(),
                socket,
                session,
                capture: tokio::sync::Mutex::new(capture),
                driver,
                roster: Roster::new(agents),
            },
            notice_rx,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn permission(&self) -> MicPermission {
        self.capture.lock().await.permission()
    }

    pub async fn check_permission(&self) -> MicPermission {
        self.capture.lock().await.check_permission().await
    }

    pub async fn request_permission(&self) -> ClientResult<MicPermission> {
        self.capture.lock().await.request_permission().await
    }

    /// Push-to-talk press. Returns `Ok(false)` if the press was refused.
    ///
    /// Capture failures (denied, no device) are returned so the UI can explain them.
    pub async fn request_start(&self) -> ClientResult<bool> {
        let mut capture = self.capture.lock().await;

        let begun = lock(&self.session)
            .try_begin_recording(self.socket.is_connected(), capture.permission());
        self.driver.drain();
        if let Err(refusal) = begun {
            info!(reason = %refusal, "Recording start refused");
            return Ok(false);
        }

        if let Err(err) = capture.start().await {
            lock(&self.session).abort_recording();
            self.driver.drain();
            return Err(err);
        }
        Ok(true)
    }

    /// Push-to-talk release.
    pub async fn request_stop(&self) -> ClientResult<StopOutcome> {
        let mut capture = self.capture.lock().await;

        if lock(&self.session).recording() != RecordingState::Recording {
            info!("Recording stop refused, not recording");
            return Ok(StopOutcome::Refused);
        }

        let payload = match capture.stop().await {
            Ok(payload) => payload,
            Err(err) => {
                lock(&self.session).abort_recording();
                self.driver.drain();
                return Err(err);
            }
        };

        let message = lock(&self.session).finish_recording(&payload);
        self.driver.drain();
        let Some(message) = message else {
            return Ok(StopOutcome::TooShort);
        };

        if !self.socket.send(&message) {
            lock(&self.session).submission_failed();
            self.driver.drain();
            return Ok(StopOutcome::NotSent);
        }

        info!(bytes = payload.len(), "Audio submitted");
        Ok(StopOutcome::Submitted)
    }

    /// Typed input instead of speech.
    pub fn send_text(&self, text: &str) -> ClientResult<()> {
        let message = lock(&self.session).compose_text(text, self.socket.is_connected());
        self.driver.drain();
        let message = message?;

        if !self.socket.send(&message) {
            lock(&self.session).submission_failed();
            self.driver.drain();
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        Ok(())
    }

    /// Ask the server to end the trial. The channel closes when `trial_ended` arrives.
    pub fn end_trial(&self) -> ClientResult<()> {
        let message = lock(&self.session)
            .compose_end_trial()
            .ok_or_else(|| ClientError::InvalidState("The trial has already ended".to_string()))?;
        if !self.socket.send(&message) {
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        info!(session_id = %self.session_id, "End of trial requested");
        Ok(())
    }

    pub fn recording_state(&self) -> RecordingState {
        lock(&self.session).recording()
    }

    pub fn thinking(&self) -> ThinkingMarkers {
        lock(&self.session).thinking().clone()
    }

    pub fn speaking(&self) -> Option<SpeakingMarker> {
        lock(&self.session).speaking()
    }

    /// Label for the speaking indicator, e.g. "Judge Harper".
    pub fn speaker_label(&self, role: Option<RoleType>) -> String {
        self.roster.display_name(role)
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.session).transcript().messages().to_vec()
    }

    pub fn has_ended(&self) -> bool {
        lock(&self.session).has_ended()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.state()
    }

    pub fn gave_up(&self) -> bool {
        self.socket.gave_up()
    }

    pub fn close(&self) {
        self.socket.close();
    }
}

impl Drop for VoiceTrialClient {
    fn drop(&mut self) {
        self.socket.close();
    }
}
