//! # Fact-Gathering Session
//!
//! Text chat with the server-driven intake flow.
//!
//! ## Phases:
//! ```text
//! Init → Connecting → AwaitingServerAck → Idle ⇄ StreamingResponse
//!                                           └──────────→ Complete
//! ```
//! - `initialize` goes out once per connection, as soon as the socket opens
//! - the assistant's reply arrives as `streaming_start`, several `ai_message` fragments and
//!   then `awaiting_input` (more to come) or `flow_complete` (done)
//! - the user may only type while `Idle`; sending moves back to `AwaitingServerAck`
//!
//! [`FactGatheringSession`] is the pure state machine. [`FactGatheringClient`] wires it to a
//! [`SessionSocket`] and forwards [`FactNotice`]s to the UI.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Envelope, FactClientMessage, FactServerMessage};
use crate::socket::{ConnectionState, ReconnectPolicy, SessionSocket};
use crate::state::ClientState;
use crate::transcript::{Message, Transcript, TranscriptEvent};

use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Inbound message types handled on this channel.
pub const FACT_MESSAGE_TYPES: &[&str] = &[
    "connected",
    "conversation_created",
    "user_message",
    "streaming_start",
    "ai_message",
    "streaming_end",
    "awaiting_input",
    "flow_complete",
    "file_uploaded",
    "error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactPhase {
    Init,
    Connecting,
    AwaitingServerAck,
    Idle,
    StreamingResponse,
    Complete,
}

impl fmt::Display for FactPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FactPhase::Init => "init",
            FactPhase::Connecting => "connecting",
            FactPhase::AwaitingServerAck => "awaiting server",
            FactPhase::Idle => "idle",
            FactPhase::StreamingResponse => "streaming",
            FactPhase::Complete => "complete",
        };
        f.write_str(label)
    }
}

/// The assistant reply currently being streamed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingBuffer {
    text: String,
    fragments: usize,
}

impl StreamingBuffer {
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Things the UI has to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum FactNotice {
    /// The server created the conversation the trial will later be built from
    ConversationCreated(String),
    /// A message was committed to the transcript
    MessageCommitted(Message),
    /// The assistant finished its turn; the user may type again
    AwaitingInput { execution_id: Option<String> },
    /// The flow is over; the trial can be started
    FlowComplete,
    FileUploaded {
        filename: String,
        resource_id: Option<String>,
        size: Option<u64>,
    },
    /// An `error` event, as `ClientError::ServerReported`
    ServerError(ClientError),
    /// The connection dropped and came back; the flow may need restarting
    SessionInterrupted,
}

/// Fact-gathering state machine. Performs no IO.
#[derive(Debug)]
pub struct FactGatheringSession {
    flow_id: String,
    phase: FactPhase,
    streaming: Option<StreamingBuffer>,
    transcript: Transcript,
    initialized: bool,
    reinitialize_on_reconnect: bool,
    conversation_id: Option<String>,
    execution_id: Option<String>,
    server_session_id: Option<String>,
}

impl FactGatheringSession {
    pub fn new(flow_id: impl Into<String>, reinitialize_on_reconnect: bool) -> Self {
        Self {
            flow_id: flow_id.into(),
            phase: FactPhase::Init,
            streaming: None,
            transcript: Transcript::new(),
            initialized: false,
            reinitialize_on_reconnect,
            conversation_id: None,
            execution_id: None,
            server_session_id: None,
        }
    }

    pub fn phase(&self) -> FactPhase {
        self.phase
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Partial assistant reply, for live rendering.
    pub fn streaming_text(&self) -> Option<&str> {
        self.streaming.as_ref().map(StreamingBuffer::text)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn server_session_id(&self) -> Option<&str> {
        self.server_session_id.as_deref()
    }

    /// Send controls are enabled only when connected and idle.
    pub fn can_send(&self, connected: bool) -> bool {
        connected && self.phase == FactPhase::Idle
    }

    pub fn connecting(&mut self) {
        self.phase = FactPhase::Connecting;
    }

    pub fn connect_failed(&mut self) {
        self.phase = FactPhase::Init;
    }

    /// The socket opened. Returns the `initialize` message the first time only.
    pub fn on_open(&mut self) -> Option<FactClientMessage> {
        if self.initialized {
            debug!("Socket opened again, initialize already sent");
            return None;
        }
        self.initialized = true;
        self.phase = FactPhase::AwaitingServerAck;
        info!(flow_id = %self.flow_id, "Initializing flow");
        Some(FactClientMessage::Initialize {
            flow_id: self.flow_id.clone(),
        })
    }

    /// The socket came back after a drop.
    ///
    /// Any half-streamed reply is discarded. With re-initialization enabled the flow is
    /// restarted (unless it already completed); otherwise the turn is abandoned, the machine
    /// returns to `Idle` and the UI is told the session was interrupted.
    pub fn on_reconnect(&mut self) -> (Option<FactClientMessage>, Option<FactNotice>) {
        if let Some(buffer) = self.streaming.take() {
            warn!(
                fragments = buffer.fragments(),
                "Discarding partial reply after reconnect"
            );
        }

        if self.phase == FactPhase::Complete {
            return (None, None);
        }

        if self.reinitialize_on_reconnect {
            self.phase = FactPhase::AwaitingServerAck;
            info!(flow_id = %self.flow_id, "Re-initializing flow after reconnect");
            return (
                Some(FactClientMessage::Initialize {
                    flow_id: self.flow_id.clone(),
                }),
                None,
            );
        }

        let interrupted = matches!(
            self.phase,
            FactPhase::AwaitingServerAck | FactPhase::StreamingResponse
        );
        self.phase = FactPhase::Idle;
        if interrupted {
            (None, Some(FactNotice::SessionInterrupted))
        } else {
            (None, None)
        }
    }

    /// Build a user chat message. Only allowed while `Idle`.
    pub fn compose_message(&mut self, text: &str) -> ClientResult<FactClientMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::InvalidState("Message is empty".to_string()));
        }
        if self.phase != FactPhase::Idle {
            return Err(ClientError::InvalidState(format!(
                "Cannot send while {}",
                self.phase
            )));
        }
        self.phase = FactPhase::AwaitingServerAck;
        Ok(FactClientMessage::Message {
            text: text.to_string(),
        })
    }

    /// The composed message never left; let the user try again.
    pub fn send_failed(&mut self) {
        if self.phase == FactPhase::AwaitingServerAck {
            self.phase = FactPhase::Idle;
        }
    }

    /// Build a document upload. Allowed in any connected phase except `Complete`.
    pub fn compose_upload(&self, contents: &[u8], filename: &str) -> ClientResult<FactClientMessage> {
        match self.phase {
            FactPhase::Complete => Err(ClientError::InvalidState(
                "The flow is complete".to_string(),
            )),
            FactPhase::Init | FactPhase::Connecting => Err(ClientError::InvalidState(
                "Not connected".to_string(),
            )),
            _ => Ok(FactClientMessage::Upload {
                file: general_purpose::STANDARD.encode(contents),
                filename: filename.to_string(),
            }),
        }
    }

    /// Apply one inbound message.
    pub fn handle(&mut self, message: FactServerMessage) -> Vec<FactNotice> {
        let mut notices = Vec::new();

        match message {
            FactServerMessage::Connected { session_id } => {
                info!(session_id = ?session_id, "Fact-gathering session connected");
                self.server_session_id = session_id;
            }
            FactServerMessage::ConversationCreated { conversation_id } => {
                info!(conversation_id = %conversation_id, "Conversation created");
                self.conversation_id = Some(conversation_id.clone());
                notices.push(FactNotice::ConversationCreated(conversation_id));
            }
            FactServerMessage::UserMessage { content, timestamp } => {
                if let Some(message) = self
                    .transcript
                    .apply(TranscriptEvent::User { content, timestamp })
                {
                    notices.push(FactNotice::MessageCommitted(message.clone()));
                }
            }
            FactServerMessage::StreamingStart if self.phase == FactPhase::Complete => {
                debug!("streaming_start after flow_complete, ignoring");
            }
            FactServerMessage::StreamingStart => {
                if let Some(stale) = self.streaming.take() {
                    warn!(
                        fragments = stale.fragments(),
                        "streaming_start while a stream was open, resetting"
                    );
                }
                self.streaming = Some(StreamingBuffer::default());
                self.phase = FactPhase::StreamingResponse;
            }
            FactServerMessage::AiMessage { text } if self.phase == FactPhase::Complete => {
                debug!(bytes = text.len(), "ai_message after flow_complete, ignoring");
            }
            FactServerMessage::AiMessage { text } => {
                let buffer = self.streaming.get_or_insert_with(|| {
                    warn!("ai_message without streaming_start, opening a stream");
                    StreamingBuffer::default()
                });
                buffer.push(&text);
                self.phase = FactPhase::StreamingResponse;
            }
            FactServerMessage::StreamingEnd => {
                debug!(
                    fragments = self.streaming.as_ref().map_or(0, StreamingBuffer::fragments),
                    "Stream ended"
                );
            }
            FactServerMessage::AwaitingInput { execution_id } if self.phase == FactPhase::Complete => {
                // The backend follows flow_complete with the execution id; the flow stays closed
                debug!(execution_id = ?execution_id, "awaiting_input after flow_complete");
                if execution_id.is_some() {
                    self.execution_id = execution_id;
                }
            }
            FactServerMessage::AwaitingInput { execution_id } => {
                notices.extend(self.flush());
                self.phase = FactPhase::Idle;
                if execution_id.is_some() {
                    self.execution_id = execution_id.clone();
                }
                notices.push(FactNotice::AwaitingInput { execution_id });
            }
            FactServerMessage::FlowComplete => {
                notices.extend(self.flush());
                self.phase = FactPhase::Complete;
                info!("Fact-gathering flow complete");
                notices.push(FactNotice::FlowComplete);
            }
            FactServerMessage::FileUploaded {
                filename,
                resource_id,
                size,
            } => {
                info!(filename = %filename, "File uploaded");
                notices.push(FactNotice::FileUploaded {
                    filename,
                    resource_id,
                    size,
                });
            }
            FactServerMessage::Error { message } => {
                error!(message = %message, "Server reported error");
                if let Some(partial) = self.streaming.take() {
                    debug!(fragments = partial.fragments(), "Discarding partial reply");
                }
                if self.phase != FactPhase::Complete {
                    self.phase = FactPhase::Idle;
                }
                notices.push(FactNotice::ServerError(ClientError::ServerReported(message)));
            }
        }

        notices
    }

    fn flush(&mut self) -> Option<FactNotice> {
        let buffer = self.streaming.take()?;
        self.transcript
            .apply(TranscriptEvent::Agent {
                role: None,
                content: buffer.into_text(),
                timestamp: None,
            })
            .cloned()
            .map(FactNotice::MessageCommitted)
    }
}

fn lock(session: &Mutex<FactGatheringSession>) -> MutexGuard<'_, FactGatheringSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connected fact-gathering chat.
///
/// ## Usage Example:
/// ```rust,no_run
/// # use trial_session_client::{config::AppConfig, state::ClientState};
/// # use trial_session_client::session::FactGatheringClient;
/// # async fn run() -> trial_session_client::error::ClientResult<()> {
/// let state = ClientState::new(AppConfig::default());
/// let (client, mut notices) = FactGatheringClient::connect(&state, "s-1", "flow-1").await?;
/// while let Some(notice) = notices.recv().await {
///     println!("{:?}", notice);
///     if client.can_send() {
///         client.send_message("My landlord kept the deposit.")?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct FactGatheringClient {
    session_id: String,
    socket: SessionSocket,
    session: Arc<Mutex<FactGatheringSession>>,
}

impl FactGatheringClient {
    /// Open `/ws/fact-gathering/{session_id}` and start `flow_id`.
    pub async fn connect(
        state: &ClientState,
        session_id: &str,
        flow_id: &str,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<FactNotice>)> {
        let config = state.get_config();
        let socket = SessionSocket::new(
            config.fact_gathering_url(session_id),
            ReconnectPolicy::from_config(&config.connection),
            state.clone(),
        );
        let session = Arc::new(Mutex::new(FactGatheringSession::new(
            flow_id,
            config.connection.reinitialize_on_reconnect,
        )));
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        for &kind in FACT_MESSAGE_TYPES {
            let session = Arc::clone(&session);
            let notice_tx = notice_tx.clone();
            socket.on(kind, move |envelope: &Envelope| {
                let message = match envelope.decode::<FactServerMessage>() {
                    Ok(message) => message,
                    Err(err) => {
                        error!(error = %err, "Dropping undecodable message");
                        return;
                    }
                };
                for notice in lock(&session).handle(message) {
                    let _ = notice_tx.send(notice);
                }
            });
        }

        socket.on_any(|envelope: &Envelope| {
            if !FACT_MESSAGE_TYPES.contains(&envelope.kind.as_str()) {
                warn!(message_type = %envelope.kind, "Unhandled message type");
            }
        });

        {
            let session = Arc::clone(&session);
            let notice_tx = notice_tx.clone();
            socket.on_reconnect(move |attempt, outbox| {
                let (resend, notice) = lock(&session).on_reconnect();
                if let Some(message) = resend {
                    if !outbox.send(&message) {
                        lock(&session).send_failed();
                    }
                }
                if let Some(notice) = notice {
                    warn!(attempt, "Fact-gathering session interrupted by reconnect");
                    let _ = notice_tx.send(notice);
                }
            });
        }

        lock(&session).connecting();
        if let Err(err) = socket.connect().await {
            lock(&session).connect_failed();
            return Err(err);
        }

        let initialize = lock(&session).on_open();
        if let Some(message) = initialize {
            if !socket.send(&message) {
                return Err(ClientError::Connection(
                    "socket closed before initialize was sent".to_string(),
                ));
            }
        }

        info!(session_id = %session_id, flow_id = %flow_id, "Fact-gathering connected");
        Ok((
            Self {
                session_id: session_id.to_string(),
                socket,
                session,
            },
            notice_rx,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send free text. Refused unless connected and idle.
    pub fn send_message(&self, text: &str) -> ClientResult<()> {
        if !self.socket.is_connected() {
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        let mut session = lock(&self.session);
        let message = session.compose_message(text)?;
        if !self.socket.send(&message) {
            session.send_failed();
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        Ok(())
    }

    /// Upload a document to the flow.
    pub fn upload(&self, contents: &[u8], filename: &str) -> ClientResult<()> {
        if !self.socket.is_connected() {
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        let message = lock(&self.session).compose_upload(contents, filename)?;
        if !self.socket.send(&message) {
            return Err(ClientError::Connection("Not connected".to_string()));
        }
        info!(filename = %filename, bytes = contents.len(), "Upload sent");
        Ok(())
    }

    /// Read a file from disk and upload it under its own name.
    pub async fn upload_file(&self, path: &Path) -> ClientResult<()> {
        let contents = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClientError::InvalidState(format!("Not a file: {}", path.display())))?;
        self.upload(&contents, filename)
    }

    pub fn can_send(&self) -> bool {
        lock(&self.session).can_send(self.socket.is_connected())
    }

    pub fn phase(&self) -> FactPhase {
        lock(&self.session).phase()
    }

    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.session).transcript().messages().to_vec()
    }

    pub fn streaming_text(&self) -> Option<String> {
        lock(&self.session).streaming_text().map(str::to_string)
    }

    pub fn conversation_id(&self) -> Option<String> {
        lock(&self.session).conversation_id().map(str::to_string)
    }

    pub fn execution_id(&self) -> Option<String> {
        lock(&self.session).execution_id().map(str::to_string)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.state()
    }

    /// True once reconnects are exhausted.
    pub fn gave_up(&self) -> bool {
        self.socket.gave_up()
    }

    pub fn close(&self) {
        self.socket.close();
    }
}

impl Drop for FactGatheringClient {
    fn drop(&mut self) {
        self.socket.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Origin;

    fn decode(raw: &str) -> FactServerMessage {
        Envelope::parse(raw).unwrap().decode().unwrap()
    }

    fn opened() -> FactGatheringSession {
        let mut session = FactGatheringSession::new("F1", false);
        session.connecting();
        assert!(session.on_open().is_some());
        session
    }

    #[test]
    fn test_initialize_sent_once() {
        let mut session = FactGatheringSession::new("F1", false);
        session.connecting();
        assert_eq!(
            session.on_open(),
            Some(FactClientMessage::Initialize {
                flow_id: "F1".to_string()
            })
        );
        assert_eq!(session.phase(), FactPhase::AwaitingServerAck);
        assert_eq!(session.on_open(), None);
    }

    #[test]
    fn test_streamed_reply_is_committed_on_awaiting_input() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "Hello "}"#));
        assert_eq!(session.streaming_text(), Some("Hello "));
        session.handle(decode(r#"{"type": "ai_message", "text": "there."}"#));
        session.handle(decode(r#"{"type": "streaming_end"}"#));
        let notices = session.handle(decode(r#"{"type": "awaiting_input", "executionId": "E1"}"#));

        let messages = session.transcript().messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].origin, Origin::Agent);
        assert_eq!(messages[0].content, "Hello there.");
        assert_eq!(messages[0].role, None);
        assert_eq!(session.execution_id(), Some("E1"));
        assert_eq!(session.phase(), FactPhase::Idle);
        assert_eq!(session.streaming_text(), None);
        assert!(matches!(notices[0], FactNotice::MessageCommitted(_)));
        assert_eq!(
            notices[1],
            FactNotice::AwaitingInput {
                execution_id: Some("E1".to_string())
            }
        );
    }

    #[test]
    fn test_whitespace_stream_commits_nothing() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "  "}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "\n"}"#));
        let notices = session.handle(decode(r#"{"type": "flow_complete"}"#));

        assert!(session.transcript().is_empty());
        assert_eq!(notices, vec![FactNotice::FlowComplete]);
        assert_eq!(session.phase(), FactPhase::Complete);
    }

    #[test]
    fn test_restarted_stream_resets_buffer() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "stale"}"#));
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "fresh"}"#));
        session.handle(decode(r#"{"type": "awaiting_input"}"#));

        assert_eq!(session.transcript().messages()[0].content, "fresh");
    }

    #[test]
    fn test_send_only_when_idle() {
        let mut session = opened();
        assert!(session.compose_message("hi").is_err());

        session.handle(decode(r#"{"type": "awaiting_input"}"#));
        assert!(session.can_send(true));
        assert!(!session.can_send(false));
        assert!(session.compose_message("   ").is_err());
        assert!(session.compose_message("My car was stolen").is_ok());
        assert_eq!(session.phase(), FactPhase::AwaitingServerAck);
        assert!(!session.can_send(true));

        session.send_failed();
        assert_eq!(session.phase(), FactPhase::Idle);

        session.handle(decode(r#"{"type": "streaming_start"}"#));
        assert!(!session.can_send(true));
        assert!(session.compose_message("again").is_err());
    }

    #[test]
    fn test_error_forces_idle_and_drops_partial() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "half a"}"#));
        let notices = session.handle(decode(r#"{"type": "error", "message": "Flow failed"}"#));

        assert_eq!(
            notices,
            vec![FactNotice::ServerError(ClientError::ServerReported(
                "Flow failed".to_string()
            ))]
        );
        assert_eq!(session.phase(), FactPhase::Idle);
        assert_eq!(session.streaming_text(), None);
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_user_echo_and_conversation_id() {
        let mut session = opened();
        let notices = session.handle(decode(r#"{"type": "conversation_created", "conversationId": "C9"}"#));
        assert_eq!(notices, vec![FactNotice::ConversationCreated("C9".to_string())]);
        assert_eq!(session.conversation_id(), Some("C9"));

        session.handle(decode(r#"{"type": "user_message", "content": "I was fired", "timestamp": "2025-01-01T09:00:00Z"}"#));
        let message = &session.transcript().messages()[0];
        assert_eq!(message.origin, Origin::User);
        assert_eq!(message.timestamp, "2025-01-01T09:00:00Z");
    }

    #[test]
    fn test_complete_survives_trailing_events() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "awaiting_input", "executionId": "E0"}"#));
        session.compose_message("That is everything.").unwrap();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "Done."}"#));
        session.handle(decode(r#"{"type": "flow_complete"}"#));
        assert_eq!(session.phase(), FactPhase::Complete);

        let notices = session.handle(decode(r#"{"type": "awaiting_input", "executionId": "E2"}"#));
        assert!(notices.is_empty());
        assert_eq!(session.phase(), FactPhase::Complete);
        assert_eq!(session.execution_id(), Some("E2"));
        assert!(!session.can_send(true));
        assert!(session.compose_message("one more thing").is_err());
        assert!(session.compose_upload(b"lease", "lease.txt").is_err());

        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "stray"}"#));
        assert_eq!(session.phase(), FactPhase::Complete);
        assert_eq!(session.streaming_text(), None);

        session.handle(decode(r#"{"type": "error", "message": "late failure"}"#));
        assert_eq!(session.phase(), FactPhase::Complete);
        assert_eq!(session.transcript().len(), 1);
    }

    #[test]
    fn test_upload_refused_after_completion() {
        let mut session = opened();
        let upload = session.compose_upload(b"lease", "lease.txt").unwrap();
        assert_eq!(
            upload,
            FactClientMessage::Upload {
                file: "bGVhc2U=".to_string(),
                filename: "lease.txt".to_string()
            }
        );

        session.handle(decode(r#"{"type": "flow_complete"}"#));
        assert!(session.compose_upload(b"lease", "lease.txt").is_err());
    }

    #[test]
    fn test_reconnect_mid_stream_interrupts() {
        let mut session = opened();
        session.handle(decode(r#"{"type": "streaming_start"}"#));
        session.handle(decode(r#"{"type": "ai_message", "text": "partial"}"#));

        let (resend, notice) = session.on_reconnect();
        assert_eq!(resend, None);
        assert_eq!(notice, Some(FactNotice::SessionInterrupted));
        assert_eq!(session.phase(), FactPhase::Idle);
        assert_eq!(session.streaming_text(), None);
    }

    #[test]
    fn test_reconnect_reinitializes_when_enabled() {
        let mut session = FactGatheringSession::new("F1", true);
        session.on_open();
        session.handle(decode(r#"{"type": "awaiting_input"}"#));

        let (resend, notice) = session.on_reconnect();
        assert!(matches!(resend, Some(FactClientMessage::Initialize { .. })));
        assert_eq!(notice, None);
        assert_eq!(session.phase(), FactPhase::AwaitingServerAck);

        session.handle(decode(r#"{"type": "flow_complete"}"#));
        assert_eq!(session.on_reconnect(), (None, None));
        assert_eq!(session.phase(), FactPhase::Complete);
    }
}
