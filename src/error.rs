//! # Error Handling
//!
//! This module defines the error taxonomy for the session client and how each error is
//! presented to the user. Every fallible operation in the crate returns `ClientResult<T>`.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces callers to handle both success and failure cases
//! - **No exceptions**: a refused microphone or a dead socket is a value, not a crash
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one failure category the UI must explain differently
//! - **Data**: Each variant carries a human-readable detail string
//!
//! ### Traits for Error Conversion
//! - **From trait**: `?` converts library errors (JSON, WebSocket, HTTP, config) automatically
//! - **Display trait**: Defines how errors are formatted in logs
//!
//! ## Propagation policy:
//! Capture and permission errors go straight back to the UI layer. Protocol errors on
//! inbound frames are logged and the frame is dropped; they never abort a connection.

use std::fmt;

/// Error categories for the real-time session client.
///
/// ## Error Categories:
/// - **Permission**: The user denied microphone access
/// - **Device**: No usable input/output device
/// - **Unsupported**: The platform lacks capture or playback support
/// - **NotStarted**: `stop()` called without an active capture
/// - **Connection**: Socket failed to open or exhausted its retries
/// - **Protocol**: Malformed or unexpected server payload
/// - **ServerReported**: An explicit `error` event from the backend
/// - **Playback**: An inbound audio payload could not be decoded or played
/// - **Http**: A REST call failed
/// - **Config**: Configuration could not be loaded or is invalid
/// - **InvalidState**: The operation is not allowed in the current session state
///
/// ## Usage Example:
/// ```rust
/// use trial_session_client::error::ClientError;
/// let err = ClientError::Permission("NotAllowedError".to_string());
/// assert_eq!(err.kind(), "permission_error");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Microphone access was denied by the user or the platform policy
    Permission(String),

    /// No microphone (or speaker) exists, or it vanished mid-use
    Device(String),

    /// The platform cannot capture or play audio at all
    Unsupported(String),

    /// `stop()` was called while nothing was being captured
    NotStarted,

    /// The socket could not be opened, or reconnects were exhausted
    Connection(String),

    /// The server sent something we could not understand
    Protocol(String),

    /// The server told us explicitly that something went wrong
    ServerReported(String),

    /// Decoding or playing an inbound audio payload failed
    Playback(String),

    /// REST request failed (transport or non-2xx status)
    Http(String),

    /// Configuration file or environment variable problems
    Config(String),

    /// Operation attempted from a state that forbids it
    InvalidState(String),
}

impl ClientError {
    /// Machine-readable tag for this error (stable across releases).
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Permission(_) => "permission_error",
            ClientError::Device(_) => "device_error",
            ClientError::Unsupported(_) => "unsupported_error",
            ClientError::NotStarted => "not_started_error",
            ClientError::Connection(_) => "connection_error",
            ClientError::Protocol(_) => "protocol_error",
            ClientError::ServerReported(_) => "server_error",
            ClientError::Playback(_) => "playback_error",
            ClientError::Http(_) => "http_error",
            ClientError::Config(_) => "config_error",
            ClientError::InvalidState(_) => "invalid_state",
        }
    }

    /// The sentence shown to the user when this error reaches the UI.
    ///
    /// Capture errors must never fail silently: the user has to learn why the
    /// microphone button is disabled, so these messages say what to do next.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Permission(_) => "Microphone access denied. Please allow microphone access in your system settings and try again.".to_string(),
            ClientError::Device(_) => "No microphone found. Please connect a microphone and try again.".to_string(),
            ClientError::Unsupported(_) => "Audio recording is not supported on this platform.".to_string(),
            ClientError::NotStarted => "Recording was not started.".to_string(),
            ClientError::Connection(_) => "Disconnected from the trial server.".to_string(),
            ClientError::Protocol(_) => "Received an unexpected message from the server.".to_string(),
            ClientError::ServerReported(msg) => format!("Error: {}", msg),
            ClientError::Playback(_) => "Could not play the agent's audio.".to_string(),
            ClientError::Http(msg) => format!("Request failed: {}", msg),
            ClientError::Config(msg) => format!("Configuration error: {}", msg),
            ClientError::InvalidState(msg) => msg.clone(),
        }
    }

    /// Whether the UI should treat this as a capture/permission problem.
    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            ClientError::Permission(_) | ClientError::Device(_) | ClientError::Unsupported(_)
        )
    }
}

/// Implementation of the Display trait for ClientError.
///
/// ## Purpose:
/// This is the log-facing form. `user_message()` is the UI-facing form.
impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Permission(msg) => write!(f, "Permission error: {}", msg),
            ClientError::Device(msg) => write!(f, "Device error: {}", msg),
            ClientError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            ClientError::NotStarted => write!(f, "Capture not started"),
            ClientError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ClientError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ClientError::ServerReported(msg) => write!(f, "Server reported error: {}", msg),
            ClientError::Playback(msg) => write!(f, "Playback error: {}", msg),
            ClientError::Http(msg) => write!(f, "HTTP error: {}", msg),
            ClientError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ClientError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

/// Automatic conversion from JSON errors to ClientError.
///
/// ## Why Protocol:
/// JSON failures only happen on wire payloads (inbound frames or REST bodies),
/// so they are always the server's side of the contract being broken.
impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors to ClientError.
impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Http(err.to_string())
    }
}

/// IO errors only surface from audio streams and files in this crate.
impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Device(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Usage Example:
/// ```rust
/// use trial_session_client::error::ClientResult;
/// fn ready() -> ClientResult<()> { Ok(()) }
/// ```
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_becomes_protocol_error() {
        let err: ClientError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "protocol_error");
    }

    #[test]
    fn test_capture_errors_have_user_messages() {
        let denied = ClientError::Permission("NotAllowedError".to_string());
        assert!(denied.is_capture_error());
        assert!(denied.user_message().contains("denied"));

        let missing = ClientError::Device("no default input device".to_string());
        assert!(missing.user_message().contains("No microphone"));

        assert!(!ClientError::NotStarted.is_capture_error());
    }

    #[test]
    fn test_server_reported_message_is_passed_through() {
        let err = ClientError::ServerReported("Session not found".to_string());
        assert_eq!(err.user_message(), "Error: Session not found");
        assert_eq!(err.to_string(), "Server reported error: Session not found");
    }
}
