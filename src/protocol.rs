//! # Wire Protocol
//!
//! JSON message vocabulary for the two WebSocket endpoints:
//! - `/ws/fact-gathering/{sessionId}`: text chat driving the fact-gathering flow
//! - `/ws/trial/{sessionId}`: push-to-talk voice trial
//!
//! ## Message Format:
//! Every frame is a JSON object with a `type` discriminator. Outbound messages are typed
//! enums serialized with `#[serde(tag = "type")]`. Inbound frames are first parsed into an
//! [`Envelope`] (type + raw payload) so the socket can dispatch on the type without knowing
//! the channel, and the session client then decodes the payload into its own enum.

use crate::error::{ClientError, ClientResult};
use crate::transcript::RoleType;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound frame with its `type` split out.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    /// Parse a text frame. Non-JSON, non-object and missing/non-string `type` are protocol errors.
    pub fn parse(text: &str) -> ClientResult<Self> {
        let payload: Value = serde_json::from_str(text)?;
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("message has no string `type` field".to_string()))?
            .to_string();
        Ok(Self { kind, payload })
    }

    /// Decode the payload into a channel-specific message enum.
    pub fn decode<T: DeserializeOwned>(&self) -> ClientResult<T> {
        T::deserialize(&self.payload).map_err(|err| {
            ClientError::Protocol(format!("cannot decode `{}` message: {}", self.kind, err))
        })
    }
}

/// Client → server on the fact-gathering channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactClientMessage {
    /// Start the configured flow. Sent once per socket lifetime.
    Initialize {
        #[serde(rename = "flowId")]
        flow_id: String,
    },
    /// Free text from the user
    Message { text: String },
    /// A document, base64-encoded, with its original file name
    Upload { file: String, filename: String },
}

/// Server → client on the fact-gathering channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactServerMessage {
    Connected {
        #[serde(default)]
        session_id: Option<String>,
    },
    ConversationCreated {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    UserMessage {
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    StreamingStart,
    AiMessage {
        #[serde(default)]
        text: String,
    },
    StreamingEnd,
    AwaitingInput {
        #[serde(rename = "executionId", default)]
        execution_id: Option<String>,
    },
    FlowComplete,
    FileUploaded {
        filename: String,
        #[serde(rename = "resourceId", default)]
        resource_id: Option<String>,
        #[serde(default)]
        size: Option<u64>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

/// Client → server on the trial channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrialClientMessage {
    /// One push-to-talk recording, base64-encoded
    Audio { audio: String },
    /// Typed input instead of speech
    Text { text: String },
    EndTrial,
}

/// Server → client on the trial channel.
///
/// Transcript-bearing events accept either `content` or `text` for the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrialServerMessage {
    Connected {
        #[serde(default)]
        session_id: Option<String>,
    },
    UserMessage {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Transcription {
        #[serde(default)]
        text: String,
    },
    AgentThinking {
        #[serde(default)]
        role: Option<RoleType>,
    },
    AgentResponse {
        role: RoleType,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Synthesizing {
        #[serde(default)]
        role: Option<RoleType>,
    },
    AgentAudio {
        role: RoleType,
        audio: String,
        #[serde(default)]
        text: Option<String>,
    },
    Processing,
    TrialEnded,
    Error {
        #[serde(default)]
        message: String,
    },
}

/// `content` wins over `text` when both are present.
pub(crate) fn body_of(content: Option<String>, text: Option<String>) -> String {
    content.or(text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rejects_malformed_frames() {
        assert!(Envelope::parse("not json").is_err());
        assert!(Envelope::parse("[1, 2, 3]").is_err());
        assert!(Envelope::parse(r#"{"text": "no type"}"#).is_err());
        assert!(Envelope::parse(r#"{"type": 7}"#).is_err());

        let env = Envelope::parse(r#"{"type": "ai_message", "text": "Hi"}"#).unwrap();
        assert_eq!(env.kind, "ai_message");
    }

    #[test]
    fn test_outbound_wire_format() {
        let init = serde_json::to_value(FactClientMessage::Initialize {
            flow_id: "F1".to_string(),
        })
        .unwrap();
        assert_eq!(init, serde_json::json!({"type": "initialize", "flowId": "F1"}));

        let end = serde_json::to_value(TrialClientMessage::EndTrial).unwrap();
        assert_eq!(end, serde_json::json!({"type": "end_trial"}));
    }

    #[test]
    fn test_inbound_fact_messages_decode() {
        let env = Envelope::parse(r#"{"type": "awaiting_input", "executionId": "E1"}"#).unwrap();
        assert_eq!(
            env.decode::<FactServerMessage>().unwrap(),
            FactServerMessage::AwaitingInput {
                execution_id: Some("E1".to_string())
            }
        );

        // Unit variants tolerate extra fields
        let env = Envelope::parse(r#"{"type": "streaming_start", "message": "..."}"#).unwrap();
        assert_eq!(
            env.decode::<FactServerMessage>().unwrap(),
            FactServerMessage::StreamingStart
        );
    }

    #[test]
    fn test_inbound_trial_messages_decode() {
        let env = Envelope::parse(
            r#"{"type": "agent_response", "role": "judge", "content": "Overruled.", "timestamp": "t"}"#,
        )
        .unwrap();
        match env.decode::<TrialServerMessage>().unwrap() {
            TrialServerMessage::AgentResponse { role, content, text, .. } => {
                assert_eq!(role, RoleType::Judge);
                assert_eq!(body_of(content, text), "Overruled.");
            }
            other => panic!("Wrong message type: {:?}", other),
        }

        let env = Envelope::parse(r#"{"type": "agent_thinking", "message": "Agent is preparing response..."}"#).unwrap();
        assert_eq!(
            env.decode::<TrialServerMessage>().unwrap(),
            TrialServerMessage::AgentThinking { role: None }
        );

        let env = Envelope::parse(r#"{"type": "agent_response", "content": "no role"}"#).unwrap();
        assert!(env.decode::<TrialServerMessage>().is_err());
    }
}
