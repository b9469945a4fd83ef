//! # Transcript
//!
//! The ordered, append-only list of committed messages shown to the user, and the reducer
//! that folds inbound events into it.
//!
//! ## Ordering:
//! Insertion order is the display order. Timestamps are carried for display only; the
//! server may deliver slightly out of temporal order and the UI must not reshuffle.
//!
//! ## Ids:
//! Every committed message gets an id of the form `{prefix}_{seq}_{millis}`. The sequence
//! number makes two events in the same millisecond distinct; seeded ids from the REST
//! surface (`msg_0`, `msg_1`, ...) are skipped over if they ever collide.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// One of the fixed participant types an agent impersonates in the voice trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    #[serde(alias = "JUDGE", alias = "Judge")]
    Judge,
    #[serde(alias = "PROSECUTOR", alias = "Prosecutor")]
    Prosecutor,
    #[serde(alias = "DEFENSE", alias = "Defense")]
    Defense,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::Judge => "judge",
            RoleType::Prosecutor => "prosecutor",
            RoleType::Defense => "defense",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "judge" => Ok(RoleType::Judge),
            "prosecutor" => Ok(RoleType::Prosecutor),
            "defense" | "defence" => Ok(RoleType::Defense),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Agent,
    System,
}

/// A committed transcript entry. Never mutated once it is in a [`Transcript`].
///
/// The server's session payload names the origin `type`; both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type", alias = "origin")]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleType>,
    pub content: String,
    pub timestamp: String,
}

impl Message {
    /// USER and SYSTEM messages never carry a role.
    pub fn is_well_formed(&self) -> bool {
        match self.origin {
            Origin::Agent => true,
            Origin::User | Origin::System => self.role.is_none(),
        }
    }
}

/// Inbound events that may commit a message.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// Server-confirmed echo of what the user said or typed
    User {
        content: String,
        timestamp: Option<String>,
    },
    /// A finished agent turn; `role` is absent for the fact-gathering assistant
    Agent {
        role: Option<RoleType>,
        content: String,
        timestamp: Option<String>,
    },
    System {
        content: String,
    },
}

/// Ordered, append-only message list.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    ids: HashSet<String>,
    next_seq: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transcript from messages the server already holds (session reload).
    ///
    /// Malformed entries and duplicate ids are skipped with a warning.
    pub fn seeded(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut transcript = Self::new();
        for message in messages {
            if !message.is_well_formed() {
                tracing::warn!(id = %message.id, "Skipping seeded message with a role on a non-agent origin");
                continue;
            }
            if transcript.ids.contains(&message.id) {
                tracing::warn!(id = %message.id, "Skipping seeded message with duplicate id");
                continue;
            }
            transcript.ids.insert(message.id.clone());
            transcript.messages.push(message);
        }
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Apply one event in place. Returns the committed message, if any.
    pub fn apply(&mut self, event: TranscriptEvent) -> Option<&Message> {
        let (prefix, origin, role, content, timestamp) = match event {
            TranscriptEvent::User { content, timestamp } => {
                ("user", Origin::User, None, content, timestamp)
            }
            TranscriptEvent::Agent {
                role,
                content,
                timestamp,
            } => ("agent", Origin::Agent, role, content, timestamp),
            TranscriptEvent::System { content } => ("system", Origin::System, None, content, None),
        };

        if content.trim().is_empty() {
            return None;
        }

        let id = self.next_id(prefix);
        self.ids.insert(id.clone());
        self.messages.push(Message {
            id,
            origin,
            role,
            content,
            timestamp: timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
        });
        self.messages.last()
    }

    fn next_id(&mut self, prefix: &str) -> String {
        loop {
            self.next_seq += 1;
            let candidate = format!(
                "{}_{}_{}",
                prefix,
                self.next_seq,
                Utc::now().timestamp_millis()
            );
            if !self.ids.contains(&candidate) {
                return candidate;
            }
        }
    }
}

/// Pure reducer: `(transcript, event) -> transcript`.
///
/// Events with nothing to commit (empty or whitespace content) return the transcript
/// unchanged. Nothing already committed is ever rewritten or removed.
pub fn reduce(mut transcript: Transcript, event: TranscriptEvent) -> Transcript {
    transcript.apply(event);
    transcript
}
