//! Server-pushed events.
//!
//! Wire shape: `{ "event": string, "data": any, "user_id"?: string }`.
//! The set of event kinds is open; unknown tags are kept verbatim.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// The tag that names an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// A new AI-generated draft is available.
    NewAiDraft,
    /// An existing draft was edited.
    DraftUpdate,
    /// A draft was published.
    DraftPosted,
    /// Publishing a draft failed.
    DraftFailed,
    /// Draft generation has started.
    AiGenerationStarted,
    /// Draft generation has finished.
    AiGenerationCompleted,
    /// Free-form notice for the user.
    SystemNotification,
    /// Any tag this crate does not know about.
    Other(String),
}

impl EventKind {
    /// Every kind with a dedicated variant.
    pub const KNOWN: [EventKind; 7] = [
        EventKind::NewAiDraft,
        EventKind::DraftUpdate,
        EventKind::DraftPosted,
        EventKind::DraftFailed,
        EventKind::AiGenerationStarted,
        EventKind::AiGenerationCompleted,
        EventKind::SystemNotification,
    ];

    /// The wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::NewAiDraft => "new_ai_draft",
            EventKind::DraftUpdate => "draft_update",
            EventKind::DraftPosted => "draft_posted",
            EventKind::DraftFailed => "draft_failed",
            EventKind::AiGenerationStarted => "ai_generation_started",
            EventKind::AiGenerationCompleted => "ai_generation_completed",
            EventKind::SystemNotification => "system_notification",
            EventKind::Other(tag) => tag,
        }
    }

    /// Whether this kind has a dedicated variant.
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventKind::from(s.to_string()))
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::from(s.to_string())
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "new_ai_draft" => EventKind::NewAiDraft,
            "draft_update" => EventKind::DraftUpdate,
            "draft_posted" => EventKind::DraftPosted,
            "draft_failed" => EventKind::DraftFailed,
            "ai_generation_started" => EventKind::AiGenerationStarted,
            "ai_generation_completed" => EventKind::AiGenerationCompleted,
            "system_notification" => EventKind::SystemNotification,
            _ => EventKind::Other(tag),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// One message pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Event tag.
    #[serde(rename = "event")]
    pub kind: EventKind,
    /// Opaque payload; interpretation belongs to the handlers.
    #[serde(default)]
    pub data: serde_json::Value,
    /// User the event originated from, if the server says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl InboundEvent {
    pub fn new(kind: impl Into<EventKind>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            user_id: None,
        }
    }

    /// Attach the originating user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Parse a text frame.
    pub fn from_text(text: &str) -> Result<Self, EventParseError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn to_text(&self) -> String {
        // A Value payload and string fields cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A text frame that is not a valid inbound event.
#[derive(Debug, thiserror::Error)]
#[error("malformed inbound event: {0}")]
pub struct EventParseError(#[from] serde_json::Error);
