use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Reserved id of the synthetic greeting that seeds every transcript.
pub const WELCOME_ID: &str = "welcome";

pub const WELCOME_TEXT: &str = "Welcome to **Chip** – the Enrolment Intelligence Assistant.\n\n\
I can help you with:\n\
• **Enrolment statistics** — state-wise data, trends, success rates\n\
• **Aadhaar knowledge** — from basics to advanced topics\n\
• **Biometric analysis** — authentication rates, failure reasons\n\
• **General queries** — any question about Aadhaar ecosystem\n\n\
Ask me anything about Aadhaar or enrolment data!";

pub const SUGGESTED_QUERIES: &[&str] = &[
    "How many enrolments were registered in Maharashtra?",
    "Top 5 states by enrolment",
    "What is Aadhaar and how does it work?",
    "Biometric failure rate in Karnataka",
    "How to update my Aadhaar address?",
    "What documents are required for Aadhaar?",
    "Give me a national enrolment summary",
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn welcome() -> Self {
        Self(WELCOME_ID.to_string())
    }

    /// Ids are unique per controller: creation time plus a monotonic sequence.
    pub fn generate(seq: u64, at_ms: i64) -> Self {
        Self(format!("{at_ms}-{seq}"))
    }

    pub fn is_welcome(&self) -> bool {
        self.0 == WELCOME_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One transcript entry. `open` marks the trailing assistant message that is
/// still receiving deltas; once closed it is never mutated again.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub open: bool,
}

impl Message {
    pub fn welcome(text: &str) -> Self {
        Self {
            id: MessageId::welcome(),
            role: Role::Assistant,
            content: text.to_string(),
            timestamp_ms: now_ms(),
            open: false,
        }
    }

    pub fn is_welcome(&self) -> bool {
        self.id.is_welcome()
    }

    pub fn to_wire(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Body of the proxy request: `{ "messages": [...] }`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
