use serde::{Deserialize, Serialize};

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed,
    Stale,
}

impl TurnOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stale => "stale",
        }
    }
}

/// Structured record of one finished conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnLog {
    pub request_id: String,
    pub outcome: TurnOutcome,
    pub error_kind: Option<String>,
    pub latency_ms: u64,
    /// Deltas applied to the transcript (zero for stale turns).
    pub deltas: u32,
    /// Characters of assistant text received.
    pub chars: u64,
    pub messages_sent: u32,
}

impl TurnLog {
    pub fn new(request_id: impl Into<String>, outcome: TurnOutcome) -> Self {
        Self {
            request_id: request_id.into(),
            outcome,
            error_kind: None,
            latency_ms: 0,
            deltas: 0,
            chars: 0,
            messages_sent: 0,
        }
    }

    pub fn error_kind_opt(mut self, v: Option<&str>) -> Self {
        self.error_kind = v.map(|s| s.to_string());
        self
    }

    pub fn latency_ms(mut self, v: u64) -> Self {
        self.latency_ms = v;
        self
    }

    pub fn deltas(mut self, n: u32, chars: u64) -> Self {
        self.deltas = n;
        self.chars = chars;
        self
    }

    pub fn messages_sent(mut self, n: u32) -> Self {
        self.messages_sent = n;
        self
    }
}
