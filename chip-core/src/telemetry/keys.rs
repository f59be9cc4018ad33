/// Span/Log attribute keys for conversation turns.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const SPAN_TURN: &str = "chat.turn";
pub const KEY_REQUEST_ID: &str = "req.id";
pub const KEY_MESSAGES_SENT: &str = "messages.sent";
pub const KEY_OUTCOME: &str = "outcome";
pub const KEY_DELTAS: &str = "deltas";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
