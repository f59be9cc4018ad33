//! Per-turn records for whoever wants them (metrics, audit logs).
//! Nothing is recorded until a sink is installed with `set_telemetry_sink`.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Receives one `TurnLog` per finished conversation turn.
///
/// Called from whichever task drove the turn, after the transcript lock is
/// released. Must not panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_turn(&self, log: TurnLog);
}

static SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// Tests share the process-wide sink; only threads that opted in record.
#[cfg(test)]
thread_local! {
    static CAPTURE_ON: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install the process-wide sink. Only the first call wins; later calls
/// return `false`.
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    SINK.set(sink).is_ok()
}

#[inline]
pub(crate) fn emit_turn(log: TurnLog) {
    #[cfg(test)]
    {
        if !CAPTURE_ON.with(|c| c.get()) {
            return;
        }
    }
    match SINK.get() {
        Some(sink) => sink.record_turn(log),
        None => tracing::trace!(outcome = log.outcome.as_str(), "no telemetry sink installed"),
    }
}

/// Opt the current test thread in or out of sink delivery.
#[cfg(test)]
pub fn test_set_capture_enabled(enabled: bool) {
    CAPTURE_ON.with(|c| c.set(enabled));
}
