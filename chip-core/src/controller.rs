//! Conversation state: the transcript, the single-flight gate and the
//! application of streamed deltas.
//!
//! The controller is a cheap handle (`Clone`) around shared state. The lock is
//! only held for synchronous transcript edits, never across an await, so
//! `reset`, `abort` and the snapshot accessors stay usable while a turn is
//! streaming. Observers are notified after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::{AbortHandle, Abortable};
use futures_util::StreamExt;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::error::{ChipError, CoreResult};
use crate::model::{ChatMessage, ChatRequest, Message, MessageId, Role, WELCOME_TEXT, now_ms};
use crate::normalizer::normalize_input;
use crate::stream::StreamEvent;
use crate::telemetry::{self, TurnLog, TurnOutcome};
use crate::transport::ChatTransport;

/// Single-flight gate: at most one turn streams at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Sending,
}

impl ConversationState {
    pub fn can_submit(self) -> bool {
        self == Self::Idle
    }

    /// Only `Idle -> Sending` and `Sending -> Idle` are legal.
    pub fn transition(self, to: Self) -> CoreResult<Self> {
        match (self, to) {
            (Self::Idle, Self::Sending) | (Self::Sending, Self::Idle) => Ok(to),
            (from, to) => Err(ChipError::Validation(format!(
                "illegal conversation transition {from:?} -> {to:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyInput,
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Nothing happened: no message appended, no request issued.
    Rejected(RejectReason),
    /// The stream ended normally. `None` when no delta ever arrived.
    Completed { message_id: Option<MessageId> },
    /// The transcript was reset while streaming; the response was discarded.
    Stale,
}

/// What changed in a transcript event.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Appended(MessageId),
    Updated(MessageId),
    Closed(MessageId),
    Removed(MessageId),
    Reset,
    StateChanged(ConversationState),
    TurnFailed { user_message: String },
}

/// Emitted after every mutation. `focus` is the newest message, the one a
/// presentation layer should scroll to.
#[derive(Debug, Clone)]
pub struct TranscriptEvent {
    pub change: Change,
    pub snapshot: Vec<Message>,
    pub focus: Option<MessageId>,
    pub state: ConversationState,
}

pub trait TranscriptObserver: Send + Sync + 'static {
    fn on_event(&self, event: &TranscriptEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    transcript: Vec<Message>,
    welcome: Message,
    state: ConversationState,
    /// Bumped by every reset; a turn only touches the transcript while its
    /// captured generation is current.
    generation: u64,
    next_seq: u64,
    abort: Option<AbortHandle>,
    observers: Vec<(SubscriptionId, Arc<dyn TranscriptObserver>)>,
    next_sub: u64,
}

impl Inner {
    fn next_id(&mut self) -> MessageId {
        self.next_seq += 1;
        MessageId::generate(self.next_seq, now_ms())
    }

    fn event(&self, change: Change) -> TranscriptEvent {
        TranscriptEvent {
            change,
            snapshot: self.transcript.clone(),
            focus: self.transcript.last().map(|m| m.id.clone()),
            state: self.state,
        }
    }

    fn set_state(&mut self, to: ConversationState) -> CoreResult<TranscriptEvent> {
        self.state = self.state.transition(to)?;
        Ok(self.event(Change::StateChanged(self.state)))
    }

    /// Index of the trailing assistant message still receiving deltas.
    fn open_tail(&self) -> Option<usize> {
        let last = self.transcript.len().checked_sub(1)?;
        let m = &self.transcript[last];
        (m.open && m.role == Role::Assistant && !m.is_welcome()).then_some(last)
    }
}

#[derive(Default)]
struct TurnStats {
    deltas: u32,
    chars: u64,
}

pub struct ConversationController<T> {
    transport: Arc<T>,
    inner: Arc<Mutex<Inner>>,
}

impl<T> Clone for ConversationController<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: ChatTransport> ConversationController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_welcome(transport, WELCOME_TEXT)
    }

    pub fn with_welcome(transport: T, welcome_text: &str) -> Self {
        let welcome = Message::welcome(welcome_text);
        Self {
            transport: Arc::new(transport),
            inner: Arc::new(Mutex::new(Inner {
                transcript: vec![welcome.clone()],
                welcome,
                state: ConversationState::Idle,
                generation: 0,
                next_seq: 0,
                abort: None,
                observers: Vec::new(),
                next_sub: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> ConversationState {
        self.lock().state
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.lock().transcript.clone()
    }

    /// The history a submit would send: every message except the welcome.
    pub fn outgoing_messages(&self) -> Vec<ChatMessage> {
        self.lock()
            .transcript
            .iter()
            .filter(|m| !m.is_welcome())
            .map(Message::to_wire)
            .collect()
    }

    pub fn subscribe(&self, observer: Arc<dyn TranscriptObserver>) -> SubscriptionId {
        let mut inner = self.lock();
        inner.next_sub += 1;
        let id = SubscriptionId(inner.next_sub);
        inner.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.observers.len();
        inner.observers.retain(|(sid, _)| *sid != id);
        inner.observers.len() != before
    }

    fn notify(&self, events: Vec<TranscriptEvent>) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<_> = self
            .lock()
            .observers
            .iter()
            .map(|(_, o)| o.clone())
            .collect();
        for ev in &events {
            for o in &observers {
                o.on_event(ev);
            }
        }
    }

    /// Discard the transcript and reseed it with the welcome message. An
    /// in-flight turn keeps streaming but its output is dropped.
    pub fn reset(&self) {
        let events = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.transcript = vec![inner.welcome.clone()];
            vec![inner.event(Change::Reset)]
        };
        tracing::debug!("transcript reset");
        self.notify(events);
    }

    /// Abort the in-flight request, if any. The turn ends with
    /// `ChipError::Aborted`.
    pub fn abort(&self) -> bool {
        match self.lock().abort.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Run one conversation turn for `input`.
    ///
    /// Returns `Err` for request-level failures after restoring a consistent
    /// transcript and the `Idle` state; `ChipError::user_message` gives the
    /// text to show.
    pub async fn submit(&self, input: &str) -> CoreResult<SubmitOutcome> {
        let Some(text) = normalize_input(input) else {
            return Ok(SubmitOutcome::Rejected(RejectReason::EmptyInput));
        };

        let (request, generation, request_id, registration, events) = {
            let mut inner = self.lock();
            if !inner.state.can_submit() {
                tracing::debug!("submit rejected: a turn is already in flight");
                return Ok(SubmitOutcome::Rejected(RejectReason::Busy));
            }
            let id = inner.next_id();
            let user = Message {
                id: id.clone(),
                role: Role::User,
                content: text,
                timestamp_ms: now_ms(),
                open: false,
            };
            let messages: Vec<ChatMessage> = inner
                .transcript
                .iter()
                .filter(|m| !m.is_welcome())
                .chain(std::iter::once(&user))
                .map(Message::to_wire)
                .collect();
            inner.transcript.push(user);
            let appended = inner.event(Change::Appended(id.clone()));
            let sending = inner.set_state(ConversationState::Sending)?;
            let (handle, registration) = AbortHandle::new_pair();
            inner.abort = Some(handle);
            (
                ChatRequest { messages },
                inner.generation,
                id.to_string(),
                registration,
                vec![appended, sending],
            )
        };
        self.notify(events);
        let mut guard = TurnGuard {
            controller: self,
            generation,
            armed: true,
        };

        let span = tracing::info_span!(
            "chat.turn",
            req.id = %request_id,
            messages.sent = request.messages.len(),
            outcome = Empty,
            deltas = Empty,
            error.kind = Empty
        );
        let started = Instant::now();
        let mut stats = TurnStats::default();
        let run = Abortable::new(
            self.stream_turn(&request, &request_id, generation, &mut stats),
            registration,
        )
        .instrument(span.clone())
        .await;
        guard.armed = false;
        let result = match run {
            Ok(r) => r,
            Err(_aborted) => Err(ChipError::Aborted),
        };

        let terminal = match result {
            Ok(()) => StreamEvent::Done,
            Err(e) => StreamEvent::Error(e),
        };
        let (current, events) = self.apply(generation, &terminal);
        self.notify(events);

        let outcome = match (&terminal, current) {
            (_, false) => TurnOutcome::Stale,
            (StreamEvent::Error(_), true) => TurnOutcome::Failed,
            _ => TurnOutcome::Completed,
        };
        let error_kind = match &terminal {
            StreamEvent::Error(e) => Some(e.kind()),
            _ => None,
        };
        span.record(telemetry::KEY_OUTCOME, outcome.as_str());
        span.record(telemetry::KEY_DELTAS, stats.deltas);
        if let Some(kind) = error_kind {
            span.record(telemetry::KEY_ERROR_KIND, kind);
            span.in_scope(|| tracing::warn!(error.kind = kind, "chat turn failed"));
        }
        telemetry::emit_turn(
            TurnLog::new(request_id, outcome)
                .error_kind_opt(error_kind)
                .latency_ms(started.elapsed().as_millis() as u64)
                .deltas(stats.deltas, stats.chars)
                .messages_sent(request.messages.len() as u32),
        );

        match (outcome, terminal) {
            (TurnOutcome::Stale, _) => Ok(SubmitOutcome::Stale),
            (_, StreamEvent::Error(e)) => Err(e),
            _ => Ok(SubmitOutcome::Completed {
                message_id: self.last_assistant_id(),
            }),
        }
    }

    async fn stream_turn(
        &self,
        request: &ChatRequest,
        request_id: &str,
        generation: u64,
        stats: &mut TurnStats,
    ) -> CoreResult<()> {
        let mut stream = self.transport.stream_chat(request, request_id).await?;
        while let Some(item) = stream.next().await {
            let delta = StreamEvent::Delta(item?);
            let (current, events) = self.apply(generation, &delta);
            if current {
                stats.deltas += 1;
                stats.chars += delta.as_delta().map_or(0, |d| d.chars().count() as u64);
            }
            self.notify(events);
        }
        Ok(())
    }

    /// Apply one stream event for the turn started at `generation`. Returns
    /// whether that turn is still current, plus the events to publish.
    fn apply(&self, generation: u64, event: &StreamEvent) -> (bool, Vec<TranscriptEvent>) {
        let mut inner = self.lock();
        let current = inner.generation == generation;
        let mut events = Vec::new();

        if event.is_terminal() {
            inner.abort = None;
            if current {
                if let Some(idx) = inner.open_tail() {
                    let empty = inner.transcript[idx].content.is_empty();
                    if empty && matches!(event, StreamEvent::Error(_)) {
                        let removed = inner.transcript.remove(idx);
                        events.push(inner.event(Change::Removed(removed.id)));
                    } else {
                        inner.transcript[idx].open = false;
                        let id = inner.transcript[idx].id.clone();
                        events.push(inner.event(Change::Closed(id)));
                    }
                }
            } else {
                tracing::debug!("discarding end of a superseded turn");
            }
            match inner.set_state(ConversationState::Idle) {
                Ok(ev) => events.push(ev),
                Err(e) => tracing::error!(error = %e, "state machine out of sync"),
            }
            if let (true, StreamEvent::Error(e)) = (current, event) {
                events.push(inner.event(Change::TurnFailed {
                    user_message: e.user_message(),
                }));
            }
            return (current, events);
        }

        let Some(delta) = event.as_delta() else {
            return (current, events);
        };
        if !current {
            tracing::trace!("discarding delta of a superseded turn");
            return (false, events);
        }
        match inner.open_tail() {
            Some(idx) => {
                inner.transcript[idx].content.push_str(delta);
                let id = inner.transcript[idx].id.clone();
                events.push(inner.event(Change::Updated(id)));
            }
            None => {
                let id = inner.next_id();
                inner.transcript.push(Message {
                    id: id.clone(),
                    role: Role::Assistant,
                    content: delta.to_string(),
                    timestamp_ms: now_ms(),
                    open: true,
                });
                events.push(inner.event(Change::Appended(id)));
            }
        }
        (true, events)
    }

    fn last_assistant_id(&self) -> Option<MessageId> {
        let inner = self.lock();
        inner
            .transcript
            .last()
            .filter(|m| m.role == Role::Assistant && !m.is_welcome())
            .map(|m| m.id.clone())
    }
}

/// Ends the turn as aborted when `submit` is dropped mid-stream, so the
/// controller never stays in `Sending`.
struct TurnGuard<'a, T: ChatTransport> {
    controller: &'a ConversationController<T>,
    generation: u64,
    armed: bool,
}

impl<T: ChatTransport> Drop for TurnGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!("turn dropped before completion");
        let (_, events) = self
            .controller
            .apply(self.generation, &StreamEvent::Error(ChipError::Aborted));
        self.controller.notify(events);
    }
}
