//! Streaming primitives exposed by chip.
//!
//! Contract:
//! - A delta stream yields 0..n text deltas in arrival order, then ends.
//! - A transport failure is yielded once as `Err(ChipError::Transport)` and the
//!   stream ends after it. Malformed lines never surface here; the decoder
//!   absorbs them.
//! - The stream is finite and cannot be restarted.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;

use crate::decoder::StreamDecoder;
use crate::error::{ChipError, CoreResult};

/// What the controller observes while a turn is streaming.
#[non_exhaustive]
#[derive(Debug)]
pub enum StreamEvent {
    /// Partial assistant text.
    Delta(String),
    /// Stream ended normally.
    Done,
    /// Request-level failure; the turn ends after this.
    Error(ChipError),
}

impl StreamEvent {
    /// Returns true if this event terminates the turn (`Done` or `Error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }

    /// Convenience accessor for `Delta` contents.
    pub fn as_delta(&self) -> Option<&str> {
        match self {
            Self::Delta(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Boxed stream of text deltas. Transports return this.
pub type BoxDeltaStream = Pin<Box<dyn Stream<Item = CoreResult<String>> + Send>>;

/// Raw response body as delivered by the transport.
pub type ByteStream<E> = Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>;

/// Adapts a body byte stream into a stream of text deltas.
pub struct DeltaStream<E> {
    inner: ByteStream<E>,
    decoder: StreamDecoder,
    ready: VecDeque<String>,
    ended: bool,
}

impl<E> DeltaStream<E>
where
    E: std::fmt::Display,
{
    pub fn new(inner: ByteStream<E>) -> Self {
        Self {
            inner,
            decoder: StreamDecoder::new(),
            ready: VecDeque::new(),
            ended: false,
        }
    }
}

impl<E> Stream for DeltaStream<E>
where
    E: std::fmt::Display,
{
    type Item = CoreResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(delta) = self.ready.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }
            if self.ended {
                return Poll::Ready(None);
            }

            // Keep reading after [DONE] so the connection is drained.
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let deltas = self.decoder.push(&chunk);
                    self.ready.extend(deltas);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.ended = true;
                    self.ready.clear();
                    return Poll::Ready(Some(Err(ChipError::transport(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.ended = true;
                    let deltas = self.decoder.finish();
                    self.ready.extend(deltas);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
