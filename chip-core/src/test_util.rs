#![cfg(test)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream;

use crate::error::{ChipError, CoreResult};
use crate::model::ChatRequest;
use crate::stream::{BoxDeltaStream, DeltaStream};
use crate::transport::ChatTransport;

/// One canned answer of a `ScriptedTransport`.
pub enum Reply {
    /// Body chunks delivered back to back; `Err` is a transport failure.
    Chunks(Vec<Result<String, String>>),
    /// Body chunks pushed by the test through the paired sender.
    Live(mpsc::UnboundedReceiver<Result<Bytes, String>>),
    /// Request fails before any body arrives.
    Fail(ChipError),
}

pub type LiveSender = mpsc::UnboundedSender<Result<Bytes, String>>;

pub fn live() -> (LiveSender, Reply) {
    let (tx, rx) = mpsc::unbounded();
    (tx, Reply::Live(rx))
}

/// One SSE data line carrying `text` as the delta.
pub fn frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices":[{"delta":{"content": text}}]})
    )
}

pub fn send(tx: &LiveSender, body: &str) {
    tx.unbounded_send(Ok(Bytes::from(body.to_string())))
        .expect("live reply receiver dropped");
}

/// Transport that answers requests from a queue and records what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn stream_chat(&self, req: &ChatRequest, _request_id: &str) -> CoreResult<BoxDeltaStream> {
        self.requests.lock().unwrap().push(req.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Chunks(parts)) => {
                let body = stream::iter(parts.into_iter().map(|p| p.map(Bytes::from)));
                Ok(Box::pin(DeltaStream::new(Box::pin(body))))
            }
            Some(Reply::Live(rx)) => Ok(Box::pin(DeltaStream::new(Box::pin(rx)))),
            Some(Reply::Fail(e)) => Err(e),
            None => Err(ChipError::Validation("no scripted reply left".into())),
        }
    }
}

/// Yield to the runtime until `cond` holds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
