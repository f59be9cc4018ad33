//! Incremental decoder for the proxy's `text/event-stream` body.
//!
//! Bytes arrive in arbitrary chunks. Each chunk is decoded to text (carrying
//! split UTF-8 sequences over to the next chunk), appended to a buffer, and
//! every complete `\n`-terminated line is classified:
//!
//! - empty lines and `:` comments are keepalives,
//! - lines without the `data: ` prefix are ignored,
//! - `data: [DONE]` ends the logical stream,
//! - any other `data: ` line carries a JSON chunk whose
//!   `choices[0].delta.content` is the text delta.
//!
//! A data line whose JSON does not parse is treated as a fragment: it stays at
//! the front of the buffer and extraction pauses until more bytes arrive. A
//! line is therefore consumed only once it parses or is structurally rejected,
//! so no delta is lost or emitted twice across chunk boundaries.

use serde_json::Value;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One logical line of the wire stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Empty line or `:` comment.
    Comment,
    /// Not a data line.
    Ignored,
    /// `data: [DONE]`.
    Done,
    /// Trimmed payload of a `data: ` line.
    Data(&'a str),
}

/// Classify a single line. A trailing `\r` is removed first.
pub fn classify(line: &str) -> Frame<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return Frame::Comment;
    }
    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };
    let payload = rest.trim();
    if payload == DONE_SENTINEL {
        Frame::Done
    } else {
        Frame::Data(payload)
    }
}

/// Parse a data payload. `Err` means the payload is not (yet) valid JSON;
/// `Ok(None)` means valid JSON without a non-empty text delta.
pub fn parse_delta(payload: &str) -> Result<Option<String>, serde_json::Error> {
    let v: Value = serde_json::from_str(payload)?;
    Ok(v
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned))
}

/// Carries an incomplete trailing UTF-8 sequence from one chunk to the next.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Text received but not yet resolved into consumed lines. Consumption only
/// moves `cursor`; the consumed prefix is dropped on the next append.
#[derive(Debug, Default)]
struct DecodeBuffer {
    text: String,
    cursor: usize,
}

impl DecodeBuffer {
    fn append(&mut self, s: &str) {
        if self.cursor > 0 {
            self.text.drain(..self.cursor);
            self.cursor = 0;
        }
        self.text.push_str(s);
    }

    /// Byte index of the `\n` terminating the first pending line.
    fn line_end(&self) -> Option<usize> {
        self.text[self.cursor..]
            .find('\n')
            .map(|i| self.cursor + i)
    }

    fn line(&self, end: usize) -> &str {
        &self.text[self.cursor..end]
    }

    fn consume_through(&mut self, end: usize) {
        self.cursor = end + 1;
    }

    fn pending(&self) -> &str {
        &self.text[self.cursor..]
    }

    fn take_pending(&mut self) -> String {
        let rest = self.text.split_off(self.cursor);
        self.clear();
        rest
    }

    fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }
}

enum Step {
    Skip,
    Done,
    Delta(Option<String>),
    Stall,
}

/// Turns raw body chunks into text deltas. One decoder serves one request.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    utf8: Utf8Carry,
    buf: DecodeBuffer,
    done: bool,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `data: [DONE]` has been seen. Later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of buffered bytes not yet consumed as lines.
    pub fn pending_len(&self) -> usize {
        self.buf.pending().len() + self.utf8.pending.len()
    }

    /// Feed one chunk; returns the deltas it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        if self.done || self.finished {
            return out;
        }
        let text = self.utf8.decode(chunk);
        self.buf.append(&text);

        while let Some(end) = self.buf.line_end() {
            let step = match classify(self.buf.line(end)) {
                Frame::Comment | Frame::Ignored => Step::Skip,
                Frame::Done => Step::Done,
                Frame::Data(payload) => match parse_delta(payload) {
                    Ok(delta) => Step::Delta(delta),
                    Err(_) => Step::Stall,
                },
            };
            match step {
                Step::Skip => self.buf.consume_through(end),
                Step::Delta(delta) => {
                    self.buf.consume_through(end);
                    out.extend(delta);
                }
                Step::Done => {
                    tracing::debug!("stream sentinel reached");
                    self.done = true;
                    self.buf.clear();
                    break;
                }
                Step::Stall => {
                    tracing::debug!(
                        pending = self.buf.pending().len(),
                        "data line did not parse; waiting for more bytes"
                    );
                    break;
                }
            }
        }
        out
    }

    /// Final flush at transport end. Remaining lines, including an
    /// unterminated tail, are classified once more; payloads that still do
    /// not parse are dropped since no further bytes will arrive.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.finished = true;
        if self.done {
            return out;
        }
        let tail = self.utf8.flush();
        self.buf.append(&tail);
        let rest = self.buf.take_pending();

        for raw in rest.split('\n') {
            match classify(raw) {
                Frame::Comment | Frame::Ignored => {}
                Frame::Done => {
                    self.done = true;
                    break;
                }
                Frame::Data(payload) => match parse_delta(payload) {
                    Ok(delta) => out.extend(delta),
                    Err(_) => tracing::debug!(
                        len = payload.len(),
                        "dropping unparsable trailing data line"
                    ),
                },
            }
        }
        out
    }
}
