//! Response frame parser
//!
//! The backend answers with one JSON object, a JSON array, or a stream of
//! newline-delimited objects. Chunks arrive at arbitrary boundaries, so
//! bytes are buffered until a newline closes the line.

use super::error::WorkflowError;
use super::record::WorkflowFrame;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;

/// Accumulates raw bytes and yields complete lines
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed.
    ///
    /// Splitting happens on bytes, so a multi-byte UTF-8 sequence cut in
    /// half by the transport is reassembled before it is decoded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| {
                let text = String::from_utf8_lossy(line);
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    /// Unterminated content left when the stream ended
    pub fn finish(self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buffer);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Decode one line. Arrays expand into one frame per object; lines that
/// are not JSON are dropped.
pub fn decode_frames(line: &str) -> Vec<WorkflowFrame> {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => expand(value),
        Err(e) => {
            tracing::warn!(error = %e, line_len = line.len(), "Dropping malformed frame");
            Vec::new()
        }
    }
}

/// Decode a fully buffered body: a single document, an array, or several
/// concatenated documents (pretty-printed or not).
pub fn decode_document(body: &[u8]) -> Vec<WorkflowFrame> {
    let mut frames = Vec::new();
    for value in serde_json::Deserializer::from_slice(body).into_iter::<Value>() {
        match value {
            Ok(value) => frames.extend(expand(value)),
            Err(e) => {
                // The deserializer cannot resynchronize after a syntax error
                tracing::warn!(error = %e, decoded = frames.len(), "Malformed response body");
                break;
            }
        }
    }
    frames
}

fn expand(value: Value) -> Vec<WorkflowFrame> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(WorkflowFrame::from_value).collect(),
        other => {
            let frame = WorkflowFrame::from_value(other);
            if frame.is_none() {
                tracing::debug!("Ignoring non-object frame");
            }
            frame.into_iter().collect()
        }
    }
}

struct StreamState<S> {
    body: Pin<Box<S>>,
    parser: FrameParser,
    ready: VecDeque<WorkflowFrame>,
    done: bool,
}

/// Lazily turn a transport byte stream into frames.
///
/// A transport error is yielded once and ends the stream. Content left
/// without a trailing newline is decoded when the body ends.
pub fn frame_stream<S, B, E>(body: S) -> impl Stream<Item = Result<WorkflowFrame, WorkflowError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<WorkflowError> + Send,
{
    let state = StreamState {
        body: Box::pin(body),
        parser: FrameParser::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for line in state.parser.push(chunk.as_ref()) {
                        state.ready.extend(decode_frames(&line));
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    if let Some(rest) = std::mem::take(&mut state.parser).finish() {
                        state.ready.extend(decode_frames(&rest));
                    }
                }
            }
        }
    })
}
