//! Server-Sent Events framing of the chat event stream.

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use tracing::{debug, error, info};

use crate::events::{EventStream, StreamEvent};

/// Headers sent with every streaming response, preflight included.
pub const SSE_HEADERS: [(&str, &str); 6] = [
    ("content-type", "text/event-stream; charset=utf-8"),
    ("cache-control", "no-cache"),
    ("connection", "keep-alive"),
    ("access-control-allow-origin", "*"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "POST, OPTIONS"),
];

/// Body written for an OPTIONS request.
pub const PREFLIGHT_FRAME: &str = "data: OK\n\n";

pub type FrameStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

pub fn sse_frame(event: &StreamEvent) -> Result<Bytes, serde_json::Error> {
    let payload = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {payload}\n\n")))
}

pub fn error_frame(message: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        json!({ "type": "error", "errorText": message })
    ))
}

/// Logs when the consumer goes away before a terminal frame was written.
#[derive(Default)]
struct DrainGuard {
    frames: usize,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if self.finished {
            debug!(frames = self.frames, "event stream drained");
        } else {
            info!(frames = self.frames, "client disconnected before the stream finished");
        }
    }
}

/// Writes one frame per event, in order. Nothing follows a terminal `error` or `finish`.
pub fn frames(mut events: EventStream) -> FrameStream {
    Box::pin(stream! {
        let mut guard = DrainGuard::default();

        while let Some(event) = events.next().await {
            match sse_frame(&event) {
                Ok(frame) => {
                    guard.frames += 1;
                    guard.finished = event.is_terminal();
                    yield frame;
                    if guard.finished {
                        return;
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to serialize stream event");
                    guard.finished = true;
                    yield error_frame(&format!("Failed to serialize stream event: {e}"));
                    return;
                }
            }
        }
        guard.finished = true;
    })
}
