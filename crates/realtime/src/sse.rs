//! Incremental Server-Sent Events decoder.
//!
//! Bytes arrive in arbitrary chunks; a frame is complete at the first blank
//! line. Lines end in `\r\n`, `\n` or a bare `\r`.

use crate::error::TransportError;

/// Longest line accepted before the stream is considered broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One dispatched SSE message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Keep-alive frames some backends send between real messages.
    pub fn is_keepalive(&self) -> bool {
        matches!(
            self.event.as_deref(),
            Some("heartbeat") | Some("ping") | Some("keepalive")
        )
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// The last line ended in `\r`; a `\n` right after it belongs to that line.
    after_cr: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk; returns every frame it completed.
    ///
    /// Fails once an unterminated line grows past [`MAX_LINE_BYTES`].
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, TransportError> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while start < self.pending.len() {
            if self.after_cr {
                self.after_cr = false;
                if self.pending[start] == b'\n' {
                    start += 1;
                    continue;
                }
            }

            let Some(offset) = self.pending[start..]
                .iter()
                .position(|b| *b == b'\n' || *b == b'\r')
            else {
                break;
            };
            let end = start + offset;
            self.after_cr = self.pending[end] == b'\r';
            let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_LINE_BYTES {
            let len = self.pending.len();
            self.pending.clear();
            return Err(TransportError::Stream(format!(
                "unterminated line of {len} bytes exceeds {MAX_LINE_BYTES}"
            )));
        }
        Ok(frames)
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.clone(),
            retry,
        })
    }
}
