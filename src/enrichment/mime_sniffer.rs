//! Content-type detection running beside a body copy.
//!
//! The producer pushes chunks through a bounded channel; a detector task keeps
//! the first `window` bytes, classifies them, and then discards everything
//! else until the producer closes its end. Because the detector never stops
//! receiving, the producer is never stalled for longer than one chunk.

use log::trace;
use serde::de::IgnoredAny;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 8;

pub const JSON: &str = "application/json";
pub const XML: &str = "text/xml; charset=utf-8";
pub const HTML: &str = "text/html; charset=utf-8";
pub const TEXT: &str = "text/plain; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

const HTML_PREFIXES: &[&str] = &[
    "<!doctype html",
    "<html",
    "<head",
    "<body",
    "<script",
    "<title",
    "<iframe",
    "<table",
    "<div",
    "<style",
    "<a ",
    "<p>",
    "<br",
    "<h1",
    "<!--",
];

/// Write end of a running detector plus the slot its result lands in.
pub struct MimeSniffer {
    sender: Option<mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<String>>,
    result: Option<String>,
}

impl MimeSniffer {
    /// Starts a detector that classifies on the first `window` bytes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(window: usize) -> Self {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(detect(receiver, window.max(1)));
        Self {
            sender: Some(sender),
            task: Some(task),
            result: None,
        }
    }

    /// Feeds the next piece of the body. Silently ignored once closed.
    pub async fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(sender) = &self.sender {
            // a dead detector only loses the sniff result
            let _ = sender.send(bytes.to_vec()).await;
        }
    }

    /// Closes the write end and waits for the detector.
    ///
    /// Returns the detected MIME type, empty when nothing was detected.
    /// Calling it again returns the same value.
    pub async fn close(&mut self) -> &str {
        self.sender.take();
        if let Some(task) = self.task.take() {
            self.result = Some(task.await.unwrap_or_default());
        }
        self.result.as_deref().unwrap_or("")
    }

    /// Result of a completed [`close`](Self::close); `None` before that.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

async fn detect(mut receiver: mpsc::Receiver<Vec<u8>>, window: usize) -> String {
    let mut head = Vec::with_capacity(window.min(64 * 1024));
    let mut overflow = false;
    while head.len() < window {
        match receiver.recv().await {
            Some(chunk) => {
                let room = window - head.len();
                if chunk.len() > room {
                    overflow = true;
                }
                head.extend_from_slice(&chunk[..room.min(chunk.len())]);
            }
            None => break,
        }
    }

    let mime = classify(&head, overflow || head.len() == window);

    let mut discarded = 0usize;
    while let Some(chunk) = receiver.recv().await {
        discarded += chunk.len();
    }
    trace!("sniffed {:?} from {} bytes, discarded {}", mime, head.len(), discarded);
    mime
}

/// Best-effort MIME type of `head`, empty for empty input.
///
/// `truncated` tells whether `head` is only a prefix of the content, in which
/// case text formats are judged leniently at the cut.
pub fn classify(head: &[u8], truncated: bool) -> String {
    if head.is_empty() {
        return String::new();
    }
    if let Some(kind) = infer::get(head) {
        if !matches!(kind.matcher_type(), infer::MatcherType::Text) {
            return kind.mime_type().to_string();
        }
    }

    let trimmed = trim_ascii_start(head);
    if is_json(trimmed, truncated) {
        return JSON.to_string();
    }

    let lower: Vec<u8> = trimmed.iter().take(64).map(|b| b.to_ascii_lowercase()).collect();
    if lower.starts_with(b"<?xml") {
        return XML.to_string();
    }
    if HTML_PREFIXES.iter().any(|p| lower.starts_with(p.as_bytes())) {
        return HTML.to_string();
    }
    if is_text(head, truncated) {
        return TEXT.to_string();
    }
    OCTET_STREAM.to_string()
}

fn trim_ascii_start(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let bytes = &bytes[start..];
    // UTF-8 byte order mark
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

fn is_json(bytes: &[u8], truncated: bool) -> bool {
    if !matches!(bytes.first(), Some(b'{') | Some(b'[')) {
        return false;
    }
    match serde_json::from_slice::<IgnoredAny>(bytes) {
        Ok(_) => true,
        Err(e) => truncated && e.is_eof(),
    }
}

fn is_text(bytes: &[u8], truncated: bool) -> bool {
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => true,
        // a multi-byte sequence cut by the window
        Err(e) => truncated && e.error_len().is_none(),
    };
    valid
        && !bytes
            .iter()
            .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b))
}
