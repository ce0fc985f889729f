//! Streaming relay with failover up to the first delivered line.
//!
//! Backends emit newline-delimited JSON. The relay forwards each complete
//! line to the client as soon as it is read. A transient failure before the
//! first line moves the request to another backend; after it, the stream is
//! terminated instead, since a retry would replay output the client already has.
//!
//! The backend slot lives inside the relay, so it is released when the stream
//! ends, fails, or is dropped because the client went away.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{stream, Stream, StreamExt};
use serde_json::Value;

use super::client::{BackendClient, BackendError, ByteStream};
use super::registry::{BackendSlot, Registry};
use super::retry::Failover;
use crate::error::GatewayError;

/// Longest line a backend may send. A longer one fails the stream.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line, terminated with a single `\n`.
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                return None;
            };
            let pos = self.scanned + offset;
            let line = self.buf.split_to(pos + 1);
            self.scanned = 0;
            if let Some(line) = terminate(&line[..pos]) {
                return Some(line);
            }
        }
    }

    /// Bytes buffered but not yet returned as lines.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Whatever is left once the body has ended, as a final line.
    pub fn finish(&mut self) -> Option<Bytes> {
        let rest = self.buf.split();
        self.scanned = 0;
        terminate(&rest)
    }
}

fn terminate(line: &[u8]) -> Option<Bytes> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let mut out = BytesMut::with_capacity(line.len() + 1);
    out.extend_from_slice(line);
    out.extend_from_slice(b"\n");
    Some(out.freeze())
}

struct ActiveStream {
    slot: BackendSlot,
    body: ByteStream,
    lines: LineBuffer,
}

/// One streaming request in flight.
pub struct StreamRelay {
    registry: Arc<Registry>,
    client: BackendClient,
    payload: Value,
    failover: Failover,
    active: Option<ActiveStream>,
    backend: Option<String>,
    delivered: bool,
    finished: bool,
}

impl StreamRelay {
    pub fn new(
        registry: Arc<Registry>,
        client: BackendClient,
        payload: Value,
        failover: Failover,
    ) -> Self {
        Self {
            registry,
            client,
            payload,
            failover,
            active: None,
            backend: None,
            delivered: false,
            finished: false,
        }
    }

    /// Backend of the most recently opened stream.
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    /// Whether any line has been handed out yet.
    pub fn delivered(&self) -> bool {
        self.delivered
    }

    /// Next line for the client.
    ///
    /// Returns `None` once the backend finished cleanly. An error is always the
    /// last item.
    pub async fn next_line(&mut self) -> Option<Result<Bytes, GatewayError>> {
        loop {
            if self.finished {
                return None;
            }

            let Some(active) = self.active.as_mut() else {
                if let Err(e) = self.open_next().await {
                    self.finished = true;
                    return Some(Err(e));
                }
                continue;
            };

            if let Some(line) = active.lines.next_line() {
                self.delivered = true;
                return Some(Ok(line));
            }

            if active.lines.pending() > MAX_LINE_BYTES {
                let detail = format!("line longer than {} bytes", MAX_LINE_BYTES);
                if let Some(err) = self.fail_active(detail) {
                    return Some(Err(err));
                }
                continue;
            }

            match active.body.next().await {
                Some(Ok(chunk)) => active.lines.push(&chunk),
                Some(Err(e)) => {
                    if let Some(err) = self.fail_active(e.to_string()) {
                        return Some(Err(err));
                    }
                }
                None => {
                    let tail = active.lines.finish();
                    if let Some(active) = self.active.take() {
                        tracing::debug!("Stream from {} completed", active.slot.name());
                    }
                    self.finished = true;
                    if let Some(line) = tail {
                        self.delivered = true;
                        return Some(Ok(line));
                    }
                    return None;
                }
            }
        }
    }

    /// Turn the relay into a stream of lines for a response body.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send + 'static {
        stream::unfold(self, |mut relay| async move {
            let item = relay.next_line().await?;
            Some((item, relay))
        })
    }

    async fn open_next(&mut self) -> Result<(), GatewayError> {
        loop {
            let slot = self.failover.next_slot(&self.registry)?;
            tracing::info!(
                "Routing stream request to {} (attempt {})",
                slot.name(),
                self.failover.attempts()
            );

            match self.client.open_stream(slot.base_url(), &self.payload).await {
                Ok(body) => {
                    self.backend = Some(slot.name().to_string());
                    self.active = Some(ActiveStream {
                        slot,
                        body,
                        lines: LineBuffer::default(),
                    });
                    return Ok(());
                }
                Err(BackendError::Transient(detail)) => {
                    self.failover.record_transient(&self.registry, &slot, &detail);
                }
                Err(BackendError::Application {
                    status,
                    content_type,
                    body,
                }) => {
                    tracing::info!("Backend {} rejected stream with HTTP {}", slot.name(), status);
                    return Err(GatewayError::BackendApplication {
                        backend: slot.name().to_string(),
                        status,
                        content_type,
                        body,
                    });
                }
            }
        }
    }

    /// Drop the current backend after a read failure. Returns the error to
    /// surface when failover is no longer allowed.
    fn fail_active(&mut self, detail: String) -> Option<GatewayError> {
        let active = self.active.take()?;

        if !self.delivered {
            // Nothing reached the client: discard any partial line and retry.
            self.failover.record_transient(&self.registry, &active.slot, &detail);
            return None;
        }

        self.registry.eject(active.slot.id());
        tracing::warn!(
            "Stream from {} failed after partial output, terminating: {}",
            active.slot.name(),
            detail
        );
        self.finished = true;
        Some(GatewayError::StreamTerminated {
            backend: active.slot.name().to_string(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::test_util::{ndjson, Script, ScriptedBackend};
    use serde_json::json;
    use std::time::Duration;

    fn lines(buffer: &mut LineBuffer) -> Vec<String> {
        std::iter::from_fn(|| buffer.next_line())
            .map(|l| String::from_utf8(l.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"{\"response\":\"he");
        assert!(buffer.next_line().is_none());
        buffer.push(b"llo\"}\n{\"response\"");
        assert_eq!(lines(&mut buffer), vec!["{\"response\":\"hello\"}\n"]);
        buffer.push(b":\"!\"}\n");
        assert_eq!(lines(&mut buffer), vec!["{\"response\":\"!\"}\n"]);
    }

    #[test]
    fn test_blank_lines_skipped_and_crlf_normalized() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"a\r\n\n   \nb\n");
        assert_eq!(lines(&mut buffer), vec!["a\n", "b\n"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_tail() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"a\n{\"done\":true}");
        assert_eq!(lines(&mut buffer), vec!["a\n"]);
        assert_eq!(buffer.finish().as_deref(), Some(&b"{\"done\":true}\n"[..]));
        assert!(buffer.finish().is_none());
    }

    #[test]
    fn test_scan_resumes_after_partial_line() {
        let mut buffer = LineBuffer::default();
        for _ in 0..100 {
            buffer.push(b"x");
            assert!(buffer.next_line().is_none());
        }
        assert_eq!(buffer.scanned, 100);
        assert_eq!(buffer.pending(), 100);

        buffer.push(b"\nnext");
        let line = buffer.next_line().unwrap();
        assert_eq!(line.len(), 101);
        assert_eq!(buffer.scanned, 0);
        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.scanned, 4);
        assert_eq!(buffer.finish().as_deref(), Some(&b"next\n"[..]));
    }

    fn relay_for(backends: &[BackendConfig]) -> (Arc<Registry>, StreamRelay) {
        let registry = Arc::new(Registry::new(backends));
        let client = BackendClient::new(Duration::from_secs(5), Duration::from_secs(1));
        let relay = StreamRelay::new(
            Arc::clone(&registry),
            client,
            json!({"prompt": "hi", "stream": true}),
            Failover::new(2),
        );
        (registry, relay)
    }

    #[tokio::test]
    async fn test_relay_holds_slot_until_end() {
        let backend = ScriptedBackend::start(Script::Complete(ndjson(&["one", "two"]))).await;
        let (registry, mut relay) = relay_for(&[backend.config("a")]);

        let first = relay.next_line().await.unwrap().unwrap();
        assert_eq!(&first[..], b"one\n");
        assert!(relay.delivered());
        assert_eq!(relay.backend(), Some("a"));
        assert_eq!(registry.total_load(), 1);

        let second = relay.next_line().await.unwrap().unwrap();
        assert_eq!(&second[..], b"two\n");
        assert!(relay.next_line().await.is_none());
        assert!(relay.next_line().await.is_none());
        assert_eq!(registry.total_load(), 0);
    }

    #[tokio::test]
    async fn test_relay_fails_over_before_first_line() {
        let broken = ScriptedBackend::start(Script::DropAfter(Vec::new())).await;
        let healthy = ScriptedBackend::start(Script::Complete(ndjson(&["ok"]))).await;
        let (registry, mut relay) = relay_for(&[broken.config("a"), healthy.config("b")]);

        let line = relay.next_line().await.unwrap().unwrap();
        assert_eq!(&line[..], b"ok\n");
        assert_eq!(relay.backend(), Some("b"));
        assert!(!registry.get("a").unwrap().active);
        assert_eq!(broken.requests(), 1);
    }

    #[tokio::test]
    async fn test_relay_terminates_after_partial_output() {
        let broken = ScriptedBackend::start(Script::DropAfter(ndjson(&["partial"]))).await;
        let spare = ScriptedBackend::start(Script::Complete(ndjson(&["other"]))).await;
        let (registry, mut relay) = relay_for(&[broken.config("a"), spare.config("b")]);

        let line = relay.next_line().await.unwrap().unwrap();
        assert_eq!(&line[..], b"partial\n");

        let err = relay.next_line().await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::StreamTerminated { ref backend, .. } if backend == "a"));
        assert!(relay.next_line().await.is_none());

        assert_eq!(spare.requests(), 0);
        assert!(!registry.get("a").unwrap().active);
        assert_eq!(registry.total_load(), 0);
    }

    #[tokio::test]
    async fn test_oversized_line_fails_over() {
        let oversized = "x".repeat(MAX_LINE_BYTES + 1);
        let flooding = ScriptedBackend::start(Script::Hang(vec![oversized])).await;
        let healthy = ScriptedBackend::start(Script::Complete(ndjson(&["ok"]))).await;
        let (registry, mut relay) = relay_for(&[flooding.config("a"), healthy.config("b")]);

        let line = relay.next_line().await.unwrap().unwrap();
        assert_eq!(&line[..], b"ok\n");
        assert_eq!(relay.backend(), Some("b"));
        assert!(!registry.get("a").unwrap().active);
    }

    #[tokio::test]
    async fn test_dropping_relay_releases_slot() {
        let backend = ScriptedBackend::start(Script::Hang(ndjson(&["first"]))).await;
        let (registry, mut relay) = relay_for(&[backend.config("a")]);

        relay.next_line().await.unwrap().unwrap();
        assert_eq!(registry.total_load(), 1);

        drop(relay);
        assert_eq!(registry.total_load(), 0);
        assert!(registry.get("a").unwrap().active);
    }
}
