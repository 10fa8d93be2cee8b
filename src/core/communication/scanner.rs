//! Marker-terminated, cancellable scanning over the read end of a stream.

use crate::core::communication::{control::Marker, decoder::Utf8Decoder, transport::ByteReader};
use crate::domain::error::{ReplComError, ReplComResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Cooperative cancellation signal shared between a scan and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Calling this more than once, or with no scan running, is harmless.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Read end of the connection plus the bytes a previous scan left unconsumed.
pub struct StreamReader {
    inner: Box<dyn ByteReader>,
    pushback: Vec<u8>,
    bytes_read: u64,
}

impl StreamReader {
    pub fn new(inner: Box<dyn ByteReader>) -> Self {
        Self {
            inner,
            pushback: Vec::new(),
            bytes_read: 0,
        }
    }

    /// Return bytes to the front of the stream for the next scan.
    pub fn push_back(&mut self, mut bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        bytes.extend_from_slice(&self.pushback);
        self.pushback = bytes;
    }

    fn take_pushback(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pushback)
    }

    pub fn pending_len(&self) -> usize {
        self.pushback.len()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    async fn read_chunk(&mut self) -> ReplComResult<Option<Vec<u8>>> {
        let chunk = self.inner.read().await?;
        if let Some(bytes) = &chunk {
            self.bytes_read += bytes.len() as u64;
        }
        Ok(chunk)
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    Marker,
    EndOfStream,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Decoded text up to (not including) the marker. Empty for passthrough scans.
    pub text: String,
    pub end: ScanEnd,
}

impl ScanOutcome {
    pub fn found_marker(&self) -> bool {
        self.end == ScanEnd::Marker
    }
}

/// Decoding and marker matching state of one scan.
///
/// Text is handed to the observer as soon as it cannot be the start of the
/// marker, so the concatenation of everything emitted always equals the final
/// text.
#[derive(Debug)]
pub struct Scanner {
    marker: Marker,
    keep_text: bool,
    decoder: Utf8Decoder,
    text: String,
    emitted: usize,
    leftover: Vec<u8>,
    matched: bool,
}

impl Scanner {
    pub fn new(marker: Marker) -> Self {
        Self {
            marker,
            keep_text: true,
            decoder: Utf8Decoder::new(),
            text: String::new(),
            emitted: 0,
            leftover: Vec::new(),
            matched: false,
        }
    }

    /// A scan that forwards text without accumulating it.
    pub fn passthrough() -> Self {
        Self {
            keep_text: false,
            ..Self::new(Marker::None)
        }
    }

    /// Feed one chunk. Returns true once the marker has been seen.
    pub fn feed(&mut self, chunk: &[u8], observer: &mut (dyn FnMut(&str) + Send)) -> bool {
        if self.matched {
            self.leftover.extend_from_slice(chunk);
            return true;
        }

        let decoded = self.decoder.decode(chunk);
        if decoded.is_empty() {
            return false;
        }
        let previous_len = self.text.len();
        self.text.push_str(&decoded);

        let marker = match &self.marker {
            Marker::None => {
                self.emit_up_to(self.text.len(), observer);
                return false;
            }
            Marker::Text(marker) => marker.clone(),
        };

        let mut search_from = previous_len.saturating_sub(marker.len().saturating_sub(1));
        while !self.text.is_char_boundary(search_from) {
            search_from -= 1;
        }

        if let Some(offset) = self.text[search_from..].find(&marker) {
            let at = search_from + offset;
            let mut rest = self.text.split_off(at).into_bytes();
            rest.drain(..marker.len());
            self.emit_up_to(self.text.len(), observer);
            rest.extend_from_slice(&self.decoder.take_pending());
            self.leftover = rest;
            self.matched = true;
            return true;
        }

        let held = held_back_len(&self.text, &marker);
        self.emit_up_to(self.text.len() - held, observer);
        false
    }

    /// End of stream: flush whatever is held back.
    pub fn finish_stream(&mut self, observer: &mut (dyn FnMut(&str) + Send)) {
        let tail = self.decoder.finish();
        self.text.push_str(&tail);
        self.emit_up_to(self.text.len(), observer);
    }

    /// Bytes that were read but not delivered, for the next reader.
    pub fn take_unconsumed(&mut self) -> Vec<u8> {
        if self.matched {
            return std::mem::take(&mut self.leftover);
        }
        let mut bytes = self.text.as_bytes()[self.emitted..].to_vec();
        self.text.truncate(self.emitted);
        bytes.extend_from_slice(&self.decoder.take_pending());
        bytes
    }

    pub fn into_text(self) -> String {
        self.text
    }

    fn emit_up_to(&mut self, end: usize, observer: &mut (dyn FnMut(&str) + Send)) {
        if end > self.emitted {
            observer(&self.text[self.emitted..end]);
            self.emitted = end;
        }
        if !self.keep_text {
            self.text.drain(..self.emitted);
            self.emitted = 0;
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn held_back_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| marker.is_char_boundary(k) && text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

/// Run one scan over `reader` until the marker, end of stream, cancellation or timeout.
///
/// Bytes read past the marker, or held when the scan is cancelled, are pushed
/// back onto `reader` so the next scan sees them.
pub async fn scan(
    reader: &mut StreamReader,
    mut scanner: Scanner,
    cancel: &CancelToken,
    timeout: Option<Duration>,
    observer: &mut (dyn FnMut(&str) + Send),
) -> ReplComResult<ScanOutcome> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let pushed = reader.take_pushback();
    if !pushed.is_empty() && scanner.feed(&pushed, observer) {
        reader.push_back(scanner.take_unconsumed());
        return Ok(ScanOutcome {
            text: scanner.into_text(),
            end: ScanEnd::Marker,
        });
    }

    loop {
        if cancel.is_cancelled() {
            reader.push_back(scanner.take_unconsumed());
            debug!("Scan cancelled");
            return Ok(ScanOutcome {
                text: scanner.into_text(),
                end: ScanEnd::Cancelled,
            });
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => continue,
            _ = wait_until(deadline) => {
                reader.push_back(scanner.take_unconsumed());
                let timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                return Err(ReplComError::Timeout { timeout_ms });
            }
            chunk = reader.read_chunk() => chunk,
        };

        match next {
            Ok(Some(chunk)) => {
                trace!("Scan received {} bytes", chunk.len());
                if scanner.feed(&chunk, observer) {
                    reader.push_back(scanner.take_unconsumed());
                    return Ok(ScanOutcome {
                        text: scanner.into_text(),
                        end: ScanEnd::Marker,
                    });
                }
            }
            Ok(None) => {
                scanner.finish_stream(observer);
                debug!("Scan reached end of stream");
                return Ok(ScanOutcome {
                    text: scanner.into_text(),
                    end: ScanEnd::EndOfStream,
                });
            }
            Err(e) => return Err(e),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ChunkReader {
        chunks: VecDeque<ReplComResult<Vec<u8>>>,
    }

    impl ChunkReader {
        fn boxed(chunks: &[&[u8]]) -> Box<dyn ByteReader> {
            Box::new(Self {
                chunks: chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            })
        }
    }

    #[async_trait]
    impl ByteReader for ChunkReader {
        async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>> {
            self.chunks.pop_front().transpose()
        }
    }

    fn collect_into(out: &mut String) -> impl FnMut(&str) + Send + '_ {
        move |text: &str| out.push_str(text)
    }

    #[tokio::test]
    async fn test_handshake_then_section() {
        let mut reader = StreamReader::new(ChunkReader::boxed(&[b"OK1+1\r\n2\r\n\x04"]));
        let cancel = CancelToken::new();

        let ack = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &cancel,
            None,
            &mut |_: &str| {},
        )
        .await
        .unwrap();
        assert_eq!(ack.text, "");
        assert!(ack.found_marker());

        let output = scan(
            &mut reader,
            Scanner::new(Marker::end_of_section()),
            &cancel,
            None,
            &mut |_: &str| {},
        )
        .await
        .unwrap();
        assert_eq!(output.text, "1+1\r\n2\r\n");
        assert!(output.found_marker());
    }

    #[tokio::test]
    async fn test_marker_split_across_chunks() {
        let mut reader = StreamReader::new(ChunkReader::boxed(&[b"hello O", b"K tail"]));
        let mut emitted = String::new();
        let outcome = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &CancelToken::new(),
            None,
            &mut collect_into(&mut emitted),
        )
        .await
        .unwrap();

        assert_eq!(outcome.text, "hello ");
        assert_eq!(emitted, "hello ");
        assert_eq!(reader.pending_len(), " tail".len());
    }

    #[tokio::test]
    async fn test_no_marker_reads_to_end() {
        let mut reader = StreamReader::new(ChunkReader::boxed(&[b"ab", b"c\xc2", b"\xb5"]));
        let outcome = scan(
            &mut reader,
            Scanner::new(Marker::None),
            &CancelToken::new(),
            None,
            &mut |_: &str| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.text, "abcµ");
        assert_eq!(outcome.end, ScanEnd::EndOfStream);
        assert_eq!(reader.bytes_read(), 5);
    }

    #[tokio::test]
    async fn test_partial_marker_released_at_end_of_stream() {
        let mut reader = StreamReader::new(ChunkReader::boxed(&[b"done O"]));
        let mut emitted = String::new();
        let outcome = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &CancelToken::new(),
            None,
            &mut collect_into(&mut emitted),
        )
        .await
        .unwrap();
        assert_eq!(outcome.text, "done O");
        assert_eq!(emitted, "done O");
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let mut reader = StreamReader::new(Box::new(ChunkReader {
            chunks: VecDeque::from(vec![
                Ok(b"partial".to_vec()),
                Err(ReplComError::transport("device unplugged")),
            ]),
        }));
        let result = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &CancelToken::new(),
            None,
            &mut |_: &str| {},
        )
        .await;
        assert!(matches!(result, Err(ReplComError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_scan_keeps_pushback() {
        let mut reader = StreamReader::new(ChunkReader::boxed(&[]));
        reader.push_back(b"queued".to_vec());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &cancel,
            None,
            &mut |_: &str| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.end, ScanEnd::Cancelled);
        assert_eq!(outcome.text, "queued");
        assert_eq!(reader.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_read() {
        struct Silent;

        #[async_trait]
        impl ByteReader for Silent {
            async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>> {
                std::future::pending().await
            }
        }

        let mut reader = StreamReader::new(Box::new(Silent));
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let outcome = scan(&mut reader, Scanner::passthrough(), &cancel, None, &mut |_: &str| {})
            .await
            .unwrap();
        assert_eq!(outcome.end, ScanEnd::Cancelled);
    }

    #[tokio::test]
    async fn test_deadline_returns_timeout() {
        struct Silent;

        #[async_trait]
        impl ByteReader for Silent {
            async fn read(&mut self) -> ReplComResult<Option<Vec<u8>>> {
                std::future::pending().await
            }
        }

        let mut reader = StreamReader::new(Box::new(Silent));
        let result = scan(
            &mut reader,
            Scanner::new(Marker::raw_ack()),
            &CancelToken::new(),
            Some(Duration::from_millis(20)),
            &mut |_: &str| {},
        )
        .await;
        assert!(matches!(result, Err(ReplComError::Timeout { timeout_ms: 20 })));
    }

    #[test]
    fn test_passthrough_does_not_accumulate() {
        let mut scanner = Scanner::passthrough();
        let mut emitted = String::new();
        scanner.feed(b">>> ", &mut collect_into(&mut emitted));
        scanner.feed(b"print(1)", &mut collect_into(&mut emitted));
        assert_eq!(emitted, ">>> print(1)");
        assert_eq!(scanner.into_text(), "");
    }

    #[test]
    fn test_held_back_len() {
        assert_eq!(held_back_len("abc O", "OK"), 1);
        assert_eq!(held_back_len("abc", "OK"), 0);
        assert_eq!(held_back_len("x\u{4}", "\u{4}"), 0);
    }
}
