//! Server-sent-events decoding for streaming model responses.
//!
//! Chat-completions endpoints frame their stream as SSE: events separated by
//! blank lines, payload carried in `data:` fields, and a literal `[DONE]`
//! event closing the stream. [`SseDecoder`] turns raw body bytes into those
//! payloads; [`sse_payloads`] lifts it over a `reqwest` byte stream.
//!
//! Per the SSE framing rules, an event may span several `data:` lines (the
//! decoder joins them with `\n`), comment lines start with `:`, and field
//! names other than `data` (`event:`, `id:`, `retry:`) carry nothing the
//! chat protocol uses, so they are dropped.

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::Result;

/// The terminator payload ending a chat-completions stream.
const DONE_PAYLOAD: &str = "[DONE]";

/// Incremental SSE decoder.
///
/// Feed it body chunks as they arrive; it hands back every event payload
/// completed by that chunk. Split UTF-8 sequences and events straddling
/// chunk boundaries are handled by buffering.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk and return the payloads it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        // Process every full line currently buffered; a trailing partial
        // line stays pending until more bytes arrive.
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop(); // the \n itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(payload) = self.take_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush the decoder at end of stream, returning a final payload if the
    /// body ended without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = line.strip_suffix(b"\r").unwrap_or(&line).to_vec();
            if let Some(payload) = self.take_line(&line) {
                return Some(payload);
            }
        }
        self.flush_event()
    }

    /// Whether a payload is the stream terminator.
    #[must_use]
    pub fn is_terminator(payload: &str) -> bool {
        payload.trim() == DONE_PAYLOAD
    }

    /// Handle one complete line; a blank line closes the current event.
    fn take_line(&mut self, line: &[u8]) -> Option<String> {
        if line.is_empty() {
            return self.flush_event();
        }

        let text = String::from_utf8_lossy(line);
        let (field, rest) = match text.split_once(':') {
            Some((field, rest)) => (field, rest.strip_prefix(' ').unwrap_or(rest)),
            // A field line without a colon names a field with empty value.
            None => (text.as_ref(), ""),
        };
        // An empty field name is an SSE comment; only `data` matters here.
        if field == "data" {
            self.data_lines.push(rest.to_owned());
        }
        None
    }

    fn flush_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data_lines).join("\n"))
    }
}

/// Decode a `reqwest` byte stream into SSE data payloads.
///
/// The stream ends at the `[DONE]` terminator (or when the body does);
/// transport errors surface as generation errors.
pub fn sse_payloads<S>(body: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    stream! {
        let mut body = body;
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for payload in decoder.feed(&bytes) {
                        if SseDecoder::is_terminator(&payload) {
                            return;
                        }
                        yield Ok(payload);
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            if !SseDecoder::is_terminator(&payload) {
                yield Ok(payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut SseDecoder, input: &str) -> Vec<String> {
        let mut payloads = decoder.feed(input.as_bytes());
        payloads.extend(decoder.finish());
        payloads
    }

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let payloads = feed_all(&mut decoder, "data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_multi_line_data_joined_with_newline() {
        let mut decoder = SseDecoder::new();
        let payloads = feed_all(&mut decoder, "data: first\ndata: second\n\n");
        assert_eq!(payloads, vec!["first\nsecond"]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"da").is_empty());
        assert!(decoder.feed(b"ta: hel").is_empty());
        let payloads = decoder.feed(b"lo\n\ndata: next\n\n");
        assert_eq!(payloads, vec!["hello", "next"]);
    }

    #[test]
    fn test_comments_and_foreign_fields_dropped() {
        let mut decoder = SseDecoder::new();
        let payloads = feed_all(
            &mut decoder,
            ": keep-alive\nevent: message\nid: 7\nretry: 100\ndata: x\n\n",
        );
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = SseDecoder::new();
        let payloads = feed_all(&mut decoder, "data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(payloads, vec!["a", "b"]);
    }

    #[test]
    fn test_unterminated_final_event_flushes() {
        let mut decoder = SseDecoder::new();
        let payloads = feed_all(&mut decoder, "data: tail");
        assert_eq!(payloads, vec!["tail"]);
    }

    #[test]
    fn test_terminator_detection() {
        assert!(SseDecoder::is_terminator("[DONE]"));
        assert!(SseDecoder::is_terminator(" [DONE] "));
        assert!(!SseDecoder::is_terminator("[done]"));
        assert!(!SseDecoder::is_terminator("{}"));
    }

    #[tokio::test]
    async fn test_payload_stream_stops_at_terminator() {
        let chunks: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"data: one\n\nda")),
            Ok(Bytes::from_static(b"ta: two\n\ndata: [DONE]\n\ndata: after\n\n")),
        ];
        let payloads: Vec<String> = sse_payloads(futures::stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(payloads, vec!["one", "two"]);
    }
}
