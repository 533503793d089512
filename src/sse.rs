//! Incremental Server-Sent Events decoding.
//!
//! The server streams lines of the form:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```
//!
//! Network chunks do not respect line boundaries, so a payload can arrive in
//! several pieces. [`StreamDecoder`] keeps the unfinished tail of a chunk and
//! retries it once the next chunk arrives.

use std::marker::PhantomData;

use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::http::ByteStream;
use crate::model::ApiErrorResponse;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use aiclient::sse::parse_sse_line;
///
/// assert_eq!(parse_sse_line("data: {\"key\": \"value\"}"), Some("{\"key\": \"value\"}"));
/// assert_eq!(parse_sse_line(": keep-alive"), None);
/// assert_eq!(parse_sse_line("data:no-space"), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(|s| s.trim())
}

/// Check if an SSE data payload is the end-of-stream sentinel.
///
/// # Example
/// ```
/// use aiclient::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_MARKER
}

/// Non-empty `data: ` payloads of `text`, in line order.
fn data_payloads(text: &str) -> Vec<&str> {
    text.trim()
        .split(|c: char| c == '\n' || c == '\r')
        .filter_map(|line| parse_sse_line(line.trim()))
        .filter(|payload| !payload.is_empty())
        .collect()
}

/// Unterminated last line of `text` that could still grow into a `data: `
/// prefix once the next chunk arrives.
fn partial_prefix(text: &str) -> Option<&str> {
    let start = text
        .rfind(|c: char| c == '\n' || c == '\r')
        .map_or(0, |pos| pos + 1);
    let tail = &text[start..];
    let candidate = tail.trim_start();
    (!candidate.is_empty() && DATA_PREFIX.starts_with(candidate)).then_some(tail)
}

/// Per-connection decoding state.
///
/// Each call to [`decode`](Self::decode) handles exactly one network chunk and
/// returns the events and errors it produced, in the order their lines
/// appeared. A payload that fails to parse is:
///
/// - reported as [`ClientError::Api`] when it is the server's error object,
/// - held back silently when it is the last payload of the chunk, since the
///   rest of it is most likely in the next chunk,
/// - reported as [`ClientError::Parse`] otherwise.
///
/// # Example
/// ```
/// use aiclient::sse::StreamDecoder;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, PartialEq)]
/// struct Event { id: String }
///
/// let mut decoder = StreamDecoder::<Event>::new();
/// assert!(decoder.decode(b"data: {\"id\"").is_empty());
///
/// let events = decoder.decode(b":\"1\"}\n");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].as_ref().unwrap(), &Event { id: "1".to_string() });
/// ```
pub struct StreamDecoder<T> {
    buffer: String,
    // Trailing bytes of an incomplete UTF-8 sequence.
    carry: Vec<u8>,
    _event: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for StreamDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("buffer", &self.buffer)
            .field("carry", &self.carry)
            .finish()
    }
}

impl<T> Default for StreamDecoder<T> {
    fn default() -> Self {
        Self {
            buffer: String::new(),
            carry: Vec::new(),
            _event: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> StreamDecoder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text held over from the previous chunk, if any.
    pub fn pending_fragment(&self) -> Option<&str> {
        Some(self.buffer.as_str()).filter(|fragment| !fragment.is_empty())
    }

    /// Decode one chunk of the response body.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Result<T, ClientError>> {
        let Some(text) = self.take_text(chunk) else {
            debug!(len = chunk.len(), "discarding non UTF-8 chunk");
            return vec![Err(ClientError::UnknownContent)];
        };
        if text.is_empty() {
            return Vec::new();
        }

        let combined = std::mem::take(&mut self.buffer) + &text;

        // A chunk boundary inside the `data: ` prefix would otherwise drop
        // the line, since it no longer looks like data on either side.
        let (complete, prefix_tail) = match partial_prefix(&combined) {
            Some(tail) => (&combined[..combined.len() - tail.len()], Some(tail)),
            None => (combined.as_str(), None),
        };

        let payloads = data_payloads(complete);
        let mut results = Vec::with_capacity(payloads.len());

        if payloads.first().is_some_and(|first| !is_done_marker(first)) {
            let last = payloads.len() - 1;
            for (index, payload) in payloads.iter().enumerate() {
                if is_done_marker(payload) {
                    continue;
                }
                match serde_json::from_str::<T>(payload) {
                    Ok(event) => results.push(Ok(event)),
                    Err(err) => {
                        if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(payload) {
                            results.push(Err(ClientError::Api(api_error)));
                        } else if index == last {
                            debug!(len = payload.len(), "holding partial payload for next chunk");
                            self.buffer = format!("{}{}", DATA_PREFIX, payload);
                        } else {
                            debug!(error = %err, "malformed payload");
                            results.push(Err(ClientError::Parse(err)));
                        }
                    }
                }
            }
        }

        if let Some(tail) = prefix_tail {
            if !self.buffer.is_empty() {
                self.buffer.push('\n');
            }
            self.buffer.push_str(tail);
        }

        results
    }

    /// Join the carried bytes with `chunk` and return the longest valid
    /// UTF-8 prefix. A multi-byte character cut off at the end is carried
    /// into the next chunk; `None` means the bytes are not UTF-8 at all.
    fn take_text(&mut self, chunk: &[u8]) -> Option<String> {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let valid_len = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return None,
        };
        let carry = bytes.split_off(valid_len);
        let text = String::from_utf8(bytes).ok()?;
        self.carry = carry;
        Some(text)
    }

    /// Consume the decoder at end of stream, returning whatever was still
    /// held back. Nothing more can arrive to complete it, so it is dropped.
    pub fn finish(self) -> Option<String> {
        if !self.carry.is_empty() {
            warn!(len = self.carry.len(), "stream closed inside a UTF-8 character");
        }
        let fragment = Some(self.buffer).filter(|fragment| !fragment.is_empty())?;
        warn!(len = fragment.len(), "stream closed with an undecoded fragment");
        Some(fragment)
    }
}

/// Extension trait turning a raw [`ByteStream`] into a stream of decoded
/// events.
///
/// # Example
/// ```ignore
/// use aiclient::sse::SseStreamExt;
///
/// let mut events = transport.open_stream(request).await?.sse_events::<ChatStreamResult>();
/// while let Some(result) = events.next().await {
///     println!("{:?}", result?);
/// }
/// ```
pub trait SseStreamExt {
    /// Decode every chunk, yielding events and per-payload errors in order.
    /// A transport error is yielded once and ends the stream.
    fn sse_events<T>(self) -> impl Stream<Item = Result<T, ClientError>> + Send
    where
        T: DeserializeOwned + Send + 'static;
}

impl SseStreamExt for ByteStream {
    fn sse_events<T>(self) -> impl Stream<Item = Result<T, ClientError>> + Send
    where
        T: DeserializeOwned + Send + 'static,
    {
        stream::unfold(
            (self, StreamDecoder::<T>::new(), false),
            |(mut byte_stream, mut decoder, ended)| async move {
                if ended {
                    return None;
                }
                match byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        let items = decoder.decode(&chunk);
                        Some((stream::iter(items), (byte_stream, decoder, false)))
                    }
                    Some(Err(e)) => Some((stream::iter(vec![Err(e)]), (byte_stream, decoder, true))),
                    None => {
                        decoder.finish();
                        None
                    }
                }
            },
        )
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Event {
        id: String,
    }

    fn event(id: &str) -> Event {
        Event { id: id.to_string() }
    }

    fn ok_ids(results: &[Result<Event, ClientError>]) -> Vec<String> {
        results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|e| e.id.clone())
            .collect()
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: hello"), Some("hello"));
        assert_eq!(parse_sse_line("data:   spaces  "), Some("spaces"));
        assert_eq!(parse_sse_line("event: message"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("[DONE"));
    }

    #[test]
    fn test_event_then_done() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(b"data: {\"id\":\"1\"}\n\ndata: [DONE]\n");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &event("1"));
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_done_only_chunk_is_silent() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: [DONE]\n\n").is_empty());
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_empty_chunk() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"").is_empty());
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(b": keep-alive\nevent: chunk\nid: 7\n\ndata: {\"id\":\"2\"}\n");
        assert_eq!(ok_ids(&results), vec!["2"]);
    }

    #[test]
    fn test_crlf_lines() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(b"data: {\"id\":\"1\"}\r\n\r\ndata: {\"id\":\"2\"}\r\n");
        assert_eq!(ok_ids(&results), vec!["1", "2"]);
    }

    #[test]
    fn test_bare_cr_lines() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(b"data: {\"id\":\"1\"}\rdata: {\"id\":\"2\"}\r\r");
        assert_eq!(ok_ids(&results), vec!["1", "2"]);
        assert_eq!(results.len(), 2);
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_split_inside_utf8_character() {
        let body = "data: {\"id\":\"é\"}\n".as_bytes();
        let cut = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(&body[..cut]).is_empty());
        let results = decoder.decode(&body[cut..]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &event("é"));
    }

    #[test]
    fn test_invalid_byte_after_partial_character() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: {\"id\":\"\xE6\x97").is_empty());

        let results = decoder.decode(b"\xFF\"}\n");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ClientError::UnknownContent)));

        let results = decoder.decode(b"\ndata: {\"id\":\"2\"}\n");
        assert_eq!(ok_ids(&results).last().map(String::as_str), Some("2"));
    }

    #[test]
    fn test_split_payload_across_chunks() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: {\"id\"").is_empty());
        assert_eq!(decoder.pending_fragment(), Some("data: {\"id\""));

        let results = decoder.decode(b":\"1\"}\n");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), &event("1"));
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_split_inside_prefix() {
        let mut decoder = StreamDecoder::<Event>::new();
        let first = decoder.decode(b"data: {\"id\":\"1\"}\nda");
        assert_eq!(ok_ids(&first), vec!["1"]);
        assert_eq!(decoder.pending_fragment(), Some("da"));

        let second = decoder.decode(b"ta: {\"id\":\"2\"}\n");
        assert_eq!(ok_ids(&second), vec!["2"]);
    }

    #[test]
    fn test_split_right_after_prefix() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: ").is_empty());
        let results = decoder.decode(b"{\"id\":\"3\"}\n");
        assert_eq!(ok_ids(&results), vec!["3"]);
    }

    #[test]
    fn test_malformed_in_middle_is_reported() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(b"data: {oops}\ndata: {\"id\":\"1\"}\n");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ClientError::Parse(_))));
        assert_eq!(results[1].as_ref().unwrap(), &event("1"));
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_api_error_payload() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(
            b"data: {\"error\":{\"message\":\"boom\",\"type\":\"server_error\",\"param\":null,\"code\":null}}\n",
        );
        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(ClientError::Api(api)) => {
                assert_eq!(api.error.message, "boom");
                assert_eq!(api.error.error_type, "server_error");
            }
            other => panic!("expected API error, got {:?}", other),
        }
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_api_error_with_numeric_code_as_last_line() {
        let mut decoder = StreamDecoder::<Event>::new();
        let results = decoder.decode(
            b"data: {\"error\":{\"message\":\"slow down\",\"type\":\"rate_limit\",\"code\":429}}\n",
        );
        assert_eq!(results.len(), 1);
        assert!(matches!(&results[0], Err(ClientError::Api(api)) if api.error.code.as_deref() == Some("429")));
        assert!(decoder.pending_fragment().is_none());
    }

    #[test]
    fn test_invalid_utf8_chunk() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: {\"id\"").is_empty());

        let results = decoder.decode(&[0xff, 0xfe, 0xfd]);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ClientError::UnknownContent)));
        // The earlier fragment survives a discarded chunk.
        assert_eq!(decoder.pending_fragment(), Some("data: {\"id\""));
    }

    #[test]
    fn test_buffered_malformed_line_reported_when_followed() {
        let mut decoder = StreamDecoder::<Event>::new();
        assert!(decoder.decode(b"data: {broken}\n").is_empty());

        let results = decoder.decode(b"data: {\"id\":\"1\"}\n");
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(ClientError::Parse(_))));
        assert_eq!(results[1].as_ref().unwrap(), &event("1"));
    }

    #[test]
    fn test_split_invariance() {
        let body = "data: {\"id\":\"a\"}\n\ndata: {\"id\":\"bé\"}\n\n: ping\n\ndata: {\"id\":\"日本🦀\"}\n\ndata: [DONE]\n\n";
        let bytes = body.as_bytes();

        for size in 1..=bytes.len() {
            let mut decoder = StreamDecoder::<Event>::new();
            let mut results = Vec::new();
            for chunk in bytes.chunks(size) {
                results.extend(decoder.decode(chunk));
            }
            assert!(
                results.iter().all(|r| r.is_ok()),
                "chunk size {} produced errors",
                size
            );
            assert_eq!(ok_ids(&results), vec!["a", "bé", "日本🦀"], "chunk size {}", size);
        }
    }

    #[test]
    fn test_finish_returns_dropped_fragment() {
        let mut decoder = StreamDecoder::<Event>::new();
        decoder.decode(b"data: {\"id\":");
        assert_eq!(decoder.finish().as_deref(), Some("data: {\"id\":"));

        let decoder = StreamDecoder::<Event>::new();
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_sse_events_stream() {
        let chunks: Vec<Result<bytes::Bytes, ClientError>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"id\":\"1\"}\ndata: {\"i")),
            Ok(bytes::Bytes::from_static(b"d\":\"2\"}\n")),
            Ok(bytes::Bytes::from_static(b"data: [DONE]\n")),
        ];
        let byte_stream: ByteStream = Box::pin(stream::iter(chunks));

        let events: Vec<_> = byte_stream.sse_events::<Event>().collect().await;
        assert_eq!(ok_ids(&events), vec!["1", "2"]);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_sse_events_stops_after_transport_error() {
        let chunks: Vec<Result<bytes::Bytes, ClientError>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"id\":\"1\"}\n")),
            Err(ClientError::StreamCancelled),
            Ok(bytes::Bytes::from_static(b"data: {\"id\":\"2\"}\n")),
        ];
        let byte_stream: ByteStream = Box::pin(stream::iter(chunks));

        let events: Vec<_> = byte_stream.sse_events::<Event>().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ClientError::StreamCancelled)));
    }
}
