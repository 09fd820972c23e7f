//! NDJSON streaming response decoder.
//!
//! Reads a `reqwest::Response` as a byte stream, splits it into
//! newline-delimited JSON lines across network chunk boundaries, and parses
//! each line as a [`ChatChunk`]. Blank lines are skipped. Any other line
//! that fails to parse surfaces as a decode error; skipping it would leave
//! a hole in the accumulated text, so the consumer aborts instead.

use futures::stream::{self, Stream, StreamExt};

use crate::errors::ChatError;
use crate::types::ChatChunk;

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// Decode a streaming `/api/chat` response into [`ChatChunk`]s.
///
/// Lines are yielded strictly in arrival order. A final line without a
/// trailing newline is still decoded when the transport closes. Dropping the
/// returned stream drops the response and closes the connection.
pub fn chunk_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ChatChunk, ChatError>> {
    decode_lines(response.bytes_stream())
}

/// Split a byte stream on `\n` and decode each non-blank line.
///
/// Generic over the byte source so the line discipline is testable without
/// a live response.
fn decode_lines<B, C, E>(byte_stream: B) -> impl Stream<Item = Result<ChatChunk, ChatError>>
where
    B: Stream<Item = Result<C, E>> + Unpin,
    C: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream::unfold(
        (byte_stream, Vec::new()),
        |(mut byte_stream, mut buffer)| async move {
            loop {
                // Check if we have a complete line in the buffer
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();

                    match decode_line(&line) {
                        Some(result) => return Some((result, (byte_stream, buffer))),
                        None => continue, // blank keep-alive line
                    }
                }

                // Need more data from the stream
                match byte_stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(e)) => {
                        return Some((
                            Err(ChatError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer),
                        ));
                    }
                    None => {
                        // Stream ended; the final line may lack its newline
                        if buffer.is_empty() {
                            return None;
                        }
                        let line = std::mem::take(&mut buffer);
                        return decode_line(&line).map(|result| (result, (byte_stream, buffer)));
                    }
                }
            }
        },
    )
}

// ─── Line decoding ───────────────────────────────────────────────────────────

/// Decode one raw line. Returns `None` for blank lines.
fn decode_line(line: &[u8]) -> Option<Result<ChatChunk, ChatError>> {
    let trimmed = trim_line(line);
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_slice::<ChatChunk>(trimmed) {
        Ok(chunk) => Some(Ok(chunk)),
        Err(e) => Some(Err(ChatError::DecodeError {
            reason: format!("{e} (line: {})", String::from_utf8_lossy(trimmed)),
        })),
    }
}

/// Strip leading and trailing ASCII whitespace, including the `\r` of CRLF
/// line endings. Valid JSON lines never start or end inside a token, so
/// this cannot damage a decodable line.
fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    let start = line[..end]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(end);
    &line[start..end]
}

// ─── Tests ───────────────────────────────────────────────────────────────────
