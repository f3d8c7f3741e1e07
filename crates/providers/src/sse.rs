/// Server-Sent Events framing for streamed completions.
///
/// Events are separated by a blank line; only `data:` lines matter here.
/// Comment lines (`:` prefix) and other fields are dropped.

/// Payload of one SSE event, with multi-line `data:` fields joined by `\n`.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub data: String,
}

impl SseEvent {
    /// The `[DONE]` sentinel that closes an OpenAI-style stream.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental parser. Bytes may arrive split anywhere, including inside
/// a UTF-8 sequence, so raw bytes are buffered until a full event is seen.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the response body and return completed events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some((end, sep_len)) = find_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }

        events
    }

    /// Flush whatever is left when the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&rest))
    }
}

/// Position and length of the first event separator (`\n\n` or `\r\n\r\n`).
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let data: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|val| val.strip_prefix(' ').unwrap_or(val))
        .collect();

    if data.is_empty() {
        None
    } else {
        Some(SseEvent {
            data: data.join("\n"),
        })
    }
}
