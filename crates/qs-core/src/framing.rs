//! Packet framer for the `~m~<len>~m~<payload>` envelope.
//!
//! A single WebSocket text frame may carry zero, one or many envelopes back
//! to back. `<len>` is the byte length of the payload. Keepalive pings
//! (`~h~<n>`) travel inside the same envelope as JSON payloads.
//!
//! Decoding is permissive: anything that is not a well-formed envelope is
//! skipped without error.

/// Envelope delimiter surrounding the decimal length.
const DELIM: &str = "~m~";

/// Wrap a payload in a single envelope.
pub fn encode(payload: &str) -> String {
    format!("{DELIM}{}{DELIM}{payload}", payload.len())
}

/// Split a raw chunk into the payloads of every envelope it contains, in
/// order.
///
/// An envelope whose declared length runs past the end of the chunk, or ends
/// inside a multi-byte character, is dropped and scanning resumes right after
/// its prefix.
pub fn decode(raw: &str) -> Vec<&str> {
    let mut messages = Vec::new();
    let mut pos = 0;

    while let Some(offset) = raw[pos..].find(DELIM) {
        let digits_start = pos + offset + DELIM.len();
        let digits_len = raw.as_bytes()[digits_start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let digits_end = digits_start + digits_len;

        if digits_len == 0 || !raw[digits_end..].starts_with(DELIM) {
            pos = digits_start;
            continue;
        }

        let body_start = digits_end + DELIM.len();
        let body_end = raw[digits_start..digits_end]
            .parse::<usize>()
            .ok()
            .and_then(|len| body_start.checked_add(len))
            .filter(|&end| end <= raw.len() && raw.is_char_boundary(end));

        match body_end {
            Some(end) => {
                messages.push(&raw[body_start..end]);
                pos = end;
            }
            None => pos = body_start,
        }
    }

    messages
}
