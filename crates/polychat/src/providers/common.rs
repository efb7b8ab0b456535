use serde_json::Value;
use tracing::warn;

use crate::types::{HeaderValue, RequestHeaders};

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}

pub(super) fn bearer_headers(api_key: Option<&str>) -> RequestHeaders {
    api_key
        .map(|key| {
            vec![(
                "authorization".to_string(),
                HeaderValue::Single(format!("Bearer {key}")),
            )]
        })
        .unwrap_or_default()
}

/// Splits `buffer` into frames ending with `terminator`, after normalizing
/// CRLF to LF. The text after the last terminator is the incomplete frame.
pub(super) fn split_frames(buffer: &str, terminator: &str) -> (Vec<String>, String) {
    let normalized = buffer.replace("\r\n", "\n");
    let Some(end) = normalized.rfind(terminator) else {
        return (Vec::new(), normalized);
    };

    let (complete, rest) = normalized.split_at(end + terminator.len());
    let frames = complete
        .split(terminator)
        .filter(|frame| !frame.trim().is_empty())
        .map(str::to_string)
        .collect();
    (frames, rest.to_string())
}

/// Joined payload of the `data:` lines of one SSE frame.
pub(super) fn sse_data(frame: &str) -> Option<String> {
    let data = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:").map(str::trim_start))
        .collect::<Vec<_>>()
        .join("\n");
    if data.is_empty() { None } else { Some(data) }
}

pub(super) fn sse_event_name(frame: &str) -> Option<&str> {
    frame
        .lines()
        .find_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
}

pub(super) fn decode_event(provider: &str, data: &str) -> Option<Value> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(error) => {
            warn!(provider, %error, "dropping undecodable stream frame");
            None
        }
    }
}

/// Decodes JSON values written back to back, with or without separators.
/// A value cut off at the end of the buffer is returned as the remainder;
/// undecodable data is skipped up to the next line or object start.
pub(super) fn split_json_values(provider: &str, buffer: &str) -> (Vec<Value>, String) {
    let mut events = Vec::new();
    let mut start = 0;

    'resync: while start < buffer.len() {
        let rest = &buffer[start..];
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();

        loop {
            let offset = values.byte_offset();
            match values.next() {
                None => break 'resync,
                Some(Ok(value)) => events.push(value),
                Some(Err(error)) if error.is_eof() => {
                    return (events, rest[offset..].to_string());
                }
                Some(Err(error)) => {
                    warn!(provider, %error, "skipping undecodable stream data");
                    match next_value_start(&rest[offset..]) {
                        Some(skip) => {
                            start += offset + skip;
                            continue 'resync;
                        }
                        None => break 'resync,
                    }
                }
            }
        }
    }

    (events, String::new())
}

/// Offset of the first newline or `{` after the leading character.
fn next_value_start(text: &str) -> Option<usize> {
    text.char_indices()
        .skip(1)
        .find(|(_, ch)| *ch == '\n' || *ch == '{')
        .map(|(position, _)| position)
}
