use std::sync::Arc;

use serde_json::Value;

use crate::error::{ChatError, ChatErrorCode};
use crate::types::{ChatOptions, Endpoint, ParsedChunk, RequestHeaders};

/// Capabilities a chat backend provides to the dispatcher.
///
/// Every method is pure: implementations hold only immutable configuration
/// fixed at construction time. Backends that reuse another backend hold it
/// as a field and forward the operations they do not override.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn base_url(&self, options: &ChatOptions) -> String;

    /// Headers sent with every request. A missing credential omits the auth
    /// header instead of failing.
    fn request_headers(&self, options: &ChatOptions) -> RequestHeaders;

    fn resolve_endpoint(&self, options: &ChatOptions) -> Endpoint;

    fn resolve_stream_endpoint(&self, options: &ChatOptions) -> Endpoint;

    fn build_body(&self, options: &ChatOptions) -> Value {
        Value::Object(options.clone())
    }

    /// JSON schema describing the accepted options.
    fn schema(&self) -> Value;

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk;

    /// Folds one decoded event into the accumulator, which starts as `Null`.
    fn merge_event(&self, accumulator: Value, event: Value) -> Value;

    fn decode_response(&self, body: &str) -> Result<Value, ChatError> {
        serde_json::from_str(body).map_err(|error| {
            ChatError::new(
                ChatErrorCode::ProviderProtocol,
                format!("Invalid {} response JSON: {error}", self.name()),
            )
            .with_details(serde_json::json!({
                "bodyPrefix": truncate_for_details(body, 800),
            }))
        })
    }

    fn decode_error(&self, body: &str) -> Value {
        serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
    }
}

pub type ProviderRef = Arc<dyn ChatProvider>;

pub(crate) fn truncate_for_details(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit <= 3 {
        return ".".repeat(limit);
    }

    let prefix: String = text.chars().take(limit - 3).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_details_keeps_short_text() {
        assert_eq!(truncate_for_details("abc", 10), "abc");
        assert_eq!(truncate_for_details("abcdefgh", 6), "abc...");
        assert_eq!(truncate_for_details("abcdefgh", 2), "..");
    }
}
