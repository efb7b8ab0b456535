use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::common::{decode_event, split_frames, sse_data, sse_event_name};
use crate::merge::{array_entry, concat_field, into_object, merge_fields, object_entry};
use crate::provider::ChatProvider;
use crate::types::{
    ChatOptions, Endpoint, HeaderValue, ParsedChunk, ProviderConfig, RequestHeaders,
};

const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/messages";

/// Stream events that contribute to the merged message. Anything else
/// (`ping`, `error`, future additions) is dropped by the parser.
const STREAM_EVENTS: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
];

/// Scratch field holding streamed tool input until the block stops.
const PARTIAL_JSON_FIELD: &str = "partial_json";

pub struct AnthropicProvider {
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn base_url(&self, _options: &ChatOptions) -> String {
        self.config.base_url_or(DEFAULT_ANTHROPIC_BASE_URL)
    }

    fn request_headers(&self, _options: &ChatOptions) -> RequestHeaders {
        let mut headers = Vec::new();
        if let Some(api_key) = self.config.api_key() {
            headers.push(("x-api-key".to_string(), HeaderValue::from(api_key)));
        }
        headers.push((
            "anthropic-version".to_string(),
            HeaderValue::from(ANTHROPIC_VERSION),
        ));
        headers
    }

    fn resolve_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(MESSAGES_PATH)
    }

    fn resolve_stream_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(MESSAGES_PATH).with_default("stream", json!(true))
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string", "minLength": 1 },
                "messages": { "type": "array", "minItems": 1 },
                "max_tokens": { "type": "integer", "minimum": 1, "default": 1024 },
                "system": { "type": ["string", "array"] },
                "temperature": { "type": "number", "minimum": 0, "maximum": 1 },
                "top_p": { "type": "number", "minimum": 0, "maximum": 1 },
                "top_k": { "type": "integer", "minimum": 0 },
                "stop_sequences": { "type": "array", "items": { "type": "string" } },
                "metadata": { "type": "object" },
                "tools": { "type": "array" },
                "tool_choice": { "type": "object" },
                "thinking": { "type": "object" },
                "stream": { "type": "boolean" }
            },
            "required": ["model", "messages"],
            "additionalProperties": false
        })
    }

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk {
        parse_anthropic_chunk(buffer)
    }

    fn merge_event(&self, accumulator: Value, event: Value) -> Value {
        merge_anthropic_event(accumulator, event)
    }
}

fn parse_anthropic_chunk(buffer: &str) -> ParsedChunk {
    let (frames, remainder) = split_frames(buffer, "\n\n");
    let mut events = Vec::new();

    for frame in frames {
        let Some(data) = sse_data(&frame) else {
            continue;
        };
        let Some(event) = decode_event("anthropic", &data) else {
            continue;
        };
        let name = sse_event_name(&frame)
            .map(str::to_string)
            .or_else(|| event.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();

        if !STREAM_EVENTS.contains(&name.as_str()) {
            debug!(event = %name, "skipping anthropic stream event");
            continue;
        }

        events.push(event);
        if name == "message_stop" {
            return ParsedChunk::new(events, "").halt();
        }
    }

    ParsedChunk::new(events, remainder)
}

fn merge_anthropic_event(accumulator: Value, event: Value) -> Value {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match event_type.as_str() {
        "message_start" => match event.get("message") {
            Some(message) => message.clone(),
            None => accumulator,
        },
        "content_block_start" => {
            let mut root = into_object(accumulator);
            if let (Some(index), Some(block)) = (block_index(&event), event.get("content_block")) {
                if let Some(slot) = content_slot(&mut root, index) {
                    *slot = block.clone();
                }
            }
            Value::Object(root)
        }
        "content_block_delta" => {
            let mut root = into_object(accumulator);
            if let (Some(index), Some(Value::Object(delta))) =
                (block_index(&event), event.get("delta"))
            {
                if let Some(block) = content_block(&mut root, index) {
                    apply_block_delta(block, delta.clone());
                }
            }
            Value::Object(root)
        }
        "content_block_stop" => {
            let mut root = into_object(accumulator);
            if let Some(index) = block_index(&event) {
                if let Some(block) = content_block(&mut root, index) {
                    finish_block(block);
                }
            }
            Value::Object(root)
        }
        "message_delta" => {
            let Value::Object(event) = event else {
                return accumulator;
            };
            let mut root = into_object(accumulator);
            for (key, value) in event {
                match value {
                    Value::Object(delta) if key == "delta" => merge_fields(&mut root, delta, &[]),
                    Value::Object(usage) if key == "usage" => {
                        merge_fields(object_entry(&mut root, "usage"), usage, &[]);
                    }
                    _ => {}
                }
            }
            Value::Object(root)
        }
        _ => accumulator,
    }
}

fn block_index(event: &Value) -> Option<usize> {
    event
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|index| usize::try_from(index).ok())
}

/// Block at `index`, appending one when `index` is the next position.
/// Indexes past the end are dropped.
fn content_slot(root: &mut Map<String, Value>, index: usize) -> Option<&mut Value> {
    let content = array_entry(root, "content");
    if index == content.len() {
        content.push(Value::Object(Map::new()));
    }
    if index >= content.len() {
        warn!(
            index,
            blocks = content.len(),
            "dropping content block event with out-of-range index"
        );
        return None;
    }
    content.get_mut(index)
}

fn content_block(root: &mut Map<String, Value>, index: usize) -> Option<&mut Map<String, Value>> {
    let slot = content_slot(root, index)?;
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot.as_object_mut()
}

fn apply_block_delta(block: &mut Map<String, Value>, mut delta: Map<String, Value>) {
    let delta_type = delta
        .remove("type")
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();

    match delta_type.as_str() {
        "text_delta" => merge_fields(block, delta, &["text"]),
        "thinking_delta" => merge_fields(block, delta, &["thinking"]),
        "signature_delta" => merge_fields(block, delta, &["signature"]),
        "input_json_delta" => {
            if let Some(partial) = delta.remove(PARTIAL_JSON_FIELD) {
                concat_field(block, PARTIAL_JSON_FIELD.to_string(), partial);
            }
        }
        "citations_delta" => {
            if let Some(citation) = delta.remove("citation") {
                array_entry(block, "citations").push(citation);
            }
        }
        other => {
            debug!(delta_type = other, "replacing fields from unknown anthropic delta");
            merge_fields(block, delta, &[]);
        }
    }
}

/// Streamed tool input arrives as JSON text; the finished block carries the
/// parsed `input` object like the non-streaming response does.
fn finish_block(block: &mut Map<String, Value>) {
    let Some(partial) = block.remove(PARTIAL_JSON_FIELD) else {
        return;
    };
    let text = partial.as_str().unwrap_or_default();
    if text.trim().is_empty() {
        return;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(input) => {
            block.insert("input".to_string(), input);
        }
        Err(error) => warn!(%error, "anthropic tool input is not valid JSON"),
    }
}
