use serde_json::{Map, Value, json};

use super::common::{bearer_headers, decode_event, split_frames};
use crate::merge::{array_entry, concat_field, into_object, merge_fields, merge_indexed, object_entry};
use crate::provider::ChatProvider;
use crate::types::{ChatOptions, Endpoint, ParsedChunk, ProviderConfig, RequestHeaders};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
const DONE_SENTINEL: &str = "[DONE]";
const MESSAGE_TEXT_FIELDS: &[&str] = &["content", "reasoning_content", "refusal"];

pub struct OpenAiProvider {
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn base_url(&self, _options: &ChatOptions) -> String {
        self.config.base_url_or(DEFAULT_OPENAI_BASE_URL)
    }

    fn request_headers(&self, _options: &ChatOptions) -> RequestHeaders {
        bearer_headers(self.config.api_key())
    }

    fn resolve_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(CHAT_COMPLETIONS_PATH)
    }

    fn resolve_stream_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(CHAT_COMPLETIONS_PATH).with_default("stream", json!(true))
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string", "minLength": 1 },
                "messages": { "type": "array", "minItems": 1 },
                "temperature": { "type": "number", "minimum": 0, "maximum": 2 },
                "top_p": { "type": "number", "minimum": 0, "maximum": 1 },
                "n": { "type": "integer", "minimum": 1 },
                "stop": { "type": ["string", "array"] },
                "max_tokens": { "type": "integer", "minimum": 1 },
                "max_completion_tokens": { "type": "integer", "minimum": 1 },
                "presence_penalty": { "type": "number" },
                "frequency_penalty": { "type": "number" },
                "logit_bias": { "type": "object" },
                "logprobs": { "type": "boolean" },
                "top_logprobs": { "type": "integer" },
                "seed": { "type": "integer" },
                "user": { "type": "string" },
                "tools": { "type": "array" },
                "tool_choice": { "type": ["string", "object"] },
                "parallel_tool_calls": { "type": "boolean" },
                "response_format": { "type": "object" },
                "reasoning_effort": { "type": "string" },
                "stream": { "type": "boolean" },
                "stream_options": { "type": "object" }
            },
            "required": ["model", "messages"],
            "additionalProperties": false
        })
    }

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk {
        parse_openai_chunk(buffer)
    }

    fn merge_event(&self, accumulator: Value, event: Value) -> Value {
        merge_openai_event(accumulator, event)
    }
}

fn parse_openai_chunk(buffer: &str) -> ParsedChunk {
    let (lines, remainder) = split_frames(buffer, "\n");
    let mut events = Vec::new();

    for line in lines {
        let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
            continue;
        };
        if data == DONE_SENTINEL {
            return ParsedChunk::new(events, "").halt();
        }
        if let Some(event) = decode_event("openai", data) {
            events.push(event);
        }
    }

    ParsedChunk::new(events, remainder)
}

fn merge_openai_event(accumulator: Value, event: Value) -> Value {
    let mut root = into_object(accumulator);
    let Value::Object(event) = event else {
        return Value::Object(root);
    };

    for (key, value) in event {
        match value {
            Value::Array(choices) if key == "choices" => {
                merge_indexed(array_entry(&mut root, "choices"), choices, "index", merge_choice);
            }
            value => {
                root.insert(key, value);
            }
        }
    }

    Value::Object(root)
}

/// Streamed choices carry `delta`; the merged choice stores it as `message`.
fn merge_choice(target: &mut Map<String, Value>, mut incoming: Map<String, Value>) {
    let delta = incoming
        .remove("delta")
        .or_else(|| incoming.remove("message"));
    merge_fields(target, incoming, &[]);

    if let Some(Value::Object(delta)) = delta {
        merge_message(object_entry(target, "message"), delta);
    }
}

fn merge_message(message: &mut Map<String, Value>, delta: Map<String, Value>) {
    for (key, value) in delta {
        match value {
            Value::Array(calls) if key == "tool_calls" => {
                merge_indexed(array_entry(message, "tool_calls"), calls, "index", merge_tool_call);
            }
            value if MESSAGE_TEXT_FIELDS.contains(&key.as_str()) => {
                concat_field(message, key, value);
            }
            value => {
                message.insert(key, value);
            }
        }
    }
}

fn merge_tool_call(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match value {
            Value::Object(function) if key == "function" => {
                merge_fields(object_entry(target, "function"), function, &["arguments"]);
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}
