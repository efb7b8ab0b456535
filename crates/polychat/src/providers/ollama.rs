use serde_json::{Map, Value, json};

use super::common::{bearer_headers, split_json_values};
use crate::merge::{concat_field, into_object, object_entry};
use crate::provider::ChatProvider;
use crate::types::{ChatOptions, Endpoint, ParsedChunk, ProviderConfig, RequestHeaders};

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434/api";
const CHAT_PATH: &str = "/chat";

/// Sampling options that Ollama expects nested under `options`.
const SAMPLING_KEYS: &[&str] = &["temperature", "top_p", "top_k", "seed", "num_predict", "num_ctx", "stop"];

/// Ollama `/api/chat`. Objects are streamed back to back; `done: true`
/// marks the last one.
pub struct OllamaChatProvider {
    config: ProviderConfig,
}

impl OllamaChatProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ChatProvider for OllamaChatProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn base_url(&self, _options: &ChatOptions) -> String {
        self.config.base_url_or(DEFAULT_OLLAMA_BASE_URL)
    }

    fn request_headers(&self, _options: &ChatOptions) -> RequestHeaders {
        bearer_headers(self.config.api_key())
    }

    fn resolve_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(CHAT_PATH).with_default("stream", json!(false))
    }

    fn resolve_stream_endpoint(&self, _options: &ChatOptions) -> Endpoint {
        Endpoint::new(CHAT_PATH).with_default("stream", json!(true))
    }

    fn build_body(&self, options: &ChatOptions) -> Value {
        nest_sampling_options(options)
    }

    fn schema(&self) -> Value {
        let mut schema = sampling_schema();
        if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            properties.insert("messages".to_string(), json!({ "type": "array", "minItems": 1 }));
            properties.insert("tools".to_string(), json!({ "type": "array" }));
        }
        schema["required"] = json!(["model", "messages"]);
        schema
    }

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk {
        parse_ollama_chunk(buffer)
    }

    fn merge_event(&self, accumulator: Value, event: Value) -> Value {
        let mut root = into_object(accumulator);
        let Value::Object(event) = event else {
            return Value::Object(root);
        };

        for (key, value) in event {
            match value {
                Value::Object(message) if key == "message" => {
                    let stored = object_entry(&mut root, "message");
                    for (field, value) in message {
                        if field == "content" || field == "thinking" {
                            concat_field(stored, field, value);
                        } else {
                            stored.insert(field, value);
                        }
                    }
                }
                value => {
                    root.insert(key, value);
                }
            }
        }

        Value::Object(root)
    }
}

/// Options shared by the chat and generate endpoints.
pub(super) fn sampling_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "model": { "type": "string", "minLength": 1 },
            "format": { "type": ["string", "object"] },
            "options": { "type": "object" },
            "keep_alive": { "type": ["string", "integer"] },
            "think": { "type": ["boolean", "string"] },
            "stream": { "type": "boolean" },
            "temperature": { "type": "number", "minimum": 0 },
            "top_p": { "type": "number", "minimum": 0, "maximum": 1 },
            "top_k": { "type": "integer", "minimum": 0 },
            "seed": { "type": "integer" },
            "num_predict": { "type": "integer" },
            "num_ctx": { "type": "integer", "minimum": 1 },
            "stop": { "type": ["string", "array"] }
        },
        "required": ["model"],
        "additionalProperties": false
    })
}

/// Moves flat sampling keys into `options`; explicit flat keys win over the
/// same key inside a caller-supplied `options` object.
fn nest_sampling_options(options: &ChatOptions) -> Value {
    let mut body = Map::new();
    let mut sampling = match options.get("options") {
        Some(Value::Object(nested)) => nested.clone(),
        _ => Map::new(),
    };

    for (key, value) in options {
        if SAMPLING_KEYS.contains(&key.as_str()) {
            sampling.insert(key.clone(), value.clone());
        } else if key != "options" {
            body.insert(key.clone(), value.clone());
        }
    }

    if !sampling.is_empty() {
        body.insert("options".to_string(), Value::Object(sampling));
    }
    Value::Object(body)
}

fn parse_ollama_chunk(buffer: &str) -> ParsedChunk {
    let (values, remainder) = split_json_values("ollama", buffer);
    let mut events = Vec::with_capacity(values.len());

    for value in values {
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        events.push(value);
        if done {
            return ParsedChunk::new(events, "").halt();
        }
    }

    ParsedChunk::new(events, remainder)
}
