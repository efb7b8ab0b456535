use serde_json::{Map, Value, json};

use super::common::{decode_event, split_frames, sse_data};
use crate::merge::{array_entry, into_object, merge_indexed, merge_keyed_parts, object_entry};
use crate::provider::ChatProvider;
use crate::types::{
    ChatOptions, Endpoint, HeaderValue, ParsedChunk, ProviderConfig, RequestHeaders,
};

const DEFAULT_GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GENERATION_CONFIG_KEY: &str = "generationConfig";

/// Options that belong under `generationConfig` in the request body.
const GENERATION_KEYS: &[&str] = &[
    "temperature",
    "top_p",
    "top_k",
    "max_output_tokens",
    "candidate_count",
    "stop_sequences",
];

pub struct GoogleProvider {
    config: ProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ChatProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn base_url(&self, _options: &ChatOptions) -> String {
        self.config.base_url_or(DEFAULT_GOOGLE_BASE_URL)
    }

    fn request_headers(&self, _options: &ChatOptions) -> RequestHeaders {
        self.config
            .api_key()
            .map(|key| vec![("x-goog-api-key".to_string(), HeaderValue::from(key))])
            .unwrap_or_default()
    }

    fn resolve_endpoint(&self, options: &ChatOptions) -> Endpoint {
        Endpoint::new(format!("/{}:generateContent", model_path(options)))
    }

    fn resolve_stream_endpoint(&self, options: &ChatOptions) -> Endpoint {
        Endpoint::new(format!(
            "/{}:streamGenerateContent?alt=sse",
            model_path(options)
        ))
    }

    fn build_body(&self, options: &ChatOptions) -> Value {
        build_google_body(options)
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string", "minLength": 1 },
                "contents": { "type": "array", "minItems": 1 },
                "system_instruction": { "type": "object" },
                "tools": { "type": "array" },
                "tool_config": { "type": "object" },
                "safety_settings": { "type": "array" },
                "generation_config": { "type": "object" },
                "cached_content": { "type": "string" },
                "temperature": { "type": "number", "minimum": 0, "maximum": 2 },
                "top_p": { "type": "number", "minimum": 0, "maximum": 1 },
                "top_k": { "type": "integer", "minimum": 1 },
                "max_output_tokens": { "type": "integer", "minimum": 1 },
                "candidate_count": { "type": "integer", "minimum": 1 },
                "stop_sequences": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["model", "contents"],
            "additionalProperties": false
        })
    }

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk {
        parse_google_chunk(buffer)
    }

    fn merge_event(&self, accumulator: Value, event: Value) -> Value {
        merge_google_event(accumulator, event)
    }
}

/// `models/<id>` for bare ids; fully qualified resource names pass through.
fn model_path(options: &ChatOptions) -> String {
    let model = options
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .trim_start_matches('/');
    let model = model.strip_suffix(":generateContent").unwrap_or(model);

    if model.starts_with("models/") || model.starts_with("tunedModels/") || model.contains("/models/")
    {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn build_google_body(options: &ChatOptions) -> Value {
    let mut body = Map::new();
    let mut generation = Map::new();

    for (key, value) in options {
        if key == "model" {
            continue;
        }
        if GENERATION_KEYS.contains(&key.as_str()) {
            generation.insert(camel_case(key), value.clone());
        } else if key == "generation_config" {
            if let Value::Object(config) = value {
                for (name, value) in config {
                    generation
                        .entry(camel_case(name))
                        .or_insert_with(|| value.clone());
                }
            }
        } else {
            body.insert(camel_case(key), value.clone());
        }
    }

    if !generation.is_empty() {
        body.insert(GENERATION_CONFIG_KEY.to_string(), Value::Object(generation));
    }
    Value::Object(body)
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_google_chunk(buffer: &str) -> ParsedChunk {
    let (frames, remainder) = split_frames(buffer, "\n\n");
    let events = frames
        .iter()
        .filter_map(|frame| sse_data(frame))
        .filter_map(|data| decode_event("google", &data))
        .collect();
    ParsedChunk::new(events, remainder)
}

fn merge_google_event(accumulator: Value, event: Value) -> Value {
    let mut root = into_object(accumulator);
    let Value::Object(event) = event else {
        return Value::Object(root);
    };

    for (key, value) in event {
        match value {
            Value::Array(candidates) if key == "candidates" => {
                merge_indexed(
                    array_entry(&mut root, "candidates"),
                    candidates,
                    "index",
                    merge_candidate,
                );
            }
            value => {
                root.insert(key, value);
            }
        }
    }

    Value::Object(root)
}

fn merge_candidate(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match value {
            Value::Object(content) if key == "content" => {
                let stored = object_entry(target, "content");
                for (field, value) in content {
                    match value {
                        Value::Array(parts) if field == "parts" => {
                            merge_keyed_parts(array_entry(stored, "parts"), parts);
                        }
                        value => {
                            stored.insert(field, value);
                        }
                    }
                }
            }
            value => {
                target.insert(key, value);
            }
        }
    }
}
