use serde_json::{Value, json};

use super::ollama::OllamaChatProvider;
use crate::error::ChatError;
use crate::merge::{concat_field, into_object};
use crate::provider::ChatProvider;
use crate::types::{ChatOptions, Endpoint, ParsedChunk, ProviderConfig, RequestHeaders};

const GENERATE_PATH: &str = "/generate";

/// Ollama `/api/generate`: the chat backend with a different endpoint,
/// option set and text field.
pub struct OllamaGenerateProvider {
    base: OllamaChatProvider,
}

impl OllamaGenerateProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            base: OllamaChatProvider::new(config),
        }
    }
}

impl ChatProvider for OllamaGenerateProvider {
    fn name(&self) -> &str {
        "ollama-generate"
    }

    fn base_url(&self, options: &ChatOptions) -> String {
        self.base.base_url(options)
    }

    fn request_headers(&self, options: &ChatOptions) -> RequestHeaders {
        self.base.request_headers(options)
    }

    fn resolve_endpoint(&self, options: &ChatOptions) -> Endpoint {
        Endpoint {
            path: GENERATE_PATH.to_string(),
            ..self.base.resolve_endpoint(options)
        }
    }

    fn resolve_stream_endpoint(&self, options: &ChatOptions) -> Endpoint {
        Endpoint {
            path: GENERATE_PATH.to_string(),
            ..self.base.resolve_stream_endpoint(options)
        }
    }

    fn build_body(&self, options: &ChatOptions) -> Value {
        self.base.build_body(options)
    }

    fn schema(&self) -> Value {
        let mut schema = super::ollama::sampling_schema();
        if let Some(properties) = schema.get_mut("properties").and_then(Value::as_object_mut) {
            properties.insert("prompt".to_string(), json!({ "type": "string" }));
            properties.insert("suffix".to_string(), json!({ "type": "string" }));
            properties.insert("system".to_string(), json!({ "type": "string" }));
            properties.insert("template".to_string(), json!({ "type": "string" }));
            properties.insert("images".to_string(), json!({ "type": "array" }));
            properties.insert("raw".to_string(), json!({ "type": "boolean" }));
            properties.insert("context".to_string(), json!({ "type": "array" }));
        }
        schema["required"] = json!(["model", "prompt"]);
        schema
    }

    fn parse_chunk(&self, buffer: &str) -> ParsedChunk {
        self.base.parse_chunk(buffer)
    }

    fn merge_event(&self, accumulator: Value, event: Value) -> Value {
        let mut root = into_object(accumulator);
        let Value::Object(event) = event else {
            return Value::Object(root);
        };

        for (key, value) in event {
            if key == "response" || key == "thinking" {
                concat_field(&mut root, key, value);
            } else {
                root.insert(key, value);
            }
        }

        Value::Object(root)
    }

    fn decode_response(&self, body: &str) -> Result<Value, ChatError> {
        self.base.decode_response(body)
    }

    fn decode_error(&self, body: &str) -> Value {
        self.base.decode_error(body)
    }
}
