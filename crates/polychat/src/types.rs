use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller options for one request after validation: a flat JSON object.
pub type ChatOptions = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(value) => vec![value.as_str()],
            HeaderValue::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Single(value)
    }
}

/// Ordered header list; a name may carry several values.
pub type RequestHeaders = Vec<(String, HeaderValue)>;

/// Request path plus option defaults that sit underneath the caller's options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Endpoint {
    pub path: String,
    pub defaults: ChatOptions,
}

impl Endpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            defaults: ChatOptions::new(),
        }
    }

    pub fn with_default(mut self, key: &str, value: Value) -> Self {
        self.defaults.insert(key.to_string(), value);
        self
    }

    /// Caller options win over endpoint defaults on conflicting keys.
    pub fn apply_defaults(&self, options: &ChatOptions) -> ChatOptions {
        let mut merged = self.defaults.clone();
        for (key, value) in options {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSignal {
    Continue,
    Halt,
}

/// Result of feeding one buffer to a chunk parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunk {
    pub signal: ChunkSignal,
    pub events: Vec<Value>,
    /// Incomplete trailing frame, to be prepended to the next read.
    pub remainder: String,
}

impl ParsedChunk {
    pub fn new(events: Vec<Value>, remainder: impl Into<String>) -> Self {
        Self {
            signal: ChunkSignal::Continue,
            events,
            remainder: remainder.into(),
        }
    }

    pub fn halt(mut self) -> Self {
        self.signal = ChunkSignal::Halt;
        self
    }
}

/// Construction-time settings of a provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none", default)]
    pub api_key: Option<String>,
    #[serde(rename = "baseUrl", skip_serializing_if = "Option::is_none", default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub(crate) fn base_url_or(&self, fallback: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}
