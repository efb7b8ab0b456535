use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatErrorCode {
    OptionsInvalid,
    ProviderNotFound,
    ProviderHttp,
    ProviderTransport,
    ProviderProtocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatError {
    pub code: ChatErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ChatError {
    pub fn new(code: ChatErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Error for a response whose status fell outside 200-299. `body` is the
    /// provider's own decoded error payload and is not interpreted further.
    pub fn http(provider: &str, status: u16, body: Value) -> Self {
        Self::new(
            ChatErrorCode::ProviderHttp,
            format!("{provider} HTTP {status}"),
        )
        .with_details(json!({
            "status": status,
            "body": body,
        }))
    }

    pub fn status(&self) -> Option<u16> {
        if self.code != ChatErrorCode::ProviderHttp {
            return None;
        }
        self.details
            .as_ref()
            .and_then(|details| details.get("status"))
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok())
    }

    pub fn body(&self) -> Option<&Value> {
        if self.code != ChatErrorCode::ProviderHttp {
            return None;
        }
        self.details.as_ref().and_then(|details| details.get("body"))
    }

    /// Offending option fields of an `OptionsInvalid` error.
    pub fn invalid_fields(&self) -> Vec<String> {
        self.details
            .as_ref()
            .and_then(|details| details.get("fields"))
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|field| field.get("field").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_compact_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"code\":\"provider_protocol\",\"message\":\"{}\"}}",
                self.message.replace('\"', "\\\"")
            )
        })
    }
}

impl Display for ChatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ChatError {}
