use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, Once};

use crate::error::{ChatError, ChatErrorCode};
use crate::provider::ProviderRef;
use crate::registry::{clear_providers, get_provider, register_provider};
use crate::types::ProviderConfig;

mod anthropic;
mod common;
mod google;
mod ollama;
mod ollama_generate;
mod openai;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use ollama::OllamaChatProvider;
pub use ollama_generate::OllamaGenerateProvider;
pub use openai::OpenAiProvider;

pub(crate) use common::join_url;

const BUILTIN_SOURCE_ID: &str = "polychat-builtins";

/// The closed set of backends this crate ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
    OllamaGenerate,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Ollama,
        ProviderKind::OllamaGenerate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OllamaGenerate => "ollama-generate",
        }
    }

    pub fn build(self, config: ProviderConfig) -> ProviderRef {
        match self {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)),
            ProviderKind::Google => Arc::new(GoogleProvider::new(config)),
            ProviderKind::Ollama => Arc::new(OllamaChatProvider::new(config)),
            ProviderKind::OllamaGenerate => Arc::new(OllamaGenerateProvider::new(config)),
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ChatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                ChatError::new(
                    ChatErrorCode::ProviderNotFound,
                    format!("Unknown provider: {value}"),
                )
            })
    }
}

/// Registers every built-in backend with default configuration.
pub fn register_builtin_providers() {
    for kind in ProviderKind::ALL {
        register_provider(
            kind.build(ProviderConfig::default()),
            Some(BUILTIN_SOURCE_ID.to_string()),
        );
    }
}

pub fn reset_providers() {
    clear_providers();
    register_builtin_providers();
}

/// First-use registration of the built-ins. Names a caller registered
/// earlier are left alone.
pub(crate) fn ensure_builtin_providers_registered() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        for kind in ProviderKind::ALL {
            if get_provider(kind.as_str()).is_none() {
                register_provider(
                    kind.build(ProviderConfig::default()),
                    Some(BUILTIN_SOURCE_ID.to_string()),
                );
            }
        }
    });
}
