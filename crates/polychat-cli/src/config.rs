use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use polychat::{ProviderConfig, ProviderKind};
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "polychat.toml";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Default, Deserialize)]
pub struct PolychatTomlFile {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub log: LogTomlConfig,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderTomlConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogTomlConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub stdout: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProviderTomlConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub stdout: bool,
}

/// One backend after `$NAME` references and environment fallbacks are
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    pub config: ProviderConfig,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub default_provider: Option<ProviderKind>,
    pub log: LogSettings,
    pub providers: Vec<ResolvedProvider>,
}

impl ResolvedConfig {
    pub fn provider(&self, kind: ProviderKind) -> Option<&ResolvedProvider> {
        self.providers.iter().find(|provider| provider.kind == kind)
    }
}

pub fn config_path(conf_dir: &Path) -> PathBuf {
    conf_dir.join(CONFIG_FILE_NAME)
}

/// Reads `<conf_dir>/polychat.toml`. A missing file yields the defaults.
pub fn load_config(conf_dir: &Path) -> Result<ResolvedConfig, String> {
    let path = config_path(conf_dir);
    let parsed = if path.exists() {
        let content = fs::read_to_string(&path)
            .map_err(|error| format!("read {} failed: {error}", path.display()))?;
        parse_config(&content)
            .map_err(|error| format!("parse {} failed: {error}", path.display()))?
    } else {
        PolychatTomlFile::default()
    };
    resolve_config(&parsed, |key| std::env::var(key).ok())
}

pub fn parse_config(content: &str) -> Result<PolychatTomlFile, toml::de::Error> {
    toml::from_str(content)
}

/// Resolves a parsed file. `lookup_env` stands in for the process
/// environment.
pub fn resolve_config<F>(file: &PolychatTomlFile, lookup_env: F) -> Result<ResolvedConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let default_provider = file
        .default_provider
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<ProviderKind>()
                .map_err(|_| format!("unknown default_provider '{name}'"))
        })
        .transpose()?;

    let log = LogSettings {
        level: file
            .log
            .level
            .as_deref()
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or(DEFAULT_LOG_LEVEL)
            .to_string(),
        stdout: file.log.stdout.unwrap_or(false),
    };

    let mut providers = Vec::new();
    for kind in ProviderKind::ALL {
        let entry = file.providers.iter().find(|(name, _)| {
            name.parse::<ProviderKind>()
                .map(|parsed| parsed == kind)
                .unwrap_or(false)
        });
        let entry = entry.map(|(_, entry)| entry.clone()).unwrap_or_default();
        providers.push(resolve_provider(kind, &entry, &file.env, &lookup_env));
    }

    if let Some(unknown) = file
        .providers
        .keys()
        .find(|name| name.parse::<ProviderKind>().is_err())
    {
        return Err(format!("unknown provider section [providers.{unknown}]"));
    }

    Ok(ResolvedConfig {
        default_provider,
        log,
        providers,
    })
}

fn resolve_provider<F>(
    kind: ProviderKind,
    entry: &ProviderTomlConfig,
    env_map: &HashMap<String, String>,
    lookup_env: &F,
) -> ResolvedProvider
where
    F: Fn(&str) -> Option<String>,
{
    let api_key = entry
        .api_key
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map, lookup_env))
        .or_else(|| {
            fallback_key_vars(kind)
                .iter()
                .find_map(|key| lookup_env(key).filter(|value| !value.trim().is_empty()))
        });
    let base_url = entry
        .base_url
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map, lookup_env));
    let model = entry
        .model
        .as_deref()
        .and_then(|value| resolve_config_value(value, env_map, lookup_env));

    ResolvedProvider {
        kind,
        config: ProviderConfig { api_key, base_url },
        model,
    }
}

fn fallback_key_vars(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::OpenAi => &["OPENAI_API_KEY"],
        ProviderKind::Anthropic => &["ANTHROPIC_API_KEY"],
        ProviderKind::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        ProviderKind::Ollama | ProviderKind::OllamaGenerate => &[],
    }
}

fn resolve_config_value<F>(
    value: &str,
    env_map: &HashMap<String, String>,
    lookup_env: &F,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(env_key) = trimmed.strip_prefix('$') {
        return env_map
            .get(env_key)
            .cloned()
            .or_else(|| lookup_env(env_key))
            .filter(|resolved| !resolved.trim().is_empty());
    }
    Some(trimmed.to_string())
}
