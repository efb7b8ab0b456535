use polychat::ProviderKind;
use serde_json::{Map, Value, json};

pub fn default_model(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "gpt-4o-mini",
        ProviderKind::Anthropic => "claude-3-5-haiku-latest",
        ProviderKind::Google => "gemini-1.5-flash",
        ProviderKind::Ollama | ProviderKind::OllamaGenerate => "llama3.2",
    }
}

/// Splits a `KEY=JSON` argument. A value that is not valid JSON is taken
/// as a plain string.
pub fn parse_option_arg(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("option '{raw}' must have the form KEY=JSON"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("option '{raw}' has an empty key"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Builds the options object in the shape `kind` expects for one user
/// prompt. Extra options are applied last and may replace any key.
pub fn build_options(
    kind: ProviderKind,
    model: &str,
    prompt: Option<&str>,
    extra: &[(String, Value)],
) -> Value {
    let mut options = Map::new();
    options.insert("model".to_string(), Value::String(model.to_string()));

    if let Some(prompt) = prompt {
        match kind {
            ProviderKind::OpenAi | ProviderKind::Anthropic | ProviderKind::Ollama => {
                options.insert(
                    "messages".to_string(),
                    json!([{ "role": "user", "content": prompt }]),
                );
            }
            ProviderKind::Google => {
                options.insert(
                    "contents".to_string(),
                    json!([{ "role": "user", "parts": [{ "text": prompt }] }]),
                );
            }
            ProviderKind::OllamaGenerate => {
                options.insert("prompt".to_string(), Value::String(prompt.to_string()));
            }
        }
    }

    for (key, value) in extra {
        options.insert(key.clone(), value.clone());
    }
    Value::Object(options)
}
