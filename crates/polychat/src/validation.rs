use jsonschema::JSONSchema;
use jsonschema::error::ValidationErrorKind;
use serde_json::{Value, json};

use crate::error::{ChatError, ChatErrorCode};
use crate::types::ChatOptions;

/// Checks `options` against a provider's declared JSON schema and returns the
/// normalized option map, with top-level schema defaults filled in.
pub fn validate_options(options: &Value, schema: &Value) -> Result<ChatOptions, ChatError> {
    let Some(object) = options.as_object() else {
        return Err(ChatError::new(
            ChatErrorCode::OptionsInvalid,
            "Request options must be a JSON object",
        )
        .with_details(json!({
            "fields": [{ "field": "", "message": "expected an object" }],
        })));
    };

    let compiled = JSONSchema::compile(schema).map_err(|error| {
        ChatError::new(
            ChatErrorCode::OptionsInvalid,
            format!("Invalid option schema: {error}"),
        )
    })?;

    if let Err(errors) = compiled.validate(options) {
        let fields = errors
            .flat_map(|error| {
                let message = error.to_string();
                offending_fields(&error.kind, &error.instance_path.to_string())
                    .into_iter()
                    .map(move |field| json!({ "field": field, "message": message.clone() }))
            })
            .collect::<Vec<_>>();

        return Err(ChatError::new(
            ChatErrorCode::OptionsInvalid,
            format!("Validation failed for {} option field(s)", fields.len()),
        )
        .with_details(json!({ "fields": fields })));
    }

    let mut normalized = object.clone();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, rule) in properties {
            if normalized.contains_key(name) {
                continue;
            }
            if let Some(default) = rule.get("default") {
                normalized.insert(name.clone(), default.clone());
            }
        }
    }

    Ok(normalized)
}

/// Option names an error is about; one per unexpected key for
/// `additionalProperties`.
fn offending_fields(kind: &ValidationErrorKind, instance_path: &str) -> Vec<String> {
    match kind {
        ValidationErrorKind::Required { property } => vec![property
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| property.to_string())],
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected.clone(),
        _ => vec![instance_path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string" },
                "messages": { "type": "array" },
                "temperature": { "type": "number", "minimum": 0, "maximum": 2 },
                "max_tokens": { "type": "integer", "default": 1024 }
            },
            "required": ["model", "messages"],
            "additionalProperties": false
        })
    }

    #[test]
    fn validate_options_fills_schema_defaults() {
        let options = json!({ "model": "m", "messages": [] });
        let normalized = validate_options(&options, &sample_schema()).expect("valid options");

        assert_eq!(normalized["max_tokens"], json!(1024));
        assert_eq!(normalized["model"], json!("m"));
    }

    #[test]
    fn validate_options_keeps_caller_value_over_default() {
        let options = json!({ "model": "m", "messages": [], "max_tokens": 7 });
        let normalized = validate_options(&options, &sample_schema()).expect("valid options");
        assert_eq!(normalized["max_tokens"], json!(7));
    }

    #[test]
    fn validate_options_reports_each_offending_field() {
        let options = json!({ "messages": [], "temperature": "hot", "colour": "red" });
        let error = validate_options(&options, &sample_schema()).expect_err("invalid options");

        assert_eq!(error.code, ChatErrorCode::OptionsInvalid);
        let mut fields = error.invalid_fields();
        fields.sort();
        assert_eq!(fields, vec!["colour", "model", "temperature"]);
    }

    #[test]
    fn validate_options_lists_each_unknown_key_separately() {
        let options = json!({ "model": "m", "messages": [], "colour": "red", "size": 3 });
        let error = validate_options(&options, &sample_schema()).expect_err("unknown keys");

        let mut fields = error.invalid_fields();
        fields.sort();
        assert_eq!(fields, vec!["colour", "size"]);
    }

    #[test]
    fn validate_options_rejects_non_object() {
        let error = validate_options(&json!(["model"]), &sample_schema())
            .expect_err("array options are rejected");
        assert_eq!(error.code, ChatErrorCode::OptionsInvalid);
    }
}
