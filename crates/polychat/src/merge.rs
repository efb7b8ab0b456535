//! Accumulator merge primitives shared by the backends.
//!
//! Backends with parallel choices (`choices`, `candidates`) identify each
//! element by a logical index carried inside the element. Deltas for
//! different indices interleave freely, so elements are located by their
//! stored index rather than their position, and the list is re-sorted after
//! every event. Text fields concatenate in arrival order; every other field
//! is replaced by the newest value.

use serde_json::{Map, Value};

/// Keys that identify the kind of a Google content part. The first one
/// present wins; parts with none of them fall back to their first key that
/// is not a modifier.
const PART_KINDS: &[&str] = &[
    "text",
    "functionCall",
    "functionResponse",
    "inlineData",
    "fileData",
    "executableCode",
    "codeExecutionResult",
];
const PART_MODIFIERS: &[&str] = &["thought", "thoughtSignature"];

pub fn logical_index(element: &Value, index_key: &str) -> u64 {
    element.get(index_key).and_then(Value::as_u64).unwrap_or(0)
}

/// Merges `incoming` elements into `stored` by logical index.
///
/// An element whose index is not stored yet is inserted as an empty object
/// at position 0 and then combined; the final sort puts it in place.
pub fn merge_indexed<F>(
    stored: &mut Vec<Value>,
    incoming: Vec<Value>,
    index_key: &str,
    mut combine: F,
) where
    F: FnMut(&mut Map<String, Value>, Map<String, Value>),
{
    for element in incoming {
        let Value::Object(element) = element else {
            continue;
        };
        let index = element.get(index_key).and_then(Value::as_u64).unwrap_or(0);

        let position = match stored
            .iter()
            .position(|item| logical_index(item, index_key) == index)
        {
            Some(position) => position,
            None => {
                let mut fresh = Map::new();
                fresh.insert(index_key.to_string(), Value::from(index));
                stored.insert(0, Value::Object(fresh));
                0
            }
        };

        let slot = &mut stored[position];
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(target) = slot {
            combine(target, element);
            target
                .entry(index_key.to_string())
                .or_insert_with(|| Value::from(index));
        }
    }

    stored.sort_by_key(|item| logical_index(item, index_key));
}

/// Replaces every field of `target` with the incoming one, except the
/// `concat_keys`, whose string values are appended to the stored string.
pub fn merge_fields(target: &mut Map<String, Value>, incoming: Map<String, Value>, concat_keys: &[&str]) {
    for (key, value) in incoming {
        if concat_keys.contains(&key.as_str()) {
            concat_field(target, key, value);
        } else {
            target.insert(key, value);
        }
    }
}

/// Appends a string value to the stored string; anything else replaces.
pub fn concat_field(target: &mut Map<String, Value>, key: String, value: Value) {
    match value {
        Value::String(delta) => {
            if let Some(Value::String(current)) = target.get_mut(&key) {
                current.push_str(&delta);
            } else {
                target.insert(key, Value::String(delta));
            }
        }
        Value::Null if target.contains_key(&key) => {}
        value => {
            target.insert(key, value);
        }
    }
}

/// Merges content parts matched by their discriminant key. String values of
/// a matching part are concatenated; parts without a match, including parts
/// carrying only modifiers, are appended.
pub fn merge_keyed_parts(stored: &mut Vec<Value>, incoming: Vec<Value>) {
    for part in incoming {
        let Value::Object(part) = part else {
            stored.push(part);
            continue;
        };
        let Some(kind) = part_kind(&part).map(str::to_string) else {
            stored.push(Value::Object(part));
            continue;
        };
        let thought = is_thought(&part);

        let incoming_is_text = part.get(&kind).is_some_and(Value::is_string);
        let existing = stored.iter().position(|candidate| match candidate {
            Value::Object(candidate) => {
                incoming_is_text
                    && part_kind(candidate) == Some(kind.as_str())
                    && is_thought(candidate) == thought
                    && candidate.get(&kind).is_some_and(Value::is_string)
            }
            _ => false,
        });

        match existing {
            Some(position) => {
                if let Value::Object(target) = &mut stored[position] {
                    merge_fields(target, part, &[kind.as_str()]);
                }
            }
            None => stored.push(Value::Object(part)),
        }
    }
}

fn part_kind(part: &Map<String, Value>) -> Option<&str> {
    PART_KINDS
        .iter()
        .copied()
        .find(|kind| part.contains_key(*kind))
        .or_else(|| {
            part.keys()
                .map(String::as_str)
                .find(|key| !PART_MODIFIERS.contains(key))
        })
}

fn is_thought(part: &Map<String, Value>) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
}

/// Turns the accumulator into a JSON object, starting fresh from `Null`.
pub(crate) fn into_object(accumulator: Value) -> Map<String, Value> {
    match accumulator {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Returns the object stored under `key`, creating it when absent.
pub(crate) fn object_entry<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(object) => object,
        _ => unreachable!("slot was just set to an object"),
    }
}

/// Returns the array stored under `key`, creating it when absent.
pub(crate) fn array_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => items,
        _ => unreachable!("slot was just set to an array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_choice(index: u64, text: &str) -> Value {
        json!({ "index": index, "text": text })
    }

    fn concat_text(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
        merge_fields(target, incoming, &["text"]);
    }

    #[test]
    fn out_of_order_indices_are_sorted_and_attributed() {
        let mut stored = Vec::new();
        merge_indexed(&mut stored, vec![text_choice(1, "second")], "index", concat_text);
        merge_indexed(&mut stored, vec![text_choice(0, "first")], "index", concat_text);

        assert_eq!(
            stored,
            vec![text_choice(0, "first"), text_choice(1, "second")]
        );
    }

    #[test]
    fn deltas_concatenate_in_arrival_order() {
        let mut stored = Vec::new();
        for delta in ["Mo", "unt Oly", "mpus"] {
            merge_indexed(&mut stored, vec![text_choice(0, delta)], "index", concat_text);
        }
        assert_eq!(stored, vec![text_choice(0, "Mount Olympus")]);
    }

    #[test]
    fn interleaved_indices_never_share_a_slot() {
        let mut stored = Vec::new();
        let events = vec![
            vec![text_choice(2, "c")],
            vec![text_choice(0, "a"), text_choice(2, "C")],
            vec![text_choice(1, "b")],
            vec![text_choice(0, "A")],
        ];
        for event in events {
            merge_indexed(&mut stored, event, "index", concat_text);
        }

        assert_eq!(
            stored,
            vec![text_choice(0, "aA"), text_choice(1, "b"), text_choice(2, "cC")]
        );
    }

    #[test]
    fn missing_index_defaults_to_zero_and_is_stored() {
        let mut stored = Vec::new();
        merge_indexed(&mut stored, vec![json!({ "text": "x" })], "index", concat_text);
        merge_indexed(&mut stored, vec![json!({ "text": "y" })], "index", concat_text);
        assert_eq!(stored, vec![json!({ "index": 0, "text": "xy" })]);
    }

    #[test]
    fn non_text_fields_are_replaced() {
        let mut target = json!({ "text": "a", "finish_reason": null, "role": "assistant" })
            .as_object()
            .cloned()
            .expect("object");
        let incoming = json!({ "text": "b", "finish_reason": "stop" })
            .as_object()
            .cloned()
            .expect("object");

        merge_fields(&mut target, incoming, &["text"]);

        assert_eq!(
            Value::Object(target),
            json!({ "text": "ab", "finish_reason": "stop", "role": "assistant" })
        );
    }

    #[test]
    fn null_text_delta_keeps_stored_text() {
        let mut target = json!({ "content": "kept" }).as_object().cloned().expect("object");
        concat_field(&mut target, "content".to_string(), Value::Null);
        assert_eq!(target["content"], json!("kept"));
    }

    #[test]
    fn keyed_parts_concatenate_text_and_append_other_kinds() {
        let mut parts = Vec::new();
        merge_keyed_parts(&mut parts, vec![json!({ "text": "Hel" })]);
        merge_keyed_parts(&mut parts, vec![json!({ "text": "lo" })]);
        merge_keyed_parts(
            &mut parts,
            vec![json!({ "functionCall": { "name": "read", "args": {} } })],
        );
        merge_keyed_parts(
            &mut parts,
            vec![json!({ "functionCall": { "name": "write", "args": {} } })],
        );

        assert_eq!(
            parts,
            vec![
                json!({ "text": "Hello" }),
                json!({ "functionCall": { "name": "read", "args": {} } }),
                json!({ "functionCall": { "name": "write", "args": {} } }),
            ]
        );
    }

    #[test]
    fn thought_parts_stay_separate_from_answer_text() {
        let mut parts = Vec::new();
        merge_keyed_parts(&mut parts, vec![json!({ "text": "Plan", "thought": true })]);
        merge_keyed_parts(&mut parts, vec![json!({ "text": "Answer" })]);
        merge_keyed_parts(&mut parts, vec![json!({ "text": "ning", "thought": true })]);

        assert_eq!(
            parts,
            vec![
                json!({ "text": "Planning", "thought": true }),
                json!({ "text": "Answer" }),
            ]
        );
    }

    #[test]
    fn modifier_only_parts_are_kept() {
        let mut parts = Vec::new();
        merge_keyed_parts(&mut parts, vec![json!({ "text": "Hi" })]);
        merge_keyed_parts(&mut parts, vec![json!({ "thoughtSignature": "sig==" })]);

        assert_eq!(
            parts,
            vec![json!({ "text": "Hi" }), json!({ "thoughtSignature": "sig==" })]
        );
    }

    #[test]
    fn replay_is_deterministic() {
        let events = vec![
            vec![text_choice(1, "x")],
            vec![text_choice(0, "y"), text_choice(1, "z")],
        ];
        let run = || {
            let mut stored = Vec::new();
            for event in events.clone() {
                merge_indexed(&mut stored, event, "index", concat_text);
            }
            serde_json::to_string(&stored).expect("serialize")
        };
        assert_eq!(run(), run());
    }
}
