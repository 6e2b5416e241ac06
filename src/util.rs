use crate::error::{SResult, from_serde, invalid_input};
use serde_json::{Map, Value};

/// Field name to value mapping stored for one block.
pub type FieldMap = Map<String, Value>;

/// Decodes stored state text. Absent state is an empty map.
pub fn decode_state(raw: Option<&str>) -> SResult<FieldMap> {
    let Some(raw) = raw else {
        return Ok(FieldMap::new());
    };
    match serde_json::from_str::<Value>(raw).map_err(from_serde)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(FieldMap::new()),
        other => Err(invalid_input(format!(
            "stored state must be a JSON object, found {}",
            kind_of(&other)
        ))),
    }
}

/// Encodes a field map as stored state text.
pub fn encode_state(fields: &FieldMap) -> SResult<String> {
    serde_json::to_string(fields).map_err(from_serde)
}

/// Shallow overlay: every key of `partial` replaces the same key in `stored`.
pub fn overlay(stored: &mut FieldMap, partial: &FieldMap) {
    for (name, value) in partial {
        stored.insert(name.clone(), value.clone());
    }
}

/// Removes the named fields; names that are absent are ignored.
pub fn remove_fields(stored: &mut FieldMap, names: &[&str]) {
    for name in names {
        stored.remove(*name);
    }
}

/// Keeps only the named fields. `None` keeps everything.
pub fn select_fields(stored: FieldMap, names: Option<&[String]>) -> FieldMap {
    match names {
        None => stored,
        Some(names) => stored
            .into_iter()
            .filter(|(name, _)| names.iter().any(|wanted| wanted == name))
            .collect(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
