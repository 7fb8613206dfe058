use config::ConfigError;
use serde_json::{Map, Value};
use std::path::Path;

pub trait Validator {
    fn validate(&self) -> Result<(), ConfigError>;

    fn validate_filepath(p: &Path) -> Result<(), ConfigError> {
        if !p.exists() {
            Err(ConfigError::Message(format!(
                "File {} does not exists !",
                p.to_string_lossy(),
            )))
        } else {
            Ok(())
        }
    }
}

/// Patch a JSON document in place with JSON Merge Patch (RFC 7396).
///
/// From https://github.com/idubrov/json-patch/blob/main/src/lib.rs
///
pub fn json_merge(doc: &mut Value, patch: &Value) {
    if !patch.is_object() {
        *doc = patch.clone();
        return;
    }

    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let map = doc.as_object_mut().unwrap();
    for (key, value) in patch.as_object().unwrap() {
        if value.is_null() {
            map.remove(key.as_str());
        } else {
            json_merge(map.entry(key.as_str()).or_insert(Value::Null), value);
        }
    }
}
