//! Structural normalization of CWL `File`/`Directory` objects (spec §4.4).
//!
//! A resolved input may carry a `File`/`Directory` value whose `basename`,
//! `dirname`, or nested `listing` were left implicit by the workflow
//! author; before a value reaches a Task's resolved inputs it is
//! normalized into the fully-populated shape executors expect.

use gowe_core::ExecutorType;
use serde_json::{json, Map, Value};

const CLASS_FILE: &str = "File";
const CLASS_DIRECTORY: &str = "Directory";

/// Promotes a bare string into a structured `Directory` object when the
/// step-input's declared type calls for one (spec §4.4 step 4). A string
/// that already carries a URI scheme (`scheme://...`) is preserved
/// verbatim; otherwise the scheme is inferred from the executor the task
/// targets — `ws://` (BV-BRC workspace) for the `bvbrc` executor, `file://`
/// for everything else. Values that are already a `Directory` object, or
/// `null`, pass through untouched.
pub fn promote_directory(value: Value, executor_type: ExecutorType) -> Value {
    match value {
        Value::String(location) if !location.is_empty() => {
            let location = if location.contains("://") {
                location
            } else {
                let scheme = match executor_type {
                    ExecutorType::Bvbrc => "ws://",
                    _ => "file://",
                };
                format!("{scheme}{location}")
            };
            json!({ "class": CLASS_DIRECTORY, "location": location })
        }
        other => other,
    }
}

/// Whether a declared CWL type string names a `Directory` (optionally
/// nullable, e.g. `Directory?`), per spec §4.4 step 4.
pub fn declares_directory(type_: &str) -> bool {
    type_.trim_end_matches('?') == CLASS_DIRECTORY
}

/// Recursively normalizes any `File`/`Directory` objects found in `value`,
/// leaving everything else untouched. Arrays and plain objects are
/// recursed into; a `File`/`Directory` object's own `listing` (for
/// directories) is normalized in turn.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => normalize_object(map),
        other => other,
    }
}

fn normalize_object(mut map: Map<String, Value>) -> Value {
    match map.get("class").and_then(Value::as_str) {
        Some(CLASS_FILE) => {
            fill_basename(&mut map);
            Value::Object(map)
        }
        Some(CLASS_DIRECTORY) => {
            fill_basename(&mut map);
            if let Some(listing) = map.remove("listing") {
                map.insert("listing".to_string(), normalize(listing));
            }
            Value::Object(map)
        }
        _ => {
            let normalized = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .collect();
            Value::Object(normalized)
        }
    }
}

/// Derives `basename` (and `dirname`/`nameroot`/`nameext` for files) from
/// `location`/`path` when the author didn't supply them explicitly.
fn fill_basename(map: &mut Map<String, Value>) {
    if map.contains_key("basename") {
        return;
    }
    let path = map
        .get("path")
        .or_else(|| map.get("location"))
        .and_then(Value::as_str);

    let Some(path) = path else { return };

    let basename = path.rsplit('/').next().unwrap_or(path).to_string();

    if map.get("class").and_then(Value::as_str) == Some(CLASS_FILE) {
        let (nameroot, nameext) = match basename.rfind('.') {
            Some(idx) if idx > 0 => (basename[..idx].to_string(), basename[idx..].to_string()),
            _ => (basename.clone(), String::new()),
        };
        map.insert("nameroot".to_string(), Value::String(nameroot));
        map.insert("nameext".to_string(), Value::String(nameext));
    }

    map.insert("basename".to_string(), Value::String(basename));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_gets_basename_nameroot_nameext() {
        let input = json!({"class": "File", "location": "file:///data/reads.fastq.gz"});
        let out = normalize(input);
        assert_eq!(out["basename"], "reads.fastq.gz");
        assert_eq!(out["nameroot"], "reads.fastq");
        assert_eq!(out["nameext"], ".gz");
    }

    #[test]
    fn explicit_basename_is_not_overwritten() {
        let input = json!({"class": "File", "location": "file:///data/x.txt", "basename": "custom.txt"});
        let out = normalize(input);
        assert_eq!(out["basename"], "custom.txt");
        assert!(out.get("nameroot").is_none());
    }

    #[test]
    fn directory_listing_is_recursed_into() {
        let input = json!({
            "class": "Directory",
            "location": "file:///data/outdir",
            "listing": [
                {"class": "File", "location": "file:///data/outdir/a.txt"}
            ]
        });
        let out = normalize(input);
        assert_eq!(out["basename"], "outdir");
        assert_eq!(out["listing"][0]["basename"], "a.txt");
    }

    #[test]
    fn non_file_values_pass_through() {
        let input = json!({"a": [1, 2, {"b": "c"}]});
        assert_eq!(normalize(input.clone()), input);
    }
}
