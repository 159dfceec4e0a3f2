//! Best-effort parser for whole-frame free-text descriptions.
//!
//! The service sometimes answers with prose such as
//! `"Gender: Male. Age Group: Adult. Clothing Top: red jacket."`. Segments of
//! the form `Key: value.` become descriptor attributes; anything else is
//! dropped. A missing field is normal and never an error.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::person::PersonDescriptor;

const MAX_KEY_CHARS: usize = 40;

fn segment_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // Key starts with a letter; value runs to '.' or newline.
            Regex::new(r"([A-Za-z][A-Za-z _/-]{0,40}?)\s*:\s*([^.\n]*)").ok()
        })
        .as_ref()
}

/// Parse `Key: value.` segments into a descriptor.
pub fn parse_description(text: &str) -> PersonDescriptor {
    let mut descriptor = PersonDescriptor::new();
    let Some(pattern) = segment_pattern() else {
        return descriptor;
    };
    let cleaned = text.replace(['*', '#'], "");
    for caps in pattern.captures_iter(&cleaned) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let key = key.as_str().trim();
        let value = value.as_str().trim().trim_end_matches(',');
        if key.chars().count() > MAX_KEY_CHARS || value.is_empty() {
            continue;
        }
        descriptor.insert_text(key, value);
    }
    descriptor
}

/// Turn a crop description (structured object, JSON text or prose) into a descriptor.
pub fn descriptor_from_value(value: &Value) -> PersonDescriptor {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') {
                if let Ok(parsed @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
                    return PersonDescriptor::from_json(&parsed).unwrap_or_default();
                }
            }
            parse_description(trimmed)
        }
        Value::Object(_) => PersonDescriptor::from_json(value).unwrap_or_default(),
        _ => PersonDescriptor::new(),
    }
}
