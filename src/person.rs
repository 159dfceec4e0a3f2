//! Person sighting data model.
//!
//! Descriptor values are always flat strings or string lists so that
//! substring and token matching over them is well-defined.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const GENDER: &str = "gender";
pub const AGE_GROUP: &str = "age_group";
pub const HAIR_COLOR: &str = "hair_color";
pub const HAIR_STYLE: &str = "hair_style";
pub const CLOTHING_TOP: &str = "clothing_top";
pub const CLOTHING_TOP_COLOR: &str = "clothing_top_color";
pub const CLOTHING_TOP_PATTERN: &str = "clothing_top_pattern";
pub const CLOTHING_BOTTOM: &str = "clothing_bottom";
pub const CLOTHING_BOTTOM_COLOR: &str = "clothing_bottom_color";
pub const CLOTHING_BOTTOM_PATTERN: &str = "clothing_bottom_pattern";
pub const FOOTWEAR: &str = "footwear";
pub const FOOTWEAR_COLOR: &str = "footwear_color";
pub const ACCESSORIES: &str = "accessories";
pub const FACIAL_FEATURES: &str = "facial_features";
pub const POSE: &str = "pose";
pub const LOCATION_CONTEXT: &str = "location_context";

/// Attributes whose free-text values are split on commas into lists.
pub const LIST_ATTRIBUTES: &[&str] = &[ACCESSORIES, FACIAL_FEATURES];

/// Values that mean "the describer could not tell".
const UNKNOWN_VALUES: &[&str] = &["", "unknown", "none", "n/a", "na", "null", "unclear"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    List(Vec<String>),
}

impl AttributeValue {
    /// Flattened, lower-cased text form used for matching.
    pub fn to_match_text(&self) -> String {
        match self {
            Self::Text(text) => text.to_lowercase(),
            Self::List(items) => items.join(", ").to_lowercase(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.to_match_text().contains(needle)
    }

    /// Case-insensitive equality; lists compare as sorted sets.
    pub fn eq_ignore_case(&self, other: &AttributeValue) -> bool {
        normalized_items(self) == normalized_items(other)
    }
}

fn normalized_items(value: &AttributeValue) -> Vec<String> {
    let mut items: Vec<String> = match value {
        AttributeValue::Text(text) => vec![text.trim().to_lowercase()],
        AttributeValue::List(items) => items.iter().map(|i| i.trim().to_lowercase()).collect(),
    };
    items.sort();
    items.dedup();
    items
}

/// Named visual attributes of one detected person. Absent means unknown.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PersonDescriptor(BTreeMap<String, AttributeValue>);

impl PersonDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a text attribute. Keys are normalized and unknown-like values dropped.
    pub fn insert_text(&mut self, key: &str, value: &str) {
        let key = normalize_key(key);
        let value = value.trim();
        if key.is_empty() || is_unknown(value) {
            return;
        }
        if LIST_ATTRIBUTES.contains(&key.as_str()) {
            let items = split_list(value);
            if !items.is_empty() {
                self.0.insert(key, AttributeValue::List(items));
            }
            return;
        }
        self.0.insert(key, AttributeValue::Text(value.to_string()));
    }

    pub fn insert_list(&mut self, key: &str, values: Vec<String>) {
        let key = normalize_key(key);
        let items: Vec<String> = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !is_unknown(v))
            .collect();
        if key.is_empty() || items.is_empty() {
            return;
        }
        self.0.insert(key, AttributeValue::List(items));
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert_text(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// Lower-cased text of an attribute, if present.
    pub fn text(&self, key: &str) -> Option<String> {
        self.0.get(key).map(AttributeValue::to_match_text)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill attributes this descriptor lacks from `other`.
    pub fn fill_missing(&mut self, other: &PersonDescriptor) {
        for (key, value) in other.iter() {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Build a descriptor from a structured JSON description.
    ///
    /// Strings and string arrays are kept, numbers and booleans are rendered as
    /// text, nulls are dropped. Nested objects are flattened one level into
    /// `parent_child` keys; a nested `type`/`value` key maps to the parent name.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut descriptor = Self::new();
        for (key, value) in object {
            match value {
                Value::Object(nested) => {
                    for (child, child_value) in nested {
                        let flat_key = match child.as_str() {
                            "type" | "value" | "name" => key.clone(),
                            _ => format!("{}_{}", key, child),
                        };
                        descriptor.insert_scalar_or_list(&flat_key, child_value);
                    }
                }
                other => descriptor.insert_scalar_or_list(key, other),
            }
        }
        Some(descriptor)
    }

    fn insert_scalar_or_list(&mut self, key: &str, value: &Value) {
        match value {
            Value::String(text) => self.insert_text(key, text),
            Value::Number(n) => self.insert_text(key, &n.to_string()),
            Value::Bool(b) => self.insert_text(key, if *b { "yes" } else { "no" }),
            Value::Array(items) => {
                let items: Vec<String> = items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                self.insert_list(key, items);
            }
            // Deeper nesting has no flat representation.
            Value::Object(_) | Value::Null => {}
        }
    }
}

/// `"Clothing Top-Color"` -> `"clothing_top_color"`, plus a few common aliases.
pub fn normalize_key(key: &str) -> String {
    let normalized: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let normalized = normalized
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    match normalized.as_str() {
        "sex" => GENDER.to_string(),
        "age" | "age_range" | "agegroup" => AGE_GROUP.to_string(),
        "hair" => HAIR_COLOR.to_string(),
        "top" | "upper_clothing" | "upper_body" => CLOTHING_TOP.to_string(),
        "bottom" | "lower_clothing" | "lower_body" => CLOTHING_BOTTOM.to_string(),
        "shoes" => FOOTWEAR.to_string(),
        "location" => LOCATION_CONTEXT.to_string(),
        _ => normalized,
    }
}

fn is_unknown(value: &str) -> bool {
    UNKNOWN_VALUES.contains(&value.trim().to_lowercase().as_str())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|item| item.trim().trim_start_matches("and ").trim())
        .filter(|item| !is_unknown(item))
        .map(|item| item.to_string())
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonMetadata {
    pub camera_id: String,
    /// Last sighting time, milliseconds since the unix epoch.
    pub timestamp_ms: u64,
    /// Reference to the source image (frame or crop) of the last sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default = "default_sightings")]
    pub sightings: u32,
}

fn default_sightings() -> u32 {
    1
}

impl PersonMetadata {
    pub fn new(camera_id: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            camera_id: camera_id.into(),
            timestamp_ms,
            image_ref: None,
            sightings: 1,
        }
    }
}

/// A single sighting produced by the frame processor or a push event,
/// before the store assigns it an identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    pub descriptor: PersonDescriptor,
    pub metadata: PersonMetadata,
    /// Base64-encoded crop of the person, when the service returned one.
    pub crop: Option<String>,
}

/// A stored, possibly deduplicated sighting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonRecord {
    pub id: String,
    pub descriptor: PersonDescriptor,
    pub metadata: PersonMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<String>,
}

impl PersonRecord {
    pub fn from_observation(id: String, observation: Observation) -> Self {
        Self {
            id,
            descriptor: observation.descriptor,
            metadata: observation.metadata,
            crop: observation.crop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_normalized_and_unknowns_dropped() {
        let mut d = PersonDescriptor::new();
        d.insert_text("Clothing Top-Color", "Red");
        d.insert_text("Age", "adult");
        d.insert_text("Hair Style", "unknown");
        assert_eq!(d.text(CLOTHING_TOP_COLOR).as_deref(), Some("red"));
        assert_eq!(d.text(AGE_GROUP).as_deref(), Some("adult"));
        assert!(d.get(HAIR_STYLE).is_none());
    }

    #[test]
    fn accessories_become_lists() {
        let d = PersonDescriptor::new().with("accessories", "backpack, sunglasses and hat");
        match d.get(ACCESSORIES) {
            Some(AttributeValue::List(items)) => {
                assert_eq!(items[0], "backpack");
                assert_eq!(items.len(), 2);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn structured_json_is_flattened() {
        let value = json!({
            "gender": "female",
            "clothing_top": {"type": "hoodie", "color": "grey"},
            "accessories": ["umbrella", null],
            "height_cm": 170,
            "extra": null
        });
        let d = PersonDescriptor::from_json(&value).unwrap();
        assert_eq!(d.text(CLOTHING_TOP).as_deref(), Some("hoodie"));
        assert_eq!(d.text(CLOTHING_TOP_COLOR).as_deref(), Some("grey"));
        assert_eq!(d.text("height_cm").as_deref(), Some("170"));
        assert!(d.get("extra").is_none());
        assert_eq!(
            d.get(ACCESSORIES),
            Some(&AttributeValue::List(vec!["umbrella".to_string()]))
        );
    }

    #[test]
    fn list_equality_ignores_order_and_case() {
        let a = AttributeValue::List(vec!["Hat".into(), "bag".into()]);
        let b = AttributeValue::List(vec!["BAG".into(), "hat".into()]);
        assert!(a.eq_ignore_case(&b));
        assert!(AttributeValue::Text("Male".into()).eq_ignore_case(&AttributeValue::Text("male".into())));
    }

    #[test]
    fn descriptor_serializes_as_flat_map() {
        let d = PersonDescriptor::new()
            .with("gender", "male")
            .with("accessories", "cap");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json, json!({"accessories": ["cap"], "gender": "male"}));
    }
}
