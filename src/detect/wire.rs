//! JSON contracts of the external detection service.
//!
//! - `POST /process_frame` `{frame_data, camera_id}` -> `{detections, person_crops, description?}`
//! - `POST /search` `{description}` -> `{matches: [{similarity, description, metadata, image_data?}]}`
//! - `GET /` -> 2xx when healthy
//!
//! Response types are lenient: missing lists default to empty and common
//! field aliases are accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::person::PersonDescriptor;

#[derive(Clone, Debug, Serialize)]
pub struct ProcessFrameRequest {
    /// Base64-encoded image.
    pub frame_data: String,
    pub camera_id: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessFrameResponse {
    #[serde(default)]
    pub detections: Vec<WireDetection>,
    #[serde(default)]
    pub person_crops: Vec<PersonCrop>,
    /// Whole-frame free-text description, used when no crops are returned.
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WireDetection {
    #[serde(default, alias = "box")]
    pub bbox: Option<WireBox>,
    #[serde(default = "default_label", alias = "class", alias = "class_name")]
    pub label: String,
    #[serde(default, alias = "score")]
    pub confidence: f32,
}

fn default_label() -> String {
    "person".to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum WireBox {
    /// `[x1, y1, x2, y2]`
    Corners([f32; 4]),
    Rect {
        x: f32,
        y: f32,
        #[serde(alias = "w")]
        width: f32,
        #[serde(alias = "h")]
        height: f32,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct PersonCrop {
    #[serde(default)]
    pub id: Option<Value>,
    /// Base64 (optionally data-URL prefixed) crop image.
    #[serde(default)]
    pub crop: Option<String>,
    /// Free text or a structured attribute object.
    #[serde(default)]
    pub description: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchRequest {
    pub description: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub matches: Vec<RemoteMatch>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoteMatch {
    /// 0-100.
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}

impl RemoteMatch {
    pub fn descriptor(&self) -> PersonDescriptor {
        match &self.description {
            Value::String(text) => super::describe::parse_description(text),
            other => PersonDescriptor::from_json(other).unwrap_or_default(),
        }
    }
}
