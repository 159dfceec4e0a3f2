//! Camera registry entries.
//!
//! Cameras are owned by an external registry; the sampler only reads them.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    #[default]
    Active,
    Inactive,
}

/// A registered camera. Immutable once registered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Camera {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub status: CameraStatus,
    /// Live capture source: `http(s)://` snapshot endpoint or `stub://` synthetic feed.
    #[serde(default)]
    pub source: Option<String>,
}

impl Camera {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: 0.0,
            longitude: 0.0,
            status: CameraStatus::Active,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == CameraStatus::Active
    }
}
