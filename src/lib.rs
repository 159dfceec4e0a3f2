//! Sightline
//!
//! Camera frame sampling, person sighting store and free-text relevance
//! search for missing-person operations.
//!
//! # Architecture
//!
//! Data flows in one direction:
//!
//! ```text
//! FrameSampler -> FrameProcessor -> PersonStore -> RelevanceMatcher
//! ```
//!
//! 1. **Backpressure**: a camera never has more than one frame in flight.
//! 2. **Graceful degradation**: live capture failures switch the camera to a
//!    finite list of fallback images; exhaustion is a visible, persistent status.
//! 3. **Health gate**: frames are not sent while the detection service's last
//!    probe failed.
//! 4. **Scoped errors**: every failure stays with its camera, frame, query or
//!    connection. Nothing here terminates the daemon.
//!
//! # Module Structure
//!
//! - `ingest`, `sampler`: frame sources, fallback images, per-camera scheduling
//! - `detect`, `health`: detection service client, frame processor, liveness
//! - `transport`: reconnecting push channel with typed events
//! - `store`, `matcher`, `search`: person records, dedup, ranking
//! - `pipeline`, `config`, `api`: the daemon loop and its operator surface

use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod matcher;
pub mod person;
pub mod pipeline;
pub mod sampler;
pub mod search;
pub mod store;
pub mod transport;

pub use camera::{Camera, CameraStatus};
pub use detect::{
    BoundingBox, Detection, DetectionService, FrameAnalysis, FrameProcessor, HttpDetectionService,
};
pub use error::{CaptureError, ChannelError, FallbackError, ServiceError};
pub use frame::{Frame, FrameOrigin};
pub use health::{HealthMonitor, HealthStatus};
pub use ingest::{FallbackImageSource, FrameSource};
pub use matcher::{rank, MatchResult};
pub use person::{AttributeValue, Observation, PersonDescriptor, PersonMetadata, PersonRecord};
pub use pipeline::Pipeline;
pub use sampler::{CameraReport, FrameSampler, SamplerState, SourceMode};
pub use store::{DedupPolicy, PeopleRepository, PersonStore, SharedPersonStore, Upsert};
pub use transport::{ChannelEvent, ChannelState, EventKind, ReconnectingChannel, StreamEvent};

/// Milliseconds since the unix epoch; 0 if the clock is before it.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
