mod describe;
mod processor;
mod result;
mod service;
mod wire;

pub use describe::{descriptor_from_value, parse_description};
pub use processor::{analyze, FrameProcessor};
pub use result::{BoundingBox, Detection, FrameAnalysis};
pub use service::{DetectionService, HttpDetectionService, DEFAULT_TIMEOUT};
pub use wire::{
    PersonCrop, ProcessFrameRequest, ProcessFrameResponse, RemoteMatch, SearchRequest,
    SearchResponse, WireBox, WireDetection,
};
