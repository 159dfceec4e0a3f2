//! Frame processor: one frame in, detections and person observations out.
//!
//! The processor fails fast with `ServiceError::Unavailable` when the last
//! health probe failed, without touching the network. Transport, status and
//! parse failures are returned to the caller as per-frame errors; the caller
//! decides how to report them and the sampler simply moves on to its next tick.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::describe::{descriptor_from_value, parse_description};
use super::result::{BoundingBox, Detection, FrameAnalysis};
use super::service::DetectionService;
use super::wire::{PersonCrop, ProcessFrameRequest, ProcessFrameResponse, WireBox, WireDetection};
use crate::error::ServiceError;
use crate::frame::Frame;
use crate::health::HealthStatus;
use crate::person::{Observation, PersonMetadata};

pub struct FrameProcessor {
    service: Arc<dyn DetectionService>,
    health: HealthStatus,
}

impl FrameProcessor {
    pub fn new(service: Arc<dyn DetectionService>, health: HealthStatus) -> Self {
        Self { service, health }
    }

    /// Send a frame to the detection service and parse the result.
    ///
    /// The frame is consumed; its bytes are zeroized when it drops.
    pub fn process(&self, frame: Frame) -> Result<FrameAnalysis, ServiceError> {
        if !self.health.is_healthy() {
            return Err(ServiceError::Unavailable);
        }
        let request = ProcessFrameRequest {
            frame_data: BASE64.encode(frame.payload()),
            camera_id: frame.camera_id.clone(),
        };
        let response = self.service.process_frame(&request)?;
        Ok(analyze(&frame.camera_id, frame.captured_at_ms, response))
    }
}

/// Convert a service response into detections and observations.
///
/// Per-person crops win over the whole-frame description. Unusable pieces
/// (bad boxes, undecodable crops, crops nobody described) are dropped, never
/// fatal.
pub fn analyze(camera_id: &str, captured_at_ms: u64, response: ProcessFrameResponse) -> FrameAnalysis {
    let detections = response
        .detections
        .iter()
        .map(|d| to_detection(d, camera_id, captured_at_ms))
        .collect();

    let image_ref = format!("{}/{}", camera_id, captured_at_ms);
    let observations = if !response.person_crops.is_empty() {
        response
            .person_crops
            .iter()
            .enumerate()
            .filter_map(|(index, crop)| {
                crop_observation(crop, index, camera_id, captured_at_ms, &image_ref)
            })
            .collect()
    } else {
        match response.description.as_deref().map(parse_description) {
            Some(descriptor) if !descriptor.is_empty() => {
                let mut metadata = PersonMetadata::new(camera_id, captured_at_ms);
                metadata.image_ref = Some(image_ref);
                vec![Observation {
                    descriptor,
                    metadata,
                    crop: None,
                }]
            }
            _ => Vec::new(),
        }
    };

    FrameAnalysis {
        detections,
        observations,
    }
}

fn to_detection(wire: &WireDetection, camera_id: &str, captured_at_ms: u64) -> Detection {
    let bbox = wire.bbox.as_ref().and_then(|b| match *b {
        WireBox::Corners([x1, y1, x2, y2]) if x2 >= x1 && y2 >= y1 => Some(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }),
        WireBox::Corners(_) => None,
        WireBox::Rect {
            x,
            y,
            width,
            height,
        } if width >= 0.0 && height >= 0.0 => Some(BoundingBox {
            x,
            y,
            width,
            height,
        }),
        WireBox::Rect { .. } => None,
    });
    let confidence = if wire.confidence.is_finite() {
        wire.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Detection {
        bbox,
        label: wire.label.clone(),
        confidence,
        camera_id: camera_id.to_string(),
        frame_timestamp_ms: captured_at_ms,
    }
}

fn crop_observation(
    crop: &PersonCrop,
    index: usize,
    camera_id: &str,
    captured_at_ms: u64,
    image_ref: &str,
) -> Option<Observation> {
    let crop_id = match &crop.id {
        Some(serde_json::Value::String(id)) => id.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => index.to_string(),
    };
    let descriptor = crop
        .description
        .as_ref()
        .map(descriptor_from_value)
        .unwrap_or_default();
    if descriptor.is_empty() {
        log::debug!("crop {} on {} has no usable description", crop_id, camera_id);
        return None;
    }
    let mut metadata = PersonMetadata::new(camera_id, captured_at_ms);
    metadata.image_ref = Some(format!("{}#crop-{}", image_ref, crop_id));
    Some(Observation {
        descriptor,
        metadata,
        crop: crop.crop.as_deref().and_then(normalize_crop),
    })
}

/// Strip a data-URL prefix and keep the crop only if it is valid base64.
fn normalize_crop(raw: &str) -> Option<String> {
    let data = match raw.split_once(";base64,") {
        Some((_, data)) => data,
        None => raw,
    };
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    match BASE64.decode(data) {
        Ok(_) => Some(data.to_string()),
        Err(e) => {
            log::debug!("dropping undecodable crop: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{SearchRequest, SearchResponse};
    use crate::frame::FrameOrigin;
    use crate::person::{CLOTHING_TOP, GENDER};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedService {
        body: &'static str,
        calls: AtomicUsize,
    }

    impl DetectionService for CannedService {
        fn process_frame(
            &self,
            request: &ProcessFrameRequest,
        ) -> Result<ProcessFrameResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(BASE64.decode(&request.frame_data).unwrap(), vec![9, 9, 9]);
            serde_json::from_str(self.body).map_err(|e| ServiceError::Malformed(e.to_string()))
        }

        fn search(&self, _request: &SearchRequest) -> Result<SearchResponse, ServiceError> {
            Ok(SearchResponse::default())
        }

        fn probe(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn processor(body: &'static str, healthy: bool) -> (FrameProcessor, Arc<CannedService>) {
        let service = Arc::new(CannedService {
            body,
            calls: AtomicUsize::new(0),
        });
        (
            FrameProcessor::new(service.clone(), HealthStatus::new(healthy)),
            service,
        )
    }

    fn frame() -> Frame {
        Frame::new(vec![9, 9, 9], "cam-7", 1_700_000_000_000, FrameOrigin::Live)
    }

    #[test]
    fn unhealthy_service_fails_fast_without_call() {
        let (processor, service) = processor("{}", false);
        assert_eq!(processor.process(frame()).unwrap_err(), ServiceError::Unavailable);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn crops_become_observations() {
        let (processor, _) = processor(
            r#"{
                "detections": [{"bbox": [0, 0, 10, 20], "label": "person", "confidence": 1.4}],
                "person_crops": [
                    {"id": 3, "crop": "data:image/jpeg;base64,AAEC", "description": {"gender": "male", "clothing_top": "jacket"}},
                    {"crop": "%%%not-base64", "description": "Gender: female."}
                ]
            }"#,
            true,
        );
        let analysis = processor.process(frame()).unwrap();
        assert_eq!(analysis.detections.len(), 1);
        assert_eq!(analysis.person_count(), 1);
        assert_eq!(analysis.detections[0].confidence, 1.0);
        assert_eq!(analysis.detections[0].bbox.unwrap().height, 20.0);

        assert_eq!(analysis.observations.len(), 2);
        let first = &analysis.observations[0];
        assert_eq!(first.descriptor.text(CLOTHING_TOP).as_deref(), Some("jacket"));
        assert_eq!(first.crop.as_deref(), Some("AAEC"));
        assert_eq!(
            first.metadata.image_ref.as_deref(),
            Some("cam-7/1700000000000#crop-3")
        );
        let second = &analysis.observations[1];
        assert_eq!(second.descriptor.text(GENDER).as_deref(), Some("female"));
        assert!(second.crop.is_none());
    }

    #[test]
    fn undescribed_crops_are_skipped() {
        let (processor, _) = processor(
            r#"{
                "detections": [
                    {"bbox": [0, 0, 10, 20], "label": "person", "confidence": 0.9},
                    {"bbox": [20, 0, 30, 20], "label": "person", "confidence": 0.8},
                    {"bbox": [40, 0, 50, 20], "label": "person", "confidence": 0.7}
                ],
                "person_crops": [
                    {"id": 1, "crop": "AAEC"},
                    {"id": 2, "crop": "AAEC", "description": {"gender": "unknown"}},
                    {"id": 3, "crop": "AAEC", "description": {"gender": "female", "age_group": "adult"}}
                ]
            }"#,
            true,
        );
        let analysis = processor.process(frame()).unwrap();
        assert_eq!(analysis.person_count(), 3);
        assert_eq!(analysis.observations.len(), 1);
        assert_eq!(
            analysis.observations[0].metadata.image_ref.as_deref(),
            Some("cam-7/1700000000000#crop-3")
        );

        let mut store = crate::store::PersonStore::default();
        for observation in analysis.observations {
            store.upsert(observation);
        }
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].descriptor.text(GENDER).as_deref(), Some("female"));
    }

    #[test]
    fn whole_frame_description_is_parsed_heuristically() {
        let (processor, _) = processor(
            r#"{"detections": [], "description": "Gender: Male. Clothing Top: hoodie. Looks tired"}"#,
            true,
        );
        let analysis = processor.process(frame()).unwrap();
        assert_eq!(analysis.observations.len(), 1);
        let obs = &analysis.observations[0];
        assert_eq!(obs.descriptor.len(), 2);
        assert_eq!(obs.metadata.camera_id, "cam-7");
        assert_eq!(obs.metadata.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn empty_description_yields_no_observation() {
        let (processor, _) = processor(r#"{"description": "nobody here"}"#, true);
        let analysis = processor.process(frame()).unwrap();
        assert!(analysis.observations.is_empty());
    }

    #[test]
    fn malformed_body_is_a_per_frame_error() {
        let (processor, _) = processor("{not json", true);
        assert!(matches!(
            processor.process(frame()),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[test]
    fn inverted_boxes_are_dropped() {
        let response: ProcessFrameResponse =
            serde_json::from_str(r#"{"detections": [{"bbox": [10, 10, 5, 5]}]}"#).unwrap();
        let analysis = analyze("cam", 0, response);
        assert!(analysis.detections[0].bbox.is_none());
    }
}
