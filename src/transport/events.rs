//! Typed push events and the observer registry that dispatches them.
//!
//! Stream messages are JSON objects carrying an `event` field. Known event
//! types decode into their own variants; anything else is kept as
//! `StreamEvent::Unknown` and reaches catch-all listeners only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detect::descriptor_from_value;
use crate::error::ChannelError;
use crate::person::{Observation, PersonMetadata};

/// `person_detected`: one described person seen by a camera.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PersonDetected {
    pub camera_id: String,
    /// Free text or a structured attribute object.
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default, alias = "image_data")]
    pub crop: Option<String>,
}

impl PersonDetected {
    /// Convert to an observation; `None` when the description carries no attributes.
    pub fn to_observation(&self, received_at_ms: u64) -> Option<Observation> {
        let descriptor = descriptor_from_value(&self.description);
        if descriptor.is_empty() {
            return None;
        }
        let timestamp_ms = self.timestamp_ms.unwrap_or(received_at_ms);
        let mut metadata = PersonMetadata::new(self.camera_id.clone(), timestamp_ms);
        metadata.image_ref = Some(format!("{}/{}#stream", self.camera_id, timestamp_ms));
        Some(Observation {
            descriptor,
            metadata,
            crop: self.crop.clone(),
        })
    }
}

/// `detections`: raw detection list for a frame processed server-side.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DetectionsEvent {
    #[serde(default)]
    pub camera_id: Option<String>,
    #[serde(default)]
    pub detections: Vec<Value>,
}

/// `status`: service-side status notice.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StatusEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    PersonDetected(PersonDetected),
    Detections(DetectionsEvent),
    Status(StatusEvent),
    Unknown { event: String, payload: Value },
}

impl StreamEvent {
    /// Decode one stream message. Fails on non-JSON text, a missing `event`
    /// field, or a known event whose body does not fit its shape.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(text)?;
        let event = match payload.get("event").and_then(Value::as_str) {
            Some(event) => event.to_string(),
            None => {
                return Err(serde::de::Error::missing_field("event"));
            }
        };
        Ok(match event.as_str() {
            "person_detected" => Self::PersonDetected(serde_json::from_value(payload)?),
            "detections" => Self::Detections(serde_json::from_value(payload)?),
            "status" => Self::Status(serde_json::from_value(payload)?),
            _ => Self::Unknown { event, payload },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::PersonDetected(_) => "person_detected",
            Self::Detections(_) => "detections",
            Self::Status(_) => "status",
            Self::Unknown { event, .. } => event,
        }
    }
}

/// Everything a channel reports to its listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    /// Terminal failure; emitted once when reconnects are exhausted.
    Error(ChannelError),
    Message(StreamEvent),
}

/// Subscription key for typed listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    PersonDetected,
    Detections,
    Status,
}

impl ChannelEvent {
    /// `None` for unknown stream events, which only catch-all listeners see.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Connected => Some(EventKind::Connected),
            Self::Disconnected { .. } => Some(EventKind::Disconnected),
            Self::Error(_) => Some(EventKind::Error),
            Self::Message(StreamEvent::PersonDetected(_)) => Some(EventKind::PersonDetected),
            Self::Message(StreamEvent::Detections(_)) => Some(EventKind::Detections),
            Self::Message(StreamEvent::Status(_)) => Some(EventKind::Status),
            Self::Message(StreamEvent::Unknown { .. }) => None,
        }
    }
}

pub type Listener = Box<dyn FnMut(&ChannelEvent) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Typed observer registry with per-kind and catch-all subscriptions.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    typed: Vec<(ListenerId, EventKind, Listener)>,
    any: Vec<(ListenerId, Listener)>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.mint();
        self.typed.push((id, kind, listener));
        id
    }

    pub fn subscribe_all(&mut self, listener: Listener) -> ListenerId {
        let id = self.mint();
        self.any.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.typed.len() + self.any.len();
        self.typed.retain(|(lid, _, _)| *lid != id);
        self.any.retain(|(lid, _)| *lid != id);
        before != self.typed.len() + self.any.len()
    }

    pub fn len(&self) -> usize {
        self.typed.len() + self.any.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to matching typed listeners, then to every catch-all listener.
    /// Returns the number of listeners invoked.
    pub fn dispatch(&mut self, event: &ChannelEvent) -> usize {
        let mut delivered = 0;
        if let Some(kind) = event.kind() {
            for (_, listener_kind, listener) in self.typed.iter_mut() {
                if *listener_kind == kind {
                    listener(event);
                    delivered += 1;
                }
            }
        }
        for (_, listener) in self.any.iter_mut() {
            listener(event);
            delivered += 1;
        }
        delivered
    }

    fn mint(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}
