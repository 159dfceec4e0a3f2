//! Error taxonomy for the sampling pipeline.
//!
//! Every error here is confined to the camera, frame, query or connection it
//! occurred in. None of them is allowed to terminate the daemon.

use std::fmt;

/// Live capture failed (video/image fetch or decode).
///
/// Recoverable: the sampler degrades the camera to its fallback images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureError {
    Fetch(String),
    Decode(String),
    Unsupported(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(msg) => write!(f, "capture fetch failed: {}", msg),
            Self::Decode(msg) => write!(f, "capture decode failed: {}", msg),
            Self::Unsupported(msg) => write!(f, "capture source unsupported: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// The fallback image list could not produce a frame.
///
/// Terminal for the camera until the list is reset externally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FallbackError {
    Empty,
    Exhausted { tried: usize },
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no fallback available: fallback list is empty"),
            Self::Exhausted { tried } => write!(
                f,
                "no fallback available: {} candidate image(s) exhausted",
                tried
            ),
        }
    }
}

impl std::error::Error for FallbackError {}

/// Detection service call failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceError {
    /// Last health probe failed; no network call was attempted.
    Unavailable,
    /// Network-level failure (connect, timeout, reset).
    Transport(String),
    /// Non-2xx HTTP status.
    Status(u16),
    /// Response body was not the expected JSON shape.
    Malformed(String),
}

impl ServiceError {
    /// True when the error was raised before any request left the process.
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "service unavailable"),
            Self::Transport(msg) => write!(f, "detection service transport error: {}", msg),
            Self::Status(code) => write!(f, "detection service returned status {}", code),
            Self::Malformed(msg) => write!(f, "malformed detection service response: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Reconnecting channel errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    NotConnected,
    Transport(String),
    /// Reconnect attempts exhausted.
    Failed { attempts: u32 },
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "channel not connected"),
            Self::Transport(msg) => write!(f, "channel transport error: {}", msg),
            Self::Failed { attempts } => {
                write!(f, "channel failed after {} reconnect attempt(s)", attempts)
            }
        }
    }
}

impl std::error::Error for ChannelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_the_only_fail_fast_error() {
        assert!(ServiceError::Unavailable.is_fail_fast());
        assert!(!ServiceError::Status(503).is_fail_fast());
        assert!(!ServiceError::Transport("reset".into()).is_fail_fast());
    }

    #[test]
    fn exhausted_message_names_candidate_count() {
        let msg = FallbackError::Exhausted { tried: 3 }.to_string();
        assert!(msg.contains("no fallback available"));
        assert!(msg.contains('3'));
    }
}
