//! Detection service liveness tracking.
//!
//! `HealthMonitor` probes the service on a fixed period (and on demand) and
//! publishes the last-known result through a cloneable `HealthStatus` handle
//! that the frame processor consults before every call. One failed probe flips
//! the status to unhealthy; one successful probe flips it back.
//!
//! An event loop that must not block splits a probe in two: `start_probe`
//! hands out the service to call on a worker, `finish_probe` records the
//! result.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::DetectionService;
use crate::error::ServiceError;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Shared last-known health of the detection service.
#[derive(Clone, Debug)]
pub struct HealthStatus {
    healthy: Arc<AtomicBool>,
    probes: Arc<AtomicU64>,
}

impl HealthStatus {
    pub fn new(initially_healthy: bool) -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(initially_healthy)),
            probes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Number of probes recorded so far.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Record a probe result; returns the previous status.
    fn record(&self, healthy: bool) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.healthy.swap(healthy, Ordering::SeqCst)
    }
}

pub struct HealthMonitor {
    service: Arc<dyn DetectionService>,
    status: HealthStatus,
    interval: Duration,
    next_probe: Option<Instant>,
    probing: bool,
    last_error: Option<String>,
}

impl HealthMonitor {
    /// Status starts unhealthy until the first probe succeeds.
    pub fn new(service: Arc<dyn DetectionService>, interval: Duration) -> Self {
        Self {
            service,
            status: HealthStatus::new(false),
            interval,
            next_probe: None,
            probing: false,
            last_error: None,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status.clone()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Probe now, regardless of schedule.
    pub fn probe(&mut self) -> bool {
        let result = self.service.probe();
        self.finish_probe(result)
    }

    /// True when the period has elapsed (or no probe has run yet) and no
    /// probe is outstanding.
    pub fn due(&self, now: Instant) -> bool {
        !self.probing && self.next_probe.map_or(true, |next| now >= next)
    }

    /// Schedule the next period and return the service to probe.
    pub fn start_probe(&mut self, now: Instant) -> Arc<dyn DetectionService> {
        self.probing = true;
        self.next_probe = Some(now + self.interval);
        self.service.clone()
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Record the result of a probe; returns the new status.
    pub fn finish_probe(&mut self, result: Result<(), ServiceError>) -> bool {
        self.probing = false;
        let healthy = match result {
            Ok(()) => {
                self.last_error = None;
                true
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                false
            }
        };
        let was_healthy = self.status.record(healthy);
        match (was_healthy, healthy) {
            (false, true) => log::info!("detection service healthy"),
            (true, false) => log::warn!(
                "detection service unhealthy: {}",
                self.last_error.as_deref().unwrap_or("probe failed")
            ),
            _ => {}
        }
        healthy
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_probe
    }
}
