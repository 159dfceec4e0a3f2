//! Per-camera frame sampler.
//!
//! Each started camera owns a fixed-period timer and a small state machine:
//!
//! ```text
//! IDLE -> CAPTURING -> AWAITING_RESULT -> IDLE
//! ```
//!
//! A tick that fires while the camera is `CAPTURING` or `AWAITING_RESULT` is
//! dropped (logged, not queued), so no camera ever has more than one frame in
//! flight. When live capture fails the camera switches to its fallback image
//! list for all subsequent ticks; an exhausted fallback list leaves the camera
//! `Failed` until it is reset.
//!
//! The sampler is driven by the caller's event loop and never touches a
//! source itself: `poll(now)` fires due ticks and returns capture jobs, which
//! the caller runs off the loop thread. `captured(..)` turns a finished
//! capture into a frame job and `complete(ticket)` reports that the detection
//! call for it finished. Results for stopped or restarted cameras are ignored.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::camera::Camera;
use crate::frame::Frame;
use crate::ingest::{FallbackImageSource, FrameSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerState {
    Idle,
    Capturing,
    AwaitingResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Live,
    /// Live capture failed; frames come from the fallback list.
    Degraded,
    /// Fallback list exhausted. Persistent until `reset`.
    Failed,
}

/// Identifies one in-flight frame. Sequence numbers are never reused, so a
/// completion that arrives after `stop`/`start` cannot match the new slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub camera_id: String,
    pub seq: u64,
}

/// A captured frame ready for the frame processor.
#[derive(Debug)]
pub struct FrameJob {
    pub ticket: Ticket,
    pub frame: Frame,
}

struct CaptureChain {
    live: Box<dyn FrameSource>,
    fallback: FallbackImageSource,
}

/// One due tick. Running it may block on the camera, so the caller runs it
/// on a worker and hands the result back through `FrameSampler::captured`.
pub struct CaptureJob {
    pub ticket: Ticket,
    mode: SourceMode,
    chain: Arc<Mutex<CaptureChain>>,
}

impl CaptureJob {
    /// Capture from the live source (unless the camera is already degraded),
    /// falling back to the next still image on error.
    pub fn run(self) -> Captured {
        let camera_id = self.ticket.camera_id.as_str();
        let mut chain = self.chain.lock().unwrap_or_else(PoisonError::into_inner);
        let mut degraded = None;
        if self.mode == SourceMode::Live {
            match chain.live.capture(camera_id) {
                Ok(frame) => {
                    return Captured {
                        ticket: self.ticket,
                        degraded,
                        frame: Ok(frame),
                    }
                }
                Err(e) => {
                    log::warn!(
                        "live capture failed camera={} err={}; degrading to fallback images",
                        camera_id,
                        e
                    );
                    degraded = Some(e.to_string());
                    chain.fallback.reset();
                }
            }
        }
        let frame = chain.fallback.next(camera_id).map_err(|e| e.to_string());
        Captured {
            ticket: self.ticket,
            degraded,
            frame,
        }
    }
}

/// Result of a `CaptureJob`.
pub struct Captured {
    pub ticket: Ticket,
    /// Live capture error that switched the camera to its fallback list.
    degraded: Option<String>,
    frame: Result<Frame, String>,
}

/// Operator-visible status of one camera.
#[derive(Clone, Debug, Serialize)]
pub struct CameraReport {
    pub camera_id: String,
    pub name: String,
    pub state: SamplerState,
    pub mode: SourceMode,
    pub source: String,
    pub interval_ms: u64,
    pub frames_submitted: u64,
    pub fallback_frames: u64,
    pub ticks_dropped: u64,
    pub last_error: Option<String>,
}

struct CameraSlot {
    camera: Camera,
    interval: Duration,
    next_tick: Instant,
    state: SamplerState,
    mode: SourceMode,
    source: String,
    chain: Arc<Mutex<CaptureChain>>,
    in_flight: Option<u64>,
    frames_submitted: u64,
    fallback_frames: u64,
    ticks_dropped: u64,
    last_error: Option<String>,
}

impl CameraSlot {
    fn report(&self) -> CameraReport {
        CameraReport {
            camera_id: self.camera.id.clone(),
            name: self.camera.name.clone(),
            state: self.state,
            mode: self.mode,
            source: self.source.clone(),
            interval_ms: self.interval.as_millis() as u64,
            frames_submitted: self.frames_submitted,
            fallback_frames: self.fallback_frames,
            ticks_dropped: self.ticks_dropped,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Default)]
pub struct FrameSampler {
    slots: BTreeMap<String, CameraSlot>,
    next_seq: u64,
}

impl FrameSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start sampling a camera. Returns false (and changes nothing) when the
    /// camera is already started.
    pub fn start(
        &mut self,
        camera: Camera,
        interval: Duration,
        live: Box<dyn FrameSource>,
        fallback: FallbackImageSource,
        now: Instant,
    ) -> bool {
        if self.slots.contains_key(&camera.id) {
            log::debug!("sampler already running for camera={}", camera.id);
            return false;
        }
        let interval = interval.max(Duration::from_millis(1));
        let source = live.describe();
        log::info!(
            "sampler started camera={} interval_ms={} source={}",
            camera.id,
            interval.as_millis(),
            source
        );
        let id = camera.id.clone();
        self.slots.insert(
            id,
            CameraSlot {
                camera,
                interval,
                next_tick: now + interval,
                state: SamplerState::Idle,
                mode: SourceMode::Live,
                source,
                chain: Arc::new(Mutex::new(CaptureChain { live, fallback })),
                in_flight: None,
                frames_submitted: 0,
                fallback_frames: 0,
                ticks_dropped: 0,
                last_error: None,
            },
        );
        true
    }

    /// Cancel a camera's timer and discard its in-flight state. Safe in any state.
    pub fn stop(&mut self, camera_id: &str) -> bool {
        match self.slots.remove(camera_id) {
            Some(slot) => {
                log::info!(
                    "sampler stopped camera={} in_flight={}",
                    camera_id,
                    slot.in_flight.is_some()
                );
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<String> = self.slots.keys().cloned().collect();
        for id in ids {
            self.stop(&id);
        }
    }

    pub fn is_running(&self, camera_id: &str) -> bool {
        self.slots.contains_key(camera_id)
    }

    /// Fire every due tick and return the captures to run.
    pub fn poll(&mut self, now: Instant) -> Vec<CaptureJob> {
        let due: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| now >= slot.next_tick)
            .map(|(id, _)| id.clone())
            .collect();
        let mut jobs = Vec::new();
        for camera_id in due {
            if let Some(job) = self.fire_tick(&camera_id, now) {
                jobs.push(job);
            }
        }
        jobs
    }

    fn fire_tick(&mut self, camera_id: &str, now: Instant) -> Option<CaptureJob> {
        let seq = self.next_seq;
        let slot = self.slots.get_mut(camera_id)?;

        slot.next_tick += slot.interval;
        if slot.next_tick <= now {
            // Loop fell behind; coalesce missed periods into this tick.
            slot.next_tick = now + slot.interval;
        }

        if slot.state != SamplerState::Idle {
            slot.ticks_dropped += 1;
            log::debug!(
                "tick dropped camera={} state={:?} dropped={}",
                camera_id,
                slot.state,
                slot.ticks_dropped
            );
            return None;
        }
        if slot.mode == SourceMode::Failed {
            return None;
        }

        self.next_seq += 1;
        slot.state = SamplerState::Capturing;
        slot.in_flight = Some(seq);
        Some(CaptureJob {
            ticket: Ticket {
                camera_id: camera_id.to_string(),
                seq,
            },
            mode: slot.mode,
            chain: slot.chain.clone(),
        })
    }

    /// Apply a finished capture. Returns the frame to submit, or None when the
    /// ticket is stale or no frame could be produced (the camera is then
    /// `Failed` and `Idle`).
    pub fn captured(&mut self, captured: Captured) -> Option<FrameJob> {
        let Captured {
            ticket,
            degraded,
            frame,
        } = captured;
        let slot = match self.slots.get_mut(&ticket.camera_id) {
            Some(slot) if slot.in_flight == Some(ticket.seq) => slot,
            _ => {
                log::debug!(
                    "ignoring stale capture camera={} seq={}",
                    ticket.camera_id,
                    ticket.seq
                );
                return None;
            }
        };

        if let Some(e) = degraded {
            if slot.mode == SourceMode::Live {
                slot.mode = SourceMode::Degraded;
            }
            slot.last_error = Some(format!("degraded: {}", e));
        }

        match frame {
            Ok(frame) => {
                slot.state = SamplerState::AwaitingResult;
                slot.frames_submitted += 1;
                if frame.is_fallback() {
                    slot.fallback_frames += 1;
                }
                Some(FrameJob { ticket, frame })
            }
            Err(e) => {
                log::error!("camera={} has no usable frames: {}", ticket.camera_id, e);
                slot.mode = SourceMode::Failed;
                slot.last_error = Some(e);
                slot.state = SamplerState::Idle;
                slot.in_flight = None;
                None
            }
        }
    }

    /// Report that the detection call for `ticket` finished (success or
    /// failure). Returns false when the ticket is stale and was ignored.
    pub fn complete(&mut self, ticket: &Ticket) -> bool {
        let Some(slot) = self.slots.get_mut(&ticket.camera_id) else {
            log::debug!(
                "ignoring completion for stopped camera={} seq={}",
                ticket.camera_id,
                ticket.seq
            );
            return false;
        };
        if slot.in_flight != Some(ticket.seq) {
            log::debug!(
                "ignoring stale completion camera={} seq={}",
                ticket.camera_id,
                ticket.seq
            );
            return false;
        }
        slot.in_flight = None;
        slot.state = SamplerState::Idle;
        true
    }

    /// Record a per-frame error for the operator without changing the state machine.
    pub fn note_error(&mut self, camera_id: &str, message: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(camera_id) {
            slot.last_error = Some(message.into());
        }
    }

    /// Clear a degraded or failed camera: live capture is retried on the next
    /// tick. The fallback list restarts whenever live capture fails again.
    pub fn reset(&mut self, camera_id: &str) -> bool {
        let Some(slot) = self.slots.get_mut(camera_id) else {
            return false;
        };
        slot.mode = SourceMode::Live;
        slot.last_error = None;
        log::info!("sampler reset camera={}", camera_id);
        true
    }

    pub fn state(&self, camera_id: &str) -> Option<SamplerState> {
        self.slots.get(camera_id).map(|slot| slot.state)
    }

    pub fn mode(&self, camera_id: &str) -> Option<SourceMode> {
        self.slots.get(camera_id).map(|slot| slot.mode)
    }

    pub fn in_flight_for(&self, camera_id: &str) -> usize {
        self.slots
            .get(camera_id)
            .map(|slot| usize::from(slot.in_flight.is_some()))
            .unwrap_or(0)
    }

    pub fn in_flight(&self) -> usize {
        self.slots.values().filter(|s| s.in_flight.is_some()).count()
    }

    /// Earliest pending tick across all cameras.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().map(|slot| slot.next_tick).min()
    }

    pub fn report(&self, camera_id: &str) -> Option<CameraReport> {
        self.slots.get(camera_id).map(CameraSlot::report)
    }

    pub fn reports(&self) -> Vec<CameraReport> {
        self.slots.values().map(CameraSlot::report).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::frame::FrameOrigin;
    use crate::ingest::FallbackCandidate;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    const INTERVAL: Duration = Duration::from_secs(4);

    struct ScriptedSource {
        script: Arc<Mutex<VecDeque<Result<(), CaptureError>>>>,
        captures: Arc<Mutex<u32>>,
    }

    impl FrameSource for ScriptedSource {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn capture(&mut self, camera_id: &str) -> Result<Frame, CaptureError> {
            *self.captures.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            next.map(|_| Frame::new(vec![1, 2, 3], camera_id, 0, FrameOrigin::Live))
        }
    }

    fn scripted(script: Vec<Result<(), CaptureError>>) -> (Box<dyn FrameSource>, Arc<Mutex<u32>>) {
        let captures = Arc::new(Mutex::new(0));
        let source = ScriptedSource {
            script: Arc::new(Mutex::new(script.into())),
            captures: captures.clone(),
        };
        (Box::new(source), captures)
    }

    fn png() -> Vec<u8> {
        let image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn fallback(count: usize) -> FallbackImageSource {
        FallbackImageSource::new(
            (0..count)
                .map(|i| FallbackCandidate::Bytes {
                    label: format!("still-{}", i),
                    data: png(),
                })
                .collect(),
        )
    }

    fn camera(id: &str) -> Camera {
        Camera::new(id, format!("Camera {}", id))
    }

    /// Fire due ticks and run their captures inline.
    fn tick(sampler: &mut FrameSampler, now: Instant) -> Vec<FrameJob> {
        sampler
            .poll(now)
            .into_iter()
            .filter_map(|job| sampler.captured(job.run()))
            .collect()
    }

    #[test]
    fn start_is_idempotent() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (a, _) = scripted(vec![]);
        let (b, _) = scripted(vec![]);
        assert!(sampler.start(camera("c1"), INTERVAL, a, fallback(0), t0));
        assert!(!sampler.start(camera("c1"), INTERVAL, b, fallback(0), t0));
        assert_eq!(sampler.reports().len(), 1);
    }

    #[test]
    fn no_tick_before_interval_elapses() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, captures) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);
        assert!(tick(&mut sampler, t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(*captures.lock().unwrap(), 0);
        assert_eq!(tick(&mut sampler, t0 + INTERVAL).len(), 1);
    }

    #[test]
    fn poll_never_touches_the_source() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, captures) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);

        let mut jobs = sampler.poll(t0 + INTERVAL);
        assert_eq!(jobs.len(), 1);
        assert_eq!(*captures.lock().unwrap(), 0);
        assert_eq!(sampler.state("c1"), Some(SamplerState::Capturing));
        assert_eq!(sampler.in_flight_for("c1"), 1);

        // A tick that fires mid-capture is dropped too.
        assert!(sampler.poll(t0 + INTERVAL * 2).is_empty());
        assert_eq!(sampler.report("c1").unwrap().ticks_dropped, 1);

        let job = sampler.captured(jobs.remove(0).run()).unwrap();
        assert_eq!(*captures.lock().unwrap(), 1);
        assert_eq!(sampler.state("c1"), Some(SamplerState::AwaitingResult));
        assert!(sampler.complete(&job.ticket));
    }

    #[test]
    fn ticks_while_awaiting_result_are_dropped() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, captures) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);

        let jobs = tick(&mut sampler, t0 + INTERVAL);
        assert_eq!(jobs.len(), 1);
        assert_eq!(sampler.state("c1"), Some(SamplerState::AwaitingResult));

        for n in 2..=6u32 {
            assert!(tick(&mut sampler, t0 + INTERVAL * n).is_empty());
            assert_eq!(sampler.in_flight_for("c1"), 1);
        }
        assert_eq!(*captures.lock().unwrap(), 1);
        assert_eq!(sampler.report("c1").unwrap().ticks_dropped, 5);

        assert!(sampler.complete(&jobs[0].ticket));
        assert_eq!(sampler.state("c1"), Some(SamplerState::Idle));
        assert_eq!(tick(&mut sampler, t0 + INTERVAL * 7).len(), 1);
    }

    #[test]
    fn completion_after_stop_is_ignored() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, _) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);
        let job = tick(&mut sampler, t0 + INTERVAL).pop().unwrap();

        assert!(sampler.stop("c1"));
        assert!(!sampler.complete(&job.ticket));

        let (src, _) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0 + INTERVAL);
        let fresh = tick(&mut sampler, t0 + INTERVAL * 2).pop().unwrap();
        // Stale ticket from the previous run must not release the new one.
        assert!(!sampler.complete(&job.ticket));
        assert_eq!(sampler.state("c1"), Some(SamplerState::AwaitingResult));
        assert!(sampler.complete(&fresh.ticket));
    }

    #[test]
    fn capture_finishing_after_stop_is_discarded() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, _) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);
        let job = sampler.poll(t0 + INTERVAL).pop().unwrap();
        sampler.stop("c1");
        assert!(sampler.captured(job.run()).is_none());
        assert_eq!(sampler.in_flight(), 0);
    }

    #[test]
    fn stop_unknown_camera_is_safe() {
        let mut sampler = FrameSampler::new();
        assert!(!sampler.stop("nope"));
    }

    #[test]
    fn capture_error_degrades_to_fallback_for_subsequent_ticks() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, captures) = scripted(vec![Err(CaptureError::Decode("bad codec".into()))]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(3), t0);

        let job = tick(&mut sampler, t0 + INTERVAL).pop().unwrap();
        assert_eq!(job.frame.origin, FrameOrigin::Fallback(0));
        assert_eq!(sampler.mode("c1"), Some(SourceMode::Degraded));
        assert!(sampler.report("c1").unwrap().last_error.unwrap().contains("degraded"));
        sampler.complete(&job.ticket);

        let job = tick(&mut sampler, t0 + INTERVAL * 2).pop().unwrap();
        assert_eq!(job.frame.origin, FrameOrigin::Fallback(1));
        // Live source is never consulted again.
        assert_eq!(*captures.lock().unwrap(), 1);
    }

    #[test]
    fn exhausted_fallback_leaves_camera_failed() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, _) = scripted(vec![Err(CaptureError::Fetch("refused".into()))]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(1), t0);

        let job = tick(&mut sampler, t0 + INTERVAL).pop().unwrap();
        sampler.complete(&job.ticket);

        assert!(tick(&mut sampler, t0 + INTERVAL * 2).is_empty());
        assert_eq!(sampler.mode("c1"), Some(SourceMode::Failed));
        assert_eq!(sampler.state("c1"), Some(SamplerState::Idle));
        assert_eq!(sampler.in_flight(), 0);
        let report = sampler.report("c1").unwrap();
        assert!(report.last_error.unwrap().contains("no fallback available"));

        // Not retried automatically.
        assert!(sampler.poll(t0 + INTERVAL * 3).is_empty());

        assert!(sampler.reset("c1"));
        assert_eq!(tick(&mut sampler, t0 + INTERVAL * 4).len(), 1);
        assert_eq!(sampler.mode("c1"), Some(SourceMode::Live));
    }

    #[test]
    fn cameras_are_independent() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (a, _) = scripted(vec![]);
        let (b, _) = scripted(vec![]);
        sampler.start(camera("a"), INTERVAL, a, fallback(0), t0);
        sampler.start(camera("b"), INTERVAL, b, fallback(0), t0);

        let jobs = tick(&mut sampler, t0 + INTERVAL);
        assert_eq!(jobs.len(), 2);
        assert_eq!(sampler.in_flight(), 2);

        let a_job = jobs.iter().find(|j| j.ticket.camera_id == "a").unwrap();
        sampler.complete(&a_job.ticket);

        let next = tick(&mut sampler, t0 + INTERVAL * 2);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].ticket.camera_id, "a");
        for id in ["a", "b"] {
            assert!(sampler.in_flight_for(id) <= 1);
        }
    }

    #[test]
    fn late_poll_coalesces_missed_ticks() {
        let t0 = Instant::now();
        let mut sampler = FrameSampler::new();
        let (src, _) = scripted(vec![]);
        sampler.start(camera("c1"), INTERVAL, src, fallback(0), t0);
        let late = t0 + INTERVAL * 10;
        assert_eq!(sampler.poll(late).len(), 1);
        assert_eq!(sampler.next_deadline(), Some(late + INTERVAL));
    }
}
