//! The cooperative sampling loop.
//!
//! One thread owns the sampler, the health monitor and the optional push
//! channel and calls `step` repeatedly. Nothing that can block runs on that
//! thread: frame captures, detection calls and health probes each run on a
//! short-lived worker and report back over one channel, so a slow camera or a
//! hung service never holds up the others. Results are applied on the loop
//! thread: the sampler is told the job finished, observations are merged
//! into the shared `PersonStore` and persisted.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::camera::Camera;
use crate::detect::{DetectionService, FrameAnalysis, FrameProcessor};
use crate::error::ServiceError;
use crate::health::{HealthMonitor, HealthStatus};
use crate::ingest::{source_for_camera, FallbackImageSource, FrameSource};
use crate::person::Observation;
use crate::sampler::{CameraReport, CaptureJob, Captured, FrameJob, FrameSampler, Ticket};
use crate::store::{PeopleRepository, SharedPersonStore};
use crate::transport::{ChannelEvent, ChannelState, EventKind, ReconnectingChannel, StreamEvent};

pub type SharedReports = Arc<Mutex<Vec<CameraReport>>>;

struct Completion {
    ticket: Ticket,
    result: Result<FrameAnalysis, ServiceError>,
}

enum WorkerMessage {
    Captured(Captured),
    Processed(Completion),
    Probed(Result<(), ServiceError>),
}

/// Counters since the pipeline was built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_submitted: u64,
    pub frames_processed: u64,
    pub frame_errors: u64,
    pub stale_results: u64,
    pub new_records: u64,
    pub duplicates: u64,
    pub pushed_observations: u64,
}

/// What one `step` did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepSummary {
    /// Captures started for due ticks.
    pub captures: usize,
    /// Frames handed to the detection service.
    pub submitted: usize,
    pub completed: usize,
    pub observations: usize,
}

pub struct Pipeline {
    sampler: FrameSampler,
    processor: Arc<FrameProcessor>,
    health: HealthMonitor,
    channel: Option<ReconnectingChannel>,
    store: SharedPersonStore,
    repository: Box<dyn PeopleRepository>,
    reports: SharedReports,
    worker_tx: Sender<WorkerMessage>,
    worker_rx: Receiver<WorkerMessage>,
    pushed_tx: Sender<Observation>,
    pushed_rx: Receiver<Observation>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        service: Arc<dyn DetectionService>,
        health_interval: Duration,
        store: SharedPersonStore,
        repository: Box<dyn PeopleRepository>,
    ) -> Self {
        let health = HealthMonitor::new(service.clone(), health_interval);
        let processor = Arc::new(FrameProcessor::new(service, health.status()));
        let (worker_tx, worker_rx) = mpsc::channel();
        let (pushed_tx, pushed_rx) = mpsc::channel();
        Self {
            sampler: FrameSampler::new(),
            processor,
            health,
            channel: None,
            store,
            repository,
            reports: Arc::new(Mutex::new(Vec::new())),
            worker_tx,
            worker_rx,
            pushed_tx,
            pushed_rx,
            stats: PipelineStats::default(),
        }
    }

    /// Start sampling a camera from its configured source. Inactive cameras
    /// are not started.
    pub fn add_camera(
        &mut self,
        camera: Camera,
        interval: Duration,
        fallback: FallbackImageSource,
        now: Instant,
    ) -> bool {
        let live = source_for_camera(&camera);
        self.add_camera_with_source(camera, interval, live, fallback, now)
    }

    pub fn add_camera_with_source(
        &mut self,
        camera: Camera,
        interval: Duration,
        live: Box<dyn FrameSource>,
        fallback: FallbackImageSource,
        now: Instant,
    ) -> bool {
        if !camera.is_active() {
            log::info!("camera inactive, not sampling: camera={}", camera.id);
            return false;
        }
        let started = self.sampler.start(camera, interval, live, fallback, now);
        self.publish_reports();
        started
    }

    pub fn remove_camera(&mut self, camera_id: &str) -> bool {
        let stopped = self.sampler.stop(camera_id);
        self.publish_reports();
        stopped
    }

    /// Attach and open the push channel. `person_detected` events are merged
    /// into the store like polled results.
    pub fn attach_channel(&mut self, mut channel: ReconnectingChannel, now: Instant) {
        let pushed = self.pushed_tx.clone();
        channel.subscribe(
            EventKind::PersonDetected,
            Box::new(move |event: &ChannelEvent| {
                if let ChannelEvent::Message(StreamEvent::PersonDetected(person)) = event {
                    match person.to_observation(crate::now_ms()) {
                        Some(observation) => {
                            let _ = pushed.send(observation);
                        }
                        None => log::debug!(
                            "push event without attributes: camera={}",
                            person.camera_id
                        ),
                    }
                }
            }),
        );
        channel.subscribe(
            EventKind::Detections,
            Box::new(|event: &ChannelEvent| {
                if let ChannelEvent::Message(StreamEvent::Detections(d)) = event {
                    log::debug!(
                        "pushed detections: camera={} count={}",
                        d.camera_id.as_deref().unwrap_or("-"),
                        d.detections.len()
                    );
                }
            }),
        );
        channel.open(now);
        self.channel = Some(channel);
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(ReconnectingChannel::state)
    }

    pub fn channel_mut(&mut self) -> Option<&mut ReconnectingChannel> {
        self.channel.as_mut()
    }

    pub fn sampler(&self) -> &FrameSampler {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut FrameSampler {
        &mut self.sampler
    }

    pub fn health_status(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn store(&self) -> SharedPersonStore {
        self.store.clone()
    }

    /// Camera reports, refreshed after every step.
    pub fn reports(&self) -> SharedReports {
        self.reports.clone()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Earliest time anything is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.sampler.next_deadline(),
            self.health.next_deadline(),
            self.channel.as_ref().and_then(ReconnectingChannel::next_deadline),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run one loop iteration. Never blocks on a camera, the service or the
    /// push channel; waits up to `wait` for the first detection result (or
    /// for an outstanding probe) when work is in flight. Pass
    /// `Duration::ZERO` to never block.
    pub fn step(&mut self, now: Instant, wait: Duration) -> Result<StepSummary> {
        let mut summary = StepSummary::default();

        if self.health.due(now) {
            self.start_probe(now);
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.poll(now);
        }

        for job in self.sampler.poll(now) {
            self.capture(job);
            summary.captures += 1;
        }

        let deadline = Instant::now() + wait;
        while summary.completed == 0 && self.outstanding() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.worker_rx.recv_timeout(remaining) {
                Ok(message) => self.handle(message, &mut summary)?,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("worker channel disconnected"));
                }
            }
        }
        let ready: Vec<WorkerMessage> = self.worker_rx.try_iter().collect();
        for message in ready {
            self.handle(message, &mut summary)?;
        }

        let pushed: Vec<Observation> = self.pushed_rx.try_iter().collect();
        for observation in pushed {
            self.stats.pushed_observations += 1;
            self.merge(observation)?;
            summary.observations += 1;
        }

        self.publish_reports();
        Ok(summary)
    }

    /// Captures or detection calls in flight, or a probe outstanding.
    pub fn outstanding(&self) -> bool {
        self.sampler.in_flight() > 0 || self.health.is_probing()
    }

    /// Stop every camera and close the channel. In-flight results that
    /// arrive later are discarded.
    pub fn shutdown(&mut self) {
        self.sampler.stop_all();
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
        self.publish_reports();
        log::info!("pipeline stopped");
    }

    fn handle(&mut self, message: WorkerMessage, summary: &mut StepSummary) -> Result<()> {
        match message {
            WorkerMessage::Captured(captured) => {
                if let Some(job) = self.sampler.captured(captured) {
                    self.submit(job);
                    summary.submitted += 1;
                }
            }
            WorkerMessage::Processed(completion) => {
                summary.completed += 1;
                summary.observations += self.apply(completion)?;
            }
            WorkerMessage::Probed(result) => {
                self.health.finish_probe(result);
            }
        }
        Ok(())
    }

    fn start_probe(&mut self, now: Instant) {
        let service = self.health.start_probe(now);
        let tx = self.worker_tx.clone();
        let spawned = thread::Builder::new()
            .name("health-probe".to_string())
            .spawn(move || {
                let _ = tx.send(WorkerMessage::Probed(service.probe()));
            });
        if let Err(e) = spawned {
            log::error!("failed to spawn health probe worker: {}", e);
            self.health
                .finish_probe(Err(ServiceError::Transport(format!("probe worker: {}", e))));
        }
    }

    fn capture(&mut self, job: CaptureJob) {
        let ticket = job.ticket.clone();
        let tx = self.worker_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("capture-{}", ticket.camera_id))
            .spawn(move || {
                let _ = tx.send(WorkerMessage::Captured(job.run()));
            });
        if let Err(e) = spawned {
            log::error!(
                "failed to spawn capture worker: camera={} err={}",
                ticket.camera_id,
                e
            );
            self.sampler.complete(&ticket);
            self.sampler
                .note_error(&ticket.camera_id, format!("worker spawn failed: {}", e));
        }
    }

    fn submit(&mut self, job: FrameJob) {
        self.stats.frames_submitted += 1;
        let FrameJob { ticket, frame } = job;
        let processor = self.processor.clone();
        let tx = self.worker_tx.clone();
        let worker_ticket = ticket.clone();
        let spawned = thread::Builder::new()
            .name(format!("detect-{}", ticket.camera_id))
            .spawn(move || {
                let result = processor.process(frame);
                let _ = tx.send(WorkerMessage::Processed(Completion {
                    ticket: worker_ticket,
                    result,
                }));
            });
        if let Err(e) = spawned {
            log::error!(
                "failed to spawn detection worker: camera={} err={}",
                ticket.camera_id,
                e
            );
            self.sampler.complete(&ticket);
            self.sampler
                .note_error(&ticket.camera_id, format!("worker spawn failed: {}", e));
        }
    }

    fn apply(&mut self, completion: Completion) -> Result<usize> {
        let Completion { ticket, result } = completion;
        if !self.sampler.complete(&ticket) {
            self.stats.stale_results += 1;
            return Ok(0);
        }
        match result {
            Ok(analysis) => {
                self.stats.frames_processed += 1;
                log::debug!(
                    "frame processed: camera={} seq={} persons={} observations={}",
                    ticket.camera_id,
                    ticket.seq,
                    analysis.person_count(),
                    analysis.observations.len()
                );
                let count = analysis.observations.len();
                for observation in analysis.observations {
                    self.merge(observation)?;
                }
                Ok(count)
            }
            Err(e) => {
                self.stats.frame_errors += 1;
                if e.is_fail_fast() {
                    log::debug!("frame skipped: camera={} err={}", ticket.camera_id, e);
                } else {
                    log::warn!(
                        "frame processing failed: camera={} seq={} err={}",
                        ticket.camera_id,
                        ticket.seq,
                        e
                    );
                }
                self.sampler.note_error(&ticket.camera_id, e.to_string());
                Ok(0)
            }
        }
    }

    fn merge(&mut self, observation: Observation) -> Result<()> {
        let upsert = {
            let mut store = self
                .store
                .lock()
                .map_err(|_| anyhow!("person store lock poisoned"))?;
            store.upsert(observation)
        };
        if upsert.was_duplicate {
            self.stats.duplicates += 1;
        } else {
            self.stats.new_records += 1;
        }
        if let Err(e) = self.repository.append(&upsert.record) {
            log::warn!(
                "failed to persist person record: id={} repo={} err={:#}",
                upsert.record.id,
                self.repository.describe(),
                e
            );
        }
        Ok(())
    }

    fn publish_reports(&self) {
        match self.reports.lock() {
            Ok(mut reports) => *reports = self.sampler.reports(),
            Err(_) => log::error!("camera report lock poisoned"),
        }
    }
}
