//! sightlined - camera sampling daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by SIGHTLINE_CONFIG, then env overrides)
//! 2. Seeds the person store from the people database or its JSON snapshot
//! 3. Samples every active camera, falling back to still images on capture failure
//! 4. Sends frames to the detection service while its health probe passes
//! 5. Merges detected people into the store, deduplicating repeat sightings
//! 6. Optionally follows the service's push stream, reconnecting on drops
//! 7. Serves the loopback operator API until Ctrl-C

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sightline::{
    api::{ApiConfig, ApiServer, ApiState},
    config::SightlineConfig,
    store::{
        load_people, InMemoryPeopleRepository, PeopleRepository, SnapshotRepository,
        SqlitePeopleRepository,
    },
    transport::{ReconnectingChannel, WsTransport},
    DetectionService, FallbackImageSource, HttpDetectionService, PersonStore, Pipeline,
};

const MAX_LOOP_WAIT: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SightlineConfig::load()?;
    log::info!(
        "sightlined {} starting: cameras={} service={}",
        env!("CARGO_PKG_VERSION"),
        cfg.cameras.len(),
        cfg.service.base_url
    );

    let service: Arc<dyn DetectionService> = Arc::new(HttpDetectionService::new(
        &cfg.service.base_url,
        cfg.service.timeout,
    )?);

    let mut repository: Box<dyn PeopleRepository> = match SqlitePeopleRepository::open(&cfg.db_path)
    {
        Ok(repo) => Box::new(repo),
        Err(e) => {
            log::warn!(
                "people database {} unavailable, keeping records in memory: {:#}",
                cfg.db_path,
                e
            );
            Box::new(InMemoryPeopleRepository::new())
        }
    };
    let mut snapshot = cfg.snapshot_path.clone().map(SnapshotRepository::new);
    let seed = match load_people(Some(repository.as_mut()), snapshot.as_mut()) {
        Ok(records) => records,
        Err(e) => {
            log::warn!("starting with an empty person store: {:#}", e);
            Vec::new()
        }
    };
    let mut store = PersonStore::new(cfg.dedup.policy());
    let seeded = store.load(seed);
    log::info!("person store seeded with {} record(s)", seeded);
    let store = store.into_shared();

    let mut pipeline = Pipeline::new(
        service,
        cfg.service.health_interval,
        store.clone(),
        repository,
    );

    let now = Instant::now();
    for camera in cfg.cameras.iter().cloned() {
        let fallback = FallbackImageSource::from_paths(&cfg.sampler.fallback_images);
        let camera_id = camera.id.clone();
        if pipeline.add_camera(camera, cfg.sampler.interval, fallback, now) {
            log::info!("sampling camera {} every {:?}", camera_id, cfg.sampler.interval);
        }
    }

    if let Some(url) = cfg.service.stream_url.as_deref() {
        let transport = WsTransport::new(url)?;
        pipeline.attach_channel(ReconnectingChannel::new(Box::new(transport), cfg.channel), now);
        log::info!("following push stream at {}", url);
    }

    let api = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        ApiState {
            store,
            reports: pipeline.reports(),
            health: pipeline.health_status(),
        },
    )
    .spawn()?;

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let wait = pipeline
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(MAX_LOOP_WAIT)
            .min(MAX_LOOP_WAIT);
        if let Err(e) = pipeline.step(now, wait) {
            log::error!("pipeline step failed: {:#}", e);
        }
        if !pipeline.outstanding() {
            // step only blocks while workers are busy
            std::thread::sleep(wait.max(Duration::from_millis(10)));
        }
    }

    log::info!("shutdown signal received");
    pipeline.shutdown();
    api.stop()?;
    Ok(())
}
