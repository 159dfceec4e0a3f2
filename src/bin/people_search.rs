//! people_search - rank stored sightings against a free-text description
//!
//! Reads the people database (or its JSON snapshot), optionally asks the
//! detection service's search endpoint first, and prints the outcome as JSON.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use sightline::{
    search::search_people,
    store::{load_people, PeopleRepository, SnapshotRepository, SqlitePeopleRepository},
    DetectionService, HttpDetectionService,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Search recorded person sightings by description"
)]
struct Args {
    /// People database written by sightlined.
    #[arg(long, env = "SIGHTLINE_DB_PATH", default_value = "sightline.db")]
    db_path: String,

    /// JSON snapshot used when the database cannot be read.
    #[arg(long, env = "SIGHTLINE_SNAPSHOT_PATH")]
    snapshot: Option<PathBuf>,

    /// Detection service base URL; its search endpoint is preferred when reachable.
    #[arg(long, env = "SIGHTLINE_SERVICE_URL")]
    remote: Option<String>,

    /// Detection service request timeout.
    #[arg(long, env = "SIGHTLINE_DETECTION_TIMEOUT_MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Free-text description, e.g. "woman in a red jacket".
    query: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if args.query.trim().is_empty() {
        return Err(anyhow!("query must not be empty"));
    }

    let mut primary = match SqlitePeopleRepository::open(&args.db_path) {
        Ok(repo) => Some(repo),
        Err(e) => {
            log::warn!("people database {} unavailable: {:#}", args.db_path, e);
            None
        }
    };
    let mut snapshot = args.snapshot.clone().map(SnapshotRepository::new);
    let records = load_people(
        primary.as_mut().map(|repo| repo as &mut dyn PeopleRepository),
        snapshot.as_mut(),
    )?;

    let remote = match args.remote.as_deref() {
        Some(url) => {
            let service = HttpDetectionService::new(url, Duration::from_millis(args.timeout_ms))?;
            match service.probe() {
                Ok(()) => Some(service),
                Err(e) => {
                    log::warn!("detection service {} unreachable, searching locally: {}", url, e);
                    None
                }
            }
        }
        None => None,
    };

    let outcome = search_people(
        &args.query,
        &records,
        remote.as_ref().map(|service| service as &dyn DetectionService),
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
