use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::Camera;
use crate::store::DedupPolicy;
use crate::transport::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS};

const DEFAULT_DB_PATH: &str = "sightline.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8810";
const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HEALTH_INTERVAL_MS: u64 = 30_000;
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 4_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
const DEFAULT_DEDUP_QUORUM: usize = 3;

#[derive(Debug, Deserialize, Default)]
struct SightlineConfigFile {
    db_path: Option<String>,
    snapshot_path: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    service: Option<ServiceConfigFile>,
    sampler: Option<SamplerConfigFile>,
    channel: Option<ChannelConfigFile>,
    dedup: Option<DedupConfigFile>,
    cameras: Option<Vec<Camera>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    base_url: Option<String>,
    stream_url: Option<String>,
    timeout_ms: Option<u64>,
    health_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplerConfigFile {
    interval_ms: Option<u64>,
    fallback_images: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize, Default)]
struct ChannelConfigFile {
    reconnect_delay_ms: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    quorum: Option<usize>,
    require_same_camera: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SightlineConfig {
    pub db_path: String,
    pub snapshot_path: Option<PathBuf>,
    pub api_addr: String,
    pub service: ServiceSettings,
    pub sampler: SamplerSettings,
    pub channel: ReconnectPolicy,
    pub dedup: DedupSettings,
    pub cameras: Vec<Camera>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub base_url: String,
    /// `ws://` push stream; the channel is disabled when unset.
    pub stream_url: Option<String>,
    pub timeout: Duration,
    pub health_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub fallback_images: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupSettings {
    pub quorum: usize,
    pub require_same_camera: bool,
}

impl DedupSettings {
    pub fn policy(&self) -> DedupPolicy {
        DedupPolicy {
            quorum: self.quorum,
            require_same_camera: self.require_same_camera,
            ..DedupPolicy::default()
        }
    }
}

impl SightlineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SIGHTLINE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SightlineConfigFile) -> Self {
        let service = file.service.unwrap_or_default();
        let sampler = file.sampler.unwrap_or_default();
        let channel = file.channel.unwrap_or_default();
        let dedup = file.dedup.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            snapshot_path: file.snapshot_path,
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            service: ServiceSettings {
                base_url: service
                    .base_url
                    .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
                stream_url: service.stream_url,
                timeout: Duration::from_millis(service.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
                health_interval: Duration::from_millis(
                    service
                        .health_interval_ms
                        .unwrap_or(DEFAULT_HEALTH_INTERVAL_MS),
                ),
            },
            sampler: SamplerSettings {
                interval: Duration::from_millis(
                    sampler.interval_ms.unwrap_or(DEFAULT_SAMPLE_INTERVAL_MS),
                ),
                fallback_images: sampler.fallback_images.unwrap_or_default(),
            },
            channel: ReconnectPolicy {
                reconnect_delay: Duration::from_millis(
                    channel
                        .reconnect_delay_ms
                        .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
                ),
                max_attempts: channel
                    .max_reconnect_attempts
                    .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            },
            dedup: DedupSettings {
                quorum: dedup.quorum.unwrap_or(DEFAULT_DEDUP_QUORUM),
                require_same_camera: dedup.require_same_camera.unwrap_or(true),
            },
            cameras: file.cameras.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SIGHTLINE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(path) = non_empty_env("SIGHTLINE_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(addr) = non_empty_env("SIGHTLINE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = non_empty_env("SIGHTLINE_SERVICE_URL") {
            self.service.base_url = url;
        }
        if let Some(url) = non_empty_env("SIGHTLINE_STREAM_URL") {
            self.service.stream_url = Some(url);
        }
        if let Some(interval) = non_empty_env("SIGHTLINE_SAMPLE_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("SIGHTLINE_SAMPLE_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.sampler.interval = Duration::from_millis(ms);
        }
        if let Some(images) = non_empty_env("SIGHTLINE_FALLBACK_IMAGES") {
            let parsed = split_csv(&images);
            if !parsed.is_empty() {
                self.sampler.fallback_images = parsed.into_iter().map(PathBuf::from).collect();
            }
        }
        if let Some(timeout) = non_empty_env("SIGHTLINE_DETECTION_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("SIGHTLINE_DETECTION_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.service.timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sampler.interval.is_zero() {
            return Err(anyhow!("sampler interval must be greater than zero"));
        }
        if self.service.timeout.is_zero() {
            return Err(anyhow!("detection timeout must be greater than zero"));
        }
        if self.service.health_interval.is_zero() {
            return Err(anyhow!("health interval must be greater than zero"));
        }
        if self.channel.reconnect_delay.is_zero() {
            return Err(anyhow!("reconnect delay must be greater than zero"));
        }
        let max_quorum = DedupPolicy::default().quorum_attributes.len();
        if self.dedup.quorum == 0 || self.dedup.quorum > max_quorum {
            return Err(anyhow!(
                "dedup quorum must be within 1..={}, got {}",
                max_quorum,
                self.dedup.quorum
            ));
        }
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(anyhow!("camera id must not be empty"));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(anyhow!("duplicate camera id: {}", camera.id));
            }
            if !(-90.0..=90.0).contains(&camera.latitude)
                || !(-180.0..=180.0).contains(&camera.longitude)
            {
                return Err(anyhow!(
                    "camera {} has invalid coordinates ({}, {})",
                    camera.id,
                    camera.latitude,
                    camera.longitude
                ));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SightlineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
