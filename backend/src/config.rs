use std::{path::PathBuf, time::Duration};

use crate::{
    lifecycle::DEFAULT_INDEX_GRACE,
    sweeper::DEFAULT_SWEEP_INTERVAL,
    ytdlp::{DEFAULT_YT_DLP_BIN, DEFAULT_YT_DLP_TIMEOUT_SECONDS},
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
pub const INDEX_SNAPSHOT_FILE: &str = "artifacts.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub data_dir: PathBuf,
    pub static_dir: PathBuf,
    pub sweep_interval: Duration,
    pub index_grace: Duration,
    pub reconcile_orphans: bool,
    pub max_concurrent_downloads: usize,
    pub yt_dlp_bin: String,
    pub yt_dlp_timeout: Duration,
    pub allowed_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string));
        let read_u64 = |name: &str| read(name).and_then(|value| value.parse::<u64>().ok());

        Self {
            bind_addr: resolve_bind_addr(read("APP_ADDR"), read("PORT")),
            downloads_dir: read("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("downloads")),
            data_dir: read("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            static_dir: read("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("static")),
            sweep_interval: read_u64("SWEEP_INTERVAL_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL),
            index_grace: read_u64("INDEX_EVICTION_GRACE_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INDEX_GRACE),
            reconcile_orphans: read("RECONCILE_ORPHANS")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(true),
            max_concurrent_downloads: read("MAX_CONCURRENT_DOWNLOADS")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS),
            yt_dlp_bin: read("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            yt_dlp_timeout: Duration::from_secs(
                read_u64("YT_DLP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ),
            allowed_origins: read("ALLOWED_ORIGINS")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_SNAPSHOT_FILE)
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = app_addr {
        return configured;
    }

    if let Some(port) = port.and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
