use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::{
    artifact::ArtifactFormat,
    error::{Result, ServiceError},
};

pub const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
pub const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 600;

/// What the extractor reports about a source before downloading it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: Option<u64>,
}

/// Downloads media into a caller-chosen path.
pub trait MediaExtractor: Send + Sync {
    fn probe(&self, url: &str) -> impl Future<Output = Result<MediaInfo>> + Send;

    /// Must leave the finished file exactly at `destination`.
    fn download(
        &self,
        url: &str,
        format: ArtifactFormat,
        destination: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    timeout: Duration,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(
            DEFAULT_YT_DLP_BIN,
            Duration::from_secs(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
        )
    }
}

impl YtDlp {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output> {
        debug!("Running {} {:?}", self.binary, args);
        let command_future = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(self.timeout, command_future)
            .await
            .map_err(|_| {
                ServiceError::ExtractionFailed(format!(
                    "timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ServiceError::ExtractionFailed(format!(
                        "{} is not installed. Install it and restart the service.",
                        self.binary
                    ))
                } else {
                    ServiceError::ExtractionFailed(format!(
                        "could not run {}: {error}",
                        self.binary
                    ))
                }
            })?;

        if !output.status.success() {
            return Err(ServiceError::ExtractionFailed(run_error_message(
                &output.stderr,
            )));
        }

        Ok(output)
    }
}

impl MediaExtractor for YtDlp {
    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        let output = self
            .run(vec![
                "-J".to_string(),
                "--no-playlist".to_string(),
                "--no-warnings".to_string(),
                url.to_string(),
            ])
            .await?;

        parse_media_info(&output.stdout)
    }

    async fn download(&self, url: &str, format: ArtifactFormat, destination: &Path) -> Result<()> {
        let (dir, stem) = match (destination.parent(), destination.file_stem()) {
            (Some(dir), Some(stem)) => (dir, stem.to_string_lossy()),
            _ => {
                return Err(ServiceError::invalid_input(format!(
                    "Invalid destination {}",
                    destination.display()
                )));
            }
        };
        let output_template = format!("{}/{stem}.%(ext)s", dir.to_string_lossy());

        let args = download_args(url, format, output_template);
        let output = self.run(args).await?;
        let printed_path = extract_printed_path(&output.stdout);
        settle_download(destination, printed_path.as_deref()).await
    }
}

/// The finished file keeps its write time as mtime, since orphan reconciliation ages files by it.
fn download_args(url: &str, format: ArtifactFormat, output_template: String) -> Vec<String> {
    let mut args = vec![
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--no-mtime".to_string(),
        "--newline".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        output_template,
    ];

    match format {
        ArtifactFormat::Audio => {
            args.extend(
                [
                    "-f",
                    "bestaudio/best",
                    "-x",
                    "--audio-format",
                    "mp3",
                    "--audio-quality",
                    "192K",
                ]
                .map(ToString::to_string),
            );
        }
        ArtifactFormat::Video => {
            args.extend(
                ["-f", "best[ext=mp4]/best", "--remux-video", "mp4"].map(ToString::to_string),
            );
        }
    }
    args.push(url.to_string());
    args
}

/// Moves the file yt-dlp reported into `destination` when they differ.
async fn settle_download(destination: &Path, printed_path: Option<&str>) -> Result<()> {
    if let Some(printed) = printed_path.map(PathBuf::from)
        && printed != destination
        && tokio::fs::metadata(&printed)
            .await
            .is_ok_and(|metadata| metadata.is_file())
    {
        warn!(
            "yt-dlp wrote {:?} instead of {:?}, moving it into place",
            printed, destination
        );
        tokio::fs::rename(&printed, destination)
            .await
            .map_err(|error| {
                ServiceError::storage(format!("moving {}", printed.display()), error)
            })?;
    }

    match tokio::fs::metadata(destination).await {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(ServiceError::ExtractionFailed(format!(
            "{} is not a regular file",
            destination.display()
        ))),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(ServiceError::ExtractionFailed(
            format!("yt-dlp did not produce {}", destination.display()),
        )),
        Err(error) => Err(ServiceError::storage(
            format!("checking {}", destination.display()),
            error,
        )),
    }
}

fn parse_media_info(stdout: &[u8]) -> Result<MediaInfo> {
    let info: YtDlpVideoInfo = serde_json::from_slice(stdout).map_err(|error| {
        ServiceError::ExtractionFailed(format!("unreadable metadata from yt-dlp: {error}"))
    })?;

    Ok(MediaInfo {
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        duration_seconds: info
            .duration
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.ceil() as u64),
    })
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();

    if message.to_ascii_lowercase().contains("unsupported url") {
        "Unsupported or invalid URL.".to_string()
    } else {
        message
    }
}

fn extract_printed_path(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}
