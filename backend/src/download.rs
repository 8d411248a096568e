use tracing::{info, warn};
use url::Url;

use crate::{
    artifact::{ArtifactFormat, ArtifactRecord},
    error::{Result, ServiceError},
    index::ArtifactIndex,
    lifecycle::{Clock, LifecycleManager},
    sanitize::artifact_key,
    store::ArtifactStore,
    ytdlp::MediaExtractor,
};

/// Sources longer than this are refused before anything is downloaded.
pub const MAX_SOURCE_DURATION_SECONDS: u64 = 30 * 60;

const SUPPORTED_DOMAINS: [&str; 2] = ["youtube.com", "youtu.be"];

#[derive(Debug, Clone)]
pub struct CompletedDownload {
    pub key: String,
    pub title: String,
    pub format: ArtifactFormat,
    /// `None` when the file landed but the index write failed.
    pub record: Option<ArtifactRecord>,
}

pub fn is_supported_download_url(input: &str) -> bool {
    let Ok(parsed) = Url::parse(input) else {
        return false;
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
        return false;
    };

    SUPPORTED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}

pub fn validate_source_url(input: &str) -> Result<&str> {
    let url = input.trim();
    if url.is_empty() {
        return Err(ServiceError::invalid_input("Enter a YouTube URL."));
    }
    if !is_supported_download_url(url) {
        return Err(ServiceError::invalid_input("Enter a valid YouTube URL."));
    }
    Ok(url)
}

pub fn check_duration(duration_seconds: Option<u64>) -> Result<()> {
    match duration_seconds {
        Some(duration_seconds) if duration_seconds > MAX_SOURCE_DURATION_SECONDS => {
            Err(ServiceError::SourceRejected {
                duration_seconds,
                limit_seconds: MAX_SOURCE_DURATION_SECONDS,
            })
        }
        _ => Ok(()),
    }
}

/// Probes, downloads into the store and records the artifact.
///
/// Tracking is best-effort: once the bytes are on disk the download counts as done
/// even if the index write fails.
pub async fn fetch_artifact<E, I, S, C>(
    extractor: &E,
    lifecycle: &LifecycleManager<I, S, C>,
    url: &str,
    format: ArtifactFormat,
) -> Result<CompletedDownload>
where
    E: MediaExtractor,
    I: ArtifactIndex,
    S: ArtifactStore,
    C: Clock,
{
    let url = validate_source_url(url)?;

    let info = extractor.probe(url).await?;
    check_duration(info.duration_seconds).inspect_err(|_| {
        info!(
            "Rejected {:?}: {:?}s exceeds the {}s limit",
            url, info.duration_seconds, MAX_SOURCE_DURATION_SECONDS
        );
    })?;

    let key = artifact_key(&info.title, format);
    let destination = lifecycle.store().resolve_path(&key)?;
    extractor.download(url, format, &destination).await?;

    if !lifecycle.store().exists(&key).await? {
        return Err(ServiceError::ExtractionFailed(format!(
            "no file was stored for {key:?}"
        )));
    }

    let record = match lifecycle.record_download(&key, &info.title, format).await {
        Ok(record) => Some(record),
        Err(error) => {
            warn!("Download of {:?} succeeded without tracking: {error}", key);
            None
        }
    };

    Ok(CompletedDownload {
        key,
        title: info.title,
        format,
        record,
    })
}
