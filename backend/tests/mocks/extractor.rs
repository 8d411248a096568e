use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use clipshelf::{
    ArtifactFormat, ServiceError,
    ytdlp::{MediaExtractor, MediaInfo},
};

#[derive(Clone)]
pub struct FakeExtractor {
    pub title: String,
    pub duration_seconds: Option<u64>,
    pub fail_with: Option<String>,
    pub skip_write: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeExtractor {
    pub fn new(title: &str, duration_seconds: Option<u64>) -> Self {
        Self {
            title: title.to_string(),
            duration_seconds,
            fail_with: None,
            skip_write: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new("unused", None)
        }
    }

    pub fn silent(title: &str) -> Self {
        Self {
            skip_write: true,
            ..Self::new(title, Some(60))
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MediaExtractor for FakeExtractor {
    async fn probe(&self, url: &str) -> Result<MediaInfo, ServiceError> {
        self.calls.lock().unwrap().push(format!("probe {url}"));
        if let Some(ref message) = self.fail_with {
            return Err(ServiceError::ExtractionFailed(message.clone()));
        }
        Ok(MediaInfo {
            title: self.title.clone(),
            duration_seconds: self.duration_seconds,
        })
    }

    async fn download(
        &self,
        url: &str,
        format: ArtifactFormat,
        destination: &Path,
    ) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("download {url} {}", format.extension()));
        if !self.skip_write {
            tokio::fs::write(destination, b"fake media")
                .await
                .map_err(|error| ServiceError::storage("writing fake media", error))?;
        }
        Ok(())
    }
}
