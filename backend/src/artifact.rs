use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Every artifact lives for exactly this long after its download completes.
pub const ARTIFACT_TTL_SECONDS: i64 = 3 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Audio,
    Video,
}

impl ArtifactFormat {
    /// Accepts both the kind (`audio`/`video`) and the container the frontend sends (`mp3`/`mp4`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp3" | "audio" => Some(Self::Audio),
            "mp4" | "video" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Video => "mp4",
        }
    }
}

/// Tracking record for one stored file. Immutable once written.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub key: String,
    pub display_title: String,
    pub format: ArtifactFormat,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(
        key: impl Into<String>,
        display_title: impl Into<String>,
        format: ArtifactFormat,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            display_title: display_title.into(),
            format,
            created_at,
            expire_at: created_at + Duration::seconds(ARTIFACT_TTL_SECONDS),
        }
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expire_at - now).num_seconds()
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expire_at > now
    }
}

/// A record that was still live at the instant a listing was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveArtifact {
    pub record: ArtifactRecord,
    pub remaining_seconds: i64,
}
