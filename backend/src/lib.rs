//! Downloads media through yt-dlp, keeps the files for three days and sweeps them
//! away once they expire.

pub mod api;
pub mod artifact;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod sanitize;
pub mod store;
pub mod sweeper;
pub mod ytdlp;

pub use artifact::{ARTIFACT_TTL_SECONDS, ArtifactFormat, ArtifactRecord, LiveArtifact};
pub use error::{ApiError, Result, ServiceError};
pub use index::{ArtifactIndex, JsonIndex};
pub use lifecycle::{Clock, LifecycleManager, ManualClock, SystemClock};
pub use store::{ArtifactStore, DiskStore};
pub use sweeper::Sweeper;
