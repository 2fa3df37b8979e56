//! Weapon Watch
//!
//! Webcam weapon-detection service. Frames are pulled from local cameras,
//! classified by a pretrained whole-image model, annotated, and streamed to a
//! browser dashboard as MJPEG. Weapon alerts are pushed over Server-Sent Events
//! and recorded in a detection history.
//!
//! # Module Structure
//!
//! - `ingest`: Camera backends and the camera registry
//! - `codec`: Base64/JPEG/multipart conversions
//! - `detect`: Model loading, preprocessing and classification
//! - `pipeline`: Per-stream detection loop, overlay and stream workers
//! - `events`: Push-event hub
//! - `storage`: Detection history (in-memory or SQLite)
//! - `screenshots`: Alert screenshots on disk
//! - `context`: Shared application state
//! - `api`: HTTP surface (actix-web)
//! - `config`: File and environment configuration

use chrono::{SecondsFormat, Utc};

pub mod api;
pub mod codec;
pub mod config;
pub mod context;
pub mod detect;
pub mod error;
pub mod events;
pub mod ingest;
pub mod pipeline;
pub mod screenshots;
pub mod storage;

pub use config::ServerConfig;
pub use context::AppContext;
pub use detect::{ClassProbability, Classification, Detection, InferenceAdapter};
pub use error::DetectError;
pub use events::{EventHub, PushEvent};
pub use ingest::{CameraRegistry, CaptureBackend, CaptureDevice, CaptureSettings};
pub use storage::{
    DetectionHistory, DetectionRecord, HistoryStore, InMemoryHistoryStore, NewDetection,
    SqliteHistoryStore,
};

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_rfc3339_utc() -> anyhow::Result<()> {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        chrono::DateTime::parse_from_rfc3339(&ts)?;
        Ok(())
    }
}
