//! Alert screenshots on local disk.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use image::RgbImage;
use sanitize_filename::sanitize;
use thiserror::Error;

use crate::codec::encode_jpeg;
use crate::config::ScreenshotSettings;

/// Prefix of the path stored in detection records and served over HTTP.
pub const SCREENSHOT_URL_PREFIX: &str = "screenshots";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScreenshotLookupError {
    #[error("invalid screenshot name")]
    InvalidName,
    #[error("screenshot not found")]
    NotFound,
}

pub struct ScreenshotStore {
    enabled: bool,
    dir: PathBuf,
    jpeg_quality: u8,
}

impl ScreenshotStore {
    pub fn new(settings: &ScreenshotSettings, jpeg_quality: u8) -> Self {
        Self {
            enabled: settings.enabled,
            dir: settings.dir.clone(),
            jpeg_quality,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Write the frame as JPEG. Returns the record path, or `None` when disabled.
    pub fn save(&self, frame: &RgbImage, camera_index: u32, at: DateTime<Utc>) -> Result<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create screenshot dir {}", self.dir.display()))?;
        let file_name = screenshot_file_name(camera_index, at);
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
        let path = self.dir.join(&file_name);
        std::fs::write(&path, jpeg)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        log::info!("screenshot saved: {}", path.display());
        Ok(Some(format!("{}/{}", SCREENSHOT_URL_PREFIX, file_name)))
    }

    /// Map a requested file name to a path inside the screenshot dir.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ScreenshotLookupError> {
        if name.is_empty() || sanitize(name) != name || name.starts_with('.') {
            return Err(ScreenshotLookupError::InvalidName);
        }
        let path = self.dir.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ScreenshotLookupError::NotFound)
        }
    }
}

pub fn screenshot_file_name(camera_index: u32, at: DateTime<Utc>) -> String {
    format!(
        "detection_{}_{}_{:03}.jpg",
        camera_index,
        at.format("%Y%m%d_%H%M%S"),
        at.timestamp_subsec_millis()
    )
}
