//! Frame sources.
//!
//! A `CaptureBackend` opens devices by index. Open devices live in the
//! `CameraRegistry`, which owns every handle and serializes open, close and
//! reinitialize. Backends:
//! - synthetic test pattern (always built)
//! - USB/V4L2 devices (feature: ingest-v4l2)

use anyhow::Result;
use image::RgbImage;

mod registry;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use registry::{CameraHandle, CameraRegistry};
pub use synthetic::SyntheticBackend;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Backend;

/// Requested capture geometry. Devices may settle on something else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// An open capture device. Dropping it releases the device.
pub trait CaptureDevice: Send {
    /// Read the next frame. Blocks until one is available.
    fn read_frame(&mut self) -> Result<RgbImage>;

    /// Human-readable device description for logs.
    fn describe(&self) -> String;
}

/// Opens capture devices by index.
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, index: u32, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>>;
}
