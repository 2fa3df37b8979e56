//! Synthetic camera backend.
//!
//! Generates a moving test pattern at the requested size. Only the configured
//! indices exist; opening any other index fails like a missing device would.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{CaptureBackend, CaptureDevice, CaptureSettings};

pub const DEFAULT_SYNTHETIC_INDICES: [u32; 4] = [0, 1, 2, 3];

#[derive(Clone, Debug)]
pub struct SyntheticBackend {
    indices: Vec<u32>,
}

impl SyntheticBackend {
    pub fn new(indices: Vec<u32>) -> Self {
        Self { indices }
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(DEFAULT_SYNTHETIC_INDICES.to_vec())
    }
}

impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, index: u32, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>> {
        if !self.indices.contains(&index) {
            return Err(anyhow!("no synthetic camera at index {}", index));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!(
                "invalid synthetic capture size {}x{}",
                settings.width,
                settings.height
            ));
        }
        Ok(Box::new(SyntheticCamera::new(index, settings)))
    }
}

pub struct SyntheticCamera {
    index: u32,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Shifts the pattern every 50 frames to simulate scene changes.
    scene_state: u8,
}

impl SyntheticCamera {
    fn new(index: u32, settings: &CaptureSettings) -> Self {
        Self {
            index,
            width: settings.width,
            height: settings.height,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate(&mut self) -> RgbImage {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count + u64::from(self.scene_state) + u64::from(self.index) * 64;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let r = ((u64::from(x) + shift) % 256) as u8;
            let g = ((u64::from(y) + shift / 2) % 256) as u8;
            let b = ((u64::from(x ^ y) + u64::from(self.scene_state) * 16) % 256) as u8;
            Rgb([r, g, b])
        })
    }
}

impl CaptureDevice for SyntheticCamera {
    fn read_frame(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        Ok(self.generate())
    }

    fn describe(&self) -> String {
        format!("synthetic://{} ({}x{})", self.index, self.width, self.height)
    }
}
