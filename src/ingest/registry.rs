//! Camera registry.
//!
//! One entry per open device index. The registry lock guards the map only
//! (open, close, reinitialize). Reads lock the individual handle, so a slow
//! device never blocks other cameras. Closing or reinitializing takes the
//! device out of its handle, so clones held elsewhere never keep it open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;

use super::{CaptureBackend, CaptureDevice, CaptureSettings};
use crate::error::DetectError;

pub type CameraHandle = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

pub struct CameraRegistry {
    backend: Arc<dyn CaptureBackend>,
    settings: CaptureSettings,
    handles: Mutex<HashMap<u32, CameraHandle>>,
}

impl CameraRegistry {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: CaptureSettings) -> Self {
        Self {
            backend,
            settings,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn lock(&self, index: u32) -> Result<MutexGuard<'_, HashMap<u32, CameraHandle>>, DetectError> {
        self.handles
            .lock()
            .map_err(|_| DetectError::camera(index, "camera registry lock poisoned"))
    }

    /// Open the camera at `index`, or return the handle already open there.
    pub fn open(&self, index: u32) -> Result<CameraHandle, DetectError> {
        let mut handles = self.lock(index)?;
        if let Some(handle) = handles.get(&index) {
            return Ok(Arc::clone(handle));
        }
        let handle = self.open_device(index)?;
        handles.insert(index, Arc::clone(&handle));
        Ok(handle)
    }

    fn open_device(&self, index: u32) -> Result<CameraHandle, DetectError> {
        let device = self
            .backend
            .open(index, &self.settings)
            .map_err(|err| DetectError::camera(index, format!("{:#}", err)))?;
        log::info!("camera {} opened: {}", index, device.describe());
        Ok(Arc::new(Mutex::new(Some(device))))
    }

    /// Read one frame, opening the camera first if needed.
    ///
    /// A failed read closes the device, reopens it and reads once more. A
    /// second failure drops the entry and is returned.
    pub fn read(&self, index: u32) -> Result<RgbImage, DetectError> {
        let handle = self.open(index)?;
        match read_handle(index, &handle) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                log::warn!("camera {} read failed, reinitializing: {}", index, err);
                let handle = self.reopen(index, &handle)?;
                read_handle(index, &handle).map_err(|err| {
                    self.forget(index, &handle);
                    err
                })
            }
        }
    }

    fn reopen(&self, index: u32, stale: &CameraHandle) -> Result<CameraHandle, DetectError> {
        let mut handles = self.lock(index)?;
        match handles.get(&index) {
            Some(current) if Arc::ptr_eq(current, stale) => {
                handles.remove(&index);
            }
            // Another caller already replaced the stale handle.
            Some(current) => return Ok(Arc::clone(current)),
            None => {}
        }
        release_handle(index, stale);
        let handle = self.open_device(index)?;
        handles.insert(index, Arc::clone(&handle));
        Ok(handle)
    }

    fn forget(&self, index: u32, handle: &CameraHandle) {
        if let Ok(mut handles) = self.lock(index) {
            if handles
                .get(&index)
                .is_some_and(|current| Arc::ptr_eq(current, handle))
            {
                handles.remove(&index);
            }
        }
        release_handle(index, handle);
    }

    /// Release the camera. Returns false if it was not open.
    pub fn close(&self, index: u32) -> Result<bool, DetectError> {
        let removed = self.lock(index)?.remove(&index);
        match removed {
            Some(handle) => {
                release_handle(index, &handle);
                log::info!("camera {} released", index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_open(&self, index: u32) -> bool {
        self.lock(index)
            .map(|handles| handles.contains_key(&index))
            .unwrap_or(false)
    }

    /// Whether a device exists at `index`. Unopened devices are opened and
    /// released again.
    pub fn probe(&self, index: u32) -> bool {
        if self.is_open(index) {
            return true;
        }
        match self.backend.open(index, &self.settings) {
            Ok(device) => {
                drop(device);
                true
            }
            Err(err) => {
                log::debug!("camera {} probe failed: {:#}", index, err);
                false
            }
        }
    }

    pub fn open_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = match self.handles.lock() {
            Ok(handles) => handles.keys().copied().collect(),
            Err(_) => Vec::new(),
        };
        indices.sort_unstable();
        indices
    }

    pub fn release_all(&self) {
        let drained: Vec<(u32, CameraHandle)> = match self.handles.lock() {
            Ok(mut handles) => handles.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (index, handle) in drained {
            release_handle(index, &handle);
            log::info!("camera {} released", index);
        }
    }
}

fn read_handle(index: u32, handle: &CameraHandle) -> Result<RgbImage, DetectError> {
    let mut slot = handle
        .lock()
        .map_err(|_| DetectError::camera(index, "camera handle lock poisoned"))?;
    let device = slot
        .as_mut()
        .ok_or_else(|| DetectError::TransientIo(format!("camera {}: device released", index)))?;
    device
        .read_frame()
        .map_err(|err| DetectError::TransientIo(format!("camera {}: {:#}", index, err)))
}

/// Drop the device behind `handle`. Waits for an in-flight read to finish.
fn release_handle(index: u32, handle: &CameraHandle) {
    let device = match handle.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if device.is_some() {
        log::debug!("camera {} device dropped", index);
    }
}
