use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::RgbImage;

use super::overlay::Overlay;
use crate::config::ServerConfig;
use crate::detect::InferenceAdapter;
use crate::events::{DetectionResultEvent, PushEvent};
use crate::ingest::CaptureSettings;
use crate::timestamp_now;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub display_threshold: f32,
    pub alert_threshold: f32,
    pub detection_interval: u64,
    /// Placeholder frame size.
    pub capture: CaptureSettings,
}

impl PipelineSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            display_threshold: config.detection.display_threshold,
            alert_threshold: config.detection.alert_threshold,
            detection_interval: config.detection.detection_interval,
            capture: config.camera.capture,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Streaming,
}

/// Rate limit for alerts on one camera. A zero cooldown lets everything through.
#[derive(Clone, Debug)]
pub struct AlertGate {
    cooldown: Duration,
    last_alert: Option<Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: None,
        }
    }

    /// Returns true and arms the gate if an alert may fire at `now`.
    pub fn try_pass(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_alert {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_alert = Some(now);
        true
    }
}

/// One `AlertGate` per camera index, shared by every stream of that camera.
pub struct AlertGates {
    cooldown: Duration,
    gates: Mutex<HashMap<u32, AlertGate>>,
}

impl AlertGates {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_pass(&self, camera_index: u32, now: Instant) -> bool {
        let mut gates = match self.gates.lock() {
            Ok(gates) => gates,
            Err(poisoned) => poisoned.into_inner(),
        };
        gates
            .entry(camera_index)
            .or_insert_with(|| AlertGate::new(self.cooldown))
            .try_pass(now)
    }
}

/// A weapon detection that cleared the alert threshold and the gate.
#[derive(Clone, Debug, PartialEq)]
pub struct AlertCandidate {
    pub camera_index: u32,
    pub weapon_type: String,
    pub confidence: f32,
    pub timestamp: String,
}

impl AlertCandidate {
    pub fn location(&self) -> String {
        format!("Camera {}", self.camera_index)
    }

    pub fn message(&self) -> String {
        format!("Weapon detected: {}", self.weapon_type)
    }
}

pub struct StepOutput {
    /// Annotated frame, or the placeholder when the source produced nothing.
    pub frame: RgbImage,
    pub events: Vec<PushEvent>,
    pub alert: Option<AlertCandidate>,
    pub inferred: bool,
}

/// Per-stream detection loop state. `step` does no I/O.
pub struct StreamSession {
    camera_index: u32,
    settings: PipelineSettings,
    state: StreamState,
    frame_count: u64,
}

impl StreamSession {
    pub fn new(camera_index: u32, settings: PipelineSettings) -> Self {
        Self {
            camera_index,
            settings,
            state: StreamState::Stopped,
            frame_count: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn stop(&mut self) {
        self.state = StreamState::Stopped;
    }

    pub fn step(
        &mut self,
        frame: Option<RgbImage>,
        model: &InferenceAdapter,
        overlay: &Overlay,
        gates: &AlertGates,
        now: Instant,
    ) -> StepOutput {
        self.state = StreamState::Streaming;
        let frame_index = self.frame_count;
        self.frame_count += 1;

        let Some(mut frame) = frame else {
            let capture = self.settings.capture;
            return StepOutput {
                frame: overlay.placeholder(capture.width, capture.height, self.camera_index),
                events: Vec::new(),
                alert: None,
                inferred: false,
            };
        };

        let mut events = Vec::new();
        let mut alert = None;
        let due = frame_index % self.settings.detection_interval.max(1) == 0;
        let inferred = due && model.is_loaded();
        if inferred {
            let result = model.classify(&frame, self.settings.display_threshold);
            for detection in &result.detections {
                let is_weapon = !model.is_background(&detection.class_name);
                overlay.draw_detection(&mut frame, detection, is_weapon);

                let timestamp = timestamp_now();
                events.push(PushEvent::DetectionResult(DetectionResultEvent {
                    bbox: detection.bbox,
                    confidence: detection.confidence,
                    class_name: detection.class_name.clone(),
                    class_id: detection.class_id,
                    is_weapon,
                    timestamp: timestamp.clone(),
                    camera_index: self.camera_index,
                }));

                if is_weapon
                    && detection.confidence > self.settings.alert_threshold
                    && alert.is_none()
                    && gates.try_pass(self.camera_index, now)
                {
                    alert = Some(AlertCandidate {
                        camera_index: self.camera_index,
                        weapon_type: detection.class_name.clone(),
                        confidence: detection.confidence,
                        timestamp,
                    });
                }
            }
        }

        StepOutput {
            frame,
            events,
            alert,
            inferred,
        }
    }
}
