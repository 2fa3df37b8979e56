//! Shared application state.
//!
//! One `AppContext` is built at startup and shared by every HTTP handler and
//! stream worker. The camera registry and the history each sit behind their
//! own lock. The model is read-only after load.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use image::RgbImage;

use crate::config::{CameraBackendKind, CameraSettings, HistoryBackendKind, HistorySettings, ServerConfig};
use crate::detect::{Classification, InferenceAdapter};
use crate::events::{AlertEvent, ConnectionStatus, EventHub, PushEvent, StatusSnapshot};
use crate::ingest::{CameraRegistry, CaptureBackend, SyntheticBackend};
use crate::pipeline::{AlertCandidate, AlertGates, Overlay};
use crate::screenshots::ScreenshotStore;
use crate::storage::{DetectionHistory, DetectionRecord, NewDetection, SqliteHistoryStore};
use crate::timestamp_now;

pub const CONNECT_MESSAGE: &str = "Connected to weapon detection system";

pub struct AppContext {
    pub config: ServerConfig,
    pub model: InferenceAdapter,
    pub cameras: CameraRegistry,
    pub history: DetectionHistory,
    pub events: EventHub,
    pub overlay: Overlay,
    pub screenshots: ScreenshotStore,
    /// Alert cooldown per camera index, across streams.
    pub alert_gates: AlertGates,
}

impl AppContext {
    /// Load the model, pick the camera backend and open the history store.
    ///
    /// A model that fails to load leaves the context degraded, not failed.
    pub fn build(config: ServerConfig) -> Result<Self> {
        let model = InferenceAdapter::load(&config.model);
        if model.is_loaded() {
            let result = run_self_test(&model, &config);
            log::info!(
                "model self-test produced {} class probabilities",
                result.all_predictions.len()
            );
        }

        let backend = camera_backend(&config.camera)?;
        let history = open_history(&config.history)?;
        let overlay = match &config.overlay.font_path {
            Some(path) => match Overlay::load(path) {
                Ok(overlay) => overlay,
                Err(err) => {
                    log::warn!("overlay captions disabled: {:#}", err);
                    Overlay::without_font()
                }
            },
            None => {
                log::info!("no overlay font configured, captions disabled");
                Overlay::without_font()
            }
        };

        let mut ctx = Self::from_parts(config, model, backend, history);
        ctx.overlay = overlay;
        log::info!(
            "camera backend {}, screenshots {}",
            ctx.cameras.backend_name(),
            if ctx.screenshots.is_enabled() { "enabled" } else { "disabled" }
        );
        Ok(ctx)
    }

    pub fn from_parts(
        config: ServerConfig,
        model: InferenceAdapter,
        backend: Arc<dyn CaptureBackend>,
        history: DetectionHistory,
    ) -> Self {
        let cameras = CameraRegistry::new(backend, config.camera.capture);
        let screenshots = ScreenshotStore::new(&config.screenshots, config.detection.jpeg_quality);
        let alert_gates = AlertGates::new(config.history.cooldown);
        Self {
            config,
            model,
            cameras,
            history,
            events: EventHub::default(),
            overlay: Overlay::without_font(),
            screenshots,
            alert_gates,
        }
    }

    /// Open the configured startup camera. Failure is only a warning.
    pub fn open_startup_camera(&self) {
        let index = self.config.camera.startup_index;
        if let Err(err) = self.cameras.open(index) {
            log::warn!("startup camera {} not available: {}", index, err);
        }
    }

    /// Save the screenshot, push the alert, then append the history record.
    pub fn record_alert(&self, alert: &AlertCandidate, frame: &RgbImage) -> Option<DetectionRecord> {
        let screenshot = match self.screenshots.save(frame, alert.camera_index, Utc::now()) {
            Ok(path) => path.unwrap_or_default(),
            Err(err) => {
                log::error!("failed to save alert screenshot: {:#}", err);
                String::new()
            }
        };

        self.events.publish(PushEvent::Detection(AlertEvent {
            message: alert.message(),
            timestamp: alert.timestamp.clone(),
            weapon_type: alert.weapon_type.clone(),
            confidence: alert.confidence,
            camera_index: alert.camera_index,
            screenshot: screenshot.clone(),
        }));

        let detection = NewDetection {
            timestamp: alert.timestamp.clone(),
            weapon_type: alert.weapon_type.clone(),
            location: alert.location(),
            screenshot,
            confidence: alert.confidence,
        };
        match self.history.append(detection) {
            Ok(record) => {
                log::info!(
                    "weapon alert recorded: {} ({:.2}) at {}",
                    record.weapon_type,
                    record.confidence,
                    record.location
                );
                Some(record)
            }
            Err(err) => {
                log::error!("failed to record detection: {:#}", err);
                None
            }
        }
    }

    /// `connected` when camera 0 is open.
    pub fn camera_status(&self) -> &'static str {
        if self.cameras.is_open(0) {
            "connected"
        } else {
            "disconnected"
        }
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let detections_count = self.history.total().unwrap_or_else(|err| {
            log::error!("failed to count detections: {:#}", err);
            0
        });
        StatusSnapshot {
            model_loaded: self.model.is_loaded(),
            camera_status: self.camera_status().to_string(),
            detections_count,
            connected_clients: self.events.connected_clients(),
            timestamp: timestamp_now(),
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: true,
            message: CONNECT_MESSAGE.to_string(),
            connected_clients: self.events.connected_clients(),
        }
    }
}

/// Classify a black frame at the model's input size.
pub fn run_self_test(model: &InferenceAdapter, config: &ServerConfig) -> Classification {
    let side = config.model.input_size.max(1);
    model.classify(&RgbImage::new(side, side), 0.0)
}

fn camera_backend(settings: &CameraSettings) -> Result<Arc<dyn CaptureBackend>> {
    match settings.backend {
        CameraBackendKind::Synthetic => Ok(Arc::new(SyntheticBackend::new(
            settings.synthetic_indices.clone(),
        ))),
        CameraBackendKind::V4l2 => v4l2_backend(),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn v4l2_backend() -> Result<Arc<dyn CaptureBackend>> {
    Ok(Arc::new(crate::ingest::V4l2Backend))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn v4l2_backend() -> Result<Arc<dyn CaptureBackend>> {
    Err(anyhow::anyhow!("camera backend v4l2 requires the ingest-v4l2 feature"))
}

fn open_history(settings: &HistorySettings) -> Result<DetectionHistory> {
    match settings.backend {
        HistoryBackendKind::Memory => Ok(DetectionHistory::in_memory(settings.capacity)),
        HistoryBackendKind::Sqlite => {
            let store = SqliteHistoryStore::open(&settings.db_path)?;
            log::info!("detection history stored in {}", settings.db_path);
            Ok(DetectionHistory::new(Box::new(store)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelBackendKind;
    use crate::events::PushEvent;
    use crate::pipeline::{PipelineSettings, StreamSession};
    use anyhow::anyhow;
    use std::time::{Duration, Instant};

    fn stub_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.model.backend = ModelBackendKind::Stub;
        config.model.stub_output = vec![0.1, 0.05, 0.85];
        config.model.input_size = 8;
        config.camera.backend = CameraBackendKind::Synthetic;
        config
    }

    fn alert() -> AlertCandidate {
        AlertCandidate {
            camera_index: 1,
            weapon_type: "Knife".to_string(),
            confidence: 0.77,
            timestamp: timestamp_now(),
        }
    }

    #[test]
    fn build_with_stub_model_is_loaded() -> Result<()> {
        let ctx = AppContext::build(stub_config())?;
        assert!(ctx.model.is_loaded());
        let result = run_self_test(&ctx.model, &ctx.config);
        assert_eq!(result.all_predictions.len(), 3);
        Ok(())
    }

    #[test]
    fn missing_model_file_degrades() -> Result<()> {
        let mut config = stub_config();
        config.model.backend = ModelBackendKind::Tract;
        config.model.path = "/nonexistent/model.onnx".into();
        let ctx = AppContext::build(config)?;
        assert!(!ctx.model.is_loaded());
        assert!(!ctx.status_snapshot().model_loaded);
        Ok(())
    }

    #[test]
    fn record_alert_pushes_then_appends() -> Result<()> {
        let ctx = AppContext::build(stub_config())?;
        let mut sub = ctx.events.subscribe();

        let record = ctx
            .record_alert(&alert(), &RgbImage::new(8, 8))
            .ok_or_else(|| anyhow!("alert not recorded"))?;
        assert_eq!(record.location, "Camera 1");
        assert_eq!(record.screenshot, "");

        match sub.receiver.try_recv()? {
            PushEvent::Detection(ev) => {
                assert_eq!(ev.message, "Weapon detected: Knife");
                assert_eq!(ev.camera_index, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(ctx.history.total()?, 1);
        Ok(())
    }

    #[test]
    fn record_alert_stores_screenshot_path_when_enabled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = stub_config();
        config.screenshots.enabled = true;
        config.screenshots.dir = dir.path().to_path_buf();
        let ctx = AppContext::build(config)?;

        let record = ctx
            .record_alert(&alert(), &RgbImage::new(8, 8))
            .ok_or_else(|| anyhow!("alert not recorded"))?;
        assert!(record.screenshot.starts_with("screenshots/detection_1_"));
        Ok(())
    }

    #[test]
    fn cooldown_limits_persisted_alerts_per_window() -> Result<()> {
        let mut config = stub_config();
        config.detection.detection_interval = 1;
        config.history.cooldown = Duration::from_secs(60);
        let model = InferenceAdapter::load(&config.model);
        let history = DetectionHistory::new(Box::new(SqliteHistoryStore::open_in_memory()?));
        let ctx = AppContext::from_parts(
            config,
            model,
            Arc::new(SyntheticBackend::default()),
            history,
        );
        let settings = PipelineSettings::from_config(&ctx.config);
        let start = Instant::now();

        let run = |offset: u64| {
            // Fresh session each time, as after a stream reconnect.
            let mut session = StreamSession::new(0, settings.clone());
            let at = start + Duration::from_secs(offset);
            let out = session.step(
                Some(RgbImage::new(8, 8)),
                &ctx.model,
                &ctx.overlay,
                &ctx.alert_gates,
                at,
            );
            if let Some(alert) = out.alert {
                ctx.record_alert(&alert, &out.frame);
            }
        };
        run(0);
        run(30);
        assert_eq!(ctx.history.total()?, 1);
        run(61);
        assert_eq!(ctx.history.total()?, 2);
        Ok(())
    }

    #[test]
    fn status_reports_camera_zero() -> Result<()> {
        let ctx = AppContext::build(stub_config())?;
        assert_eq!(ctx.camera_status(), "disconnected");
        ctx.open_startup_camera();
        let snapshot = ctx.status_snapshot();
        assert_eq!(snapshot.camera_status, "connected");
        assert_eq!(snapshot.detections_count, 0);
        Ok(())
    }
}
