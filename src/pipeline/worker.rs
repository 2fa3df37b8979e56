use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::session::{PipelineSettings, StreamSession};
use crate::codec::{encode_jpeg, multipart_chunk};
use crate::context::AppContext;

/// Encoded frames buffered between the worker and the HTTP response.
pub const STREAM_CHANNEL_CAPACITY: usize = 2;

/// Start a stream worker thread for `camera_index`.
///
/// The worker exits when the returned receiver is dropped.
pub fn spawn_stream(ctx: Arc<AppContext>, camera_index: u32) -> Result<mpsc::Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    thread::Builder::new()
        .name(format!("stream-{}", camera_index))
        .spawn(move || run_stream(ctx, camera_index, tx))
        .context("failed to spawn stream worker")?;
    Ok(rx)
}

fn run_stream(ctx: Arc<AppContext>, camera_index: u32, tx: mpsc::Sender<Vec<u8>>) {
    let settings = PipelineSettings::from_config(&ctx.config);
    let frame_interval = ctx.config.detection.frame_interval;
    let jpeg_quality = ctx.config.detection.jpeg_quality;
    let mut session = StreamSession::new(camera_index, settings);
    let mut source_ok = true;
    log::info!("stream started for camera {}", camera_index);

    while !tx.is_closed() {
        let frame = match ctx.cameras.read(camera_index) {
            Ok(frame) => {
                if !source_ok {
                    log::info!("camera {} producing frames again", camera_index);
                    source_ok = true;
                }
                Some(frame)
            }
            Err(err) => {
                if source_ok {
                    log::warn!("camera {} unavailable: {}", camera_index, err);
                    source_ok = false;
                }
                None
            }
        };

        let output = session.step(
            frame,
            &ctx.model,
            &ctx.overlay,
            &ctx.alert_gates,
            Instant::now(),
        );
        for event in output.events {
            ctx.events.publish(event);
        }
        if let Some(alert) = output.alert {
            ctx.record_alert(&alert, &output.frame);
        }

        match encode_jpeg(&output.frame, jpeg_quality) {
            Ok(jpeg) => {
                if tx.blocking_send(multipart_chunk(&jpeg)).is_err() {
                    break;
                }
            }
            Err(err) => log::error!("camera {}: {:#}", camera_index, err),
        }
        thread::sleep(frame_interval);
    }

    session.stop();
    log::info!(
        "stream stopped for camera {} after {} frames",
        camera_index,
        session.frame_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::detect::{InferenceAdapter, StubBackend};
    use crate::ingest::SyntheticBackend;
    use crate::storage::{DetectionHistory, SqliteHistoryStore};
    use std::time::Duration;

    fn context() -> Arc<AppContext> {
        context_with(ServerConfig::default(), DetectionHistory::in_memory(50))
    }

    fn context_with(mut config: ServerConfig, history: DetectionHistory) -> Arc<AppContext> {
        config.detection.frame_interval = Duration::from_millis(1);
        config.detection.detection_interval = 1;
        config.camera.capture.width = 32;
        config.camera.capture.height = 24;
        let model = InferenceAdapter::with_backend(
            StubBackend::new(vec![0.1, 0.05, 0.85], crate::detect::InputSpec {
                size: 4,
                layout: Default::default(),
                channel_order: Default::default(),
            }),
            config.model.classes.clone(),
            "No Weapon",
        );
        Arc::new(AppContext::from_parts(
            config,
            model,
            Arc::new(SyntheticBackend::default()),
            history,
        ))
    }

    fn read_chunks(ctx: &Arc<AppContext>, count: usize) -> Result<()> {
        let mut rx = spawn_stream(Arc::clone(ctx), 0)?;
        for _ in 0..count {
            rx.blocking_recv().context("stream ended early")?;
        }
        Ok(())
    }

    #[test]
    fn worker_streams_chunks_and_records_alerts() -> Result<()> {
        let ctx = context();
        let mut rx = spawn_stream(Arc::clone(&ctx), 0)?;
        for _ in 0..3 {
            let chunk = rx.blocking_recv().context("stream ended early")?;
            assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        }
        drop(rx);
        assert!(ctx.history.total()? >= 1);
        assert!(ctx.cameras.is_open(0));
        Ok(())
    }

    #[test]
    fn cooldown_survives_stream_reconnect() -> Result<()> {
        let mut config = ServerConfig::default();
        config.history.cooldown = Duration::from_secs(60);
        let history = DetectionHistory::new(Box::new(SqliteHistoryStore::open_in_memory()?));
        let ctx = context_with(config, history);

        read_chunks(&ctx, 3)?;
        read_chunks(&ctx, 3)?;
        assert_eq!(ctx.history.total()?, 1);
        Ok(())
    }

    #[test]
    fn missing_camera_streams_placeholder_frames() -> Result<()> {
        let ctx = context();
        let mut rx = spawn_stream(Arc::clone(&ctx), 9)?;
        let chunk = rx.blocking_recv().context("stream ended early")?;
        assert!(chunk.len() > 39);
        drop(rx);
        assert_eq!(ctx.history.total()?, 0);
        Ok(())
    }
}
