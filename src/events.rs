//! Push-event channel.
//!
//! Stream workers publish into one broadcast channel; every connected SSE
//! client holds its own receiver. Publishing never blocks and never fails
//! when nobody is listening.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::broadcast;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;
pub const KEEP_ALIVE_FRAME: &str = ": keep-alive\n\n";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    pub connected_clients: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub model_loaded: bool,
    /// `connected` when camera 0 is open, `disconnected` otherwise.
    pub camera_status: String,
    pub detections_count: usize,
    pub connected_clients: usize,
    pub timestamp: String,
}

/// Every detection above the display threshold, weapon or not.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResultEvent {
    pub bbox: [u32; 4],
    pub confidence: f32,
    pub class_name: String,
    pub class_id: usize,
    pub is_weapon: bool,
    pub timestamp: String,
    pub camera_index: u32,
}

/// Weapon alert that cleared the alert gate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEvent {
    pub message: String,
    pub timestamp: String,
    pub weapon_type: String,
    pub confidence: f32,
    pub camera_index: u32,
    pub screenshot: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    Status(ConnectionStatus),
    StatusUpdate(StatusSnapshot),
    DetectionResult(DetectionResultEvent),
    Detection(AlertEvent),
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::Status(_) => "status",
            PushEvent::StatusUpdate(_) => "status_update",
            PushEvent::DetectionResult(_) => "detection_result",
            PushEvent::Detection(_) => "detection",
        }
    }

    pub fn payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            PushEvent::Status(status) => serde_json::to_value(status)?,
            PushEvent::StatusUpdate(snapshot) => serde_json::to_value(snapshot)?,
            PushEvent::DetectionResult(result) => serde_json::to_value(result)?,
            PushEvent::Detection(alert) => serde_json::to_value(alert)?,
        };
        Ok(value)
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn to_sse_frame(&self) -> Result<String> {
        let data = serde_json::to_string(&self.payload()?)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<PushEvent>,
    clients: Arc<AtomicUsize>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns how many clients received the event.
    pub fn publish(&self, event: PushEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                log::debug!("no subscribers for {} event", name);
                0
            }
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    /// Register a new client. The count drops when the subscription is dropped.
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.sender.subscribe();
        let count = self.clients.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("client connected ({} connected)", count);
        Subscription {
            receiver,
            _guard: ClientGuard {
                clients: Arc::clone(&self.clients),
            },
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

pub struct Subscription {
    pub receiver: broadcast::Receiver<PushEvent>,
    _guard: ClientGuard,
}

struct ClientGuard {
    clients: Arc<AtomicUsize>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let previous = self.clients.fetch_sub(1, Ordering::SeqCst);
        log::info!("client disconnected ({} connected)", previous.saturating_sub(1));
    }
}
