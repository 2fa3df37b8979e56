//! Detection pipeline: per-stream state machine, frame annotation and the
//! worker thread that feeds an MJPEG response.

mod overlay;
mod session;
mod worker;

pub use overlay::Overlay;
pub use session::{
    AlertCandidate, AlertGate, AlertGates, PipelineSettings, StepOutput, StreamSession, StreamState,
};
pub use worker::{spawn_stream, STREAM_CHANNEL_CAPACITY};
