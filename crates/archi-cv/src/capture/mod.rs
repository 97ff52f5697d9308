//! Screen capture boundary and the scan controller

pub mod command;
pub mod controller;
pub mod ingest;
pub mod replay;

pub use command::CommandCapture;
pub use controller::{
    CaptureController, ControllerConfig, ControllerError, ControllerStatus, detect_frame, frame_events,
};
pub use ingest::{IngestStats, run_aggregator};
pub use replay::ReplayCapture;

use crate::utils::ImageUtils;
use async_trait::async_trait;
use image::GrayImage;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of the capture process
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// The frame could not be read this time; the process is still usable
    #[error("frame read failed: {0}")]
    Read(String),

    /// The process is gone
    #[error("capture process crashed: {0}")]
    Crashed(String),

    #[error("capture process could not be started: {0}")]
    Spawn(String),
}

impl CaptureError {
    /// Whether the next grab may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Read(_))
    }
}

/// An external source of screen frames.
///
/// `stop` must be safe to call on a process that never started or already
/// died.
#[async_trait]
pub trait CaptureProcess: Send {
    async fn start(&mut self) -> Result<(), CaptureError>;

    async fn grab_frame(&mut self) -> Result<GrayImage, CaptureError>;

    async fn stop(&mut self);

    fn name(&self) -> &str;
}

/// Decode a frame file on the blocking pool
pub(crate) async fn load_frame(path: PathBuf) -> Result<GrayImage, CaptureError> {
    tokio::task::spawn_blocking(move || {
        ImageUtils::load_grayscale(&path)
            .map_err(|e| CaptureError::Read(format!("{}: {:#}", path.display(), e)))
    })
    .await
    .map_err(|e| CaptureError::Read(format!("frame decoding failed: {}", e)))?
}
