//! Error handling for the video analysis pipeline
//!
//! Every stage reports through [`VisionError`]; only configuration-time
//! failures are fatal. Everything else is localized to a source, clip or
//! frame and surfaced through logging and the metrics registry.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the video analysis pipeline
#[derive(Error, Debug)]
pub enum VisionError {
    // Configuration errors (fatal, pre-start)
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Configuration parsing failed: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration value: {field} = {value}")]
    InvalidConfigValue { field: String, value: String },

    // Source errors
    #[error("Source failed to start: {0}")]
    SourceStart(String),

    #[error("Source runtime failure: {0}")]
    SourceRuntime(String),

    #[error("Source already started: {0}")]
    SourceAlreadyStarted(String),

    #[error("Maximum connections reached ({0})")]
    MaxConnections(usize),

    // Pipeline errors
    #[error("Clip queue full, dropping clip from {camera_id}")]
    QueueFull { camera_id: String },

    // Oracle errors (per frame / per crop, non-fatal)
    #[error("Model loading failed: {0}")]
    ModelLoad(PathBuf),

    #[error("Model inference failed: {0}")]
    Model(String),

    // Storage errors (per clip, non-fatal)
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Video writer could not be opened for {0}")]
    VideoWriter(PathBuf),

    /// Cooperative-shutdown sentinel, not a failure.
    #[error("Shutdown requested")]
    ShutdownRequested,
}

/// Result type alias for convenience
pub type VisionResult<T> = std::result::Result<T, VisionError>;

impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::Model(format!("OpenCV error: {}", err))
    }
}

impl From<ort::Error> for VisionError {
    fn from(err: ort::Error) -> Self {
        VisionError::Model(format!("ONNX Runtime error: {}", err))
    }
}

impl From<gstreamer::glib::Error> for VisionError {
    fn from(err: gstreamer::glib::Error) -> Self {
        VisionError::SourceRuntime(err.to_string())
    }
}

impl From<std::io::Error> for VisionError {
    fn from(err: std::io::Error) -> Self {
        VisionError::Storage(format!("I/O error: {}", err))
    }
}
