//! Visionflow
//!
//! A multi-camera video analysis pipeline: ingests live and recorded
//! streams, segments them into fixed-duration clips, samples frames,
//! runs detection, tracking and embedding, and persists clips with their
//! per-tracklet embeddings.

pub mod clip;
pub mod config;
pub mod detect;
pub mod encode;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod sampler;
pub mod source;
pub mod storage;
pub mod track;
pub mod utils;

// Re-export commonly used types
pub use clip::{Clip, Frame};
pub use config::{CameraConfig, Config, SourceType, StreamCodec};
pub use detect::{Detection, ObjectDetector, YoloDetector};
pub use encode::{ClipImageEncoder, ImageEncoder};
pub use engine::{AnalysisStage, Engine};
pub use error::{VisionError, VisionResult};
pub use sampler::{FrameSampler, UniformSampler};
pub use source::{FileSource, RtspSource, StreamSource};
pub use storage::{ClipEmbeddings, StorageHandler, VectorStore};
pub use track::{SortTracker, TrackedObjectRecord};

/// Current version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
