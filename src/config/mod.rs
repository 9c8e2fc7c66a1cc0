//! Configuration management
//!
//! A single JSON document drives the whole pipeline; see the struct
//! fields for the recognized keys. Unknown keys are ignored.

use crate::error::{VisionError, VisionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source variant for a camera entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Rtsp,
    File,
}

/// Compressed-stream codec of a live camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamCodec {
    H264,
    H265,
}

impl Default for StreamCodec {
    fn default() -> Self {
        StreamCodec::H264
    }
}

/// Per-camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub camera_id: String,
    pub source_url: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub stream_codec: StreamCodec,
}

/// Object detector oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub weights_path: PathBuf,
    #[serde(default = "default_threads")]
    pub number_of_threads: usize,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default)]
    pub is_fp16: bool,
    /// Class allowlist; empty means all classes pass.
    #[serde(default)]
    pub classes: Vec<i32>,
}

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_max_age")]
    pub max_age: u32,
    #[serde(default = "default_min_hits")]
    pub min_hits: u32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 1,
            min_hits: 3,
            iou_threshold: 0.3,
        }
    }
}

/// Image encoder oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub model_path: PathBuf,
    #[serde(default = "default_threads")]
    pub number_of_threads: usize,
    #[serde(default)]
    pub is_fp16: bool,
}

/// Storage handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_type")]
    pub clip_storage_type: String,
    pub clip_storage_path: PathBuf,
    #[serde(default)]
    pub db_host: String,
    #[serde(default)]
    pub db_port: u16,
    #[serde(default)]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Clip duration in seconds, both source variants.
    #[serde(default = "default_clip_length")]
    pub clip_length: u32,
    #[serde(default = "default_sampler_type")]
    pub sampler_type: String,
    #[serde(default = "default_sampled_frames_count")]
    pub sampled_frames_count: usize,
    #[serde(default = "default_queue_max_size")]
    pub queue_max_size: usize,
    #[serde(default = "default_target_fps")]
    pub gst_target_fps: u32,
    #[serde(default = "default_frame_width")]
    pub gst_frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub gst_frame_height: u32,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub object_detector: Option<DetectorConfig>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub image_encoder: Option<EncoderConfig>,
    #[serde(default)]
    pub storage_handler: Option<StorageConfig>,
}

fn default_max_connections() -> usize {
    10
}
fn default_clip_length() -> u32 {
    30
}
fn default_sampler_type() -> String {
    "uniform".to_string()
}
fn default_sampled_frames_count() -> usize {
    5
}
fn default_queue_max_size() -> usize {
    100
}
fn default_target_fps() -> u32 {
    30
}
fn default_frame_width() -> u32 {
    640
}
fn default_frame_height() -> u32 {
    640
}
fn default_threads() -> usize {
    4
}
fn default_conf_threshold() -> f32 {
    0.5
}
fn default_nms_threshold() -> f32 {
    0.45
}
fn default_max_age() -> u32 {
    1
}
fn default_min_hits() -> u32 {
    3
}
fn default_iou_threshold() -> f64 {
    0.3
}
fn default_storage_type() -> String {
    "disk".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            clip_length: default_clip_length(),
            sampler_type: default_sampler_type(),
            sampled_frames_count: default_sampled_frames_count(),
            queue_max_size: default_queue_max_size(),
            gst_target_fps: default_target_fps(),
            gst_frame_width: default_frame_width(),
            gst_frame_height: default_frame_height(),
            cameras: Vec::new(),
            object_detector: None,
            tracker: TrackerConfig::default(),
            image_encoder: None,
            storage_handler: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> VisionResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| VisionError::ConfigNotFound(path.to_path_buf()))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| VisionError::ConfigParse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> VisionResult<()> {
        if self.clip_length == 0 {
            return Err(VisionError::InvalidConfigValue {
                field: "clip_length".to_string(),
                value: self.clip_length.to_string(),
            });
        }

        if self.gst_target_fps == 0 || self.gst_target_fps > 120 {
            return Err(VisionError::InvalidConfigValue {
                field: "gst_target_fps".to_string(),
                value: self.gst_target_fps.to_string(),
            });
        }

        if self.gst_frame_width == 0 || self.gst_frame_height == 0 {
            return Err(VisionError::InvalidConfigValue {
                field: "gst_frame_width/gst_frame_height".to_string(),
                value: format!("{}x{}", self.gst_frame_width, self.gst_frame_height),
            });
        }

        if self.queue_max_size == 0 {
            return Err(VisionError::InvalidConfigValue {
                field: "queue_max_size".to_string(),
                value: self.queue_max_size.to_string(),
            });
        }

        if self.sampler_type != "uniform" {
            return Err(VisionError::InvalidConfigValue {
                field: "sampler_type".to_string(),
                value: self.sampler_type.clone(),
            });
        }

        if let Some(detector) = &self.object_detector {
            if !(0.0..=1.0).contains(&detector.conf_threshold) {
                return Err(VisionError::InvalidConfigValue {
                    field: "object_detector.conf_threshold".to_string(),
                    value: detector.conf_threshold.to_string(),
                });
            }
            if !(0.0..=1.0).contains(&detector.nms_threshold) {
                return Err(VisionError::InvalidConfigValue {
                    field: "object_detector.nms_threshold".to_string(),
                    value: detector.nms_threshold.to_string(),
                });
            }
        }

        if !(0.0..=1.0).contains(&self.tracker.iou_threshold) {
            return Err(VisionError::InvalidConfigValue {
                field: "tracker.iou_threshold".to_string(),
                value: self.tracker.iou_threshold.to_string(),
            });
        }

        if let Some(storage) = &self.storage_handler {
            if storage.clip_storage_type != "disk" {
                return Err(VisionError::InvalidConfigValue {
                    field: "storage_handler.clip_storage_type".to_string(),
                    value: storage.clip_storage_type.clone(),
                });
            }
        }

        Ok(())
    }

    /// Frames per clip for the live decode path.
    pub fn frames_per_clip(&self) -> usize {
        (self.gst_target_fps * self.clip_length) as usize
    }
}
