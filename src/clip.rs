//! Clip container: the unit of work flowing through the pipeline

use opencv::core::Mat;
use std::collections::HashMap;

/// A decoded video frame, 8-bit BGR.
pub type Frame = Mat;

/// Fixed-duration ordered frame sequence from one camera.
///
/// Created by a stream source, enriched by the ingestion worker (sampled
/// frames) and consumed by the analysis worker. Never shared mutably
/// across workers; it is moved through the clip queue.
#[derive(Debug, Default)]
pub struct Clip {
    /// Unique within an engine run: `"clip_" + start_timestamp_ms`.
    pub clip_id: String,
    /// Stable identifier of the producing camera.
    pub camera_id: String,
    /// Dense decoded frames, in presentation order.
    pub frames: Vec<Frame>,
    /// Subset of `frames` selected by the sampler, in order.
    pub sampled_frames: Vec<Frame>,
    /// Absolute Unix-epoch milliseconds of the first frame.
    pub start_timestamp_ms: u64,
    /// Absolute Unix-epoch milliseconds of the last frame.
    pub end_timestamp_ms: u64,
    pub metadata: HashMap<String, String>,
}

impl Clip {
    pub fn new(
        camera_id: impl Into<String>,
        frames: Vec<Frame>,
        start_timestamp_ms: u64,
        end_timestamp_ms: u64,
    ) -> Self {
        Self {
            clip_id: format!("clip_{}", start_timestamp_ms),
            camera_id: camera_id.into(),
            frames,
            sampled_frames: Vec::new(),
            start_timestamp_ms,
            end_timestamp_ms,
            metadata: HashMap::new(),
        }
    }

    /// Clip duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_timestamp_ms.saturating_sub(self.start_timestamp_ms)) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn blank_frame() -> Frame {
        Mat::new_rows_cols_with_default(8, 8, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_clip_id_from_start_timestamp() {
        let clip = Clip::new("cam_1", vec![blank_frame()], 1712000000000, 1712000001000);
        assert_eq!(clip.clip_id, "clip_1712000000000");
        assert_eq!(clip.camera_id, "cam_1");
        assert!(clip.end_timestamp_ms >= clip.start_timestamp_ms);
    }

    #[test]
    fn test_duration() {
        let clip = Clip::new("cam_1", vec![blank_frame()], 1000, 3500);
        assert!((clip.duration_secs() - 2.5).abs() < f64::EPSILON);
    }
}
