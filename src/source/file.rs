//! Recorded-file source
//!
//! Software decode through OpenCV, driven entirely by the ingestion
//! worker's polling. Timestamps are synthesized from the container frame
//! rate, zero-based at the stream origin.

use crate::clip::{Clip, Frame};
use crate::error::{VisionError, VisionResult};
use crate::source::StreamSource;
use opencv::prelude::*;
use opencv::videoio::{VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT};
use tracing::{info, warn};

pub struct FileSource {
    frames_per_clip: usize,
    capture: Option<VideoCapture>,
    fps: f64,
    total_frames: i64,
    current_frame_index: i64,
    active: bool,
    started: bool,
}

impl FileSource {
    pub fn new(clip_length: u32, target_fps: u32) -> Self {
        Self {
            frames_per_clip: (clip_length * target_fps) as usize,
            capture: None,
            fps: 0.0,
            total_frames: 0,
            current_frame_index: 0,
            active: false,
            started: false,
        }
    }

    fn timestamp_ms(&self, frame_index: i64) -> u64 {
        if self.fps > 0.0 {
            (frame_index as f64 / self.fps * 1000.0).round() as u64
        } else {
            0
        }
    }
}

impl StreamSource for FileSource {
    fn start(&mut self, url: &str) -> VisionResult<()> {
        if self.started {
            return Err(VisionError::SourceAlreadyStarted(url.to_string()));
        }
        self.started = true;

        let capture = VideoCapture::from_file(url, CAP_ANY)
            .map_err(|e| VisionError::SourceStart(format!("{}: {}", url, e)))?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(VisionError::SourceStart(format!(
                "Cannot open video file: {}",
                url
            )));
        }

        self.fps = capture.get(CAP_PROP_FPS).unwrap_or(0.0);
        self.total_frames = capture.get(CAP_PROP_FRAME_COUNT).unwrap_or(0.0) as i64;
        self.current_frame_index = 0;
        self.capture = Some(capture);
        self.active = true;

        info!(
            "File source opened: {} ({} frames at {:.2} fps, {} frames per clip)",
            url, self.total_frames, self.fps, self.frames_per_clip
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
        }
    }

    fn poll_clip(&mut self) -> Option<Clip> {
        if !self.active {
            return None;
        }
        let capture = self.capture.as_mut()?;

        let mut frames: Vec<Frame> = Vec::new();
        while frames.len() < self.frames_per_clip {
            let mut frame = Frame::default();
            match capture.read(&mut frame) {
                Ok(true) if !frame.empty() => {
                    frames.push(frame);
                    self.current_frame_index += 1;
                }
                Ok(_) => break,
                Err(e) => {
                    warn!("File decode error at frame {}: {}", self.current_frame_index, e);
                    break;
                }
            }
        }

        if frames.is_empty() {
            self.active = false;
            return None;
        }

        let first_index = self.current_frame_index - frames.len() as i64;
        let last_index = self.current_frame_index - 1;
        let clip = Clip::new(
            String::new(),
            frames,
            self.timestamp_ms(first_index),
            self.timestamp_ms(last_index),
        );

        if self.current_frame_index >= self.total_frames {
            self.active = false;
        }

        Some(clip)
    }

    fn is_active(&self) -> bool {
        self.active && self.current_frame_index < self.total_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_missing_file_fails() {
        let mut source = FileSource::new(1, 30);
        match source.start("/nonexistent/video.mp4") {
            Err(VisionError::SourceStart(_)) => {}
            other => panic!("Expected SourceStart error, got {:?}", other.map(|_| ())),
        }
        assert!(!source.is_active());
    }

    #[test]
    fn test_double_start_rejected() {
        let mut source = FileSource::new(1, 30);
        let _ = source.start("/nonexistent/video.mp4");
        match source.start("/nonexistent/video.mp4") {
            Err(VisionError::SourceAlreadyStarted(_)) => {}
            other => panic!("Expected SourceAlreadyStarted, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_stopped_source_is_terminal() {
        let mut source = FileSource::new(1, 30);
        source.stop();
        assert!(!source.is_active());
        assert!(source.poll_clip().is_none());
    }

    #[test]
    fn test_timestamp_synthesis() {
        let mut source = FileSource::new(1, 30);
        source.fps = 30.0;
        assert_eq!(source.timestamp_ms(0), 0);
        assert_eq!(source.timestamp_ms(30), 1000);
        assert_eq!(source.timestamp_ms(45), 1500);

        source.fps = 0.0;
        assert_eq!(source.timestamp_ms(100), 0);
    }
}
