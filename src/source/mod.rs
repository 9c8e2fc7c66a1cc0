//! Stream sources
//!
//! A source turns one camera (live network stream or recorded file) into
//! an ordered series of clips with absolute timestamps. The surface is
//! pull-only: decode callbacks stay private to each variant.

use crate::clip::Clip;
use crate::config::{CameraConfig, Config, SourceType};
use crate::error::VisionResult;

pub mod file;
pub mod rtsp;

pub use file::FileSource;
pub use rtsp::RtspSource;

/// One camera's clip producer.
///
/// `start` may be called once; a second call before `stop` fails, and a
/// stopped source is terminal. `poll_clip` never blocks.
pub trait StreamSource: Send {
    fn start(&mut self, url: &str) -> VisionResult<()>;
    fn stop(&mut self);
    fn poll_clip(&mut self) -> Option<Clip>;
    fn is_active(&self) -> bool;
}

/// Construct the source variant for a camera entry.
pub fn build_source(camera: &CameraConfig, config: &Config) -> Box<dyn StreamSource> {
    match camera.source_type {
        SourceType::Rtsp => Box::new(RtspSource::new(
            config.clip_length,
            config.gst_target_fps,
            config.gst_frame_width,
            config.gst_frame_height,
            camera.stream_codec,
        )),
        SourceType::File => Box::new(FileSource::new(config.clip_length, config.gst_target_fps)),
    }
}
