//! Live network stream source
//!
//! Hardware-accelerated decode through a GStreamer pipeline. Decoded
//! frames arrive on the appsink callback, are stamped with absolute
//! wall-clock time anchored at the first frame, and assembled into
//! fixed-length clips in an internal bounded queue. The public surface
//! stays pull-only.

use crate::clip::{Clip, Frame};
use crate::config::StreamCodec;
use crate::error::{VisionError, VisionResult};
use crate::source::StreamSource;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use opencv::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

/// Pending-clip cap inside the source; the decode pipeline is never
/// blocked, excess clips are dropped.
const MAX_PENDING_CLIPS: usize = 10;

struct Assembly {
    frames: Vec<Frame>,
    clip_start_ms: u64,
    clip_end_ms: u64,
    /// `(first_pts_ms, wall_clock_ms_at_first_frame)`
    anchor: Option<(u64, u64)>,
    clips: VecDeque<Clip>,
}

struct Shared {
    active: AtomicBool,
    frames_per_clip: usize,
    assembly: Mutex<Assembly>,
}

impl Shared {
    /// Appsink-thread entry: stamp, buffer, and cut clips.
    fn push_frame(&self, frame: Frame, pts_ms: u64) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let mut assembly = match self.assembly.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let (anchor_pts, anchor_wall) = *assembly.anchor.get_or_insert_with(|| {
            let wall_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            (pts_ms, wall_ms)
        });
        let timestamp_ms = anchor_wall + pts_ms.saturating_sub(anchor_pts);

        if assembly.frames.is_empty() {
            assembly.clip_start_ms = timestamp_ms;
        }
        assembly.frames.push(frame);
        assembly.clip_end_ms = timestamp_ms;

        if assembly.frames.len() >= self.frames_per_clip {
            let frames = std::mem::take(&mut assembly.frames);
            let clip = Clip::new(
                String::new(),
                frames,
                assembly.clip_start_ms,
                assembly.clip_end_ms,
            );

            if assembly.clips.len() < MAX_PENDING_CLIPS {
                assembly.clips.push_back(clip);
            } else {
                warn!("Pending-clip queue full, dropping clip {}", clip.clip_id);
            }
        }
    }
}

pub struct RtspSource {
    target_fps: u32,
    target_width: u32,
    target_height: u32,
    codec: StreamCodec,
    shared: Arc<Shared>,
    pipeline: Option<gst::Pipeline>,
    bus_thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    started: bool,
}

impl RtspSource {
    pub fn new(
        clip_length: u32,
        target_fps: u32,
        target_width: u32,
        target_height: u32,
        codec: StreamCodec,
    ) -> Self {
        let frames_per_clip = (clip_length * target_fps) as usize;
        Self {
            target_fps,
            target_width,
            target_height,
            codec,
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                frames_per_clip,
                assembly: Mutex::new(Assembly {
                    frames: Vec::new(),
                    clip_start_ms: 0,
                    clip_end_ms: 0,
                    anchor: None,
                    clips: VecDeque::new(),
                }),
            }),
            pipeline: None,
            bus_thread: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            started: false,
        }
    }

    fn depay_element(&self) -> &'static str {
        match self.codec {
            StreamCodec::H264 => "rtph264depay",
            StreamCodec::H265 => "rtph265depay",
        }
    }

    fn parser_element(&self) -> &'static str {
        match self.codec {
            StreamCodec::H264 => "h264parse",
            StreamCodec::H265 => "h265parse",
        }
    }

    /// Low-latency hardware-decode pipeline, rescaled and rate-limited
    /// to the configured geometry.
    fn build_pipeline_string(&self, url: &str) -> String {
        format!(
            "rtspsrc location=\"{}\" latency=50 protocols=tcp ! \
             {} ! {} ! \
             nvv4l2decoder enable-max-performance=1 ! \
             nvvideoconvert ! videorate ! \
             video/x-raw,width={},height={},framerate={}/1 ! \
             videoconvert ! video/x-raw,format=BGR ! \
             appsink name=sink emit-signals=true sync=false max-buffers=2 drop=true",
            url,
            self.depay_element(),
            self.parser_element(),
            self.target_width,
            self.target_height,
            self.target_fps,
        )
    }
}

fn mat_from_sample(sample: &gst::Sample) -> Option<(Frame, u64)> {
    let buffer = sample.buffer()?;
    let pts_ms = buffer.pts()?.mseconds();
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()?;
    let height = structure.get::<i32>("height").ok()?;

    let map = buffer.map_readable().ok()?;
    let data = map.as_slice();
    if data.len() < (width * height * 3) as usize {
        return None;
    }

    // One flat BGR buffer reshaped into an owned h x w, 3-channel Mat.
    let flat = Mat::from_slice(&data[..(width * height * 3) as usize]).ok()?;
    let shaped = flat.reshape(3, height).ok()?;
    let frame = shaped.try_clone().ok()?;

    Some((frame, pts_ms))
}

impl StreamSource for RtspSource {
    fn start(&mut self, url: &str) -> VisionResult<()> {
        if self.started {
            return Err(VisionError::SourceAlreadyStarted(url.to_string()));
        }
        self.started = true;

        gst::init().map_err(|e| VisionError::SourceStart(e.to_string()))?;

        let pipeline_str = self.build_pipeline_string(url);
        info!("Starting live pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| VisionError::SourceStart(e.to_string()))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| VisionError::SourceStart("Not a pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| VisionError::SourceStart("Appsink element not found".to_string()))?
            .dynamic_cast::<AppSink>()
            .map_err(|_| VisionError::SourceStart("'sink' is not an appsink".to_string()))?;

        self.shared.active.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        appsink.connect("new-sample", false, move |args| {
            let sink = args[0].get::<AppSink>().ok()?;
            let sample = sink.pull_sample().ok()?;

            if let Some((frame, pts_ms)) = mat_from_sample(&sample) {
                shared.push_frame(frame, pts_ms);
            }

            Some(gst::FlowReturn::Ok.to_value())
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| VisionError::SourceStart(e.to_string()))?;

        // Pipeline errors flip the source inactive; warnings are logged
        // and ignored.
        let bus = pipeline
            .bus()
            .ok_or_else(|| VisionError::SourceStart("Pipeline has no bus".to_string()))?;
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let watch_url = url.to_string();
        self.bus_thread = Some(std::thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
                    continue;
                };
                match msg.view() {
                    gst::MessageView::Error(err) => {
                        error!("Pipeline error on {}: {}", watch_url, err.error());
                        shared.active.store(false, Ordering::SeqCst);
                    }
                    gst::MessageView::Warning(w) => {
                        warn!("Pipeline warning on {}: {}", watch_url, w.error());
                    }
                    gst::MessageView::Eos(_) => {
                        info!("End of stream on {}", watch_url);
                        shared.active.store(false, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
        }));

        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }

        if let Some(handle) = self.bus_thread.take() {
            let _ = handle.join();
        }
    }

    fn poll_clip(&mut self) -> Option<Clip> {
        let mut assembly = match self.shared.assembly.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        assembly.clips.pop_front()
    }

    fn is_active(&self) -> bool {
        self.started && self.shared.active.load(Ordering::SeqCst)
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            self.stop();
        }
    }
}
