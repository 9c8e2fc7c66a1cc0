//! Pipeline engine
//!
//! Owns the sources, oracles, trackers and storage, wires them into the
//! staged dataflow and enforces backpressure on the clip queue. One
//! ingestion worker sweeps every source, samples frames and produces
//! into the queue; one analysis worker consumes clips and runs
//! detect → track → crop+encode → store; a reporting worker snapshots
//! timing metrics. Shutdown is cooperative through a shared flag.

use crate::clip::Clip;
use crate::config::{CameraConfig, Config, SourceType, StreamCodec};
use crate::detect::{ObjectDetector, YoloDetector};
use crate::encode::{ClipImageEncoder, ImageEncoder};
use crate::error::{VisionError, VisionResult};
use crate::metrics::{
    registry, ScopedTimer, STAGE_CLIP_RETRIEVAL, STAGE_FRAME_SAMPLING, STAGE_OBJECT_DETECTION,
    STAGE_TOTAL_PROCESSING,
};
use crate::sampler::{build_sampler, FrameSampler};
use crate::source::{build_source, StreamSource};
use crate::storage::{ClipEmbeddings, JsonlVectorStore, StorageHandler};
use crate::track::SortTracker;
use crate::utils::crop_object;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_millis(10);
const QUEUE_WAIT: Duration = Duration::from_millis(10);
const REPORT_INTERVAL: Duration = Duration::from_secs(10);
const CROP_PADDING: i32 = 10;

/// The analysis-stage collaborators, bundled so they can be moved onto
/// the analysis worker together.
pub struct AnalysisStage {
    pub detector: Box<dyn ObjectDetector>,
    pub encoder: Box<dyn ImageEncoder>,
    pub storage: StorageHandler,
}

pub struct Engine {
    config: Config,
    sources: Vec<(String, Box<dyn StreamSource>)>,
    analysis: Option<AnalysisStage>,
    clip_tx: Sender<Clip>,
    clip_rx: Receiver<Clip>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    running: bool,
    dropped_clips: Arc<AtomicUsize>,
    clips_processed: Arc<AtomicUsize>,
}

impl Engine {
    pub fn new(config: Config) -> VisionResult<Self> {
        config.validate()?;
        let (clip_tx, clip_rx) = bounded(config.queue_max_size);

        Ok(Self {
            config,
            sources: Vec::new(),
            analysis: None,
            clip_tx,
            clip_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            running: false,
            dropped_clips: Arc::new(AtomicUsize::new(0)),
            clips_processed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Construct with an injected analysis stage instead of building the
    /// oracles from the configured model paths.
    pub fn with_analysis(config: Config, analysis: AnalysisStage) -> VisionResult<Self> {
        let mut engine = Self::new(config)?;
        engine.analysis = Some(analysis);
        Ok(engine)
    }

    /// Register one camera. Only valid before `start`; a source whose
    /// own `start` fails is not registered.
    pub fn add_source(
        &mut self,
        url: &str,
        camera_id: &str,
        source_type: SourceType,
        codec: StreamCodec,
    ) -> VisionResult<()> {
        if self.running {
            return Err(VisionError::SourceStart(
                "Cannot add sources while running".to_string(),
            ));
        }
        if self.sources.len() >= self.config.max_connections {
            return Err(VisionError::MaxConnections(self.config.max_connections));
        }

        let camera = CameraConfig {
            camera_id: camera_id.to_string(),
            source_url: url.to_string(),
            source_type,
            stream_codec: codec,
        };
        let mut source = build_source(&camera, &self.config);
        source.start(url)?;

        let camera_id = if camera_id.is_empty() {
            format!("camera_{}", self.sources.len() + 1)
        } else {
            camera_id.to_string()
        };

        info!("Added source {} as camera {}", url, camera_id);
        self.sources.push((camera_id, source));
        Ok(())
    }

    /// Register an already-started source. Used by embedders and tests
    /// that bring their own clip producers.
    pub fn add_stream(
        &mut self,
        source: Box<dyn StreamSource>,
        camera_id: &str,
    ) -> VisionResult<()> {
        if self.running {
            return Err(VisionError::SourceStart(
                "Cannot add sources while running".to_string(),
            ));
        }
        if self.sources.len() >= self.config.max_connections {
            return Err(VisionError::MaxConnections(self.config.max_connections));
        }
        self.sources.push((camera_id.to_string(), source));
        Ok(())
    }

    fn build_analysis_from_config(config: &Config) -> VisionResult<Option<AnalysisStage>> {
        let (Some(detector_cfg), Some(encoder_cfg), Some(storage_cfg)) = (
            &config.object_detector,
            &config.image_encoder,
            &config.storage_handler,
        ) else {
            return Ok(None);
        };

        let detector = YoloDetector::new(detector_cfg)?;
        let encoder = ClipImageEncoder::new(encoder_cfg)?;
        let store = JsonlVectorStore::new(&storage_cfg.clip_storage_path);
        let storage = StorageHandler::new(
            &storage_cfg.clip_storage_path,
            config.gst_target_fps,
            Box::new(store),
        )?;

        Ok(Some(AnalysisStage {
            detector: Box::new(detector),
            encoder: Box::new(encoder),
            storage,
        }))
    }

    /// Spawn the workers. Idempotent; fails when no sources were added
    /// or a configured oracle cannot be constructed.
    pub fn start(&mut self) -> VisionResult<()> {
        if self.running {
            info!("Engine already running");
            return Ok(());
        }
        if self.sources.is_empty() {
            return Err(VisionError::SourceStart(
                "No stream sources added".to_string(),
            ));
        }

        if self.analysis.is_none() {
            self.analysis = Self::build_analysis_from_config(&self.config)?;
        }

        self.shutdown.store(false, Ordering::SeqCst);

        let sources = std::mem::take(&mut self.sources);
        let camera_ids: Vec<String> = sources.iter().map(|(id, _)| id.clone()).collect();
        let sampler = build_sampler(&self.config)?;

        self.workers.push(spawn_ingestion_worker(
            sources,
            sampler,
            self.config.sampled_frames_count,
            self.clip_tx.clone(),
            self.shutdown.clone(),
            self.dropped_clips.clone(),
        ));

        if let Some(analysis) = self.analysis.take() {
            let thresholds = self
                .config
                .object_detector
                .as_ref()
                .map(|d| (d.conf_threshold, d.nms_threshold))
                .unwrap_or((0.5, 0.45));
            self.workers.push(spawn_analysis_worker(
                analysis,
                self.config.tracker.clone(),
                thresholds,
                camera_ids,
                self.clip_rx.clone(),
                self.shutdown.clone(),
                self.clips_processed.clone(),
            ));
        }

        self.workers.push(spawn_reporting_worker(self.shutdown.clone()));

        self.running = true;
        info!("Engine started with {} worker thread(s)", self.workers.len());
        Ok(())
    }

    /// Cooperative shutdown: flag, join, flush metrics. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.shutdown.store(true, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.join() {
                error!("Worker thread panicked: {:?}", e);
            }
        }

        info!(
            "Engine stopped ({} clips processed, {} dropped)\n{}",
            self.clips_processed.load(Ordering::Relaxed),
            self.dropped_clips.load(Ordering::Relaxed),
            registry().report()
        );
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Drain helper: move the next queued clip into `out`. Returns false
    /// when the queue is empty.
    pub fn poll_clip(&self, out: &mut Clip) -> bool {
        match self.clip_rx.try_recv() {
            Ok(clip) => {
                *out = clip;
                true
            }
            Err(_) => false,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.clip_rx.len()
    }

    pub fn dropped_clips(&self) -> usize {
        self.dropped_clips.load(Ordering::Relaxed)
    }

    pub fn clips_processed(&self) -> usize {
        self.clips_processed.load(Ordering::Relaxed)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_ingestion_worker(
    mut sources: Vec<(String, Box<dyn StreamSource>)>,
    sampler: Box<dyn FrameSampler>,
    sampled_frames_count: usize,
    clip_tx: Sender<Clip>,
    shutdown: Arc<AtomicBool>,
    dropped_clips: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        'sweep: while !shutdown.load(Ordering::SeqCst) {
            for (camera_id, source) in &mut sources {
                if !source.is_active() {
                    continue;
                }

                let clip = {
                    let _timer = ScopedTimer::new(STAGE_CLIP_RETRIEVAL, camera_id);
                    source.poll_clip()
                };
                let Some(mut clip) = clip else {
                    continue;
                };
                clip.camera_id = camera_id.clone();

                {
                    let _timer = ScopedTimer::new(STAGE_FRAME_SAMPLING, camera_id);
                    sampler.sample(&mut clip, sampled_frames_count);
                }

                info!(
                    "Clip {} ready from {} ({} frames, {} sampled, queue {})",
                    clip.clip_id,
                    camera_id,
                    clip.frames.len(),
                    clip.sampled_frames.len(),
                    clip_tx.len() + 1
                );

                match clip_tx.try_send(clip) {
                    Ok(()) => {}
                    Err(TrySendError::Full(clip)) => {
                        dropped_clips.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "{}",
                            VisionError::QueueFull {
                                camera_id: clip.camera_id.clone()
                            }
                        );
                    }
                    Err(TrySendError::Disconnected(_)) => break 'sweep,
                }
            }
            std::thread::sleep(SWEEP_INTERVAL);
        }

        for (camera_id, source) in &mut sources {
            source.stop();
            info!("Stopped source for camera {}", camera_id);
        }
    })
}

fn spawn_analysis_worker(
    mut analysis: AnalysisStage,
    tracker_config: crate::config::TrackerConfig,
    thresholds: (f32, f32),
    camera_ids: Vec<String>,
    clip_rx: Receiver<Clip>,
    shutdown: Arc<AtomicBool>,
    clips_processed: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        // One tracker per camera, persistent across that camera's clips.
        let mut trackers: HashMap<String, SortTracker> = camera_ids
            .into_iter()
            .map(|id| (id, SortTracker::from_config(&tracker_config)))
            .collect();

        // Thresholds are fixed for the engine's lifetime.
        let (conf_threshold, nms_threshold) = thresholds;

        while !shutdown.load(Ordering::SeqCst) {
            let clip = match clip_rx.recv_timeout(QUEUE_WAIT) {
                Ok(clip) => clip,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let tracker = trackers
                .entry(clip.camera_id.clone())
                .or_insert_with(|| SortTracker::from_config(&tracker_config));

            process_clip(
                &clip,
                &mut analysis,
                tracker,
                conf_threshold,
                nms_threshold,
            );
            clips_processed.fetch_add(1, Ordering::Relaxed);
        }
    })
}

/// Run one clip through detect → track → crop+encode → store.
///
/// Stage failures degrade the clip instead of aborting it: a failed
/// detection becomes an empty frame, a failed crop or encode an empty
/// embedding, and a failed store is logged with the mp4 left on disk.
fn process_clip(
    clip: &Clip,
    analysis: &mut AnalysisStage,
    tracker: &mut SortTracker,
    conf_threshold: f32,
    nms_threshold: f32,
) {
    let _total = ScopedTimer::new(STAGE_TOTAL_PROCESSING, &clip.camera_id);
    let mut embeddings: ClipEmbeddings = ClipEmbeddings::new();

    for frame in &clip.sampled_frames {
        let detections = {
            let _timer = ScopedTimer::new(STAGE_OBJECT_DETECTION, &clip.camera_id);
            match analysis.detector.detect(frame, conf_threshold, nms_threshold) {
                Ok(detections) => detections,
                Err(e) => {
                    warn!("Detection failed on clip {}: {}", clip.clip_id, e);
                    Vec::new()
                }
            }
        };

        let records = tracker.track(&detections);

        for record in records {
            let [x1, y1, x2, y2] = record.bounding_box;
            let embedding = match crop_object(frame, x1, y1, x2, y2, CROP_PADDING) {
                Some(crop) => match analysis.encoder.encode(&crop) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        warn!(
                            "Encoding failed for tracker {} on clip {}: {}",
                            record.tracker_id, clip.clip_id, e
                        );
                        Vec::new()
                    }
                },
                None => Vec::new(),
            };
            embeddings.entry(record.tracker_id).or_default().push(embedding);
        }
    }

    if let Err(e) = analysis.storage.save(clip, &embeddings) {
        error!("Storage failed for clip {}: {}", clip.clip_id, e);
    }
}

fn spawn_reporting_worker(shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut elapsed = Duration::ZERO;
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
            elapsed += Duration::from_millis(100);
            if elapsed >= REPORT_INTERVAL {
                info!("{}", registry().report());
                elapsed = Duration::ZERO;
            }
        }
    })
}
