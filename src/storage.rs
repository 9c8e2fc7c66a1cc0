//! Clip and embedding persistence
//!
//! Video goes to a per-camera directory layout on disk; tracklet
//! embeddings are average-pooled and handed to a [`VectorStore`]. The
//! store's wire protocol is a collaborator concern; the shipped
//! implementation appends JSONL records under the storage root.

use crate::clip::Clip;
use crate::encode::l2_normalize;
use crate::error::{VisionError, VisionResult};
use opencv::core::Size;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Embeddings gathered for one clip: tracker id to one vector per
/// sampled frame in which the tracklet was published.
pub type ClipEmbeddings = HashMap<i64, Vec<Vec<f32>>>;

/// One pooled record submitted to the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRecord {
    pub clip_id: String,
    pub tracker_id: i64,
    pub camera_id: String,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    pub clip_path: String,
    pub embedding: Vec<f32>,
}

/// Vector database seam. Network implementations own their own wire
/// protocol; the handler only drives connect/insert.
pub trait VectorStore: Send {
    fn connect(&mut self) -> VisionResult<()>;
    fn is_connected(&self) -> bool;
    fn insert(&mut self, record: &EmbeddingRecord) -> VisionResult<()>;
}

/// Append-only JSONL store, one file per storage root. Always connected
/// once its directory exists.
pub struct JsonlVectorStore {
    path: PathBuf,
    connected: bool,
}

impl JsonlVectorStore {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join("embeddings.jsonl"),
            connected: false,
        }
    }
}

impl VectorStore for JsonlVectorStore {
    fn connect(&mut self) -> VisionResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn insert(&mut self, record: &EmbeddingRecord) -> VisionResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| VisionError::Storage(format!("Embedding serialization failed: {}", e)))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                self.connected = false;
                VisionError::Storage(format!("Embedding store unavailable: {}", e))
            })?;

        writeln!(file, "{}", line)
            .map_err(|e| VisionError::Storage(format!("Embedding write failed: {}", e)))?;
        Ok(())
    }
}

/// Arithmetic mean across a tracklet's embeddings, then L2-normalized.
/// Empty member vectors (failed crops) are skipped.
pub fn average_track_embeddings(embeddings: &[Vec<f32>]) -> Vec<f32> {
    let mut non_empty = embeddings.iter().filter(|e| !e.is_empty());
    let Some(first) = non_empty.next() else {
        return Vec::new();
    };

    let mut pooled = first.clone();
    let mut count = 1usize;
    for embedding in non_empty {
        if embedding.len() != pooled.len() {
            warn!(
                "Skipping embedding of length {} in a pool of length {}",
                embedding.len(),
                pooled.len()
            );
            continue;
        }
        for (acc, v) in pooled.iter_mut().zip(embedding) {
            *acc += v;
        }
        count += 1;
    }

    for v in &mut pooled {
        *v /= count as f32;
    }

    l2_normalize(pooled)
}

/// Writes clips to `root/<camera_id>/<clip_id>.mp4` and pooled
/// embeddings to the vector store.
pub struct StorageHandler {
    storage_root: PathBuf,
    target_fps: f64,
    store: Box<dyn VectorStore>,
}

impl StorageHandler {
    /// Create the handler, bootstrapping the storage root and attempting
    /// an initial store connection (failure is logged, not fatal).
    pub fn new(
        storage_root: &Path,
        target_fps: u32,
        mut store: Box<dyn VectorStore>,
    ) -> VisionResult<Self> {
        if !storage_root.exists() {
            std::fs::create_dir_all(storage_root)?;
            info!("Created storage directory: {}", storage_root.display());
        }

        if let Err(e) = store.connect() {
            warn!("Vector store connection failed at startup: {}", e);
        }

        Ok(Self {
            storage_root: storage_root.to_path_buf(),
            target_fps: f64::from(target_fps),
            store,
        })
    }

    fn write_video(&self, clip: &Clip) -> VisionResult<PathBuf> {
        let camera_dir = self.storage_root.join(&clip.camera_id);
        std::fs::create_dir_all(&camera_dir)?;

        let clip_path = camera_dir.join(format!("{}.mp4", clip.clip_id));

        let first = &clip.frames[0];
        let size = Size::new(first.cols(), first.rows());
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;

        let mut writer = VideoWriter::new(
            clip_path.to_string_lossy().as_ref(),
            fourcc,
            self.target_fps,
            size,
            true,
        )?;

        if !writer.is_opened()? {
            return Err(VisionError::VideoWriter(clip_path));
        }

        for frame in &clip.frames {
            writer.write(frame)?;
        }
        writer.release()?;

        Ok(clip_path)
    }

    /// Persist one clip. The mp4 lands first; embedding-store failures
    /// leave it on disk and are reported to the caller.
    pub fn save(&mut self, clip: &Clip, embeddings: &ClipEmbeddings) -> VisionResult<PathBuf> {
        if clip.frames.is_empty() {
            return Err(VisionError::Storage(format!(
                "Clip {} has no frames",
                clip.clip_id
            )));
        }

        let clip_path = self.write_video(clip)?;

        if !self.store.is_connected() {
            info!("Vector store disconnected, attempting to reconnect");
            if let Err(e) = self.store.connect() {
                error!("Vector store reconnect failed: {}", e);
                return Err(VisionError::Storage(format!(
                    "Vector store unavailable for clip {}",
                    clip.clip_id
                )));
            }
        }

        let mut tracker_ids: Vec<&i64> = embeddings.keys().collect();
        tracker_ids.sort();

        for tracker_id in tracker_ids {
            let pooled = average_track_embeddings(&embeddings[tracker_id]);
            if pooled.is_empty() {
                continue;
            }

            let record = EmbeddingRecord {
                clip_id: clip.clip_id.clone(),
                tracker_id: *tracker_id,
                camera_id: clip.camera_id.clone(),
                start_timestamp_ms: clip.start_timestamp_ms,
                end_timestamp_ms: clip.end_timestamp_ms,
                clip_path: clip_path.to_string_lossy().into_owned(),
                embedding: pooled,
            };

            self.store.insert(&record)?;
        }

        info!(
            "Stored clip {} from {} ({} frames, {} sampled, {:.2}s) at {}",
            clip.clip_id,
            clip.camera_id,
            clip.frames.len(),
            clip.sampled_frames.len(),
            clip.duration_secs(),
            clip_path.display()
        );

        Ok(clip_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_pooling_is_unit_norm() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let pooled = average_track_embeddings(&embeddings);

        // Mean is (0.5, 0.5); normalized to (1/√2, 1/√2)
        let expected = 1.0 / 2f32.sqrt();
        assert!((pooled[0] - expected).abs() < 1e-6);
        assert!((pooled[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_average_pooling_skips_empty_members() {
        let embeddings = vec![Vec::new(), vec![0.0, 2.0], Vec::new()];
        let pooled = average_track_embeddings(&embeddings);
        assert_eq!(pooled, vec![0.0, 1.0]);
    }

    #[test]
    fn test_average_pooling_all_empty() {
        assert!(average_track_embeddings(&[]).is_empty());
        assert!(average_track_embeddings(&[Vec::new(), Vec::new()]).is_empty());
    }

    #[test]
    fn test_jsonl_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlVectorStore::new(dir.path());
        assert!(!store.is_connected());
        store.connect().unwrap();
        assert!(store.is_connected());

        let record = EmbeddingRecord {
            clip_id: "clip_1000".to_string(),
            tracker_id: 7,
            camera_id: "cam_1".to_string(),
            start_timestamp_ms: 1000,
            end_timestamp_ms: 2000,
            clip_path: "/tmp/clips/cam_1/clip_1000.mp4".to_string(),
            embedding: vec![0.6, 0.8],
        };
        store.insert(&record).unwrap();
        store.insert(&record).unwrap();

        let content = std::fs::read_to_string(dir.path().join("embeddings.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["tracker_id"], 7);
        assert_eq!(parsed["camera_id"], "cam_1");
    }
}
