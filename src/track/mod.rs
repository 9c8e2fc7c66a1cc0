//! Multi-object tracking (SORT)
//!
//! One tracker per camera, persistent across that camera's clips for the
//! engine's lifetime. Per-frame detection lists go in; per-frame records
//! with stable tracker identifiers come out.

use crate::config::TrackerConfig;
use crate::detect::Detection;
use nalgebra::DVector;

pub mod assign;
pub mod kalman;

use assign::associate;
use kalman::KalmanFilter;

const MAX_HISTORY_SIZE: usize = 200;

/// `(x1,y1,x2,y2)` box to `(cx, cy, area, aspect)` measurement.
pub fn convert_bbox_to_z(bbox: &[f64; 4]) -> DVector<f64> {
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    DVector::from_vec(vec![
        bbox[0] + w / 2.0,
        bbox[1] + h / 2.0,
        w * h,
        w / h,
    ])
}

/// Inverse of [`convert_bbox_to_z`] over the leading state components.
pub fn convert_x_to_bbox(x: &DVector<f64>) -> [f64; 4] {
    let w = (x[2] * x[3]).max(0.0).sqrt();
    let h = if w > 0.0 { x[2] / w } else { 0.0 };
    [
        x[0] - w / 2.0,
        x[1] - h / 2.0,
        x[0] + w / 2.0,
        x[1] + h / 2.0,
    ]
}

/// Per-frame output record for one published tracklet.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObjectRecord {
    pub tracker_id: i64,
    /// `[x1, y1, x2, y2]` from the current (post-update) state.
    pub bounding_box: [f32; 4],
    pub class_label: i32,
    pub confidence: f32,
}

/// One continuously associated object.
#[derive(Debug)]
pub struct Tracklet {
    kf: KalmanFilter,
    pub tracker_id: i64,
    pub time_since_update: u32,
    pub hits: u32,
    pub hit_streak: u32,
    pub age: u32,
    pub conf: f32,
    pub label: i32,
    history: Vec<[f64; 4]>,
}

impl Tracklet {
    fn new(tracker_id: i64, detection: &Detection) -> Self {
        let bbox = [
            detection.x1 as f64,
            detection.y1 as f64,
            detection.x2 as f64,
            detection.y2 as f64,
        ];
        let mut kf = KalmanFilter::new();
        let z = convert_bbox_to_z(&bbox);
        for i in 0..kalman::DIM_Z {
            kf.x[i] = z[i];
        }

        Self {
            kf,
            tracker_id,
            time_since_update: 0,
            hits: 1,
            hit_streak: 1,
            age: 0,
            conf: detection.score,
            label: detection.class_id,
            history: Vec::new(),
        }
    }

    /// Advance one step and return the predicted box.
    fn predict(&mut self) -> [f64; 4] {
        // A shrinking box must not predict through zero area.
        if self.kf.x[2] + self.kf.x[6] <= 0.0 {
            self.kf.x[6] = 0.0;
        }

        self.kf.predict();
        self.age += 1;

        let bbox = convert_x_to_bbox(&self.kf.x);
        self.history.push(bbox);
        if self.history.len() > MAX_HISTORY_SIZE {
            let excess = self.history.len() - MAX_HISTORY_SIZE;
            self.history.drain(..excess);
        }

        bbox
    }

    fn update(&mut self, detection: &Detection) {
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
        self.conf = detection.score;
        self.label = detection.class_id;

        let bbox = [
            detection.x1 as f64,
            detection.y1 as f64,
            detection.x2 as f64,
            detection.y2 as f64,
        ];
        self.kf.update(&convert_bbox_to_z(&bbox));
    }

    fn state(&self) -> [f64; 4] {
        convert_x_to_bbox(&self.kf.x)
    }

    fn to_record(&self) -> TrackedObjectRecord {
        let bbox = self.state();
        TrackedObjectRecord {
            tracker_id: self.tracker_id,
            bounding_box: [bbox[0] as f32, bbox[1] as f32, bbox[2] as f32, bbox[3] as f32],
            class_label: self.label,
            confidence: self.conf,
        }
    }
}

/// SORT tracker: Kalman prediction, Hungarian association over IoU,
/// hit-streak gated publication.
pub struct SortTracker {
    max_age: u32,
    min_hits: u32,
    iou_threshold: f64,
    tracklets: Vec<Tracklet>,
    frame_count: u64,
    next_id: i64,
}

impl SortTracker {
    pub fn new(max_age: u32, min_hits: u32, iou_threshold: f64) -> Self {
        Self {
            max_age,
            min_hits,
            iou_threshold,
            tracklets: Vec::new(),
            frame_count: 0,
            next_id: 1,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.max_age, config.min_hits, config.iou_threshold)
    }

    /// Number of live tracklets, published or not.
    pub fn tracklet_count(&self) -> usize {
        self.tracklets.len()
    }

    /// Consume one frame's detections and emit the published records.
    ///
    /// Empty detection lists are fine: every tracklet ages one step and
    /// deletions still happen. Degenerate boxes are dropped up front.
    pub fn track(&mut self, detections: &[Detection]) -> Vec<TrackedObjectRecord> {
        self.frame_count += 1;

        let detections: Vec<Detection> = detections
            .iter()
            .filter(|d| d.is_valid())
            .cloned()
            .collect();

        let predictions: Vec<[f64; 4]> =
            self.tracklets.iter_mut().map(|t| t.predict()).collect();

        let association = associate(&detections, &predictions, self.iou_threshold);

        for &(d, t) in &association.matched {
            self.tracklets[t].update(&detections[d]);
        }

        for &t in &association.unmatched_tracklets {
            self.tracklets[t].time_since_update += 1;
            self.tracklets[t].hit_streak = 0;
        }

        // Tracklets created below publish from their next frame on.
        let mut records = Vec::new();
        for tracklet in &self.tracklets {
            if tracklet.time_since_update < 1
                && (tracklet.hit_streak >= self.min_hits
                    || self.frame_count <= u64::from(self.min_hits))
            {
                records.push(tracklet.to_record());
            }
        }

        for &d in &association.unmatched_detections {
            let tracklet = Tracklet::new(self.next_id, &detections[d]);
            self.next_id += 1;
            self.tracklets.push(tracklet);
        }

        let max_age = self.max_age;
        self.tracklets.retain(|t| t.time_since_update <= max_age);

        records
    }
}
