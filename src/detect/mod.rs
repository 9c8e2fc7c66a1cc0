//! Object detection: data types, oracle trait and post-processing

use crate::clip::Frame;
use crate::error::VisionResult;

pub mod yolo;

pub use yolo::YoloDetector;

/// A detected object with axis-aligned box and classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Confidence score in [0, 1].
    pub score: f32,
    pub class_id: i32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: i32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            score,
            class_id,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    /// Invariant check: `x2 > x1` and `y2 > y1`.
    pub fn is_valid(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &Detection) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        intersection / union
    }
}

/// Per-frame detection oracle. Called from the analysis worker only;
/// deterministic for identical input and thresholds.
pub trait ObjectDetector: Send {
    fn detect(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> VisionResult<Vec<Detection>>;
}

/// Greedy non-maximum suppression, highest score first.
pub fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(detections[i].clone());

        for j in (i + 1)..detections.len() {
            if !suppressed[j] && detections[i].iou(&detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Drop detections below the confidence threshold.
pub fn filter_by_confidence(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.into_iter().filter(|d| d.score >= threshold).collect()
}

/// Keep only allowlisted classes; an empty allowlist passes everything.
pub fn filter_by_class(detections: Vec<Detection>, classes: &[i32]) -> Vec<Detection> {
    if classes.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| classes.contains(&d.class_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_geometry() {
        let det = Detection::new(0.0, 0.0, 10.0, 20.0, 0.9, 0);
        assert_eq!(det.area(), 200.0);
        assert!(det.is_valid());
        assert!(!Detection::new(10.0, 0.0, 10.0, 20.0, 0.9, 0).is_valid());
    }

    #[test]
    fn test_iou() {
        let a = Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 0);
        let b = Detection::new(5.0, 5.0, 15.0, 15.0, 0.8, 0);
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-5);

        let disjoint = Detection::new(20.0, 20.0, 30.0, 30.0, 0.8, 0);
        assert_eq!(a.iou(&disjoint), 0.0);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            Detection::new(1.0, 1.0, 11.0, 11.0, 0.8, 0),
            Detection::new(20.0, 20.0, 30.0, 30.0, 0.7, 1),
        ];

        let kept = apply_nms(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn test_confidence_filter() {
        let detections = vec![
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.3, 1),
        ];
        let kept = filter_by_confidence(detections, 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, 0);
    }

    #[test]
    fn test_class_allowlist() {
        let detections = vec![
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 0),
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 2),
            Detection::new(0.0, 0.0, 10.0, 10.0, 0.9, 7),
        ];

        let all = filter_by_class(detections.clone(), &[]);
        assert_eq!(all.len(), 3);

        let filtered = filter_by_class(detections, &[0, 7]);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|d| d.class_id == 0 || d.class_id == 7));
    }
}
