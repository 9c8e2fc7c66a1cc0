//! Detection-to-tracklet association
//!
//! Builds an IoU cost matrix and solves the linear assignment with
//! lapjv. Matches at or below the IoU threshold are rejected and fall
//! back to the unmatched sets.

use crate::detect::Detection;
use lapjv::{lapjv, Matrix};

/// IoU between two `[x1, y1, x2, y2]` boxes.
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if intersection <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Outcome of one association round. Pairs are `(detection, tracklet)`
/// indices.
pub struct Association {
    pub matched: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracklets: Vec<usize>,
}

/// Assign detections to predicted tracklet boxes, maximizing total IoU.
/// Acceptance is strict: a pair survives only when `iou > iou_threshold`.
pub fn associate(
    detections: &[Detection],
    predictions: &[[f64; 4]],
    iou_threshold: f64,
) -> Association {
    if detections.is_empty() || predictions.is_empty() {
        return Association {
            matched: Vec::new(),
            unmatched_detections: (0..detections.len()).collect(),
            unmatched_tracklets: (0..predictions.len()).collect(),
        };
    }

    let det_boxes: Vec<[f64; 4]> = detections
        .iter()
        .map(|d| [d.x1 as f64, d.y1 as f64, d.x2 as f64, d.y2 as f64])
        .collect();

    // lapjv wants a square matrix; pad with zero-cost filler cells.
    // Real pairs cost -IoU, so genuine overlap always beats filler.
    let dims = detections.len().max(predictions.len());
    let costs = Matrix::from_shape_fn((dims, dims), |(d, t)| {
        if d < det_boxes.len() && t < predictions.len() {
            -iou(&det_boxes[d], &predictions[t])
        } else {
            0.0
        }
    });

    let Ok((row_assignments, _)) = lapjv(&costs) else {
        return Association {
            matched: Vec::new(),
            unmatched_detections: (0..detections.len()).collect(),
            unmatched_tracklets: (0..predictions.len()).collect(),
        };
    };

    let mut matched = Vec::new();
    let mut matched_tracklets = vec![false; predictions.len()];
    let mut unmatched_detections = Vec::new();

    for (d, &t) in row_assignments.iter().enumerate().take(detections.len()) {
        if t < predictions.len() && iou(&det_boxes[d], &predictions[t]) > iou_threshold {
            matched.push((d, t));
            matched_tracklets[t] = true;
        } else {
            unmatched_detections.push(d);
        }
    }

    let unmatched_tracklets = (0..predictions.len())
        .filter(|&t| !matched_tracklets[t])
        .collect();

    Association {
        matched,
        unmatched_detections,
        unmatched_tracklets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(x1, y1, x2, y2, 0.9, 0)
    }

    #[test]
    fn test_iou_identity_and_disjoint() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&a, &a) - 1.0).abs() < 1e-12);

        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_association_prefers_best_overlap() {
        let detections = vec![det(0.0, 0.0, 10.0, 10.0), det(100.0, 100.0, 110.0, 110.0)];
        let predictions = vec![[101.0, 101.0, 111.0, 111.0], [1.0, 1.0, 11.0, 11.0]];

        let result = associate(&detections, &predictions, 0.3);
        let mut matched = result.matched.clone();
        matched.sort();
        assert_eq!(matched, vec![(0, 1), (1, 0)]);
        assert!(result.unmatched_detections.is_empty());
        assert!(result.unmatched_tracklets.is_empty());
    }

    #[test]
    fn test_low_overlap_rejected() {
        let detections = vec![det(0.0, 0.0, 10.0, 10.0)];
        let predictions = vec![[9.0, 9.0, 19.0, 19.0]];

        // IoU = 1/199, well under threshold
        let result = associate(&detections, &predictions, 0.3);
        assert!(result.matched.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
        assert_eq!(result.unmatched_tracklets, vec![0]);
    }

    #[test]
    fn test_iou_equal_to_threshold_rejected() {
        // Half-overlapping boxes: IoU exactly 1/3
        let detections = vec![det(0.0, 0.0, 10.0, 10.0)];
        let predictions = vec![[5.0, 0.0, 15.0, 10.0]];

        let threshold = iou(&[0.0, 0.0, 10.0, 10.0], &predictions[0]);
        let result = associate(&detections, &predictions, threshold);
        assert!(result.matched.is_empty());

        let result = associate(&detections, &predictions, threshold - 1e-9);
        assert_eq!(result.matched.len(), 1);
    }

    #[test]
    fn test_rectangular_problems() {
        // More detections than tracklets
        let detections = vec![
            det(0.0, 0.0, 10.0, 10.0),
            det(50.0, 50.0, 60.0, 60.0),
            det(200.0, 200.0, 210.0, 210.0),
        ];
        let predictions = vec![[0.0, 0.0, 10.0, 10.0]];

        let result = associate(&detections, &predictions, 0.3);
        assert_eq!(result.matched, vec![(0, 0)]);
        assert_eq!(result.unmatched_detections, vec![1, 2]);
        assert!(result.unmatched_tracklets.is_empty());

        // More tracklets than detections
        let result = associate(&detections[..1], &[[0.0, 0.0, 10.0, 10.0], [90.0, 90.0, 99.0, 99.0]], 0.3);
        assert_eq!(result.matched, vec![(0, 0)]);
        assert_eq!(result.unmatched_tracklets, vec![1]);
    }

    #[test]
    fn test_empty_inputs() {
        let result = associate(&[], &[[0.0, 0.0, 1.0, 1.0]], 0.3);
        assert!(result.matched.is_empty());
        assert_eq!(result.unmatched_tracklets, vec![0]);

        let result = associate(&[det(0.0, 0.0, 1.0, 1.0)], &[], 0.3);
        assert!(result.matched.is_empty());
        assert_eq!(result.unmatched_detections, vec![0]);
    }
}
