//! Tracker behaviour over multi-frame scenarios

use visionflow::detect::Detection;
use visionflow::track::SortTracker;

fn det_at(cx: f32, cy: f32, class_id: i32) -> Detection {
    Detection::new(cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0, 0.9, class_id)
}

#[test]
fn straight_line_motion_keeps_one_identity() {
    let mut tracker = SortTracker::new(1, 3, 0.3);

    let mut published_ids = Vec::new();
    for k in 0..10 {
        let cy = 100.0 + 10.0 * k as f32;
        let records = tracker.track(&[det_at(100.0, cy, 0)]);

        if k == 0 {
            // Creation frame is not published
            assert!(records.is_empty(), "no publication expected on frame 1");
        } else {
            assert_eq!(records.len(), 1, "exactly one record on frame {}", k + 1);
            published_ids.push(records[0].tracker_id);
        }
    }

    // First publication on the second frame, same identifier ever after
    assert_eq!(published_ids.len(), 9);
    assert!(published_ids.iter().all(|&id| id == published_ids[0]));
}

#[test]
fn predicted_boxes_follow_the_motion() {
    let mut tracker = SortTracker::new(1, 3, 0.3);

    let mut last_cy = 0.0;
    for k in 0..10 {
        let cy = 100.0 + 10.0 * k as f32;
        let records = tracker.track(&[det_at(100.0, cy, 0)]);
        if let Some(record) = records.first() {
            last_cy = (record.bounding_box[1] + record.bounding_box[3]) / 2.0;
        }
    }

    // The published state converged near the final measurement
    assert!((last_cy - 190.0).abs() < 10.0, "final cy was {}", last_cy);
}

#[test]
fn crossing_objects_keep_distinct_identities() {
    let mut tracker = SortTracker::new(1, 3, 0.3);

    // Two 20x20 boxes pass each other on offset rows; their mutual IoU
    // stays around 0.08 at closest approach, well under the threshold.
    let mut id_by_label: std::collections::HashMap<i32, i64> = std::collections::HashMap::new();

    for k in 0..10 {
        let a = det_at(100.0 + 10.0 * k as f32, 100.0, 1);
        let b = det_at(190.0 - 10.0 * k as f32, 117.0, 2);
        let records = tracker.track(&[a, b]);

        if k == 0 {
            assert!(records.is_empty());
            continue;
        }

        assert_eq!(records.len(), 2, "both objects published on frame {}", k + 1);
        for record in &records {
            let previous = id_by_label.insert(record.class_label, record.tracker_id);
            if let Some(previous) = previous {
                assert_eq!(
                    previous, record.tracker_id,
                    "identity swap for label {} on frame {}",
                    record.class_label,
                    k + 1
                );
            }
        }
    }

    assert_eq!(id_by_label.len(), 2);
    let ids: Vec<i64> = id_by_label.values().copied().collect();
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn detection_gap_ages_out_and_renews_identity() {
    let mut tracker = SortTracker::new(1, 3, 0.3);

    let mut established_id = None;
    for _ in 0..5 {
        let records = tracker.track(&[det_at(100.0, 100.0, 0)]);
        if let Some(record) = records.first() {
            established_id = Some(record.tracker_id);
        }
    }
    let established_id = established_id.expect("track was published");
    assert_eq!(tracker.tracklet_count(), 1);

    // First gap frame: aged but retained
    assert!(tracker.track(&[]).is_empty());
    assert_eq!(tracker.tracklet_count(), 1);

    // Second gap frame: exceeds max_age, deleted
    assert!(tracker.track(&[]).is_empty());
    assert_eq!(tracker.tracklet_count(), 0);

    // Resumption creates a fresh identity; with the start-of-run grace
    // window long gone it must re-earn min_hits before publishing
    assert!(tracker.track(&[det_at(100.0, 100.0, 0)]).is_empty());
    assert!(tracker.track(&[det_at(100.0, 100.0, 0)]).is_empty());
    let records = tracker.track(&[det_at(100.0, 100.0, 0)]);
    assert_eq!(records.len(), 1);
    assert_ne!(records[0].tracker_id, established_id);
}

#[test]
fn replayed_sequence_yields_identical_identifiers() {
    let frames: Vec<Vec<Detection>> = (0..8)
        .map(|k| {
            vec![
                det_at(50.0 + 5.0 * k as f32, 50.0, 0),
                det_at(300.0, 200.0 + 8.0 * k as f32, 1),
            ]
        })
        .collect();

    let run = |frames: &[Vec<Detection>]| -> Vec<Vec<i64>> {
        let mut tracker = SortTracker::new(3, 2, 0.3);
        frames
            .iter()
            .map(|dets| {
                let mut ids: Vec<i64> =
                    tracker.track(dets).iter().map(|r| r.tracker_id).collect();
                ids.sort();
                ids
            })
            .collect()
    };

    let first = run(&frames);
    let second = run(&frames);
    assert_eq!(first, second);
}

#[test]
fn empty_frames_only_never_publish() {
    let mut tracker = SortTracker::new(1, 3, 0.3);
    for _ in 0..20 {
        assert!(tracker.track(&[]).is_empty());
    }
    assert_eq!(tracker.tracklet_count(), 0);
}
