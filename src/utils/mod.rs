//! Frame utilities

use crate::clip::Frame;
use opencv::core::{Mat, Rect};
use opencv::prelude::*;

/// Crop a detection box out of a frame with padding, clamped to the
/// image bounds. Returns `None` when the clamped region is degenerate.
pub fn crop_object(frame: &Frame, x1: f32, y1: f32, x2: f32, y2: f32, padding: i32) -> Option<Mat> {
    let h = frame.rows();
    let w = frame.cols();

    let x1 = (x1.max(0.0) as i32).min(w);
    let y1 = (y1.max(0.0) as i32).min(h);
    let x2 = (x2 as i32).clamp(0, w);
    let y2 = (y2 as i32).clamp(0, h);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let x1 = (x1 - padding).max(0);
    let y1 = (y1 - padding).max(0);
    let x2 = (x2 + padding).min(w);
    let y2 = (y2 + padding).min(h);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let roi = Rect::new(x1, y1, x2 - x1, y2 - y1);
    let cropped = Mat::roi(frame, roi).ok()?.try_clone().ok()?;

    if cropped.empty() {
        return None;
    }

    Some(cropped)
}
