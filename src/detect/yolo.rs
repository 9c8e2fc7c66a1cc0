//! ONNX Runtime object detector
//!
//! Loads a YOLO-family model once at engine start and produces per-frame
//! detections in frame-pixel coordinates. Preprocessing/inference
//! failures surface as [`VisionError::Model`]; the analysis worker treats
//! those frames as empty.

use crate::clip::Frame;
use crate::config::DetectorConfig;
use crate::detect::{apply_nms, filter_by_class, filter_by_confidence, Detection, ObjectDetector};
use crate::error::{VisionError, VisionResult};
use ndarray::Array4;
use opencv::core::{Size, Vec3f};
use opencv::prelude::*;
use opencv::imgproc;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::{info, warn};

pub struct YoloDetector {
    session: Session,
    input_name: String,
    input_width: i32,
    input_height: i32,
    classes: Vec<i32>,
}

impl YoloDetector {
    /// Load the model file and resolve the session's input geometry.
    pub fn new(config: &DetectorConfig) -> VisionResult<Self> {
        if !config.weights_path.exists() {
            return Err(VisionError::ModelLoad(config.weights_path.clone()));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.number_of_threads)?
            .commit_from_file(&config.weights_path)
            .map_err(|_| VisionError::ModelLoad(config.weights_path.clone()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| VisionError::Model("Detector model has no inputs".to_string()))?;

        // NCHW input; fall back to 640 when the model declares dynamic axes.
        let (input_width, input_height) = session
            .inputs
            .first()
            .and_then(|i| i.input_type.tensor_dimensions().map(|d| d.to_vec()))
            .filter(|dims| dims.len() == 4 && dims[2] > 0 && dims[3] > 0)
            .map(|dims| (dims[3] as i32, dims[2] as i32))
            .unwrap_or((640, 640));

        if config.is_fp16 {
            info!("Detector declared fp16; precision handling is left to the runtime graph");
        }

        info!(
            "Detector loaded from {} (input {}x{}, {} allowlisted classes)",
            config.weights_path.display(),
            input_width,
            input_height,
            config.classes.len()
        );

        Ok(Self {
            session,
            input_name,
            input_width,
            input_height,
            classes: config.classes.clone(),
        })
    }

    fn preprocess(&self, frame: &Frame) -> VisionResult<Array4<f32>> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut resized = Mat::default();
        imgproc::resize(
            &rgb,
            &mut resized,
            Size::new(self.input_width, self.input_height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut scaled = Mat::default();
        resized.convert_to(&mut scaled, opencv::core::CV_32FC3, 1.0 / 255.0, 0.0)?;

        let h = self.input_height as usize;
        let w = self.input_width as usize;
        let pixels = scaled.data_typed::<Vec3f>()?;

        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
        for y in 0..h {
            for x in 0..w {
                let px = pixels[y * w + x];
                for c in 0..3 {
                    tensor[[0, c, y, x]] = px[c];
                }
            }
        }

        Ok(tensor)
    }

    /// Decode rows of `[cx, cy, w, h, obj, class scores…]` into
    /// frame-space corner boxes.
    fn decode_output(
        &self,
        output: &[f32],
        rows: usize,
        row_len: usize,
        frame_width: f32,
        frame_height: f32,
        conf_threshold: f32,
    ) -> Vec<Detection> {
        let scale_x = frame_width / self.input_width as f32;
        let scale_y = frame_height / self.input_height as f32;
        let mut detections = Vec::new();

        for i in 0..rows {
            let row = &output[i * row_len..(i + 1) * row_len];

            let objectness = row[4];
            if objectness < conf_threshold {
                continue;
            }

            let mut best_score = 0.0f32;
            let mut best_class = -1i32;
            for (offset, &score) in row[5..].iter().enumerate() {
                if score > best_score {
                    best_score = score;
                    best_class = offset as i32;
                }
            }

            let confidence = objectness * best_score;
            if confidence < conf_threshold {
                continue;
            }

            let cx = row[0] * scale_x;
            let cy = row[1] * scale_y;
            let w = row[2] * scale_x;
            let h = row[3] * scale_y;

            detections.push(Detection::new(
                cx - w * 0.5,
                cy - h * 0.5,
                cx + w * 0.5,
                cy + h * 0.5,
                confidence,
                best_class,
            ));
        }

        detections
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> VisionResult<Vec<Detection>> {
        if frame.empty() {
            return Ok(Vec::new());
        }

        let frame_width = frame.cols() as f32;
        let frame_height = frame.rows() as f32;

        let tensor = self.preprocess(frame)?;
        let input = Value::from_array(tensor)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| VisionError::Model(format!("Detector run failed: {}", e)))?;

        let mut values = outputs.values();
        let first = values
            .next()
            .ok_or_else(|| VisionError::Model("Detector produced no outputs".to_string()))?;
        let array = first
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::Model(format!("Detector output extraction failed: {}", e)))?;

        let shape = array.shape().to_vec();
        if shape.len() != 3 || shape[2] < 6 {
            warn!("Unexpected detector output shape {:?}", shape);
            return Ok(Vec::new());
        }

        let data: Vec<f32> = array.iter().copied().collect();
        let detections = self.decode_output(
            &data,
            shape[1],
            shape[2],
            frame_width,
            frame_height,
            conf_threshold,
        );

        let detections = filter_by_confidence(detections, conf_threshold);
        let detections = apply_nms(detections, nms_threshold);
        Ok(filter_by_class(detections, &self.classes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_weights_rejected() {
        let config = DetectorConfig {
            weights_path: PathBuf::from("/nonexistent/yolo.onnx"),
            number_of_threads: 1,
            conf_threshold: 0.5,
            nms_threshold: 0.45,
            is_fp16: false,
            classes: Vec::new(),
        };

        match YoloDetector::new(&config) {
            Err(VisionError::ModelLoad(path)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/yolo.onnx"));
            }
            _ => panic!("Expected ModelLoad error"),
        }
    }
}
