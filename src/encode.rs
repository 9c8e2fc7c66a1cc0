//! ONNX Runtime image encoder
//!
//! Turns cropped object images into unit-norm embedding vectors. The
//! model file is loaded once at engine start; the embedding dimension is
//! whatever the model emits.

use crate::clip::Frame;
use crate::config::EncoderConfig;
use crate::error::{VisionError, VisionResult};
use crate::metrics::{ScopedTimer, STAGE_ENCODER_POSTPROCESS, STAGE_ENCODER_PREPROCESS};
use ndarray::Array4;
use opencv::core::{Rect, Size, Vec3f};
use opencv::imgproc;
use opencv::prelude::*;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::info;

const NORM_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const NORM_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];
const NORM_FLOOR: f32 = 1e-6;

/// Per-crop embedding oracle. Called from the analysis worker only.
pub trait ImageEncoder: Send {
    /// Returns a unit-norm vector, or an empty vector for unusable input.
    fn encode(&mut self, image: &Frame) -> VisionResult<Vec<f32>>;
}

pub struct ClipImageEncoder {
    session: Session,
    input_name: String,
    target_size: i32,
}

impl ClipImageEncoder {
    pub fn new(config: &EncoderConfig) -> VisionResult<Self> {
        if !config.model_path.exists() {
            return Err(VisionError::ModelLoad(config.model_path.clone()));
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.number_of_threads)?
            .commit_from_file(&config.model_path)
            .map_err(|_| VisionError::ModelLoad(config.model_path.clone()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| VisionError::Model("Encoder model has no inputs".to_string()))?;

        let target_size = session
            .inputs
            .first()
            .and_then(|i| i.input_type.tensor_dimensions().map(|d| d.to_vec()))
            .filter(|dims| dims.len() == 4 && dims[2] > 0)
            .map(|dims| dims[2] as i32)
            .ok_or_else(|| {
                VisionError::Model("Expected a 4D input tensor for the image encoder".to_string())
            })?;

        if config.is_fp16 {
            info!("Encoder declared fp16; precision handling is left to the runtime graph");
        }

        info!(
            "Image encoder loaded from {} (target size {}x{})",
            config.model_path.display(),
            target_size,
            target_size
        );

        Ok(Self {
            session,
            input_name,
            target_size,
        })
    }

    /// BGR→RGB, shorter side to target size, center crop, [0,1] scaling
    /// and per-channel normalization, CHW layout.
    fn preprocess(&self, image: &Frame) -> VisionResult<Array4<f32>> {
        let _timer = ScopedTimer::new(STAGE_ENCODER_PREPROCESS, "");

        let mut rgb = Mat::default();
        imgproc::cvt_color(image, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let h = rgb.rows();
        let w = rgb.cols();
        let (new_w, new_h) = if h < w {
            (
                (self.target_size as f32 * w as f32 / h as f32) as i32,
                self.target_size,
            )
        } else {
            (
                self.target_size,
                (self.target_size as f32 * h as f32 / w as f32) as i32,
            )
        };

        let mut resized = Mat::default();
        imgproc::resize(
            &rgb,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_CUBIC,
        )?;

        let top = (resized.rows() - self.target_size) / 2;
        let left = (resized.cols() - self.target_size) / 2;
        let crop = Rect::new(left, top, self.target_size, self.target_size);
        let cropped = Mat::roi(&resized, crop)?.try_clone()?;

        let mut scaled = Mat::default();
        cropped.convert_to(&mut scaled, opencv::core::CV_32FC3, 1.0 / 255.0, 0.0)?;

        let size = self.target_size as usize;
        let pixels = scaled.data_typed::<Vec3f>()?;

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let px = pixels[y * size + x];
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (px[c] - NORM_MEAN[c]) / NORM_STD[c];
                }
            }
        }

        Ok(tensor)
    }
}

impl ImageEncoder for ClipImageEncoder {
    fn encode(&mut self, image: &Frame) -> VisionResult<Vec<f32>> {
        if image.empty() || image.rows() == 0 || image.cols() == 0 {
            return Ok(Vec::new());
        }

        let tensor = self.preprocess(image)?;
        let input = Value::from_array(tensor)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| VisionError::Model(format!("Encoder run failed: {}", e)))?;

        let _timer = ScopedTimer::new(STAGE_ENCODER_POSTPROCESS, "");

        let mut values = outputs.values();
        let first = values
            .next()
            .ok_or_else(|| VisionError::Model("Encoder produced no outputs".to_string()))?;
        let array = first
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::Model(format!("Encoder output extraction failed: {}", e)))?;

        let embedding: Vec<f32> = array.iter().copied().collect();
        Ok(l2_normalize(embedding))
    }
}

/// L2-normalize in place; vectors with norm at or below the floor are
/// returned unchanged.
pub fn l2_normalize(mut embedding: Vec<f32>) -> Vec<f32> {
    let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > NORM_FLOOR {
        for v in &mut embedding {
            *v /= norm;
        }
    }
    embedding
}
