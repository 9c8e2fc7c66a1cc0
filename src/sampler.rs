//! Frame sampling policies
//!
//! Reduces a clip's dense frame list to the small set fed to the oracles.

use crate::clip::Clip;
use crate::config::Config;
use crate::error::{VisionError, VisionResult};
use opencv::prelude::*;

/// A sampling policy. Stateless; mutates `clip.sampled_frames` only.
pub trait FrameSampler: Send {
    fn sample(&self, clip: &mut Clip, n: usize);
}

/// Evenly spaced selection. The first and last frames are always kept
/// when two or more frames are requested.
pub struct UniformSampler;

impl FrameSampler for UniformSampler {
    fn sample(&self, clip: &mut Clip, n: usize) {
        clip.sampled_frames.clear();

        if clip.frames.is_empty() || n == 0 {
            return;
        }

        let total = clip.frames.len();
        let n = n.min(total);

        if n == 1 {
            if let Ok(frame) = clip.frames[total / 2].try_clone() {
                clip.sampled_frames.push(frame);
            }
            return;
        }

        let step = (total - 1) as f64 / (n - 1) as f64;
        for i in 0..n {
            let index = (i as f64 * step) as usize;
            if let Ok(frame) = clip.frames[index].try_clone() {
                clip.sampled_frames.push(frame);
            }
        }
    }
}

/// Build the sampler named by `sampler_type`.
pub fn build_sampler(config: &Config) -> VisionResult<Box<dyn FrameSampler>> {
    match config.sampler_type.as_str() {
        "uniform" => Ok(Box::new(UniformSampler)),
        other => Err(VisionError::InvalidConfigValue {
            field: "sampler_type".to_string(),
            value: other.to_string(),
        }),
    }
}
