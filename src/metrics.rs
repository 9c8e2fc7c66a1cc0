//! Process-wide stage-timing registry
//!
//! Workers record elapsed milliseconds under named stages, optionally
//! tagged with a camera id. The registry is initialised on first use and
//! flushed (reported) when the engine stops.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

pub const STAGE_CLIP_RETRIEVAL: &str = "clip_retrieval";
pub const STAGE_FRAME_SAMPLING: &str = "frame_sampling";
pub const STAGE_OBJECT_DETECTION: &str = "clip_object_detection";
pub const STAGE_TOTAL_PROCESSING: &str = "clip_total_processing";
pub const STAGE_ENCODER_PREPROCESS: &str = "clip_preprocess";
pub const STAGE_ENCODER_POSTPROCESS: &str = "clip_postprocess";

/// Aggregated timing samples for one stage key.
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    pub count: usize,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    samples: Vec<f64>,
}

impl StageMetrics {
    fn add_sample(&mut self, duration_ms: f64) {
        if self.count == 0 {
            self.min_ms = duration_ms;
            self.max_ms = duration_ms;
        } else {
            self.min_ms = self.min_ms.min(duration_ms);
            self.max_ms = self.max_ms.max(duration_ms);
        }
        self.count += 1;
        self.total_ms += duration_ms;
        self.samples.push(duration_ms);
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn percentile_ms(&self, percentile: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = (percentile * sorted.len() as f64) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

/// Process-wide registry; use [`registry`] to reach the singleton.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    stages: Mutex<HashMap<String, StageMetrics>>,
}

impl MetricsRegistry {
    /// Record one timing sample. A non-empty `camera_id` records under
    /// both `camera_id:stage` and the bare stage key.
    pub fn record(&self, stage: &str, duration_ms: f64, camera_id: &str) {
        let mut stages = match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if camera_id.is_empty() {
            stages.entry(stage.to_string()).or_default().add_sample(duration_ms);
        } else {
            stages
                .entry(format!("{}:{}", camera_id, stage))
                .or_default()
                .add_sample(duration_ms);
            stages.entry(stage.to_string()).or_default().add_sample(duration_ms);
        }
    }

    pub fn get(&self, stage: &str, camera_id: &str) -> StageMetrics {
        let stages = match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let key = if camera_id.is_empty() {
            stage.to_string()
        } else {
            format!("{}:{}", camera_id, stage)
        };
        stages.get(&key).cloned().unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut stages) = self.stages.lock() {
            stages.clear();
        }
    }

    /// Multi-line aggregate report over every recorded stage key.
    pub fn report(&self) -> String {
        let stages = match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut keys: Vec<&String> = stages.keys().collect();
        keys.sort();

        let mut report = String::from("=== Pipeline timing report ===\n");
        for key in keys {
            let m = &stages[key];
            if m.count == 0 {
                continue;
            }
            report.push_str(&format!(
                "{}: count={} total={:.1}ms min={:.2}ms max={:.2}ms mean={:.2}ms p50={:.2}ms p95={:.2}ms p99={:.2}ms\n",
                key,
                m.count,
                m.total_ms,
                m.min_ms,
                m.max_ms,
                m.mean_ms(),
                m.percentile_ms(0.50),
                m.percentile_ms(0.95),
                m.percentile_ms(0.99),
            ));
        }
        report
    }
}

/// Singleton accessor, initialised at first use.
pub fn registry() -> &'static MetricsRegistry {
    static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();
    REGISTRY.get_or_init(MetricsRegistry::default)
}

/// Timing span that commits its elapsed sample on every exit path.
pub struct ScopedTimer {
    stage: &'static str,
    camera_id: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(stage: &'static str, camera_id: &str) -> Self {
        Self {
            stage,
            camera_id: camera_id.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        registry().record(self.stage, self.elapsed_ms(), &self.camera_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_aggregates() {
        let reg = MetricsRegistry::default();
        for ms in [10.0, 20.0, 30.0, 40.0] {
            reg.record("stage_a", ms, "");
        }

        let m = reg.get("stage_a", "");
        assert_eq!(m.count, 4);
        assert_eq!(m.total_ms, 100.0);
        assert_eq!(m.min_ms, 10.0);
        assert_eq!(m.max_ms, 40.0);
        assert_eq!(m.mean_ms(), 25.0);
        assert_eq!(m.percentile_ms(0.50), 30.0);
        assert_eq!(m.percentile_ms(0.99), 40.0);
    }

    #[test]
    fn test_camera_tagging_records_both_keys() {
        let reg = MetricsRegistry::default();
        reg.record("stage_b", 5.0, "cam_1");
        reg.record("stage_b", 7.0, "cam_2");

        assert_eq!(reg.get("stage_b", "").count, 2);
        assert_eq!(reg.get("stage_b", "cam_1").count, 1);
        assert_eq!(reg.get("stage_b", "cam_2").count, 1);
        assert_eq!(reg.get("stage_b", "cam_3").count, 0);
    }

    #[test]
    fn test_scoped_timer_records_on_drop() {
        let before = registry().get("timer_test_stage", "").count;
        {
            let _timer = ScopedTimer::new("timer_test_stage", "");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        let after = registry().get("timer_test_stage", "");
        assert_eq!(after.count, before + 1);
        assert!(after.max_ms >= 2.0);
    }

    #[test]
    fn test_report_contains_stages() {
        let reg = MetricsRegistry::default();
        reg.record(STAGE_FRAME_SAMPLING, 1.0, "cam_9");
        let report = reg.report();
        assert!(report.contains("frame_sampling"));
        assert!(report.contains("cam_9:frame_sampling"));
        assert!(report.contains("p95"));
    }

    #[test]
    fn test_empty_metrics() {
        let m = StageMetrics::default();
        assert_eq!(m.mean_ms(), 0.0);
        assert_eq!(m.percentile_ms(0.95), 0.0);
    }
}
