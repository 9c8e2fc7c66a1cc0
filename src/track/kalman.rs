//! Constant-velocity Kalman filter over the box state
//!
//! State is 7-dimensional `(cx, cy, s, r, cx', cy', s')` with a
//! 4-dimensional `(cx, cy, s, r)` measurement; `s` is box area and `r`
//! the aspect ratio, which is held constant by the motion model.

use nalgebra::{DMatrix, DVector};

pub const DIM_X: usize = 7;
pub const DIM_Z: usize = 4;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    /// State transition matrix
    f: DMatrix<f64>,
    /// Measurement matrix
    h: DMatrix<f64>,
    /// Process noise covariance
    q: DMatrix<f64>,
    /// Measurement noise covariance
    r: DMatrix<f64>,
    /// State covariance
    p: DMatrix<f64>,
    /// State vector
    pub x: DVector<f64>,
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut f = DMatrix::<f64>::identity(DIM_X, DIM_X);
        f[(0, 4)] = 1.0;
        f[(1, 5)] = 1.0;
        f[(2, 6)] = 1.0;

        let mut h = DMatrix::<f64>::zeros(DIM_Z, DIM_X);
        for i in 0..DIM_Z {
            h[(i, i)] = 1.0;
        }

        // Center measurements are trusted; area and ratio less so.
        let mut r = DMatrix::<f64>::identity(DIM_Z, DIM_Z);
        r[(2, 2)] = 10.0;
        r[(3, 3)] = 10.0;

        // Unobservable initial velocities get a very wide prior.
        let mut p = DMatrix::<f64>::identity(DIM_X, DIM_X) * 10.0;
        for i in DIM_Z..DIM_X {
            p[(i, i)] = 10000.0;
        }

        let mut q = DMatrix::<f64>::identity(DIM_X, DIM_X);
        q[(4, 4)] = 0.01;
        q[(5, 5)] = 0.01;
        q[(6, 6)] = 0.0001;

        Self {
            f,
            h,
            q,
            r,
            p,
            x: DVector::<f64>::zeros(DIM_X),
        }
    }

    /// Advance the state one step: `x = F x`, `P = F P Fᵀ + Q`.
    pub fn predict(&mut self) {
        self.x = &self.f * &self.x;
        self.p = &self.f * &self.p * self.f.transpose() + &self.q;
    }

    /// Fold in a measurement: standard Kalman correction.
    pub fn update(&mut self, z: &DVector<f64>) {
        let y = z - &self.h * &self.x;
        let s = &self.h * &self.p * self.h.transpose() + &self.r;
        let Some(s_inv) = s.try_inverse() else {
            // Singular innovation covariance; skip the correction.
            return;
        };
        let k = &self.p * self.h.transpose() * s_inv;

        self.x += &k * y;
        let i = DMatrix::<f64>::identity(DIM_X, DIM_X);
        self.p = (i - &k * &self.h) * &self.p;
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_applies_velocity() {
        let mut kf = KalmanFilter::new();
        kf.x[0] = 100.0;
        kf.x[1] = 50.0;
        kf.x[4] = 3.0;
        kf.x[5] = -2.0;

        kf.predict();

        assert!((kf.x[0] - 103.0).abs() < 1e-9);
        assert!((kf.x[1] - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_pulls_state_toward_measurement() {
        let mut kf = KalmanFilter::new();
        kf.x[0] = 100.0;
        kf.x[1] = 100.0;
        kf.x[2] = 400.0;
        kf.x[3] = 1.0;

        let z = DVector::from_vec(vec![110.0, 90.0, 400.0, 1.0]);
        kf.update(&z);

        assert!(kf.x[0] > 100.0 && kf.x[0] <= 110.0);
        assert!(kf.x[1] < 100.0 && kf.x[1] >= 90.0);
    }

    #[test]
    fn test_repeated_measurements_converge() {
        let mut kf = KalmanFilter::new();
        kf.x[0] = 0.0;
        kf.x[1] = 0.0;
        kf.x[2] = 100.0;
        kf.x[3] = 1.0;

        let z = DVector::from_vec(vec![50.0, 50.0, 100.0, 1.0]);
        for _ in 0..20 {
            kf.predict();
            kf.update(&z);
        }

        assert!((kf.x[0] - 50.0).abs() < 1.0);
        assert!((kf.x[1] - 50.0).abs() < 1.0);
    }
}
