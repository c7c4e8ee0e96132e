//! Natural cubic spline interpolation.
//!
//! Used to move the model profile from the module q-axis onto the
//! experimental q grid.

use crate::error::{Error, Result};

/// A natural cubic spline through a set of knots.
#[derive(Clone, Debug)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    second: Vec<f64>,
}

impl CubicSpline {
    /// Fits the spline through `(x, y)`; `x` must be strictly increasing
    /// with at least two knots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on malformed knots.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::InvalidInput(format!(
                "knot columns disagree: {} vs {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < 2 {
            return Err(Error::InvalidInput(
                "a spline needs at least two knots".into(),
            ));
        }
        if x.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(Error::InvalidInput(
                "spline knots must be strictly increasing".into(),
            ));
        }

        // tridiagonal solve for the interior second derivatives; the
        // natural boundary keeps both ends at zero
        let n = x.len();
        let mut second = vec![0.0; n];
        let mut scratch = vec![0.0; n];
        for i in 1..n - 1 {
            let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
            let p = sig.mul_add(second[i - 1], 2.0);
            second[i] = (sig - 1.0) / p;
            let slope_right = (y[i + 1] - y[i]) / (x[i + 1] - x[i]);
            let slope_left = (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
            scratch[i] = (6.0 * (slope_right - slope_left) / (x[i + 1] - x[i - 1])
                - sig * scratch[i - 1])
                / p;
        }
        for i in (1..n - 1).rev() {
            second[i] = second[i].mul_add(second[i + 1], scratch[i]);
        }
        second[0] = 0.0;
        second[n - 1] = 0.0;

        Ok(Self { x, y, second })
    }

    /// Evaluates the spline at `t`; outside the knot range the boundary
    /// cubic is extended.
    #[must_use]
    pub fn evaluate(&self, t: f64) -> f64 {
        let n = self.x.len();
        let hi = self
            .x
            .partition_point(|&knot| knot < t)
            .clamp(1, n - 1);
        let lo = hi - 1;

        let h = self.x[hi] - self.x[lo];
        let a = (self.x[hi] - t) / h;
        let b = (t - self.x[lo]) / h;
        a * self.y[lo]
            + b * self.y[hi]
            + ((a * a * a - a) * self.second[lo] + (b * b * b - b) * self.second[hi]) * h * h
                / 6.0
    }

    /// Evaluates the spline at every point of `ts`.
    #[must_use]
    pub fn evaluate_all(&self, ts: &[f64]) -> Vec<f64> {
        ts.iter().map(|&t| self.evaluate(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn interpolates_through_the_knots() {
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let y = vec![1.0, 2.0, 0.5, 3.0];
        let spline = CubicSpline::new(x.clone(), y.clone()).unwrap();
        for (&xi, &yi) in x.iter().zip(&y) {
            assert_approx_eq!(f64, spline.evaluate(xi), yi, epsilon = 1e-12);
        }
    }

    #[test]
    fn reproduces_a_straight_line_exactly() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&x| 3.0_f64.mul_add(x, -1.0)).collect();
        let spline = CubicSpline::new(x, y).unwrap();
        assert_approx_eq!(f64, spline.evaluate(4.5), 12.5, epsilon = 1e-10);
        assert_approx_eq!(f64, spline.evaluate(0.25), -0.25, epsilon = 1e-10);
    }

    #[test]
    fn approximates_a_smooth_curve() {
        let x: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&x| x.sin()).collect();
        let spline = CubicSpline::new(x, y).unwrap();
        assert_approx_eq!(f64, spline.evaluate(1.234), 1.234_f64.sin(), epsilon = 1e-4);
    }

    #[test]
    fn rejects_malformed_knots() {
        assert!(CubicSpline::new(vec![0.0], vec![1.0]).is_err());
        assert!(CubicSpline::new(vec![0.0, 0.0], vec![1.0, 2.0]).is_err());
        assert!(CubicSpline::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }
}
