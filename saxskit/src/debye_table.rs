//! Precomputed `sin(qd)/(qd)` lookup table on the shared (q, d) grid.

use crate::axis::Axis;
use crate::convert;
use ndarray::Array2;
use std::sync::OnceLock;

/// Threshold below which the sinc is evaluated by its Taylor expansion;
/// keeps the table monotone through the small-argument bins.
const TAYLOR_CUTOFF: f64 = 0.05;

/// `sin(x)/x` with the removable singularity filled in.
#[must_use]
pub fn sinc(x: f64) -> f64 {
    if x.abs() < TAYLOR_CUTOFF {
        let x2 = x * x;
        x2.mul_add(x2 / 120.0, 1.0 - x2 / 6.0)
    } else {
        x.sin() / x
    }
}

/// Lookup table `T[k, i] = sinc(q_k * d_i)`.
///
/// Distances use rounding binning, so the d-grid points sit at integer
/// multiples of the bin width and the `d = 0` column is exactly one.
/// Immutable after construction.
#[derive(Clone, Debug)]
pub struct DebyeTable {
    q_axis: Axis,
    d_axis: Axis,
    d_values: Vec<f64>,
    table: Array2<f64>,
}

impl DebyeTable {
    /// Builds the table for the given axes.
    #[must_use]
    pub fn new(q_axis: Axis, d_axis: Axis) -> Self {
        let width = d_axis.width();
        let d_values: Vec<f64> = (0..d_axis.bins)
            .map(|i| convert::bin_distance(i, width))
            .collect();
        let q_values = q_axis.values();

        let mut table = Array2::ones((q_axis.bins, d_axis.bins));
        for (k, &q) in q_values.iter().enumerate() {
            // column 0 stays at 1
            for (i, &d) in d_values.iter().enumerate().skip(1) {
                table[[k, i]] = sinc(q * d);
            }
        }

        Self {
            q_axis,
            d_axis,
            d_values,
            table,
        }
    }

    /// The q-axis of the table.
    #[must_use]
    pub const fn q_axis(&self) -> &Axis {
        &self.q_axis
    }

    /// The d-axis of the table.
    #[must_use]
    pub const fn d_axis(&self) -> &Axis {
        &self.d_axis
    }

    /// The distance-grid points, `d_i = i * width`.
    #[must_use]
    pub fn d_values(&self) -> &[f64] {
        &self.d_values
    }

    /// `sinc(q_k * d_i)`.
    #[must_use]
    pub fn at(&self, q_index: usize, d_index: usize) -> f64 {
        self.table[[q_index, d_index]]
    }

    /// The full `(q, d)` lookup matrix.
    #[must_use]
    pub const fn matrix(&self) -> &Array2<f64> {
        &self.table
    }

    /// The process-wide table on the axes of the global settings, built on
    /// first use and immutable afterwards.
    pub fn global() -> &'static Self {
        static TABLE: OnceLock<DebyeTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let settings = crate::settings::Settings::global();
            Self::new(settings.q_axis(), settings.d_axis())
        })
    }

    /// Contracts per-distance counts against row `q_index`:
    /// `sum_i counts[i] * sinc(q_k d_i)`. Counts shorter than the d-axis
    /// are treated as zero-padded.
    #[must_use]
    pub fn contract(&self, q_index: usize, counts: &[f64]) -> f64 {
        counts
            .iter()
            .zip(self.table.row(q_index))
            .map(|(c, t)| c * t)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn zero_distance_column_is_one() {
        let table = DebyeTable::new(Axis::new(0.01, 1.0, 20), Axis::new(0.0, 50.0, 50));
        for k in 0..20 {
            assert_approx_eq!(f64, table.at(k, 0), 1.0, ulps = 2);
        }
    }

    #[test]
    fn matches_direct_sinc() {
        let q_axis = Axis::new(0.01, 1.0, 20);
        let d_axis = Axis::new(0.0, 50.0, 50);
        let table = DebyeTable::new(q_axis, d_axis);
        let q = q_axis.value_of(7);
        assert_approx_eq!(f64, table.at(7, 10), (q * 10.0).sin() / (q * 10.0), ulps = 4);
    }

    #[test]
    fn taylor_branch_is_continuous() {
        let below = sinc(TAYLOR_CUTOFF - 1e-9);
        let above = sinc(TAYLOR_CUTOFF + 1e-9);
        assert_approx_eq!(f64, below, above, epsilon = 1e-9);
        assert!(below <= 1.0);
    }

    #[test]
    fn contract_sums_weighted_row() {
        let table = DebyeTable::new(Axis::new(0.01, 1.0, 5), Axis::new(0.0, 10.0, 10));
        let mut counts = vec![0.0; 10];
        counts[0] = 2.0;
        counts[3] = 1.0;
        let expected = 2.0 + table.at(2, 3);
        assert_approx_eq!(f64, table.contract(2, &counts), expected, ulps = 4);
    }
}
