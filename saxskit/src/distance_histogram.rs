//! The total 1-D distance histogram and its plain Debye transform.

use crate::axis::Axis;
use crate::dataset::ScatteringProfile;
use crate::debye_table::sinc;

/// The total pair-distance distribution of a molecule, with the effective
/// distance of each bin (bin-center corrected under the weighted kernel).
#[derive(Clone, Debug)]
pub struct DistanceHistogram {
    d_axis: Axis,
    counts: Vec<f64>,
    effective_d: Vec<f64>,
}

impl DistanceHistogram {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if `counts` and `effective_d` disagree with the axis bin
    /// count.
    #[must_use]
    pub fn new(d_axis: Axis, counts: Vec<f64>, effective_d: Vec<f64>) -> Self {
        assert_eq!(counts.len(), d_axis.bins);
        assert_eq!(effective_d.len(), d_axis.bins);
        Self {
            d_axis,
            counts,
            effective_d,
        }
    }

    /// The distance axis.
    #[must_use]
    pub const fn axis(&self) -> &Axis {
        &self.d_axis
    }

    /// Accumulated weight per bin.
    #[must_use]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Effective distance per bin.
    #[must_use]
    pub fn effective_d(&self) -> &[f64] {
        &self.effective_d
    }

    /// Sum over all bins; equals the squared total weight of the source
    /// coordinates.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// The plain Debye transform of the histogram, with unit form factors:
    /// `I(q_k) = sum_d counts[d] * sinc(q_k * d_eff[d])`.
    #[must_use]
    pub fn debye_transform(&self, q_axis: &Axis) -> ScatteringProfile {
        let q_values = q_axis.values();
        let intensity = q_values
            .iter()
            .map(|&q| {
                self.counts
                    .iter()
                    .zip(&self.effective_d)
                    .map(|(&count, &d)| count * sinc(q * d))
                    .sum()
            })
            .collect();
        ScatteringProfile::new(q_values, intensity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn transform_of_a_single_atom_is_flat() {
        let axis = Axis::new(0.0, 10.0, 10);
        let mut counts = vec![0.0; 10];
        counts[0] = 36.0; // one carbon: w^2
        let effective_d: Vec<f64> = (0..10).map(f64::from).collect();
        let histogram = DistanceHistogram::new(axis, counts, effective_d);

        let profile = histogram.debye_transform(&Axis::new(0.0, 0.5, 5));
        for &i in profile.intensity() {
            assert_approx_eq!(f64, i, 36.0, ulps = 2);
        }
    }

    #[test]
    fn transform_of_two_atoms_follows_the_debye_formula() {
        let axis = Axis::new(0.0, 20.0, 20);
        let mut counts = vec![0.0; 20];
        counts[0] = 2.0; // two unit-weight self terms
        counts[10] = 2.0; // one cross pair, counted symmetrically
        let effective_d: Vec<f64> = (0..20).map(f64::from).collect();
        let histogram = DistanceHistogram::new(axis, counts, effective_d);

        let q_axis = Axis::new(0.01, 0.5, 50);
        let profile = histogram.debye_transform(&q_axis);
        for (&q, &i) in profile.q().iter().zip(profile.intensity()) {
            let expected = 2.0 * (1.0 + (10.0 * q).sin() / (10.0 * q));
            assert_approx_eq!(f64, i, expected, epsilon = 1e-10);
        }
    }
}
