//! The composite distance histogram: partial tables + form factors +
//! parameters into I(q), with a multi-level result cache.
//!
//! Three intensity strata are tracked independently: atom-atom (which
//! includes every excluded-volume contribution), atom-water, and
//! water-water. Each stratum combines cheap q-space prefactors with cached
//! base sub-profiles; the expensive distance contractions rerun only when
//! the underlying distances change.

use crate::axis::Axis;
use crate::dataset::ScatteringProfile;
use crate::debye_table::{sinc, DebyeTable};
use crate::distance_histogram::DistanceHistogram;
use crate::error::{Error, Result};
use crate::form_factor::{FormFactorTable, FormFactorType};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The free parameters of an intensity evaluation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProfileParams {
    /// Hydration scaling; atom-water counts once, water-water as `cw²`.
    pub cw: f64,
    /// Excluded-volume scaling.
    pub cx: f64,
    /// Solvent density scaling of the excluded-volume form factor.
    pub cr: f64,
    /// Atomic Debye-Waller factor, applied as `exp(-Ba q²)` to every term.
    pub ba: f64,
    /// Excluded-volume Debye-Waller factor, applied to terms with at least
    /// one excluded-volume member.
    pub bx: f64,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            cw: 1.0,
            cx: 1.0,
            cr: 1.0,
            ba: 0.0,
            bx: 0.0,
        }
    }
}

/// Distance-dependent sub-profiles, separated by how many excluded-volume
/// members their terms carry. Recomputed only when distances change.
#[derive(Clone, Debug)]
pub struct BaseProfiles {
    /// Atom-atom terms with no excluded-volume member.
    pub aa_atomic: Vec<f64>,
    /// Atom-atom terms with exactly one excluded-volume member.
    pub aa_cross_exv: Vec<f64>,
    /// The excluded-volume self term.
    pub aa_exv_exv: Vec<f64>,
    /// Atom-water terms (pair symmetry factor folded in).
    pub aw_atomic: Vec<f64>,
    /// Excluded-volume-water terms (pair symmetry factor folded in).
    pub aw_exv: Vec<f64>,
    /// Water-water terms.
    pub ww: Vec<f64>,
}

/// The distance tables a histogram manager hands to the composite.
///
/// `aa` is Debye-ready: same-type cross pairs are accumulated doubled,
/// distinct-type pairs once into the normalized `(i <= j)` slot; the
/// transform applies the symmetry factor 2 to off-diagonal type pairs.
#[derive(Clone, Debug)]
pub struct CompositeParts {
    /// The compact form-factor types of the `aa`/`aw` slots.
    pub types: Vec<FormFactorType>,
    /// Atom-atom counts, `(type, type, d)`.
    pub aa: Array3<f64>,
    /// Atom-water counts, `(type, d)`.
    pub aw: Array2<f64>,
    /// Water-water counts.
    pub ww: Vec<f64>,
    /// Effective distances of the atom-atom bins.
    pub effective_d_aa: Vec<f64>,
    /// Effective distances of the atom-water bins.
    pub effective_d_aw: Vec<f64>,
    /// Effective distances of the water-water bins.
    pub effective_d_ww: Vec<f64>,
}

type ExvRebuild = Arc<dyn Fn(f64) -> Result<CompositeDistanceHistogram> + Send + Sync>;

/// Debye-transform engine over the partial histogram table, with the
/// per-stratum invalidation cache.
#[derive(Clone)]
pub struct CompositeDistanceHistogram {
    q_axis: Axis,
    d_axis: Axis,
    types: Vec<FormFactorType>,
    exv_slot: Option<usize>,
    ff_table: FormFactorTable,
    aa: Array3<f64>,
    aw: Array2<f64>,
    ww: Vec<f64>,
    sin_aa: Array2<f64>,
    sin_aw: Array2<f64>,
    sin_ww: Array2<f64>,
    total: DistanceHistogram,
    params: ProfileParams,
    base: Option<BaseProfiles>,
    cached_aa: Option<Vec<f64>>,
    cached_aw: Option<Vec<f64>>,
    cached_ww: Option<Vec<f64>>,
    exv_rebuild: Option<ExvRebuild>,
}

fn sinc_matrix(q_values: &[f64], effective_d: &[f64]) -> Array2<f64> {
    let mut out = Array2::zeros((q_values.len(), effective_d.len()));
    for (k, &q) in q_values.iter().enumerate() {
        for (i, &d) in effective_d.iter().enumerate() {
            out[[k, i]] = sinc(q * d);
        }
    }
    out
}

// Bins that never saw a bin-center correction sit exactly on the rounding
// grid, so the shared lookup table applies; corrected bins need their own
// sinc evaluations.
fn stratum_matrix(table: &DebyeTable, q_values: &[f64], effective_d: &[f64]) -> Array2<f64> {
    if table.d_values() == effective_d {
        table.matrix().clone()
    } else {
        sinc_matrix(q_values, effective_d)
    }
}

impl CompositeDistanceHistogram {
    /// Assembles the engine from manager output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] when the tables, the axes, and the
    /// form-factor table disagree.
    pub fn new(
        q_axis: Axis,
        d_axis: Axis,
        parts: CompositeParts,
        ff_table: FormFactorTable,
    ) -> Result<Self> {
        let t = parts.types.len();
        let bins = d_axis.bins;

        if *ff_table.q_axis() != q_axis {
            return Err(Error::shape_mismatch(
                format!("form-factor table on {q_axis:?}"),
                format!("{:?}", ff_table.q_axis()),
            ));
        }
        if parts.aa.dim() != (t, t, bins) {
            return Err(Error::shape_mismatch(
                format!("aa counts of shape ({t}, {t}, {bins})"),
                format!("{:?}", parts.aa.dim()),
            ));
        }
        if parts.aw.dim() != (t, bins) {
            return Err(Error::shape_mismatch(
                format!("aw counts of shape ({t}, {bins})"),
                format!("{:?}", parts.aw.dim()),
            ));
        }
        if parts.ww.len() != bins
            || parts.effective_d_aa.len() != bins
            || parts.effective_d_aw.len() != bins
            || parts.effective_d_ww.len() != bins
        {
            return Err(Error::shape_mismatch(
                format!("{bins} distance bins"),
                format!(
                    "ww: {}, d_aa: {}, d_aw: {}, d_ww: {}",
                    parts.ww.len(),
                    parts.effective_d_aa.len(),
                    parts.effective_d_aw.len(),
                    parts.effective_d_ww.len()
                ),
            ));
        }

        let q_values = q_axis.values();
        let shared = DebyeTable::global();
        let local;
        let table = if *shared.q_axis() == q_axis && *shared.d_axis() == d_axis {
            shared
        } else {
            local = DebyeTable::new(q_axis, d_axis);
            &local
        };
        let sin_aa = stratum_matrix(table, &q_values, &parts.effective_d_aa);
        let sin_aw = stratum_matrix(table, &q_values, &parts.effective_d_aw);
        let sin_ww = stratum_matrix(table, &q_values, &parts.effective_d_ww);

        let total = Self::total_of(&parts, d_axis);

        Ok(Self {
            q_axis,
            d_axis,
            exv_slot: parts
                .types
                .iter()
                .position(|&ff| ff == FormFactorType::ExcludedVolume),
            types: parts.types,
            ff_table,
            aa: parts.aa,
            aw: parts.aw,
            ww: parts.ww,
            sin_aa,
            sin_aw,
            sin_ww,
            total,
            params: ProfileParams::default(),
            base: None,
            cached_aa: None,
            cached_aw: None,
            cached_ww: None,
            exv_rebuild: None,
        })
    }

    fn total_of(parts: &CompositeParts, d_axis: Axis) -> DistanceHistogram {
        let t = parts.types.len();
        let bins = d_axis.bins;
        let mut counts = vec![0.0; bins];
        for bin in 0..bins {
            for i in 0..t {
                for j in i..t {
                    let sym = if i == j { 1.0 } else { 2.0 };
                    counts[bin] += sym * parts.aa[[i, j, bin]];
                }
            }
            for row in 0..t {
                counts[bin] += 2.0 * parts.aw[[row, bin]];
            }
            counts[bin] += parts.ww[bin];
        }
        DistanceHistogram::new(d_axis, counts, parts.effective_d_aa.clone())
    }

    /// The q-axis of the evaluation.
    #[must_use]
    pub const fn q_axis(&self) -> &Axis {
        &self.q_axis
    }

    /// The distance axis.
    #[must_use]
    pub const fn d_axis(&self) -> &Axis {
        &self.d_axis
    }

    /// The compact type list of the table slots.
    #[must_use]
    pub fn types(&self) -> &[FormFactorType] {
        &self.types
    }

    /// The total 1-D distance histogram over every stratum.
    #[must_use]
    pub const fn total_histogram(&self) -> &DistanceHistogram {
        &self.total
    }

    /// The parameters of the most recent evaluation.
    #[must_use]
    pub const fn params(&self) -> &ProfileParams {
        &self.params
    }

    /// Installs the rebuild closure of the scalable excluded-volume model.
    pub fn set_exv_rebuild(&mut self, rebuild: ExvRebuild) {
        self.exv_rebuild = Some(rebuild);
    }

    /// Rebuilds the engine with the excluded volume regenerated at `scale`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when no scalable model was
    /// installed, and propagates rebuild failures.
    pub fn scaled_exv(&self, scale: f64) -> Result<Self> {
        let rebuild = self.exv_rebuild.as_ref().ok_or_else(|| {
            Error::Configuration("no scalable excluded-volume model was installed".into())
        })?;
        let mut rebuilt = rebuild(scale)?;
        rebuilt.exv_rebuild = Some(Arc::clone(rebuild));
        Ok(rebuilt)
    }

    /// Evaluates I(q) for `params`, reusing every stratum whose inputs did
    /// not change.
    pub fn evaluate(&mut self, params: ProfileParams) -> ScatteringProfile {
        self.apply_params(params);
        self.refresh();

        let aa = self.cached_aa.as_ref().unwrap();
        let aw = self.cached_aw.as_ref().unwrap();
        let ww = self.cached_ww.as_ref().unwrap();
        let intensity = aa
            .iter()
            .zip(aw)
            .zip(ww)
            .map(|((a, b), c)| a + b + c)
            .collect();
        ScatteringProfile::new(self.q_axis.values(), intensity)
    }

    /// The atom-atom stratum at the current parameters.
    pub fn profile_aa(&mut self) -> ScatteringProfile {
        self.refresh();
        ScatteringProfile::new(self.q_axis.values(), self.cached_aa.clone().unwrap())
    }

    /// The atom-water stratum at the current parameters.
    pub fn profile_aw(&mut self) -> ScatteringProfile {
        self.refresh();
        ScatteringProfile::new(self.q_axis.values(), self.cached_aw.clone().unwrap())
    }

    /// The water-water stratum at the current parameters.
    pub fn profile_ww(&mut self) -> ScatteringProfile {
        self.refresh();
        ScatteringProfile::new(self.q_axis.values(), self.cached_ww.clone().unwrap())
    }

    /// The cached distance-dependent sub-profiles.
    pub fn base_profiles(&mut self) -> &BaseProfiles {
        self.refresh();
        self.base.as_ref().unwrap()
    }

    // Parameter changes invalidate exactly the strata they feed: cw the two
    // water strata, the excluded-volume parameters the two strata carrying
    // excluded-volume terms, Ba everything.
    fn apply_params(&mut self, params: ProfileParams) {
        let old = self.params;
        if params.cw != old.cw {
            self.cached_aw = None;
            self.cached_ww = None;
        }
        if params.cx != old.cx || params.cr != old.cr || params.bx != old.bx {
            self.cached_aa = None;
            self.cached_aw = None;
        }
        if params.ba != old.ba {
            self.cached_aa = None;
            self.cached_aw = None;
            self.cached_ww = None;
        }
        self.params = params;
    }

    fn refresh(&mut self) {
        if self.base.is_none() {
            self.base = Some(self.compute_base());
            self.cached_aa = None;
            self.cached_aw = None;
            self.cached_ww = None;
        }

        let q_values = self.q_axis.values();
        let base = self.base.as_ref().unwrap();
        let p = self.params;
        let scale = p.cx * p.cr;

        if self.cached_aa.is_none() {
            self.cached_aa = Some(
                q_values
                    .iter()
                    .enumerate()
                    .map(|(k, &q)| {
                        let ea = (-p.ba * q * q).exp();
                        let ex = (-p.bx * q * q).exp();
                        ea * scale.mul_add(
                            scale * ex * base.aa_exv_exv[k],
                            scale.mul_add(-(ex * base.aa_cross_exv[k]), base.aa_atomic[k]),
                        )
                    })
                    .collect(),
            );
        }
        if self.cached_aw.is_none() {
            self.cached_aw = Some(
                q_values
                    .iter()
                    .enumerate()
                    .map(|(k, &q)| {
                        let ea = (-p.ba * q * q).exp();
                        let ex = (-p.bx * q * q).exp();
                        ea * p.cw * scale.mul_add(-(ex * base.aw_exv[k]), base.aw_atomic[k])
                    })
                    .collect(),
            );
        }
        if self.cached_ww.is_none() {
            self.cached_ww = Some(
                q_values
                    .iter()
                    .enumerate()
                    .map(|(k, &q)| (-p.ba * q * q).exp() * p.cw * p.cw * base.ww[k])
                    .collect(),
            );
        }
    }

    fn contract_aa(&self, i: usize, j: usize) -> Vec<f64> {
        (0..self.q_axis.bins)
            .map(|k| {
                (0..self.d_axis.bins)
                    .map(|d| self.sin_aa[[k, d]] * self.aa[[i, j, d]])
                    .sum()
            })
            .collect()
    }

    fn compute_base(&self) -> BaseProfiles {
        let q_bins = self.q_axis.bins;
        let t = self.types.len();
        let mut aa_atomic = vec![0.0; q_bins];
        let mut aa_cross_exv = vec![0.0; q_bins];
        let mut aa_exv_exv = vec![0.0; q_bins];
        let mut aw_atomic = vec![0.0; q_bins];
        let mut aw_exv = vec![0.0; q_bins];
        let mut ww = vec![0.0; q_bins];

        for i in 0..t {
            for j in i..t {
                let sym = if i == j { 1.0 } else { 2.0 };
                let contracted = self.contract_aa(i, j);
                let exv_members = usize::from(Some(i) == self.exv_slot)
                    + usize::from(Some(j) == self.exv_slot);
                let target = match exv_members {
                    0 => &mut aa_atomic,
                    1 => &mut aa_cross_exv,
                    _ => &mut aa_exv_exv,
                };
                for k in 0..q_bins {
                    target[k] +=
                        sym * self.ff_table.at(self.types[i], self.types[j], k) * contracted[k];
                }
            }
        }

        for row in 0..t {
            let target: &mut Vec<f64> = if Some(row) == self.exv_slot {
                &mut aw_exv
            } else {
                &mut aw_atomic
            };
            for k in 0..q_bins {
                let contracted: f64 = (0..self.d_axis.bins)
                    .map(|d| self.sin_aw[[k, d]] * self.aw[[row, d]])
                    .sum();
                target[k] += 2.0
                    * self
                        .ff_table
                        .at(self.types[row], FormFactorType::Water, k)
                    * contracted;
            }
        }

        for k in 0..q_bins {
            let contracted: f64 = (0..self.d_axis.bins)
                .map(|d| self.sin_ww[[k, d]] * self.ww[d])
                .sum();
            ww[k] = self
                .ff_table
                .at(FormFactorType::Water, FormFactorType::Water, k)
                * contracted;
        }

        BaseProfiles {
            aa_atomic,
            aa_cross_exv,
            aa_exv_exv,
            aw_atomic,
            aw_exv,
            ww,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_factor::FormFactor;
    use float_cmp::assert_approx_eq;

    // two unit-weight carbons at distance 10
    fn two_carbon_parts(d_axis: Axis) -> CompositeParts {
        let bins = d_axis.bins;
        let mut aa = Array3::zeros((1, 1, bins));
        aa[[0, 0, 0]] = 2.0;
        aa[[0, 0, 10]] = 2.0;
        let effective: Vec<f64> = (0..bins).map(|i| crate::convert::count_f64(i)).collect();
        CompositeParts {
            types: vec![FormFactorType::Carbon],
            aa,
            aw: Array2::zeros((1, bins)),
            ww: vec![0.0; bins],
            effective_d_aa: effective.clone(),
            effective_d_aw: effective.clone(),
            effective_d_ww: effective,
        }
    }

    fn engine() -> CompositeDistanceHistogram {
        let q_axis = Axis::new(0.01, 0.5, 100);
        let d_axis = Axis::new(0.0, 50.0, 50);
        CompositeDistanceHistogram::new(
            q_axis,
            d_axis,
            two_carbon_parts(d_axis),
            FormFactorTable::new(q_axis, 16.44),
        )
        .unwrap()
    }

    #[test]
    fn two_point_profile_matches_the_analytic_debye_sum() {
        let mut engine = engine();
        let profile = engine.evaluate(ProfileParams::default());
        let carbon = FormFactor::normalized(FormFactorType::Carbon);

        for (&q, &i) in profile.q().iter().zip(profile.intensity()) {
            let ff = carbon.evaluate(q);
            let expected = 2.0 * ff * ff * (1.0 + (10.0 * q).sin() / (10.0 * q));
            assert_approx_eq!(f64, i, expected, epsilon = expected * 1e-12);
        }
    }

    #[test]
    fn neutral_parameters_reproduce_the_reference() {
        let mut engine = engine();
        let reference = engine.evaluate(ProfileParams::default());
        let neutral = engine.evaluate(ProfileParams {
            cw: 1.0,
            cx: 1.0,
            cr: 1.0,
            ba: 0.0,
            bx: 0.0,
        });
        for (&a, &b) in reference.intensity().iter().zip(neutral.intensity()) {
            assert_approx_eq!(f64, a, b, ulps = 2);
        }
    }

    #[test]
    fn cached_evaluation_equals_a_fresh_one_for_every_parameter() {
        let tweaks = [
            ProfileParams {
                cw: 0.7,
                ..ProfileParams::default()
            },
            ProfileParams {
                cx: 1.05,
                ..ProfileParams::default()
            },
            ProfileParams {
                cr: 1.5,
                ..ProfileParams::default()
            },
            ProfileParams {
                ba: 2.0,
                ..ProfileParams::default()
            },
            ProfileParams {
                bx: 1.0,
                ..ProfileParams::default()
            },
        ];

        let mut cached = engine();
        cached.evaluate(ProfileParams::default());
        for params in tweaks {
            let from_cache = cached.evaluate(params);
            let fresh = engine().evaluate(params);
            for (&a, &b) in from_cache.intensity().iter().zip(fresh.intensity()) {
                assert_approx_eq!(f64, a, b, epsilon = a.abs() * 1e-14 + 1e-300);
            }
        }
    }

    #[test]
    fn debye_waller_damps_the_curve() {
        let mut engine = engine();
        let plain = engine.evaluate(ProfileParams::default());
        let damped = engine.evaluate(ProfileParams {
            ba: 3.0,
            ..ProfileParams::default()
        });
        for (&a, &b) in plain.intensity().iter().zip(damped.intensity()) {
            assert!(b < a);
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let q_axis = Axis::new(0.01, 0.5, 100);
        let d_axis = Axis::new(0.0, 50.0, 50);
        let mut parts = two_carbon_parts(d_axis);
        parts.ww.pop();
        assert!(matches!(
            CompositeDistanceHistogram::new(
                q_axis,
                d_axis,
                parts,
                FormFactorTable::new(q_axis, 16.44)
            ),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn total_histogram_conserves_the_squared_weight() {
        let engine = engine();
        // two unit weights: (sum w)^2 = 4
        assert_approx_eq!(f64, engine.total_histogram().total(), 4.0, ulps = 4);
    }
}
