//! Least-squares fitting of the model profile against measured curves.
//!
//! Every evaluation first solves the two linear coefficients (overall
//! scale and constant background) in closed form, then the enabled
//! nonlinear parameters are driven by the bounded minimizers.

use crate::axis::{Axis, Limit};
use crate::composite_histogram::{CompositeDistanceHistogram, ProfileParams};
use crate::dataset::{Dataset, SaxsData};
use crate::error::{Error, Result};
use crate::excluded_volume::ExvMethod;
use crate::minimizer::{self, MinimizerResult};
use crate::settings::Settings;
use crate::spline::CubicSpline;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Bounds of the excluded-volume scaling.
pub const CX_LIMIT: Limit = Limit {
    min: 0.92,
    max: 1.08,
};
/// Bounds of the solvent density scaling.
pub const CR_LIMIT: Limit = Limit { min: 0.5, max: 2.0 };
/// Bounds of the hydration scaling.
pub const CW_LIMIT: Limit = Limit {
    min: 0.0,
    max: 10.0,
};
/// Bounds of the Debye-Waller factors.
pub const B_LIMIT: Limit = Limit { min: 0.0, max: 5.0 };

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParamKind {
    Cx,
    Cr,
    Cw,
    Ba,
    Bx,
}

#[derive(Clone, Copy, Debug)]
struct FreeParam {
    kind: ParamKind,
    name: &'static str,
    limit: Limit,
    start: f64,
}

/// One fitted parameter with its symmetric error estimate.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FitParameter {
    /// Parameter name.
    pub name: String,
    /// Fitted value.
    pub value: f64,
    /// Symmetric error from the final curvature; NaN when the curvature
    /// was not positive.
    pub error: f64,
}

/// The outcome of a fit.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct FitResult {
    /// Fitted nonlinear parameters, in fit order.
    pub parameters: Vec<FitParameter>,
    /// Linear overall scale.
    pub scale: f64,
    /// Linear constant background.
    pub background: f64,
    /// Chi-squared at the optimum.
    pub chi2: f64,
    /// Degrees of freedom: data points minus free parameters.
    pub dof: usize,
    /// Iterations spent in the minimizer.
    pub iterations: usize,
    /// Model evaluated on the experimental q grid, scale applied.
    pub fitted: Dataset,
    /// Normalized residuals on the experimental q grid.
    pub residuals: Dataset,
    /// Model on the extended module q grid, scale applied.
    pub extended: Dataset,
}

impl FitResult {
    /// Reduced chi-squared.
    #[must_use]
    pub fn reduced_chi2(&self) -> f64 {
        if self.dof == 0 {
            f64::NAN
        } else {
            self.chi2 / crate::convert::count_f64(self.dof)
        }
    }

    /// Plain-text report table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<12} {:>12} {:>12}", "parameter", "value", "error");
        for parameter in &self.parameters {
            let _ = writeln!(
                out,
                "{:<12} {:>12.6} {:>12.6}",
                parameter.name, parameter.value, parameter.error
            );
        }
        let _ = writeln!(out, "{:<12} {:>12.6}", "scale", self.scale);
        let _ = writeln!(out, "{:<12} {:>12.6}", "background", self.background);
        let _ = writeln!(out, "{:<12} {:>12.6}", "chi2", self.chi2);
        let _ = writeln!(out, "{:<12} {:>12}", "dof", self.dof);
        let _ = writeln!(out, "{:<12} {:>12.6}", "chi2/dof", self.reduced_chi2());
        out
    }
}

/// Closed-form weighted least squares for `y ≈ scale * model + background`.
fn linear_prefit(model: &[f64], data: &SaxsData) -> Result<(f64, f64)> {
    let mut s = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (m, point) in model.iter().zip(data.points()) {
        let w = 1.0 / (point.sigma * point.sigma);
        s += w;
        sx += w * m;
        sy += w * point.intensity;
        sxx += w * m * m;
        sxy += w * m * point.intensity;
    }

    let delta = s.mul_add(sxx, -(sx * sx));
    if !delta.is_finite() || delta.abs() <= 1e-12 * s.mul_add(sxx.abs(), sx * sx) {
        return Err(Error::SingularNormalEquations);
    }
    let scale = s.mul_add(sxy, -(sx * sy)) / delta;
    let background = sxx.mul_add(sy, -(sx * sxy)) / delta;
    Ok((scale, background))
}

/// Wraps a composite distance histogram as a residual vector against one
/// experimental curve.
pub struct Fitter {
    data: SaxsData,
    composite: CompositeDistanceHistogram,
    scaled: Option<(f64, CompositeDistanceHistogram)>,
    settings: Settings,
    free: Vec<FreeParam>,
}

impl Fitter {
    /// Constructor; captures its effective settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoData`] when `data` is empty.
    pub fn new(
        data: SaxsData,
        composite: CompositeDistanceHistogram,
        settings: &Settings,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::NoData);
        }

        let mut free = Vec::new();
        if settings.fit_excluded_volume {
            free.push(FreeParam {
                kind: ParamKind::Cx,
                name: "cx",
                limit: CX_LIMIT,
                start: 1.0,
            });
        }
        if settings.fit_solvent_density {
            free.push(FreeParam {
                kind: ParamKind::Cr,
                name: "cr",
                limit: CR_LIMIT,
                start: 1.0,
            });
        }
        if settings.fit_hydration {
            free.push(FreeParam {
                kind: ParamKind::Cw,
                name: "cw",
                limit: CW_LIMIT,
                start: 1.0,
            });
        }
        if settings.fit_atomic_debye_waller {
            free.push(FreeParam {
                kind: ParamKind::Ba,
                name: "Ba",
                limit: B_LIMIT,
                start: 0.0,
            });
        }
        if settings.fit_exv_debye_waller {
            free.push(FreeParam {
                kind: ParamKind::Bx,
                name: "Bx",
                limit: B_LIMIT,
                start: 0.0,
            });
        }

        Ok(Self {
            data,
            composite,
            scaled: None,
            settings: settings.clone(),
            free,
        })
    }

    /// The enabled nonlinear parameter names, in fit order.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<&'static str> {
        self.free.iter().map(|p| p.name).collect()
    }

    fn params_from(&self, values: &[f64]) -> ProfileParams {
        let mut params = ProfileParams::default();
        for (free, &value) in self.free.iter().zip(values) {
            match free.kind {
                ParamKind::Cx => params.cx = value,
                ParamKind::Cr => params.cr = value,
                ParamKind::Cw => params.cw = value,
                ParamKind::Ba => params.ba = value,
                ParamKind::Bx => params.bx = value,
            }
        }
        params
    }

    // The scalable excluded-volume model rebuilds the composite at the
    // requested cx instead of scaling multiplicatively.
    fn model_on_data(&mut self, values: &[f64]) -> Result<Vec<f64>> {
        let mut params = self.params_from(values);
        if self.settings.exv_method == ExvMethod::GridScalable {
            let scale = params.cx;
            params.cx = 1.0;
            let cached = matches!(&self.scaled, Some((s, _)) if *s == scale);
            if !cached {
                let composite = self.composite.scaled_exv(scale)?;
                self.scaled = Some((scale, composite));
            }
            let (_, composite) = self.scaled.as_mut().unwrap();
            return spline_onto_profile(composite.evaluate(params), &self.data);
        }
        spline_onto_profile(self.composite.evaluate(params), &self.data)
    }

    /// The normalized residual vector at `values` (one entry per enabled
    /// parameter), after the linear pre-fit.
    ///
    /// # Errors
    ///
    /// Propagates evaluation and pre-fit failures.
    pub fn residuals(&mut self, values: &[f64]) -> Result<Vec<f64>> {
        let model = self.model_on_data(values)?;
        let (scale, background) = linear_prefit(&model, &self.data)?;
        Ok(model
            .iter()
            .zip(self.data.points())
            .map(|(m, point)| (scale.mul_add(*m, background) - point.intensity) / point.sigma)
            .collect())
    }

    /// Chi-squared at `values`.
    ///
    /// # Errors
    ///
    /// Propagates evaluation and pre-fit failures.
    pub fn chi2(&mut self, values: &[f64]) -> Result<f64> {
        Ok(self
            .residuals(values)?
            .iter()
            .map(|r| r * r)
            .sum())
    }

    /// Chi-squared sampled over the range of the single enabled parameter,
    /// as a plain dataset for external plot emitters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless exactly one parameter is
    /// enabled, and propagates evaluation failures.
    pub fn landscape(&mut self, samples: usize) -> Result<Dataset> {
        if self.free.len() != 1 {
            return Err(Error::Configuration(format!(
                "a landscape needs exactly one free parameter, {} are enabled",
                self.free.len()
            )));
        }
        let limit = self.free[0].limit;
        let (landscape, _) =
            minimizer::scan(&mut |values| self.chi2(values), limit, samples)?;
        Ok(Dataset::new(landscape.x, landscape.value))
    }

    /// Runs the fit over the enabled nonlinear parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MinimizerDidNotConverge`] with the last parameters
    /// when the iteration budget runs out, and propagates evaluation
    /// failures.
    pub fn fit(&mut self) -> Result<FitResult> {
        let max_iterations = self.settings.max_iterations;

        let outcome = if self.free.is_empty() {
            MinimizerResult {
                parameters: Vec::new(),
                value: self.chi2(&[])?,
                iterations: 0,
                converged: true,
            }
        } else if self.free.len() == 1 {
            let limit = self.free[0].limit;
            minimizer::golden_section(
                &mut |values| self.chi2(values),
                limit,
                max_iterations,
                1e-6,
            )?
        } else {
            let start: Vec<f64> = self.free.iter().map(|p| p.start).collect();
            let limits: Vec<Limit> = self.free.iter().map(|p| p.limit).collect();
            minimizer::nelder_mead(
                &mut |values| self.chi2(values),
                &start,
                &limits,
                max_iterations,
                1e-10,
            )?
        };

        if !outcome.converged {
            return Err(Error::MinimizerDidNotConverge {
                parameters: outcome.parameters,
                chi2: outcome.value,
                iterations: outcome.iterations,
            });
        }

        self.result_at(&outcome)
    }

    fn result_at(&mut self, outcome: &MinimizerResult) -> Result<FitResult> {
        let values = outcome.parameters.clone();
        let errors = self.curvature_errors(&values)?;

        let model = self.model_on_data(&values)?;
        let (scale, background) = linear_prefit(&model, &self.data)?;
        let qs = self.data.qs();
        let fitted = Dataset::new(
            qs.clone(),
            model
                .iter()
                .map(|m| scale.mul_add(*m, background))
                .collect(),
        );
        let residuals = Dataset::new(qs, self.residuals(&values)?);

        // extended model on the finer module grid
        let params = self.params_from(&values);
        let profile = self.composite.evaluate(params);
        let extended_axis = Axis::new(
            self.settings.qmin,
            self.settings.qmax,
            self.settings.n_points,
        );
        let spline = CubicSpline::new(profile.q().to_vec(), profile.intensity().to_vec())?;
        let extended_q = extended_axis.values();
        let extended = Dataset::new(
            extended_q.clone(),
            extended_q
                .iter()
                .map(|&q| scale.mul_add(spline.evaluate(q), background))
                .collect(),
        );

        let parameters = self
            .free
            .iter()
            .zip(&values)
            .zip(&errors)
            .map(|((free, &value), &error)| FitParameter {
                name: free.name.to_string(),
                value,
                error,
            })
            .collect();

        Ok(FitResult {
            parameters,
            scale,
            background,
            chi2: outcome.value,
            dof: self.data.len().saturating_sub(self.free.len() + 2),
            iterations: outcome.iterations,
            fitted,
            residuals,
            extended,
        })
    }

    // Symmetric errors from the diagonal curvature of chi2 at the optimum.
    fn curvature_errors(&mut self, values: &[f64]) -> Result<Vec<f64>> {
        let center = self.chi2(values)?;
        let mut errors = Vec::with_capacity(self.free.len());
        for index in 0..self.free.len() {
            let limit = self.free[index].limit;
            let h = (0.01 * limit.width()).max(1e-6);
            let mut plus = values.to_vec();
            plus[index] = limit.clamp(plus[index] + h);
            let mut minus = values.to_vec();
            minus[index] = limit.clamp(minus[index] - h);

            let span = plus[index] - minus[index];
            if span <= 0.0 {
                errors.push(f64::NAN);
                continue;
            }
            let f_plus = self.chi2(&plus)?;
            let f_minus = self.chi2(&minus)?;
            let half = 0.5 * span;
            let curvature = (f_plus - 2.0 * center + f_minus) / (half * half);
            errors.push(if curvature > 0.0 {
                (2.0 / curvature).sqrt()
            } else {
                f64::NAN
            });
        }
        Ok(errors)
    }
}

fn spline_onto_profile(
    profile: crate::dataset::ScatteringProfile,
    data: &SaxsData,
) -> Result<Vec<f64>> {
    let spline = CubicSpline::new(profile.q().to_vec(), profile.intensity().to_vec())?;
    Ok(spline.evaluate_all(&data.qs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_prefit_recovers_scale_and_background() {
        let model = vec![1.0, 2.0, 3.0, 4.0];
        let data = SaxsData::from_columns(
            &[0.1, 0.2, 0.3, 0.4],
            &[2.5, 4.5, 6.5, 8.5], // 2 m + 0.5
            &[0.1, 0.1, 0.1, 0.1],
        )
        .unwrap();
        let (scale, background) = linear_prefit(&model, &data).unwrap();
        float_cmp::assert_approx_eq!(f64, scale, 2.0, epsilon = 1e-10);
        float_cmp::assert_approx_eq!(f64, background, 0.5, epsilon = 1e-10);
    }

    #[test]
    fn linear_prefit_rejects_a_constant_model() {
        let model = vec![1.0, 1.0, 1.0];
        let data =
            SaxsData::from_columns(&[0.1, 0.2, 0.3], &[1.0, 2.0, 3.0], &[0.1, 0.1, 0.1]).unwrap();
        assert!(matches!(
            linear_prefit(&model, &data),
            Err(Error::SingularNormalEquations)
        ));
    }
}
