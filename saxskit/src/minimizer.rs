//! Bounded minimizers driving the nonlinear fit.
//!
//! A golden-section search handles single-parameter fits; the bounded
//! Nelder-Mead simplex handles the rest. Both run under a caller-supplied
//! iteration budget and report non-convergence instead of failing.

use crate::axis::Limit;
use crate::error::Result;

/// Outcome of a minimization.
#[derive(Clone, Debug)]
pub struct MinimizerResult {
    /// Best parameter vector found.
    pub parameters: Vec<f64>,
    /// Objective value at [`Self::parameters`].
    pub value: f64,
    /// Iterations spent.
    pub iterations: usize,
    /// Whether the tolerance was reached within the budget.
    pub converged: bool,
}

/// The objective signature shared by the minimizers; evaluation may fail
/// and failures abort the search.
pub type Objective<'a> = &'a mut dyn FnMut(&[f64]) -> Result<f64>;

/// A sampled objective landscape.
#[derive(Clone, Debug)]
pub struct Landscape {
    /// Sampled parameter values.
    pub x: Vec<f64>,
    /// Objective values at [`Self::x`].
    pub value: Vec<f64>,
}

const GOLDEN_RATIO: f64 = 0.618_033_988_749_894_8;

/// Samples the objective on a uniform grid over `limit` and returns the
/// landscape together with the best sample.
///
/// # Errors
///
/// Propagates objective failures.
///
/// # Panics
///
/// Panics if `samples` is zero.
pub fn scan(f: Objective<'_>, limit: Limit, samples: usize) -> Result<(Landscape, MinimizerResult)> {
    assert!(samples > 0);

    let step = limit.width() / crate::convert::count_f64(samples.saturating_sub(1).max(1));
    let mut x = Vec::with_capacity(samples);
    let mut value = Vec::with_capacity(samples);
    let mut best = (limit.min, f64::INFINITY);

    for i in 0..samples {
        let xi = crate::convert::count_f64(i).mul_add(step, limit.min);
        let fx = f(&[xi])?;
        if fx < best.1 {
            best = (xi, fx);
        }
        x.push(xi);
        value.push(fx);
    }

    let result = MinimizerResult {
        parameters: vec![best.0],
        value: best.1,
        iterations: samples,
        converged: true,
    };
    Ok((Landscape { x, value }, result))
}

/// Golden-section search over a single bounded parameter.
///
/// # Errors
///
/// Propagates objective failures.
pub fn golden_section(
    f: Objective<'_>,
    limit: Limit,
    max_iterations: usize,
    tolerance: f64,
) -> Result<MinimizerResult> {
    let mut lo = limit.min;
    let mut hi = limit.max;
    let mut a = GOLDEN_RATIO.mul_add(-(hi - lo), hi);
    let mut b = GOLDEN_RATIO.mul_add(hi - lo, lo);
    let mut fa = f(&[a])?;
    let mut fb = f(&[b])?;

    let mut iterations = 0;
    while iterations < max_iterations && (hi - lo) > tolerance {
        iterations += 1;
        if fa < fb {
            hi = b;
            b = a;
            fb = fa;
            a = GOLDEN_RATIO.mul_add(-(hi - lo), hi);
            fa = f(&[a])?;
        } else {
            lo = a;
            a = b;
            fa = fb;
            b = GOLDEN_RATIO.mul_add(hi - lo, lo);
            fb = f(&[b])?;
        }
    }

    let (x, value) = if fa < fb { (a, fa) } else { (b, fb) };
    Ok(MinimizerResult {
        parameters: vec![x],
        value,
        iterations,
        converged: (hi - lo) <= tolerance,
    })
}

fn clamp_into(values: &mut [f64], limits: &[Limit]) {
    for (value, limit) in values.iter_mut().zip(limits) {
        *value = limit.clamp(*value);
    }
}

/// Bounded Nelder-Mead simplex minimization; every trial point is clamped
/// into the parameter limits.
///
/// # Errors
///
/// Propagates objective failures.
///
/// # Panics
///
/// Panics if `start` and `limits` disagree in length or are empty.
pub fn nelder_mead(
    f: Objective<'_>,
    start: &[f64],
    limits: &[Limit],
    max_iterations: usize,
    tolerance: f64,
) -> Result<MinimizerResult> {
    assert_eq!(start.len(), limits.len());
    assert!(!start.is_empty());
    let n = start.len();

    // initial simplex: the start plus one vertex stepped per dimension
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start.to_vec());
    for i in 0..n {
        let mut vertex = start.to_vec();
        let step = 0.05 * limits[i].width().max(1e-6);
        vertex[i] += if vertex[i] + step <= limits[i].max {
            step
        } else {
            -step
        };
        clamp_into(&mut vertex, limits);
        simplex.push(vertex);
    }
    let mut values = simplex
        .iter()
        .map(|vertex| f(vertex))
        .collect::<Result<Vec<f64>>>()?;

    let mut iterations = 0;
    let mut converged = false;
    while iterations < max_iterations {
        iterations += 1;

        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        let best = order[0];
        let worst = order[n];
        let second_worst = order[n - 1];

        let spread = (values[worst] - values[best]).abs();
        if spread <= tolerance * values[best].abs().max(1.0) {
            converged = true;
            break;
        }

        // centroid of all but the worst vertex
        let mut centroid = vec![0.0; n];
        for (index, vertex) in simplex.iter().enumerate() {
            if index == worst {
                continue;
            }
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v;
            }
        }
        for c in &mut centroid {
            *c /= crate::convert::count_f64(n);
        }

        let trial = |coef: f64| {
            let mut point: Vec<f64> = centroid
                .iter()
                .zip(&simplex[worst])
                .map(|(&c, &w)| coef.mul_add(c - w, c))
                .collect();
            clamp_into(&mut point, limits);
            point
        };

        // reflection
        let reflected = trial(1.0);
        let f_reflected = f(&reflected)?;
        if f_reflected < values[best] {
            // expansion
            let expanded = trial(2.0);
            let f_expanded = f(&expanded)?;
            if f_expanded < f_reflected {
                simplex[worst] = expanded;
                values[worst] = f_expanded;
            } else {
                simplex[worst] = reflected;
                values[worst] = f_reflected;
            }
        } else if f_reflected < values[second_worst] {
            simplex[worst] = reflected;
            values[worst] = f_reflected;
        } else {
            // contraction
            let contracted = trial(-0.5);
            let f_contracted = f(&contracted)?;
            if f_contracted < values[worst] {
                simplex[worst] = contracted;
                values[worst] = f_contracted;
            } else {
                // shrink toward the best vertex
                let best_vertex = simplex[best].clone();
                for (index, vertex) in simplex.iter_mut().enumerate() {
                    if index == best {
                        continue;
                    }
                    for (v, &b) in vertex.iter_mut().zip(&best_vertex) {
                        *v = 0.5 * (*v + b);
                    }
                    clamp_into(vertex, limits);
                    values[index] = f(vertex)?;
                }
            }
        }
    }

    let best = values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .unwrap();
    Ok(MinimizerResult {
        parameters: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn scan_samples_the_whole_interval() {
        let mut f = |x: &[f64]| Ok((x[0] - 2.0).powi(2));
        let (landscape, best) = scan(&mut f, Limit::new(0.0, 4.0), 41).unwrap();
        assert_eq!(landscape.x.len(), 41);
        assert_approx_eq!(f64, landscape.x[0], 0.0, ulps = 2);
        assert_approx_eq!(f64, *landscape.x.last().unwrap(), 4.0, epsilon = 1e-12);
        assert_approx_eq!(f64, best.parameters[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn golden_section_finds_a_parabola_minimum() {
        let mut f = |x: &[f64]| Ok((x[0] - 1.3).powi(2));
        let result = golden_section(&mut f, Limit::new(0.0, 4.0), 200, 1e-9).unwrap();
        assert!(result.converged);
        assert_approx_eq!(f64, result.parameters[0], 1.3, epsilon = 1e-6);
    }

    #[test]
    fn golden_section_respects_the_bounds() {
        let mut f = |x: &[f64]| Ok(x[0]);
        let result = golden_section(&mut f, Limit::new(2.0, 5.0), 200, 1e-9).unwrap();
        assert_approx_eq!(f64, result.parameters[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn nelder_mead_minimizes_a_quadratic_bowl() {
        let mut f = |x: &[f64]| Ok((x[0] - 0.5).powi(2) + 2.0 * (x[1] + 1.0).powi(2));
        let limits = [Limit::new(-3.0, 3.0), Limit::new(-3.0, 3.0)];
        let result = nelder_mead(&mut f, &[0.0, 0.0], &limits, 500, 1e-12).unwrap();
        assert!(result.converged);
        assert_approx_eq!(f64, result.parameters[0], 0.5, epsilon = 1e-4);
        assert_approx_eq!(f64, result.parameters[1], -1.0, epsilon = 1e-4);
    }

    #[test]
    fn nelder_mead_reports_budget_exhaustion() {
        let mut f = |x: &[f64]| Ok((x[0] - 0.5).powi(2) + (x[1] + 1.0).powi(2));
        let limits = [Limit::new(-3.0, 3.0), Limit::new(-3.0, 3.0)];
        let result = nelder_mead(&mut f, &[2.9, 2.9], &limits, 3, 1e-14).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
    }

    #[test]
    fn objective_failures_propagate() {
        let mut calls = 0;
        let mut f = |_: &[f64]| {
            calls += 1;
            if calls > 2 {
                Err(crate::error::Error::NoData)
            } else {
                Ok(1.0)
            }
        };
        let limits = [Limit::new(0.0, 1.0)];
        assert!(nelder_mead(&mut f, &[0.5], &limits, 10, 1e-9).is_err());
    }
}
