//! Error types shared across the scattering pipeline.
//!
//! All error kinds originate at component boundaries; the arithmetic kernels
//! and histogram accumulation never fail. The fitter is the narrowest waist
//! that converts these into a user-visible report.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or missing external data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// An index or position fell outside a grid or axis. Downgraded to a
    /// warning unless strict mode is set.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    /// The inflated grid bounds cannot hold any atom.
    #[error("grid bounds too small: {0}")]
    BoundsTooSmall(String),
    /// Axis or form-factor cardinality disagreement between collaborating
    /// objects.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Shape required by the receiving object.
        expected: String,
        /// Shape offered by the collaborator.
        found: String,
    },
    /// The fitter was asked to run without experimental data.
    #[error("no experimental data to fit against")]
    NoData,
    /// The closed-form linear pre-fit degenerated.
    #[error("singular normal equations in the linear pre-fit")]
    SingularNormalEquations,
    /// The iteration budget was exhausted before convergence. Carries the
    /// last parameter vector and the chi-squared evaluated there.
    #[error("minimizer did not converge after {iterations} iterations (chi2 = {chi2})")]
    MinimizerDidNotConverge {
        /// Last parameter vector observed.
        parameters: Vec<f64>,
        /// Chi-squared at `parameters`.
        chi2: f64,
        /// Number of iterations spent.
        iterations: usize,
    },
    /// An invalid settings combination, rejected at validation time.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An unreachable invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::ShapeMismatch`] built from two shape
    /// descriptions.
    pub fn shape_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
