//! Experimental curves, scattering profiles, and plain (x, y) datasets.
//!
//! File parsing and emission belong to external collaborators; the core
//! consumes and produces only the record types below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A plain (x, y) dataset handed to external plot emitters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Dataset {
    /// Abscissa values.
    pub x: Vec<f64>,
    /// Ordinate values.
    pub y: Vec<f64>,
}

impl Dataset {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if the columns differ in length.
    #[must_use]
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        assert_eq!(x.len(), y.len());
        Self { x, y }
    }
}

/// A computed intensity curve on the module q-axis.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScatteringProfile {
    q: Vec<f64>,
    intensity: Vec<f64>,
}

impl ScatteringProfile {
    /// Constructor.
    ///
    /// # Panics
    ///
    /// Panics if the columns differ in length.
    #[must_use]
    pub fn new(q: Vec<f64>, intensity: Vec<f64>) -> Self {
        assert_eq!(q.len(), intensity.len());
        Self { q, intensity }
    }

    /// The q samples.
    #[must_use]
    pub fn q(&self) -> &[f64] {
        &self.q
    }

    /// The intensities.
    #[must_use]
    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// Whether the profile holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Converts into a plain dataset.
    #[must_use]
    pub fn as_dataset(&self) -> Dataset {
        Dataset::new(self.q.clone(), self.intensity.clone())
    }
}

/// One measured point of a SAXS curve.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct SaxsPoint {
    /// Momentum transfer, Å⁻¹.
    pub q: f64,
    /// Measured intensity, arbitrary units.
    pub intensity: f64,
    /// Measurement error, strictly positive.
    pub sigma: f64,
}

/// A measured SAXS curve: ordered (q, I, σ) records.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SaxsData {
    points: Vec<SaxsPoint>,
}

impl SaxsData {
    /// Validates and wraps parsed records: q must be strictly increasing
    /// and every σ strictly positive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending record.
    pub fn new(points: Vec<SaxsPoint>) -> Result<Self> {
        for (index, point) in points.iter().enumerate() {
            if !(point.sigma > 0.0) {
                return Err(Error::InvalidInput(format!(
                    "record {index}: sigma must be strictly positive, got {}",
                    point.sigma
                )));
            }
            if index > 0 && point.q <= points[index - 1].q {
                return Err(Error::InvalidInput(format!(
                    "record {index}: q values must be strictly increasing"
                )));
            }
        }
        Ok(Self { points })
    }

    /// Builds a curve from three parallel columns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the columns disagree in length
    /// or fail validation.
    pub fn from_columns(q: &[f64], intensity: &[f64], sigma: &[f64]) -> Result<Self> {
        if q.len() != intensity.len() || q.len() != sigma.len() {
            return Err(Error::InvalidInput(format!(
                "column lengths disagree: {} / {} / {}",
                q.len(),
                intensity.len(),
                sigma.len()
            )));
        }
        Self::new(
            q.iter()
                .zip(intensity)
                .zip(sigma)
                .map(|((&q, &intensity), &sigma)| SaxsPoint {
                    q,
                    intensity,
                    sigma,
                })
                .collect(),
        )
    }

    /// The records.
    #[must_use]
    pub fn points(&self) -> &[SaxsPoint] {
        &self.points
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the curve holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The q column.
    #[must_use]
    pub fn qs(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.q).collect()
    }
}
