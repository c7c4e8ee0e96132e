//! Excluded-volume models.
//!
//! The grid-backed methods synthesize dummy atoms from the voxel occupancy
//! of the molecule; the implicit methods drive per-atom displaced-volume
//! weights through the histogram accumulation instead and need no grid.

use crate::constants;
use crate::error::Error;
use crate::form_factor::FormFactorType;
use crate::grid::Grid;
use lin_alg::f64::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The excluded-volume model driving a calculation.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ExvMethod {
    /// One dummy atom per occupied voxel.
    Grid,
    /// Like [`Self::Grid`], with surface voxels tagged for independent
    /// scaling.
    GridSurface,
    /// Grid dummies rebuilt per fit evaluation at the requested scale.
    GridScalable,
    /// Grid dummies with the WAXSiS solvent treatment.
    WAXSiS,
    /// Implicit per-atom displaced volumes, Pepsi-SAXS style.
    Pepsi,
    /// Implicit per-atom displaced volumes, CRYSOL style.
    CRYSOL,
}

impl ExvMethod {
    /// Whether this method synthesizes dummy atoms from a grid.
    #[must_use]
    pub const fn is_grid_based(self) -> bool {
        matches!(
            self,
            Self::Grid | Self::GridSurface | Self::GridScalable | Self::WAXSiS
        )
    }

    /// Whether this method carries the excluded volume implicitly on the
    /// solute atoms.
    #[must_use]
    pub const fn is_implicit(self) -> bool {
        matches!(self, Self::Pepsi | Self::CRYSOL)
    }
}

impl fmt::Display for ExvMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Grid => "Grid",
            Self::GridSurface => "GridSurface",
            Self::GridScalable => "GridScalable",
            Self::WAXSiS => "WAXSiS",
            Self::Pepsi => "Pepsi",
            Self::CRYSOL => "CRYSOL",
        })
    }
}

impl FromStr for ExvMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Grid" => Ok(Self::Grid),
            "GridSurface" => Ok(Self::GridSurface),
            "GridScalable" => Ok(Self::GridScalable),
            "WAXSiS" => Ok(Self::WAXSiS),
            "Pepsi" => Ok(Self::Pepsi),
            "CRYSOL" => Ok(Self::CRYSOL),
            _ => Err(Error::InvalidInput(format!(
                "unknown excluded-volume method `{s}`"
            ))),
        }
    }
}

/// The synthesized dummy-atom cloud, split into interior and surface
/// points. `has_surface()` implies the surface list is non-empty.
#[derive(Clone, Debug, Default)]
pub struct ExcludedVolume {
    /// Voxel centers in the bulk of the molecule.
    pub interior: Vec<Vec3>,
    /// Voxel centers on the detected molecular surface.
    pub surface: Vec<Vec3>,
}

impl ExcludedVolume {
    /// Whether a surface split was produced.
    #[must_use]
    pub fn has_surface(&self) -> bool {
        !self.surface.is_empty()
    }

    /// Total number of dummy atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interior.len() + self.surface.len()
    }

    /// Whether the cloud is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interior.is_empty() && self.surface.is_empty()
    }
}

/// Synthesizes the dummy-atom cloud of `grid` for `method`.
///
/// Implicit methods produce an empty cloud; their excluded volume enters
/// through the per-atom weights instead.
#[must_use]
pub fn create(grid: &Grid, method: ExvMethod) -> ExcludedVolume {
    match method {
        ExvMethod::GridSurface => {
            let (interior, surface) = grid.detect_surface();
            ExcludedVolume { interior, surface }
        }
        ExvMethod::Grid | ExvMethod::GridScalable | ExvMethod::WAXSiS => ExcludedVolume {
            interior: grid.occupied_positions(),
            surface: Vec::new(),
        },
        ExvMethod::Pepsi | ExvMethod::CRYSOL => {
            log::debug!("{method} carries no grid-based excluded volume; returning an empty cloud");
            ExcludedVolume::default()
        }
    }
}

/// Displaced charge of one voxel-sized dummy atom.
#[must_use]
pub fn voxel_weight(grid_width: f64) -> f64 {
    constants::WATER_DENSITY * grid_width.powi(3)
}

/// Displaced charge of one solute atom under the implicit models.
#[must_use]
pub fn implicit_weight(ff: FormFactorType) -> f64 {
    constants::WATER_DENSITY * constants::displaced_volume(ff)
}

/// The displaced volume parameterizing the excluded-volume form factor.
#[must_use]
pub fn form_factor_volume(method: ExvMethod, types: &[FormFactorType], grid_width: f64) -> f64 {
    if method.is_grid_based() {
        grid_width.powi(3)
    } else {
        let atomic: Vec<f64> = types
            .iter()
            .filter(|ff| ff.is_atomic())
            .map(|&ff| constants::displaced_volume(ff))
            .collect();
        if atomic.is_empty() {
            constants::displaced_volume(FormFactorType::Carbon)
        } else {
            atomic.iter().sum::<f64>() / crate::convert::count_f64(atomic.len())
        }
    }
}
