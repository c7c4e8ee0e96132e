//! Physical constants used across the pipeline.
//!
//! Displaced volumes follow Fraser, MacRae & Suzuki; radii are van der
//! Waals values. All lengths are in Ångström, charges in electrons.

use crate::form_factor::FormFactorType;

/// Electron density of bulk water, e/Å³.
pub const WATER_DENSITY: f64 = 0.334;

/// Effective radius of a water molecule used for hydration placement.
pub const WATER_RADIUS: f64 = 1.4;

/// Van der Waals radius of an atom of the given type.
#[must_use]
pub const fn vdw_radius(ff: FormFactorType) -> f64 {
    match ff {
        FormFactorType::Hydrogen => 1.2,
        FormFactorType::Carbon | FormFactorType::Other => 1.7,
        FormFactorType::Nitrogen => 1.55,
        FormFactorType::Oxygen => 1.52,
        FormFactorType::Sulfur => 1.8,
        FormFactorType::Water => WATER_RADIUS,
        FormFactorType::ExcludedVolume => 0.0,
    }
}

/// Solvent volume displaced by an atom of the given type, Å³.
#[must_use]
pub const fn displaced_volume(ff: FormFactorType) -> f64 {
    match ff {
        FormFactorType::Hydrogen => 5.15,
        FormFactorType::Carbon | FormFactorType::Other => 16.44,
        FormFactorType::Nitrogen => 2.49,
        FormFactorType::Oxygen => 9.13,
        FormFactorType::Sulfur => 19.86,
        FormFactorType::Water => 29.9,
        FormFactorType::ExcludedVolume => 0.0,
    }
}

/// Nuclear charge of an atom of the given type; water counts its full ten
/// electrons.
#[must_use]
pub const fn charge(ff: FormFactorType) -> f64 {
    match ff {
        FormFactorType::Hydrogen => 1.0,
        FormFactorType::Carbon | FormFactorType::Other => 6.0,
        FormFactorType::Nitrogen => 7.0,
        FormFactorType::Oxygen => 8.0,
        FormFactorType::Sulfur => 16.0,
        FormFactorType::Water => 10.0,
        FormFactorType::ExcludedVolume => 0.0,
    }
}
