//! The atom record consumed by the pipeline.

use crate::constants;
use crate::form_factor::FormFactorType;
use lin_alg::f64::Vec3;

/// A single atom, as populated by external structure readers.
#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    /// Position in Å.
    pub position: Vec3,
    /// Crystallographic occupancy.
    pub occupancy: f64,
    /// Effective charge in electrons; bound hydrogens absorbed by their
    /// parent are accounted for here by the reader.
    pub effective_charge: f64,
    /// Form-factor type.
    pub form_factor_type: FormFactorType,
    /// Temperature factor, if the source recorded one.
    pub temperature_factor: Option<f64>,
    /// Residue name, if the source recorded one.
    pub residue_name: Option<String>,
    /// Chain identifier, if the source recorded one.
    pub chain_id: Option<char>,
}

impl Atom {
    /// An atom at `position` with full occupancy and the nominal charge of
    /// its type.
    #[must_use]
    pub fn new(position: Vec3, form_factor_type: FormFactorType) -> Self {
        Self {
            position,
            occupancy: 1.0,
            effective_charge: constants::charge(form_factor_type),
            form_factor_type,
            temperature_factor: None,
            residue_name: None,
            chain_id: None,
        }
    }

    /// A hydration-shell water at `position`.
    #[must_use]
    pub fn water(position: Vec3) -> Self {
        let mut water = Self::new(position, FormFactorType::Water);
        water.residue_name = Some("HOH".into());
        water
    }

    /// The weight this atom contributes to the distance histograms.
    #[must_use]
    pub fn weight(&self, use_effective_charge: bool) -> f64 {
        if use_effective_charge {
            self.occupancy * self.effective_charge
        } else {
            self.occupancy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn weight_follows_the_effective_charge_switch() {
        let atom = Atom::new(Vec3::new_zero(), FormFactorType::Carbon);
        assert_approx_eq!(f64, atom.weight(true), 6.0, ulps = 2);
        assert_approx_eq!(f64, atom.weight(false), 1.0, ulps = 2);
    }

    #[test]
    fn waters_carry_ten_electrons() {
        let water = Atom::water(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(water.form_factor_type, FormFactorType::Water);
        assert_approx_eq!(f64, water.weight(true), 10.0, ulps = 2);
    }
}
