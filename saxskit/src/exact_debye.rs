//! Exact Debye transform over all atom pairs, without distance binning.
//!
//! An O(N² · q) validation path for the histogram pipeline; hydration
//! waters and excluded-volume models are ignored.

use crate::compact_coordinates::{distance, CompactCoordinates};
use crate::debye_table::sinc;
use crate::form_factor::{FormFactor, FormFactorType};
use crate::molecule::Molecule;
use crate::pool;
use rayon::prelude::*;

/// Evaluates the exact Debye sum of the solute atoms along `q`:
/// `I(q) = sum_ab w_a w_b f_a(q) f_b(q) sinc(q d_ab)`.
#[must_use]
pub fn exact_debye_transform(
    molecule: &Molecule,
    q: &[f64],
    use_effective_charge: bool,
) -> Vec<f64> {
    let atoms: Vec<crate::atom::Atom> = molecule.atoms().cloned().collect();
    let coords = CompactCoordinates::from_atoms(&atoms, use_effective_charge);
    if coords.is_empty() {
        return vec![0.0; q.len()];
    }

    let factors: Vec<FormFactor> = FormFactorType::ALL
        .iter()
        .map(|&ff| FormFactor::normalized(ff))
        .collect();

    pool::install(|| {
        q.par_iter()
            .map(|&q| {
                let f: Vec<f64> = factors.iter().map(|factor| factor.evaluate(q)).collect();
                let quads = coords.quads();
                let mut intensity = 0.0;
                for (i, qi) in quads.iter().enumerate() {
                    let fi = f[coords.ff(i).index()];
                    intensity += qi[3] * qi[3] * fi * fi;
                    for (j, qj) in quads.iter().enumerate().skip(i + 1) {
                        let fj = f[coords.ff(j).index()];
                        intensity +=
                            2.0 * qi[3] * qj[3] * fi * fj * sinc(q * distance(qi, qj));
                    }
                }
                intensity
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use float_cmp::assert_approx_eq;
    use lin_alg::f64::Vec3;

    #[test]
    fn two_point_sum_matches_the_closed_form() {
        let molecule = Molecule::from_atoms(vec![
            Atom::new(Vec3::new_zero(), FormFactorType::Carbon),
            Atom::new(Vec3::new(0.0, 0.0, 10.0), FormFactorType::Carbon),
        ]);
        let q = [0.05, 0.1, 0.3];
        let intensity = exact_debye_transform(&molecule, &q, true);
        let carbon = FormFactor::normalized(FormFactorType::Carbon);

        for (&q, &i) in q.iter().zip(&intensity) {
            let ff = 6.0 * carbon.evaluate(q);
            let expected = 2.0 * ff * ff * (1.0 + (10.0 * q).sin() / (10.0 * q));
            assert_approx_eq!(f64, i, expected, epsilon = expected.abs() * 1e-12);
        }
    }

    #[test]
    fn empty_molecule_gives_zeros() {
        let intensity = exact_debye_transform(&Molecule::default(), &[0.1, 0.2], true);
        assert_eq!(intensity, vec![0.0, 0.0]);
    }
}
