//! Analytic form factors and the precalculated pairwise product table.
//!
//! Atomic types use the five-Gaussian Waasmaier-Kirfel parametrization
//! `f(q) = sum_k a_k exp(-b_k (q / 4pi)^2) + c`; water uses the
//! ten-electron O²⁻ entry. The excluded-volume dummy atom is a single
//! Gaussian whose width derives from the displaced volume, so it fits the
//! same five-term layout with four zero terms.

use crate::axis::Axis;
use crate::constants;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Form-factor type of an atom.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum FormFactorType {
    /// Neutral hydrogen.
    Hydrogen,
    /// Neutral carbon.
    Carbon,
    /// Neutral nitrogen.
    Nitrogen,
    /// Neutral oxygen.
    Oxygen,
    /// Neutral sulfur.
    Sulfur,
    /// Any element without a dedicated entry.
    Other,
    /// A hydration-shell water molecule.
    Water,
    /// An excluded-volume dummy atom.
    ExcludedVolume,
}

impl FormFactorType {
    /// Every type, in table order.
    pub const ALL: [Self; 8] = [
        Self::Hydrogen,
        Self::Carbon,
        Self::Nitrogen,
        Self::Oxygen,
        Self::Sulfur,
        Self::Other,
        Self::Water,
        Self::ExcludedVolume,
    ];

    /// Number of distinct types.
    pub const COUNT: usize = Self::ALL.len();

    /// Index of this type in the shared tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether this type denotes a solute atom rather than a water or a
    /// dummy atom.
    #[must_use]
    pub const fn is_atomic(self) -> bool {
        !matches!(self, Self::Water | Self::ExcludedVolume)
    }

    /// Maps an element symbol to its form-factor type. Unknown symbols map
    /// to [`Self::Other`].
    #[must_use]
    pub fn from_element(symbol: &str) -> Self {
        match symbol.trim() {
            "H" | "h" => Self::Hydrogen,
            "C" | "c" => Self::Carbon,
            "N" | "n" => Self::Nitrogen,
            "O" | "o" => Self::Oxygen,
            "S" | "s" => Self::Sulfur,
            _ => Self::Other,
        }
    }
}

/// A five-Gaussian analytic form factor.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct FormFactor {
    a: [f64; 5],
    b: [f64; 5],
    c: f64,
}

// Waasmaier & Kirfel, Acta Cryst. A51 (1995) 416. Water is the O²⁻ entry.
const HYDROGEN: FormFactor = FormFactor {
    a: [0.413048, 0.294953, 0.187491, 0.080701, 0.023736],
    b: [15.569946, 32.398468, 5.711404, 61.889874, 1.334118],
    c: 0.000049,
};
const CARBON: FormFactor = FormFactor {
    a: [2.657506, 1.078079, 1.490909, -4.241070, 0.713791],
    b: [14.780758, 0.776775, 42.086843, -0.000294, 0.239535],
    c: 4.297983,
};
const NITROGEN: FormFactor = FormFactor {
    a: [11.893780, 3.277479, 1.858092, 0.858927, 0.912985],
    b: [0.000158, 10.232723, 30.344690, 0.656065, 0.217287],
    c: -11.804902,
};
const OXYGEN: FormFactor = FormFactor {
    a: [2.960427, 2.508818, 0.637853, 0.722838, 1.142756],
    b: [14.182259, 5.936858, 0.112726, 34.958481, 0.390240],
    c: 0.027014,
};
const SULFUR: FormFactor = FormFactor {
    a: [6.372157, 5.154568, 1.473732, 1.635073, 1.209372],
    b: [1.514347, 22.092528, 0.061373, 55.445176, 0.646925],
    c: 0.154722,
};
const OXYGEN_2MINUS: FormFactor = FormFactor {
    a: [3.106934, 3.235142, 1.148886, 0.783981, 0.676953],
    b: [19.868080, 6.960252, 0.170043, 65.693509, 0.630757],
    c: 0.046136,
};

impl FormFactor {
    /// The raw (unnormalized) form factor of `ff`. The excluded-volume
    /// entry uses the average displaced volume of a carbon atom; callers
    /// with a concrete volume should use [`Self::excluded_volume`].
    #[must_use]
    pub fn raw(ff: FormFactorType) -> Self {
        match ff {
            FormFactorType::Hydrogen => HYDROGEN,
            FormFactorType::Carbon | FormFactorType::Other => CARBON,
            FormFactorType::Nitrogen => NITROGEN,
            FormFactorType::Oxygen => OXYGEN,
            FormFactorType::Sulfur => SULFUR,
            FormFactorType::Water => OXYGEN_2MINUS,
            FormFactorType::ExcludedVolume => {
                Self::excluded_volume(constants::displaced_volume(FormFactorType::Carbon))
            }
        }
    }

    /// A normalized Gaussian dummy-atom factor for a displaced volume `v`:
    /// `f(q) = exp(-v^(2/3) q^2 / (4pi))`, so `f(0) = 1` and the displaced
    /// charge `rho * v` lives in the atom weight instead.
    #[must_use]
    pub fn excluded_volume(v: f64) -> Self {
        // exp(-b (q/4pi)^2) == exp(-v^(2/3) q^2 / (4pi)) for b = 4pi v^(2/3)
        Self {
            a: [1.0, 0.0, 0.0, 0.0, 0.0],
            b: [4.0 * PI * v.powf(2.0 / 3.0), 0.0, 0.0, 0.0, 0.0],
            c: 0.0,
        }
    }

    /// Evaluates the form factor at momentum transfer `q`.
    #[must_use]
    pub fn evaluate(&self, q: f64) -> f64 {
        let s2 = (q / (4.0 * PI)).powi(2);
        self.a
            .iter()
            .zip(&self.b)
            .map(|(a, b)| a * (-b * s2).exp())
            .sum::<f64>()
            + self.c
    }

    /// The forward-scattering amplitude `f(0)`.
    #[must_use]
    pub fn i0(&self) -> f64 {
        self.a.iter().sum::<f64>() + self.c
    }

    /// This form factor scaled so that `evaluate(0) == 1`.
    #[must_use]
    pub fn normalized(ff: FormFactorType) -> Self {
        let raw = Self::raw(ff);
        let i0 = raw.i0();
        Self {
            a: raw.a.map(|a| a / i0),
            b: raw.b,
            c: raw.c / i0,
        }
    }
}

/// Symmetric table of normalized pairwise form-factor products
/// `P[i, j, k] = f_i(q_k) f_j(q_k)`, materialized once per q-axis.
#[derive(Clone, Debug)]
pub struct FormFactorTable {
    q_axis: Axis,
    products: Array3<f64>,
}

impl FormFactorTable {
    /// Builds the product table on `q_axis`. The excluded-volume column is
    /// built for the displaced volume `exv_volume` (Å³).
    #[must_use]
    pub fn new(q_axis: Axis, exv_volume: f64) -> Self {
        let factors: Vec<FormFactor> = FormFactorType::ALL
            .iter()
            .map(|&ff| match ff {
                FormFactorType::ExcludedVolume => FormFactor::excluded_volume(exv_volume),
                _ => FormFactor::normalized(ff),
            })
            .collect();
        let q = q_axis.values();

        let mut products = Array3::zeros((FormFactorType::COUNT, FormFactorType::COUNT, q.len()));
        for i in 0..FormFactorType::COUNT {
            for j in i..FormFactorType::COUNT {
                for (k, &qk) in q.iter().enumerate() {
                    let product = factors[i].evaluate(qk) * factors[j].evaluate(qk);
                    products[[i, j, k]] = product;
                    products[[j, i, k]] = product;
                }
            }
        }

        Self { q_axis, products }
    }

    /// The q-axis the table was built on.
    #[must_use]
    pub const fn q_axis(&self) -> &Axis {
        &self.q_axis
    }

    /// Product `f_i(q_k) f_j(q_k)`.
    #[must_use]
    pub fn at(&self, i: FormFactorType, j: FormFactorType, k: usize) -> f64 {
        self.products[[i.index(), j.index(), k]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn element_symbols_map_to_their_types() {
        assert_eq!(FormFactorType::from_element("H"), FormFactorType::Hydrogen);
        assert_eq!(FormFactorType::from_element("C"), FormFactorType::Carbon);
        assert_eq!(FormFactorType::from_element(" n "), FormFactorType::Nitrogen);
        assert_eq!(FormFactorType::from_element("O"), FormFactorType::Oxygen);
        assert_eq!(FormFactorType::from_element("s"), FormFactorType::Sulfur);

        // everything without a dedicated entry falls back to the generic one
        assert_eq!(FormFactorType::from_element("Fe"), FormFactorType::Other);
        assert_eq!(FormFactorType::from_element("SE"), FormFactorType::Other);
        assert_eq!(FormFactorType::from_element(""), FormFactorType::Other);
    }

    #[test]
    fn forward_scattering_matches_electron_count() {
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Hydrogen).i0(), 1.0, epsilon = 1e-2);
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Carbon).i0(), 6.0, epsilon = 1e-2);
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Nitrogen).i0(), 7.0, epsilon = 1e-2);
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Oxygen).i0(), 8.0, epsilon = 1e-2);
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Sulfur).i0(), 16.0, epsilon = 1e-2);
        assert_approx_eq!(f64, FormFactor::raw(FormFactorType::Water).i0(), 10.0, epsilon = 1e-2);
    }

    #[test]
    fn normalized_factors_are_unity_at_zero() {
        for ff in FormFactorType::ALL {
            if ff == FormFactorType::ExcludedVolume {
                continue;
            }
            assert_approx_eq!(f64, FormFactor::normalized(ff).evaluate(0.0), 1.0, ulps = 4);
        }
        assert_approx_eq!(f64, FormFactor::excluded_volume(16.44).evaluate(0.0), 1.0, ulps = 2);
    }

    #[test]
    fn factors_decay_with_q() {
        for ff in FormFactorType::ALL {
            let f = FormFactor::normalized(ff);
            assert!(f.evaluate(1.0) < f.evaluate(0.0), "{ff:?}");
        }
    }

    #[test]
    fn product_table_is_symmetric() {
        let table = FormFactorTable::new(Axis::new(0.0, 1.0, 50), 16.44);
        for i in FormFactorType::ALL {
            for j in FormFactorType::ALL {
                for k in 0..50 {
                    assert_approx_eq!(f64, table.at(i, j, k), table.at(j, i, k), ulps = 2);
                }
            }
        }
    }
}
