//! Packed coordinate snapshots for the distance accumulation loops.

use crate::atom::Atom;
use crate::body::Body;
use crate::form_factor::FormFactorType;

/// A packed snapshot of atom positions, weights, and form-factor types.
///
/// Positions and weights are stored as `[x, y, z, w]` quads for stride-1
/// access in the pair loops. After construction every field is independent
/// of the source body.
#[derive(Clone, Debug, Default)]
pub struct CompactCoordinates {
    data: Vec<[f64; 4]>,
    types: Vec<FormFactorType>,
}

impl CompactCoordinates {
    /// Snapshots the solute atoms of `body`. The weight is
    /// `occupancy * effective_charge` when `use_effective_charge` is set
    /// and plain occupancy otherwise.
    #[must_use]
    pub fn from_body(body: &Body, use_effective_charge: bool) -> Self {
        Self::from_atoms(body.atoms(), use_effective_charge)
    }

    /// Snapshots an atom slice directly.
    #[must_use]
    pub fn from_atoms(atoms: &[Atom], use_effective_charge: bool) -> Self {
        let data = atoms
            .iter()
            .map(|atom| {
                [
                    atom.position.x,
                    atom.position.y,
                    atom.position.z,
                    atom.weight(use_effective_charge),
                ]
            })
            .collect();
        let types = atoms.iter().map(|atom| atom.form_factor_type).collect();

        Self { data, types }
    }

    /// Snapshots waters; the type is forced to [`FormFactorType::Water`].
    #[must_use]
    pub fn from_waters(waters: &[Atom], use_effective_charge: bool) -> Self {
        let mut coords = Self::from_atoms(waters, use_effective_charge);
        coords.types.fill(FormFactorType::Water);
        coords
    }

    /// Appends a synthetic entry, used for excluded-volume dummy atoms.
    pub fn push(&mut self, position: [f64; 3], weight: f64, ff: FormFactorType) {
        self.data
            .push([position[0], position[1], position[2], weight]);
        self.types.push(ff);
    }

    /// Subtracts a constant per-atom excluded-volume weight from every
    /// weight. Apply at most once per snapshot.
    pub fn implicit_exv(&mut self, v_per_atom: f64) {
        for quad in &mut self.data {
            quad[3] -= v_per_atom;
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The `[x, y, z, w]` quad of entry `i`.
    #[must_use]
    pub fn quad(&self, i: usize) -> &[f64; 4] {
        &self.data[i]
    }

    /// All quads.
    #[must_use]
    pub fn quads(&self) -> &[[f64; 4]] {
        &self.data
    }

    /// Weight of entry `i`.
    #[must_use]
    pub fn weight(&self, i: usize) -> f64 {
        self.data[i][3]
    }

    /// Form-factor type of entry `i`.
    #[must_use]
    pub fn ff(&self, i: usize) -> FormFactorType {
        self.types[i]
    }

    /// All form-factor types.
    #[must_use]
    pub fn types(&self) -> &[FormFactorType] {
        &self.types
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.data.iter().map(|quad| quad[3]).sum()
    }

    /// Euclidean distance between entries `i` and `j`.
    #[must_use]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        distance(&self.data[i], &self.data[j])
    }
}

/// Euclidean distance between two packed quads.
#[must_use]
pub fn distance(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyId;
    use float_cmp::assert_approx_eq;
    use lin_alg::f64::Vec3;

    fn body() -> Body {
        Body::new(
            BodyId(0),
            vec![
                Atom::new(Vec3::new_zero(), FormFactorType::Carbon),
                Atom::new(Vec3::new(3.0, 4.0, 0.0), FormFactorType::Oxygen),
            ],
        )
    }

    #[test]
    fn snapshot_is_independent_of_the_body() {
        let mut body = body();
        let coords = CompactCoordinates::from_body(&body, true);
        body.translate(Vec3::new(10.0, 0.0, 0.0));

        assert_approx_eq!(f64, coords.quad(0)[0], 0.0, ulps = 2);
        assert_approx_eq!(f64, coords.distance(0, 1), 5.0, ulps = 2);
    }

    #[test]
    fn weights_follow_the_charge_switch() {
        let body = body();
        let charged = CompactCoordinates::from_body(&body, true);
        let plain = CompactCoordinates::from_body(&body, false);
        assert_approx_eq!(f64, charged.weight(0), 6.0, ulps = 2);
        assert_approx_eq!(f64, plain.weight(0), 1.0, ulps = 2);
    }

    #[test]
    fn implicit_exv_shifts_every_weight() {
        let body = body();
        let mut coords = CompactCoordinates::from_body(&body, true);
        coords.implicit_exv(1.5);
        assert_approx_eq!(f64, coords.weight(0), 4.5, ulps = 2);
        assert_approx_eq!(f64, coords.weight(1), 6.5, ulps = 2);
    }

    #[test]
    fn waters_are_forced_to_the_water_type() {
        let waters = vec![Atom::water(Vec3::new_zero())];
        let coords = CompactCoordinates::from_waters(&waters, true);
        assert_eq!(coords.ff(0), FormFactorType::Water);
        assert_approx_eq!(f64, coords.weight(0), 10.0, ulps = 2);
    }
}
