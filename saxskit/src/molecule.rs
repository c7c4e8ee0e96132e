//! The molecule: an ordered sequence of bodies plus owned grid and
//! hydration.

use crate::atom::Atom;
use crate::body::{Body, BodyId};
use crate::error::{Error, Result};
use crate::grid::{Grid, GridMemberId};
use crate::hydration::{self, ExplicitHydration};
use crate::settings::Settings;
use lin_alg::f64::Vec3;

#[derive(Clone, Debug)]
struct TrackedBody {
    epoch: u64,
    members: Vec<GridMemberId>,
}

#[derive(Clone, Debug)]
struct GridTracker {
    grid: Grid,
    tracked: Vec<TrackedBody>,
}

/// An ordered sequence of bodies. The molecule exclusively owns its bodies,
/// its grid, and its hydration shell.
#[derive(Clone, Debug, Default)]
pub struct Molecule {
    bodies: Vec<Body>,
    hydration: ExplicitHydration,
    grid: Option<GridTracker>,
}

impl Molecule {
    /// A molecule with one body per atom group, ids assigned in order.
    #[must_use]
    pub fn new(groups: Vec<Vec<Atom>>) -> Self {
        let bodies = groups
            .into_iter()
            .enumerate()
            .map(|(i, atoms)| Body::new(BodyId(u32::try_from(i).unwrap()), atoms))
            .collect();
        Self {
            bodies,
            hydration: ExplicitHydration::default(),
            grid: None,
        }
    }

    /// A single-body molecule.
    #[must_use]
    pub fn from_atoms(atoms: Vec<Atom>) -> Self {
        Self::new(vec![atoms])
    }

    /// The bodies, in stable order.
    #[must_use]
    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    /// Mutable access to one body.
    #[must_use]
    pub fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.iter_mut().find(|body| body.id() == id)
    }

    /// Iterates every solute atom.
    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.bodies.iter().flat_map(Body::atoms)
    }

    /// Number of solute atoms.
    #[must_use]
    pub fn atom_count(&self) -> usize {
        self.bodies.iter().map(Body::len).sum()
    }

    /// Whether the molecule holds no solute atoms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atom_count() == 0
    }

    /// The hydration shell.
    #[must_use]
    pub const fn hydration(&self) -> &ExplicitHydration {
        &self.hydration
    }

    /// Applies the preprocessing switches of `settings`.
    pub fn preprocess(&mut self, settings: &Settings) {
        if settings.center {
            self.center();
        }
    }

    /// Charge-weighted center of mass of the solute.
    #[must_use]
    pub fn center_of_mass(&self) -> Vec3 {
        let mut acc = Vec3::new_zero();
        let mut total = 0.0;
        for atom in self.atoms() {
            let w = atom.weight(true);
            acc = acc + atom.position * w;
            total += w;
        }
        if total > 0.0 {
            acc / total
        } else {
            Vec3::new_zero()
        }
    }

    /// Translates the molecule so its center of mass sits at the origin.
    pub fn center(&mut self) {
        let shift = -self.center_of_mass();
        self.translate(shift);
    }

    /// Translates every body by `shift`. Hydration is dropped since the
    /// shell no longer matches the structure.
    pub fn translate(&mut self, shift: Vec3) {
        for body in &mut self.bodies {
            body.translate(shift);
        }
        self.hydration.clear();
    }

    /// Sum of solute atom weights.
    #[must_use]
    pub fn total_weight(&self, use_effective_charge: bool) -> f64 {
        self.atoms()
            .map(|atom| atom.weight(use_effective_charge))
            .sum()
    }

    /// The grid, if one was built.
    #[must_use]
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref().map(|tracker| &tracker.grid)
    }

    /// Builds the grid on first use and incrementally repairs it
    /// afterwards: bodies whose epoch moved since the last refresh have
    /// their members deflated and re-added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BoundsTooSmall`] for an empty molecule and
    /// propagates strict-mode placement failures.
    pub fn refresh_grid(&mut self, settings: &Settings) -> Result<&mut Grid> {
        if self.is_empty() {
            return Err(Error::BoundsTooSmall(
                "cannot build a grid for an empty molecule".into(),
            ));
        }

        let rebuild = match &self.grid {
            Some(tracker) => tracker.tracked.len() != self.bodies.len(),
            None => true,
        };

        if rebuild {
            let mut grid = Grid::from_atoms(self.atoms(), settings)?;
            let mut tracked = Vec::with_capacity(self.bodies.len());
            for body in &self.bodies {
                let members = body
                    .atoms()
                    .iter()
                    .map(|atom| grid.add_atom(atom))
                    .collect::<Result<Vec<GridMemberId>>>()?;
                tracked.push(TrackedBody {
                    epoch: body.epoch(),
                    members,
                });
            }
            self.grid = Some(GridTracker { grid, tracked });
        } else {
            let tracker = self.grid.as_mut().unwrap();
            for (body, tracked) in self.bodies.iter().zip(&mut tracker.tracked) {
                if tracked.epoch == body.epoch() {
                    continue;
                }
                for id in tracked.members.drain(..) {
                    tracker.grid.remove_atom(id)?;
                }
                tracked.members = body
                    .atoms()
                    .iter()
                    .map(|atom| tracker.grid.add_atom(atom))
                    .collect::<Result<Vec<GridMemberId>>>()?;
                tracked.epoch = body.epoch();
            }
        }

        Ok(&mut self.grid.as_mut().unwrap().grid)
    }

    /// Builds or refreshes the hydration shell.
    ///
    /// # Errors
    ///
    /// Propagates grid construction failures.
    pub fn generate_hydration(&mut self, settings: &Settings) -> Result<()> {
        self.refresh_grid(settings)?;
        let tracker = self.grid.as_mut().unwrap();
        let waters = hydration::generate(&mut tracker.grid, &self.bodies, settings);
        self.hydration.replace(waters);
        Ok(())
    }

    /// Installs an externally produced hydration shell, e.g. waters read
    /// from a structure file.
    pub fn set_hydration(&mut self, waters: Vec<Atom>) {
        self.hydration.replace(waters);
    }

    /// Drops the hydration shell.
    pub fn clear_hydration(&mut self) {
        self.hydration.clear();
        if let Some(tracker) = &mut self.grid {
            tracker.grid.clear_waters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form_factor::FormFactorType;
    use float_cmp::assert_approx_eq;

    fn two_body_molecule() -> Molecule {
        Molecule::new(vec![
            vec![
                Atom::new(Vec3::new_zero(), FormFactorType::Carbon),
                Atom::new(Vec3::new(2.0, 0.0, 0.0), FormFactorType::Oxygen),
            ],
            vec![Atom::new(Vec3::new(8.0, 0.0, 0.0), FormFactorType::Nitrogen)],
        ])
    }

    #[test]
    fn every_atom_belongs_to_exactly_one_body() {
        let molecule = two_body_molecule();
        assert_eq!(molecule.bodies().len(), 2);
        assert_eq!(molecule.atom_count(), 3);
        assert_eq!(molecule.bodies()[0].id(), BodyId(0));
        assert_eq!(molecule.bodies()[1].id(), BodyId(1));
    }

    #[test]
    fn centering_moves_the_center_of_mass_to_the_origin() {
        let mut molecule = two_body_molecule();
        molecule.center();
        assert!(molecule.center_of_mass().magnitude() < 1e-12);
    }

    #[test]
    fn preprocess_honors_the_center_switch() {
        let mut settings = Settings::default();
        settings.center = false;
        let mut molecule = two_body_molecule();
        let before = molecule.center_of_mass();
        molecule.preprocess(&settings);
        assert!((molecule.center_of_mass() - before).magnitude() < 1e-12);

        settings.center = true;
        molecule.preprocess(&settings);
        assert!(molecule.center_of_mass().magnitude() < 1e-12);
    }

    #[test]
    fn hydration_regenerates_identically_for_a_fixed_structure() {
        let settings = Settings::default();
        let mut molecule = two_body_molecule();

        molecule.generate_hydration(&settings).unwrap();
        let first: Vec<Vec3> = molecule
            .hydration()
            .waters()
            .iter()
            .map(|w| w.position)
            .collect();

        molecule.generate_hydration(&settings).unwrap();
        let second: Vec<Vec3> = molecule
            .hydration()
            .waters()
            .iter()
            .map(|w| w.position)
            .collect();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert!((*a - *b).magnitude() < 1e-12);
        }
    }

    #[test]
    fn grid_refresh_repairs_only_moved_bodies() {
        let settings = Settings::default();
        let mut molecule = two_body_molecule();
        molecule.refresh_grid(&settings).unwrap();
        let before = molecule.grid().unwrap().occupied_volume();

        let id = molecule.bodies()[1].id();
        molecule
            .body_mut(id)
            .unwrap()
            .translate(Vec3::new(0.0, 1.0, 0.0));
        molecule.refresh_grid(&settings).unwrap();

        // same structure shape, only shifted inside the margin
        let after = molecule.grid().unwrap().occupied_volume();
        assert!(after > 0);
        assert!(before > 0);
    }

    #[test]
    fn empty_molecule_cannot_grow_a_grid() {
        let mut molecule = Molecule::default();
        assert!(matches!(
            molecule.refresh_grid(&Settings::default()),
            Err(Error::BoundsTooSmall(_))
        ));
    }

    #[test]
    fn translation_drops_stale_hydration() {
        let settings = Settings::default();
        let mut molecule = two_body_molecule();
        molecule.generate_hydration(&settings).unwrap();
        let had_waters = !molecule.hydration().is_empty();
        molecule.translate(Vec3::new(1.0, 0.0, 0.0));
        assert!(molecule.hydration().is_empty());
        assert!(had_waters);
    }

    #[test]
    fn total_weight_sums_charges() {
        let molecule = two_body_molecule();
        assert_approx_eq!(f64, molecule.total_weight(true), 6.0 + 8.0 + 7.0, ulps = 2);
        assert_approx_eq!(f64, molecule.total_weight(false), 3.0, ulps = 2);
    }
}
