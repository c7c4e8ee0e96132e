//! Bodies: ordered groups of solute atoms with a mutation epoch.
//!
//! The epoch counter replaces the change-signal wiring of classic
//! state-manager designs: consumers poll the epoch before reusing cached
//! partial histograms, so bodies hold no back-references.

use crate::atom::Atom;
use lin_alg::f64::{Quaternion, Vec3};

/// Stable identifier of a body within its molecule.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BodyId(pub u32);

/// An ordered sequence of solute atoms.
#[derive(Clone, Debug)]
pub struct Body {
    id: BodyId,
    atoms: Vec<Atom>,
    epoch: u64,
}

impl Body {
    /// Constructor; ids are assigned by the owning molecule.
    #[must_use]
    pub(crate) fn new(id: BodyId, atoms: Vec<Atom>) -> Self {
        Self {
            id,
            atoms,
            epoch: 0,
        }
    }

    /// The stable id of this body.
    #[must_use]
    pub const fn id(&self) -> BodyId {
        self.id
    }

    /// The atoms of this body.
    #[must_use]
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Mutable access to the atoms. Bumps the epoch; callers that only
    /// read should use [`Self::atoms`].
    pub fn atoms_mut(&mut self) -> &mut Vec<Atom> {
        self.epoch += 1;
        &mut self.atoms
    }

    /// Number of atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    /// Whether the body holds no atoms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// The current mutation epoch.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Translates every atom by `shift`.
    pub fn translate(&mut self, shift: Vec3) {
        self.epoch += 1;
        for atom in &mut self.atoms {
            atom.position = atom.position + shift;
        }
    }

    /// Rotates every atom around `origin`.
    pub fn rotate(&mut self, rotation: Quaternion, origin: Vec3) {
        self.epoch += 1;
        for atom in &mut self.atoms {
            atom.position = rotation.rotate_vec(atom.position - origin) + origin;
        }
    }
}
