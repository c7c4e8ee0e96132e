//! Voxel occupancy grid with reversible per-atom expansion.
//!
//! Cells hold occupancy counts rather than a single state byte, so removing
//! an atom deflates exactly the voxels it inflated regardless of overlaps;
//! the byte view is recovered through [`Cell::state`]. Each live atom is
//! tracked by a [`GridMember`] record holding its owning voxel and the exact
//! voxel set its expansion touched.

use crate::atom::Atom;
use crate::constants;
use crate::convert;
use crate::error::{Error, Result};
use crate::form_factor::FormFactorType;
use crate::settings::Settings;
use itertools::Itertools;
use lin_alg::f64::Vec3;
use ndarray::Array3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of radial probe directions cast during surface detection.
pub const SURFACE_PROBES: usize = 8;

/// A probe escaping within this many cells marks its voxel as surface.
const SURFACE_ESCAPE_CELLS: usize = 3;

/// How a newly added atom inflates the grid around its center voxel.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ExpansionMethod {
    /// Mark only the six axis neighbours of the center voxel.
    Minimal,
    /// Mark the full voxelized ball of the per-type radius.
    Full,
}

impl fmt::Display for ExpansionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minimal => "minimal",
            Self::Full => "full",
        })
    }
}

impl FromStr for ExpansionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "minimal" => Ok(Self::Minimal),
            "full" => Ok(Self::Full),
            _ => Err(Error::InvalidInput(format!(
                "unknown expansion strategy `{s}`"
            ))),
        }
    }
}

/// The state byte of a voxel, derived from its occupancy counts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CellState {
    /// Untouched solvent.
    Empty,
    /// Owning voxel of a solute atom.
    AtomCenter,
    /// Inside the inflated sphere of a solute atom.
    AtomVolume,
    /// Owning voxel of a water.
    WaterCenter,
    /// Inside the inflated sphere of a water.
    WaterVolume,
}

#[derive(Clone, Copy, Debug, Default)]
struct Cell {
    atom_center: u16,
    atom_volume: u16,
    water_center: u16,
    water_volume: u16,
}

impl Cell {
    // center beats volume, atom beats water
    fn state(self) -> CellState {
        if self.atom_center > 0 {
            CellState::AtomCenter
        } else if self.water_center > 0 {
            CellState::WaterCenter
        } else if self.atom_volume > 0 {
            CellState::AtomVolume
        } else if self.water_volume > 0 {
            CellState::WaterVolume
        } else {
            CellState::Empty
        }
    }

    fn is_empty(self) -> bool {
        self.state() == CellState::Empty
    }

    fn occupied_by_atom(self) -> bool {
        self.atom_center > 0 || self.atom_volume > 0
    }
}

/// Handle of a live atom inside the grid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct GridMemberId(u32);

/// Bookkeeping record of a live atom: its owning voxel and the voxels its
/// expansion inflated.
#[derive(Clone, Debug)]
pub struct GridMember {
    center: [usize; 3],
    inflated: Vec<[usize; 3]>,
    position: Vec3,
    radius: f64,
    water: bool,
}

impl GridMember {
    /// The owning voxel.
    #[must_use]
    pub fn center(&self) -> [usize; 3] {
        self.center
    }

    /// Whether this member is a water.
    #[must_use]
    pub const fn is_water(&self) -> bool {
        self.water
    }
}

/// Per-slice, per-row `[min, max]` column intervals of non-empty voxels.
///
/// Supports iteration over the occupied region without scanning empty
/// space.
#[derive(Clone, Debug)]
pub struct ObjectBounds {
    rows: Vec<Vec<Option<(usize, usize)>>>,
}

impl ObjectBounds {
    /// The column interval of row `y` in slice `z`, when any voxel there
    /// is occupied.
    #[must_use]
    pub fn interval(&self, z: usize, y: usize) -> Option<(usize, usize)> {
        self.rows[z][y]
    }

    /// Iterates the voxel indices inside the recorded intervals.
    pub fn iter(&self) -> impl Iterator<Item = [usize; 3]> + '_ {
        self.rows.iter().enumerate().flat_map(|(z, rows)| {
            rows.iter().enumerate().flat_map(move |(y, interval)| {
                interval
                    .map(|(lo, hi)| (lo..=hi).map(move |x| [x, y, z]))
                    .into_iter()
                    .flatten()
            })
        })
    }
}

/// A regular voxel lattice owning the occupancy state of one molecule.
#[derive(Clone, Debug)]
pub struct Grid {
    origin: Vec3,
    width: f64,
    dims: [usize; 3],
    cells: Array3<Cell>,
    members: FxHashMap<GridMemberId, GridMember>,
    next_id: u32,
    expansion: ExpansionMethod,
    min_exv_radius: f64,
    strict: bool,
}

impl Grid {
    /// A grid covering `[min, max]` inflated by the configured margin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BoundsTooSmall`] when the span collapses in any
    /// dimension.
    pub fn new(min: Vec3, max: Vec3, settings: &Settings) -> Result<Self> {
        if !(min.x <= max.x && min.y <= max.y && min.z <= max.z) {
            return Err(Error::BoundsTooSmall(format!(
                "inverted bounds {min:?} .. {max:?}"
            )));
        }

        let margin = settings.grid_margin + settings.min_exv_radius;
        let width = settings.grid_width;
        let origin = Vec3::new(min.x - margin, min.y - margin, min.z - margin);
        let dims = [
            Self::extent(max.x - min.x + 2.0 * margin, width),
            Self::extent(max.y - min.y + 2.0 * margin, width),
            Self::extent(max.z - min.z + 2.0 * margin, width),
        ];

        Ok(Self {
            origin,
            width,
            dims,
            cells: Array3::from_elem((dims[0], dims[1], dims[2]), Cell::default()),
            members: FxHashMap::default(),
            next_id: 0,
            expansion: settings.expansion_strategy,
            min_exv_radius: settings.min_exv_radius,
            strict: settings.strict,
        })
    }

    /// A grid sized to hold `atoms`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BoundsTooSmall`] when `atoms` is empty.
    pub fn from_atoms<'a>(
        atoms: impl IntoIterator<Item = &'a Atom>,
        settings: &Settings,
    ) -> Result<Self> {
        let mut min = Vec3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Vec3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut any = false;

        for atom in atoms {
            any = true;
            let p = atom.position;
            min = Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        if !any {
            return Err(Error::BoundsTooSmall(
                "cannot build a grid around zero atoms".into(),
            ));
        }

        Self::new(min, max, settings)
    }

    fn extent(span: f64, width: f64) -> usize {
        convert::floor_index((span / width).ceil()) + 1
    }

    /// Voxel width.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Lattice dimensions.
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// The expansion strategy, fixed per grid instance.
    #[must_use]
    pub const fn expansion(&self) -> ExpansionMethod {
        self.expansion
    }

    /// The state of the voxel at `index`.
    #[must_use]
    pub fn state(&self, index: [usize; 3]) -> CellState {
        self.cells[index].state()
    }

    /// Center position of the voxel at `index`.
    #[must_use]
    pub fn position_of(&self, index: [usize; 3]) -> Vec3 {
        Vec3::new(
            (convert::count_f64(index[0]) + 0.5).mul_add(self.width, self.origin.x),
            (convert::count_f64(index[1]) + 0.5).mul_add(self.width, self.origin.y),
            (convert::count_f64(index[2]) + 0.5).mul_add(self.width, self.origin.z),
        )
    }

    /// Voxel index of `position`, or `None` when it lies outside.
    #[must_use]
    pub fn index_of(&self, position: Vec3) -> Option<[usize; 3]> {
        let fractional = [
            (position.x - self.origin.x) / self.width,
            (position.y - self.origin.y) / self.width,
            (position.z - self.origin.z) / self.width,
        ];
        let mut index = [0; 3];
        for axis in 0..3 {
            if fractional[axis] < 0.0 {
                return None;
            }
            let i = convert::floor_index(fractional[axis]);
            if i >= self.dims[axis] {
                return None;
            }
            index[axis] = i;
        }
        Some(index)
    }

    fn clamped_index(&self, position: Vec3) -> [usize; 3] {
        let fractional = [
            (position.x - self.origin.x) / self.width,
            (position.y - self.origin.y) / self.width,
            (position.z - self.origin.z) / self.width,
        ];
        let mut index = [0; 3];
        for axis in 0..3 {
            index[axis] = convert::floor_index(fractional[axis]).min(self.dims[axis] - 1);
        }
        index
    }

    /// Expansion radius used for an atom of type `ff`.
    #[must_use]
    pub fn radius_of(&self, ff: FormFactorType) -> f64 {
        if ff == FormFactorType::Water {
            constants::WATER_RADIUS
        } else {
            constants::vdw_radius(ff).max(self.min_exv_radius)
        }
    }

    /// Adds `atom`, marking its owning voxel and inflating its expansion
    /// pattern. Returns the member handle needed to remove it again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] in strict mode when the atom lies
    /// outside the lattice; otherwise the position is clamped with a
    /// warning.
    pub fn add_atom(&mut self, atom: &Atom) -> Result<GridMemberId> {
        let water = atom.form_factor_type == FormFactorType::Water;
        let center = match self.index_of(atom.position) {
            Some(index) => index,
            None if self.strict => {
                return Err(Error::OutOfBounds(format!(
                    "atom at {:?} lies outside the grid",
                    atom.position
                )));
            }
            None => {
                log::warn!(
                    "atom at {:?} lies outside the grid; clamping to the boundary",
                    atom.position
                );
                self.clamped_index(atom.position)
            }
        };

        let radius = self.radius_of(atom.form_factor_type);
        let inflated = self.pattern(center, atom.position, radius);

        {
            let cell = &mut self.cells[center];
            if water {
                cell.water_center += 1;
            } else {
                cell.atom_center += 1;
            }
        }
        for &index in &inflated {
            let cell = &mut self.cells[index];
            if water {
                cell.water_volume += 1;
            } else {
                cell.atom_volume += 1;
            }
        }

        let id = GridMemberId(self.next_id);
        self.next_id += 1;
        self.members.insert(
            id,
            GridMember {
                center,
                inflated,
                position: atom.position,
                radius,
                water,
            },
        );
        Ok(id)
    }

    /// Removes the member `id`, deflating exactly the voxels it inflated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown handle.
    pub fn remove_atom(&mut self, id: GridMemberId) -> Result<()> {
        let member = self
            .members
            .remove(&id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown grid member {id:?}")))?;

        {
            let cell = &mut self.cells[member.center];
            if member.water {
                cell.water_center -= 1;
            } else {
                cell.atom_center -= 1;
            }
        }
        for &index in &member.inflated {
            let cell = &mut self.cells[index];
            if member.water {
                cell.water_volume -= 1;
            } else {
                cell.atom_volume -= 1;
            }
        }
        Ok(())
    }

    /// Deflates every member, keeping the center marks.
    pub fn deflate_all(&mut self) {
        for member in self.members.values_mut() {
            for &index in &member.inflated {
                let cell = &mut self.cells[index];
                if member.water {
                    cell.water_volume -= 1;
                } else {
                    cell.atom_volume -= 1;
                }
            }
            member.inflated.clear();
        }
    }

    /// Re-inflates every deflated member.
    pub fn expand_all(&mut self) {
        let ids: Vec<GridMemberId> = self.members.keys().copied().collect();
        for id in ids {
            let (center, position, radius, water, deflated) = {
                let member = &self.members[&id];
                (
                    member.center,
                    member.position,
                    member.radius,
                    member.water,
                    member.inflated.is_empty(),
                )
            };
            if !deflated {
                continue;
            }
            let inflated = self.pattern(center, position, radius);
            for &index in &inflated {
                let cell = &mut self.cells[index];
                if water {
                    cell.water_volume += 1;
                } else {
                    cell.atom_volume += 1;
                }
            }
            self.members.get_mut(&id).unwrap().inflated = inflated;
        }
    }

    /// Removes every water member.
    pub fn clear_waters(&mut self) {
        let ids: Vec<GridMemberId> = self
            .members
            .iter()
            .filter(|(_, member)| member.water)
            .map(|(&id, _)| id)
            .collect();
        for id in ids {
            // the handle was just taken from the live member table
            self.remove_atom(id).unwrap();
        }
    }

    /// Number of live members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// The bookkeeping record of a live member.
    #[must_use]
    pub fn member(&self, id: GridMemberId) -> Option<&GridMember> {
        self.members.get(&id)
    }

    /// Whether the grid holds no marks at all.
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.members.is_empty() && self.cells.iter().all(|cell| cell.is_empty())
    }

    /// Number of voxels occupied by solute atoms (centers and volume).
    #[must_use]
    pub fn occupied_volume(&self) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.occupied_by_atom())
            .count()
    }

    /// Center positions of the empty voxels directly adjacent to the
    /// solute-occupied region, deduplicated, in lattice order.
    #[must_use]
    pub fn empty_shell(&self) -> Vec<Vec3> {
        let mut marks = Array3::from_elem((self.dims[0], self.dims[1], self.dims[2]), false);
        for index in self.object_bounds().iter() {
            if !self.cells[index].occupied_by_atom() {
                continue;
            }
            for axis in 0..3 {
                for offset in [-1_i64, 1] {
                    let i = i64::try_from(index[axis]).unwrap() + offset;
                    if i < 0 || i >= i64::try_from(self.dims[axis]).unwrap() {
                        continue;
                    }
                    let mut neighbour = index;
                    neighbour[axis] = usize::try_from(i).unwrap();
                    if self.cells[neighbour].is_empty() {
                        marks[neighbour] = true;
                    }
                }
            }
        }
        marks
            .indexed_iter()
            .filter(|&(_, &marked)| marked)
            .map(|((x, y, z), _)| self.position_of([x, y, z]))
            .collect()
    }

    /// Center positions of every solute-occupied voxel.
    #[must_use]
    pub fn occupied_positions(&self) -> Vec<Vec3> {
        self.object_bounds()
            .iter()
            .filter(|&index| self.cells[index].occupied_by_atom())
            .map(|index| self.position_of(index))
            .collect()
    }

    fn pattern(&self, center: [usize; 3], position: Vec3, radius: f64) -> Vec<[usize; 3]> {
        match self.expansion {
            ExpansionMethod::Minimal => self.minimal_pattern(center),
            ExpansionMethod::Full => self.ball_pattern(center, position, radius),
        }
    }

    fn minimal_pattern(&self, center: [usize; 3]) -> Vec<[usize; 3]> {
        let mut out = Vec::with_capacity(6);
        for axis in 0..3 {
            if center[axis] > 0 {
                let mut index = center;
                index[axis] -= 1;
                out.push(index);
            }
            if center[axis] + 1 < self.dims[axis] {
                let mut index = center;
                index[axis] += 1;
                out.push(index);
            }
        }
        out
    }

    fn ball_pattern(&self, center: [usize; 3], position: Vec3, radius: f64) -> Vec<[usize; 3]> {
        let reach = convert::floor_index((radius / self.width).ceil());
        let lo = |c: usize| c.saturating_sub(reach);
        let hi = |c: usize, dim: usize| (c + reach).min(dim - 1);

        (lo(center[0])..=hi(center[0], self.dims[0]))
            .cartesian_product(lo(center[1])..=hi(center[1], self.dims[1]))
            .cartesian_product(lo(center[2])..=hi(center[2], self.dims[2]))
            .map(|((x, y), z)| [x, y, z])
            .filter(|&index| {
                index != center
                    && (self.position_of(index) - position).magnitude() <= radius
            })
            .collect()
    }

    /// Builds the per-slice row intervals of the occupied region.
    #[must_use]
    pub fn object_bounds(&self) -> ObjectBounds {
        let rows = (0..self.dims[2])
            .map(|z| {
                (0..self.dims[1])
                    .map(|y| {
                        let occupied: Vec<usize> = (0..self.dims[0])
                            .filter(|&x| !self.cells[[x, y, z]].is_empty())
                            .collect();
                        occupied
                            .first()
                            .map(|&lo| (lo, *occupied.last().unwrap()))
                    })
                    .collect()
            })
            .collect();
        ObjectBounds { rows }
    }

    /// Splits the solute-occupied voxels into interior and surface voxel
    /// center positions.
    ///
    /// A voxel on the boundary of the occupied region casts
    /// [`SURFACE_PROBES`] radial probes; any probe reaching empty space
    /// within a few cells classifies it as surface.
    #[must_use]
    pub fn detect_surface(&self) -> (Vec<Vec3>, Vec<Vec3>) {
        let probes = probe_directions(SURFACE_PROBES);
        let mut interior = Vec::new();
        let mut surface = Vec::new();

        for index in self.object_bounds().iter() {
            if !self.cells[index].occupied_by_atom() {
                continue;
            }
            let position = self.position_of(index);
            if self.on_boundary(index) && self.escapes(position, &probes) {
                surface.push(position);
            } else {
                interior.push(position);
            }
        }
        (interior, surface)
    }

    fn on_boundary(&self, index: [usize; 3]) -> bool {
        for axis in 0..3 {
            for offset in [-1_i64, 1] {
                let i = i64::try_from(index[axis]).unwrap() + offset;
                if i < 0 || i >= i64::try_from(self.dims[axis]).unwrap() {
                    return true;
                }
                let mut neighbour = index;
                neighbour[axis] = usize::try_from(i).unwrap();
                if self.cells[neighbour].is_empty() {
                    return true;
                }
            }
        }
        false
    }

    fn escapes(&self, position: Vec3, probes: &[Vec3]) -> bool {
        probes.iter().any(|&direction| {
            (1..=SURFACE_ESCAPE_CELLS).any(|step| {
                let probe =
                    position + direction * (convert::count_f64(step) * self.width);
                self.index_of(probe)
                    .is_none_or(|index| self.cells[index].is_empty())
            })
        })
    }
}

/// `count` directions distributed over the unit sphere by the Fibonacci
/// lattice.
#[must_use]
pub fn probe_directions(count: usize) -> Vec<Vec3> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    (0..count)
        .map(|k| {
            let z = 1.0 - 2.0 * (convert::count_f64(k) + 0.5) / convert::count_f64(count);
            let r = (1.0 - z * z).sqrt();
            let phi = golden_angle * convert::count_f64(k);
            Vec3::new(r * phi.cos(), r * phi.sin(), z)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn settings() -> Settings {
        Settings::default()
    }

    fn carbon(x: f64, y: f64, z: f64) -> Atom {
        Atom::new(Vec3::new(x, y, z), FormFactorType::Carbon)
    }

    #[test]
    fn construction_fails_without_atoms() {
        let atoms: Vec<Atom> = Vec::new();
        assert!(matches!(
            Grid::from_atoms(&atoms, &settings()),
            Err(Error::BoundsTooSmall(_))
        ));
    }

    #[test]
    fn add_then_remove_restores_the_empty_grid() {
        let atoms = [carbon(0.0, 0.0, 0.0), carbon(1.0, 0.0, 0.0), carbon(8.0, 3.0, 2.0)];
        let mut grid = Grid::from_atoms(&atoms, &settings()).unwrap();

        let ids: Vec<GridMemberId> = atoms
            .iter()
            .map(|atom| grid.add_atom(atom).unwrap())
            .collect();
        assert!(grid.occupied_volume() > 0);

        for id in ids.into_iter().rev() {
            grid.remove_atom(id).unwrap();
        }
        assert!(grid.is_pristine());
    }

    #[test]
    fn removal_respects_overlapping_spheres() {
        let atoms = [carbon(0.0, 0.0, 0.0), carbon(1.0, 0.0, 0.0)];
        let mut grid = Grid::from_atoms(&atoms, &settings()).unwrap();
        let first = grid.add_atom(&atoms[0]).unwrap();
        let volume_single = grid.occupied_volume();
        let second = grid.add_atom(&atoms[1]).unwrap();

        grid.remove_atom(second).unwrap();
        assert_eq!(grid.occupied_volume(), volume_single);
        grid.remove_atom(first).unwrap();
        assert!(grid.is_pristine());
    }

    #[test]
    fn minimal_expansion_marks_the_axis_neighbours() {
        let mut config = settings();
        config.expansion_strategy = ExpansionMethod::Minimal;
        let atom = carbon(0.0, 0.0, 0.0);
        let mut grid = Grid::from_atoms([&atom], &config).unwrap();
        grid.add_atom(&atom).unwrap();
        // center plus six neighbours
        assert_eq!(grid.occupied_volume(), 7);
    }

    #[test]
    fn full_expansion_covers_the_ball() {
        let atom = carbon(0.0, 0.0, 0.0);
        let mut grid = Grid::from_atoms([&atom], &settings()).unwrap();
        grid.add_atom(&atom).unwrap();

        let radius = grid.radius_of(FormFactorType::Carbon);
        let expected = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3);
        let counted = convert::count_f64(grid.occupied_volume()) * grid.width().powi(3);
        // voxelization error at this radius stays well below the ball itself
        assert!((counted - expected).abs() / expected < 0.5, "{counted} vs {expected}");
    }

    #[test]
    fn deflate_and_expand_are_inverse() {
        let atoms = [carbon(0.0, 0.0, 0.0), carbon(3.0, 0.0, 0.0)];
        let mut grid = Grid::from_atoms(&atoms, &settings()).unwrap();
        for atom in &atoms {
            grid.add_atom(atom).unwrap();
        }
        let inflated = grid.occupied_volume();

        grid.deflate_all();
        assert_eq!(grid.occupied_volume(), 2); // only the centers remain
        grid.expand_all();
        assert_eq!(grid.occupied_volume(), inflated);
    }

    #[test]
    fn strict_mode_rejects_outside_atoms() {
        let inside = carbon(0.0, 0.0, 0.0);
        let outside = carbon(1000.0, 0.0, 0.0);
        let mut config = settings();
        config.strict = true;
        let mut grid = Grid::from_atoms([&inside], &config).unwrap();
        assert!(matches!(
            grid.add_atom(&outside),
            Err(Error::OutOfBounds(_))
        ));
    }

    #[test]
    fn surface_detection_splits_a_cluster() {
        let atoms: Vec<Atom> = (0..5)
            .flat_map(|x| (0..5).flat_map(move |y| (0..5).map(move |z| {
                carbon(f64::from(x) * 1.5, f64::from(y) * 1.5, f64::from(z) * 1.5)
            })))
            .collect();
        let mut grid = Grid::from_atoms(&atoms, &settings()).unwrap();
        for atom in &atoms {
            grid.add_atom(atom).unwrap();
        }

        let (interior, surface) = grid.detect_surface();
        assert!(!surface.is_empty());
        assert!(!interior.is_empty());
        assert_eq!(interior.len() + surface.len(), grid.occupied_volume());
    }

    #[test]
    fn water_members_are_cleared_separately() {
        let atom = carbon(0.0, 0.0, 0.0);
        let water = Atom::water(Vec3::new(3.0, 0.0, 0.0));
        let mut grid = Grid::from_atoms([&atom], &settings()).unwrap();
        grid.add_atom(&atom).unwrap();
        grid.add_atom(&water).unwrap();
        assert_eq!(grid.member_count(), 2);

        grid.clear_waters();
        assert_eq!(grid.member_count(), 1);
        assert!(grid.occupied_volume() > 0);
    }

    #[test]
    fn probe_directions_are_unit_length() {
        for direction in probe_directions(SURFACE_PROBES) {
            assert_approx_eq!(f64, direction.magnitude(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn members_record_their_owning_voxel() {
        let atom = carbon(0.0, 0.0, 0.0);
        let water = Atom::water(Vec3::new(3.0, 0.0, 0.0));
        let mut grid = Grid::from_atoms([&atom], &settings()).unwrap();
        let id = grid.add_atom(&atom).unwrap();
        let water_id = grid.add_atom(&water).unwrap();

        let member = grid.member(id).unwrap();
        assert_eq!(member.center(), grid.index_of(atom.position).unwrap());
        assert!(!member.is_water());
        assert!(grid.member(water_id).unwrap().is_water());

        // the interval table covers the occupied region
        let bounds = grid.object_bounds();
        let center = member.center();
        let (lo, hi) = bounds.interval(center[2], center[1]).unwrap();
        assert!((lo..=hi).contains(&center[0]));
    }

    #[test]
    fn positions_round_trip_through_indices() {
        let atom = carbon(0.0, 0.0, 0.0);
        let grid = Grid::from_atoms([&atom], &settings()).unwrap();
        let index = grid.index_of(Vec3::new_zero()).unwrap();
        let center = grid.position_of(index);
        assert!((center - Vec3::new_zero()).magnitude() <= grid.width() * 3.0_f64.sqrt());
        assert_eq!(grid.index_of(center).unwrap(), index);
    }
}
