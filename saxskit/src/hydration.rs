//! Hydration-shell generation.
//!
//! A placement strategy proposes candidate waters on the grid, a culling
//! strategy reduces them to the configured target, and the survivors become
//! the molecule's [`ExplicitHydration`].

use crate::atom::Atom;
use crate::body::Body;
use crate::constants;
use crate::culling::{CullingContext, CullingStrategy as _};
use crate::error::Error;
use crate::grid::{probe_directions, Grid};
use crate::settings::Settings;
use enum_dispatch::enum_dispatch;
use lin_alg::f64::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Directions probed per atom by the radial strategy.
const RADIAL_DIRECTIONS: usize = 16;

/// Directions probed per atom by the Pepsi strategy.
const PEPSI_DIRECTIONS: usize = 12;

/// Shell offset of the Pepsi strategy, Å.
const PEPSI_SHELL: f64 = 3.0;

/// The enumerated water placement option.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum HydrationStrategy {
    /// Do not place any waters.
    None,
    /// Probe the six axis directions around every solute atom.
    Axes,
    /// Probe Fibonacci-distributed directions around every solute atom.
    Radial,
    /// Place waters on the empty voxel shell around the solute volume.
    Jan,
    /// Probe a fixed 3 Å shell around every solute atom.
    Pepsi,
}

impl HydrationStrategy {
    /// Materializes the strategy value for this option.
    #[must_use]
    pub fn strategy(self) -> Placement {
        match self {
            Self::None => NoPlacement.into(),
            Self::Axes => AxesPlacement.into(),
            Self::Radial => RadialPlacement.into(),
            Self::Jan => JanPlacement.into(),
            Self::Pepsi => PepsiPlacement.into(),
        }
    }
}

impl fmt::Display for HydrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Axes => "axes",
            Self::Radial => "radial",
            Self::Jan => "jan",
            Self::Pepsi => "pepsi",
        })
    }
}

impl FromStr for HydrationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "none" => Ok(Self::None),
            "axes" => Ok(Self::Axes),
            "radial" => Ok(Self::Radial),
            "jan" => Ok(Self::Jan),
            "pepsi" => Ok(Self::Pepsi),
            _ => Err(Error::InvalidInput(format!(
                "unknown hydration strategy `{s}`"
            ))),
        }
    }
}

/// A placement strategy: proposes candidate waters on the grid. Every
/// accepted candidate is registered in the grid so later probes collide
/// with it.
#[enum_dispatch]
pub trait PlacementStrategy {
    /// Proposes candidate waters around `solute`.
    fn place(&self, grid: &mut Grid, solute: &[&Atom]) -> Vec<Atom>;
}

/// Tagged strategy value dispatched behind [`PlacementStrategy`].
#[enum_dispatch(PlacementStrategy)]
#[derive(Clone, Debug)]
pub enum Placement {
    /// See [`NoPlacement`].
    NoPlacement,
    /// See [`AxesPlacement`].
    AxesPlacement,
    /// See [`RadialPlacement`].
    RadialPlacement,
    /// See [`JanPlacement`].
    JanPlacement,
    /// See [`PepsiPlacement`].
    PepsiPlacement,
}

fn try_place(grid: &mut Grid, position: Vec3, out: &mut Vec<Atom>) {
    let Some(index) = grid.index_of(position) else {
        return;
    };
    if grid.state(index) != crate::grid::CellState::Empty {
        return;
    }
    let water = Atom::water(position);
    // placement happens strictly inside the lattice, so this cannot fail
    grid.add_atom(&water).unwrap();
    out.push(water);
}

fn place_directional(grid: &mut Grid, solute: &[&Atom], directions: &[Vec3], offset: f64) -> Vec<Atom> {
    let mut out = Vec::new();
    for atom in solute {
        let reach = grid.radius_of(atom.form_factor_type) + offset;
        for &direction in directions {
            try_place(grid, atom.position + direction * reach, &mut out);
        }
    }
    out
}

/// Places nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPlacement;

impl PlacementStrategy for NoPlacement {
    fn place(&self, _grid: &mut Grid, _solute: &[&Atom]) -> Vec<Atom> {
        Vec::new()
    }
}

/// Probes the six axis directions at contact distance around every atom.
#[derive(Clone, Copy, Debug, Default)]
pub struct AxesPlacement;

impl PlacementStrategy for AxesPlacement {
    fn place(&self, grid: &mut Grid, solute: &[&Atom]) -> Vec<Atom> {
        let directions = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, -1.0),
        ];
        place_directional(grid, solute, &directions, constants::WATER_RADIUS)
    }
}

/// Probes Fibonacci-distributed directions at contact distance around
/// every atom.
#[derive(Clone, Copy, Debug, Default)]
pub struct RadialPlacement;

impl PlacementStrategy for RadialPlacement {
    fn place(&self, grid: &mut Grid, solute: &[&Atom]) -> Vec<Atom> {
        let directions = probe_directions(RADIAL_DIRECTIONS);
        place_directional(grid, solute, &directions, constants::WATER_RADIUS)
    }
}

/// Fills the empty voxel shell directly around the solute volume.
#[derive(Clone, Copy, Debug, Default)]
pub struct JanPlacement;

impl PlacementStrategy for JanPlacement {
    fn place(&self, grid: &mut Grid, _solute: &[&Atom]) -> Vec<Atom> {
        let shell = grid.empty_shell();
        let mut out = Vec::new();
        for position in shell {
            try_place(grid, position, &mut out);
        }
        out
    }
}

/// Probes a fixed 3 Å shell around every atom.
#[derive(Clone, Copy, Debug, Default)]
pub struct PepsiPlacement;

impl PlacementStrategy for PepsiPlacement {
    fn place(&self, grid: &mut Grid, solute: &[&Atom]) -> Vec<Atom> {
        let directions = probe_directions(PEPSI_DIRECTIONS);
        place_directional(grid, solute, &directions, PEPSI_SHELL)
    }
}

/// The hydration shell owned by a molecule.
#[derive(Clone, Debug, Default)]
pub struct ExplicitHydration {
    waters: Vec<Atom>,
    epoch: u64,
}

impl ExplicitHydration {
    /// The water atoms.
    #[must_use]
    pub fn waters(&self) -> &[Atom] {
        &self.waters
    }

    /// Number of waters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waters.len()
    }

    /// Whether the shell is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waters.is_empty()
    }

    /// The mutation epoch; bumps on every replacement.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Replaces the shell.
    pub fn replace(&mut self, waters: Vec<Atom>) {
        self.waters = waters;
        self.epoch += 1;
    }

    /// Drops every water.
    pub fn clear(&mut self) {
        if !self.waters.is_empty() {
            self.waters.clear();
            self.epoch += 1;
        }
    }
}

/// Runs the placement/culling pipeline on an already-populated grid and
/// returns the surviving waters. The grid's water marks are left in sync
/// with the survivors.
#[must_use]
pub fn generate(grid: &mut Grid, bodies: &[Body], settings: &Settings) -> Vec<Atom> {
    grid.clear_waters();

    let solute: Vec<&Atom> = bodies.iter().flat_map(Body::atoms).collect();
    let candidates = settings
        .hydration_strategy
        .strategy()
        .place(grid, &solute);

    let mut target = settings.water_target.resolve(solute.len());
    if target > candidates.len() {
        log::warn!(
            "hydration target {target} exceeds the {} placed candidates; using all of them",
            candidates.len()
        );
        target = candidates.len();
    }

    let context = CullingContext::new(bodies);
    let culled = settings
        .culling_strategy
        .strategy()
        .cull(candidates, &context, target);

    // re-register only the survivors
    grid.clear_waters();
    for water in &culled {
        // water positions were validated during placement
        grid.add_atom(water).unwrap();
    }
    culled
}
