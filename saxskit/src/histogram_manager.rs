//! Parallel computation of the partial distance histograms of a molecule.
//!
//! Two orthogonal switches are fixed at construction: the bin-entry kernel
//! (weighted or unweighted) and the bin-width policy (compile-time 1 Å or
//! runtime-configured). [`new_calculator`] is the runtime façade that picks
//! one of the four specializations.
//!
//! Accumulation runs over disjoint interleaved row chunks with per-chunk
//! private buffers; the combiner merges the chunk buffers sequentially in
//! chunk order. The chunk partition does not depend on the worker count,
//! so identical inputs give bit-identical tables at any thread count.

use crate::compact_coordinates::{distance, CompactCoordinates};
use crate::composite_histogram::{CompositeDistanceHistogram, CompositeParts};
use crate::convert;
use crate::distance_histogram::DistanceHistogram;
use crate::distribution::{
    BinEntry, Distribution1D, Distribution2D, Distribution3D, Unweighted, Weighted,
};
use crate::error::Result;
use crate::excluded_volume::{self, ExvMethod};
use crate::form_factor::{FormFactorTable, FormFactorType};
use crate::molecule::Molecule;
use crate::pool;
use crate::settings::Settings;
use ndarray::{Array2, Array3};
use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::Arc;

/// Distance bin width of the compile-time fixed specialization, Å.
pub const DEFAULT_BIN_WIDTH: f64 = 1.0;

/// Upper bound on the number of private accumulation buffers.
const MAX_CHUNKS: usize = 64;

/// Bin-width policy of the accumulation loops.
pub trait BinningPolicy: Clone + Copy + Send + Sync + 'static {
    /// Reciprocal bin width.
    fn inv_width(self) -> f64;
}

/// Compile-time fixed 1 Å bins; the reciprocal width folds away.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedWidth;

impl BinningPolicy for FixedWidth {
    #[inline]
    fn inv_width(self) -> f64 {
        1.0 / DEFAULT_BIN_WIDTH
    }
}

/// Runtime-configured bin width.
#[derive(Clone, Copy, Debug)]
pub struct VariableWidth {
    inv: f64,
}

impl VariableWidth {
    /// Policy for bins of the given width.
    #[must_use]
    pub fn new(width: f64) -> Self {
        Self { inv: width.recip() }
    }
}

impl BinningPolicy for VariableWidth {
    #[inline]
    fn inv_width(self) -> f64 {
        self.inv
    }
}

/// Compact mapping from the form-factor types present in a molecule to
/// table slots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TypeMap {
    types: Vec<FormFactorType>,
    slots: [Option<usize>; FormFactorType::COUNT],
}

impl TypeMap {
    pub(crate) fn from_present(present: impl IntoIterator<Item = FormFactorType>) -> Self {
        let mut seen = [false; FormFactorType::COUNT];
        for ff in present {
            seen[ff.index()] = true;
        }
        // waters live in their own stratum, not in the table slots
        seen[FormFactorType::Water.index()] = false;

        let mut types = Vec::new();
        let mut slots = [None; FormFactorType::COUNT];
        for ff in FormFactorType::ALL {
            if seen[ff.index()] {
                slots[ff.index()] = Some(types.len());
                types.push(ff);
            }
        }
        Self { types, slots }
    }

    pub(crate) fn slot(&self, ff: FormFactorType) -> usize {
        // assembly guarantees every accumulated type is mapped
        self.slots[ff.index()].unwrap()
    }

    pub(crate) fn len(&self) -> usize {
        self.types.len()
    }

    pub(crate) fn types(&self) -> &[FormFactorType] {
        &self.types
    }

    pub(crate) fn covers(&self, other: &Self) -> bool {
        other
            .types
            .iter()
            .all(|&ff| self.slots[ff.index()].is_some())
    }
}

/// Per-chunk private accumulation buffers.
#[derive(Clone, Debug)]
pub(crate) struct Buffers<E> {
    pub aa: Distribution3D<E>,
    pub aw: Distribution2D<E>,
    pub ww: Distribution1D<E>,
    pub overflow: u64,
}

impl<E: BinEntry> Buffers<E> {
    pub(crate) fn new(types: usize, d_axis: crate::axis::Axis) -> Self {
        Self {
            aa: Distribution3D::new(types, d_axis),
            aw: Distribution2D::new(types, d_axis),
            ww: Distribution1D::new(d_axis),
            overflow: 0,
        }
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.aa.merge(&other.aa);
        self.aw.merge(&other.aw);
        self.ww.merge(&other.ww);
        self.overflow += other.overflow;
    }
}

/// The packed inputs of one accumulation run.
pub(crate) struct Workload<'a> {
    /// Solute atoms plus any synthesized excluded-volume dummies.
    pub atoms: &'a CompactCoordinates,
    /// Compact slot of each atom entry.
    pub slots: &'a [usize],
    /// Implicit per-atom excluded-volume weights and the slot they feed.
    pub implicit: Option<(&'a [f64], usize)>,
    /// Hydration waters.
    pub waters: &'a CompactCoordinates,
}

// Self pairs all land in the d = 0 bin.
pub(crate) fn accumulate_self<E: BinEntry>(work: &Workload<'_>, aa: &mut Distribution3D<E>) {
    for (i, quad) in work.atoms.quads().iter().enumerate() {
        let w = quad[3];
        let slot = work.slots[i];
        aa.add(slot, slot, 0, w * w, 0.0);
        if let Some((exv, x)) = work.implicit {
            aa.add(slot, x, 0, w * exv[i], 0.0);
            aa.add(x, x, 0, exv[i] * exv[i], 0.0);
        }
    }
}

// Unordered cross pairs over the assigned rows. Same-slot pairs are
// accumulated doubled so the table is Debye-ready; distinct-slot pairs are
// stored once and pick up the symmetry factor in the transform.
pub(crate) fn accumulate_atom_pairs<E: BinEntry, B: BinningPolicy>(
    work: &Workload<'_>,
    rows: impl Iterator<Item = usize>,
    binning: B,
    buffers: &mut Buffers<E>,
) {
    let quads = work.atoms.quads();
    let inv_width = binning.inv_width();
    let bins = buffers.aa.axis().bins;

    for i in rows {
        let qi = quads[i];
        let si = work.slots[i];
        for (j, qj) in quads.iter().enumerate().skip(i + 1) {
            let d = distance(&qi, qj);
            let bin = convert::round_bin(d, inv_width);
            if bin >= bins {
                buffers.overflow += 1;
                continue;
            }
            let sj = work.slots[j];
            let w = qi[3] * qj[3];
            if si == sj {
                buffers.aa.add(si, si, bin, 2.0 * w, d);
            } else {
                buffers.aa.add(si, sj, bin, w, d);
            }
            if let Some((exv, x)) = work.implicit {
                buffers.aa.add(si, x, bin, qi[3] * exv[j], d);
                buffers.aa.add(sj, x, bin, qj[3] * exv[i], d);
                buffers.aa.add(x, x, bin, 2.0 * exv[i] * exv[j], d);
            }
        }
    }
}

// Every pair between two disjoint coordinate sets, with the same storage
// conventions as `accumulate_atom_pairs`.
pub(crate) fn accumulate_cross_sets<E: BinEntry, B: BinningPolicy>(
    a: &Workload<'_>,
    b: &Workload<'_>,
    binning: B,
    buffers: &mut Buffers<E>,
) {
    let inv_width = binning.inv_width();
    let bins = buffers.aa.axis().bins;

    for (i, qi) in a.atoms.quads().iter().enumerate() {
        let si = a.slots[i];
        for (j, qj) in b.atoms.quads().iter().enumerate() {
            let d = distance(qi, qj);
            let bin = convert::round_bin(d, inv_width);
            if bin >= bins {
                buffers.overflow += 1;
                continue;
            }
            let sj = b.slots[j];
            let w = qi[3] * qj[3];
            if si == sj {
                buffers.aa.add(si, si, bin, 2.0 * w, d);
            } else {
                buffers.aa.add(si, sj, bin, w, d);
            }
            if let Some((exv_a, x)) = a.implicit {
                buffers.aa.add(sj, x, bin, qj[3] * exv_a[i], d);
            }
            if let Some((exv_b, x)) = b.implicit {
                buffers.aa.add(si, x, bin, qi[3] * exv_b[j], d);
            }
            if let (Some((exv_a, x)), Some((exv_b, _))) = (a.implicit, b.implicit) {
                buffers.aa.add(x, x, bin, 2.0 * exv_a[i] * exv_b[j], d);
            }
        }
    }
}

// Atom-water pairs, one entry per pair; the factor 2 is applied in the
// transform.
pub(crate) fn accumulate_atom_water<E: BinEntry, B: BinningPolicy>(
    work: &Workload<'_>,
    rows: impl Iterator<Item = usize>,
    binning: B,
    buffers: &mut Buffers<E>,
) {
    let quads = work.atoms.quads();
    let inv_width = binning.inv_width();
    let bins = buffers.aw.axis().bins;

    for i in rows {
        let qi = quads[i];
        let si = work.slots[i];
        for qw in work.waters.quads() {
            let d = distance(&qi, qw);
            let bin = convert::round_bin(d, inv_width);
            if bin >= bins {
                buffers.overflow += 1;
                continue;
            }
            buffers.aw.add(si, bin, qi[3] * qw[3], d);
            if let Some((exv, x)) = work.implicit {
                buffers.aw.add(x, bin, exv[i] * qw[3], d);
            }
        }
    }
}

pub(crate) fn accumulate_water_pairs<E: BinEntry, B: BinningPolicy>(
    work: &Workload<'_>,
    rows: impl Iterator<Item = usize>,
    binning: B,
    buffers: &mut Buffers<E>,
) {
    let quads = work.waters.quads();
    let inv_width = binning.inv_width();
    let bins = buffers.ww.axis().bins;

    for i in rows {
        let qi = quads[i];
        for qj in quads.iter().skip(i + 1) {
            let d = distance(&qi, qj);
            let bin = convert::round_bin(d, inv_width);
            if bin >= bins {
                buffers.overflow += 1;
                continue;
            }
            buffers.ww.add(bin, 2.0 * qi[3] * qj[3], d);
        }
    }
}

pub(crate) fn accumulate_water_self<E: BinEntry>(work: &Workload<'_>, ww: &mut Distribution1D<E>) {
    for quad in work.waters.quads() {
        ww.add(0, quad[3] * quad[3], 0.0);
    }
}

/// Runs the full accumulation over `work`, parallelized over interleaved
/// row chunks, and merges the chunk buffers in chunk order.
pub(crate) fn compute_buffers<E: BinEntry, B: BinningPolicy>(
    work: &Workload<'_>,
    types: usize,
    d_axis: crate::axis::Axis,
    binning: B,
    job_size: usize,
) -> Buffers<E> {
    let n = work.atoms.len().max(work.waters.len());
    let chunks = n.div_ceil(job_size.max(1)).clamp(1, MAX_CHUNKS);

    let mut partials: Vec<Buffers<E>> = pool::install(|| {
        (0..chunks)
            .into_par_iter()
            .map(|c| {
                let mut buffers = Buffers::new(types, d_axis);
                accumulate_atom_pairs(
                    work,
                    (c..work.atoms.len()).step_by(chunks),
                    binning,
                    &mut buffers,
                );
                accumulate_atom_water(
                    work,
                    (c..work.atoms.len()).step_by(chunks),
                    binning,
                    &mut buffers,
                );
                accumulate_water_pairs(
                    work,
                    (c..work.waters.len()).step_by(chunks),
                    binning,
                    &mut buffers,
                );
                buffers
            })
            .collect()
    });

    let mut combined = partials.remove(0);
    for partial in &partials {
        combined.merge(partial);
    }
    accumulate_self(work, &mut combined.aa);
    accumulate_water_self(work, &mut combined.ww);
    combined
}

/// The assembled coordinates of one calculation.
pub(crate) struct Assembly {
    pub atoms: CompactCoordinates,
    pub slots: Vec<usize>,
    pub implicit: Option<(Vec<f64>, usize)>,
    pub waters: CompactCoordinates,
    pub type_map: TypeMap,
}

impl Assembly {
    pub(crate) fn workload(&self) -> Workload<'_> {
        Workload {
            atoms: &self.atoms,
            slots: &self.slots,
            implicit: self
                .implicit
                .as_ref()
                .map(|(weights, x)| (weights.as_slice(), *x)),
            waters: &self.waters,
        }
    }
}

/// Snapshots the molecule into packed arrays. Body atoms typed as water
/// join the hydration stratum. With `with_exv` the excluded-volume model
/// contributes dummy atoms (grid methods, surface weights scaled by
/// `surface_scale`) or implicit per-atom weights.
pub(crate) fn assemble(
    molecule: &mut Molecule,
    settings: &Settings,
    with_exv: bool,
    surface_scale: f64,
) -> Result<Assembly> {
    let use_charge = settings.use_effective_charge;
    let mut atoms = CompactCoordinates::default();
    let mut water_atoms = molecule.hydration().waters().to_vec();
    for body in molecule.bodies() {
        for atom in body.atoms() {
            if atom.form_factor_type == FormFactorType::Water {
                water_atoms.push(atom.clone());
            } else {
                atoms.push(
                    [atom.position.x, atom.position.y, atom.position.z],
                    atom.weight(use_charge),
                    atom.form_factor_type,
                );
            }
        }
    }
    let waters = CompactCoordinates::from_waters(&water_atoms, use_charge);

    let method = settings.exv_method;
    let mut present: Vec<FormFactorType> = atoms.types().to_vec();
    let mut implicit_weights = None;

    if with_exv && !molecule.is_empty() {
        if method.is_grid_based() {
            let grid = molecule.refresh_grid(settings)?;
            let cloud = excluded_volume::create(grid, effective_method(method));
            let weight = excluded_volume::voxel_weight(settings.grid_width);
            for p in &cloud.interior {
                atoms.push([p.x, p.y, p.z], weight, FormFactorType::ExcludedVolume);
            }
            for p in &cloud.surface {
                atoms.push(
                    [p.x, p.y, p.z],
                    weight * surface_scale,
                    FormFactorType::ExcludedVolume,
                );
            }
            present.push(FormFactorType::ExcludedVolume);
        } else {
            implicit_weights = Some(
                atoms
                    .types()
                    .iter()
                    .map(|&ff| excluded_volume::implicit_weight(ff))
                    .collect::<Vec<f64>>(),
            );
            present.push(FormFactorType::ExcludedVolume);
        }
    }

    let type_map = TypeMap::from_present(present);
    let slots: Vec<usize> = atoms.types().iter().map(|&ff| type_map.slot(ff)).collect();
    let implicit =
        implicit_weights.map(|weights| (weights, type_map.slot(FormFactorType::ExcludedVolume)));

    Ok(Assembly {
        atoms,
        slots,
        implicit,
        waters,
        type_map,
    })
}

// The scalable model reuses the surface-aware cloud so the surface weight
// can vary independently.
fn effective_method(method: ExvMethod) -> ExvMethod {
    if method == ExvMethod::GridScalable {
        ExvMethod::GridSurface
    } else {
        method
    }
}

pub(crate) fn into_composite<E: BinEntry>(
    buffers: &Buffers<E>,
    type_map: &TypeMap,
    settings: &Settings,
) -> Result<CompositeDistanceHistogram> {
    let t = type_map.len();
    let d_axis = settings.d_axis();
    let bins = d_axis.bins;

    let mut aa = Array3::zeros((t, t, bins));
    for i in 0..t {
        for j in i..t {
            for (bin, value) in buffers.aa.pair_values(i, j).into_iter().enumerate() {
                aa[[i, j, bin]] = value;
            }
        }
    }
    let mut aw = Array2::zeros((t, bins));
    for row in 0..t {
        for (bin, value) in buffers.aw.row_values(row).into_iter().enumerate() {
            aw[[row, bin]] = value;
        }
    }

    if buffers.overflow > 0 && settings.verbose {
        log::debug!(
            "{} pair distances fell beyond the distance axis and were dropped",
            buffers.overflow
        );
    }

    let parts = CompositeParts {
        types: type_map.types().to_vec(),
        aa,
        aw,
        ww: buffers.ww.values(),
        effective_d_aa: buffers.aa.effective_d(),
        effective_d_aw: buffers.aw.effective_d(),
        effective_d_ww: buffers.ww.effective_d(),
    };

    let exv_volume = excluded_volume::form_factor_volume(
        settings.exv_method,
        type_map.types(),
        settings.grid_width,
    );
    CompositeDistanceHistogram::new(
        settings.q_axis(),
        d_axis,
        parts,
        FormFactorTable::new(settings.q_axis(), exv_volume),
    )
}

pub(crate) fn into_total<E: BinEntry>(buffers: &Buffers<E>, type_map: &TypeMap) -> DistanceHistogram {
    let d_axis = *buffers.ww.axis();
    let t = type_map.len();
    let width = d_axis.width();

    let mut counts = buffers.ww.values();
    for i in 0..t {
        for j in i..t {
            let sym = if i == j { 1.0 } else { 2.0 };
            for (count, value) in counts.iter_mut().zip(buffers.aa.pair_values(i, j)) {
                *count += sym * value;
            }
        }
    }
    for (count, value) in counts.iter_mut().zip(buffers.aw.collapsed()) {
        *count += 2.0 * value;
    }

    let effective = (0..d_axis.bins)
        .map(|bin| {
            let stats = [
                buffers.aa.bin_stats(bin),
                buffers.aw.bin_stats(bin),
                buffers.ww.bin_stats(bin),
            ];
            let (entries, dsum) = stats
                .iter()
                .fold((0.0, 0.0), |acc, s| (acc.0 + s.0, acc.1 + s.1));
            if entries > 0.0 {
                dsum / entries
            } else {
                convert::bin_distance(bin, width)
            }
        })
        .collect();

    DistanceHistogram::new(d_axis, counts, effective)
}

/// A distance calculator: drives the accumulation for one molecule.
pub trait DistanceCalculator {
    /// The total 1-D distance profile.
    ///
    /// # Errors
    ///
    /// Propagates assembly failures.
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram>;

    /// The full per-pair table plus the total, ready for evaluation.
    ///
    /// # Errors
    ///
    /// Propagates assembly failures and shape mismatches.
    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeDistanceHistogram>;
}

/// Full-recomputation manager, specialized over the bin-entry kernel and
/// the bin-width policy.
pub struct HistogramManager<E: BinEntry, B: BinningPolicy> {
    settings: Settings,
    binning: B,
    surface_scale: f64,
    _kernel: PhantomData<E>,
}

impl<E: BinEntry, B: BinningPolicy> HistogramManager<E, B> {
    /// Manager capturing its effective settings at construction.
    #[must_use]
    pub fn with_binning(settings: Settings, binning: B) -> Self {
        Self {
            settings,
            binning,
            surface_scale: 1.0,
            _kernel: PhantomData,
        }
    }

    fn with_surface_scale(settings: Settings, binning: B, surface_scale: f64) -> Self {
        Self {
            settings,
            binning,
            surface_scale,
            _kernel: PhantomData,
        }
    }

    fn run(&self, molecule: &mut Molecule, with_exv: bool) -> Result<(Buffers<E>, TypeMap)> {
        let assembly = assemble(molecule, &self.settings, with_exv, self.surface_scale)?;
        let buffers = compute_buffers::<E, B>(
            &assembly.workload(),
            assembly.type_map.len(),
            self.settings.d_axis(),
            self.binning,
            self.settings.job_size,
        );
        Ok((buffers, assembly.type_map))
    }
}

impl<E: BinEntry, B: BinningPolicy> DistanceCalculator for HistogramManager<E, B> {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        // the plain profile carries no dummy atoms; implicit models reduce
        // the weights instead
        let assembly = assemble(molecule, &self.settings, false, self.surface_scale)?;
        let mut atoms = assembly.atoms;
        if self.settings.exv_method.is_implicit() {
            let mean = excluded_volume::form_factor_volume(
                self.settings.exv_method,
                assembly.type_map.types(),
                self.settings.grid_width,
            );
            atoms.implicit_exv(crate::constants::WATER_DENSITY * mean);
        }
        let work = Workload {
            atoms: &atoms,
            slots: &assembly.slots,
            implicit: None,
            waters: &assembly.waters,
        };
        let buffers = compute_buffers::<E, B>(
            &work,
            assembly.type_map.len(),
            self.settings.d_axis(),
            self.binning,
            self.settings.job_size,
        );
        Ok(into_total(&buffers, &assembly.type_map))
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeDistanceHistogram> {
        let (buffers, type_map) = self.run(molecule, true)?;
        let mut composite = into_composite(&buffers, &type_map, &self.settings)?;
        install_scalable_rebuild::<E, B>(&mut composite, molecule, &self.settings, self.binning);
        Ok(composite)
    }
}

/// Installs the scalable excluded-volume rebuild closure when the selected
/// model asks for one. The closure snapshots the structure and reruns the
/// full pipeline with the surface dummy weights scaled.
pub(crate) fn install_scalable_rebuild<E: BinEntry, B: BinningPolicy>(
    composite: &mut CompositeDistanceHistogram,
    molecule: &Molecule,
    settings: &Settings,
    binning: B,
) {
    if settings.exv_method != ExvMethod::GridScalable {
        return;
    }
    let solute: Vec<crate::atom::Atom> = molecule.atoms().cloned().collect();
    let waters = molecule.hydration().waters().to_vec();
    let settings = settings.clone();
    composite.set_exv_rebuild(Arc::new(move |scale| {
        let mut rebuilt = Molecule::from_atoms(solute.clone());
        rebuilt.set_hydration(waters.clone());
        let manager =
            HistogramManager::<E, B>::with_surface_scale(settings.clone(), binning, scale);
        let (buffers, type_map) = manager.run(&mut rebuilt, true)?;
        into_composite(&buffers, &type_map, &settings)
    }));
}

/// Builds the specialization selected by `settings`: weighted bins toggle
/// the kernel, a non-default `distance_bin_width` the width policy.
#[must_use]
pub fn new_calculator(settings: &Settings) -> Box<dyn DistanceCalculator + Send> {
    let fixed = (settings.distance_bin_width - DEFAULT_BIN_WIDTH).abs() < 1e-12;
    let variable = VariableWidth::new(settings.distance_bin_width);
    match (settings.weighted_bins, fixed) {
        (false, true) => Box::new(HistogramManager::<Unweighted, FixedWidth>::with_binning(
            settings.clone(),
            FixedWidth,
        )),
        (false, false) => Box::new(HistogramManager::<Unweighted, VariableWidth>::with_binning(
            settings.clone(),
            variable,
        )),
        (true, true) => Box::new(HistogramManager::<Weighted, FixedWidth>::with_binning(
            settings.clone(),
            FixedWidth,
        )),
        (true, false) => Box::new(HistogramManager::<Weighted, VariableWidth>::with_binning(
            settings.clone(),
            variable,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::form_factor::FormFactor;
    use float_cmp::assert_approx_eq;
    use lin_alg::f64::Vec3;

    fn implicit_settings() -> Settings {
        let mut settings = Settings::default();
        settings.exv_method = ExvMethod::Pepsi;
        settings
    }

    fn carbon(x: f64, y: f64, z: f64) -> Atom {
        Atom::new(Vec3::new(x, y, z), FormFactorType::Carbon)
    }

    #[test]
    fn empty_molecule_gives_a_zero_histogram() {
        let settings = Settings::default();
        let mut molecule = Molecule::default();
        let mut manager = new_calculator(&settings);

        let total = manager.calculate(&mut molecule).unwrap();
        assert_approx_eq!(f64, total.total(), 0.0, ulps = 2);
        assert_eq!(total.counts().len(), settings.d_axis().bins);

        let mut composite = manager.calculate_all(&mut molecule).unwrap();
        let profile = composite.evaluate(crate::composite_histogram::ProfileParams::default());
        assert!(profile.intensity().iter().all(|&i| i == 0.0));
    }

    #[test]
    fn single_atom_histogram_is_flat() {
        let settings = implicit_settings();
        let mut molecule = Molecule::from_atoms(vec![carbon(0.0, 0.0, 0.0)]);
        let mut manager = new_calculator(&settings);
        let mut composite = manager.calculate_all(&mut molecule).unwrap();

        // only the d = 0 bin is populated
        let total = composite.total_histogram();
        assert!(total.counts().iter().skip(1).all(|&c| c == 0.0));
        assert!(total.counts()[0] > 0.0);

        // with the excluded volume switched off the profile is w^2 f(q)^2
        let profile = composite.evaluate(crate::composite_histogram::ProfileParams {
            cx: 0.0,
            ..Default::default()
        });
        let ff = FormFactor::normalized(FormFactorType::Carbon);
        for (&q, &i) in profile.q().iter().zip(profile.intensity()) {
            assert_approx_eq!(f64, i, 36.0 * ff.evaluate(q).powi(2), epsilon = 1e-9);
        }
    }

    #[test]
    fn two_atoms_fill_a_single_cross_bin() {
        let settings = Settings::default();
        let mut molecule =
            Molecule::from_atoms(vec![carbon(0.0, 0.0, 0.0), carbon(0.0, 0.0, 10.0)]);
        let mut manager = new_calculator(&settings);
        let total = manager.calculate(&mut molecule).unwrap();

        // self terms at zero, one symmetrically counted cross pair at ten
        assert_approx_eq!(f64, total.counts()[0], 2.0 * 36.0, epsilon = 1e-9);
        assert_approx_eq!(f64, total.counts()[10], 2.0 * 36.0, epsilon = 1e-9);
        let nonzero = total.counts().iter().filter(|&&c| c != 0.0).count();
        assert_eq!(nonzero, 2);
    }

    #[test]
    fn total_conserves_the_squared_weight_sum() {
        let settings = implicit_settings();
        let atoms = vec![
            carbon(0.0, 0.0, 0.0),
            carbon(3.0, 0.0, 0.0),
            Atom::new(Vec3::new(0.0, 4.0, 0.0), FormFactorType::Oxygen),
            Atom::new(Vec3::new(1.0, 1.0, 5.0), FormFactorType::Nitrogen),
        ];
        let weight: f64 = atoms.iter().map(|a| a.weight(true)).sum();
        let mut molecule = Molecule::from_atoms(atoms);
        let mut manager = new_calculator(&settings);
        let total = manager.calculate(&mut molecule).unwrap();
        // implicit model reduces every weight by the mean displaced charge
        let present = [
            FormFactorType::Carbon,
            FormFactorType::Nitrogen,
            FormFactorType::Oxygen,
        ];
        let shift = 4.0
            * crate::constants::WATER_DENSITY
            * excluded_volume::form_factor_volume(ExvMethod::Pepsi, &present, 1.0);
        let expected = (weight - shift).powi(2);
        assert_approx_eq!(f64, total.total(), expected, epsilon = expected * 1e-12);
    }

    #[test]
    fn chunked_accumulation_matches_a_serial_reference() {
        let atoms: Vec<Atom> = (0..60)
            .map(|i| {
                let x = f64::from(i % 5);
                let y = f64::from((i / 5) % 4);
                let z = f64::from(i / 20);
                carbon(x * 1.8, y * 2.1, z * 1.3)
            })
            .collect();
        let mut settings = implicit_settings();
        settings.job_size = 7; // force many chunks
        let mut molecule = Molecule::from_atoms(atoms.clone());
        let mut manager = new_calculator(&settings);
        let chunked = manager.calculate(&mut molecule).unwrap();

        settings.job_size = 100_000; // single chunk
        let mut serial_manager = new_calculator(&settings);
        let serial = serial_manager.calculate(&mut molecule).unwrap();

        for (&a, &b) in chunked.counts().iter().zip(serial.counts()) {
            assert_approx_eq!(f64, a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn weighted_and_unweighted_totals_agree() {
        let atoms = vec![carbon(0.0, 0.0, 0.0), carbon(2.3, 1.1, 0.4)];
        let mut settings = implicit_settings();
        let mut molecule = Molecule::from_atoms(atoms);

        settings.weighted_bins = false;
        let unweighted = new_calculator(&settings)
            .calculate(&mut molecule)
            .unwrap();
        settings.weighted_bins = true;
        let weighted = new_calculator(&settings).calculate(&mut molecule).unwrap();

        assert_approx_eq!(f64, unweighted.total(), weighted.total(), epsilon = 1e-9);
        // the weighted variant recovers the true pair distance
        let d = (2.3_f64 * 2.3 + 1.1 * 1.1 + 0.4 * 0.4).sqrt();
        let bin = convert::round_bin(d, 1.0);
        assert_approx_eq!(f64, weighted.effective_d()[bin], d, epsilon = 1e-12);
    }

    #[test]
    fn variable_width_reaches_the_same_total() {
        let atoms = vec![carbon(0.0, 0.0, 0.0), carbon(0.0, 0.0, 7.0)];
        let mut settings = Settings::default();
        settings.distance_bin_width = 0.25;
        let mut molecule = Molecule::from_atoms(atoms);
        let total = new_calculator(&settings).calculate(&mut molecule).unwrap();
        assert_approx_eq!(f64, total.counts()[28], 2.0 * 36.0, epsilon = 1e-9);
    }

    #[test]
    fn grid_method_contributes_excluded_volume_types() {
        let settings = Settings::default();
        let mut molecule = Molecule::from_atoms(vec![carbon(0.0, 0.0, 0.0)]);
        let composite = new_calculator(&settings)
            .calculate_all(&mut molecule)
            .unwrap();
        assert!(composite
            .types()
            .contains(&FormFactorType::ExcludedVolume));
    }

    #[test]
    fn water_typed_body_atoms_join_the_water_stratum() {
        let settings = Settings::default();
        let mut molecule = Molecule::from_atoms(vec![
            carbon(0.0, 0.0, 0.0),
            Atom::water(Vec3::new(3.0, 0.0, 0.0)),
        ]);
        let mut composite = new_calculator(&settings)
            .calculate_all(&mut molecule)
            .unwrap();
        assert!(!composite.types().contains(&FormFactorType::Water));
        let ww = composite.profile_ww();
        assert!(ww.intensity()[0] > 0.0);
    }

    #[test]
    fn hydrated_molecules_fill_the_water_strata() {
        let settings = Settings::default();
        let mut molecule =
            Molecule::from_atoms(vec![carbon(0.0, 0.0, 0.0), carbon(4.0, 0.0, 0.0)]);
        molecule.generate_hydration(&settings).unwrap();
        assert!(!molecule.hydration().is_empty());

        let mut manager = new_calculator(&settings);
        let mut composite = manager.calculate_all(&mut molecule).unwrap();
        let ww = composite.profile_ww();
        assert!(ww.intensity()[0] > 0.0);
    }
}
