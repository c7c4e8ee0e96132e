//! Incremental per-body histogram manager.
//!
//! Bodies are polled through their mutation epochs: partials of clean
//! bodies are reused from cache, only rows and columns involving dirty
//! bodies are recomputed. The hydration shell and the grid-synthesized
//! excluded-volume cloud are tracked as pseudo-bodies, the latter turning
//! dirty whenever any body moves.

use crate::compact_coordinates::CompactCoordinates;
use crate::composite_histogram::CompositeDistanceHistogram;
use crate::distance_histogram::DistanceHistogram;
use crate::distribution::{BinEntry, Unweighted, Weighted};
use crate::error::{Error, Result};
use crate::excluded_volume::{self, ExvMethod};
use crate::form_factor::FormFactorType;
use crate::histogram_manager::{
    accumulate_atom_pairs, accumulate_atom_water, accumulate_cross_sets, accumulate_self,
    accumulate_water_pairs, accumulate_water_self, install_scalable_rebuild, into_composite,
    BinningPolicy, Buffers, DistanceCalculator, FixedWidth, HistogramManager, TypeMap,
    VariableWidth, Workload, DEFAULT_BIN_WIDTH,
};
use crate::molecule::Molecule;
use crate::pool;
use crate::settings::Settings;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::marker::PhantomData;

#[derive(Clone, Debug, Default)]
struct Entity {
    coords: CompactCoordinates,
    slots: Vec<usize>,
    implicit: Option<Vec<f64>>,
    exv_slot: Option<usize>,
    // body atoms typed as water; they join the hydration stratum
    waters: Vec<crate::atom::Atom>,
}

impl Entity {
    fn workload<'a>(&'a self, waters: &'a CompactCoordinates) -> Workload<'a> {
        Workload {
            atoms: &self.coords,
            slots: &self.slots,
            implicit: self
                .implicit
                .as_ref()
                .zip(self.exv_slot)
                .map(|(weights, slot)| (weights.as_slice(), slot)),
            waters,
        }
    }
}

enum Job {
    SelfPart(usize),
    AwPart(usize),
    Cross(usize, usize),
    Water,
}

/// Incremental manager specialized like [`HistogramManager`].
pub struct PartialHistogramManager<E: BinEntry, B: BinningPolicy> {
    settings: Settings,
    binning: B,
    type_map: Option<TypeMap>,
    entities: Vec<Entity>,
    body_epochs: Vec<u64>,
    has_exv_entity: bool,
    waters: CompactCoordinates,
    water_epoch: Option<u64>,
    self_parts: Vec<Buffers<E>>,
    aw_parts: Vec<Buffers<E>>,
    cross_parts: FxHashMap<(usize, usize), Buffers<E>>,
    water_part: Option<Buffers<E>>,
    _kernel: PhantomData<E>,
}

impl<E: BinEntry, B: BinningPolicy> PartialHistogramManager<E, B> {
    /// Manager capturing its effective settings at construction.
    #[must_use]
    pub fn with_binning(settings: Settings, binning: B) -> Self {
        Self {
            settings,
            binning,
            type_map: None,
            entities: Vec::new(),
            body_epochs: Vec::new(),
            has_exv_entity: false,
            waters: CompactCoordinates::default(),
            water_epoch: None,
            self_parts: Vec::new(),
            aw_parts: Vec::new(),
            cross_parts: FxHashMap::default(),
            water_part: None,
            _kernel: PhantomData,
        }
    }

    fn reset(&mut self) {
        self.type_map = None;
        self.entities.clear();
        self.body_epochs.clear();
        self.has_exv_entity = false;
        self.waters = CompactCoordinates::default();
        self.water_epoch = None;
        self.self_parts.clear();
        self.aw_parts.clear();
        self.cross_parts.clear();
        self.water_part = None;
    }

    #[allow(clippy::too_many_lines)]
    fn refresh(&mut self, molecule: &mut Molecule) -> Result<()> {
        let use_charge = self.settings.use_effective_charge;
        let method = self.settings.exv_method;
        let body_count = molecule.bodies().len();

        if self.body_epochs.len() != body_count {
            self.reset();
        }

        // 1: snapshot dirty bodies; water-typed body atoms join the
        // hydration stratum
        let mut dirty = vec![false; body_count];
        let mut body_waters_changed = false;
        for (index, body) in molecule.bodies().iter().enumerate() {
            let known = self.body_epochs.get(index).copied();
            if known == Some(body.epoch()) {
                continue;
            }
            dirty[index] = true;
            let (waters, solute): (Vec<crate::atom::Atom>, Vec<crate::atom::Atom>) = body
                .atoms()
                .iter()
                .cloned()
                .partition(|atom| atom.form_factor_type == FormFactorType::Water);
            let coords = CompactCoordinates::from_atoms(&solute, use_charge);
            let implicit = method.is_implicit().then(|| {
                coords
                    .types()
                    .iter()
                    .map(|&ff| excluded_volume::implicit_weight(ff))
                    .collect::<Vec<f64>>()
            });
            let had_waters = self
                .entities
                .get(index)
                .is_some_and(|entity| !entity.waters.is_empty());
            body_waters_changed |= had_waters || !waters.is_empty();
            let entity = Entity {
                coords,
                slots: Vec::new(),
                implicit,
                exv_slot: None,
                waters,
            };
            if index < self.entities.len() {
                self.entities[index] = entity;
                self.body_epochs[index] = body.epoch();
            } else {
                self.entities.push(entity);
                self.body_epochs.push(body.epoch());
            }
        }
        let any_body_dirty = dirty.iter().any(|&d| d);

        // 2: waters
        let water_dirty =
            self.water_epoch != Some(molecule.hydration().epoch()) || body_waters_changed;
        if water_dirty {
            let mut water_atoms = molecule.hydration().waters().to_vec();
            for index in 0..body_count {
                water_atoms.extend_from_slice(&self.entities[index].waters);
            }
            self.waters = CompactCoordinates::from_waters(&water_atoms, use_charge);
            self.water_epoch = Some(molecule.hydration().epoch());
        }

        // 3: the grid cloud follows the whole structure
        let needs_exv = method.is_grid_based() && !molecule.is_empty();
        let exv_dirty = needs_exv && (!self.has_exv_entity || any_body_dirty);
        if exv_dirty {
            let grid = molecule.refresh_grid(&self.settings)?;
            let effective = if method == ExvMethod::GridScalable {
                ExvMethod::GridSurface
            } else {
                method
            };
            let cloud = excluded_volume::create(grid, effective);
            let weight = excluded_volume::voxel_weight(self.settings.grid_width);
            let mut coords = CompactCoordinates::default();
            for p in cloud.interior.iter().chain(&cloud.surface) {
                coords.push([p.x, p.y, p.z], weight, FormFactorType::ExcludedVolume);
            }
            let entity = Entity {
                coords,
                slots: Vec::new(),
                implicit: None,
                exv_slot: None,
                waters: Vec::new(),
            };
            if self.has_exv_entity {
                *self.entities.last_mut().unwrap() = entity;
            } else {
                self.entities.push(entity);
                self.has_exv_entity = true;
            }
        }

        // 4: resolve the type space and reject growth beyond the first map
        let mut present: Vec<FormFactorType> = Vec::new();
        for entity in &self.entities {
            present.extend_from_slice(entity.coords.types());
            if entity.implicit.is_some() {
                present.push(FormFactorType::ExcludedVolume);
            }
        }
        let candidate = TypeMap::from_present(present);
        match &self.type_map {
            None => self.type_map = Some(candidate),
            Some(map) => {
                if !map.covers(&candidate) {
                    return Err(Error::shape_mismatch(
                        format!("form-factor types {:?}", map.types()),
                        format!("{:?}", candidate.types()),
                    ));
                }
            }
        }
        let map = self.type_map.as_ref().unwrap();
        for entity in &mut self.entities {
            if entity.slots.len() != entity.coords.len() {
                entity.slots = entity
                    .coords
                    .types()
                    .iter()
                    .map(|&ff| map.slot(ff))
                    .collect();
                entity.exv_slot = entity
                    .implicit
                    .is_some()
                    .then(|| map.slot(FormFactorType::ExcludedVolume));
            }
        }

        // 5: collect and run the outstanding jobs
        let entity_count = self.entities.len();
        let entity_dirty = |index: usize| {
            if index < body_count {
                dirty[index]
            } else {
                exv_dirty
            }
        };

        let mut jobs = Vec::new();
        for index in 0..entity_count {
            if entity_dirty(index) || self.self_parts.len() <= index {
                jobs.push(Job::SelfPart(index));
            }
            if entity_dirty(index) || water_dirty || self.aw_parts.len() <= index {
                jobs.push(Job::AwPart(index));
            }
            for other in index + 1..entity_count {
                if entity_dirty(index)
                    || entity_dirty(other)
                    || !self.cross_parts.contains_key(&(index, other))
                {
                    jobs.push(Job::Cross(index, other));
                }
            }
        }
        if water_dirty || self.water_part.is_none() {
            jobs.push(Job::Water);
        }

        let types = map.len();
        let d_axis = self.settings.d_axis();
        let binning = self.binning;
        let entities = &self.entities;
        let waters = &self.waters;
        let empty = CompactCoordinates::default();

        let results: Vec<(usize, usize, Buffers<E>)> = pool::install(|| {
            jobs.par_iter()
                .map(|job| {
                    let mut buffers = Buffers::new(types, d_axis);
                    match *job {
                        Job::SelfPart(e) => {
                            let work = entities[e].workload(&empty);
                            accumulate_atom_pairs(
                                &work,
                                0..work.atoms.len(),
                                binning,
                                &mut buffers,
                            );
                            accumulate_self(&work, &mut buffers.aa);
                            (0, e, buffers)
                        }
                        Job::AwPart(e) => {
                            let work = entities[e].workload(waters);
                            accumulate_atom_water(
                                &work,
                                0..work.atoms.len(),
                                binning,
                                &mut buffers,
                            );
                            (1, e, buffers)
                        }
                        Job::Cross(i, j) => {
                            let a = entities[i].workload(&empty);
                            let b = entities[j].workload(&empty);
                            accumulate_cross_sets(&a, &b, binning, &mut buffers);
                            (2, i * entity_count + j, buffers)
                        }
                        Job::Water => {
                            let work = Workload {
                                atoms: &empty,
                                slots: &[],
                                implicit: None,
                                waters,
                            };
                            accumulate_water_pairs(
                                &work,
                                0..waters.len(),
                                binning,
                                &mut buffers,
                            );
                            accumulate_water_self(&work, &mut buffers.ww);
                            (3, 0, buffers)
                        }
                    }
                })
                .collect()
        });

        for (kind, key, buffers) in results {
            match kind {
                0 => {
                    if self.self_parts.len() <= key {
                        self.self_parts.resize_with(key + 1, || {
                            Buffers::new(types, d_axis)
                        });
                    }
                    self.self_parts[key] = buffers;
                }
                1 => {
                    if self.aw_parts.len() <= key {
                        self.aw_parts.resize_with(key + 1, || {
                            Buffers::new(types, d_axis)
                        });
                    }
                    self.aw_parts[key] = buffers;
                }
                2 => {
                    self.cross_parts
                        .insert((key / entity_count, key % entity_count), buffers);
                }
                _ => self.water_part = Some(buffers),
            }
        }
        Ok(())
    }

    fn combine(&self) -> Buffers<E> {
        let types = self.type_map.as_ref().map_or(0, TypeMap::len);
        let mut combined = Buffers::new(types, self.settings.d_axis());
        for part in &self.self_parts {
            combined.merge(part);
        }
        for part in &self.aw_parts {
            combined.merge(part);
        }
        let mut keys: Vec<&(usize, usize)> = self.cross_parts.keys().collect();
        keys.sort();
        for key in keys {
            combined.merge(&self.cross_parts[key]);
        }
        if let Some(part) = &self.water_part {
            combined.merge(part);
        }
        combined
    }
}

impl<E: BinEntry, B: BinningPolicy> DistanceCalculator for PartialHistogramManager<E, B> {
    fn calculate(&mut self, molecule: &mut Molecule) -> Result<DistanceHistogram> {
        // the plain profile has no incremental path; delegate to a full
        // recomputation
        HistogramManager::<E, B>::with_binning(self.settings.clone(), self.binning)
            .calculate(molecule)
    }

    fn calculate_all(&mut self, molecule: &mut Molecule) -> Result<CompositeDistanceHistogram> {
        // a failed refresh leaves the caches unusable; drop them so the
        // next call starts from a full recomputation
        if let Err(err) = self.refresh(molecule) {
            self.reset();
            return Err(err);
        }
        let combined = self.combine();
        let map = self
            .type_map
            .clone()
            .unwrap_or_else(|| TypeMap::from_present([]));
        let mut composite = into_composite(&combined, &map, &self.settings)?;
        install_scalable_rebuild::<E, B>(&mut composite, molecule, &self.settings, self.binning);
        Ok(composite)
    }
}

/// Builds the incremental specialization selected by `settings`.
#[must_use]
pub fn new_incremental_calculator(settings: &Settings) -> Box<dyn DistanceCalculator + Send> {
    let fixed = (settings.distance_bin_width - DEFAULT_BIN_WIDTH).abs() < 1e-12;
    let variable = VariableWidth::new(settings.distance_bin_width);
    match (settings.weighted_bins, fixed) {
        (false, true) => Box::new(
            PartialHistogramManager::<Unweighted, FixedWidth>::with_binning(
                settings.clone(),
                FixedWidth,
            ),
        ),
        (false, false) => Box::new(PartialHistogramManager::<Unweighted, VariableWidth>::with_binning(
            settings.clone(),
            variable,
        )),
        (true, true) => Box::new(PartialHistogramManager::<Weighted, FixedWidth>::with_binning(
            settings.clone(),
            FixedWidth,
        )),
        (true, false) => Box::new(PartialHistogramManager::<Weighted, VariableWidth>::with_binning(
            settings.clone(),
            variable,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use crate::composite_histogram::ProfileParams;
    use crate::histogram_manager::new_calculator;
    use lin_alg::f64::Vec3;

    fn molecule() -> Molecule {
        Molecule::new(vec![
            vec![
                Atom::new(Vec3::new_zero(), FormFactorType::Carbon),
                Atom::new(Vec3::new(2.0, 0.0, 0.0), FormFactorType::Oxygen),
            ],
            vec![
                Atom::new(Vec3::new(7.0, 0.0, 0.0), FormFactorType::Nitrogen),
                Atom::new(Vec3::new(7.0, 3.0, 0.0), FormFactorType::Carbon),
            ],
        ])
    }

    fn assert_profiles_close(a: &[f64], b: &[f64], tolerance: f64) {
        let scale = a
            .iter()
            .chain(b)
            .fold(1e-30_f64, |acc, &v| acc.max(v.abs()));
        for (&x, &y) in a.iter().zip(b) {
            assert!((x - y).abs() <= tolerance * scale, "{x} vs {y}");
        }
    }

    #[test]
    fn first_call_matches_the_full_manager() {
        let settings = Settings::default();
        let mut full = molecule();
        let mut incremental = molecule();

        let mut reference = new_calculator(&settings)
            .calculate_all(&mut full)
            .unwrap();
        let mut manager = new_incremental_calculator(&settings);
        let mut fresh = manager.calculate_all(&mut incremental).unwrap();

        let expected = reference.evaluate(ProfileParams::default());
        let actual = fresh.evaluate(ProfileParams::default());
        assert_profiles_close(expected.intensity(), actual.intensity(), 1e-10);
    }

    #[test]
    fn clean_bodies_are_reused_after_a_move() {
        let settings = Settings::default();
        let mut molecule = molecule();
        let mut manager = new_incremental_calculator(&settings);
        manager.calculate_all(&mut molecule).unwrap();

        // move the second body and recompute incrementally
        let id = molecule.bodies()[1].id();
        molecule
            .body_mut(id)
            .unwrap()
            .translate(Vec3::new(0.0, 0.0, 1.5));
        let mut incremental = manager.calculate_all(&mut molecule).unwrap();

        // full recomputation of the moved configuration
        let mut reference = new_calculator(&settings)
            .calculate_all(&mut molecule)
            .unwrap();

        let expected = reference.evaluate(ProfileParams::default());
        let actual = incremental.evaluate(ProfileParams::default());
        assert_profiles_close(expected.intensity(), actual.intensity(), 1e-10);
    }

    #[test]
    fn hydration_changes_only_touch_the_water_strata() {
        let settings = Settings::default();
        let mut molecule = molecule();
        let mut manager = new_incremental_calculator(&settings);
        manager.calculate_all(&mut molecule).unwrap();

        molecule.generate_hydration(&settings).unwrap();
        let mut incremental = manager.calculate_all(&mut molecule).unwrap();
        let mut reference = new_calculator(&settings)
            .calculate_all(&mut molecule)
            .unwrap();

        let expected = reference.evaluate(ProfileParams::default());
        let actual = incremental.evaluate(ProfileParams::default());
        assert_profiles_close(expected.intensity(), actual.intensity(), 1e-10);
    }

    #[test]
    fn growing_the_type_space_is_rejected() {
        let settings = Settings::default();
        let mut molecule = Molecule::new(vec![vec![
            Atom::new(Vec3::new_zero(), FormFactorType::Carbon),
            Atom::new(Vec3::new(3.0, 0.0, 0.0), FormFactorType::Carbon),
        ]]);
        let mut manager = new_incremental_calculator(&settings);
        manager.calculate_all(&mut molecule).unwrap();

        let id = molecule.bodies()[0].id();
        molecule
            .body_mut(id)
            .unwrap()
            .atoms_mut()
            .push(Atom::new(Vec3::new(0.0, 3.0, 0.0), FormFactorType::Sulfur));
        assert!(matches!(
            manager.calculate_all(&mut molecule),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn empty_molecule_still_yields_a_zero_table() {
        let settings = Settings::default();
        let mut molecule = Molecule::default();
        let mut manager = new_incremental_calculator(&settings);
        let mut composite = manager.calculate_all(&mut molecule).unwrap();
        let profile = composite.evaluate(ProfileParams::default());
        assert!(profile.intensity().iter().all(|&i| i == 0.0));
    }
}
