#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `saxskit` computes small-angle X-ray scattering intensity profiles from
//! biomolecular structures and fits them against measured curves.
//!
//! The pipeline transforms an atomic structure into partial pair-distance
//! distributions, convolves them with tabulated form factors and an
//! excluded-volume model through the Debye transform, and exposes the free
//! parameters (hydration scaling, excluded-volume scaling, solvent density,
//! Debye-Waller factors) to a least-squares fitter.

pub mod atom;
pub mod axis;
pub mod body;
pub mod compact_coordinates;
pub mod composite_histogram;
pub mod constants;
mod convert;
pub mod culling;
pub mod dataset;
pub mod debye_table;
pub mod distance_histogram;
pub mod distribution;
pub mod error;
pub mod exact_debye;
pub mod excluded_volume;
pub mod fitter;
pub mod form_factor;
pub mod grid;
pub mod histogram_manager;
pub mod hydration;
pub mod minimizer;
pub mod molecule;
pub mod partial_histogram_manager;
pub mod pool;
pub mod rng;
pub mod settings;
pub mod spline;
