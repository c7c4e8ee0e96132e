//! Dense binned distributions backing the distance histograms.
//!
//! The containers are parameterized by a bin-entry kernel so the hot
//! accumulation loops specialize at compile time: [`Unweighted`] is a plain
//! sum, [`Weighted`] additionally tracks the entry count and the accumulated
//! distance per bin, from which the bin-center correction is recovered.

use crate::axis::Axis;
use crate::convert;
use ndarray::{Array1, Array2, Array3};

/// One bin of a distance distribution.
pub trait BinEntry: Clone + Copy + Default + Send + Sync + 'static {
    /// Adds a contribution that fell into this bin.
    fn add(&mut self, weight: f64, distance: f64);

    /// Element-wise merge of another bin into this one.
    fn merge(&mut self, other: &Self);

    /// The accumulated value.
    fn value(&self) -> f64;

    /// Number of contributions (zero for the unweighted kernel).
    fn entries(&self) -> f64;

    /// Accumulated distance (zero for the unweighted kernel).
    fn distance_sum(&self) -> f64;
}

/// Plain summing kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Unweighted(pub f64);

impl BinEntry for Unweighted {
    #[inline]
    fn add(&mut self, weight: f64, _distance: f64) {
        self.0 += weight;
    }

    fn merge(&mut self, other: &Self) {
        self.0 += other.0;
    }

    fn value(&self) -> f64 {
        self.0
    }

    fn entries(&self) -> f64 {
        0.0
    }

    fn distance_sum(&self) -> f64 {
        0.0
    }
}

/// Kernel with an entries side-table for bin-center reweighting.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Weighted {
    /// Accumulated weight.
    pub value: f64,
    /// Number of contributions.
    pub count: f64,
    /// Accumulated distance of the contributions.
    pub distance: f64,
}

impl BinEntry for Weighted {
    #[inline]
    fn add(&mut self, weight: f64, distance: f64) {
        self.value += weight;
        self.count += 1.0;
        self.distance += distance;
    }

    fn merge(&mut self, other: &Self) {
        self.value += other.value;
        self.count += other.count;
        self.distance += other.distance;
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn entries(&self) -> f64 {
        self.count
    }

    fn distance_sum(&self) -> f64 {
        self.distance
    }
}

/// A 1-D binned distribution over the distance axis.
#[derive(Clone, Debug)]
pub struct Distribution1D<E> {
    axis: Axis,
    data: Array1<E>,
}

/// A 2-D distribution: (form-factor type, distance).
#[derive(Clone, Debug)]
pub struct Distribution2D<E> {
    axis: Axis,
    data: Array2<E>,
}

/// A 3-D distribution: (form-factor type, form-factor type, distance).
#[derive(Clone, Debug)]
pub struct Distribution3D<E> {
    axis: Axis,
    data: Array3<E>,
}

impl<E: BinEntry> Distribution1D<E> {
    /// An all-zero distribution over `axis`.
    #[must_use]
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            data: Array1::from_elem(axis.bins, E::default()),
        }
    }

    /// The distance axis.
    #[must_use]
    pub const fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Adds `weight` at `bin`.
    #[inline]
    pub fn add(&mut self, bin: usize, weight: f64, distance: f64) {
        self.data[bin].add(weight, distance);
    }

    /// Element-wise merge.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.axis, other.axis);
        for (lhs, rhs) in self.data.iter_mut().zip(other.data.iter()) {
            lhs.merge(rhs);
        }
    }

    /// The accumulated values per bin.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().map(BinEntry::value).collect()
    }

    /// Sum over all bins.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.data.iter().map(BinEntry::value).sum()
    }

    /// Effective distance of each bin: the mean recorded distance under the
    /// weighted kernel, the rounding-grid point `i * width` otherwise.
    #[must_use]
    pub fn effective_d(&self) -> Vec<f64> {
        effective_d(self.axis, |bin| self.bin_stats(bin))
    }

    /// `(entries, accumulated distance)` of one bin.
    #[must_use]
    pub fn bin_stats(&self, bin: usize) -> (f64, f64) {
        let entry = &self.data[bin];
        (entry.entries(), entry.distance_sum())
    }
}

impl<E: BinEntry> Distribution2D<E> {
    /// An all-zero distribution with `rows` type slots over `axis`.
    #[must_use]
    pub fn new(rows: usize, axis: Axis) -> Self {
        Self {
            axis,
            data: Array2::from_elem((rows, axis.bins), E::default()),
        }
    }

    /// The distance axis.
    #[must_use]
    pub const fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Number of type slots.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    /// Adds `weight` at `(row, bin)`.
    #[inline]
    pub fn add(&mut self, row: usize, bin: usize, weight: f64, distance: f64) {
        self.data[[row, bin]].add(weight, distance);
    }

    /// Element-wise merge.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.data.dim(), other.data.dim());
        for (lhs, rhs) in self.data.iter_mut().zip(other.data.iter()) {
            lhs.merge(rhs);
        }
    }

    /// The accumulated values of one row.
    #[must_use]
    pub fn row_values(&self, row: usize) -> Vec<f64> {
        self.data.row(row).iter().map(BinEntry::value).collect()
    }

    /// Sum over all bins.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.data.iter().map(BinEntry::value).sum()
    }

    /// Per-bin totals summed over every row.
    #[must_use]
    pub fn collapsed(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.axis.bins];
        for row in self.data.rows() {
            for (bin, entry) in row.iter().enumerate() {
                out[bin] += entry.value();
            }
        }
        out
    }

    /// Effective distance per bin, aggregated over all rows.
    #[must_use]
    pub fn effective_d(&self) -> Vec<f64> {
        effective_d(self.axis, |bin| self.bin_stats(bin))
    }

    /// `(entries, accumulated distance)` of one bin, aggregated over all
    /// rows.
    #[must_use]
    pub fn bin_stats(&self, bin: usize) -> (f64, f64) {
        self.data
            .rows()
            .into_iter()
            .map(|row| (row[bin].entries(), row[bin].distance_sum()))
            .fold((0.0, 0.0), |acc, x| (acc.0 + x.0, acc.1 + x.1))
    }
}

impl<E: BinEntry> Distribution3D<E> {
    /// An all-zero distribution with `types` × `types` slots over `axis`.
    #[must_use]
    pub fn new(types: usize, axis: Axis) -> Self {
        Self {
            axis,
            data: Array3::from_elem((types, types, axis.bins), E::default()),
        }
    }

    /// The distance axis.
    #[must_use]
    pub const fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Number of type slots per side.
    #[must_use]
    pub fn types(&self) -> usize {
        self.data.dim().0
    }

    /// Adds `weight` at `(i, j, bin)` with the type pair normalized so the
    /// stored table stays upper-triangular.
    #[inline]
    pub fn add(&mut self, i: usize, j: usize, bin: usize, weight: f64, distance: f64) {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        self.data[[i, j, bin]].add(weight, distance);
    }

    /// The accumulated value at `(i, j, bin)`; symmetric in the type pair.
    #[must_use]
    pub fn get(&self, i: usize, j: usize, bin: usize) -> f64 {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        self.data[[i, j, bin]].value()
    }

    /// Element-wise merge.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.data.dim(), other.data.dim());
        for (lhs, rhs) in self.data.iter_mut().zip(other.data.iter()) {
            lhs.merge(rhs);
        }
    }

    /// The accumulated values of one type pair; symmetric in the pair.
    #[must_use]
    pub fn pair_values(&self, i: usize, j: usize) -> Vec<f64> {
        let (i, j) = if i <= j { (i, j) } else { (j, i) };
        (0..self.axis.bins)
            .map(|bin| self.data[[i, j, bin]].value())
            .collect()
    }

    /// Sum over all bins.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.data.iter().map(BinEntry::value).sum()
    }

    /// Effective distance per bin, aggregated over all type pairs.
    #[must_use]
    pub fn effective_d(&self) -> Vec<f64> {
        effective_d(self.axis, |bin| self.bin_stats(bin))
    }

    /// `(entries, accumulated distance)` of one bin, aggregated over all
    /// type pairs.
    #[must_use]
    pub fn bin_stats(&self, bin: usize) -> (f64, f64) {
        let types = self.types();
        let mut acc = (0.0, 0.0);
        for i in 0..types {
            for j in i..types {
                let entry = &self.data[[i, j, bin]];
                acc.0 += entry.entries();
                acc.1 += entry.distance_sum();
            }
        }
        acc
    }
}

fn effective_d(axis: Axis, stats: impl Fn(usize) -> (f64, f64)) -> Vec<f64> {
    let width = axis.width();
    (0..axis.bins)
        .map(|bin| {
            let (count, distance) = stats(bin);
            if count > 0.0 {
                distance / count
            } else {
                convert::bin_distance(bin, width)
            }
        })
        .collect()
}
