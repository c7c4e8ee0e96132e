//! Central configuration registry.
//!
//! A single validated [`Settings`] record gates all tunables. A process-wide
//! snapshot can be installed with [`Settings::set_global`]; pipeline objects
//! capture their effective settings at construction, so a later change never
//! corrupts an in-flight evaluation.
//!
//! The on-disk format is line-oriented `key value` pairs with `#` comments;
//! every recognized option round-trips through [`Settings::serialize`] and
//! [`Settings::parse`].

use crate::axis::Axis;
use crate::culling::CullingMethod;
use crate::error::{Error, Result};
use crate::excluded_volume::ExvMethod;
use crate::grid::ExpansionMethod;
use crate::hydration::HydrationStrategy;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{OnceLock, RwLock};

/// Target number of hydration waters after culling.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum WaterTarget {
    /// A fixed number of waters.
    Count(usize),
    /// A fraction of the solute atom count.
    Ratio(f64),
}

impl WaterTarget {
    /// Resolves the target against a solute atom count.
    #[must_use]
    pub fn resolve(&self, atoms: usize) -> usize {
        match *self {
            Self::Count(n) => n,
            Self::Ratio(r) => crate::convert::floor_index(
                (r * crate::convert::count_f64(atoms)).round(),
            ),
        }
    }
}

/// All recognized options. Construct with [`Settings::default`], adjust, and
/// validate through [`Settings::validate`] or [`Settings::set_global`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Settings {
    /// Size of the global worker pool; zero picks the runtime default.
    pub threads: usize,
    /// Number of q samples when discretizing the extended model profile.
    pub n_points: usize,
    /// Lower limit of the fixed q-axis, Å⁻¹.
    pub qmin: f64,
    /// Upper limit of the fixed q-axis, Å⁻¹.
    pub qmax: f64,
    /// Number of q bins.
    pub bins: usize,
    /// Upper limit of the distance axis, Å.
    pub max_distance: f64,
    /// Width of a distance bin, Å.
    pub distance_bin_width: f64,
    /// Enable bin-center reweighting of the distance histograms.
    pub weighted_bins: bool,
    /// Free the excluded-volume scaling `cx` during fits.
    pub fit_excluded_volume: bool,
    /// Free the solvent density `cr` during fits.
    pub fit_solvent_density: bool,
    /// Free the hydration scaling `cw` during fits.
    pub fit_hydration: bool,
    /// Free the atomic Debye-Waller factor `Ba` during fits.
    pub fit_atomic_debye_waller: bool,
    /// Free the excluded-volume Debye-Waller factor `Bx` during fits.
    pub fit_exv_debye_waller: bool,
    /// Excluded-volume model.
    pub exv_method: ExvMethod,
    /// Water placement strategy.
    pub hydration_strategy: HydrationStrategy,
    /// Water culling strategy.
    pub culling_strategy: CullingMethod,
    /// Grid expansion strategy.
    pub expansion_strategy: ExpansionMethod,
    /// Lower bound on the per-atom excluded-volume radius, Å.
    pub min_exv_radius: f64,
    /// Voxel width of the grid, Å.
    pub grid_width: f64,
    /// Margin added around the molecule bounding box, Å.
    pub grid_margin: f64,
    /// Weigh atoms by occupancy times effective charge instead of occupancy.
    pub use_effective_charge: bool,
    /// Translate the molecule to its center of mass before processing.
    pub center: bool,
    /// Iteration budget of the nonlinear minimizer.
    pub max_iterations: usize,
    /// Emit overflow tallies and per-stage diagnostics to the log channel.
    pub verbose: bool,
    /// Rows of the pair triangle handled per parallel job.
    pub job_size: usize,
    /// Hydration target after culling.
    pub water_target: WaterTarget,
    /// Fail with `OutOfBounds` instead of clamping atoms onto the grid.
    pub strict: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threads: 0,
            n_points: 250,
            qmin: 0.0,
            qmax: 0.5,
            bins: 100,
            max_distance: 500.0,
            distance_bin_width: 1.0,
            weighted_bins: false,
            fit_excluded_volume: false,
            fit_solvent_density: false,
            fit_hydration: false,
            fit_atomic_debye_waller: false,
            fit_exv_debye_waller: false,
            exv_method: ExvMethod::Grid,
            hydration_strategy: HydrationStrategy::Radial,
            culling_strategy: CullingMethod::Counter,
            expansion_strategy: ExpansionMethod::Full,
            min_exv_radius: 2.15,
            grid_width: 1.0,
            grid_margin: 5.0,
            use_effective_charge: true,
            center: true,
            max_iterations: 100,
            verbose: false,
            job_size: 200,
            water_target: WaterTarget::Ratio(0.1),
            strict: false,
        }
    }
}

fn global_lock() -> &'static RwLock<Settings> {
    static GLOBAL: OnceLock<RwLock<Settings>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(Settings::default()))
}

impl Settings {
    /// A snapshot of the process-wide settings.
    ///
    /// # Panics
    ///
    /// Panics if the settings lock was poisoned.
    #[must_use]
    pub fn global() -> Self {
        global_lock().read().unwrap().clone()
    }

    /// Validates `settings` and installs it as the process-wide record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when validation fails; the previous
    /// record stays in place.
    ///
    /// # Panics
    ///
    /// Panics if the settings lock was poisoned.
    pub fn set_global(settings: Self) -> Result<()> {
        settings.validate()?;
        *global_lock().write().unwrap() = settings;
        Ok(())
    }

    /// Checks the record for inconsistent combinations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the offending option.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Configuration(msg.into()));

        if self.qmin < 0.0 || self.qmin >= self.qmax {
            return fail("q-axis limits must satisfy 0 <= qmin < qmax");
        }
        if self.bins == 0 {
            return fail("q-axis needs at least one bin");
        }
        if self.n_points == 0 {
            return fail("model discretization needs at least one sample");
        }
        if self.max_distance <= 0.0 {
            return fail("max_distance must be positive");
        }
        if self.distance_bin_width <= 0.0 || self.distance_bin_width > self.max_distance {
            return fail("distance_bin_width must lie in (0, max_distance]");
        }
        if self.grid_width <= 0.0 {
            return fail("grid_width must be positive");
        }
        if self.grid_margin < 0.0 {
            return fail("grid_margin must be non-negative");
        }
        if self.min_exv_radius < 0.0 {
            return fail("min_exv_radius must be non-negative");
        }
        if self.job_size == 0 {
            return fail("job_size must be positive");
        }
        if self.max_iterations == 0 {
            return fail("max_iterations must be positive");
        }
        match self.water_target {
            WaterTarget::Ratio(r) if r < 0.0 => {
                return fail("hydration ratio must be non-negative");
            }
            _ => {}
        }
        if self.exv_method == ExvMethod::GridScalable && !self.fit_excluded_volume {
            return fail("the scalable excluded-volume model needs fit_excluded_volume");
        }
        Ok(())
    }

    /// The module-wide q-axis.
    #[must_use]
    pub fn q_axis(&self) -> Axis {
        Axis::new(self.qmin, self.qmax, self.bins)
    }

    /// The module-wide distance axis.
    #[must_use]
    pub fn d_axis(&self) -> Axis {
        let bins = crate::convert::floor_index(
            (self.max_distance / self.distance_bin_width).round(),
        )
        .max(1);
        Axis::new(
            0.0,
            crate::convert::count_f64(bins) * self.distance_bin_width,
            bins,
        )
    }

    /// Parses a line-oriented settings file. Unrecognized keys are
    /// rejected; every line is `key value` with `#` starting a comment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on malformed lines or unknown keys
    /// and [`Error::Configuration`] when the parsed record fails
    /// validation.
    pub fn parse(input: &str) -> Result<Self> {
        let mut settings = Self::default();

        for (number, raw) in input.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once(char::is_whitespace).ok_or_else(|| {
                Error::InvalidInput(format!("line {}: expected `key value`", number + 1))
            })?;
            settings.apply(key.trim(), value.trim()).map_err(|err| {
                Error::InvalidInput(format!("line {}: {err}", number + 1))
            })?;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        fn num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse()
                .map_err(|_| Error::InvalidInput(format!("invalid value `{value}` for `{key}`")))
        }

        match key {
            "threads" => self.threads = num(key, value)?,
            "N" => self.n_points = num(key, value)?,
            "qmin" => self.qmin = num(key, value)?,
            "qmax" => self.qmax = num(key, value)?,
            "bins" => self.bins = num(key, value)?,
            "max_distance" => self.max_distance = num(key, value)?,
            "distance_bin_width" => self.distance_bin_width = num(key, value)?,
            "weighted_bins" => self.weighted_bins = num(key, value)?,
            "fit_excluded_volume" => self.fit_excluded_volume = num(key, value)?,
            "fit_solvent_density" => self.fit_solvent_density = num(key, value)?,
            "fit_hydration" => self.fit_hydration = num(key, value)?,
            "fit_atomic_debye_waller" => self.fit_atomic_debye_waller = num(key, value)?,
            "fit_exv_debye_waller" => self.fit_exv_debye_waller = num(key, value)?,
            "exv_method" => self.exv_method = num(key, value)?,
            // `placement_strategy` is the historical name for the same option
            "hydration_strategy" | "placement_strategy" => {
                self.hydration_strategy = num(key, value)?;
            }
            "culling_strategy" => self.culling_strategy = num(key, value)?,
            "expansion_strategy" => self.expansion_strategy = num(key, value)?,
            "min_exv_radius" => self.min_exv_radius = num(key, value)?,
            "grid_width" => self.grid_width = num(key, value)?,
            "grid_margin" => self.grid_margin = num(key, value)?,
            "use_effective_charge" => self.use_effective_charge = num(key, value)?,
            "center" => self.center = num(key, value)?,
            "max_iterations" => self.max_iterations = num(key, value)?,
            "verbose" => self.verbose = num(key, value)?,
            "job_size" => self.job_size = num(key, value)?,
            "hydration_count" => self.water_target = WaterTarget::Count(num(key, value)?),
            "hydration_ratio" => self.water_target = WaterTarget::Ratio(num(key, value)?),
            "strict" => self.strict = num(key, value)?,
            _ => return Err(Error::InvalidInput(format!("unknown option `{key}`"))),
        }
        Ok(())
    }

    /// Writes every recognized option in the line-oriented format accepted
    /// by [`Settings::parse`].
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: String| {
            let _ = writeln!(out, "{key} {value}");
        };

        line("threads", self.threads.to_string());
        line("N", self.n_points.to_string());
        line("qmin", self.qmin.to_string());
        line("qmax", self.qmax.to_string());
        line("bins", self.bins.to_string());
        line("max_distance", self.max_distance.to_string());
        line("distance_bin_width", self.distance_bin_width.to_string());
        line("weighted_bins", self.weighted_bins.to_string());
        line("fit_excluded_volume", self.fit_excluded_volume.to_string());
        line("fit_solvent_density", self.fit_solvent_density.to_string());
        line("fit_hydration", self.fit_hydration.to_string());
        line(
            "fit_atomic_debye_waller",
            self.fit_atomic_debye_waller.to_string(),
        );
        line("fit_exv_debye_waller", self.fit_exv_debye_waller.to_string());
        line("exv_method", self.exv_method.to_string());
        line("hydration_strategy", self.hydration_strategy.to_string());
        line("culling_strategy", self.culling_strategy.to_string());
        line("expansion_strategy", self.expansion_strategy.to_string());
        line("min_exv_radius", self.min_exv_radius.to_string());
        line("grid_width", self.grid_width.to_string());
        line("grid_margin", self.grid_margin.to_string());
        line("use_effective_charge", self.use_effective_charge.to_string());
        line("center", self.center.to_string());
        line("max_iterations", self.max_iterations.to_string());
        line("verbose", self.verbose.to_string());
        line("job_size", self.job_size.to_string());
        match self.water_target {
            WaterTarget::Count(n) => line("hydration_count", n.to_string()),
            WaterTarget::Ratio(r) => line("hydration_ratio", r.to_string()),
        }
        line("strict", self.strict.to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn serialize_round_trips_every_option() {
        let mut settings = Settings::default();
        settings.threads = 4;
        settings.qmin = 0.01;
        settings.qmax = 0.4;
        settings.bins = 80;
        settings.weighted_bins = true;
        settings.fit_hydration = true;
        settings.exv_method = ExvMethod::GridSurface;
        settings.hydration_strategy = HydrationStrategy::Axes;
        settings.culling_strategy = CullingMethod::Outlier;
        settings.expansion_strategy = ExpansionMethod::Minimal;
        settings.water_target = WaterTarget::Count(120);

        let parsed = Settings::parse(&settings.serialize()).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn parse_skips_comments_and_blank_lines() {
        let parsed = Settings::parse("# a comment\n\nthreads 2 # trailing\n").unwrap();
        assert_eq!(parsed.threads, 2);
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        assert!(Settings::parse("does_not_exist 1\n").is_err());
    }

    #[test]
    fn set_global_rejects_invalid_records() {
        let mut settings = Settings::default();
        settings.bins = 0;
        assert!(Settings::set_global(settings).is_err());
        // the previous record stays in place
        assert!(Settings::global().bins > 0);
    }

    #[test]
    fn validate_rejects_inverted_q_axis() {
        let mut settings = Settings::default();
        settings.qmin = 1.0;
        settings.qmax = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn d_axis_width_matches_setting() {
        let settings = Settings::default();
        let axis = settings.d_axis();
        float_cmp::assert_approx_eq!(f64, axis.width(), settings.distance_bin_width, ulps = 2);
    }
}
