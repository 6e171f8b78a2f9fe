// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! Running parameter sweeps and writing their result tables.

A sweep is described by a `Config`. Each parameter point is evaluated
`n_data` times; the probability, error and wall-clock time of every
repetition are kept in a `Stats` and reported as arithmetic means. Points
run on a rayon pool and every worker gets its own copy of the field map,
since setting a track mutates the map.

Failures that only affect one point (no intersection, quadrature
divergence) are logged and recorded as NaN. Anything else aborts.

*/

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use slog::Logger;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::buffer_gas::BufferGas;
use crate::conversion::{ConversionEngine, Transmission};
use crate::field_map::FieldMap;
use crate::vec3::Vec3;
use crate::{Error, Result};


/// How the conversion integral is evaluated.
#[derive(Clone,Copy,Debug,PartialEq)]
pub enum Mode {
    /// Sample the field every `step` mm and sum.
    Discrete { step: f64 },

    /// Adaptive oscillatory quadrature along the track.
    Adaptive { accuracy: f64, workspace: usize, levels: usize },
}

impl Mode {
    /// Discrete evaluations are fast enough to time in microseconds.
    pub fn time_unit(&self) -> TimeUnit {
        match *self {
            Mode::Discrete { .. } => TimeUnit::Micros,
            Mode::Adaptive { .. } => TimeUnit::Millis,
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        match *self {
            Mode::Discrete { .. } => None,
            Mode::Adaptive { accuracy, .. } => Some(accuracy),
        }
    }
}


/// The straight line the axion follows.
#[derive(Clone,Copy,Debug,PartialEq)]
pub enum TrackSpec {
    Segment { start: Vec3, end: Vec3 },
    Ray { start: Vec3, direction: Vec3 },
}

impl TrackSpec {
    /// Make this the map's current track.
    pub fn install(&self, map: &mut FieldMap) -> Result<()> {
        match *self {
            TrackSpec::Segment { start, end } => map.set_track_between(start, end)?,
            TrackSpec::Ray { start, direction } => map.set_track(start, direction)?,
        };
        Ok(())
    }

    /// The `|B⊥|` profile every `step` mm. A segment that misses the map
    /// gives an empty profile; a ray that misses is an error.
    pub fn profile(&self, map: &mut FieldMap, step: f64) -> Result<Vec<f64>> {
        match *self {
            TrackSpec::Segment { start, end } => map.transverse_along_path(start, end, step),
            TrackSpec::Ray { start, direction } => {
                map.set_track(start, direction)?;
                map.track_profile(step)
            },
        }
    }

    /// The same track with its far end displaced by `offset`. For a ray the
    /// direction is tilted by `offset` per unit length instead.
    pub fn shifted_end(&self, offset: Vec3) -> TrackSpec {
        match *self {
            TrackSpec::Segment { start, end } => TrackSpec::Segment { start: start, end: end + offset },
            TrackSpec::Ray { start, direction } => TrackSpec::Ray { start: start, direction: direction + offset },
        }
    }
}


#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum TimeUnit {
    Micros,
    Millis,
}

impl TimeUnit {
    pub fn label(&self) -> &'static str {
        match *self {
            TimeUnit::Micros => "Time(us)",
            TimeUnit::Millis => "Time(ms)",
        }
    }

    pub fn convert(&self, d: Duration) -> f64 {
        match *self {
            TimeUnit::Micros => d.as_secs_f64() * 1e6,
            TimeUnit::Millis => d.as_secs_f64() * 1e3,
        }
    }
}


/// Everything a sweep needs to know.
#[derive(Clone,Debug,PartialEq)]
pub struct Config {
    /// The YAML field descriptor.
    pub descriptor: PathBuf,
    /// Where result tables go.
    pub output_dir: PathBuf,
    /// Log every repetition.
    pub debug: bool,
    /// Repetitions per parameter point.
    pub n_data: usize,
    /// Axion energy (keV).
    pub energy_kev: f64,
    /// Buffer gas symbol; `None` for vacuum.
    pub gas: Option<String>,
    /// Buffer gas density (kg/mm³).
    pub gas_density: f64,
    /// Off-resonance axion masses (eV). The on-resonance mass is added by
    /// `Config::masses`.
    pub masses: Vec<f64>,
    pub field_names: Vec<String>,
    /// Discrete sampling step (mm).
    pub step: f64,
    /// Adaptive absolute tolerance (T mm).
    pub accuracy: f64,
    /// Adaptive subinterval limit.
    pub workspace: usize,
    /// Adaptive bisection depth limit.
    pub levels: usize,
    /// Drivers that use a single integrator use the adaptive one if set,
    /// the discrete one otherwise.
    pub adaptive: bool,
    /// Coarsen every volume to this step after loading.
    pub remesh: Option<Vec3>,
    pub interpolation: bool,
    pub track: TrackSpec,
    /// Worker threads; 0 lets rayon decide.
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            descriptor: PathBuf::from("fields.yml"),
            output_dir: PathBuf::from("."),
            debug: false,
            n_data: 1,
            energy_kev: 4.2,
            gas: Some("He".to_owned()),
            gas_density: 2.9836e-10,
            masses: vec![0.01, 0.1, 0.3],
            field_names: vec!["babyIAXO".to_owned()],
            step: 10.,
            accuracy: 0.1,
            workspace: 100,
            levels: 20,
            adaptive: true,
            remesh: None,
            interpolation: false,
            track: TrackSpec::Segment {
                start: Vec3::new(-5., 5., -11000.),
                end: Vec3::new(5., -5., 11000.),
            },
            jobs: 0,
        }
    }
}

impl Config {
    pub fn discrete_mode(&self) -> Mode {
        Mode::Discrete { step: self.step }
    }

    pub fn adaptive_mode(&self) -> Mode {
        Mode::Adaptive { accuracy: self.accuracy, workspace: self.workspace, levels: self.levels }
    }

    /// The integrator for single-integrator sweeps.
    pub fn mode(&self) -> Mode {
        if self.adaptive {
            self.adaptive_mode()
        } else {
            self.discrete_mode()
        }
    }

    pub fn buffer_gas(&self) -> Result<BufferGas> {
        match self.gas {
            Some(ref name) => BufferGas::new(name, self.gas_density),
            None => Ok(BufferGas::vacuum()),
        }
    }

    /// The configured masses followed by the on-resonance mass for `gas`.
    pub fn masses(&self, gas: &BufferGas) -> Vec<f64> {
        let mut m = self.masses.clone();
        m.push(gas.photon_mass(self.energy_kev));
        m
    }

    /// Load a named field map and apply the remesh and interpolation
    /// settings.
    pub fn load_map(&self, name: &str, logger: &Logger) -> Result<FieldMap> {
        let mut map = FieldMap::load(&self.descriptor, name, logger)?;

        if let Some(mesh) = self.remesh {
            map.remap_all(mesh)?;
            debug!(logger, "remeshed field map"; "field" => name, "mesh" => ?mesh);
        }

        map.set_interpolation(self.interpolation);
        Ok(map)
    }
}


/// One evaluation of the conversion probability: the integrator choice
/// decides how the field is queried.
pub fn evaluate(engine: &ConversionEngine, map: &mut FieldMap, track: &TrackSpec, mode: Mode,
                energy_kev: f64, axion_mass: f64) -> Result<Transmission> {
    match mode {
        Mode::Discrete { step } => {
            let profile = track.profile(map, step)?;
            Ok(Transmission {
                probability: engine.transmission_discrete(&profile, step, energy_kev, axion_mass),
                error: 0.,
            })
        },

        Mode::Adaptive { accuracy, workspace, levels } => {
            track.install(map)?;
            engine.transmission_adaptive(map, energy_kev, axion_mass, accuracy, workspace, levels)
        },
    }
}


/// Per-repetition results at one parameter point.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct Stats {
    probability: Vec<f64>,
    error: Vec<f64>,
    time: Vec<Duration>,
}

fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values.fold((0., 0_usize), |(s, n), v| (s + v, n + 1));

    if n == 0 {
        std::f64::NAN
    } else {
        sum / n as f64
    }
}

impl Stats {
    pub fn push(&mut self, t: Transmission, elapsed: Duration) {
        self.probability.push(t.probability);
        self.error.push(t.error);
        self.time.push(elapsed);
    }

    pub fn len(&self) -> usize {
        self.probability.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probability.is_empty()
    }

    pub fn mean_probability(&self) -> f64 {
        mean(self.probability.iter().cloned())
    }

    pub fn mean_error(&self) -> f64 {
        mean(self.error.iter().cloned())
    }

    pub fn mean_time(&self, unit: TimeUnit) -> f64 {
        mean(self.time.iter().map(|d| unit.convert(*d)))
    }

    /// `[probability, error, time]` means, the usual tail of a table row.
    pub fn summary(&self, unit: TimeUnit) -> Vec<f64> {
        vec![self.mean_probability(), self.mean_error(), self.mean_time(unit)]
    }
}


/// Run `f` `n_data` times, timing each call. A recoverable failure is
/// logged, recorded as NaN, and ends the repetitions for this point.
pub fn measure<F>(n_data: usize, debug: bool, logger: &Logger, point: &str, mut f: F) -> Result<Stats>
    where F: FnMut() -> Result<Transmission>
{
    let mut stats = Stats::default();

    for rep in 0..n_data.max(1) {
        let t0 = Instant::now();
        let outcome = f();
        let elapsed = t0.elapsed();

        match outcome {
            Ok(t) => {
                if debug {
                    debug!(logger, "evaluated"; "point" => point, "rep" => rep,
                           "probability" => t.probability, "error" => t.error,
                           "time_us" => TimeUnit::Micros.convert(elapsed));
                }
                stats.push(t, elapsed);
            },

            Err(ref e) if e.is_recoverable() => {
                warn!(logger, "evaluation failed"; "point" => point, "error" => %e);
                stats.push(Transmission::FAILED, elapsed);
                break;
            },

            Err(e) => return Err(e),
        }
    }

    Ok(stats)
}


/// Map `f` over `points` on a pool of `jobs` threads, giving each worker
/// its own clone of `state`. Results come back in input order.
pub fn parallel_map_with<T, P, R, F>(jobs: usize, state: &T, points: &[P], f: F) -> Vec<R>
    where T: Clone + Send + Sync,
          P: Sync,
          R: Send,
          F: Fn(&mut T, &P) -> R + Send + Sync
{
    if jobs == 1 || points.len() < 2 {
        let mut local = state.clone();
        return points.iter().map(|p| f(&mut local, p)).collect();
    }

    let run = || points.par_iter().map_init(|| state.clone(), |local, p| f(local, p)).collect();

    match ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool.install(run),
        Err(_) => run(),
    }
}


/// A result table: a metadata line, a tab-separated header, then one row
/// per variant with a text label followed by numbers.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct ResultTable {
    pub metadata: String,
    pub columns: Vec<String>,
    pub rows: Vec<(String, Vec<f64>)>,
}

impl ResultTable {
    pub fn new<S: Into<String>>(metadata: S, columns: &[&str]) -> Self {
        ResultTable {
            metadata: metadata.into(),
            columns: columns.iter().map(|c| (*c).to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push<S: Into<String>>(&mut self, label: S, values: Vec<f64>) {
        self.rows.push((label.into(), values));
    }

    pub fn render(&self) -> String {
        let mut text = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(text, "{}", self.metadata);
        let _ = writeln!(text, "{}", self.columns.join("\t"));

        for (label, values) in &self.rows {
            text.push_str(label);

            for v in values {
                text.push('\t');
                push_value(&mut text, *v);
            }

            text.push('\n');
        }

        text
    }

    /// Write the table into `dir`, creating the directory if needed.
    pub fn write(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        let path = dir.join(file_name);
        fs::write(&path, self.render()).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }
}


/// Plain notation for ordinary magnitudes, exponential otherwise.
fn push_value(text: &mut String, v: f64) {
    let a = v.abs();

    if v == 0. || !v.is_finite() || (a >= 1e-3 && a < 1e7) {
        let _ = write!(text, "{}", v);
    } else {
        let _ = write!(text, "{:e}", v);
    }
}

/// Whether `axion_mass` is the on-resonance mass.
pub fn is_on_resonance(axion_mass: f64, resonance_mass: f64) -> bool {
    (axion_mass - resonance_mass).abs() <= 1e-12 * (1. + resonance_mass.abs())
}

/// The first line of a result table.
pub fn resonance_line(axion_mass: f64, resonance_mass: f64, accuracy: Option<f64>) -> String {
    let mut line = if is_on_resonance(axion_mass, resonance_mass) {
        format!("On resonance, ma: {}", axion_mass)
    } else {
        format!("Off resonance, ma: {}", axion_mass)
    };

    if let Some(a) = accuracy {
        let _ = write!(line, "  Accuracy: {}", a);
    }

    line
}

/// A file name for a table of `analysis` results on field `field`.
pub fn table_file_name(field: &str, analysis: &str, axion_mass: f64, resonance_mass: f64) -> String {
    if is_on_resonance(axion_mass, resonance_mass) {
        format!("{}_{}_on_resonance.txt", field, analysis)
    } else {
        format!("{}_{}_mass_{:.2}.txt", field, analysis, axion_mass)
    }
}
