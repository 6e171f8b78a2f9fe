// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! The sweeps behind each `axion-sweep` subcommand.

Every driver takes the shared `Config`, writes one or more result tables
under `config.output_dir`, and returns the paths it wrote. Drivers that
compare the two integrators put both in one row: the discrete probability
and time (µs), then the adaptive probability, error and time (ms).

A remesh that is not an exact coarsening skips the affected field map (or
grid size) with an error message; I/O trouble and unknown gases abort.

*/

use slog::Logger;
use std::path::PathBuf;

use crate::buffer_gas::BufferGas;
use crate::conversion::{ConversionEngine, Transmission};
use crate::field_map::FieldMap;
use crate::sweep::{self, Config, Mode, ResultTable, Stats, TimeUnit, TrackSpec};
use crate::vec3::Vec3;
use crate::{Error, Result};


const BOTH_COLUMNS: [&str; 5] = [
    "ProbabilityDiscrete",
    "TimeDiscrete(us)",
    "ProbabilityAdaptive",
    "ErrorAdaptive",
    "TimeAdaptive(ms)",
];

/// One evaluation to run.
#[derive(Clone,Debug)]
struct Point {
    label: String,
    mass: f64,
    track: TrackSpec,
    mode: Mode,
    interpolation: bool,
    /// Overrides the sweep's gas.
    gas: Option<BufferGas>,
}

impl Point {
    fn new(config: &Config, label: String, mass: f64, mode: Mode) -> Self {
        Point {
            label: label,
            mass: mass,
            track: config.track,
            mode: mode,
            interpolation: config.interpolation,
            gas: None,
        }
    }
}

/// Run `points` against `map` on the configured pool. `gas` is used for
/// points that do not bring their own.
fn run_points(config: &Config, logger: &Logger, gas: &BufferGas, map: &FieldMap,
              points: &[Point]) -> Result<Vec<Stats>> {
    let results = sweep::parallel_map_with(config.jobs, map, points, |map, p| {
        let engine = ConversionEngine::new(Some(p.gas.as_ref().unwrap_or(gas))).with_logger(logger);
        map.set_interpolation(p.interpolation);
        let context = format!("{} {} ma={}", map.name(), p.label, p.mass);

        sweep::measure(config.n_data, config.debug, logger, &context, || {
            sweep::evaluate(&engine, map, &p.track, p.mode, config.energy_kev, p.mass)
        })
    });

    results.into_iter().collect()
}

/// Each variant evaluated with both integrators, discrete first.
fn paired(config: &Config, variants: Vec<Point>) -> Vec<Point> {
    let mut points = Vec::with_capacity(2 * variants.len());

    for v in variants {
        let mut adaptive = v.clone();
        adaptive.mode = config.adaptive_mode();
        points.push(Point { mode: config.discrete_mode(), ..v });
        points.push(adaptive);
    }

    points
}

fn both_row(discrete: &Stats, adaptive: &Stats) -> Vec<f64> {
    vec![
        discrete.mean_probability(),
        discrete.mean_time(TimeUnit::Micros),
        adaptive.mean_probability(),
        adaptive.mean_error(),
        adaptive.mean_time(TimeUnit::Millis),
    ]
}

fn columns_with<'a>(first: &[&'a str], rest: &[&'a str]) -> Vec<&'a str> {
    first.iter().chain(rest.iter()).cloned().collect()
}

fn single_columns(first: &[&'static str], mode: Mode) -> Vec<&'static str> {
    columns_with(first, &["Probability", "Error", mode.time_unit().label()])
}

/// Load each configured field map, skipping (with an error message) those
/// whose remesh fails, and hand it to `f`.
fn for_each_field<F>(config: &Config, logger: &Logger, mut f: F) -> Result<Vec<PathBuf>>
    where F: FnMut(&FieldMap) -> Result<Vec<PathBuf>>
{
    let mut written = Vec::new();

    for name in &config.field_names {
        let map = match config.load_map(name, logger) {
            Ok(m) => m,
            Err(Error::InvalidMesh(msg)) => {
                error!(logger, "cannot remesh field map; skipping it"; "field" => name.as_str(), "reason" => msg);
                continue;
            },
            Err(e) => return Err(e),
        };

        written.extend(f(&map)?);
    }

    Ok(written)
}

fn write_table(config: &Config, logger: &Logger, table: &ResultTable, file_name: &str) -> Result<PathBuf> {
    let path = table.write(&config.output_dir, file_name)?;
    info!(logger, "wrote results"; "path" => %path.display(), "rows" => table.rows.len());
    Ok(path)
}

/// Sweep one parameter for each field and mass with a single integrator,
/// one table per (field, mass).
fn simple_sweep<V>(config: &Config, logger: &Logger, analysis: &str, first_column: &'static str,
                   variants: &[V], make: V2P<V>) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let points: Vec<Point> = variants.iter().map(|v| make(config, v, ma)).collect();
            let stats = run_points(config, logger, &gas, map, &points)?;
            let accuracy = points.first().and_then(|p| p.mode.accuracy());
            let unit = points.first().map_or(TimeUnit::Millis, |p| p.mode.time_unit());

            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, accuracy),
                &columns_with(&[first_column], &["Probability", "Error", unit.label()]),
            );

            for (p, s) in points.iter().zip(&stats) {
                table.push(p.label.clone(), s.summary(unit));
            }

            let file_name = sweep::table_file_name(map.name(), analysis, ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

type V2P<V> = fn(&Config, &V, f64) -> Point;


/// Discrete integration at each sampling step.
pub fn discrete(config: &Config, steps: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    simple_sweep(config, logger, "discrete", "Step", steps, |config, &step, ma| {
        Point::new(config, format!("{}", step), ma, Mode::Discrete { step: step })
    })
}

/// Adaptive integration at each accuracy.
pub fn adaptive(config: &Config, accuracies: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    simple_sweep(config, logger, "adaptive", "Accuracy", accuracies, |config, &accuracy, ma| {
        let mode = Mode::Adaptive { accuracy: accuracy, workspace: config.workspace, levels: config.levels };
        Point::new(config, format!("{}", accuracy), ma, mode)
    })
}

/// Adaptive integration over workspace sizes and bisection level caps.
pub fn adaptive_map(config: &Config, workspaces: &[usize], levels: &[usize], logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let mut points = Vec::new();
            let mut extra = Vec::new();

            for &w in workspaces {
                for &l in levels {
                    let mode = Mode::Adaptive { accuracy: config.accuracy, workspace: w, levels: l };
                    points.push(Point::new(config, format!("{}", w), ma, mode));
                    extra.push(l as f64);
                }
            }

            let stats = run_points(config, logger, &gas, map, &points)?;
            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, Some(config.accuracy)),
                &["Workspace", "Levels", "Probability", "Error", "Time(ms)"],
            );

            for ((p, s), l) in points.iter().zip(&stats).zip(extra) {
                let mut values = vec![l];
                values.extend(s.summary(TimeUnit::Millis));
                table.push(p.label.clone(), values);
            }

            let file_name = sweep::table_file_name(map.name(), "adaptive_map", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

/// Adaptive integration after coarsening the map to each of `meshes`, for
/// each accuracy. The configured remesh is ignored here.
pub fn grid(config: &Config, meshes: &[Vec3], accuracies: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);
    let base_config = Config { remesh: None, ..config.clone() };

    for_each_field(&base_config, logger, |base| {
        let mut remeshed = Vec::new();

        for &mesh in meshes {
            let mut map = base.clone();

            match map.remap_all(mesh) {
                Ok(()) => remeshed.push((mesh, map)),
                Err(Error::InvalidMesh(msg)) => {
                    error!(logger, "cannot remesh field map; skipping this grid";
                           "field" => base.name(), "mesh" => ?mesh, "reason" => msg);
                },
                Err(e) => return Err(e),
            }
        }

        let mut written = Vec::new();

        for &accuracy in accuracies {
            let mode = Mode::Adaptive { accuracy: accuracy, workspace: config.workspace, levels: config.levels };

            for &ma in &masses {
                let mut table = ResultTable::new(
                    sweep::resonance_line(ma, resonance, Some(accuracy)),
                    &["Mesh", "Nodes", "Probability", "Error", "Time(ms)"],
                );

                for (mesh, map) in &remeshed {
                    let label = format!("({},{},{})", mesh.x, mesh.y, mesh.z);
                    let nodes: usize = map.volumes().iter().map(|v| v.nodes().len()).sum();
                    let points = vec![Point::new(config, label.clone(), ma, mode)];
                    let stats = run_points(config, logger, &gas, map, &points)?;

                    let mut values = vec![nodes as f64];
                    values.extend(stats[0].summary(TimeUnit::Millis));
                    table.push(label, values);
                }

                let analysis = format!("grid_accuracy_{:.2}", accuracy);
                let file_name = sweep::table_file_name(base.name(), &analysis, ma, resonance);
                written.push(write_table(config, logger, &table, &file_name)?);
            }
        }

        Ok(written)
    })
}

/// Nearest-node versus trilinear field lookup, with both integrators.
pub fn interpolation(config: &Config, logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let variants = [false, true].iter().map(|&on| Point {
                interpolation: on,
                ..Point::new(config, (if on { "on" } else { "off" }).to_owned(), ma, config.mode())
            }).collect();

            let points = paired(config, variants);
            let stats = run_points(config, logger, &gas, map, &points)?;
            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, Some(config.accuracy)),
                &columns_with(&["Interpolation"], &BOTH_COLUMNS),
            );

            for (p, s) in points.chunks(2).zip(stats.chunks(2)) {
                table.push(p[0].label.clone(), both_row(&s[0], &s[1]));
            }

            let file_name = sweep::table_file_name(map.name(), "interpolation", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

/// Vacuum against the configured buffer gas.
pub fn gas(config: &Config, logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);
    let mode = config.mode();

    let mut cases = vec![("vacuum".to_owned(), BufferGas::vacuum())];

    if let Some(ref name) = config.gas {
        cases.push((name.clone(), gas.clone()));
    }

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let points: Vec<Point> = cases.iter().map(|(label, g)| Point {
                gas: Some(g.clone()),
                ..Point::new(config, label.clone(), ma, mode)
            }).collect();

            let stats = run_points(config, logger, &gas, map, &points)?;
            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, mode.accuracy()),
                &single_columns(&["Gas"], mode),
            );

            for (p, s) in points.iter().zip(&stats) {
                table.push(p.label.clone(), s.summary(mode.time_unit()));
            }

            let file_name = sweep::table_file_name(map.name(), "gas", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

/// The configured field maps side by side, one table per mass.
pub fn field_maps(config: &Config, logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);
    let mode = config.mode();

    let mut tables: Vec<ResultTable> = masses.iter().map(|&ma| ResultTable::new(
        sweep::resonance_line(ma, resonance, mode.accuracy()),
        &single_columns(&["Field"], mode),
    )).collect();

    for_each_field(config, logger, |map| {
        let points: Vec<Point> = masses.iter()
            .map(|&ma| Point::new(config, map.name().to_owned(), ma, mode))
            .collect();
        let stats = run_points(config, logger, &gas, map, &points)?;

        for (table, s) in tables.iter_mut().zip(&stats) {
            table.push(map.name(), s.summary(mode.time_unit()));
        }

        Ok(Vec::new())
    })?;

    let mut written = Vec::new();

    for (table, &ma) in tables.iter().zip(&masses) {
        let file_name = sweep::table_file_name("fields", "comparison", ma, resonance);
        written.push(write_table(config, logger, table, &file_name)?);
    }

    Ok(written)
}

/// A few representative tracks through a bore centred on the z axis.
pub fn default_tracks() -> Vec<(String, TrackSpec)> {
    let segment = |a: [f64; 3], b: [f64; 3]| TrackSpec::Segment { start: Vec3::from(a), end: Vec3::from(b) };

    vec![
        ("axis".to_owned(), segment([0., 0., -11000.], [0., 0., 11000.])),
        ("diagonal".to_owned(), segment([-5., 5., -11000.], [5., -5., 11000.])),
        ("offset-x".to_owned(), segment([100., 0., -11000.], [100., 0., 11000.])),
        ("offset-y".to_owned(), segment([0., 100., -11000.], [0., 100., 11000.])),
        ("tilted".to_owned(), segment([-100., 0., -11000.], [100., 0., 11000.])),
    ]
}

/// Each named track with the configured integrator.
pub fn tracks(config: &Config, tracks: &[(String, TrackSpec)], logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);
    let mode = config.mode();

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let points: Vec<Point> = tracks.iter().map(|(label, track)| Point {
                track: *track,
                ..Point::new(config, label.clone(), ma, mode)
            }).collect();

            let stats = run_points(config, logger, &gas, map, &points)?;
            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, mode.accuracy()),
                &single_columns(&["Track"], mode),
            );

            for (p, s) in points.iter().zip(&stats) {
                table.push(p.label.clone(), s.summary(mode.time_unit()));
            }

            let file_name = sweep::table_file_name(map.name(), "tracks", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

/// `n` densities from `min` upward in steps of `(max - min) / n`.
pub fn density_values(min: f64, max: f64, n: usize) -> Vec<f64> {
    let step = (max - min) / n as f64;
    (0..n).map(|j| min + j as f64 * step).collect()
}

/// Both integrators on resonance as the gas density varies. The axion
/// mass follows the photon mass at each density.
pub fn density(config: &Config, densities: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    let name = config.gas.clone().unwrap_or_else(|| "He".to_owned());
    let base_gas = config.buffer_gas()?;
    let mut gases = Vec::with_capacity(densities.len());

    for &rho in densities {
        gases.push(BufferGas::new(&name, rho)?);
    }

    for_each_field(config, logger, |map| {
        let variants = densities.iter().zip(&gases).map(|(rho, g)| Point {
            gas: Some(g.clone()),
            ..Point::new(config, format!("{:e}", rho), g.photon_mass(config.energy_kev), config.mode())
        }).collect();

        let points = paired(config, variants);
        let stats = run_points(config, logger, &base_gas, map, &points)?;
        let mut table = ResultTable::new(
            format!("On resonance, gas: {}  Accuracy: {}", name, config.accuracy),
            &columns_with(&["Density", "PhotonMass"], &BOTH_COLUMNS),
        );

        for (p, s) in points.chunks(2).zip(stats.chunks(2)) {
            let mut values = vec![p[0].mass];
            values.extend(both_row(&s[0], &s[1]));
            table.push(p[0].label.clone(), values);
        }

        let file_name = format!("{}_density_{}.txt", map.name(), name);
        Ok(vec![write_table(config, logger, &table, &file_name)?])
    })
}

/// The closed-form probability for the mean field along the configured
/// track, over coherence lengths.
pub fn coherence(config: &Config, lengths: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);
    let engine = ConversionEngine::new(Some(&gas)).with_logger(logger);

    for_each_field(config, logger, |map| {
        let mut map = map.clone();
        let profile = config.track.profile(&mut map, config.step)?;

        if profile.is_empty() {
            warn!(logger, "track misses the field map"; "field" => map.name());
        }

        let b_mean = profile.iter().sum::<f64>() / profile.len().max(1) as f64;
        debug!(logger, "mean transverse field"; "field" => map.name(), "b" => b_mean);

        let mut written = Vec::new();

        for &ma in &masses {
            let rows = sweep::parallel_map_with(config.jobs, &(), lengths, |_, &length| {
                let context = format!("{} L={} ma={}", map.name(), length, ma);
                sweep::measure(config.n_data, config.debug, logger, &context, || Ok(Transmission {
                    probability: engine.transmission_uniform(b_mean, length, config.energy_kev, ma),
                    error: 0.,
                }))
            });

            let mut table = ResultTable::new(
                format!("{}  B: {}", sweep::resonance_line(ma, resonance, None), b_mean),
                &["Length", "Probability", "Error", "Time(us)"],
            );

            for (&length, s) in lengths.iter().zip(rows) {
                table.push(format!("{}", length), s?.summary(TimeUnit::Micros));
            }

            let file_name = sweep::table_file_name(map.name(), "coherence", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}

/// Both integrators with the track's far end moved across a grid of
/// transverse offsets.
pub fn track_scan(config: &Config, offsets: &[f64], logger: &Logger) -> Result<Vec<PathBuf>> {
    let gas = config.buffer_gas()?;
    let resonance = gas.photon_mass(config.energy_kev);
    let masses = config.masses(&gas);

    for_each_field(config, logger, |map| {
        let mut written = Vec::new();

        for &ma in &masses {
            let mut variants = Vec::new();

            for &dx in offsets {
                for &dy in offsets {
                    variants.push(Point {
                        track: config.track.shifted_end(Vec3::new(dx, dy, 0.)),
                        ..Point::new(config, format!("({},{})", dx, dy), ma, config.mode())
                    });
                }
            }

            let points = paired(config, variants);
            let stats = run_points(config, logger, &gas, map, &points)?;
            let mut table = ResultTable::new(
                sweep::resonance_line(ma, resonance, Some(config.accuracy)),
                &columns_with(&["EndOffset"], &BOTH_COLUMNS),
            );

            for (p, s) in points.chunks(2).zip(stats.chunks(2)) {
                table.push(p[0].label.clone(), both_row(&s[0], &s[1]));
            }

            let file_name = sweep::table_file_name(map.name(), "track_scan", ma, resonance);
            written.push(write_table(config, logger, &table, &file_name)?);
        }

        Ok(written)
    })
}
