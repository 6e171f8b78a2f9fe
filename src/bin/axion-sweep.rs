// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

//! Run axion-photon conversion sweeps over field maps and write result
//! tables.

#[macro_use] extern crate slog;

use axion_transmission::descriptor;
use axion_transmission::drivers;
use axion_transmission::sweep::{Config, TrackSpec};
use axion_transmission::{Result, Vec3};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use slog::{Drain, Level, Logger};
use std::path::PathBuf;
use std::process;
use std::time::Instant;


fn parse_vec3(s: &str) -> std::result::Result<Vec3, String> {
    let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();

    if parts.len() != 3 {
        return Err(format!("expected \"x,y,z\", got \"{}\"", s));
    }

    let mut c = [0_f64; 3];

    for (i, p) in parts.iter().enumerate() {
        c[i] = p.parse::<f64>().map_err(|e| format!("bad number \"{}\": {}", p, e))?;
    }

    Ok(Vec3::from(c))
}

fn list_arg(name: &'static str, help: &'static str, defaults: &'static [&'static str]) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .value_delimiter(',')
        .num_args(1..)
        .default_values(defaults.iter().copied())
}

fn cli() -> Command {
    Command::new("axion-sweep")
        .version(clap::crate_version!())
        .about("Axion-photon conversion sweeps through magnet field maps")
        .subcommand_required(true)
        .arg(Arg::new("descriptor").long("descriptor").global(true)
             .help("The YAML field descriptor").value_parser(value_parser!(PathBuf))
             .default_value("fields.yml"))
        .arg(Arg::new("output-dir").long("output-dir").short('o').global(true)
             .help("Where to write result tables").value_parser(value_parser!(PathBuf))
             .default_value("."))
        .arg(Arg::new("debug").long("debug").global(true).action(ArgAction::SetTrue)
             .help("Log every repetition"))
        .arg(Arg::new("n-data").long("n-data").global(true).value_parser(value_parser!(usize))
             .help("Repetitions per parameter point").default_value("1"))
        .arg(Arg::new("energy").long("energy").global(true).value_parser(value_parser!(f64))
             .help("Axion energy in keV").default_value("4.2"))
        .arg(Arg::new("gas").long("gas").global(true)
             .help("Buffer gas symbol, or \"vacuum\"").default_value("He"))
        .arg(Arg::new("density").long("density").global(true).value_parser(value_parser!(f64))
             .help("Buffer gas density in kg/mm^3").default_value("2.9836e-10"))
        .arg(Arg::new("mass").long("mass").global(true).value_parser(value_parser!(f64))
             .value_delimiter(',').action(ArgAction::Append)
             .help("Off-resonance axion masses in eV (default 0.01,0.1,0.3)"))
        .arg(Arg::new("field").long("field").global(true).action(ArgAction::Append)
             .help("Field map names (default: all in the descriptor)"))
        .arg(Arg::new("step").long("step").global(true).value_parser(value_parser!(f64))
             .help("Discrete sampling step in mm").default_value("10"))
        .arg(Arg::new("accuracy").long("accuracy").global(true).value_parser(value_parser!(f64))
             .help("Adaptive absolute tolerance in T mm").default_value("0.1"))
        .arg(Arg::new("workspace").long("workspace").global(true).value_parser(value_parser!(usize))
             .help("Adaptive subinterval limit").default_value("100"))
        .arg(Arg::new("levels").long("levels").global(true).value_parser(value_parser!(usize))
             .help("Adaptive bisection depth limit").default_value("20"))
        .arg(Arg::new("discrete").long("discrete").global(true).action(ArgAction::SetTrue)
             .help("Use the discrete integrator in single-integrator sweeps"))
        .arg(Arg::new("remesh").long("remesh").global(true).value_parser(parse_vec3)
             .help("Coarsen every volume to this step, \"x,y,z\" in mm"))
        .arg(Arg::new("interpolation").long("interpolation").global(true).action(ArgAction::SetTrue)
             .help("Interpolate the field trilinearly"))
        .arg(Arg::new("start").long("start").global(true).value_parser(parse_vec3)
             .help("Track start \"x,y,z\" in mm").default_value("-5,5,-11000"))
        .arg(Arg::new("end").long("end").global(true).value_parser(parse_vec3)
             .help("Track end \"x,y,z\" in mm").default_value("5,-5,11000"))
        .arg(Arg::new("direction").long("direction").global(true).value_parser(parse_vec3)
             .conflicts_with("end")
             .help("Follow a ray from the start in this direction instead"))
        .arg(Arg::new("jobs").long("jobs").short('j').global(true).value_parser(value_parser!(usize))
             .help("Worker threads (0: one per core)").default_value("0"))
        .subcommand(Command::new("discrete")
                    .about("Discrete integration over sampling steps")
                    .arg(list_arg("steps", "Sampling steps in mm",
                                  &["1", "2", "5", "10", "20", "50", "100", "200"])
                         .value_parser(value_parser!(f64))))
        .subcommand(Command::new("adaptive")
                    .about("Adaptive integration over accuracies")
                    .arg(list_arg("accuracies", "Absolute tolerances in T mm",
                                  &["1", "0.5", "0.1", "0.05", "0.01"])
                         .value_parser(value_parser!(f64))))
        .subcommand(Command::new("adaptive-map")
                    .about("Adaptive integration over workspace sizes and level caps")
                    .arg(list_arg("workspaces", "Subinterval limits", &["50", "100", "200", "500"])
                         .value_parser(value_parser!(usize)))
                    .arg(list_arg("level-caps", "Bisection depth limits", &["10", "20", "30"])
                         .value_parser(value_parser!(usize))))
        .subcommand(Command::new("grid")
                    .about("Adaptive integration over coarsened grids")
                    .arg(Arg::new("mesh").long("mesh").value_parser(parse_vec3).action(ArgAction::Append)
                         .help("Grid steps \"x,y,z\" in mm; repeat for several")
                         .default_values(["10,10,50", "20,20,100", "30,30,150", "50,50,250"]))
                    .arg(list_arg("accuracies", "Absolute tolerances in T mm", &["0.5", "0.1"])
                         .value_parser(value_parser!(f64))))
        .subcommand(Command::new("interpolation")
                    .about("Nearest-node against trilinear lookup, both integrators"))
        .subcommand(Command::new("gas")
                    .about("Vacuum against the buffer gas"))
        .subcommand(Command::new("field-maps")
                    .about("Compare the field maps"))
        .subcommand(Command::new("tracks")
                    .about("The configured track and a set of standard ones"))
        .subcommand(Command::new("density")
                    .about("On-resonance probability over gas densities, both integrators")
                    .arg(Arg::new("min").long("min").value_parser(value_parser!(f64)).default_value("1e-11"))
                    .arg(Arg::new("max").long("max").value_parser(value_parser!(f64)).default_value("1e-9"))
                    .arg(Arg::new("points").long("points").value_parser(value_parser!(usize)).default_value("20")))
        .subcommand(Command::new("coherence")
                    .about("Closed-form probability over coherence lengths")
                    .arg(list_arg("lengths", "Coherence lengths in mm",
                                  &["1000", "2000", "5000", "10000", "20000"])
                         .value_parser(value_parser!(f64))))
        .subcommand(Command::new("track-scan")
                    .about("Move the track's far end across the bore, both integrators")
                    .arg(list_arg("offsets", "Transverse end offsets in mm",
                                  &["-300", "-150", "0", "150", "300"])
                         .value_parser(value_parser!(f64))))
}

fn many<T: Clone + Send + Sync + 'static>(m: &ArgMatches, name: &str) -> Vec<T> {
    m.get_many::<T>(name).map(|v| v.cloned().collect()).unwrap_or_default()
}

fn one<T: Clone + Send + Sync + 'static>(m: &ArgMatches, name: &str, fallback: T) -> T {
    m.get_one::<T>(name).cloned().unwrap_or(fallback)
}

fn make_config(m: &ArgMatches) -> Result<Config> {
    let defaults = Config::default();
    let descriptor = one(m, "descriptor", defaults.descriptor.clone());

    let gas = match m.get_one::<String>("gas").map(|s| s.as_str()) {
        None | Some("vacuum") | Some("") => None,
        Some(g) => Some(g.to_owned()),
    };

    let masses = many::<f64>(m, "mass");
    let mut field_names = many::<String>(m, "field");

    if field_names.is_empty() {
        field_names = descriptor::field_names(&descriptor)?;
    }

    let start = one(m, "start", Vec3::new(-5., 5., -11000.));
    let track = match m.get_one::<Vec3>("direction") {
        Some(&direction) => TrackSpec::Ray { start: start, direction: direction },
        None => TrackSpec::Segment { start: start, end: one(m, "end", Vec3::new(5., -5., 11000.)) },
    };

    Ok(Config {
        descriptor: descriptor,
        output_dir: one(m, "output-dir", defaults.output_dir.clone()),
        debug: m.get_flag("debug"),
        n_data: one(m, "n-data", defaults.n_data),
        energy_kev: one(m, "energy", defaults.energy_kev),
        gas: gas,
        gas_density: one(m, "density", defaults.gas_density),
        masses: if masses.is_empty() { defaults.masses.clone() } else { masses },
        field_names: field_names,
        step: one(m, "step", defaults.step),
        accuracy: one(m, "accuracy", defaults.accuracy),
        workspace: one(m, "workspace", defaults.workspace),
        levels: one(m, "levels", defaults.levels),
        adaptive: !m.get_flag("discrete"),
        remesh: m.get_one::<Vec3>("remesh").cloned(),
        interpolation: m.get_flag("interpolation"),
        track: track,
        jobs: one(m, "jobs", defaults.jobs),
    })
}

fn run(name: &str, sub: &ArgMatches, logger: &Logger) -> Result<Vec<PathBuf>> {
    let config = make_config(sub)?;

    info!(logger, "starting sweep";
          "sweep" => name,
          "fields" => ?config.field_names,
          "gas" => ?config.gas,
          "energy_kev" => config.energy_kev,
          "n_data" => config.n_data);

    match name {
        "discrete" => drivers::discrete(&config, &many::<f64>(sub, "steps"), logger),
        "adaptive" => drivers::adaptive(&config, &many::<f64>(sub, "accuracies"), logger),
        "adaptive-map" => drivers::adaptive_map(&config, &many::<usize>(sub, "workspaces"),
                                                &many::<usize>(sub, "level-caps"), logger),
        "grid" => drivers::grid(&config, &many::<Vec3>(sub, "mesh"), &many::<f64>(sub, "accuracies"), logger),
        "interpolation" => drivers::interpolation(&config, logger),
        "gas" => drivers::gas(&config, logger),
        "field-maps" => drivers::field_maps(&config, logger),
        "tracks" => {
            let mut tracks = vec![("configured".to_owned(), config.track)];
            tracks.extend(drivers::default_tracks());
            drivers::tracks(&config, &tracks, logger)
        },
        "density" => {
            let densities = drivers::density_values(one(sub, "min", 1e-11), one(sub, "max", 1e-9),
                                                    one(sub, "points", 20));
            drivers::density(&config, &densities, logger)
        },
        "coherence" => drivers::coherence(&config, &many::<f64>(sub, "lengths"), logger),
        "track-scan" => drivers::track_scan(&config, &many::<f64>(sub, "offsets"), logger),
        _ => Ok(Vec::new()),
    }
}

fn main() {
    let matches = cli().get_matches();

    let (name, sub) = match matches.subcommand() {
        Some(s) => s,
        None => process::exit(2),
    };

    let level = if sub.get_flag("debug") { Level::Debug } else { Level::Info };
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build()
        .filter_level(level)
        .fuse();
    let logger = Logger::root(drain, o!());

    let t0 = Instant::now();

    let code = match run(name, sub, &logger) {
        Ok(paths) => {
            info!(logger, "sweep complete"; "tables" => paths.len(),
                  "seconds" => t0.elapsed().as_secs_f64());
            0
        },
        Err(e) => {
            crit!(logger, "sweep failed"; "error" => %e);
            1
        },
    };

    // Dropping the logger flushes the async drain.
    drop(logger);
    process::exit(code);
}
