// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

//! Helpers for testing convenience: loggers, random sampling, and field
//! map fixtures written to a temporary directory.

#[macro_use] extern crate slog;

use axion_transmission::{FieldMap, Vec3, Volume};
use slog::Drain;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a simple `slog` logger for use in test programs.
///
/// It logs to the terminal using default parameters, as per the `slog` basic
/// example.
pub fn default_log() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build().fuse();
    slog::Logger::root(drain, o!())
}

/// A logger that drops everything.
pub fn quiet_log() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}


/// A simple utility for sampling random numbers.
///
/// The distribution can be uniform or log-uniform.
pub struct Sampler {
    is_log: bool,
    low: f64,
    range: f64
}

impl Sampler {
    pub fn new(is_log: bool, mut low: f64, mut high: f64) -> Self {
        if low > high {
            std::mem::swap(&mut low, &mut high);
        }

        if is_log {
            low = low.ln();
            high = high.ln();
        }

        Sampler { is_log: is_log, low: low, range: high - low }
    }

    pub fn get(&self) -> f64 {
        let n = self.low + rand::random::<f64>() * self.range;

        if self.is_log {
            n.exp()
        } else {
            n
        }
    }
}


/// A box with the same field everywhere, one cell per `mesh`.
pub fn uniform_volume(origin: [f64; 3], extents: [f64; 3], mesh: [f64; 3], b: [f64; 3]) -> Volume {
    Volume::uniform(Vec3::from(origin), Vec3::from(extents), Vec3::from(mesh), Vec3::from(b))
        .expect("bad uniform volume")
}

/// A bore-like field: `By` peaks at `peak` T on the axis, falls off
/// quadratically across the bore and tapers towards both ends in z.
pub fn smooth_bore(origin: [f64; 3], extents: [f64; 3], mesh: [f64; 3], peak: f64) -> Volume {
    let o = Vec3::from(origin);
    let e = Vec3::from(extents);

    Volume::from_fn(o, e, Vec3::from(mesh), |p| {
        let u = 2. * (p.x - o.x) / e.x - 1.;
        let v = 2. * (p.y - o.y) / e.y - 1.;
        let w = 2. * (p.z - o.z) / e.z - 1.;
        let transverse = 1. - 0.3 * (u * u + v * v);
        let axial = 1. - 0.5 * w * w;
        Vec3::new(0.05 * peak * u, peak * transverse * axial, 0.)
    }).expect("bad smooth volume")
}

/// The field maps used by the stacked-volume tests: 2 T, then 1 T, then
/// 2 T again along z, with the jumps at z = 300.5 and 700.5.
pub fn piecewise_volumes() -> Vec<Volume> {
    vec![
        uniform_volume([-1., -1., 0.], [2., 2., 300.5], [2., 2., 300.5], [0., 2., 0.]),
        uniform_volume([-1., -1., 300.5], [2., 2., 400.], [2., 2., 400.], [0., 1., 0.]),
        uniform_volume([-1., -1., 700.5], [2., 2., 299.5], [2., 2., 299.5], [0., 2., 0.]),
    ]
}

pub fn piecewise_map() -> FieldMap {
    FieldMap::from_volumes("piecewise", piecewise_volumes())
}


/// A temporary directory holding a field descriptor and its node files.
pub struct FieldFixture {
    dir: TempDir,
    yaml: String,
}

impl FieldFixture {
    pub fn new() -> Self {
        FieldFixture {
            dir: tempfile::tempdir().expect("cannot create temporary directory"),
            yaml: String::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn descriptor(&self) -> PathBuf {
        self.dir.path().join("fields.yml")
    }

    /// Add a field map: each volume's nodes go to `<name>_<i>.bin` and the
    /// descriptor is rewritten.
    pub fn add_field(&mut self, name: &str, volumes: &[Volume]) -> &mut Self {
        let _ = writeln!(self.yaml, "{}:\n  volumes:", name);

        for (i, v) in volumes.iter().enumerate() {
            let file = format!("{}_{}.bin", name, i);
            v.write_nodes(self.dir.path().join(&file)).expect("cannot write node file");

            let (o, e, m) = (v.origin(), v.extents(), v.mesh());
            let _ = writeln!(self.yaml, "    - origin: [{:?}, {:?}, {:?}]", o.x, o.y, o.z);
            let _ = writeln!(self.yaml, "      extents: [{:?}, {:?}, {:?}]", e.x, e.y, e.z);
            let _ = writeln!(self.yaml, "      mesh: [{:?}, {:?}, {:?}]", m.x, m.y, m.z);
            let _ = writeln!(self.yaml, "      file: {}", file);
        }

        fs::write(self.descriptor(), &self.yaml).expect("cannot write descriptor");
        self
    }

    /// Add a constant-field map described inline in the descriptor.
    pub fn add_constant(&mut self, name: &str, origin: [f64; 3], extents: [f64; 3], b: [f64; 3]) -> &mut Self {
        let _ = writeln!(self.yaml, "{}:\n  volumes:", name);
        let _ = writeln!(self.yaml, "    - origin: {:?}", origin);
        let _ = writeln!(self.yaml, "      extents: {:?}", extents);
        let _ = writeln!(self.yaml, "      mesh: {:?}", extents);
        let _ = writeln!(self.yaml, "      field: {:?}", b);
        fs::write(self.descriptor(), &self.yaml).expect("cannot write descriptor");
        self
    }
}

impl Default for FieldFixture {
    fn default() -> Self {
        FieldFixture::new()
    }
}
