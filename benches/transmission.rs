// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/// Time the integrators on a bore-like field map.
///
/// The masses span the off-resonance set and the helium resonance; the
/// adaptive runs use the default accuracy, workspace and level cap.

#[macro_use] extern crate bencher;

use axion_transmission::{BufferGas, ConversionEngine, FieldMap, Vec3};
use axion_transmission_test_support::smooth_bore;
use bencher::Bencher;

const ENERGY: f64 = 4.2;
const DENSITY: f64 = 2.9836e-10;
const MASSES: &[f64] = &[0.01, 0.1, 0.3];

fn bore() -> FieldMap {
    FieldMap::from_volumes("bore", vec![
        smooth_bore([-350., -350., -5000.], [700., 700., 10000.], [50., 50., 250.], 2.5)
    ])
}

fn ends() -> (Vec3, Vec3) {
    (Vec3::new(-5., 5., -11000.), Vec3::new(5., -5., 11000.))
}

fn discrete_inner(mass_index: usize, step: f64) {
    let gas = BufferGas::new("He", DENSITY).unwrap();
    let engine = ConversionEngine::new(Some(&gas));
    let map = bore();
    let (a, b) = ends();

    let profile = map.transverse_along_path(a, b, step).unwrap();
    engine.transmission_discrete(&profile, step, ENERGY, MASSES[mass_index]);
}

fn adaptive_inner(axion_mass: Option<f64>) {
    let gas = BufferGas::new("He", DENSITY).unwrap();
    let engine = ConversionEngine::new(Some(&gas));
    let mut map = bore();
    let (a, b) = ends();
    map.set_track_between(a, b).unwrap();

    let ma = axion_mass.unwrap_or_else(|| gas.photon_mass(ENERGY));
    let _ = engine.transmission_adaptive(&map, ENERGY, ma, 0.1, 100, 20);
}


fn discrete_step10_m0(b: &mut Bencher) {
    b.iter(|| {
        discrete_inner(0, 10.);
    });
}

fn discrete_step1_m0(b: &mut Bencher) {
    b.iter(|| {
        discrete_inner(0, 1.);
    });
}

fn discrete_step10_m2(b: &mut Bencher) {
    b.iter(|| {
        discrete_inner(2, 10.);
    });
}

fn adaptive_m0(b: &mut Bencher) {
    b.iter(|| {
        adaptive_inner(Some(MASSES[0]));
    });
}

fn adaptive_m2(b: &mut Bencher) {
    b.iter(|| {
        adaptive_inner(Some(MASSES[2]));
    });
}

fn adaptive_resonance(b: &mut Bencher) {
    b.iter(|| {
        adaptive_inner(None);
    });
}


benchmark_group!(discrete, discrete_step10_m0, discrete_step1_m0, discrete_step10_m2);
benchmark_group!(adaptive, adaptive_m0, adaptive_m2, adaptive_resonance);
benchmark_main!(discrete, adaptive);
