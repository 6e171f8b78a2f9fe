// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

//! End-to-end checks of field maps, integrators and sweeps.

use assert_approx_eq::assert_approx_eq;
use axion_transmission::sweep::{evaluate, Config, Mode, TrackSpec};
use axion_transmission::{descriptor, drivers, BufferGas, ConversionEngine, Error, FieldMap, Transmission,
                         Vec3, PROBABILITY_PREFACTOR};
use axion_transmission_test_support::{default_log, piecewise_map, quiet_log, smooth_bore, uniform_volume,
                                      FieldFixture, Sampler};
use regex::Regex;
use std::fs;


fn uniform_map(b: f64, length: f64) -> FieldMap {
    let v = uniform_volume([-10., -10., 0.], [20., 20., length], [20., 20., length], [0., b, 0.]);
    FieldMap::from_volumes("uniform", vec![v])
}

fn axis(z0: f64, z1: f64) -> (Vec3, Vec3) {
    (Vec3::new(0., 0., z0), Vec3::new(0., 0., z1))
}


#[test]
fn vacuum_uniform_field() {
    let engine = ConversionEngine::new(None);
    let map = uniform_map(2., 1000.);
    let (a, b) = axis(-100., 1100.);

    let profile = map.transverse_along_path(a, b, 1.).unwrap();
    assert_eq!(profile.len(), 1001);

    let discrete = engine.transmission_discrete(&profile, 1., 4.2, 0.);
    let closed = engine.transmission_uniform(2., 1000., 4.2, 0.);
    assert!(((discrete - closed) / closed).abs() <= 1e-12);
    assert_approx_eq!(closed, PROBABILITY_PREFACTOR * 4e6, 1e-30);
}

#[test]
fn empty_track() {
    let engine = ConversionEngine::new(None);
    let map = uniform_map(2., 1000.);

    let profile = map.transverse_along_path(Vec3::new(5000., 0., 0.), Vec3::new(5000., 0., 1000.), 1.).unwrap();
    assert!(profile.is_empty());
    assert_eq!(engine.transmission_discrete(&profile, 1., 4.2, 0.), 0.);
}

#[test]
fn remesh_preserves_transmission() {
    let engine = ConversionEngine::new(None);
    let fine = FieldMap::from_volumes("bore", vec![
        smooth_bore([-150., -150., 0.], [300., 300., 1500.], [10., 10., 50.], 2.)
    ]);
    let mut coarse = fine.clone();
    coarse.remap(0, Vec3::new(30., 30., 150.)).unwrap();
    assert_eq!(coarse.volume(0).unwrap().dims(), [10, 10, 10]);

    for &(x, y) in &[(0., 0.), (45., -20.), (-100., 100.)] {
        let a = Vec3::new(x, y, -10.);
        let b = Vec3::new(x, y, 1510.);

        let pf = fine.transverse_along_path(a, b, 10.).unwrap();
        let pc = coarse.transverse_along_path(a, b, 10.).unwrap();
        let mean_f = pf.iter().sum::<f64>() / pf.len() as f64;
        let mean_c = pc.iter().sum::<f64>() / pc.len() as f64;
        assert!(((mean_c - mean_f) / mean_f).abs() < 0.1);

        let tf = engine.transmission_discrete(&pf, 10., 4.2, 0.);
        let tc = engine.transmission_discrete(&pc, 10., 4.2, 0.);
        assert!(((tc - tf) / tf).abs() < 0.15);
    }
}

#[test]
fn remesh_same_step_is_noop() {
    let mut map = FieldMap::from_volumes("bore", vec![
        smooth_bore([-150., -150., 0.], [300., 300., 1500.], [10., 10., 50.], 2.)
    ]);
    let before = map.volume(0).unwrap().nodes().to_vec();
    map.remap_all(Vec3::new(10., 10., 50.)).unwrap();
    assert_eq!(map.volume(0).unwrap().nodes(), &before[..]);

    let integral = map.volume(0).unwrap().field_integral();
    map.remap_all(Vec3::new(50., 30., 250.)).unwrap();
    let after = map.volume(0).unwrap().field_integral();
    assert_approx_eq!(after.y, integral.y, 1e-6 * integral.y.abs());
}

#[test]
fn discrete_and_adaptive_agree() {
    let engine = ConversionEngine::new(None);
    let mut map = piecewise_map();
    let (a, b) = axis(-100., 1100.);

    let profile = map.transverse_along_path(a, b, 1.).unwrap();
    let discrete = engine.transmission_discrete(&profile, 1., 4.2, 0.25);

    map.set_track_between(a, b).unwrap();
    let adaptive = engine.transmission_adaptive(&map, 4.2, 0.25, 0.1, 100, 20).unwrap();

    assert!(adaptive.error > 0.);
    assert!((adaptive.probability - discrete).abs() <= adaptive.error,
            "adaptive {:e} +/- {:e}, discrete {:e}", adaptive.probability, adaptive.error, discrete);
}

#[test]
fn track_misses_volume() {
    let mut map = uniform_map(2., 1000.);

    match map.set_track(Vec3::new(0., 0., -11000.), Vec3::new(1., 0., 0.)) {
        Err(Error::NoIntersection) => {},
        other => panic!("expected NoIntersection, got {:?}", other),
    }
}

#[test]
fn resonance_peak() {
    let gas = BufferGas::new("He", 2.9836e-10).unwrap();
    let engine = ConversionEngine::new(Some(&gas));
    let m_star = gas.photon_mass(4.2);
    assert_approx_eq!(m_star, 0.3518, 1e-3);

    let mut map = uniform_map(2., 10000.);
    let (a, b) = axis(-1000., 11000.);
    map.set_track_between(a, b).unwrap();

    let on = engine.transmission_adaptive(&map, 4.2, m_star, 0.1, 100, 20).unwrap();
    let off = engine.transmission_adaptive(&map, 4.2, 10. * m_star, 0.1, 100, 20).unwrap();
    assert!(on.probability > 100. * off.probability);
}

fn both_integrators(map: &mut FieldMap, track: &TrackSpec, axion_mass: f64) -> (f64, Transmission) {
    let engine = ConversionEngine::new(None);
    let discrete = evaluate(&engine, map, track, Mode::Discrete { step: 1. }, 4.2, axion_mass).unwrap();
    let adaptive = evaluate(&engine, map, track,
                            Mode::Adaptive { accuracy: 1e-3, workspace: 200, levels: 20 },
                            4.2, axion_mass).unwrap();
    (discrete.probability, adaptive)
}

#[test]
fn tangent_track_is_harmless() {
    let mut map = uniform_map(2., 1000.);

    // Runs along the x = 10 face: both integrators see the face field.
    let face = TrackSpec::Segment { start: Vec3::new(10., 0., -100.), end: Vec3::new(10., 0., 1100.) };
    let (discrete, adaptive) = both_integrators(&mut map, &face, 0.01);
    assert!(discrete > 0.);
    assert!(((adaptive.probability - discrete) / discrete).abs() < 1e-2,
            "adaptive {:e}, discrete {:e}", adaptive.probability, discrete);

    // Touches the z-parallel edge at x = y = 10 in a single point.
    let edge = TrackSpec::Segment { start: Vec3::new(0., 20., 500.), end: Vec3::new(20., 0., 500.) };
    assert!(edge.profile(&mut map, 1.).unwrap().len() <= 1);
    let (discrete, adaptive) = both_integrators(&mut map, &edge, 0.01);
    assert_eq!(discrete, 0.);
    assert_eq!(adaptive.probability, 0.);
    assert_eq!(map.track().map(|t| t.length()), Some(0.));
}

#[test]
fn segment_inside_volume_pairs_integrators() {
    let mut map = uniform_map(2., 1000.);
    let half = TrackSpec::Segment { start: Vec3::new(0., 0., 0.), end: Vec3::new(0., 0., 500.) };

    let (discrete, adaptive) = both_integrators(&mut map, &half, 0.01);
    assert_approx_eq!(map.track().unwrap().length(), 500.);

    let exact = ConversionEngine::new(None).transmission_uniform(2., 500., 4.2, 0.01);
    assert!(((discrete - exact) / exact).abs() < 1e-2);
    assert!(((adaptive.probability - discrete) / discrete).abs() < 1e-2,
            "adaptive {:e}, discrete {:e}", adaptive.probability, discrete);

    // Both ends inside the volume.
    let middle = TrackSpec::Segment { start: Vec3::new(0., 0., 250.), end: Vec3::new(0., 0., 750.) };
    let (discrete, adaptive) = both_integrators(&mut map, &middle, 0.01);
    assert_approx_eq!(map.track().unwrap().length(), 500.);
    assert!(((adaptive.probability - discrete) / discrete).abs() < 1e-2);
}

#[test]
fn discrete_converges_with_step() {
    let engine = ConversionEngine::new(None);
    let map = uniform_map(2., 1000.);
    let (a, b) = axis(0., 1000.);
    let exact = engine.transmission_uniform(2., 1000., 4.2, 0.2);
    let mut last = std::f64::INFINITY;

    for &step in &[50., 10., 2., 1.] {
        let profile = map.transverse_along_path(a, b, step).unwrap();
        let err = (engine.transmission_discrete(&profile, step, 4.2, 0.2) - exact).abs();
        assert!(err <= last);
        last = err;
    }

    assert!(last / exact < 1e-3);
}

#[test]
fn gas_properties_nonnegative() {
    let density = Sampler::new(true, 1e-12, 1e-8);
    let energy = Sampler::new(false, 1., 10.);

    for _ in 0..50 {
        let rho = density.get();
        let ea = energy.get();

        for name in &["He", "Ar"] {
            let gas = BufferGas::new(name, rho).unwrap();
            assert!(gas.photon_mass(ea) > 0.);
            assert!(gas.absorption(ea) > 0.);
        }
    }
}

#[test]
fn loaded_maps_are_consistent() {
    let mut fixture = FieldFixture::new();
    fixture
        .add_field("bore", &[smooth_bore([-150., -150., 0.], [300., 300., 1500.], [10., 10., 50.], 2.)])
        .add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);

    let names = descriptor::field_names(fixture.descriptor()).unwrap();
    assert_eq!(names, vec!["bore".to_owned(), "solenoid".to_owned()]);

    let log = default_log();

    for name in &names {
        let map = FieldMap::load(fixture.descriptor(), name, &log).unwrap();
        assert!(map.num_volumes() >= 1);

        for v in map.volumes() {
            let d = v.dims();
            assert_eq!(v.nodes().len(), d[0] * d[1] * d[2]);
        }
    }

    match FieldMap::load(fixture.descriptor(), "missing", &quiet_log()) {
        Err(Error::Descriptor { .. }) => {},
        other => panic!("unexpected {:?}", other.map(|m| m.name().to_owned())),
    }
}

#[test]
fn truncated_node_file() {
    let mut fixture = FieldFixture::new();
    fixture.add_field("bore", &[smooth_bore([-150., -150., 0.], [300., 300., 1500.], [10., 10., 50.], 2.)]);

    let node_file = fixture.dir().join("bore_0.bin");
    let bytes = fs::read(&node_file).unwrap();
    fs::write(&node_file, &bytes[..bytes.len() - 24]).unwrap();

    match FieldMap::load(fixture.descriptor(), "bore", &quiet_log()) {
        Err(Error::NodeLength { expected, found, .. }) => assert_eq!(expected, found + 24),
        other => panic!("unexpected {:?}", other.map(|m| m.name().to_owned())),
    }
}


fn sweep_config(fixture: &FieldFixture, out: &std::path::Path) -> Config {
    Config {
        descriptor: fixture.descriptor(),
        output_dir: out.to_owned(),
        field_names: vec!["solenoid".to_owned()],
        masses: vec![0.01, 0.1],
        track: TrackSpec::Segment { start: Vec3::new(0., 0., -100.), end: Vec3::new(0., 0., 1100.) },
        jobs: 2,
        ..Config::default()
    }
}

#[test]
fn sweep_writes_tables() {
    let mut fixture = FieldFixture::new();
    fixture.add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);
    let out = tempfile::tempdir().unwrap();
    let config = sweep_config(&fixture, out.path());

    let written = drivers::discrete(&config, &[1., 10., 100.], &quiet_log()).unwrap();
    assert_eq!(written.len(), 3);

    let names: Vec<String> = written.iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names[0], "solenoid_discrete_mass_0.01.txt");
    assert_eq!(names[1], "solenoid_discrete_mass_0.10.txt");
    assert_eq!(names[2], "solenoid_discrete_on_resonance.txt");

    let number = r"-?[0-9.]+(e-?[0-9]+)?";
    let row = Regex::new(&format!(r"^[0-9.]+\t{n}\t{n}\t{n}$", n = number)).unwrap();
    let text = fs::read_to_string(&written[2]).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines[0].starts_with("On resonance, ma: 0.35"));
    assert_eq!(lines[1], "Step\tProbability\tError\tTime(us)");
    assert_eq!(lines.len(), 5);

    for line in &lines[2..] {
        assert!(row.is_match(line), "bad row {:?}", line);
    }

    let text = fs::read_to_string(&written[0]).unwrap();
    assert!(text.starts_with("Off resonance, ma: 0.01\n"));
}

#[test]
fn sweep_records_failures_as_nan() {
    let mut fixture = FieldFixture::new();
    fixture.add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);
    let out = tempfile::tempdir().unwrap();
    let config = Config { masses: vec![], ..sweep_config(&fixture, out.path()) };

    let tracks = vec![
        ("axis".to_owned(), config.track),
        ("miss".to_owned(), TrackSpec::Ray { start: Vec3::new(0., 0., -11000.), direction: Vec3::new(1., 0., 0.) }),
    ];

    let written = drivers::tracks(&config, &tracks, &quiet_log()).unwrap();
    assert_eq!(written.len(), 1);

    let text = fs::read_to_string(&written[0]).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "Track\tProbability\tError\tTime(ms)");
    assert!(lines[2].starts_with("axis\t"));
    assert!(!lines[2].contains("NaN"));
    assert!(lines[3].starts_with("miss\tNaN\tNaN\t"));
}

#[test]
fn bad_remesh_skips_field() {
    let mut fixture = FieldFixture::new();
    fixture.add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);
    let out = tempfile::tempdir().unwrap();
    let config = Config {
        remesh: Some(Vec3::new(7., 7., 7.)),
        ..sweep_config(&fixture, out.path())
    };

    let written = drivers::gas(&config, &quiet_log()).unwrap();
    assert!(written.is_empty());
}

#[test]
fn unknown_gas_aborts() {
    let mut fixture = FieldFixture::new();
    fixture.add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);
    let out = tempfile::tempdir().unwrap();
    let config = Config { gas: Some("Xx".to_owned()), ..sweep_config(&fixture, out.path()) };

    match drivers::field_maps(&config, &quiet_log()) {
        Err(Error::UnknownGas(_)) => {},
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn both_integrator_rows() {
    let mut fixture = FieldFixture::new();
    fixture.add_constant("solenoid", [-10., -10., 0.], [20., 20., 1000.], [0., 2., 0.]);
    let out = tempfile::tempdir().unwrap();
    let config = Config { masses: vec![], step: 1., ..sweep_config(&fixture, out.path()) };

    let written = drivers::interpolation(&config, &quiet_log()).unwrap();
    let text = fs::read_to_string(&written[0]).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "Interpolation\tProbabilityDiscrete\tTimeDiscrete(us)\t\
                          ProbabilityAdaptive\tErrorAdaptive\tTimeAdaptive(ms)");

    for line in &lines[2..4] {
        let v: Vec<f64> = line.split('\t').skip(1).map(|s| s.parse().unwrap()).collect();
        assert_eq!(v.len(), 5);
        assert!(v[0] > 0.);
        assert!((v[0] - v[2]).abs() <= 0.01 * v[0]);
    }
}
