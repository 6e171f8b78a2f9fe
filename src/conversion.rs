// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! The axion-photon conversion probability.

Along a track of length `L` through a transverse field `B⊥(s)`, in a gas
giving the photon an effective mass `mγ` and absorption `Γ`, the
probability that an axion of mass `ma` and energy `Ea` converts is

```text
P = (g/2)^2 C |∫_0^L B⊥(s) exp(iqs) exp(-Γs/2) ds|^2,    q = (mγ^2 - ma^2) / 2Ea
```

Three evaluations are offered: a closed form for a constant field, a
fixed-step sum over a sampled field profile, and adaptive oscillatory
quadrature that queries the field map's current track directly. All of
them finish with the same `PROBABILITY_PREFACTOR * |amplitude|^2` step, so
they agree to rounding on uniform fields.

*/

use num::complex::Complex64;
use slog::{Discard, Logger};

use crate::buffer_gas::BufferGas;
use crate::field_map::FieldMap;
use crate::quadrature::{IntegrationResult, IntegrationRule, IntegrationWorkspace,
                        OscillatoryTable, OscillatoryWeight};
use crate::{momentum_transfer, Error, Result, PROBABILITY_PREFACTOR};


/// A conversion probability with its error estimate. Integrators with no
/// error estimate report zero.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct Transmission {
    pub probability: f64,
    pub error: f64,
}

impl Transmission {
    /// The value recorded for a failed evaluation.
    pub const FAILED: Transmission = Transmission { probability: std::f64::NAN, error: std::f64::NAN };
}


/// Evaluates conversion probabilities in an optional buffer gas. The engine
/// holds no state between calls.
#[derive(Clone,Debug)]
pub struct ConversionEngine<'a> {
    gas: Option<&'a BufferGas>,
    logger: Logger,
}

impl<'a> ConversionEngine<'a> {
    /// `None` means vacuum.
    pub fn new(gas: Option<&'a BufferGas>) -> Self {
        ConversionEngine {
            gas: gas,
            logger: Logger::root(Discard, o!()),
        }
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.new(o!("component" => "conversion"));
        self
    }

    pub fn gas(&self) -> Option<&'a BufferGas> {
        self.gas
    }

    /// The photon effective mass (eV) at `energy_kev`.
    pub fn photon_mass(&self, energy_kev: f64) -> f64 {
        self.gas.map_or(0., |g| g.photon_mass(energy_kev))
    }

    /// The absorption coefficient Γ (mm^-1) at `energy_kev`.
    pub fn absorption(&self, energy_kev: f64) -> f64 {
        self.gas.map_or(0., |g| g.absorption(energy_kev))
    }

    /// The momentum transfer q (mm^-1).
    pub fn q(&self, energy_kev: f64, axion_mass: f64) -> f64 {
        momentum_transfer(energy_kev, axion_mass, self.photon_mass(energy_kev))
    }

    /// The probability for a constant transverse field `b` (T) over `length`
    /// mm.
    pub fn transmission_uniform(&self, b: f64, length: f64, energy_kev: f64, axion_mass: f64) -> f64 {
        let q = self.q(energy_kev, axion_mass);
        let gamma = self.absorption(energy_kev);
        let denom = q * q + 0.25 * gamma * gamma;

        let amplitude2 = if denom * length * length < 1e-6 {
            // Series for |(exp(zL) - 1) / z|^2 with z = -Γ/2 + iq.
            let zl = Complex64::new(-0.5 * gamma * length, q * length);
            let series = 1. + zl / 2. + zl * zl / 6. + zl * zl * zl / 24.;
            (series * (b * length)).norm_sqr()
        } else {
            let decay = (-0.5 * gamma * length).exp();
            b * b * (1. + decay * decay - 2. * decay * (q * length).cos()) / denom
        };

        PROBABILITY_PREFACTOR * amplitude2
    }

    /// The probability from a field profile sampled every `step` mm, as
    /// produced by `FieldMap::transverse_along_path`. Each interval
    /// contributes its mean field times the phase and attenuation at its
    /// midpoint. Profiles with fewer than two samples give zero.
    pub fn transmission_discrete(&self, profile: &[f64], step: f64, energy_kev: f64, axion_mass: f64) -> f64 {
        if profile.len() < 2 {
            return 0.;
        }

        let q = self.q(energy_kev, axion_mass);
        let gamma = self.absorption(energy_kev);
        let mut sum = Complex64::new(0., 0.);

        for (k, pair) in profile.windows(2).enumerate() {
            let s = (k as f64 + 0.5) * step;
            let b = 0.5 * (pair[0] + pair[1]);
            sum += Complex64::from_polar(b * (-0.5 * gamma * s).exp() * step, q * s);
        }

        trace!(self.logger, "discrete transmission";
               "samples" => profile.len(), "step" => step, "q" => q, "gamma" => gamma,
               "re" => sum.re, "im" => sum.im);

        PROBABILITY_PREFACTOR * sum.norm_sqr()
    }

    /// The probability along the map's current track by adaptive
    /// oscillatory quadrature. `accuracy` is the absolute tolerance on each
    /// of the real and imaginary parts of the amplitude (T mm), `workspace`
    /// the maximum number of subintervals and `levels` the bisection depth
    /// limit.
    pub fn transmission_adaptive(&self, map: &FieldMap, energy_kev: f64, axion_mass: f64,
                                 accuracy: f64, workspace: usize, levels: usize) -> Result<Transmission> {
        let track = *map.track().ok_or(Error::NoIntersection)?;
        let length = track.length();

        if !(length > 0.) {
            return Ok(Transmission { probability: 0., error: 0. });
        }

        let q = self.q(energy_kev, axion_mass);
        let gamma = self.absorption(energy_kev);

        trace!(self.logger, "beginning adaptive transmission";
               "field" => map.name(), "length" => length, "q" => q, "gamma" => gamma,
               "accuracy" => accuracy, "workspace" => workspace, "levels" => levels);

        let integrand = |u: f64| map.transverse_at_parameter(track.entry + u) * (-0.5 * gamma * u).exp();

        let mut ws = IntegrationWorkspace::new(workspace)?;
        let mut table = OscillatoryTable::new(q, length, levels, OscillatoryWeight::Cosine)?;
        let re = ws.qawo(&integrand, 0., &mut table).tolerance(accuracy, 0.).compute()?;

        table.set_weight(OscillatoryWeight::Sine)?;
        let im = ws.qawo(&integrand, 0., &mut table).tolerance(accuracy, 0.).compute()?;
        let result = combine(re.value, re.abserr, im.value, im.abserr);

        trace!(self.logger, "adaptive transmission";
               "re" => re.value, "re_err" => re.abserr, "im" => im.value, "im_err" => im.abserr,
               "probability" => result.probability, "error" => result.error);

        Ok(result)
    }

    /// The line integral `∫ B⊥ ds` (T mm) along the current track.
    pub fn field_integral(&self, map: &FieldMap, accuracy: f64, workspace: usize) -> Result<IntegrationResult> {
        let track = *map.track().ok_or(Error::NoIntersection)?;
        let mut ws = IntegrationWorkspace::new(workspace)?;

        ws.qag(|s| map.transverse_at_parameter(s), track.entry, track.exit)
            .tolerance(accuracy, 0.)
            .rule(IntegrationRule::GaussKonrod21)
            .compute()
    }
}

/// Propagate the component errors through `P ∝ re^2 + im^2`.
fn combine(re: f64, re_err: f64, im: f64, im_err: f64) -> Transmission {
    let amplitude = Complex64::new(re, im);
    let d_re = 2. * re * re_err;
    let d_im = 2. * im * im_err;

    Transmission {
        probability: PROBABILITY_PREFACTOR * amplitude.norm_sqr(),
        error: PROBABILITY_PREFACTOR * (d_re * d_re + d_im * d_im).sqrt(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3::Vec3;
    use crate::volume::Volume;
    use assert_approx_eq::assert_approx_eq;

    fn solenoid(b: f64, length: f64) -> FieldMap {
        let v = Volume::uniform(Vec3::new(-10., -10., 0.), Vec3::new(20., 20., length),
                                Vec3::new(20., 20., length), Vec3::new(0., b, 0.)).unwrap();
        FieldMap::from_volumes("solenoid", vec![v])
    }

    fn rel(a: f64, b: f64) -> f64 {
        ((a - b) / b).abs()
    }

    #[test]
    fn dc_limit() {
        let engine = ConversionEngine::new(None);
        let p = engine.transmission_uniform(2., 1000., 4.2, 0.);
        assert_eq!(p, PROBABILITY_PREFACTOR * (2000. * 2000.));

        // A tiny mass still lands on the series branch and stays close.
        let p2 = engine.transmission_uniform(2., 1000., 4.2, 1e-4);
        assert!(rel(p2, p) < 1e-9);
    }

    #[test]
    fn closed_form_matches_series_at_crossover() {
        let engine = ConversionEngine::new(None);

        // q L is just below and just above 1e-3 here.
        let a = engine.transmission_uniform(2., 1000., 4.2, 0.00127);
        let b = engine.transmission_uniform(2., 1000., 4.2, 0.00130);
        assert!(rel(a, b) < 1e-6);
    }

    #[test]
    fn discrete_converges_to_closed_form() {
        let gas = BufferGas::new("He", 2.9836e-10).unwrap();
        let engine = ConversionEngine::new(Some(&gas));
        let map = solenoid(2., 10000.);
        let ma = 0.3;
        let exact = engine.transmission_uniform(2., 10000., 4.2, ma);

        let mut last = std::f64::INFINITY;

        for &step in &[100., 10., 1.] {
            let profile = map.transverse_along_path(Vec3::new(0., 0., 0.), Vec3::new(0., 0., 10000.), step).unwrap();
            let p = engine.transmission_discrete(&profile, step, 4.2, ma);
            let err = rel(p, exact);
            assert!(err < last);
            last = err;
        }

        assert!(last < 1e-4);
    }

    #[test]
    fn short_profiles_are_zero() {
        let engine = ConversionEngine::new(None);
        assert_eq!(engine.transmission_discrete(&[], 1., 4.2, 0.), 0.);
        assert_eq!(engine.transmission_discrete(&[2.], 1., 4.2, 0.), 0.);
    }

    #[test]
    fn adaptive_matches_uniform() {
        let gas = BufferGas::new("He", 2.9836e-10).unwrap();
        let engine = ConversionEngine::new(Some(&gas));
        let mut map = solenoid(2., 10000.);
        map.set_track(Vec3::new(0., 0., -100.), Vec3::new(0., 0., 1.)).unwrap();

        for &ma in &[0., 0.25, 0.3518, 1.] {
            let exact = engine.transmission_uniform(2., 10000., 4.2, ma);
            let t = engine.transmission_adaptive(&map, 4.2, ma, 0.1, 100, 20).unwrap();
            assert!((t.probability - exact).abs() <= exact * 1e-4 + t.error, "ma {}", ma);
        }
    }

    #[test]
    fn adaptive_needs_track() {
        let engine = ConversionEngine::new(None);
        let map = solenoid(2., 1000.);

        match engine.transmission_adaptive(&map, 4.2, 0., 0.1, 100, 20) {
            Err(Error::NoIntersection) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn adaptive_reports_divergence() {
        let engine = ConversionEngine::new(None);
        let mut map = solenoid(2., 1000.);
        map.set_track(Vec3::new(0., 0., -100.), Vec3::new(0., 0., 1.)).unwrap();

        match engine.transmission_adaptive(&map, 4.2, 0.25, 0., 100, 20) {
            Err(Error::QuadratureDiverged { .. }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn field_integral_along_track() {
        let engine = ConversionEngine::new(None);
        let mut map = solenoid(2., 1000.);
        map.set_track(Vec3::new(0., 0., -100.), Vec3::new(0., 0., 1.)).unwrap();
        let r = engine.field_integral(&map, 1e-6, 50).unwrap();
        assert_approx_eq!(r.value, 2000., 1e-6);
    }

    #[test]
    fn error_propagation() {
        let t = combine(3., 0.1, 4., 0.2);
        assert_approx_eq!(t.probability, PROBABILITY_PREFACTOR * 25.);
        assert_approx_eq!(t.error / PROBABILITY_PREFACTOR, (0.36f64 + 2.56).sqrt(), 1e-12);
    }
}
