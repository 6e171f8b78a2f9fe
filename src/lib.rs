/*! Axion-to-photon conversion probabilities in a helioscope magnet.

This crate computes the probability that an axion crossing the bore of a
helioscope magnet (the babyIAXO geometry being the motivating case) converts
into an X-ray photon. The pieces are:

- a [`BufferGas`](buffer_gas/struct.BufferGas.html) model giving the
  photon's effective mass and absorption in the bore gas;
- a [`FieldMap`](field_map/struct.FieldMap.html) holding one or more
  rectilinear volumes of magnetic-field vectors, sampled along straight
  tracks;
- a [`ConversionEngine`](conversion/struct.ConversionEngine.html) that
  evaluates the conversion integral either by a fixed-step sum over a
  sampled profile or by adaptive oscillatory quadrature;
- the [`sweep`](sweep/index.html) and [`drivers`](drivers/index.html)
  modules, which run parameter scans and write result tables.

Lengths are in millimetres, fields in Tesla, the axion energy in keV and
masses in eV. With `B` in Tesla and `s` in mm the probability is

```text
P = (g/2)^2 |∫ B⊥(s) exp(iqs) exp(-Γs/2) ds|^2 C
```

where `C` is [`CALIBRATION`](constant.CALIBRATION.html), which converts
`T mm` to natural units.

*/

#[macro_use] extern crate slog;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod buffer_gas;
pub mod conversion;
pub mod descriptor;
pub mod drivers;
pub mod field_map;
pub mod quadrature;
pub mod sweep;
pub mod vec3;
pub mod volume;

pub use buffer_gas::BufferGas;
pub use conversion::{ConversionEngine, Transmission};
pub use field_map::{FieldMap, Track};
pub use vec3::Vec3;
pub use volume::Volume;


/// The axion-photon coupling, 1e-10 GeV^-1, expressed in eV^-1.
pub const AXION_COUPLING: f64 = 1e-19;

/// One Tesla in natural units (eV^2).
pub const TESLA_IN_EV2: f64 = 195.353;

/// One millimetre in natural units (eV^-1).
pub const MM_IN_INV_EV: f64 = 5067.731236453719;

/// Converts `(T mm)^2` into natural units.
pub const CALIBRATION: f64 = (TESLA_IN_EV2 * MM_IN_INV_EV) * (TESLA_IN_EV2 * MM_IN_INV_EV);

/// The full constant multiplying `|∫ B⊥ ... ds|^2` in the probability.
pub const PROBABILITY_PREFACTOR: f64 = (AXION_COUPLING / 2.) * (AXION_COUPLING / 2.) * CALIBRATION;


/// Everything that can go wrong in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The gas identifier is not in the built-in tables.
    #[error("unknown buffer gas \"{0}\"")]
    UnknownGas(String),

    /// Gas densities must be finite and non-negative.
    #[error("invalid gas density {0} (kg/mm^3)")]
    InvalidDensity(f64),

    /// A re-mesh request that is not an exact integer coarsening.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// Sampling steps must be finite and positive.
    #[error("invalid sampling step {0} mm")]
    InvalidStep(f64),

    /// The track misses every field volume.
    #[error("track does not intersect any field volume")]
    NoIntersection,

    /// An adaptive integration did not meet its tolerance, or GSL refused
    /// to start it.
    #[error("quadrature did not converge ({reason})")]
    QuadratureDiverged {
        reason: String,
    },

    /// The field descriptor is malformed.
    #[error("field descriptor {}: {message}", .path.display())]
    Descriptor {
        path: PathBuf,
        message: String,
    },

    /// A node file does not hold exactly one vector per node.
    #[error("node file {}: expected {expected} bytes, found {found}", .path.display())]
    NodeLength {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    /// Any I/O failure, with the path involved.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Error {
        Error::Io { path: path.as_ref().to_owned(), source: source }
    }

    pub(crate) fn descriptor<P: AsRef<Path>, S: Into<String>>(path: P, message: S) -> Error {
        Error::Descriptor { path: path.as_ref().to_owned(), message: message.into() }
    }

    /// Whether this failure should be recorded as a NaN row and the sweep
    /// continued, rather than aborting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NoIntersection | Error::QuadratureDiverged { .. } => true,
            _ => false,
        }
    }
}

/// The crate's result type.
pub type Result<T> = std::result::Result<T, Error>;


/// The momentum transfer `q = (mγ^2 - ma^2) / 2Ea` in mm^-1, for masses in
/// eV and the axion energy in keV.
pub fn momentum_transfer(energy_kev: f64, axion_mass: f64, photon_mass: f64) -> f64 {
    let q_ev = (photon_mass * photon_mass - axion_mass * axion_mass) / (2. * energy_kev * 1000.);
    q_ev * MM_IN_INV_EV
}
