// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! The buffer gas filling the magnet bore.

A gas gives the photon an effective mass equal to the plasma frequency of
its electrons, `ħωp = 28.816 eV sqrt(ρ f1(E) / A)` for a density `ρ` in
g/cm³, atomic scattering factor `f1` and atomic mass `A`. It also absorbs
X-rays with an inverse absorption length `Γ = (μ/ρ) ρ`.

Both quantities are tabulated per gas at 1 g/cm³ as a function of the X-ray
energy. The photon mass squared and the absorption scale linearly with
density, so the photon mass itself scales as `sqrt(ρ)`. Densities passed in
to this module are in kg/mm³.

*/

use std::fmt;

use crate::{Error, Result};

/// Converts kg/mm³ into g/cm³.
const KG_PER_MM3_IN_G_PER_CM3: f64 = 1e6;


/// Tabulated refraction and opacity data for one gas.
///
/// Rows are `(energy [keV], photon mass at 1 g/cm³ [eV], absorption at 1
/// g/cm³ [mm^-1])`, sorted by energy. An absorption edge appears as two
/// rows at the same energy.
#[derive(Debug,PartialEq)]
pub struct GasTable {
    pub name: &'static str,
    pub atomic_mass: f64,
    pub rows: &'static [(f64, f64, f64)],
}

impl GasTable {
    /// Linearly interpolate `(photon mass, absorption)` at 1 g/cm³. Outside
    /// the table the endpoint values are returned.
    pub fn at_unit_density(&self, energy_kev: f64) -> (f64, f64) {
        let rows = self.rows;
        let upper = rows.partition_point(|r| r.0 <= energy_kev);

        if upper == 0 {
            return (rows[0].1, rows[0].2);
        }

        if upper == rows.len() {
            let last = rows[rows.len() - 1];
            return (last.1, last.2);
        }

        let (e0, m0, g0) = rows[upper - 1];
        let (e1, m1, g1) = rows[upper];
        let t = (energy_kev - e0) / (e1 - e0);
        (m0 + t * (m1 - m0), g0 + t * (g1 - g0))
    }
}

static HELIUM: GasTable = GasTable {
    name: "He",
    atomic_mass: 4.002602,
    rows: &[
        (1.0, 20.37446, 6.0840e+00),
        (1.5, 20.37140, 1.6760e+00),
        (2.0, 20.37038, 6.8630e-01),
        (3.0, 20.36987, 2.0070e-01),
        (4.0, 20.36936, 9.3290e-02),
        (5.0, 20.36936, 5.7660e-02),
        (6.0, 20.36936, 4.1950e-02),
        (8.0, 20.36936, 2.9330e-02),
        (10.0, 20.36936, 2.4760e-02),
        (15.0, 20.36936, 2.0920e-02),
        (20.0, 20.36936, 1.9600e-02),
    ],
};

// The K edge sits at 3.2029 keV.
static ARGON: GasTable = GasTable {
    name: "Ar",
    atomic_mass: 39.948,
    rows: &[
        (1.0, 19.08329, 3.1840e+02),
        (1.5, 19.12681, 1.0580e+02),
        (2.0, 19.10506, 4.7780e+01),
        (3.0, 18.77029, 1.5840e+01),
        (3.2029, 17.59865, 1.3190e+01),
        (3.2029, 17.59865, 1.2260e+02),
        (4.0, 18.78136, 7.0910e+01),
        (5.0, 19.08329, 3.9150e+01),
        (6.0, 19.19190, 2.3950e+01),
        (8.0, 19.27835, 1.0780e+01),
        (10.0, 19.31067, 5.7340e+00),
        (15.0, 19.33219, 1.7880e+00),
        (20.0, 19.33756, 7.7390e-01),
    ],
};

static GASES: &[&GasTable] = &[&HELIUM, &ARGON];

/// Look up the table for a gas by its chemical symbol (case-insensitive).
pub fn gas_table(name: &str) -> Option<&'static GasTable> {
    GASES.iter().cloned().find(|t| t.name.eq_ignore_ascii_case(name.trim()))
}

/// The symbols of all gases with built-in tables.
pub fn supported_gases() -> Vec<&'static str> {
    GASES.iter().map(|t| t.name).collect()
}


#[derive(Clone,Copy,PartialEq)]
struct Component {
    table: &'static GasTable,
    density: f64,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{:e}", self.table.name, self.density)
    }
}


/// A buffer gas, possibly a mixture, at fixed densities. The default value
/// is vacuum.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct BufferGas {
    components: Vec<Component>,
}

impl BufferGas {
    /// An empty bore.
    pub fn vacuum() -> Self {
        BufferGas::default()
    }

    /// A single gas at `density` kg/mm³. An empty name or a zero density
    /// gives vacuum.
    pub fn new(name: &str, density: f64) -> Result<Self> {
        let mut gas = BufferGas::vacuum();
        gas.set_density(name, density)?;
        Ok(gas)
    }

    /// Replace the contents of the bore with a single gas. On error the gas
    /// is left unchanged.
    pub fn set_density(&mut self, name: &str, density: f64) -> Result<()> {
        let component = make_component(name, density)?;
        self.components.clear();
        self.components.extend(component);
        Ok(())
    }

    /// Add a further gas to the mixture.
    pub fn add_component(&mut self, name: &str, density: f64) -> Result<()> {
        let component = make_component(name, density)?;
        self.components.extend(component);
        Ok(())
    }

    pub fn is_vacuum(&self) -> bool {
        self.components.is_empty()
    }

    /// The `(symbol, density)` pairs making up the gas.
    pub fn components(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.components.iter().map(|c| (c.table.name, c.density))
    }

    /// The photon effective mass in eV at an X-ray energy in keV.
    pub fn photon_mass(&self, energy_kev: f64) -> f64 {
        self.components.iter().map(|c| {
            let (m1, _) = c.table.at_unit_density(energy_kev);
            m1 * m1 * c.density * KG_PER_MM3_IN_G_PER_CM3
        }).sum::<f64>().sqrt()
    }

    /// The inverse absorption length in mm^-1 at an X-ray energy in keV.
    pub fn absorption(&self, energy_kev: f64) -> f64 {
        self.components.iter().map(|c| {
            let (_, gamma1) = c.table.at_unit_density(energy_kev);
            gamma1 * c.density * KG_PER_MM3_IN_G_PER_CM3
        }).sum()
    }
}

fn make_component(name: &str, density: f64) -> Result<Option<Component>> {
    if !(density >= 0.) || !density.is_finite() {
        return Err(Error::InvalidDensity(density));
    }

    if name.trim().is_empty() {
        return Ok(None);
    }

    let table = gas_table(name).ok_or_else(|| Error::UnknownGas(name.to_owned()))?;

    if density == 0. {
        return Ok(None);
    }

    Ok(Some(Component { table: table, density: density }))
}
