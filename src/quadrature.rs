// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! Thin builders over the GSL integration routines.

Two integrators are used by the transmission code: `qag`, globally adaptive
Gauss-Kronrod integration over a finite interval, and `qawo`, adaptive
integration of `f(x) cos(ωx)` or `f(x) sin(ωx)` against a table of
Chebyshev moments. Both hand the actual work to GSL; a nonzero GSL status
comes back as `Error::QuadratureDiverged`.

*/

use rgsl::{GaussKronrodRule, IntegrationQawo, IntegrationQawoTable, Value};
use std::f64;
use std::sync::Once;

use crate::{Error, Result};


static GSL_HANDLER: Once = Once::new();

/// GSL aborts the process on errors by default. We want status codes.
fn quiet_gsl() {
    GSL_HANDLER.call_once(|| {
        rgsl::error::set_error_handler_off();
    });
}

fn failure(what: &str, status: Value) -> Error {
    Error::QuadratureDiverged {
        reason: format!("{}: GSL status {:?}", what, status),
    }
}


/// Storage for the subintervals of an adaptive integration.
pub struct IntegrationWorkspace {
    handle: rgsl::IntegrationWorkspace,
    limit: usize,
}

impl IntegrationWorkspace {
    /// Allocate room for `limit` subintervals.
    pub fn new(limit: usize) -> Result<Self> {
        quiet_gsl();

        match rgsl::IntegrationWorkspace::new(limit) {
            Some(handle) => Ok(IntegrationWorkspace { handle: handle, limit: limit }),
            None => Err(Error::QuadratureDiverged {
                reason: format!("cannot allocate a workspace of {} intervals", limit),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn qag<'a, F>(&'a mut self, f: F, lower_bound: f64, upper_bound: f64) -> IntegrationBuilder<'a, F>
        where F: Fn(f64) -> f64
    {
        IntegrationBuilder::new(self, f, lower_bound, upper_bound)
    }

    pub fn qawo<'a, 'b, F>(&'a mut self, f: F, lower_bound: f64, table: &'b mut OscillatoryTable)
                           -> OscillatoryBuilder<'a, 'b, F>
        where F: Fn(f64) -> f64
    {
        OscillatoryBuilder::new(self, f, lower_bound, table)
    }
}


#[derive(Clone,Copy,Debug,PartialEq)]
pub struct IntegrationResult {
    pub value: f64,
    pub abserr: f64
}


#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum IntegrationRule {
    GaussKonrod15,
    GaussKonrod21,
    GaussKonrod31,
    GaussKonrod41,
    GaussKonrod51,
    GaussKonrod61,
}

impl IntegrationRule {
    fn key(self) -> GaussKronrodRule {
        match self {
            IntegrationRule::GaussKonrod15 => GaussKronrodRule::Gauss15,
            IntegrationRule::GaussKonrod21 => GaussKronrodRule::Gauss21,
            IntegrationRule::GaussKonrod31 => GaussKronrodRule::Gauss31,
            IntegrationRule::GaussKonrod41 => GaussKronrodRule::Gauss41,
            IntegrationRule::GaussKonrod51 => GaussKronrodRule::Gauss51,
            IntegrationRule::GaussKonrod61 => GaussKronrodRule::Gauss61,
        }
    }
}


pub struct IntegrationBuilder<'a, F> where F: Fn(f64) -> f64 {
    workspace: &'a mut IntegrationWorkspace,
    function: F,
    rule: IntegrationRule,
    lower_bound: f64,
    upper_bound: f64,
    epsabs: f64,
    epsrel: f64,
}

impl<'a, F> IntegrationBuilder<'a, F> where F: Fn(f64) -> f64 {
    fn new(ws: &'a mut IntegrationWorkspace, f: F, lower: f64, upper: f64) -> Self {
        IntegrationBuilder {
            workspace: ws,
            function: f,
            rule: IntegrationRule::GaussKonrod31,
            lower_bound: lower,
            upper_bound: upper,
            epsabs: f64::NAN,
            epsrel: f64::NAN,
        }
    }

    pub fn tolerance(mut self, epsabs: f64, epsrel: f64) -> Self {
        self.epsabs = epsabs;
        self.epsrel = epsrel;
        self
    }

    pub fn rule(mut self, rule: IntegrationRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn compute(mut self) -> Result<IntegrationResult> {
        let limit = self.workspace.limit;

        let (value, abserr) = self.workspace.handle
            .qag(self.function, self.lower_bound, self.upper_bound,
                 self.epsabs, self.epsrel, limit, self.rule.key())
            .map_err(|status| failure("qag", status))?;

        Ok(IntegrationResult { value: value, abserr: abserr })
    }
}


/// Which trigonometric weight multiplies the integrand.
#[derive(Clone,Copy,Debug,Eq,PartialEq)]
pub enum OscillatoryWeight {
    Cosine,
    Sine,
}

impl OscillatoryWeight {
    fn kind(self) -> IntegrationQawo {
        match self {
            OscillatoryWeight::Cosine => IntegrationQawo::Cosine,
            OscillatoryWeight::Sine => IntegrationQawo::Sine,
        }
    }
}


/// The precomputed Chebyshev moments of `cos(ωx)` or `sin(ωx)` over an
/// interval of fixed length, for `levels` levels of bisection.
pub struct OscillatoryTable {
    handle: IntegrationQawoTable,
    omega: f64,
    length: f64,
}

impl OscillatoryTable {
    pub fn new(omega: f64, length: f64, levels: usize, weight: OscillatoryWeight) -> Result<Self> {
        quiet_gsl();

        match IntegrationQawoTable::new(omega, length, weight.kind(), levels) {
            Some(handle) => Ok(OscillatoryTable { handle: handle, omega: omega, length: length }),
            None => Err(Error::QuadratureDiverged {
                reason: format!("cannot allocate an oscillatory table of {} levels", levels),
            }),
        }
    }

    /// Switch between the cosine and sine weights, keeping ω and the length.
    pub fn set_weight(&mut self, weight: OscillatoryWeight) -> Result<()> {
        self.handle.set(self.omega, self.length, weight.kind())
            .map_err(|status| failure("qawo table", status))
    }
}


/// Integrates over `[a, a + L]`, `L` being the table's length.
pub struct OscillatoryBuilder<'a, 'b, F> where F: Fn(f64) -> f64 {
    workspace: &'a mut IntegrationWorkspace,
    table: &'b mut OscillatoryTable,
    function: F,
    lower_bound: f64,
    epsabs: f64,
    epsrel: f64,
}

impl<'a, 'b, F> OscillatoryBuilder<'a, 'b, F> where F: Fn(f64) -> f64 {
    fn new(ws: &'a mut IntegrationWorkspace, f: F, lower: f64, table: &'b mut OscillatoryTable) -> Self {
        OscillatoryBuilder {
            workspace: ws,
            table: table,
            function: f,
            lower_bound: lower,
            epsabs: f64::NAN,
            epsrel: f64::NAN,
        }
    }

    pub fn tolerance(mut self, epsabs: f64, epsrel: f64) -> Self {
        self.epsabs = epsabs;
        self.epsrel = epsrel;
        self
    }

    pub fn compute(mut self) -> Result<IntegrationResult> {
        let limit = self.workspace.limit;

        let (value, abserr) = self.table.handle
            .qawo(self.function, self.lower_bound, self.epsabs, self.epsrel,
                  limit, &mut self.workspace.handle)
            .map_err(|status| failure("qawo", status))?;

        Ok(IntegrationResult { value: value, abserr: abserr })
    }
}
