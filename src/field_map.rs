// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! A magnetic field map built from one or more rectilinear volumes.

Point queries go to the first volume, in load order, that contains the
point; points in no volume see zero field. Lines are clipped against the
union of the volumes by taking the hull of the per-volume intervals, so any
gap between volumes along a line samples as zero field.

The map also carries an optional "current track", a straight line through
the volumes with its entry and exit parameters. The adaptive integrator
evaluates the field through it. Setting a new track replaces the old one.

*/

use slog::Logger;
use std::path::Path;

use crate::descriptor::FieldDescriptor;
use crate::vec3::Vec3;
use crate::volume::Volume;
use crate::{Error, Result};


/// A straight track through the field map. Points are `origin + s
/// direction` with `direction` a unit vector and `s` in mm; the track
/// crosses the volumes for `entry <= s <= exit`.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct Track {
    pub origin: Vec3,
    pub direction: Vec3,
    pub entry: f64,
    pub exit: f64,
}

impl Track {
    pub fn length(&self) -> f64 {
        self.exit - self.entry
    }

    pub fn point(&self, s: f64) -> Vec3 {
        self.origin + s * self.direction
    }
}


#[derive(Clone,Debug)]
pub struct FieldMap {
    name: String,
    volumes: Vec<Volume>,
    interpolate: bool,
    track: Option<Track>,
}

impl FieldMap {
    /// Load the field map called `name` from the descriptor at `path`.
    pub fn load<P: AsRef<Path>>(path: P, name: &str, logger: &Logger) -> Result<Self> {
        let desc = FieldDescriptor::from_file(path)?;
        FieldMap::from_descriptor(&desc, name, logger)
    }

    pub fn from_descriptor(desc: &FieldDescriptor, name: &str, logger: &Logger) -> Result<Self> {
        let specs = desc.volumes(name)?;
        let mut volumes = Vec::with_capacity(specs.len());

        for spec in specs {
            let v = spec.load()?;
            debug!(logger, "loaded field volume";
                   "field" => name,
                   "origin" => ?v.origin(),
                   "extents" => ?v.extents(),
                   "dims" => ?v.dims());
            volumes.push(v);
        }

        info!(logger, "loaded field map"; "field" => name, "volumes" => volumes.len(),
              "descriptor" => %desc.path().display());

        Ok(FieldMap::from_volumes(name, volumes))
    }

    /// Assemble a map directly from volumes. Interpolation starts off.
    pub fn from_volumes(name: &str, volumes: Vec<Volume>) -> Self {
        FieldMap {
            name: name.to_owned(),
            volumes: volumes,
            interpolate: false,
            track: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_volumes(&self) -> usize {
        self.volumes.len()
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn volume(&self, index: usize) -> Option<&Volume> {
        self.volumes.get(index)
    }

    /// Turn trilinear interpolation on or off for every point query.
    pub fn set_interpolation(&mut self, on: bool) {
        self.interpolate = on;
    }

    pub fn interpolation(&self) -> bool {
        self.interpolate
    }

    /// Coarsen one volume's grid; see `Volume::remap`.
    pub fn remap(&mut self, index: usize, new_mesh: Vec3) -> Result<()> {
        let n = self.volumes.len();
        let v = self.volumes.get_mut(index).ok_or_else(|| Error::InvalidMesh(format!(
            "no volume {} (map has {})", index, n
        )))?;
        v.remap(new_mesh)
    }

    /// Coarsen every volume to the same step. Stops at the first failure,
    /// leaving earlier volumes remapped.
    pub fn remap_all(&mut self, new_mesh: Vec3) -> Result<()> {
        for i in 0..self.volumes.len() {
            self.remap(i, new_mesh)?;
        }

        Ok(())
    }

    /// The field at `p`, zero outside every volume.
    pub fn field_at(&self, p: Vec3) -> Vec3 {
        for v in &self.volumes {
            if let Some(b) = v.field_at(p, self.interpolate) {
                return b;
            }
        }

        Vec3::ZERO
    }

    /// Clip the line `start + s direction`, restricted to `s_min <= s <=
    /// s_max`, against the union of the volumes.
    fn clip(&self, start: Vec3, direction: Vec3, s_min: f64, s_max: f64) -> Option<(f64, f64)> {
        let mut hull: Option<(f64, f64)> = None;

        for v in &self.volumes {
            if let Some((a, b)) = v.clip(start, direction) {
                let a = a.max(s_min);
                let b = b.min(s_max);

                if a > b {
                    continue;
                }

                hull = Some(match hull {
                    None => (a, b),
                    Some((ha, hb)) => (ha.min(a), hb.max(b)),
                });
            }
        }

        hull
    }

    /// Sample `|B⊥|` along the segment from `a` to `b`, where it crosses
    /// the volumes, every `step` mm. The first sample is at the entry point
    /// and the last is forced onto the exit point, so the final interval
    /// may be shorter than `step`. A segment that misses every volume gives
    /// an empty profile.
    pub fn transverse_along_path(&self, a: Vec3, b: Vec3, step: f64) -> Result<Vec<f64>> {
        if !(step > 0.) || !step.is_finite() {
            return Err(Error::InvalidStep(step));
        }

        let length = (b - a).norm();
        let direction = match (b - a).normalize() {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };

        let (entry, exit) = match self.clip(a, direction, 0., length) {
            Some(bounds) => bounds,
            None => return Ok(Vec::new()),
        };

        Ok(self.sample_line(a, direction, entry, exit, step))
    }

    fn sample_line(&self, origin: Vec3, direction: Vec3, entry: f64, exit: f64, step: f64) -> Vec<f64> {
        let n_full = ((exit - entry) / step).floor().max(0.) as usize;
        let mut profile = Vec::with_capacity(n_full + 2);
        let slack = 1e-9 * step;

        for k in 0_usize.. {
            let s = entry + k as f64 * step;

            if s >= exit - slack {
                break;
            }

            profile.push(self.field_at(origin + s * direction).transverse_to(direction));
        }

        profile.push(self.field_at(origin + exit * direction).transverse_to(direction));
        profile
    }

    /// Make the line through `start` along `direction` the current track.
    /// The direction need not be normalized. Fails with `NoIntersection`
    /// if the line misses every volume, in which case there is no current
    /// track afterwards.
    pub fn set_track(&mut self, start: Vec3, direction: Vec3) -> Result<Track> {
        self.track = None;
        let direction = direction.normalize().ok_or(Error::NoIntersection)?;
        self.install_track(start, direction, std::f64::NEG_INFINITY, std::f64::INFINITY)
    }

    /// Make the segment from `a` to `b` the current track. Only the part
    /// between the endpoints counts, so the track covers exactly what
    /// `transverse_along_path(a, b, ..)` samples.
    pub fn set_track_between(&mut self, a: Vec3, b: Vec3) -> Result<Track> {
        self.track = None;
        let length = (b - a).norm();
        let direction = (b - a).normalize().ok_or(Error::NoIntersection)?;
        self.install_track(a, direction, 0., length)
    }

    fn install_track(&mut self, origin: Vec3, direction: Vec3, s_min: f64, s_max: f64) -> Result<Track> {
        let (entry, exit) = self.clip(origin, direction, s_min, s_max).ok_or(Error::NoIntersection)?;

        let track = Track { origin: origin, direction: direction, entry: entry, exit: exit };
        self.track = Some(track);
        Ok(track)
    }

    pub fn clear_track(&mut self) {
        self.track = None;
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// `(entry, exit)` of the current track.
    pub fn track_bounds(&self) -> Option<(f64, f64)> {
        self.track.map(|t| (t.entry, t.exit))
    }

    /// `|B⊥|` at parameter `s` on the current track. `s` is clamped into
    /// the track bounds; without a track the result is zero.
    pub fn transverse_at_parameter(&self, s: f64) -> f64 {
        match self.track {
            None => 0.,
            Some(ref t) => {
                let s = s.max(t.entry).min(t.exit);
                self.field_at(t.point(s)).transverse_to(t.direction)
            },
        }
    }

    /// Sample the current track every `step` mm, as `transverse_along_path`
    /// does. Fails with `NoIntersection` when there is no current track.
    pub fn track_profile(&self, step: f64) -> Result<Vec<f64>> {
        if !(step > 0.) || !step.is_finite() {
            return Err(Error::InvalidStep(step));
        }

        let t = self.track.ok_or(Error::NoIntersection)?;
        Ok(self.sample_line(t.origin, t.direction, t.entry, t.exit, step))
    }
}
