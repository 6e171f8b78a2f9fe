// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! A single rectilinear box of magnetic-field vectors.

The box spans `origin` to `origin + extents`. It is cut into `Nx × Ny × Nz`
cells of size `mesh`, and one field vector is stored per cell, at the
cell centre: node `(i, j, k)` sits at `origin + ((i+½)dx, (j+½)dy,
(k+½)dz)` and is stored at index `i + Nx (j + Ny k)`.

*/

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::vec3::Vec3;
use crate::{Error, Result};

/// Bytes per stored node: three little-endian `f64`s.
pub const NODE_BYTES: usize = 24;


#[derive(Clone,Debug,PartialEq)]
pub struct Volume {
    origin: Vec3,
    extents: Vec3,
    mesh: Vec3,
    dims: [usize; 3],
    nodes: Vec<Vec3>,
}

fn axis_tolerance(extent: f64) -> f64 {
    1e-9 * (1. + extent.abs())
}

/// Number of cells along one axis, if `mesh` divides `extent` exactly.
fn cells_along(extent: f64, mesh: f64) -> Option<usize> {
    if !(extent > 0.) || !(mesh > 0.) || !extent.is_finite() || !mesh.is_finite() {
        return None;
    }

    let n = (extent / mesh).round();

    if n < 1. || n >= std::usize::MAX as f64 || (n * mesh - extent).abs() > axis_tolerance(extent) {
        return None;
    }

    Some(n as usize)
}

/// The node count of a grid, if it fits in memory addressing at all.
pub fn node_count(dims: [usize; 3]) -> std::result::Result<usize, String> {
    dims[0].checked_mul(dims[1])
        .and_then(|n| n.checked_mul(dims[2]))
        .filter(|n| n.checked_mul(NODE_BYTES).is_some())
        .ok_or_else(|| format!("a {}x{}x{} grid is too large", dims[0], dims[1], dims[2]))
}

/// The grid dimensions implied by `extents` and `mesh`, or an explanation
/// of why they are inconsistent.
pub fn grid_dims(extents: Vec3, mesh: Vec3) -> std::result::Result<[usize; 3], String> {
    let mut dims = [0; 3];

    for axis in 0..3 {
        dims[axis] = cells_along(extents.axis(axis), mesh.axis(axis)).ok_or_else(|| format!(
            "mesh step {} does not divide extent {} along axis {}",
            mesh.axis(axis), extents.axis(axis), axis
        ))?;
    }

    Ok(dims)
}

impl Volume {
    /// Build a volume from its node array, which must hold exactly one
    /// vector per cell.
    pub fn new(origin: Vec3, extents: Vec3, mesh: Vec3, nodes: Vec<Vec3>) -> Result<Self> {
        let dims = grid_dims(extents, mesh).map_err(Error::InvalidMesh)?;
        let expected = node_count(dims).map_err(Error::InvalidMesh)?;

        if nodes.len() != expected {
            return Err(Error::InvalidMesh(format!(
                "{} nodes supplied for a {}x{}x{} grid", nodes.len(), dims[0], dims[1], dims[2]
            )));
        }

        Ok(Volume { origin: origin, extents: extents, mesh: mesh, dims: dims, nodes: nodes })
    }

    /// A volume with the same field everywhere.
    pub fn uniform(origin: Vec3, extents: Vec3, mesh: Vec3, field: Vec3) -> Result<Self> {
        Volume::from_fn(origin, extents, mesh, |_| field)
    }

    /// A volume whose node values are given by evaluating `field` at each
    /// node position.
    pub fn from_fn<F>(origin: Vec3, extents: Vec3, mesh: Vec3, mut field: F) -> Result<Self>
        where F: FnMut(Vec3) -> Vec3
    {
        let dims = grid_dims(extents, mesh).map_err(Error::InvalidMesh)?;
        let mut nodes = Vec::with_capacity(node_count(dims).map_err(Error::InvalidMesh)?);

        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = origin + Vec3::new(
                        (i as f64 + 0.5) * mesh.x,
                        (j as f64 + 0.5) * mesh.y,
                        (k as f64 + 0.5) * mesh.z,
                    );
                    nodes.push(field(p));
                }
            }
        }

        Ok(Volume { origin: origin, extents: extents, mesh: mesh, dims: dims, nodes: nodes })
    }

    /// Load the node array from a binary node file.
    pub fn read_nodes<P: AsRef<Path>>(path: P, origin: Vec3, extents: Vec3, mesh: Vec3) -> Result<Self> {
        let path = path.as_ref();
        let dims = grid_dims(extents, mesh).map_err(|m| Error::descriptor(path, m))?;
        let n_nodes = node_count(dims).map_err(|m| Error::descriptor(path, m))?;

        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        let expected = (n_nodes * NODE_BYTES) as u64;

        if bytes.len() as u64 != expected {
            return Err(Error::NodeLength {
                path: path.to_owned(),
                expected: expected,
                found: bytes.len() as u64,
            });
        }

        let nodes = bytes.chunks_exact(NODE_BYTES).map(|node| {
            let mut c = [0_f64; 3];

            for (i, word) in node.chunks_exact(8).enumerate() {
                let mut buf = [0_u8; 8];
                buf.copy_from_slice(word);
                c[i] = f64::from_le_bytes(buf);
            }

            Vec3::from(c)
        }).collect();

        Ok(Volume { origin: origin, extents: extents, mesh: mesh, dims: dims, nodes: nodes })
    }

    /// Write the node array in the binary node-file layout.
    pub fn write_nodes<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        let mut w = BufWriter::new(file);

        for node in &self.nodes {
            for c in &node.to_array() {
                w.write_all(&c.to_le_bytes()).map_err(|e| Error::io(path, e))?;
            }
        }

        w.flush().map_err(|e| Error::io(path, e))
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn extents(&self) -> Vec3 {
        self.extents
    }

    pub fn mesh(&self) -> Vec3 {
        self.mesh
    }

    /// `[Nx, Ny, Nz]`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn nodes(&self) -> &[Vec3] {
        &self.nodes
    }

    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    pub fn node_position(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin + Vec3::new(
            (i as f64 + 0.5) * self.mesh.x,
            (j as f64 + 0.5) * self.mesh.y,
            (k as f64 + 0.5) * self.mesh.z,
        )
    }

    /// Whether `p` lies inside the box. Points on a face count as inside.
    pub fn contains(&self, p: Vec3) -> bool {
        (0..3).all(|axis| {
            let lo = self.origin.axis(axis);
            let ext = self.extents.axis(axis);
            let tol = axis_tolerance(ext);
            let x = p.axis(axis);
            x >= lo - tol && x <= lo + ext + tol
        })
    }

    /// The field at `p`, or `None` if `p` is outside the box.
    pub fn field_at(&self, p: Vec3, interpolate: bool) -> Option<Vec3> {
        if !self.contains(p) {
            return None;
        }

        Some(if interpolate { self.trilinear(p) } else { self.nearest(p) })
    }

    /// The value of the cell containing `p`. Points on upper faces map to
    /// the last cell.
    fn nearest(&self, p: Vec3) -> Vec3 {
        let mut idx = [0; 3];

        for axis in 0..3 {
            let u = (p.axis(axis) - self.origin.axis(axis)) / self.mesh.axis(axis);
            let n = self.dims[axis];
            idx[axis] = if u <= 0. { 0 } else { (u.floor() as usize).min(n - 1) };
        }

        self.nodes[self.index(idx[0], idx[1], idx[2])]
    }

    fn node_or_zero(&self, i: isize, j: isize, k: isize) -> Vec3 {
        if i < 0 || j < 0 || k < 0 {
            return Vec3::ZERO;
        }

        let (i, j, k) = (i as usize, j as usize, k as usize);

        if i >= self.dims[0] || j >= self.dims[1] || k >= self.dims[2] {
            return Vec3::ZERO;
        }

        self.nodes[self.index(i, j, k)]
    }

    /// Trilinear interpolation between the eight nodes around `p`. Nodes
    /// past the edge of the grid count as zero field.
    fn trilinear(&self, p: Vec3) -> Vec3 {
        let mut base = [0_isize; 3];
        let mut frac = [0_f64; 3];

        for axis in 0..3 {
            let u = (p.axis(axis) - self.origin.axis(axis)) / self.mesh.axis(axis) - 0.5;
            let f = u.floor();
            base[axis] = f as isize;
            frac[axis] = u - f;
        }

        let mut b = Vec3::ZERO;

        for corner in 0..8 {
            let di = (corner & 1) as isize;
            let dj = ((corner >> 1) & 1) as isize;
            let dk = ((corner >> 2) & 1) as isize;

            let w = (if di == 1 { frac[0] } else { 1. - frac[0] })
                * (if dj == 1 { frac[1] } else { 1. - frac[1] })
                * (if dk == 1 { frac[2] } else { 1. - frac[2] });

            if w != 0. {
                b += w * self.node_or_zero(base[0] + di, base[1] + dj, base[2] + dk);
            }
        }

        b
    }

    /// Intersect the infinite line `start + s d` with the box. Returns the
    /// parameter interval `(s_in, s_out)`, or `None` if the line misses.
    pub fn clip(&self, start: Vec3, direction: Vec3) -> Option<(f64, f64)> {
        let mut s_in = std::f64::NEG_INFINITY;
        let mut s_out = std::f64::INFINITY;

        for axis in 0..3 {
            let lo = self.origin.axis(axis);
            let hi = lo + self.extents.axis(axis);
            let tol = axis_tolerance(self.extents.axis(axis));
            let p = start.axis(axis);
            let d = direction.axis(axis);

            if d == 0. {
                if p < lo - tol || p > hi + tol {
                    return None;
                }

                continue;
            }

            let t1 = (lo - p) / d;
            let t2 = (hi - p) / d;
            s_in = s_in.max(t1.min(t2));
            s_out = s_out.min(t1.max(t2));
        }

        if s_in > s_out {
            None
        } else {
            Some((s_in, s_out))
        }
    }

    /// The volume integral of the field, `Σ B dx dy dz`, in T mm³.
    pub fn field_integral(&self) -> Vec3 {
        let cell = self.mesh.x * self.mesh.y * self.mesh.z;
        let mut total = Vec3::ZERO;

        for node in &self.nodes {
            total += *node;
        }

        total * cell
    }

    /// Coarsen the grid to `new_mesh` by averaging blocks of nodes. Each
    /// new step must be an integer multiple of the old one and must divide
    /// the extents; otherwise nothing changes and `InvalidMesh` is returned.
    pub fn remap(&mut self, new_mesh: Vec3) -> Result<()> {
        let mut ratio = [1_usize; 3];

        for axis in 0..3 {
            let old = self.mesh.axis(axis);
            let new = new_mesh.axis(axis);
            let r = new / old;
            let r_int = r.round();

            if !r.is_finite() || r_int < 1. || (r - r_int).abs() > 1e-9 * r_int {
                return Err(Error::InvalidMesh(format!(
                    "step {} along axis {} is not an integer multiple of {}", new, axis, old
                )));
            }

            ratio[axis] = r_int as usize;

            if self.dims[axis] % ratio[axis] != 0 {
                return Err(Error::InvalidMesh(format!(
                    "step {} along axis {} does not divide extent {}", new, axis, self.extents.axis(axis)
                )));
            }
        }

        if ratio == [1, 1, 1] {
            return Ok(());
        }

        let new_dims = [
            self.dims[0] / ratio[0],
            self.dims[1] / ratio[1],
            self.dims[2] / ratio[2],
        ];
        let block = (ratio[0] * ratio[1] * ratio[2]) as f64;
        let mut nodes = vec![Vec3::ZERO; new_dims[0] * new_dims[1] * new_dims[2]];

        for k in 0..self.dims[2] {
            for j in 0..self.dims[1] {
                for i in 0..self.dims[0] {
                    let target = i / ratio[0] + new_dims[0] * (j / ratio[1] + new_dims[1] * (k / ratio[2]));
                    nodes[target] += self.nodes[self.index(i, j, k)];
                }
            }
        }

        for node in &mut nodes {
            *node = *node / block;
        }

        self.mesh = Vec3::new(
            self.mesh.x * ratio[0] as f64,
            self.mesh.y * ratio[1] as f64,
            self.mesh.z * ratio[2] as f64,
        );
        self.dims = new_dims;
        self.nodes = nodes;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn ramp() -> Volume {
        Volume::from_fn(
            Vec3::new(-10., -10., 0.),
            Vec3::new(20., 20., 100.),
            Vec3::new(10., 10., 10.),
            |p| Vec3::new(0., p.z, 0.),
        ).unwrap()
    }

    #[test]
    fn layout() {
        let v = ramp();
        assert_eq!(v.dims(), [2, 2, 10]);
        assert_eq!(v.nodes().len(), 40);
        assert_eq!(v.index(1, 1, 1), 7);
        assert_eq!(v.node_position(0, 0, 3), Vec3::new(-5., -5., 35.));
        assert_eq!(v.nodes()[v.index(1, 0, 3)], Vec3::new(0., 35., 0.));
    }

    #[test]
    fn mesh_must_divide() {
        let r = Volume::uniform(Vec3::ZERO, Vec3::new(10., 10., 10.), Vec3::new(3., 5., 5.), Vec3::ZERO);
        assert!(r.is_err());
    }

    #[test]
    fn faces_are_inside() {
        let v = ramp();
        assert!(v.contains(Vec3::new(10., -10., 100.)));
        assert!(!v.contains(Vec3::new(10.1, 0., 50.)));
        assert!(v.field_at(Vec3::new(0., 0., 100.), false).is_some());
        assert!(v.field_at(Vec3::new(0., 0., -1.), false).is_none());
    }

    #[test]
    fn nearest_and_trilinear() {
        let v = ramp();
        let p = Vec3::new(0., 0., 40.);
        assert_eq!(v.field_at(p, false).unwrap().y, 45.);
        assert_approx_eq!(v.field_at(p, true).unwrap().y, 40., 1e-12);

        // Upper face: the last cell.
        assert_eq!(v.field_at(Vec3::new(0., 0., 100.), false).unwrap().y, 95.);

        // Past the last node centre the missing neighbour counts as zero.
        assert_approx_eq!(v.field_at(Vec3::new(0., 0., 100.), true).unwrap().y, 0.5 * 95., 1e-12);
    }

    #[test]
    fn clip_line() {
        let v = ramp();
        let (a, b) = v.clip(Vec3::new(0., 0., -50.), Vec3::new(0., 0., 1.)).unwrap();
        assert_approx_eq!(a, 50.);
        assert_approx_eq!(b, 150.);
        assert!(v.clip(Vec3::new(0., 0., -11000.), Vec3::new(1., 0., 0.)).is_none());

        // Grazing along a face still intersects.
        assert!(v.clip(Vec3::new(10., 0., -50.), Vec3::new(0., 0., 1.)).is_some());
    }

    #[test]
    fn remap_averages_blocks() {
        let mut v = ramp();
        let before = v.field_integral();
        v.remap(Vec3::new(20., 20., 50.)).unwrap();
        assert_eq!(v.dims(), [1, 1, 2]);
        assert_approx_eq!(v.nodes()[0].y, 25., 1e-12);
        assert_approx_eq!(v.nodes()[1].y, 75., 1e-12);
        assert_approx_eq!(v.field_integral().y, before.y, 1e-9 * before.y.abs());
    }

    #[test]
    fn oversized_grids_are_rejected() {
        assert!(grid_dims(Vec3::new(1e300, 1., 1.), Vec3::new(1e-300, 1., 1.)).is_err());

        // Each axis fits, the node count does not.
        let huge = Vec3::new(1e7, 1e7, 1e7);
        let unit = Vec3::new(1., 1., 1.);
        assert_eq!(grid_dims(huge, unit), Ok([10_000_000; 3]));
        assert!(node_count([10_000_000; 3]).is_err());
        assert_eq!(node_count([2, 3, 4]), Ok(24));

        match Volume::new(Vec3::ZERO, huge, unit, Vec::new()) {
            Err(Error::InvalidMesh(_)) => {},
            other => panic!("unexpected {:?}", other),
        }

        match Volume::from_fn(Vec3::ZERO, huge, unit, |_| Vec3::ZERO) {
            Err(Error::InvalidMesh(_)) => {},
            other => panic!("unexpected {:?}", other),
        }

        match Volume::read_nodes("no-such-file.bin", Vec3::ZERO, huge, unit) {
            Err(Error::Descriptor { .. }) => {},
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn remap_rejects_bad_steps() {
        let mut v = ramp();
        let orig = v.clone();
        assert!(v.remap(Vec3::new(15., 10., 10.)).is_err());
        assert!(v.remap(Vec3::new(10., 10., 30.)).is_err());
        assert!(v.remap(Vec3::new(5., 10., 10.)).is_err());
        assert_eq!(v, orig);

        v.remap(Vec3::new(10., 10., 10.)).unwrap();
        assert_eq!(v, orig);
    }

    #[test]
    fn node_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.bin");
        let v = ramp();
        v.write_nodes(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 40 * 24);

        let w = Volume::read_nodes(&path, v.origin(), v.extents(), v.mesh()).unwrap();
        assert_eq!(v, w);

        match Volume::read_nodes(&path, v.origin(), v.extents(), Vec3::new(10., 10., 5.)) {
            Err(Error::NodeLength { expected, found, .. }) => {
                assert_eq!(expected, 80 * 24);
                assert_eq!(found, 40 * 24);
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
