// Copyright 2017-2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the GPL version 3.

/*! The field descriptor: a YAML file naming field maps and their volumes.

```yaml
babyIAXO:
  volumes:
    - origin: [-350, -350, -5000]
      extents: [700, 700, 10000]
      mesh: [10, 10, 50]
      file: babyIAXO.bin
uniform:
  volumes:
    - origin: [-350, -350, -5000]
      extents: [700, 700, 10000]
      mesh: [700, 700, 10000]
      field: [0, 2.0, 0]
```

Node-file paths are relative to the directory holding the descriptor.

*/

use std::fs;
use std::path::{Path, PathBuf};
use yaml_rust::{Yaml, YamlLoader};

use crate::vec3::Vec3;
use crate::volume::{self, Volume};
use crate::{Error, Result};


/// Where a volume's node values come from.
#[derive(Clone,Debug,PartialEq)]
pub enum NodeSource {
    /// A binary node file.
    File(PathBuf),

    /// The same vector at every node.
    Constant(Vec3),
}

/// One volume entry of a named field map.
#[derive(Clone,Debug,PartialEq)]
pub struct VolumeSpec {
    pub origin: Vec3,
    pub extents: Vec3,
    pub mesh: Vec3,
    pub source: NodeSource,
}

impl VolumeSpec {
    /// Materialize the volume, reading its node file if it has one.
    pub fn load(&self) -> Result<Volume> {
        match self.source {
            NodeSource::File(ref path) => Volume::read_nodes(path, self.origin, self.extents, self.mesh),
            NodeSource::Constant(b) => Volume::uniform(self.origin, self.extents, self.mesh, b),
        }
    }
}


/// A parsed descriptor file.
#[derive(Clone,Debug,PartialEq)]
pub struct FieldDescriptor {
    path: PathBuf,
    fields: Vec<(String, Vec<VolumeSpec>)>,
}

impl FieldDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        FieldDescriptor::parse(&text, path)
    }

    /// Parse descriptor text. `path` is used to resolve node files and in
    /// error messages; it need not exist.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let docs = YamlLoader::load_from_str(text)
            .map_err(|e| Error::descriptor(path, format!("YAML trouble: {}", e)))?;
        let doc = docs.first().ok_or_else(|| Error::descriptor(path, "empty document"))?;
        let top = doc.as_hash().ok_or_else(|| Error::descriptor(path, "expected a mapping of field names"))?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));

        let mut fields = Vec::new();

        for (key, entry) in top {
            let name = key.as_str()
                .ok_or_else(|| Error::descriptor(path, "field names must be strings"))?;
            let list = entry["volumes"].as_vec()
                .ok_or_else(|| Error::descriptor(path, format!("field \"{}\" has no \"volumes\" list", name)))?;

            if list.is_empty() {
                return Err(Error::descriptor(path, format!("field \"{}\" has no volumes", name)));
            }

            let mut specs = Vec::with_capacity(list.len());

            for (i, item) in list.iter().enumerate() {
                let ctx = format!("{}[{}]", name, i);
                specs.push(parse_volume(item, base, path, &ctx)?);
            }

            fields.push((name.to_owned(), specs));
        }

        if fields.is_empty() {
            return Err(Error::descriptor(path, "no fields defined"));
        }

        Ok(FieldDescriptor { path: path.to_owned(), fields: fields })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Field names in file order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn volumes(&self, name: &str) -> Result<&[VolumeSpec]> {
        self.fields.iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| Error::descriptor(&self.path, format!("no field named \"{}\"", name)))
    }
}

/// List the field names defined by the descriptor at `path`.
pub fn field_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let desc = FieldDescriptor::from_file(path)?;
    Ok(desc.field_names().into_iter().map(|s| s.to_owned()).collect())
}


fn number(y: &Yaml) -> Option<f64> {
    match *y {
        Yaml::Real(_) => y.as_f64(),
        Yaml::Integer(i) => Some(i as f64),
        _ => None,
    }
}

fn triple(item: &Yaml, key: &str, path: &Path, ctx: &str) -> Result<Vec3> {
    let bad = || Error::descriptor(path, format!("{}: \"{}\" must be a list of three numbers", ctx, key));
    let list = item[key].as_vec().ok_or_else(bad)?;

    if list.len() != 3 {
        return Err(bad());
    }

    let mut c = [0_f64; 3];

    for (i, y) in list.iter().enumerate() {
        c[i] = number(y).ok_or_else(bad)?;
    }

    Ok(Vec3::from(c))
}

fn parse_volume(item: &Yaml, base: &Path, path: &Path, ctx: &str) -> Result<VolumeSpec> {
    let origin = triple(item, "origin", path, ctx)?;
    let extents = triple(item, "extents", path, ctx)?;
    let mesh = triple(item, "mesh", path, ctx)?;

    volume::grid_dims(extents, mesh).map_err(|m| Error::descriptor(path, format!("{}: {}", ctx, m)))?;

    let source = match (item["file"].as_str(), item["field"].is_badvalue()) {
        (Some(f), true) => NodeSource::File(base.join(f)),
        (None, false) => NodeSource::Constant(triple(item, "field", path, ctx)?),
        (Some(_), false) => {
            return Err(Error::descriptor(path, format!("{}: give either \"file\" or \"field\", not both", ctx)));
        },
        (None, true) => {
            return Err(Error::descriptor(path, format!("{}: need a \"file\" or a constant \"field\"", ctx)));
        },
    };

    Ok(VolumeSpec { origin: origin, extents: extents, mesh: mesh, source: source })
}
