use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::driver::MeshEvaluation;
use crate::field::Field3D;
use crate::mesh::{Mesh, MeshError};

/// Key of the version marker written last in every bundle.
pub const VERSION_KEY: &str = "BOUT_VERSION";




/**
 * A value stored in an output bundle.
 */
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Real(f64),
    Field(Field3D),
}




/**
 * An ordered, string-keyed collection of output values. Keys keep the order
 * they were first inserted in, and inserting an existing key replaces its
 * value in place. Serializes as a map in that order.
 */
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    entries: Vec<(String, Value)>,
}




// ============================================================================
impl Bundle {

    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Insert a value, returning the value previously held under the key.
     */
    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key.to_string(), value));
                None
            }
        }
    }

    pub fn insert_field(&mut self, key: &str, field: Field3D) {
        self.insert(key, Value::Field(field));
    }

    pub fn insert_int(&mut self, key: &str, value: i64) {
        self.insert(key, Value::Int(value));
    }

    pub fn insert_real(&mut self, key: &str, value: f64) {
        self.insert(key, Value::Real(value));
    }


    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Serialize for Bundle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}




/**
 * The crate version as a number, `major.minor`.
 */
pub fn version_as_double() -> f64 {
    let major: f64 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0.0);
    let minor = env!("CARGO_PKG_VERSION_MINOR");
    let scale = 10f64.powi(minor.len() as i32);
    major + minor.parse::<f64>().unwrap_or(0.0) / scale
}




/**
 * Collect everything written for one mesh: `R` and `Z`, the operator
 * results in sequence order, the mesh diagnostics, the geometry the
 * operators used, and finally the version marker.
 */
pub fn assemble<M: Mesh + ?Sized>(evaluation: MeshEvaluation, mesh: &M) -> Result<Bundle, MeshError> {
    let MeshEvaluation { r, z, coordinates, entries } = evaluation;
    let mut bundle = Bundle::new();

    bundle.insert_field("R", r);
    bundle.insert_field("Z", z);

    for entry in entries {
        bundle.insert_field(&entry.key, entry.field);
    }
    mesh.output_vars(&mut bundle)?;

    for (name, field) in coordinates.named() {
        bundle.insert_field(name, field.clone());
    }
    bundle.insert_real(VERSION_KEY, version_as_double());
    Ok(bundle)
}
