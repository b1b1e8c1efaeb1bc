//! The mesh is the collaborator that owns geometry and domain decomposition.
//! The harness reaches it only through the `Mesh` trait: load it, read named
//! grid variables and metric coefficients, and exchange guard cells between
//! ranks. `GridMesh` is the logically rectangular implementation used by the
//! binary.
//!

use std::f64::consts::PI;

use log::warn;

use crate::bundle::Bundle;
use crate::config::ConfigError;
use crate::field::{Field3D, FieldError, FieldShape};
use crate::message::comm::CommError;

pub mod grid;
pub mod gridfile;

pub use grid::GridMesh;
pub use gridfile::{GridFile, GridFileError};




#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("mesh '{0}' has not been loaded")]
    NotLoaded(String),
    #[error("bad mesh configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("bad mesh dimensions: {0}")]
    Dimensions(String),
    #[error("{interior} interior x points cannot be split evenly over {ranks} ranks with {mxg} guard cells")]
    Decomposition {
        interior: usize,
        ranks: usize,
        mxg: usize,
    },
    #[error("grid variable '{name}' has {found} values, expected {expected}")]
    GridMismatch {
        name: String,
        expected: String,
        found: usize,
    },
    #[error("bad profile for grid variable '{name}': {source}")]
    Profile {
        name: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("required grid variable '{0}' is missing")]
    MissingVariable(String),
    #[error("field shape {found:?} does not match the mesh {expected:?}")]
    ShapeMismatch {
        expected: FieldShape,
        found: FieldShape,
    },
    #[error("halo message from rank {source_rank} holds {found} fields, expected {expected}")]
    HaloSize {
        source_rank: usize,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    GridFile(#[from] GridFileError),
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error(transparent)]
    Field(#[from] FieldError),
}




/// Interface to a mesh on which fields live. A mesh is loaded once, after
/// which it hands out fields shaped like its local subdomain.
///
/// __Collective operations__: `load`, `communicate` and `max_over_ranks`
/// synchronize with the other ranks of a distributed run. Every rank must call them the same
/// number of times, in the same order, with the same logical set of fields,
/// or the run deadlocks or exchanges the wrong data.
///
pub trait Mesh {
    /// Read the mesh configuration and grid data, and set up the local
    /// subdomain. Collective.
    fn load(&mut self) -> Result<(), MeshError>;

    /// The rank of this process in the distributed run.
    fn rank(&self) -> usize;

    /// The shape of fields on the local subdomain. Fails before `load`.
    fn shape(&self) -> Result<FieldShape, MeshError>;

    /// Return the named grid variable on the local subdomain, if the grid
    /// defines it.
    fn lookup(&self, name: &str) -> Result<Option<Field3D>, MeshError>;

    /// Exchange guard cells of every given field with neighbouring ranks,
    /// marking each field's halo as exchanged. Collective.
    fn communicate(&mut self, fields: &mut [&mut Field3D]) -> Result<(), MeshError>;

    /// Return the largest of the values passed by every rank. Usable before
    /// `load`. Collective.
    fn max_over_ranks(&mut self, value: u64) -> Result<u64, MeshError>;

    /// Write the scalar diagnostics that describe this mesh into a bundle.
    fn output_vars(&self, bundle: &mut Bundle) -> Result<(), MeshError>;

    /// Return the named grid variable. If it is missing, a strict read is an
    /// error, while a tolerant read logs a warning and yields a field filled
    /// with `default`.
    fn get(&self, name: &str, default: f64, strict: bool) -> Result<Field3D, MeshError> {
        match self.lookup(name)? {
            Some(field) => Ok(field),
            None if strict => Err(MeshError::MissingVariable(name.to_string())),
            None => {
                warn!("grid variable '{}' not found, setting to {}", name, default);
                self.constant(default)
            }
        }
    }

    /// A field with the same value everywhere on the local subdomain.
    fn constant(&self, value: f64) -> Result<Field3D, MeshError> {
        Ok(Field3D::constant(self.shape()?, value))
    }

    /// Read the metric coefficients and grid spacings. Coefficients the grid
    /// does not define take the values of an orthogonal, unit-Jacobian
    /// geometry, with `dz` spanning one period over `nz` points.
    fn coordinates(&self) -> Result<Coordinates, MeshError> {
        let shape = self.shape()?;
        let mut coords = Coordinates::orthogonal(shape, 1.0, 1.0, 2.0 * PI / shape.nz as f64);

        for (name, field) in coords.named_mut() {
            if let Some(read) = self.lookup(name)? {
                *field = read;
            }
        }
        Ok(coords)
    }
}




/**
 * Grid spacings and metric tensor components on the local subdomain.
 * Contravariant components are `gij`, covariant ones `g_ij`.
 */
#[derive(Clone, Debug)]
pub struct Coordinates {
    pub dx: Field3D,
    pub dy: Field3D,
    pub dz: Field3D,
    pub g11: Field3D,
    pub g22: Field3D,
    pub g33: Field3D,
    pub g12: Field3D,
    pub g13: Field3D,
    pub g23: Field3D,
    pub g_22: Field3D,
    pub g_12: Field3D,
    pub g_23: Field3D,
    pub jacobian: Field3D,
    pub bxy: Field3D,
}




// ============================================================================
impl Coordinates {

    /**
     * Orthogonal, unit-Jacobian geometry with uniform spacings.
     */
    pub fn orthogonal(shape: FieldShape, dx: f64, dy: f64, dz: f64) -> Self {
        let fill = |value| Field3D::constant(shape, value);
        Self {
            dx: fill(dx),
            dy: fill(dy),
            dz: fill(dz),
            g11: fill(1.0),
            g22: fill(1.0),
            g33: fill(1.0),
            g12: fill(0.0),
            g13: fill(0.0),
            g23: fill(0.0),
            g_22: fill(1.0),
            g_12: fill(0.0),
            g_23: fill(0.0),
            jacobian: fill(1.0),
            bxy: fill(1.0),
        }
    }


    /**
     * Names of the fields returned by `parallel_fields_mut`, in order.
     */
    pub const PARALLEL_FIELDS: [&'static str; 8] = ["g12", "g_12", "g23", "g_23", "dy", "dz", "Bxy", "J"];


    /**
     * The fields whose guard cells operators read along the parallel
     * direction. These must be communicated and given a parallel boundary
     * condition before any operator is evaluated.
     */
    pub fn parallel_fields_mut(&mut self) -> [&mut Field3D; 8] {
        [
            &mut self.g12,
            &mut self.g_12,
            &mut self.g23,
            &mut self.g_23,
            &mut self.dy,
            &mut self.dz,
            &mut self.bxy,
            &mut self.jacobian,
        ]
    }


    /**
     * All coefficients, with the names they are written under.
     */
    pub fn named(&self) -> Vec<(&'static str, &Field3D)> {
        vec![
            ("dx", &self.dx),
            ("dy", &self.dy),
            ("dz", &self.dz),
            ("g11", &self.g11),
            ("g22", &self.g22),
            ("g33", &self.g33),
            ("g12", &self.g12),
            ("g13", &self.g13),
            ("g23", &self.g23),
            ("g_22", &self.g_22),
            ("g_12", &self.g_12),
            ("g_23", &self.g_23),
            ("J", &self.jacobian),
            ("Bxy", &self.bxy),
        ]
    }


    fn named_mut(&mut self) -> Vec<(&'static str, &mut Field3D)> {
        vec![
            ("dx", &mut self.dx),
            ("dy", &mut self.dy),
            ("dz", &mut self.dz),
            ("g11", &mut self.g11),
            ("g22", &mut self.g22),
            ("g33", &mut self.g33),
            ("g12", &mut self.g12),
            ("g13", &mut self.g13),
            ("g23", &mut self.g23),
            ("g_22", &mut self.g_22),
            ("g_12", &mut self.g_12),
            ("g_23", &mut self.g_23),
            ("J", &mut self.jacobian),
            ("Bxy", &mut self.bxy),
        ]
    }


    pub fn shape(&self) -> FieldShape {
        self.jacobian.shape()
    }
}
