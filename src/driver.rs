//! The evaluation loop. For each configured mesh, every test function is
//! evaluated on the mesh's `R` and `Z` fields, prepared, and handed to every
//! operator; the results are bundled and written out, one file per mesh and
//! rank.
//!

use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, error, info, warn};

use crate::bundle;
use crate::catalog::{Operator, TestFunction, FUNCTIONS, OPERATORS};
use crate::config::Options;
use crate::enumerate;
use crate::error::Error;
use crate::field::{Field3D, FieldError, ParallelBoundary};
use crate::mesh::{Coordinates, GridMesh, Mesh, MeshError};
use crate::message::comm::Communicator;
use crate::message::mailbox::Mailbox;
use crate::ops::OperatorError;
use crate::output::{self, OutputFormat};

/// The parallel boundary condition given to every field an operator reads.
pub const PARALLEL_BOUNDARY: &str = "parallel_neumann_o2";

/// Per-rank outcome of a stage, agreed on with `Mesh::max_over_ranks`.
const STAGE_OK: u64 = 0;
const STAGE_FAILED: u64 = 1;




#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("unknown failure policy '{0}' (expected 'abort', 'skip_mesh' or 'skip_entry')")]
    UnknownPolicy(String),
    #[error("{key}: {operator} applied to {function} failed: {source}")]
    Operator {
        key: String,
        operator: &'static str,
        function: &'static str,
        #[source]
        source: OperatorError,
    },
    #[error("another rank failed to load the mesh")]
    PeerLoad,
    #[error("an operator failed on another rank")]
    PeerOperator,
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Field(#[from] FieldError),
}

impl DriverError {
    /// Whether the error came from an operator, here or on another rank.
    pub fn is_operator_failure(&self) -> bool {
        matches!(self, DriverError::Operator { .. } | DriverError::PeerOperator)
    }
}




/**
 * What to do when an operator fails on any rank. Every rank makes the same
 * choice. Failures to load a mesh or read its fields always end the run.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the run with the error.
    Abort,
    /// Log the error, write nothing for the mesh, and go on to the next one.
    SkipMesh,
    /// Log the error and leave the entry out. Its sequence number is still
    /// used up, so the other keys keep their positions.
    SkipEntry,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

impl FromStr for FailurePolicy {
    type Err = DriverError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "abort" => Ok(FailurePolicy::Abort),
            "skip_mesh" => Ok(FailurePolicy::SkipMesh),
            "skip_entry" => Ok(FailurePolicy::SkipEntry),
            _ => Err(DriverError::UnknownPolicy(name.to_string())),
        }
    }
}




/**
 * One operator result, keyed `out_<seq>`, with the operator and function
 * names attached to the field as attributes.
 */
#[derive(Clone, Debug)]
pub struct OutputEntry {
    pub key: String,
    pub field: Field3D,
}




/**
 * Everything computed for one mesh, handed on by value to be bundled.
 */
#[derive(Clone, Debug)]
pub struct MeshEvaluation {
    pub r: Field3D,
    pub z: Field3D,
    pub coordinates: Coordinates,
    pub entries: Vec<OutputEntry>,
}




/**
 * Summary of a completed run on this rank.
 */
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub meshes: usize,
    pub fields: usize,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<String>,
}




/**
 * Load a mesh and apply every operator to every test function on it.
 * Functions form the outer loop and operators the inner one, and results
 * are numbered in that order.
 *
 * The coefficient `a = 1`, the metric fields operators read along the
 * parallel direction, and each function's values are communicated and given
 * the Neumann parallel boundary before any operator sees them.
 *
 * After a failure under `Abort` or `SkipMesh`, no more operators are
 * applied, but the remaining functions are still evaluated and communicated
 * so collective calls stay matched across ranks. Once after loading and
 * once after the last function, the ranks agree on whether any of them has
 * failed, so either every rank returns an error for the mesh or none does.
 * A rank that did not fail itself returns `PeerLoad` or `PeerOperator`.
 */
pub fn evaluate_mesh<M: Mesh + ?Sized>(
    mesh: &mut M,
    functions: &[TestFunction],
    operators: &[Operator],
    policy: FailurePolicy,
) -> Result<MeshEvaluation, DriverError> {
    let loaded = mesh.load();
    let status = if loaded.is_ok() { STAGE_OK } else { STAGE_FAILED };
    let agreed = mesh.max_over_ranks(status);
    loaded?;

    if agreed? != STAGE_OK {
        return Err(DriverError::PeerLoad);
    }
    let boundary: ParallelBoundary = PARALLEL_BOUNDARY.parse()?;

    let r = mesh.get("R", 0.0, false)?;
    let z = mesh.get("Z", 0.0, false)?;
    let mut a = mesh.constant(1.0)?;
    let mut coordinates = mesh.coordinates()?;

    {
        debug!("preparing a, {} with {}", Coordinates::PARALLEL_FIELDS.join(", "), boundary);
        let mut fields: Vec<&mut Field3D> = std::iter::once(&mut a)
            .chain(coordinates.parallel_fields_mut())
            .collect();
        mesh.communicate(&mut fields)?;

        for field in fields.iter_mut() {
            field.apply_parallel_boundary(boundary)?;
        }
    }

    let mut entries = Vec::with_capacity(functions.len() * operators.len());
    let mut failure = None;
    let mut seq = 0;

    for function in functions {
        let mut candidate = (function.evaluate)(&r, &z);
        mesh.communicate(&mut [&mut candidate])?;
        candidate.apply_parallel_boundary(boundary)?;

        for operator in operators {
            let key = format!("out_{}", seq);
            seq += 1;

            if failure.is_some() {
                continue;
            }
            match (operator.evaluate)(&coordinates, &a, &candidate) {
                Ok(mut field) => {
                    field.set_attributes(vec![
                        ("operator", operator.name),
                        ("function", function.name),
                        ("f", function.name),
                    ]);
                    entries.push(OutputEntry { key, field });
                }
                Err(source) => {
                    let error = DriverError::Operator {
                        key,
                        operator: operator.name,
                        function: function.name,
                        source,
                    };
                    match policy {
                        FailurePolicy::Abort | FailurePolicy::SkipMesh => failure = Some(error),
                        FailurePolicy::SkipEntry => warn!("omitting entry: {}", error),
                    }
                }
            }
        }
    }

    let status = if failure.is_some() { STAGE_FAILED } else { STAGE_OK };
    let agreed = mesh.max_over_ranks(status)?;

    match failure {
        Some(error) => Err(error),
        None if agreed != STAGE_OK => Err(DriverError::PeerOperator),
        None => Ok(MeshEvaluation { r, z, coordinates, entries }),
    }
}




/**
 * Run the harness over every `mesh_{}` section of the configuration, using
 * the built-in catalogs, and write one output file per mesh on this rank.
 */
pub fn run<C: Communicator>(options: &Options, mailbox: &Mailbox<C>) -> Result<RunSummary, Error> {
    let policy: FailurePolicy = options.get_or("failure_policy", "abort".to_string())?.parse()?;
    let format: OutputFormat = options.get_or("output_format", "cbor".to_string())?.parse()?;
    let datadir = PathBuf::from(options.get_or("datadir", "data".to_string())?);

    let meshes = enumerate::get_all(options, "mesh_{}")?;
    let fields = enumerate::get_all(options, "field_{}")?;
    info!("Found {} meshes and {} fields", meshes.len(), fields.len());

    let mut summary = RunSummary {
        meshes: meshes.len(),
        fields: fields.len(),
        ..RunSummary::default()
    };

    for entry in &meshes {
        let mut mesh = GridMesh::create(options, &entry.name, mailbox)?;
        info!("evaluating mesh '{}'", mesh.name());

        let evaluation = match evaluate_mesh(&mut mesh, FUNCTIONS, OPERATORS, policy) {
            Ok(evaluation) => evaluation,
            Err(e) if e.is_operator_failure() && policy == FailurePolicy::SkipMesh => {
                error!("skipping mesh '{}': {}", entry.name, e);
                summary.skipped.push(entry.name.clone());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let bundle = bundle::assemble(evaluation, &mesh)?;
        let path = output::output_path(&datadir, &entry.name, mesh.rank());

        output::write(format, &path, &bundle)?;
        summary.written.push(path);
    }
    Ok(summary)
}
