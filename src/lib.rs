//! Opcheck is a validation harness for finite-difference operators on
//! domain-decomposed meshes. For every mesh named in its configuration it
//! evaluates a fixed set of analytic test functions on the mesh's `R` and `Z`
//! coordinates, applies a fixed set of differential operators to each, and
//! writes every result, tagged with the operator and function that produced
//! it, to one output file per mesh and rank. The files are compared against
//! analytic results offline, which is how discretization errors and
//! convergence rates of the operators are measured.
//!
//! Runs may span several processes. The mesh is split along x, and guard
//! cells are exchanged through a `Communicator`, either in-process over
//! channels or between processes over TCP.

pub mod bundle;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod enumerate;
pub mod error;
pub mod field;
pub mod mesh;
pub mod message;
pub mod ops;
pub mod output;

pub use error::Error;
