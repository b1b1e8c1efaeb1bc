use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::enumerate::EnumerateError;
use crate::mesh::MeshError;
use crate::message::comm::CommError;
use crate::output::OutputError;




/**
 * Any error that ends a run.
 */
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Comm(#[from] CommError),
}
