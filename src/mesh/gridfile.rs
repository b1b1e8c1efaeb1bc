use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};




#[derive(Debug, thiserror::Error)]
pub enum GridFileError {
    #[error("failed to open grid file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode grid file {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ciborium::de::Error<std::io::Error>,
    },
    #[error("failed to encode grid file {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ciborium::ser::Error<std::io::Error>,
    },
}




/**
 * A grid file holds named variables over the global domain, stored as CBOR.
 * Each variable has either `nx * ny * nz` values (a 3D variable) or `nx * ny`
 * values (an axisymmetric variable, constant in z), laid out row-major. The
 * x extent includes the x guard cells, the y extent does not include any.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GridFile {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub variables: BTreeMap<String, Vec<f64>>,
}




// ============================================================================
impl GridFile {

    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz, variables: BTreeMap::new() }
    }


    /**
     * Add a variable from a closure of the global index `(x, y, z)`.
     */
    pub fn insert_with<F>(&mut self, name: &str, f: F)
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(self.nx * self.ny * self.nz);

        for i in 0..self.nx {
            for j in 0..self.ny {
                for k in 0..self.nz {
                    data.push(f(i, j, k))
                }
            }
        }
        self.variables.insert(name.to_string(), data);
    }


    pub fn read(path: &Path) -> Result<Self, GridFileError> {
        let file = File::open(path).map_err(|source| GridFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ciborium::de::from_reader(BufReader::new(file)).map_err(|source| GridFileError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }


    pub fn write(&self, path: &Path) -> Result<(), GridFileError> {
        let file = File::create(path).map_err(|source| GridFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);

        ciborium::ser::into_writer(self, &mut writer).map_err(|source| GridFileError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|source| GridFileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
