use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

use crate::bundle::Bundle;




#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("unknown output format '{0}' (expected 'cbor' or 'netcdf')")]
    UnknownFormat(String),
    #[error("output format '{0}' is not compiled into this build")]
    FormatUnavailable(&'static str),
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ciborium::ser::Error<std::io::Error>,
    },
    #[error("fields in {path:?} do not share one shape")]
    Layout { path: PathBuf },
    #[cfg(feature = "netcdf")]
    #[error("netcdf error writing {path:?}: {source}")]
    NetCdf {
        path: PathBuf,
        #[source]
        source: netcdf::Error,
    },
}




/**
 * The container format output bundles are written in.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Cbor,
    NetCdf,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Cbor
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "cbor" => Ok(OutputFormat::Cbor),
            "netcdf" => Ok(OutputFormat::NetCdf),
            _ => Err(OutputError::UnknownFormat(name.to_string())),
        }
    }
}




/**
 * Where the bundle of the given mesh is written on the given rank.
 */
pub fn output_path(datadir: &Path, mesh_name: &str, rank: usize) -> PathBuf {
    datadir.join(format!("BOUT.{}.{}.nc", mesh_name, rank))
}




/**
 * Write a bundle to the given path, creating its directory if needed. An
 * existing file is overwritten.
 */
pub fn write(format: OutputFormat, path: &Path, bundle: &Bundle) -> Result<(), OutputError> {
    let io_error = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    match format {
        OutputFormat::Cbor => write_cbor(path, bundle)?,
        OutputFormat::NetCdf => write_netcdf(path, bundle)?,
    }
    info!("wrote {} variables to {}", bundle.len(), path.display());
    Ok(())
}

fn write_cbor(path: &Path, bundle: &Bundle) -> Result<(), OutputError> {
    let io_error = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);

    ciborium::ser::into_writer(bundle, &mut writer).map_err(|source| OutputError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    writer.flush().map_err(io_error)
}

#[cfg(not(feature = "netcdf"))]
fn write_netcdf(_path: &Path, _bundle: &Bundle) -> Result<(), OutputError> {
    Err(OutputError::FormatUnavailable("netcdf"))
}

/**
 * Fields become `(x, y, z)` variables carrying their attributes, and scalars
 * become dimensionless variables.
 */
#[cfg(feature = "netcdf")]
fn write_netcdf(path: &Path, bundle: &Bundle) -> Result<(), OutputError> {
    use crate::bundle::Value;

    let nc_error = |source| OutputError::NetCdf {
        path: path.to_path_buf(),
        source,
    };
    let mut shapes = bundle.iter().filter_map(|(_, value)| match value {
        Value::Field(field) => Some(field.shape()),
        _ => None,
    });
    let shape = shapes.next();

    if let Some(shape) = shape {
        if shapes.any(|s| s != shape) {
            return Err(OutputError::Layout { path: path.to_path_buf() });
        }
    }
    let mut file = netcdf::create(path).map_err(nc_error)?;

    if let Some(shape) = shape {
        file.add_dimension("x", shape.nx).map_err(nc_error)?;
        file.add_dimension("y", shape.ny).map_err(nc_error)?;
        file.add_dimension("z", shape.nz).map_err(nc_error)?;
    }

    for (key, value) in bundle.iter() {
        match value {
            Value::Field(field) => {
                let mut var = file.add_variable::<f64>(key, &["x", "y", "z"]).map_err(nc_error)?;
                var.put_values(field.data(), ..).map_err(nc_error)?;
                for (name, text) in field.attributes() {
                    var.put_attribute(name, text.as_str()).map_err(nc_error)?;
                }
            }
            Value::Int(n) => {
                let mut var = file.add_variable::<i64>(key, &[]).map_err(nc_error)?;
                var.put_value(*n, ..).map_err(nc_error)?;
            }
            Value::Real(x) => {
                let mut var = file.add_variable::<f64>(key, &[]).map_err(nc_error)?;
                var.put_value(*x, ..).map_err(nc_error)?;
            }
        }
    }
    Ok(())
}
