use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

use log::{debug, info};
use serde::Deserialize;

use super::gridfile::GridFile;
use super::{Mesh, MeshError};
use crate::bundle::Bundle;
use crate::config::{ConfigError, Options};
use crate::field::{Field3D, FieldShape};
use crate::message::comm::{CommError, Communicator};
use crate::message::mailbox::Mailbox;




/**
 * Identifier for a logical axis of the mesh
 */
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}




/**
 * How a grid variable is generated from the mesh configuration: a constant,
 * or a linear profile along one axis. The profile runs from `start` at the
 * lower edge of the first interior cell to `end` at the upper edge of the
 * last one, and extends linearly into guard cells.
 */
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Profile {
    Constant(f64),
    Linear { axis: Axis, start: f64, end: f64 },
}




/**
 * Placement of the local subdomain within the global mesh. The mesh is split
 * along x into `nxpe` pieces of `mxsub` interior points each.
 */
#[derive(Clone, Copy, Debug)]
struct Layout {
    nx: usize,
    ny: usize,
    nz: usize,
    mxg: usize,
    myg: usize,
    nxpe: usize,
    mxsub: usize,
    x_offset: usize,
}

impl Layout {
    fn local_shape(&self) -> FieldShape {
        FieldShape {
            nx: self.mxsub + 2 * self.mxg,
            ny: self.ny + 2 * self.myg,
            nz: self.nz,
            mxg: self.mxg,
            myg: self.myg,
        }
    }

    /**
     * Global x index and interior y index of a local index. Y guard cells
     * map to the nearest interior row.
     */
    fn global_index(&self, i: usize, j: usize) -> (usize, usize) {
        let y = j.saturating_sub(self.myg).min(self.ny - 1);
        (self.x_offset + i, y)
    }
}




/**
 * A logically rectangular mesh, decomposed along x over the ranks of a
 * communicator. `nx` counts the x guard cells at the physical boundaries, `ny`
 * counts only interior points. Grid variables are read from an optional
 * grid file, and from a `vars` table of generated profiles which take
 * precedence.
 */
pub struct GridMesh<'a, C> {
    name: String,
    options: Options,
    datadir: PathBuf,
    mailbox: &'a Mailbox<C>,
    layout: Option<Layout>,
    variables: HashMap<String, Field3D>,
}




// ============================================================================
impl<'a, C: Communicator> GridMesh<'a, C> {

    /**
     * Create a mesh from the configuration section with the given name. The
     * mesh must be loaded before it is used.
     */
    pub fn create(options: &Options, name: &str, mailbox: &'a Mailbox<C>) -> Result<Self, MeshError> {
        Ok(Self {
            name: name.to_string(),
            options: options.subsection(name),
            datadir: PathBuf::from(options.get_or("datadir", "data".to_string())?),
            mailbox,
            layout: None,
            variables: HashMap::new(),
        })
    }


    pub fn name(&self) -> &str {
        &self.name
    }


    fn layout(&self) -> Result<Layout, MeshError> {
        self.layout.ok_or_else(|| MeshError::NotLoaded(self.name.clone()))
    }


    fn read_layout(&self) -> Result<Layout, MeshError> {
        let dimension = |key: &str, default: Option<i64>| -> Result<usize, MeshError> {
            let value: i64 = match default {
                Some(default) => self.options.get_or(key, default)?,
                None => self.options.get(key)?,
            };
            if value < 0 {
                return Err(MeshError::Dimensions(format!("{} = {} is negative", key, value)));
            }
            Ok(value as usize)
        };

        let nx = dimension("nx", None)?;
        let ny = dimension("ny", None)?;
        let nz = dimension("nz", Some(1))?;
        let mxg = dimension("MXG", Some(2))?;
        let myg = dimension("MYG", Some(2))?;

        if nx <= 2 * mxg || ny == 0 || nz == 0 {
            return Err(MeshError::Dimensions(format!(
                "nx = {}, ny = {}, nz = {} with MXG = {} leaves no interior",
                nx, ny, nz, mxg)));
        }

        let nxpe = self.mailbox.size();
        let interior = nx - 2 * mxg;

        if interior % nxpe != 0 || interior / nxpe < mxg {
            return Err(MeshError::Decomposition { interior, ranks: nxpe, mxg });
        }
        let mxsub = interior / nxpe;

        Ok(Layout {
            nx,
            ny,
            nz,
            mxg,
            myg,
            nxpe,
            mxsub,
            x_offset: self.mailbox.rank() * mxsub,
        })
    }


    /**
     * Cut the local subdomain out of a global grid file variable.
     */
    fn localize(layout: &Layout, name: &str, data: &[f64]) -> Result<Field3D, MeshError> {
        let (nx, ny, nz) = (layout.nx, layout.ny, layout.nz);
        let axisymmetric = match data.len() {
            n if n == nx * ny * nz => false,
            n if n == nx * ny => true,
            n => {
                return Err(MeshError::GridMismatch {
                    name: name.to_string(),
                    expected: format!("{} or {}", nx * ny * nz, nx * ny),
                    found: n,
                })
            }
        };

        Ok(Field3D::from_function(layout.local_shape(), |i, j, k| {
            let (x, y) = layout.global_index(i, j);
            if axisymmetric {
                data[x * ny + y]
            } else {
                data[(x * ny + y) * nz + k]
            }
        }))
    }


    /**
     * Generate the local subdomain of a configured profile.
     */
    fn generate(layout: &Layout, profile: &Profile) -> Field3D {
        let layout = *layout;
        let interior_x = (layout.nx - 2 * layout.mxg) as f64;

        Field3D::from_function(layout.local_shape(), move |i, j, k| match *profile {
            Profile::Constant(value) => value,
            Profile::Linear { axis, start, end } => {
                let position = match axis {
                    Axis::X => ((layout.x_offset + i) as f64 - layout.mxg as f64 + 0.5) / interior_x,
                    Axis::Y => (j as f64 - layout.myg as f64 + 0.5) / layout.ny as f64,
                    Axis::Z => k as f64 / layout.nz as f64,
                };
                start + (end - start) * position
            }
        })
    }


    fn read_variables(&self, layout: &Layout) -> Result<HashMap<String, Field3D>, MeshError> {
        let mut variables = HashMap::new();

        if let Some(file) = self.options.get_or::<Option<String>>("file", None)? {
            let path = self.datadir.join(file);
            info!("reading grid file {}", path.display());
            let grid = GridFile::read(&path)?;

            if (grid.nx, grid.ny, grid.nz) != (layout.nx, layout.ny, layout.nz) {
                return Err(MeshError::Dimensions(format!(
                    "grid file is {}x{}x{}, but the mesh is configured as {}x{}x{}",
                    grid.nx, grid.ny, grid.nz, layout.nx, layout.ny, layout.nz)));
            }
            for (name, data) in &grid.variables {
                variables.insert(name.clone(), Self::localize(layout, name, data)?);
            }
        }

        let vars = self.options.subsection("vars");
        for name in vars.keys() {
            let profile: Profile = vars.get(name).map_err(|e| match e {
                ConfigError::Type { source, .. } => MeshError::Profile {
                    name: name.to_string(),
                    source,
                },
                other => MeshError::Config(other),
            })?;
            variables.insert(name.to_string(), Self::generate(layout, &profile));
        }
        Ok(variables)
    }


    fn check_shape(&self, field: &Field3D) -> Result<(), MeshError> {
        let expected = self.shape()?;
        if field.shape() != expected {
            return Err(MeshError::ShapeMismatch {
                expected,
                found: field.shape(),
            });
        }
        Ok(())
    }


    fn send_planes(&self, dest: usize, tag: u64, fields: &[&mut Field3D], planes: Range<usize>) -> Result<(), MeshError> {
        let strips: Vec<Vec<f64>> = fields.iter().map(|f| f.x_planes(planes.clone())).collect();
        let bytes = rmp_serde::to_vec(&strips).map_err(CommError::from)?;
        self.mailbox.post(dest, tag, bytes)?;
        Ok(())
    }


    fn recv_planes(&self, source: usize, tag: u64, fields: &mut [&mut Field3D], start: usize) -> Result<(), MeshError> {
        let bytes = self.mailbox.collect(source, tag)?;
        let strips: Vec<Vec<f64>> = rmp_serde::from_slice(&bytes).map_err(CommError::from)?;

        if strips.len() != fields.len() {
            return Err(MeshError::HaloSize {
                source_rank: source,
                expected: fields.len(),
                found: strips.len(),
            });
        }
        for (field, strip) in fields.iter_mut().zip(&strips) {
            field.write_x_planes(start, strip);
        }
        Ok(())
    }
}




// ============================================================================
impl<'a, C: Communicator> Mesh for GridMesh<'a, C> {

    fn load(&mut self) -> Result<(), MeshError> {
        let layout = self.read_layout()?;
        info!(
            "loading mesh '{}': {}x{}x{} split over {} ranks",
            self.name, layout.nx, layout.ny, layout.nz, layout.nxpe);

        self.variables = self.read_variables(&layout)?;
        self.layout = Some(layout);
        Ok(())
    }


    fn rank(&self) -> usize {
        self.mailbox.rank()
    }


    fn shape(&self) -> Result<FieldShape, MeshError> {
        Ok(self.layout()?.local_shape())
    }


    fn lookup(&self, name: &str) -> Result<Option<Field3D>, MeshError> {
        self.layout()?;
        Ok(self.variables.get(name).cloned())
    }


    /**
     * Fill the x guard cells of each field from the neighbouring ranks. Guard
     * cells at the physical x boundaries are left as they are. All fields
     * travel in one message per neighbour.
     */
    fn communicate(&mut self, fields: &mut [&mut Field3D]) -> Result<(), MeshError> {
        let layout = self.layout()?;
        let tag = self.mailbox.next_tag();
        let rank = self.mailbox.rank();
        let shape = layout.local_shape();
        let (mxg, nx) = (shape.mxg, shape.nx);

        for field in fields.iter() {
            self.check_shape(field)?;
        }
        debug!("[{}] exchanging {} fields (tag {})", rank, fields.len(), tag);

        if mxg > 0 {
            let left = if rank > 0 { Some(rank - 1) } else { None };
            let right = if rank + 1 < layout.nxpe { Some(rank + 1) } else { None };

            if let Some(left) = left {
                self.send_planes(left, tag, fields, mxg..2 * mxg)?;
            }
            if let Some(right) = right {
                self.send_planes(right, tag, fields, nx - 2 * mxg..nx - mxg)?;
            }
            if let Some(left) = left {
                self.recv_planes(left, tag, fields, 0)?;
            }
            if let Some(right) = right {
                self.recv_planes(right, tag, fields, nx - mxg)?;
            }
        }

        for field in fields.iter_mut() {
            field.mark_exchanged();
        }
        Ok(())
    }


    fn max_over_ranks(&mut self, value: u64) -> Result<u64, MeshError> {
        Ok(self.mailbox.all_reduce_max(value)?)
    }


    fn output_vars(&self, bundle: &mut Bundle) -> Result<(), MeshError> {
        let layout = self.layout()?;

        for &(key, value) in &[
            ("nx", layout.nx),
            ("ny", layout.ny),
            ("nz", layout.nz),
            ("MXG", layout.mxg),
            ("MYG", layout.myg),
            ("NXPE", layout.nxpe),
            ("MXSUB", layout.mxsub),
            ("MYSUB", layout.ny),
        ] {
            bundle.insert_int(key, value as i64);
        }
        Ok(())
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::GridMesh;
    use crate::config::Options;
    use crate::field::Field3D;
    use crate::mesh::{GridFile, Mesh, MeshError};
    use crate::message::comm::ChannelCommunicator;
    use crate::message::mailbox::Mailbox;
    use approx::assert_relative_eq;
    use std::thread;

    const MESH: &str = r#"
        [mesh_0]
        nx = 8
        ny = 4
        nz = 2
        MXG = 2
        MYG = 1

        [mesh_0.vars]
        R = { axis = "x", start = 1.0, end = 2.0 }
        Z = { axis = "y", start = -1.0, end = 1.0 }
        J = 2
    "#;

    fn serial() -> Mailbox<ChannelCommunicator> {
        Mailbox::new(ChannelCommunicator::serial())
    }


    #[test]
    fn loaded_mesh_has_guarded_local_shape() {
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        assert!(matches!(mesh.shape(), Err(MeshError::NotLoaded(_))));

        mesh.load().unwrap();
        let shape = mesh.shape().unwrap();
        assert_eq!((shape.nx, shape.ny, shape.nz, shape.mxg, shape.myg), (8, 6, 2, 2, 1));
    }


    #[test]
    fn profiles_are_cell_centered() {
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        mesh.load().unwrap();

        let r = mesh.get("R", 0.0, true).unwrap();
        assert_relative_eq!(r.get(2, 1, 0), 1.125);
        assert_relative_eq!(r.get(5, 1, 1), 1.875);
        assert_relative_eq!(r.get(0, 1, 0), 0.625);

        let z = mesh.get("Z", 0.0, true).unwrap();
        assert_relative_eq!(z.get(3, 1, 0), -0.75);
        assert_relative_eq!(z.get(3, 4, 0), 0.75);
        assert_eq!(mesh.coordinates().unwrap().jacobian.get(0, 0, 0), 2.0);
    }


    #[test]
    fn missing_variables_default_unless_strict() {
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        mesh.load().unwrap();

        assert!(matches!(mesh.get("psi", 0.0, true), Err(MeshError::MissingVariable(_))));
        let psi = mesh.get("psi", 3.0, false).unwrap();
        assert!(psi.data().iter().all(|&x| x == 3.0));
    }


    #[test]
    fn default_coordinates_are_orthogonal() {
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        mesh.load().unwrap();

        let coords = mesh.coordinates().unwrap();
        assert_eq!(coords.g11.get(1, 1, 1), 1.0);
        assert_eq!(coords.g12.get(1, 1, 1), 0.0);
        assert_relative_eq!(coords.dz.get(1, 1, 1), std::f64::consts::PI);
    }


    #[test]
    fn missing_dimensions_are_reported() {
        let mailbox = serial();
        let options = Options::parse("[mesh_0]\nnx = 8\n").unwrap();
        let mut mesh = GridMesh::create(&options, "mesh_0", &mailbox).unwrap();
        assert!(matches!(mesh.load(), Err(MeshError::Config(_))));

        let options = Options::parse("[mesh_0]\nnx = 4\nny = 2\n").unwrap();
        let mut mesh = GridMesh::create(&options, "mesh_0", &mailbox).unwrap();
        assert!(matches!(mesh.load(), Err(MeshError::Dimensions(_))));
    }


    #[test]
    fn uneven_decomposition_is_rejected() {
        let mut group = ChannelCommunicator::group(3);
        let mailbox = Mailbox::new(group.remove(0));
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        assert!(matches!(mesh.load(), Err(MeshError::Decomposition { interior: 4, ranks: 3, mxg: 2 })));
    }


    #[test]
    fn grid_file_variables_are_read_and_overridden() {
        let dir = tempfile::tempdir().unwrap();
        let mut grid = GridFile::new(8, 4, 2);
        grid.insert_with("R", |i, _, _| i as f64);
        grid.insert_with("Z", |_, j, k| (10 * j + k) as f64);
        grid.variables.insert("Bxy".to_string(), vec![5.0; 8 * 4]);
        grid.write(&dir.path().join("grid.cbor")).unwrap();

        let source = format!(
            "datadir = {:?}\n[mesh_0]\nnx = 8\nny = 4\nnz = 2\nMYG = 1\nfile = \"grid.cbor\"\n[mesh_0.vars]\nR = 7.0\n",
            dir.path().to_str().unwrap());
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(&source).unwrap(), "mesh_0", &mailbox).unwrap();
        mesh.load().unwrap();

        assert_eq!(mesh.get("R", 0.0, true).unwrap().get(3, 2, 1), 7.0);
        let z = mesh.get("Z", 0.0, true).unwrap();
        assert_eq!(z.get(3, 2, 1), 11.0);
        assert_eq!(z.get(3, 0, 1), 1.0);
        assert_eq!(z.get(3, 5, 0), 30.0);
        assert_eq!(mesh.coordinates().unwrap().bxy.get(7, 3, 1), 5.0);
    }


    #[test]
    fn grid_file_variables_must_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut grid = GridFile::new(8, 4, 2);
        grid.variables.insert("R".to_string(), vec![0.0; 7]);
        grid.write(&dir.path().join("grid.cbor")).unwrap();

        let source = format!(
            "datadir = {:?}\n[mesh_0]\nnx = 8\nny = 4\nnz = 2\nfile = \"grid.cbor\"\n",
            dir.path().to_str().unwrap());
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(&source).unwrap(), "mesh_0", &mailbox).unwrap();
        assert!(matches!(mesh.load(), Err(MeshError::GridMismatch { found: 7, .. })));
    }


    #[test]
    fn communicate_fills_guards_from_neighbours() {
        let source = "[mesh_0]\nnx = 8\nny = 2\nMXG = 1\nMYG = 0\n[mesh_0.vars]\nR = { axis = \"x\", start = 0.0, end = 6.0 }\n";
        let procs: Vec<_> = ChannelCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mailbox = Mailbox::new(comm);
                    let options = Options::parse(source).unwrap();
                    let mut mesh = GridMesh::create(&options, "mesh_0", &mailbox).unwrap();
                    mesh.load().unwrap();

                    // interior values number the global interior cells, guards are poisoned
                    let r = mesh.get("R", 0.0, true).unwrap();
                    let mut f = Field3D::from_function(r.shape(), |i, j, k| {
                        if i == 0 || i == 3 { -1.0 } else { (r.get(i, j, k) - 0.5).round() }
                    });
                    let mut g = f.clone();
                    mesh.communicate(&mut [&mut f, &mut g]).unwrap();
                    assert!(f.preparation().halo_exchanged);
                    (f.get(0, 0, 0), f.get(3, 1, 0), g.get(0, 1, 0))
                })
            })
            .collect();

        let results: Vec<_> = procs.into_iter().map(|p| p.join().unwrap()).collect();
        assert_eq!(results[0], (-1.0, 2.0, -1.0));
        assert_eq!(results[1], (1.0, 4.0, 1.0));
        assert_eq!(results[2], (3.0, -1.0, 3.0));
    }


    #[test]
    fn communicate_rejects_foreign_fields() {
        let mailbox = serial();
        let mut mesh = GridMesh::create(&Options::parse(MESH).unwrap(), "mesh_0", &mailbox).unwrap();
        mesh.load().unwrap();

        let mut shape = mesh.shape().unwrap();
        shape.nz = 5;
        let mut f = Field3D::constant(shape, 1.0);
        assert!(matches!(mesh.communicate(&mut [&mut f]), Err(MeshError::ShapeMismatch { .. })));
    }
}
