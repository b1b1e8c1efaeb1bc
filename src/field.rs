use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Range};
use std::str::FromStr;

use serde::Serialize;




#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FieldError {
    #[error("unknown parallel boundary condition '{0}'")]
    UnknownBoundary(String),
    #[error("there are no interior y points to fill {guards} guard cells from")]
    NoInterior { guards: usize },
}




/**
 * The logical dimensions of a field on the local subdomain, including guard
 * cells. `nx` counts `mxg` guard cells on each side and `ny` counts `myg`
 * guard cells on each side. The z direction is periodic and has no guards.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FieldShape {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub mxg: usize,
    pub myg: usize,
}




// ============================================================================
impl FieldShape {

    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /**
     * Return the memory offset of the given index. The layout is row-major,
     * with z varying fastest.
     */
    pub fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.ny + j) * self.nz + k
    }

    /**
     * Return the range of x indexes excluding guard cells.
     */
    pub fn interior_x(&self) -> Range<usize> {
        self.mxg..self.nx.saturating_sub(self.mxg)
    }

    /**
     * Return the range of y indexes excluding guard cells.
     */
    pub fn interior_y(&self) -> Range<usize> {
        self.myg..self.ny.saturating_sub(self.myg)
    }
}




/**
 * A boundary condition applied along the parallel (y) direction, which fills
 * the y guard cells from interior values.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParallelBoundary {
    /// Copy the last interior value into every guard cell.
    NeumannO1,
    /// Mirror interior values: zero gradient at the boundary face.
    NeumannO2,
    /// Mirror interior values with a sign change: zero value at the face.
    DirichletO2,
}

impl ParallelBoundary {
    pub fn name(&self) -> &'static str {
        match self {
            ParallelBoundary::NeumannO1 => "parallel_neumann_o1",
            ParallelBoundary::NeumannO2 => "parallel_neumann_o2",
            ParallelBoundary::DirichletO2 => "parallel_dirichlet_o2",
        }
    }
}

impl FromStr for ParallelBoundary {
    type Err = FieldError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "parallel_neumann_o1" => Ok(ParallelBoundary::NeumannO1),
            "parallel_neumann_o2" => Ok(ParallelBoundary::NeumannO2),
            "parallel_dirichlet_o2" => Ok(ParallelBoundary::DirichletO2),
            _ => Err(FieldError::UnknownBoundary(name.to_string())),
        }
    }
}

impl fmt::Display for ParallelBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}




/**
 * Record of what has been done to a field's guard cells since its values
 * were last computed.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Preparation {
    pub halo_exchanged: bool,
    pub parallel_boundary: Option<ParallelBoundary>,
}




/**
 * A scalar field on the local subdomain of a mesh. A field keeps track of
 * whether its guard cells are current: newly computed fields are unprepared,
 * and become prepared once their halo has been exchanged and a parallel
 * boundary condition applied. Differential operators require prepared
 * inputs.
 */
#[derive(Clone, Debug, Serialize)]
pub struct Field3D {
    shape: FieldShape,
    data: Vec<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
    #[serde(skip)]
    preparation: Preparation,
}




// ============================================================================
impl Field3D {

    /**
     * Generate a field with the same value everywhere.
     */
    pub fn constant(shape: FieldShape, value: f64) -> Self {
        Self::from_data(shape, vec![value; shape.len()])
    }


    /**
     * Generate a field with values defined from a closure of the index.
     */
    pub fn from_function<F>(shape: FieldShape, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> f64,
    {
        let mut data = Vec::with_capacity(shape.len());

        for i in 0..shape.nx {
            for j in 0..shape.ny {
                for k in 0..shape.nz {
                    data.push(f(i, j, k))
                }
            }
        }
        Self::from_data(shape, data)
    }


    /// `data` must hold `shape.len()` values in row-major order.
    pub(crate) fn from_data(shape: FieldShape, data: Vec<f64>) -> Self {
        Self {
            shape,
            data,
            attributes: BTreeMap::new(),
            preparation: Preparation::default(),
        }
    }


    pub fn shape(&self) -> FieldShape {
        self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.shape.offset(i, j, k)]
    }


    /**
     * Apply a function to every value, producing a new (unprepared) field.
     */
    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        Self::from_data(self.shape, self.data.iter().map(|&x| f(x)).collect())
    }

    pub fn sin(&self) -> Self {
        self.map(f64::sin)
    }


    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attributes<I, K, V>(&mut self, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in attributes {
            self.attributes.insert(key.into(), value.into());
        }
    }


    pub fn preparation(&self) -> Preparation {
        self.preparation
    }

    /**
     * Whether the halo has been exchanged and a parallel boundary condition
     * applied since the values were last computed.
     */
    pub fn is_prepared(&self) -> bool {
        self.preparation.halo_exchanged && self.preparation.parallel_boundary.is_some()
    }


    /**
     * Fill the y guard cells at both ends of the parallel direction from
     * interior values, according to the given condition. When there are
     * fewer interior points than guards, mirrored values are taken from the
     * far end of the interior.
     */
    pub fn apply_parallel_boundary(&mut self, condition: ParallelBoundary) -> Result<(), FieldError> {
        let shape = self.shape;
        let interior = shape.interior_y().len();

        if shape.myg == 0 {
            self.preparation.parallel_boundary = Some(condition);
            return Ok(());
        }
        if interior == 0 {
            return Err(FieldError::NoInterior { guards: shape.myg });
        }
        let (first, last) = (shape.myg, shape.ny - shape.myg - 1);

        for i in 0..shape.nx {
            for k in 0..shape.nz {
                for g in 0..shape.myg {
                    let lower = (first - 1 - g, (first + g).min(last), first);
                    let upper = (last + 1 + g, last.saturating_sub(g).max(first), last);

                    for &(guard, mirror, edge) in &[lower, upper] {
                        let value = match condition {
                            ParallelBoundary::NeumannO1 => self.get(i, edge, k),
                            ParallelBoundary::NeumannO2 => self.get(i, mirror, k),
                            ParallelBoundary::DirichletO2 => -self.get(i, mirror, k),
                        };
                        let n = shape.offset(i, guard, k);
                        self.data[n] = value;
                    }
                }
            }
        }
        self.preparation.parallel_boundary = Some(condition);
        Ok(())
    }


    /**
     * Copy out the values in the given range of x planes.
     */
    pub(crate) fn x_planes(&self, planes: Range<usize>) -> Vec<f64> {
        let stride = self.shape.ny * self.shape.nz;
        self.data[planes.start * stride..planes.end * stride].to_vec()
    }


    /**
     * Overwrite the values in a range of x planes, starting at `start`. Used
     * for filling guard cells, so the preparation state is left alone.
     */
    pub(crate) fn write_x_planes(&mut self, start: usize, values: &[f64]) {
        let stride = self.shape.ny * self.shape.nz;
        self.data[start * stride..start * stride + values.len()].copy_from_slice(values)
    }

    pub(crate) fn mark_exchanged(&mut self) {
        self.preparation.halo_exchanged = true;
    }


    fn zip_with<F: Fn(f64, f64) -> f64>(&self, other: &Field3D, f: F) -> Field3D {
        assert_eq!(
            self.shape, other.shape,
            "binary operation on fields of different shape");

        let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
        Self::from_data(self.shape, data)
    }
}




// ============================================================================
impl<'a> Add<&'a Field3D> for &'a Field3D {
    type Output = Field3D;

    fn add(self, other: &'a Field3D) -> Field3D {
        self.zip_with(other, |a, b| a + b)
    }
}

impl Add for Field3D {
    type Output = Field3D;

    fn add(self, other: Field3D) -> Field3D {
        &self + &other
    }
}

impl<'a> Mul<&'a Field3D> for &'a Field3D {
    type Output = Field3D;

    fn mul(self, other: &'a Field3D) -> Field3D {
        self.zip_with(other, |a, b| a * b)
    }
}

impl Mul for Field3D {
    type Output = Field3D;

    fn mul(self, other: Field3D) -> Field3D {
        &self * &other
    }
}

impl Mul<f64> for &Field3D {
    type Output = Field3D;

    fn mul(self, scale: f64) -> Field3D {
        self.map(|x| x * scale)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{Field3D, FieldError, FieldShape, ParallelBoundary};

    fn shape() -> FieldShape {
        FieldShape { nx: 3, ny: 6, nz: 2, mxg: 1, myg: 2 }
    }

    fn ramp() -> Field3D {
        Field3D::from_function(shape(), |i, j, k| (100 * i + 10 * j + k) as f64)
    }


    #[test]
    fn arithmetic_is_pointwise() {
        let a = Field3D::constant(shape(), 2.0);
        let b = ramp();
        let sum = &a + &b;
        let product = &a * &b;
        assert_eq!(sum.get(1, 2, 1), 2.0 + 121.0);
        assert_eq!(product.get(2, 5, 0), 2.0 * 250.0);
        assert_eq!((&b * 0.5).get(1, 0, 1), 50.5);
        assert_eq!(Field3D::constant(shape(), 0.0).sin().get(0, 0, 0), 0.0);
    }


    #[test]
    #[should_panic]
    fn arithmetic_on_mismatched_shapes_panics() {
        let other = FieldShape { nx: 4, ..shape() };
        let _ = &Field3D::constant(shape(), 1.0) + &Field3D::constant(other, 1.0);
    }


    #[test]
    fn neumann_o2_mirrors_interior_values() {
        let mut f = ramp();
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        // interior y is 2..4
        assert_eq!(f.get(1, 1, 0), f.get(1, 2, 0));
        assert_eq!(f.get(1, 0, 0), f.get(1, 3, 0));
        assert_eq!(f.get(1, 4, 1), f.get(1, 3, 1));
        assert_eq!(f.get(1, 5, 1), f.get(1, 2, 1));
    }


    #[test]
    fn other_conditions_fill_guards() {
        let mut f = ramp();
        f.apply_parallel_boundary(ParallelBoundary::NeumannO1).unwrap();
        assert_eq!(f.get(0, 0, 0), f.get(0, 2, 0));
        assert_eq!(f.get(0, 5, 0), f.get(0, 3, 0));

        let mut f = ramp();
        f.apply_parallel_boundary(ParallelBoundary::DirichletO2).unwrap();
        assert_eq!(f.get(2, 1, 1), -f.get(2, 2, 1));
    }


    #[test]
    fn a_single_interior_row_fills_every_guard() {
        let mut f = Field3D::from_function(FieldShape { ny: 5, ..shape() }, |i, j, k| (100 * i + 10 * j + k) as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        // interior y is 2..3
        for j in 0..5 {
            assert_eq!(f.get(1, j, 1), 121.0);
        }

        let mut f = Field3D::from_function(FieldShape { ny: 7, myg: 3, ..shape() }, |_, j, _| j as f64);
        f.apply_parallel_boundary(ParallelBoundary::DirichletO2).unwrap();
        assert_eq!((f.get(0, 2, 0), f.get(0, 1, 0), f.get(0, 0, 0)), (-3.0, -3.0, -3.0));
        assert_eq!(f.get(0, 6, 1), -3.0);
    }


    #[test]
    fn two_interior_rows_fill_three_guards() {
        let mut f = Field3D::from_function(FieldShape { nx: 1, ny: 8, nz: 1, mxg: 0, myg: 3 }, |_, j, _| j as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        // interior y is 3..5
        let column: Vec<_> = (0..8).map(|j| f.get(0, j, 0)).collect();
        assert_eq!(column, vec![4.0, 4.0, 3.0, 3.0, 4.0, 4.0, 3.0, 3.0]);
    }


    #[test]
    fn an_empty_interior_is_an_error() {
        let mut f = Field3D::constant(FieldShape { ny: 4, ..shape() }, 1.0);
        assert_eq!(
            f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap_err(),
            FieldError::NoInterior { guards: 2 });
    }


    #[test]
    fn preparation_needs_exchange_and_boundary() {
        let mut f = ramp();
        assert!(!f.is_prepared());
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
        assert!(!f.is_prepared());
        f.mark_exchanged();
        assert!(f.is_prepared());

        let g = &f + &f;
        assert!(!g.is_prepared());

        assert!(!f.map(|x| x + 1.0).is_prepared());
    }


    #[test]
    fn boundary_names_round_trip() {
        for bc in &[ParallelBoundary::NeumannO1, ParallelBoundary::NeumannO2, ParallelBoundary::DirichletO2] {
            assert_eq!(bc.name().parse::<ParallelBoundary>().unwrap(), *bc);
        }
        assert!("parallel_free".parse::<ParallelBoundary>().is_err());
    }


    #[test]
    fn attributes_accumulate() {
        let mut f = ramp();
        f.set_attributes(vec![("operator", "Delp2(f)"), ("function", "R")]);
        f.set_attributes(vec![("f", "R")]);
        assert_eq!(f.attributes().len(), 3);
        assert_eq!(f.attributes()["function"], "R");
    }
}
