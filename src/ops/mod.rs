//! Differential operators on `Field3D`s. These are the operators the
//! harness exercises: second-order finite differences in x and in the
//! periodic z direction, plus the parallel (y) direction for `laplace`.
//! Every operator takes the mesh geometry explicitly and reads the guard
//! cells of its inputs, so inputs must be prepared (halo exchanged and
//! parallel boundary applied). Results are computed on interior points and
//! are zero in guard cells.
//!

use crate::field::{Field3D, FieldShape};
use crate::mesh::Coordinates;

pub mod fci;
pub mod fv;
mod nonorthog;

pub use nonorthog::div_a_grad_perp_nonorthog;




#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OperatorError {
    #[error("argument '{argument}' has stale guard cells: communicate it and apply a parallel boundary first")]
    Unprepared { argument: &'static str },
    #[error("operator needs {needed_x} x and {needed_y} y guard cells, the mesh has {mxg} and {myg}")]
    InsufficientGuards {
        needed_x: usize,
        needed_y: usize,
        mxg: usize,
        myg: usize,
    },
    #[error("argument '{argument}' does not have the shape of the mesh geometry")]
    ShapeMismatch { argument: &'static str },
    #[error("non-finite result at ({i}, {j}, {k})")]
    NonFinite { i: usize, j: usize, k: usize },
}




/**
 * Check an operator's preconditions: the argument is prepared and shaped
 * like the geometry, and the mesh has enough guard cells.
 */
fn check(
    coords: &Coordinates,
    arguments: &[(&'static str, &Field3D)],
    needed_x: usize,
    needed_y: usize,
) -> Result<FieldShape, OperatorError> {
    let shape = coords.shape();

    for &(argument, field) in arguments {
        if field.shape() != shape {
            return Err(OperatorError::ShapeMismatch { argument });
        }
        if !field.is_prepared() {
            return Err(OperatorError::Unprepared { argument });
        }
    }
    if shape.mxg < needed_x || shape.myg < needed_y {
        return Err(OperatorError::InsufficientGuards {
            needed_x,
            needed_y,
            mxg: shape.mxg,
            myg: shape.myg,
        });
    }
    Ok(shape)
}




/**
 * Evaluate a pointwise expression on interior points, and fail if it is not
 * finite anywhere.
 */
fn evaluate<F>(shape: FieldShape, f: F) -> Result<Field3D, OperatorError>
where
    F: Fn(usize, usize, usize) -> f64,
{
    let mut data = vec![0.0; shape.len()];

    for i in shape.interior_x() {
        for j in shape.interior_y() {
            for k in 0..shape.nz {
                let value = f(i, j, k);
                if !value.is_finite() {
                    return Err(OperatorError::NonFinite { i, j, k });
                }
                data[shape.offset(i, j, k)] = value;
            }
        }
    }
    Ok(Field3D::from_data(shape, data))
}




/**
 * Periodic neighbours in z.
 */
fn kp(shape: &FieldShape, k: usize) -> usize {
    (k + 1) % shape.nz
}

fn km(shape: &FieldShape, k: usize) -> usize {
    (k + shape.nz - 1) % shape.nz
}




/**
 * Central first and second differences of a field at a point. Spacings are
 * taken from the point itself.
 */
struct Stencil<'a> {
    f: &'a Field3D,
    coords: &'a Coordinates,
}

impl<'a> Stencil<'a> {
    fn new(f: &'a Field3D, coords: &'a Coordinates) -> Self {
        Self { f, coords }
    }

    fn ddx(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.f.get(i + 1, j, k) - self.f.get(i - 1, j, k)) / (2.0 * self.coords.dx.get(i, j, k))
    }

    fn ddz(&self, i: usize, j: usize, k: usize) -> f64 {
        let s = self.f.shape();
        (self.f.get(i, j, kp(&s, k)) - self.f.get(i, j, km(&s, k))) / (2.0 * self.coords.dz.get(i, j, k))
    }

    fn d2dx2(&self, i: usize, j: usize, k: usize) -> f64 {
        let dx = self.coords.dx.get(i, j, k);
        (self.f.get(i + 1, j, k) - 2.0 * self.f.get(i, j, k) + self.f.get(i - 1, j, k)) / (dx * dx)
    }

    fn d2dz2(&self, i: usize, j: usize, k: usize) -> f64 {
        let s = self.f.shape();
        let dz = self.coords.dz.get(i, j, k);
        (self.f.get(i, j, kp(&s, k)) - 2.0 * self.f.get(i, j, k) + self.f.get(i, j, km(&s, k))) / (dz * dz)
    }

    fn d2dxdz(&self, i: usize, j: usize, k: usize) -> f64 {
        let s = self.f.shape();
        let (p, m) = (kp(&s, k), km(&s, k));
        let dx = self.coords.dx.get(i, j, k);
        let dz = self.coords.dz.get(i, j, k);
        (self.f.get(i + 1, j, p) - self.f.get(i + 1, j, m) - self.f.get(i - 1, j, p) + self.f.get(i - 1, j, m))
            / (4.0 * dx * dz)
    }
}




/**
 * The perpendicular Laplacian in the x-z plane,
 * `g11 ∂²f/∂x² + g33 ∂²f/∂z² + 2 g13 ∂²f/∂x∂z`.
 */
pub fn delp2(coords: &Coordinates, f: &Field3D) -> Result<Field3D, OperatorError> {
    let shape = check(coords, &[("f", f)], 1, 0)?;
    let s = Stencil::new(f, coords);
    let c = coords;

    evaluate(shape, |i, j, k| {
        c.g11.get(i, j, k) * s.d2dx2(i, j, k)
            + c.g33.get(i, j, k) * s.d2dz2(i, j, k)
            + 2.0 * c.g13.get(i, j, k) * s.d2dxdz(i, j, k)
    })
}




/**
 * The full Laplacian: `delp2` plus the parallel term
 * `(1/J) ∂/∂y (J g22 ∂f/∂y)`, which reads the y guard cells. On a mesh
 * without y guards there is no flux through the outermost y faces.
 */
pub fn laplace(coords: &Coordinates, f: &Field3D) -> Result<Field3D, OperatorError> {
    let shape = check(coords, &[("f", f)], 1, 0)?;
    let perp = delp2(coords, f)?;
    let c = coords;
    let jg22 = |i, j, k| c.jacobian.get(i, j, k) * c.g22.get(i, j, k);

    // flux through the face between j and j + 1
    let flux_y = |i: usize, j: usize, k: usize| {
        if j + 1 >= shape.ny {
            return 0.0;
        }
        0.5 * (jg22(i, j, k) + jg22(i, j + 1, k)) * (f.get(i, j + 1, k) - f.get(i, j, k))
    };

    evaluate(shape, |i, j, k| {
        let dy = c.dy.get(i, j, k);
        let down = if j > 0 { flux_y(i, j - 1, k) } else { 0.0 };
        perp.get(i, j, k) + (flux_y(i, j, k) - down) / (c.jacobian.get(i, j, k) * dy * dy)
    })
}




// ============================================================================
#[cfg(test)]
pub(crate) mod test {

    use super::{delp2, laplace, OperatorError};
    use crate::field::{Field3D, FieldShape, ParallelBoundary};
    use crate::mesh::Coordinates;
    use approx::assert_relative_eq;

    pub(crate) fn shape() -> FieldShape {
        FieldShape { nx: 8, ny: 5, nz: 4, mxg: 2, myg: 1 }
    }

    /// Unit orthogonal geometry with the given spacings, already prepared.
    pub(crate) fn coordinates(shape: FieldShape, dx: f64, dy: f64, dz: f64) -> Coordinates {
        let mut coords = Coordinates::orthogonal(shape, dx, dy, dz);
        for field in coords.parallel_fields_mut().iter_mut() {
            prepare(field);
        }
        coords
    }

    pub(crate) fn prepare(field: &mut Field3D) {
        field.mark_exchanged();
        field.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
    }

    pub(crate) fn prepared<F: Fn(usize, usize, usize) -> f64>(shape: FieldShape, f: F) -> Field3D {
        let mut field = Field3D::from_function(shape, f);
        field.mark_exchanged();
        field
    }


    #[test]
    fn delp2_of_a_parabola_in_x_is_constant() {
        let coords = coordinates(shape(), 1.0, 1.0, 1.0);
        let mut f = prepared(shape(), |i, _, _| (i * i) as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        let result = delp2(&coords, &f).unwrap();
        for i in shape().interior_x() {
            assert_relative_eq!(result.get(i, 2, 1), 2.0);
        }
        assert_eq!(result.get(0, 2, 1), 0.0);
    }


    #[test]
    fn delp2_in_z_matches_the_discrete_second_difference() {
        let dz = 2.0 * std::f64::consts::PI / 4.0;
        let coords = coordinates(shape(), 1.0, 1.0, dz);
        let mut f = prepared(shape(), |_, _, k| (k as f64 * dz).cos());
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        let result = delp2(&coords, &f).unwrap();
        let factor = (2.0 * dz.cos() - 2.0) / (dz * dz);
        for k in 0..4 {
            assert_relative_eq!(result.get(3, 2, k), factor * f.get(3, 2, k), epsilon = 1e-12);
        }
    }


    #[test]
    fn laplace_adds_the_parallel_second_derivative() {
        let coords = coordinates(shape(), 1.0, 1.0, 1.0);
        let mut f = prepared(shape(), |i, j, _| (i * i + j * j) as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO1).unwrap();

        // interior y is 1..4, so only j = 2 sees interior neighbours on both sides
        let result = laplace(&coords, &f).unwrap();
        assert_relative_eq!(result.get(3, 2, 0), 4.0);
    }


    #[test]
    fn unprepared_inputs_are_rejected() {
        let coords = coordinates(shape(), 1.0, 1.0, 1.0);
        let f = Field3D::constant(shape(), 1.0);
        assert_eq!(delp2(&coords, &f).unwrap_err(), OperatorError::Unprepared { argument: "f" });

        let mut f = Field3D::constant(shape(), 1.0);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
        assert_eq!(laplace(&coords, &f).unwrap_err(), OperatorError::Unprepared { argument: "f" });
    }


    #[test]
    fn laplace_without_parallel_guards_closes_the_y_ends() {
        let shape = FieldShape { myg: 0, ny: 3, ..shape() };
        let coords = coordinates(shape, 1.0, 1.0, 1.0);
        let mut f = prepared(shape, |_, j, _| (j * j) as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();

        let result = laplace(&coords, &f).unwrap();
        assert_relative_eq!(result.get(3, 0, 0), 1.0);
        assert_relative_eq!(result.get(3, 1, 0), 2.0);
        assert_relative_eq!(result.get(3, 2, 0), -3.0);
    }


    #[test]
    fn laplace_needs_an_x_guard() {
        let shape = FieldShape { mxg: 0, nx: 4, ..shape() };
        let coords = coordinates(shape, 1.0, 1.0, 1.0);
        let mut f = prepared(shape, |_, _, _| 1.0);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
        assert_eq!(
            laplace(&coords, &f).unwrap_err(),
            OperatorError::InsufficientGuards { needed_x: 1, needed_y: 0, mxg: 0, myg: 1 });
    }


    #[test]
    fn fields_from_another_mesh_are_rejected() {
        let coords = coordinates(shape(), 1.0, 1.0, 1.0);
        let mut f = prepared(FieldShape { nz: 2, ..shape() }, |_, _, _| 1.0);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
        assert_eq!(delp2(&coords, &f).unwrap_err(), OperatorError::ShapeMismatch { argument: "f" });
    }


    #[test]
    fn singular_spacing_is_reported_as_non_finite() {
        let coords = coordinates(shape(), 0.0, 1.0, 1.0);
        let mut f = prepared(shape(), |i, _, _| i as f64);
        f.apply_parallel_boundary(ParallelBoundary::NeumannO2).unwrap();
        assert!(matches!(delp2(&coords, &f), Err(OperatorError::NonFinite { i: 2, j: 1, k: 0 })));
    }
}
