use super::{check, evaluate, km, kp, OperatorError, Stencil};
use crate::field::Field3D;
use crate::mesh::Coordinates;




/**
 * `∇·(a ∇⊥f)` on a non-orthogonal mesh, in divergence form
 *
 * `(1/J) ∂/∂x (J a (g⊥11 ∂f/∂x + g⊥13 ∂f/∂z)) + (1/J) ∂/∂z (J a (g⊥13 ∂f/∂x + g⊥33 ∂f/∂z))`
 *
 * where the perpendicular metric removes the parallel component,
 * `g⊥ij = gij - gi2 gj2 / g22`. Fluxes live on cell faces. The derivative
 * normal to a face is a compact difference across it, and the cross
 * derivative is the average of the central differences in the two cells, so
 * one x guard cell is enough.
 */
pub fn div_a_grad_perp_nonorthog(
    coords: &Coordinates,
    a: &Field3D,
    f: &Field3D,
) -> Result<Field3D, OperatorError> {
    let shape = check(coords, &[("a", a), ("f", f)], 1, 0)?;
    let s = Stencil::new(f, coords);
    let c = coords;

    let perp = |i, j, k, gij: f64, gi2: f64, gj2: f64| gij - gi2 * gj2 / c.g22.get(i, j, k);
    let g11 = |i, j, k| perp(i, j, k, c.g11.get(i, j, k), c.g12.get(i, j, k), c.g12.get(i, j, k));
    let g33 = |i, j, k| perp(i, j, k, c.g33.get(i, j, k), c.g23.get(i, j, k), c.g23.get(i, j, k));
    let g13 = |i, j, k| perp(i, j, k, c.g13.get(i, j, k), c.g12.get(i, j, k), c.g23.get(i, j, k));
    let ja = |i, j, k| c.jacobian.get(i, j, k) * a.get(i, j, k);

    // flux through the face between (i, k) and (i + 1, k)
    let flux_x = |i: usize, j: usize, k: usize| {
        let face = |g: &dyn Fn(usize, usize, usize) -> f64| {
            0.5 * (ja(i, j, k) * g(i, j, k) + ja(i + 1, j, k) * g(i + 1, j, k))
        };
        let spacing = 0.5 * (c.dx.get(i, j, k) + c.dx.get(i + 1, j, k));
        let ddx = (f.get(i + 1, j, k) - f.get(i, j, k)) / spacing;
        let ddz = 0.5 * (s.ddz(i, j, k) + s.ddz(i + 1, j, k));
        face(&g11) * ddx + face(&g13) * ddz
    };

    // flux through the face between (i, k) and (i, k + 1), periodic in z
    let flux_z = |i: usize, j: usize, k: usize| {
        let p = kp(&shape, k);
        let face = |g: &dyn Fn(usize, usize, usize) -> f64| {
            0.5 * (ja(i, j, k) * g(i, j, k) + ja(i, j, p) * g(i, j, p))
        };
        let spacing = 0.5 * (c.dz.get(i, j, k) + c.dz.get(i, j, p));
        let ddz = (f.get(i, j, p) - f.get(i, j, k)) / spacing;
        let ddx = 0.5 * (s.ddx(i, j, k) + s.ddx(i, j, p));
        face(&g13) * ddx + face(&g33) * ddz
    };

    evaluate(shape, |i, j, k| {
        let jacobian = c.jacobian.get(i, j, k);
        let x = (flux_x(i, j, k) - flux_x(i - 1, j, k)) / c.dx.get(i, j, k);
        let z = (flux_z(i, j, k) - flux_z(i, j, km(&shape, k))) / c.dz.get(i, j, k);
        (x + z) / jacobian
    })
}
