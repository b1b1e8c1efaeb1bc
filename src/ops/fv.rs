//! Finite-volume form of the perpendicular diffusion operator.
//!

use super::{check, evaluate, km, kp, OperatorError};
use crate::field::Field3D;
use crate::mesh::Coordinates;




/**
 * `∇·(a ∇⊥f)` in conservative form. Fluxes are evaluated on the cell faces
 * between neighbouring points in x and z, with the face coefficient
 * `J a gii` and spacing averaged from the two cells, and the divergence is
 * the flux difference over the cell volume `J dx` (or `J dz`). The operator
 * conserves the integral of its result over a periodic domain.
 */
pub fn div_a_grad_perp(coords: &Coordinates, a: &Field3D, f: &Field3D) -> Result<Field3D, OperatorError> {
    let shape = check(coords, &[("a", a), ("f", f)], 1, 0)?;
    let c = coords;
    let jag11 = |i, j, k| c.jacobian.get(i, j, k) * a.get(i, j, k) * c.g11.get(i, j, k);
    let jag33 = |i, j, k| c.jacobian.get(i, j, k) * a.get(i, j, k) * c.g33.get(i, j, k);

    // flux through the face between (i, k) and (i + 1, k)
    let flux_x = |i: usize, j: usize, k: usize| {
        let coefficient = 0.5 * (jag11(i, j, k) + jag11(i + 1, j, k));
        let spacing = 0.5 * (c.dx.get(i, j, k) + c.dx.get(i + 1, j, k));
        coefficient * (f.get(i + 1, j, k) - f.get(i, j, k)) / spacing
    };

    // flux through the face between (i, k) and (i, k + 1), periodic in z
    let flux_z = |i: usize, j: usize, k: usize| {
        let p = kp(&shape, k);
        let coefficient = 0.5 * (jag33(i, j, k) + jag33(i, j, p));
        let spacing = 0.5 * (c.dz.get(i, j, k) + c.dz.get(i, j, p));
        coefficient * (f.get(i, j, p) - f.get(i, j, k)) / spacing
    };

    evaluate(shape, |i, j, k| {
        let volume = c.jacobian.get(i, j, k);
        let x = (flux_x(i, j, k) - flux_x(i - 1, j, k)) / (volume * c.dx.get(i, j, k));
        let z = (flux_z(i, j, k) - flux_z(i, j, km(&shape, k))) / (volume * c.dz.get(i, j, k));
        x + z
    })
}
