//! Perpendicular diffusion in the form used with flux-coordinate-independent
//! (FCI) parallel maps, where each poloidal plane is treated on its own.
//!

use super::{check, evaluate, OperatorError, Stencil};
use crate::field::Field3D;
use crate::mesh::Coordinates;




/**
 * `∇·(a ∇⊥f)` expanded by the product rule within the x-z plane:
 * `a (g11 ∂²f/∂x² + g33 ∂²f/∂z²) + g11 ∂a/∂x ∂f/∂x + g33 ∂a/∂z ∂f/∂z`,
 * with central differences throughout.
 */
pub fn div_a_grad_perp(coords: &Coordinates, a: &Field3D, f: &Field3D) -> Result<Field3D, OperatorError> {
    let shape = check(coords, &[("a", a), ("f", f)], 1, 0)?;
    let sa = Stencil::new(a, coords);
    let sf = Stencil::new(f, coords);
    let c = coords;

    evaluate(shape, |i, j, k| {
        let g11 = c.g11.get(i, j, k);
        let g33 = c.g33.get(i, j, k);

        a.get(i, j, k) * (g11 * sf.d2dx2(i, j, k) + g33 * sf.d2dz2(i, j, k))
            + g11 * sa.ddx(i, j, k) * sf.ddx(i, j, k)
            + g33 * sa.ddz(i, j, k) * sf.ddz(i, j, k)
    })
}
