//! The test functions and operators the harness cross-evaluates. Both lists
//! are fixed, and their order determines the output keys: entry `out_i` holds
//! function `i / OPERATORS.len()` under operator `i % OPERATORS.len()`.
//!

use crate::field::Field3D;
use crate::mesh::Coordinates;
use crate::ops::{self, OperatorError};




/// A named function of the radial and vertical coordinate fields.
#[derive(Clone, Copy)]
pub struct TestFunction {
    pub name: &'static str,
    pub evaluate: fn(&Field3D, &Field3D) -> Field3D,
}

/// A named differential operator, applied to a coefficient field and the
/// field it differentiates.
#[derive(Clone, Copy)]
pub struct Operator {
    pub name: &'static str,
    pub evaluate: fn(&Coordinates, &Field3D, &Field3D) -> Result<Field3D, OperatorError>,
}




pub static FUNCTIONS: &[TestFunction] = &[
    TestFunction {
        name: "R",
        evaluate: |r, _| r.clone(),
    },
    TestFunction {
        name: "R²",
        evaluate: |r, _| r * r,
    },
    TestFunction {
        name: "sin(R)",
        evaluate: |r, _| r.sin(),
    },
    TestFunction {
        name: "sin(Z)",
        evaluate: |_, z| z.sin(),
    },
    TestFunction {
        name: "sin(Z)*sin(R)",
        evaluate: |r, z| &z.sin() * &r.sin(),
    },
];

pub static OPERATORS: &[Operator] = &[
    Operator {
        name: "FV::Div_a_Grad_perp(1, f)",
        evaluate: ops::fv::div_a_grad_perp,
    },
    Operator {
        name: "FCI::Div_a_Grad_perp(1, f)",
        evaluate: ops::fci::div_a_grad_perp,
    },
    Operator {
        name: "Div_a_Grad_perp_nonorthog(1, f)",
        evaluate: ops::div_a_grad_perp_nonorthog,
    },
    Operator {
        name: "Delp2(f)",
        evaluate: |coords, _, f| ops::delp2(coords, f),
    },
    Operator {
        name: "Laplace(f)",
        evaluate: |coords, _, f| ops::laplace(coords, f),
    },
];




// ============================================================================
#[cfg(test)]
mod test {

    use super::{FUNCTIONS, OPERATORS};
    use crate::field::{Field3D, FieldShape};
    use approx::assert_relative_eq;

    #[test]
    fn catalog_order_is_fixed() {
        let functions: Vec<_> = FUNCTIONS.iter().map(|f| f.name).collect();
        let operators: Vec<_> = OPERATORS.iter().map(|o| o.name).collect();
        assert_eq!(functions, vec!["R", "R²", "sin(R)", "sin(Z)", "sin(Z)*sin(R)"]);
        assert_eq!(
            operators,
            vec![
                "FV::Div_a_Grad_perp(1, f)",
                "FCI::Div_a_Grad_perp(1, f)",
                "Div_a_Grad_perp_nonorthog(1, f)",
                "Delp2(f)",
                "Laplace(f)",
            ]
        );
    }


    #[test]
    fn functions_evaluate_pointwise() {
        let shape = FieldShape { nx: 3, ny: 1, nz: 1, mxg: 1, myg: 0 };
        let r = Field3D::constant(shape, 2.0);
        let z = Field3D::constant(shape, 0.5);
        let values: Vec<_> = FUNCTIONS.iter().map(|f| (f.evaluate)(&r, &z).get(1, 0, 0)).collect();

        assert_relative_eq!(values[0], 2.0);
        assert_relative_eq!(values[1], 4.0);
        assert_relative_eq!(values[2], 2f64.sin());
        assert_relative_eq!(values[3], 0.5f64.sin());
        assert_relative_eq!(values[4], 0.5f64.sin() * 2f64.sin());
    }
}
