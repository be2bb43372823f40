//! Expression-template node trees.
//!
//! Arithmetic on variables builds a typed tree of [`binary::Binary`] and
//! [`unary::Unary`] nodes; nothing touches the tape until the tree is
//! assigned to a [`Variable`](crate::variable::Variable), which walks it once
//! to fill a single tape record.

pub mod binary;
pub mod dynamic;
pub mod unary;

use crate::graph::idset::IdSet;
use crate::expr::dynamic::DynExpr;

/// The queries every arithmetic node answers: forward value, exact partials
/// up to third order against leaf ids, leaf enumeration and the nonlinearity
/// bookkeeping the higher-order recording modes use.
pub trait Expression: Clone {
    /// Current forward value. Composite nodes cache it at construction.
    fn value(&self) -> f64;

    /// Insert every leaf info this subexpression depends on. When
    /// `nonlinear` is true each inserted info is marked as participating in
    /// a nonlinear chain.
    fn push_ids(&self, set: &mut IdSet, nonlinear: bool);

    /// As [`push_ids`](Expression::push_ids), numeric ids only.
    fn push_ids_raw(&self, set: &mut Vec<u32>);

    /// Conservative: true unless the subexpression is affine in its leaves.
    fn is_nonlinear(&self) -> bool;

    /// Operator-local kink flag (`fabs`, `floor`, `ceil`, `min`, `max`).
    fn is_non_function(&self) -> bool {
        false
    }

    /// Propagate a nonlinear-interaction mark down the tree; every operator
    /// ORs in its own nonlinearity on the way down.
    fn make_nl_interactions(&self, nonlinear: bool);

    /// Collect the leaves carrying the nonlinear-interaction mark.
    fn push_nl_interactions(&self, set: &mut IdSet);

    /// ∂/∂xₐ at the current values.
    fn d(&self, a: u32) -> f64;

    /// ∂²/∂xₐ∂x_b at the current values.
    fn d2(&self, a: u32, b: u32) -> f64;

    /// ∂³/∂xₐ∂x_b∂x_c at the current values.
    fn d3(&self, a: u32, b: u32, c: u32) -> f64;

    /// Deep clone into an owned tagged-variant tree for deferred sweeps.
    fn dynamic_clone(&self) -> DynExpr;
}

/// Anything the math catalog and `pow`/`min`/`max` accept as an operand:
/// expression nodes pass through, `&Variable` clones its handle, `f64`
/// becomes a [`Scalar`].
pub trait IntoExpr {
    type Output: Expression;
    fn into_expr(self) -> Self::Output;
}

impl IntoExpr for f64 {
    type Output = Scalar;
    fn into_expr(self) -> Scalar {
        Scalar(self)
    }
}

/// Constant operand. Contributes nothing to any derivative or id set.
#[derive(Clone, Copy, Debug)]
pub struct Scalar(pub f64);

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar(v)
    }
}

impl Expression for Scalar {
    #[inline]
    fn value(&self) -> f64 {
        self.0
    }

    fn push_ids(&self, _set: &mut IdSet, _nonlinear: bool) {}

    fn push_ids_raw(&self, _set: &mut Vec<u32>) {}

    fn is_nonlinear(&self) -> bool {
        false
    }

    fn make_nl_interactions(&self, _nonlinear: bool) {}

    fn push_nl_interactions(&self, _set: &mut IdSet) {}

    #[inline]
    fn d(&self, _a: u32) -> f64 {
        0.0
    }

    #[inline]
    fn d2(&self, _a: u32, _b: u32) -> f64 {
        0.0
    }

    #[inline]
    fn d3(&self, _a: u32, _b: u32, _c: u32) -> f64 {
        0.0
    }

    fn dynamic_clone(&self) -> DynExpr {
        DynExpr::Scalar(self.0)
    }
}

impl IntoExpr for Scalar {
    type Output = Scalar;
    fn into_expr(self) -> Scalar {
        self
    }
}
