//! The differentiable variable facade.
//!
//! A `Variable` is a cheap handle over a shared leaf info. Arithmetic on
//! variables builds expression trees; [`Variable::assign`] walks the tree
//! once against this thread's tape and appends exactly one record. Setting a
//! plain value never records.

use std::fmt;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};
use std::rc::Rc;

use crate::expr::binary::{impl_arith_ops, impl_f64_lhs, AddOp, Binary, BinaryOp, DivOp, MulOp, SubOp};
use crate::expr::dynamic::DynExpr;
use crate::expr::unary::{Unary, UnaryOp};
use crate::expr::{Expression, IntoExpr, Scalar};
use crate::graph::idset::{push_unique_id, IdSet};
use crate::graph::info::VariableInfo;
use crate::tape::TAPE;
use crate::transform::{ParameterTransformation, SinParameterTransformation};

pub struct Variable {
    info: Rc<VariableInfo>,
    min_b: f64,
    max_b: f64,
    bounded: bool,
    transform: Rc<dyn ParameterTransformation>,
}

impl Variable {
    pub fn new(value: f64) -> Self {
        Variable {
            info: VariableInfo::new(value),
            min_b: f64::NEG_INFINITY,
            max_b: f64::INFINITY,
            bounded: false,
            transform: Rc::new(SinParameterTransformation),
        }
    }

    pub fn named(value: f64, name: &str) -> Self {
        let v = Variable::new(value);
        *v.info.name.borrow_mut() = Some(name.to_string());
        v
    }

    /// A variable constrained to `[min, max]`; the initial value is clamped
    /// the same way [`set_value`](Variable::set_value) clamps.
    pub fn bounded(value: f64, min: f64, max: f64) -> Self {
        let mut v = Variable::new(0.0);
        v.min_b = min;
        v.max_b = max;
        v.bounded = true;
        v.set_value(value);
        v
    }

    /// Swap the bounds transformation (the sine map is the default).
    pub fn with_transformation(mut self, t: Rc<dyn ParameterTransformation>) -> Self {
        self.transform = t;
        self
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.info.value()
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.info.id()
    }

    /// Adjoint accumulated by the last sweep.
    #[inline]
    pub fn adjoint(&self) -> f64 {
        self.info.adjoint()
    }

    pub fn name(&self) -> Option<String> {
        self.info.name()
    }

    pub fn set_name(&self, name: &str) {
        *self.info.name.borrow_mut() = Some(name.to_string());
    }

    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.bounded
    }

    #[inline]
    pub fn min_boundary(&self) -> f64 {
        self.min_b
    }

    #[inline]
    pub fn max_boundary(&self) -> f64 {
        self.max_b
    }

    /// Write the primal without recording. Under bounds the value clamps
    /// into `[min, max]`; NaN resolves to the interval midpoint.
    pub fn set_value(&self, v: f64) {
        let v = if self.bounded {
            if v.is_nan() {
                0.5 * (self.min_b + self.max_b)
            } else {
                v.clamp(self.min_b, self.max_b)
            }
        } else {
            v
        };
        self.info.vvalue.set(v);
    }

    /// The value in the unconstrained space the optimizer works in.
    pub fn internal_value(&self) -> f64 {
        if self.bounded {
            self.transform
                .external_to_internal(self.value(), self.min_b, self.max_b)
        } else {
            self.value()
        }
    }

    /// Accept an optimizer step in the unconstrained space.
    pub fn update_value(&self, internal: f64) {
        if self.bounded {
            self.set_value(
                self.transform
                    .internal_to_external(internal, self.min_b, self.max_b),
            );
        } else {
            self.set_value(internal);
        }
    }

    /// d(external)/d(internal) at the current point; 1 when unbounded.
    pub fn internal_derivative(&self) -> f64 {
        if self.bounded {
            self.transform.derivative_internal_to_external(
                self.internal_value(),
                self.min_b,
                self.max_b,
            )
        } else {
            1.0
        }
    }

    /// Record-and-assign: evaluate `e` and its partials against this
    /// thread's tape under the active trace level. With recording off, only
    /// the value is stored.
    pub fn assign<E: IntoExpr>(&mut self, e: E) {
        let expr = e.into_expr();
        TAPE.with(|t| {
            let mut tape = t.borrow_mut();
            if !tape.recording() {
                self.info.vvalue.set(expr.value());
                return;
            }
            tape.record_assignment(&mut self.info, &expr);
        });
    }

    fn from_expr<E: Expression + IntoExpr>(expr: E) -> Self {
        let mut v = Variable::new(0.0);
        v.assign(expr);
        v
    }
}

impl Default for Variable {
    fn default() -> Self {
        Variable::new(0.0)
    }
}

impl Clone for Variable {
    /// Copies share the underlying info (and its adjoint).
    fn clone(&self) -> Self {
        Variable {
            info: Rc::clone(&self.info),
            min_b: self.min_b,
            max_b: self.max_b,
            bounded: self.bounded,
            transform: Rc::clone(&self.transform),
        }
    }
}

/* ── leaf node behaviour ──────────────────────────────────────────────── */

impl Expression for Variable {
    #[inline]
    fn value(&self) -> f64 {
        self.info.value()
    }

    fn push_ids(&self, set: &mut IdSet, nonlinear: bool) {
        set.insert(&self.info);
        if nonlinear {
            self.info.is_nl.set(true);
        }
    }

    fn push_ids_raw(&self, set: &mut Vec<u32>) {
        push_unique_id(set, self.info.id());
    }

    fn is_nonlinear(&self) -> bool {
        false
    }

    fn make_nl_interactions(&self, nonlinear: bool) {
        if nonlinear {
            self.info.has_nl_interaction.set(true);
        }
    }

    fn push_nl_interactions(&self, set: &mut IdSet) {
        if self.info.has_nl_interaction.get() {
            set.insert(&self.info);
        }
    }

    #[inline]
    fn d(&self, a: u32) -> f64 {
        if a == self.info.id() {
            1.0
        } else {
            0.0
        }
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
        DynExpr::Leaf(Rc::clone(&self.info))
    }
}

impl IntoExpr for Variable {
    type Output = Variable;
    fn into_expr(self) -> Variable {
        self
    }
}

impl IntoExpr for &Variable {
    type Output = Variable;
    fn into_expr(self) -> Variable {
        self.clone()
    }
}

/* ── conversions and comparisons ──────────────────────────────────────── */

impl From<f64> for Variable {
    fn from(v: f64) -> Self {
        Variable::new(v)
    }
}

impl From<f32> for Variable {
    fn from(v: f32) -> Self {
        Variable::new(v as f64)
    }
}

impl From<i32> for Variable {
    fn from(v: i32) -> Self {
        Variable::new(v as f64)
    }
}

impl From<Variable> for f64 {
    fn from(v: Variable) -> Self {
        v.value()
    }
}

impl<L: Expression, R: Expression, O: BinaryOp> From<Binary<L, R, O>> for Variable {
    fn from(expr: Binary<L, R, O>) -> Self {
        Variable::from_expr(expr)
    }
}

impl<A: Expression, O: UnaryOp> From<Unary<A, O>> for Variable {
    fn from(expr: Unary<A, O>) -> Self {
        Variable::from_expr(expr)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl PartialEq<f64> for Variable {
    fn eq(&self, other: &f64) -> bool {
        self.value() == *other
    }
}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value().partial_cmp(&other.value())
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable(id={}, value={})", self.id(), self.value())
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/* ── arithmetic surface ───────────────────────────────────────────────── */

impl_arith_ops!([] Variable => Variable, |s| s);
impl_arith_ops!(['a,] &'a Variable => Variable, |s: &Variable| s.clone());
impl_f64_lhs!([] Variable => Variable, |s| s);
impl_f64_lhs!(['a,] &'a Variable => Variable, |s: &Variable| s.clone());

macro_rules! impl_compound_assign {
    ($Trait:ident, $func:ident, $Op:ident) => {
        impl<E: Expression> $Trait<E> for Variable {
            fn $func(&mut self, rhs: E) {
                let expr = Binary::<_, _, $Op>::new(self.clone(), rhs);
                self.assign(expr);
            }
        }
        impl $Trait<f64> for Variable {
            fn $func(&mut self, rhs: f64) {
                let expr = Binary::<_, _, $Op>::new(self.clone(), Scalar(rhs));
                self.assign(expr);
            }
        }
        impl $Trait<&Variable> for Variable {
            fn $func(&mut self, rhs: &Variable) {
                let expr = Binary::<_, _, $Op>::new(self.clone(), rhs.clone());
                self.assign(expr);
            }
        }
    };
}

impl_compound_assign!(AddAssign, add_assign, AddOp);
impl_compound_assign!(SubAssign, sub_assign, SubOp);
impl_compound_assign!(MulAssign, mul_assign, MulOp);
impl_compound_assign!(DivAssign, div_assign, DivOp);
