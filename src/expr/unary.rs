//! Unary operator nodes and the free-function math catalog.

use std::f64::consts::LN_10;
use std::marker::PhantomData;

use crate::expr::binary::{impl_arith_ops, impl_f64_lhs};
use crate::expr::dynamic::{DynExpr, UnaryFunc};
use crate::expr::{Expression, IntoExpr};
use crate::graph::idset::IdSet;

/// Derivatives of a one-argument primitive. `x` is the argument value, `v`
/// the already-computed function value (several derivatives are cheaper in
/// terms of `v`).
pub trait UnaryOp: Copy {
    const KIND: UnaryFunc;
    const NONLINEAR: bool = true;
    const NON_FUNCTION: bool = false;

    fn eval(x: f64) -> f64;
    fn d1(x: f64, v: f64) -> f64;
    fn d2(x: f64, v: f64) -> f64;
    fn d3(x: f64, v: f64) -> f64;
}

macro_rules! un_op {
    ($name:ident, $kind:ident, nonlinear = $nl:expr, non_function = $nf:expr,
     $eval:expr, $d1:expr, $d2:expr, $d3:expr) => {
        #[derive(Clone, Copy)]
        pub struct $name;
        impl UnaryOp for $name {
            const KIND: UnaryFunc = UnaryFunc::$kind;
            const NONLINEAR: bool = $nl;
            const NON_FUNCTION: bool = $nf;
            #[inline]
            fn eval(x: f64) -> f64 {
                ($eval)(x)
            }
            #[inline]
            fn d1(x: f64, v: f64) -> f64 {
                ($d1)(x, v)
            }
            #[inline]
            fn d2(x: f64, v: f64) -> f64 {
                ($d2)(x, v)
            }
            #[inline]
            fn d3(x: f64, v: f64) -> f64 {
                ($d3)(x, v)
            }
        }
    };
}

un_op!(ExpOp, Exp, nonlinear = true, non_function = false,
    f64::exp, |_x, v| v, |_x, v| v, |_x, v| v);
un_op!(LogOp, Log, nonlinear = true, non_function = false,
    f64::ln, |x: f64, _v| 1.0 / x, |x: f64, _v| -1.0 / (x * x), |x: f64, _v| 2.0 / (x * x * x));
un_op!(Log10Op, Log10, nonlinear = true, non_function = false,
    f64::log10,
    |x: f64, _v| 1.0 / (x * LN_10),
    |x: f64, _v| -1.0 / (x * x * LN_10),
    |x: f64, _v| 2.0 / (x * x * x * LN_10));
un_op!(SqrtOp, Sqrt, nonlinear = true, non_function = false,
    f64::sqrt,
    |_x, v: f64| 0.5 / v,
    |x: f64, v: f64| -0.25 / (x * v),
    |x: f64, v: f64| 0.375 / (x * x * v));
un_op!(SinOp, Sin, nonlinear = true, non_function = false,
    f64::sin, |x: f64, _v| x.cos(), |x: f64, _v| -x.sin(), |x: f64, _v| -x.cos());
un_op!(CosOp, Cos, nonlinear = true, non_function = false,
    f64::cos, |x: f64, _v| -x.sin(), |x: f64, _v| -x.cos(), |x: f64, _v| x.sin());
un_op!(TanOp, Tan, nonlinear = true, non_function = false,
    f64::tan,
    |_x, v: f64| 1.0 + v * v,
    |_x, v: f64| 2.0 * v * (1.0 + v * v),
    |_x, v: f64| {
        let s = 1.0 + v * v;
        2.0 * s * (1.0 + 3.0 * v * v)
    });
un_op!(AsinOp, Asin, nonlinear = true, non_function = false,
    f64::asin,
    |x: f64, _v| 1.0 / (1.0 - x * x).sqrt(),
    |x: f64, _v| x / (1.0 - x * x).powf(1.5),
    |x: f64, _v| (1.0 + 2.0 * x * x) / (1.0 - x * x).powf(2.5));
un_op!(AcosOp, Acos, nonlinear = true, non_function = false,
    f64::acos,
    |x: f64, _v| -1.0 / (1.0 - x * x).sqrt(),
    |x: f64, _v| -x / (1.0 - x * x).powf(1.5),
    |x: f64, _v| -(1.0 + 2.0 * x * x) / (1.0 - x * x).powf(2.5));
un_op!(AtanOp, Atan, nonlinear = true, non_function = false,
    f64::atan,
    |x: f64, _v| 1.0 / (1.0 + x * x),
    |x: f64, _v| {
        let w = 1.0 + x * x;
        -2.0 * x / (w * w)
    },
    |x: f64, _v| {
        let w = 1.0 + x * x;
        (6.0 * x * x - 2.0) / (w * w * w)
    });
un_op!(SinhOp, Sinh, nonlinear = true, non_function = false,
    f64::sinh, |x: f64, _v| x.cosh(), |x: f64, _v| x.sinh(), |x: f64, _v| x.cosh());
un_op!(CoshOp, Cosh, nonlinear = true, non_function = false,
    f64::cosh, |x: f64, _v| x.sinh(), |x: f64, _v| x.cosh(), |x: f64, _v| x.sinh());
un_op!(TanhOp, Tanh, nonlinear = true, non_function = false,
    f64::tanh,
    |_x, v: f64| 1.0 - v * v,
    |_x, v: f64| -2.0 * v * (1.0 - v * v),
    |_x, v: f64| {
        let s = 1.0 - v * v;
        -2.0 * s * (1.0 - 3.0 * v * v)
    });
// Kinked primitives: first derivative is the right-hand limit, higher orders
// vanish away from the kink.
un_op!(FabsOp, Fabs, nonlinear = false, non_function = true,
    f64::abs,
    |x: f64, _v| if x >= 0.0 { 1.0 } else { -1.0 },
    |_x, _v| 0.0,
    |_x, _v| 0.0);
un_op!(FloorOp, Floor, nonlinear = false, non_function = true,
    f64::floor, |_x, _v| 0.0, |_x, _v| 0.0, |_x, _v| 0.0);
un_op!(CeilOp, Ceil, nonlinear = false, non_function = true,
    f64::ceil, |_x, _v| 0.0, |_x, _v| 0.0, |_x, _v| 0.0);

/* ── the node ──────────────────────────────────────────────────────────── */

/// One-child node; caches the forward value at construction.
#[derive(Clone)]
pub struct Unary<A, O> {
    a: A,
    val: f64,
    _op: PhantomData<O>,
}

impl<A: Expression, O: UnaryOp> Unary<A, O> {
    pub(crate) fn new(a: A) -> Self {
        let val = O::eval(a.value());
        Unary {
            a,
            val,
            _op: PhantomData,
        }
    }
}

impl<A: Expression, O: UnaryOp> Expression for Unary<A, O> {
    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    fn push_ids(&self, set: &mut IdSet, nonlinear: bool) {
        self.a.push_ids(set, nonlinear);
    }

    fn push_ids_raw(&self, set: &mut Vec<u32>) {
        self.a.push_ids_raw(set);
    }

    fn is_nonlinear(&self) -> bool {
        O::NONLINEAR || self.a.is_nonlinear()
    }

    fn is_non_function(&self) -> bool {
        O::NON_FUNCTION
    }

    fn make_nl_interactions(&self, nonlinear: bool) {
        self.a.make_nl_interactions(nonlinear || O::NONLINEAR);
    }

    fn push_nl_interactions(&self, set: &mut IdSet) {
        self.a.push_nl_interactions(set);
    }

    fn d(&self, a: u32) -> f64 {
        O::d1(self.a.value(), self.val) * self.a.d(a)
    }

    fn d2(&self, a: u32, b: u32) -> f64 {
        let x = self.a.value();
        let (ga, gb) = (self.a.d(a), self.a.d(b));
        O::d2(x, self.val) * ga * gb + O::d1(x, self.val) * self.a.d2(a, b)
    }

    fn d3(&self, a: u32, b: u32, c: u32) -> f64 {
        let x = self.a.value();
        let (ga, gb, gc) = (self.a.d(a), self.a.d(b), self.a.d(c));
        let (gab, gac, gbc) = (self.a.d2(a, b), self.a.d2(a, c), self.a.d2(b, c));
        O::d3(x, self.val) * ga * gb * gc
            + O::d2(x, self.val) * (gab * gc + gac * gb + gbc * ga)
            + O::d1(x, self.val) * self.a.d3(a, b, c)
    }

    fn dynamic_clone(&self) -> DynExpr {
        DynExpr::unary(O::KIND, self.a.dynamic_clone())
    }
}

impl<A: Expression, O: UnaryOp> IntoExpr for Unary<A, O> {
    type Output = Self;
    fn into_expr(self) -> Self {
        self
    }
}

impl_arith_ops!([A: Expression, O: UnaryOp,] Unary<A, O> => Unary<A, O>, |s| s);
impl_f64_lhs!([A: Expression, O: UnaryOp,] Unary<A, O> => Unary<A, O>, |s| s);

/* ── free-function catalog (unary half) ────────────────────────────────── */

macro_rules! un_fn {
    ($fn_name:ident, $Op:ident) => {
        #[inline]
        pub fn $fn_name<E: IntoExpr>(e: E) -> Unary<E::Output, $Op> {
            Unary::new(e.into_expr())
        }
    };
}

un_fn!(exp, ExpOp);
un_fn!(log, LogOp);
un_fn!(log10, Log10Op);
un_fn!(sqrt, SqrtOp);
un_fn!(sin, SinOp);
un_fn!(cos, CosOp);
un_fn!(tan, TanOp);
un_fn!(asin, AsinOp);
un_fn!(acos, AcosOp);
un_fn!(atan, AtanOp);
un_fn!(sinh, SinhOp);
un_fn!(cosh, CoshOp);
un_fn!(tanh, TanhOp);
un_fn!(fabs, FabsOp);
un_fn!(floor, FloorOp);
un_fn!(ceil, CeilOp);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    // central finite differences for the first three orders
    fn fd3<F: Fn(f64) -> f64 + Copy>(f: F, x: f64) -> (f64, f64, f64) {
        let h = 1e-4;
        let d1 = (f(x + h) - f(x - h)) / (2.0 * h);
        let d2 = (f(x + h) - 2.0 * f(x) + f(x - h)) / (h * h);
        let d3 = (f(x + 2.0 * h) - 2.0 * f(x + h) + 2.0 * f(x - h) - f(x - 2.0 * h))
            / (2.0 * h * h * h);
        (d1, d2, d3)
    }

    fn check<O: UnaryOp>(f: fn(f64) -> f64, x: f64) {
        let v = O::eval(x);
        let (d1, d2, d3) = fd3(f, x);
        assert!((O::d1(x, v) - d1).abs() < 1e-5, "d1 at {x}");
        assert!((O::d2(x, v) - d2).abs() < 1e-4, "d2 at {x}");
        assert!((O::d3(x, v) - d3).abs() < 1e-2, "d3 at {x}");
    }

    #[test]
    fn closed_forms_match_finite_differences() {
        check::<ExpOp>(f64::exp, 0.8);
        check::<LogOp>(f64::ln, 1.7);
        check::<Log10Op>(f64::log10, 2.4);
        check::<SqrtOp>(f64::sqrt, 1.9);
        check::<SinOp>(f64::sin, 0.6);
        check::<CosOp>(f64::cos, 0.6);
        check::<TanOp>(f64::tan, 0.4);
        check::<AsinOp>(f64::asin, 0.3);
        check::<AcosOp>(f64::acos, 0.3);
        check::<AtanOp>(f64::atan, 0.9);
        check::<SinhOp>(f64::sinh, 0.5);
        check::<CoshOp>(f64::cosh, 0.5);
        check::<TanhOp>(f64::tanh, 0.5);
    }

    #[test]
    fn chain_rule_through_composition() {
        // d/dx sin(x²) = 2x·cos(x²)
        let x = Variable::new(0.9);
        let e = sin(&x * &x);
        let xv = 0.9f64;
        assert!((e.d(x.id()) - 2.0 * xv * (xv * xv).cos()).abs() < 1e-12);
        // d²/dx² = 2cos(x²) − 4x²·sin(x²)
        let expect = 2.0 * (xv * xv).cos() - 4.0 * xv * xv * (xv * xv).sin();
        assert!((e.d2(x.id(), x.id()) - expect).abs() < 1e-12);
    }

    #[test]
    fn domain_edges_propagate_ieee() {
        let x = Variable::new(0.0);
        let lg = log(&x);
        assert_eq!(lg.value(), f64::NEG_INFINITY);
        assert_eq!(lg.d(x.id()), f64::INFINITY);
        let rt = sqrt(&x);
        assert_eq!(rt.value(), 0.0);
        assert_eq!(rt.d(x.id()), f64::INFINITY);
        let y = Variable::new(-2.0);
        assert!(log(&y).value().is_nan());
    }

    #[test]
    fn kinked_primitives() {
        let x = Variable::new(0.0);
        let ab = fabs(&x);
        assert!(ab.is_non_function());
        assert_eq!(ab.d(x.id()), 1.0); // right-hand limit at the kink
        assert_eq!(ab.d2(x.id(), x.id()), 0.0);
        let y = Variable::new(-1.3);
        assert_eq!(fabs(&y).d(y.id()), -1.0);
        assert_eq!(floor(&y).d(y.id()), 0.0);
        assert_eq!(ceil(&y).d(y.id()), 0.0);
        assert!(floor(&y).is_non_function());
    }

    #[test]
    fn negation_is_zero_minus() {
        let x = Variable::new(2.5);
        let e = -&x;
        assert_eq!(e.value(), -2.5);
        assert_eq!(e.d(x.id()), -1.0);
    }
}
