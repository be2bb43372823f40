//! Binary operator nodes and the arithmetic-overload surface.

use std::marker::PhantomData;

use crate::expr::dynamic::{BinaryFunc, DynExpr};
use crate::expr::{Expression, IntoExpr, Scalar};
use crate::graph::idset::IdSet;

/// Partials of a two-argument primitive at `(l, r)`, up to third order.
/// Mixed orders read left-to-right: `d_llr` is ∂³f/∂l∂l∂r.
pub trait BinaryOp: Copy {
    const KIND: BinaryFunc;
    const NONLINEAR: bool;
    const NON_FUNCTION: bool = false;

    fn eval(l: f64, r: f64) -> f64;
    fn d_l(l: f64, r: f64) -> f64;
    fn d_r(l: f64, r: f64) -> f64;
    fn d_ll(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_lr(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_rr(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_lll(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_llr(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_lrr(_l: f64, _r: f64) -> f64 {
        0.0
    }
    fn d_rrr(_l: f64, _r: f64) -> f64 {
        0.0
    }
}

#[derive(Clone, Copy)]
pub struct AddOp;
impl BinaryOp for AddOp {
    const KIND: BinaryFunc = BinaryFunc::Add;
    const NONLINEAR: bool = false;
    fn eval(l: f64, r: f64) -> f64 {
        l + r
    }
    fn d_l(_l: f64, _r: f64) -> f64 {
        1.0
    }
    fn d_r(_l: f64, _r: f64) -> f64 {
        1.0
    }
}

#[derive(Clone, Copy)]
pub struct SubOp;
impl BinaryOp for SubOp {
    const KIND: BinaryFunc = BinaryFunc::Sub;
    const NONLINEAR: bool = false;
    fn eval(l: f64, r: f64) -> f64 {
        l - r
    }
    fn d_l(_l: f64, _r: f64) -> f64 {
        1.0
    }
    fn d_r(_l: f64, _r: f64) -> f64 {
        -1.0
    }
}

#[derive(Clone, Copy)]
pub struct MulOp;
impl BinaryOp for MulOp {
    const KIND: BinaryFunc = BinaryFunc::Mul;
    const NONLINEAR: bool = true;
    fn eval(l: f64, r: f64) -> f64 {
        l * r
    }
    fn d_l(_l: f64, r: f64) -> f64 {
        r
    }
    fn d_r(l: f64, _r: f64) -> f64 {
        l
    }
    fn d_lr(_l: f64, _r: f64) -> f64 {
        1.0
    }
}

#[derive(Clone, Copy)]
pub struct DivOp;
impl BinaryOp for DivOp {
    const KIND: BinaryFunc = BinaryFunc::Div;
    const NONLINEAR: bool = true;
    fn eval(l: f64, r: f64) -> f64 {
        l / r
    }
    fn d_l(_l: f64, r: f64) -> f64 {
        1.0 / r
    }
    fn d_r(l: f64, r: f64) -> f64 {
        -l / (r * r)
    }
    fn d_lr(_l: f64, r: f64) -> f64 {
        -1.0 / (r * r)
    }
    fn d_rr(l: f64, r: f64) -> f64 {
        2.0 * l / (r * r * r)
    }
    fn d_lrr(_l: f64, r: f64) -> f64 {
        2.0 / (r * r * r)
    }
    fn d_rrr(l: f64, r: f64) -> f64 {
        -6.0 * l / (r * r * r * r)
    }
}

#[derive(Clone, Copy)]
pub struct PowOp;
impl BinaryOp for PowOp {
    const KIND: BinaryFunc = BinaryFunc::Pow;
    const NONLINEAR: bool = true;
    fn eval(l: f64, r: f64) -> f64 {
        l.powf(r)
    }
    fn d_l(l: f64, r: f64) -> f64 {
        r * l.powf(r - 1.0)
    }
    fn d_r(l: f64, r: f64) -> f64 {
        l.powf(r) * l.ln()
    }
    fn d_ll(l: f64, r: f64) -> f64 {
        r * (r - 1.0) * l.powf(r - 2.0)
    }
    fn d_lr(l: f64, r: f64) -> f64 {
        l.powf(r - 1.0) * (1.0 + r * l.ln())
    }
    fn d_rr(l: f64, r: f64) -> f64 {
        let ln = l.ln();
        l.powf(r) * ln * ln
    }
    fn d_lll(l: f64, r: f64) -> f64 {
        r * (r - 1.0) * (r - 2.0) * l.powf(r - 3.0)
    }
    fn d_llr(l: f64, r: f64) -> f64 {
        l.powf(r - 2.0) * ((2.0 * r - 1.0) + r * (r - 1.0) * l.ln())
    }
    fn d_lrr(l: f64, r: f64) -> f64 {
        let ln = l.ln();
        l.powf(r - 1.0) * ln * (2.0 + r * ln)
    }
    fn d_rrr(l: f64, r: f64) -> f64 {
        let ln = l.ln();
        l.powf(r) * ln * ln * ln
    }
}

// Ties take the left side, same right-hand-limit convention as fabs at 0.
#[derive(Clone, Copy)]
pub struct MinOp;
impl BinaryOp for MinOp {
    const KIND: BinaryFunc = BinaryFunc::Min;
    const NONLINEAR: bool = false;
    const NON_FUNCTION: bool = true;
    fn eval(l: f64, r: f64) -> f64 {
        l.min(r)
    }
    fn d_l(l: f64, r: f64) -> f64 {
        if l <= r {
            1.0
        } else {
            0.0
        }
    }
    fn d_r(l: f64, r: f64) -> f64 {
        if l <= r {
            0.0
        } else {
            1.0
        }
    }
}

#[derive(Clone, Copy)]
pub struct MaxOp;
impl BinaryOp for MaxOp {
    const KIND: BinaryFunc = BinaryFunc::Max;
    const NONLINEAR: bool = false;
    const NON_FUNCTION: bool = true;
    fn eval(l: f64, r: f64) -> f64 {
        l.max(r)
    }
    fn d_l(l: f64, r: f64) -> f64 {
        if l >= r {
            1.0
        } else {
            0.0
        }
    }
    fn d_r(l: f64, r: f64) -> f64 {
        if l >= r {
            0.0
        } else {
            1.0
        }
    }
}

/* ── the node ──────────────────────────────────────────────────────────── */

/// Two-child node. Owns its operands (leaves are `Rc` bumps) and caches the
/// forward value at construction.
#[derive(Clone)]
pub struct Binary<L, R, O> {
    l: L,
    r: R,
    val: f64,
    _op: PhantomData<O>,
}

impl<L: Expression, R: Expression, O: BinaryOp> Binary<L, R, O> {
    pub(crate) fn new(l: L, r: R) -> Self {
        let val = O::eval(l.value(), r.value());
        Binary {
            l,
            r,
            val,
            _op: PhantomData,
        }
    }
}

impl<L: Expression, R: Expression, O: BinaryOp> Expression for Binary<L, R, O> {
    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    fn push_ids(&self, set: &mut IdSet, nonlinear: bool) {
        self.l.push_ids(set, nonlinear);
        self.r.push_ids(set, nonlinear);
    }

    fn push_ids_raw(&self, set: &mut Vec<u32>) {
        self.l.push_ids_raw(set);
        self.r.push_ids_raw(set);
    }

    fn is_nonlinear(&self) -> bool {
        O::NONLINEAR || self.l.is_nonlinear() || self.r.is_nonlinear()
    }

    fn is_non_function(&self) -> bool {
        O::NON_FUNCTION
    }

    fn make_nl_interactions(&self, nonlinear: bool) {
        let nl = nonlinear || O::NONLINEAR;
        self.l.make_nl_interactions(nl);
        self.r.make_nl_interactions(nl);
    }

    fn push_nl_interactions(&self, set: &mut IdSet) {
        self.l.push_nl_interactions(set);
        self.r.push_nl_interactions(set);
    }

    fn d(&self, a: u32) -> f64 {
        let (lv, rv) = (self.l.value(), self.r.value());
        O::d_l(lv, rv) * self.l.d(a) + O::d_r(lv, rv) * self.r.d(a)
    }

    fn d2(&self, a: u32, b: u32) -> f64 {
        let (lv, rv) = (self.l.value(), self.r.value());
        let (la, lb) = (self.l.d(a), self.l.d(b));
        let (ra, rb) = (self.r.d(a), self.r.d(b));
        O::d_ll(lv, rv) * la * lb
            + O::d_lr(lv, rv) * (la * rb + lb * ra)
            + O::d_rr(lv, rv) * ra * rb
            + O::d_l(lv, rv) * self.l.d2(a, b)
            + O::d_r(lv, rv) * self.r.d2(a, b)
    }

    fn d3(&self, a: u32, b: u32, c: u32) -> f64 {
        let (lv, rv) = (self.l.value(), self.r.value());
        let (la, lb, lc) = (self.l.d(a), self.l.d(b), self.l.d(c));
        let (ra, rb, rc) = (self.r.d(a), self.r.d(b), self.r.d(c));
        let (lab, lac, lbc) = (self.l.d2(a, b), self.l.d2(a, c), self.l.d2(b, c));
        let (rab, rac, rbc) = (self.r.d2(a, b), self.r.d2(a, c), self.r.d2(b, c));
        O::d_lll(lv, rv) * la * lb * lc
            + O::d_llr(lv, rv) * (la * lb * rc + la * rb * lc + ra * lb * lc)
            + O::d_lrr(lv, rv) * (la * rb * rc + ra * lb * rc + ra * rb * lc)
            + O::d_rrr(lv, rv) * ra * rb * rc
            + O::d_ll(lv, rv) * (lab * lc + lac * lb + lbc * la)
            + O::d_lr(lv, rv) * (lab * rc + lac * rb + lbc * ra + rab * lc + rac * lb + rbc * la)
            + O::d_rr(lv, rv) * (rab * rc + rac * rb + rbc * ra)
            + O::d_l(lv, rv) * self.l.d3(a, b, c)
            + O::d_r(lv, rv) * self.r.d3(a, b, c)
    }

    fn dynamic_clone(&self) -> DynExpr {
        DynExpr::binary(O::KIND, self.l.dynamic_clone(), self.r.dynamic_clone())
    }
}

impl<L: Expression, R: Expression, O: BinaryOp> IntoExpr for Binary<L, R, O> {
    type Output = Self;
    fn into_expr(self) -> Self {
        self
    }
}

/* ── operator overloads ────────────────────────────────────────────────── */

/// Implements `+ - * /` (against expressions, `f64` and `&Variable`) and
/// unary negation for one operand type. `$N` is the node type the operand
/// converts into; `$conv` performs that conversion.
macro_rules! impl_arith_ops {
    ([$($g:tt)*] $T:ty => $N:ty, $conv:expr) => {
        impl<$($g)* Rhs: $crate::expr::Expression> ::std::ops::Add<Rhs> for $T {
            type Output = $crate::expr::binary::Binary<$N, Rhs, $crate::expr::binary::AddOp>;
            fn add(self, rhs: Rhs) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs)
            }
        }
        impl<$($g)* Rhs: $crate::expr::Expression> ::std::ops::Sub<Rhs> for $T {
            type Output = $crate::expr::binary::Binary<$N, Rhs, $crate::expr::binary::SubOp>;
            fn sub(self, rhs: Rhs) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs)
            }
        }
        impl<$($g)* Rhs: $crate::expr::Expression> ::std::ops::Mul<Rhs> for $T {
            type Output = $crate::expr::binary::Binary<$N, Rhs, $crate::expr::binary::MulOp>;
            fn mul(self, rhs: Rhs) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs)
            }
        }
        impl<$($g)* Rhs: $crate::expr::Expression> ::std::ops::Div<Rhs> for $T {
            type Output = $crate::expr::binary::Binary<$N, Rhs, $crate::expr::binary::DivOp>;
            fn div(self, rhs: Rhs) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs)
            }
        }
        impl<$($g)*> ::std::ops::Add<f64> for $T {
            type Output =
                $crate::expr::binary::Binary<$N, $crate::expr::Scalar, $crate::expr::binary::AddOp>;
            fn add(self, rhs: f64) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), $crate::expr::Scalar(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Sub<f64> for $T {
            type Output =
                $crate::expr::binary::Binary<$N, $crate::expr::Scalar, $crate::expr::binary::SubOp>;
            fn sub(self, rhs: f64) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), $crate::expr::Scalar(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Mul<f64> for $T {
            type Output =
                $crate::expr::binary::Binary<$N, $crate::expr::Scalar, $crate::expr::binary::MulOp>;
            fn mul(self, rhs: f64) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), $crate::expr::Scalar(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Div<f64> for $T {
            type Output =
                $crate::expr::binary::Binary<$N, $crate::expr::Scalar, $crate::expr::binary::DivOp>;
            fn div(self, rhs: f64) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), $crate::expr::Scalar(rhs))
            }
        }
        impl<'v, $($g)*> ::std::ops::Add<&'v $crate::variable::Variable> for $T {
            type Output = $crate::expr::binary::Binary<
                $N,
                $crate::variable::Variable,
                $crate::expr::binary::AddOp,
            >;
            fn add(self, rhs: &'v $crate::variable::Variable) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs.clone())
            }
        }
        impl<'v, $($g)*> ::std::ops::Sub<&'v $crate::variable::Variable> for $T {
            type Output = $crate::expr::binary::Binary<
                $N,
                $crate::variable::Variable,
                $crate::expr::binary::SubOp,
            >;
            fn sub(self, rhs: &'v $crate::variable::Variable) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs.clone())
            }
        }
        impl<'v, $($g)*> ::std::ops::Mul<&'v $crate::variable::Variable> for $T {
            type Output = $crate::expr::binary::Binary<
                $N,
                $crate::variable::Variable,
                $crate::expr::binary::MulOp,
            >;
            fn mul(self, rhs: &'v $crate::variable::Variable) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs.clone())
            }
        }
        impl<'v, $($g)*> ::std::ops::Div<&'v $crate::variable::Variable> for $T {
            type Output = $crate::expr::binary::Binary<
                $N,
                $crate::variable::Variable,
                $crate::expr::binary::DivOp,
            >;
            fn div(self, rhs: &'v $crate::variable::Variable) -> Self::Output {
                $crate::expr::binary::Binary::new(($conv)(self), rhs.clone())
            }
        }
        impl<$($g)*> ::std::ops::Neg for $T {
            type Output = $crate::expr::binary::Binary<
                $crate::expr::Scalar,
                $N,
                $crate::expr::binary::SubOp,
            >;
            fn neg(self) -> Self::Output {
                $crate::expr::binary::Binary::new($crate::expr::Scalar(0.0), ($conv)(self))
            }
        }
    };
}
pub(crate) use impl_arith_ops;

/// `f64` on the left of `+ - * /`. `$N`/`$conv` as in [`impl_arith_ops`].
macro_rules! impl_f64_lhs {
    ([$($g:tt)*] $T:ty => $N:ty, $conv:expr) => {
        impl<$($g)*> ::std::ops::Add<$T> for f64 {
            type Output =
                $crate::expr::binary::Binary<$crate::expr::Scalar, $N, $crate::expr::binary::AddOp>;
            fn add(self, rhs: $T) -> Self::Output {
                $crate::expr::binary::Binary::new($crate::expr::Scalar(self), ($conv)(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Sub<$T> for f64 {
            type Output =
                $crate::expr::binary::Binary<$crate::expr::Scalar, $N, $crate::expr::binary::SubOp>;
            fn sub(self, rhs: $T) -> Self::Output {
                $crate::expr::binary::Binary::new($crate::expr::Scalar(self), ($conv)(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Mul<$T> for f64 {
            type Output =
                $crate::expr::binary::Binary<$crate::expr::Scalar, $N, $crate::expr::binary::MulOp>;
            fn mul(self, rhs: $T) -> Self::Output {
                $crate::expr::binary::Binary::new($crate::expr::Scalar(self), ($conv)(rhs))
            }
        }
        impl<$($g)*> ::std::ops::Div<$T> for f64 {
            type Output =
                $crate::expr::binary::Binary<$crate::expr::Scalar, $N, $crate::expr::binary::DivOp>;
            fn div(self, rhs: $T) -> Self::Output {
                $crate::expr::binary::Binary::new($crate::expr::Scalar(self), ($conv)(rhs))
            }
        }
    };
}
pub(crate) use impl_f64_lhs;

impl_arith_ops!([] Scalar => Scalar, |s| s);
impl_arith_ops!(
    [L: Expression, R: Expression, O: BinaryOp,] Binary<L, R, O> => Binary<L, R, O>,
    |s| s
);
impl_f64_lhs!([L: Expression, R: Expression, O: BinaryOp,] Binary<L, R, O> => Binary<L, R, O>, |s| s);

/* ── free-function catalog (binary half) ───────────────────────────────── */

#[inline]
pub fn pow<L: IntoExpr, R: IntoExpr>(l: L, r: R) -> Binary<L::Output, R::Output, PowOp> {
    Binary::new(l.into_expr(), r.into_expr())
}

#[inline]
pub fn min<L: IntoExpr, R: IntoExpr>(l: L, r: R) -> Binary<L::Output, R::Output, MinOp> {
    Binary::new(l.into_expr(), r.into_expr())
}

#[inline]
pub fn max<L: IntoExpr, R: IntoExpr>(l: L, r: R) -> Binary<L::Output, R::Output, MaxOp> {
    Binary::new(l.into_expr(), r.into_expr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Variable;

    fn fd<F: Fn(f64) -> f64>(f: F, x: f64) -> f64 {
        let h = 1e-6 * x.abs().max(1.0);
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn product_partials() {
        let x = Variable::new(2.0);
        let y = Variable::new(3.0);
        let e = &x * &y;
        assert_eq!(e.value(), 6.0);
        assert_eq!(e.d(x.id()), 3.0);
        assert_eq!(e.d(y.id()), 2.0);
        assert_eq!(e.d2(x.id(), y.id()), 1.0);
        assert_eq!(e.d2(x.id(), x.id()), 0.0);
        assert_eq!(e.d3(x.id(), y.id(), x.id()), 0.0);
    }

    #[test]
    fn quotient_partials_match_finite_differences() {
        let x = Variable::new(1.7);
        let y = Variable::new(-0.8);
        let e = &x / &y;
        let (xv, yv) = (1.7, -0.8);
        assert!((e.d(x.id()) - fd(|l| l / yv, xv)).abs() < 1e-6);
        assert!((e.d(y.id()) - fd(|r| xv / r, yv)).abs() < 1e-6);
        assert!((e.d2(y.id(), y.id()) - 2.0 * xv / (yv * yv * yv)).abs() < 1e-12);
        assert!((e.d3(y.id(), y.id(), y.id()) + 6.0 * xv / (yv * yv * yv * yv)).abs() < 1e-12);
        assert!((e.d3(x.id(), y.id(), y.id()) - 2.0 / (yv * yv * yv)).abs() < 1e-12);
    }

    #[test]
    fn pow_against_closed_form() {
        let x = Variable::new(0.5);
        let e = pow(&x, 3.0);
        assert!((e.d(x.id()) - 0.75).abs() < 1e-12);
        assert!((e.d2(x.id(), x.id()) - 3.0).abs() < 1e-12);
        assert!((e.d3(x.id(), x.id(), x.id()) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn pow_with_variable_exponent() {
        let x = Variable::new(1.3);
        let y = Variable::new(2.2);
        let e = pow(&x, &y);
        let (xv, yv): (f64, f64) = (1.3, 2.2);
        assert!((e.d(y.id()) - xv.powf(yv) * xv.ln()).abs() < 1e-12);
        // mixed second partial: l^(r-1)·(1 + r·ln l)
        let expect = xv.powf(yv - 1.0) * (1.0 + yv * xv.ln());
        assert!((e.d2(x.id(), y.id()) - expect).abs() < 1e-12);
    }

    #[test]
    fn third_order_symmetry_under_permutation() {
        let x = Variable::new(0.7);
        let y = Variable::new(1.9);
        let e = pow(&x, &y) / (&y + 2.0);
        let (a, b) = (x.id(), y.id());
        let reference = e.d3(a, a, b);
        for (p, q, r) in [(a, b, a), (b, a, a)] {
            assert!((e.d3(p, q, r) - reference).abs() < 1e-12);
        }
    }

    #[test]
    fn min_max_kinks() {
        let x = Variable::new(1.0);
        let y = Variable::new(1.0);
        let lo = min(&x, &y);
        let hi = max(&x, &y);
        assert!(lo.is_non_function());
        assert!(!lo.is_nonlinear());
        // ties take the left operand
        assert_eq!(lo.d(x.id()), 1.0);
        assert_eq!(lo.d(y.id()), 0.0);
        assert_eq!(hi.d(x.id()), 1.0);
        assert_eq!(hi.d2(x.id(), x.id()), 0.0);
    }

    #[test]
    fn affine_tree_is_not_nonlinear() {
        let x = Variable::new(1.0);
        let y = Variable::new(2.0);
        assert!(!(&x + &y).is_nonlinear());
        assert!((&x * &y).is_nonlinear());
    }
}
