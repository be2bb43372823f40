//! Owned, type-erased expression trees for the deferred-evaluation mode.
//!
//! The typed node tree lives only for the statement that builds it; a tape
//! entry recorded under the dynamic trace mode keeps this tagged-variant
//! clone instead of derivative arrays and re-evaluates partials during the
//! sweep.

use std::rc::Rc;

use crate::expr::binary::{
    AddOp, BinaryOp, DivOp, MaxOp, MinOp, MulOp, PowOp, SubOp,
};
use crate::expr::unary::{
    AcosOp, AsinOp, AtanOp, CeilOp, CosOp, CoshOp, ExpOp, FabsOp, FloorOp, Log10Op, LogOp, SinOp,
    SinhOp, SqrtOp, TanOp, TanhOp, UnaryOp,
};
use crate::expr::Expression;
use crate::graph::idset::{push_unique_id, IdSet};
use crate::graph::info::VariableInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryFunc {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryFunc {
    Exp,
    Log,
    Log10,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Fabs,
    Floor,
    Ceil,
}

macro_rules! dispatch_bin {
    ($kind:expr, $f:ident($($a:expr),*)) => {
        match $kind {
            BinaryFunc::Add => AddOp::$f($($a),*),
            BinaryFunc::Sub => SubOp::$f($($a),*),
            BinaryFunc::Mul => MulOp::$f($($a),*),
            BinaryFunc::Div => DivOp::$f($($a),*),
            BinaryFunc::Pow => PowOp::$f($($a),*),
            BinaryFunc::Min => MinOp::$f($($a),*),
            BinaryFunc::Max => MaxOp::$f($($a),*),
        }
    };
}

macro_rules! dispatch_bin_const {
    ($kind:expr, $c:ident) => {
        match $kind {
            BinaryFunc::Add => AddOp::$c,
            BinaryFunc::Sub => SubOp::$c,
            BinaryFunc::Mul => MulOp::$c,
            BinaryFunc::Div => DivOp::$c,
            BinaryFunc::Pow => PowOp::$c,
            BinaryFunc::Min => MinOp::$c,
            BinaryFunc::Max => MaxOp::$c,
        }
    };
}

impl BinaryFunc {
    pub(crate) fn eval(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, eval(l, r))
    }
    fn d_l(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_l(l, r))
    }
    fn d_r(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_r(l, r))
    }
    fn d_ll(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_ll(l, r))
    }
    fn d_lr(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_lr(l, r))
    }
    fn d_rr(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_rr(l, r))
    }
    fn d_lll(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_lll(l, r))
    }
    fn d_llr(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_llr(l, r))
    }
    fn d_lrr(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_lrr(l, r))
    }
    fn d_rrr(self, l: f64, r: f64) -> f64 {
        dispatch_bin!(self, d_rrr(l, r))
    }
    fn nonlinear(self) -> bool {
        dispatch_bin_const!(self, NONLINEAR)
    }
    fn non_function(self) -> bool {
        dispatch_bin_const!(self, NON_FUNCTION)
    }
}

macro_rules! dispatch_un {
    ($kind:expr, $f:ident($($a:expr),*)) => {
        match $kind {
            UnaryFunc::Exp => ExpOp::$f($($a),*),
            UnaryFunc::Log => LogOp::$f($($a),*),
            UnaryFunc::Log10 => Log10Op::$f($($a),*),
            UnaryFunc::Sqrt => SqrtOp::$f($($a),*),
            UnaryFunc::Sin => SinOp::$f($($a),*),
            UnaryFunc::Cos => CosOp::$f($($a),*),
            UnaryFunc::Tan => TanOp::$f($($a),*),
            UnaryFunc::Asin => AsinOp::$f($($a),*),
            UnaryFunc::Acos => AcosOp::$f($($a),*),
            UnaryFunc::Atan => AtanOp::$f($($a),*),
            UnaryFunc::Sinh => SinhOp::$f($($a),*),
            UnaryFunc::Cosh => CoshOp::$f($($a),*),
            UnaryFunc::Tanh => TanhOp::$f($($a),*),
            UnaryFunc::Fabs => FabsOp::$f($($a),*),
            UnaryFunc::Floor => FloorOp::$f($($a),*),
            UnaryFunc::Ceil => CeilOp::$f($($a),*),
        }
    };
}

macro_rules! dispatch_un_const {
    ($kind:expr, $c:ident) => {
        match $kind {
            UnaryFunc::Exp => ExpOp::$c,
            UnaryFunc::Log => LogOp::$c,
            UnaryFunc::Log10 => Log10Op::$c,
            UnaryFunc::Sqrt => SqrtOp::$c,
            UnaryFunc::Sin => SinOp::$c,
            UnaryFunc::Cos => CosOp::$c,
            UnaryFunc::Tan => TanOp::$c,
            UnaryFunc::Asin => AsinOp::$c,
            UnaryFunc::Acos => AcosOp::$c,
            UnaryFunc::Atan => AtanOp::$c,
            UnaryFunc::Sinh => SinhOp::$c,
            UnaryFunc::Cosh => CoshOp::$c,
            UnaryFunc::Tanh => TanhOp::$c,
            UnaryFunc::Fabs => FabsOp::$c,
            UnaryFunc::Floor => FloorOp::$c,
            UnaryFunc::Ceil => CeilOp::$c,
        }
    };
}

impl UnaryFunc {
    pub(crate) fn eval(self, x: f64) -> f64 {
        dispatch_un!(self, eval(x))
    }
    fn d1(self, x: f64, v: f64) -> f64 {
        dispatch_un!(self, d1(x, v))
    }
    fn d2(self, x: f64, v: f64) -> f64 {
        dispatch_un!(self, d2(x, v))
    }
    fn d3(self, x: f64, v: f64) -> f64 {
        dispatch_un!(self, d3(x, v))
    }
    fn nonlinear(self) -> bool {
        dispatch_un_const!(self, NONLINEAR)
    }
    fn non_function(self) -> bool {
        dispatch_un_const!(self, NON_FUNCTION)
    }
}

/// Owned expression tree. Forward values are frozen at clone time (the same
/// point the typed tree froze them); partials are evaluated on demand.
#[derive(Clone, Debug)]
pub enum DynExpr {
    Scalar(f64),
    Leaf(Rc<VariableInfo>),
    Unary {
        op: UnaryFunc,
        val: f64,
        arg: Box<DynExpr>,
    },
    Binary {
        op: BinaryFunc,
        val: f64,
        l: Box<DynExpr>,
        r: Box<DynExpr>,
    },
}

impl DynExpr {
    pub(crate) fn unary(op: UnaryFunc, arg: DynExpr) -> Self {
        let val = op.eval(arg.value());
        DynExpr::Unary {
            op,
            val,
            arg: Box::new(arg),
        }
    }

    pub(crate) fn binary(op: BinaryFunc, l: DynExpr, r: DynExpr) -> Self {
        let val = op.eval(l.value(), r.value());
        DynExpr::Binary {
            op,
            val,
            l: Box::new(l),
            r: Box::new(r),
        }
    }
}

impl Expression for DynExpr {
    fn value(&self) -> f64 {
        match self {
            DynExpr::Scalar(v) => *v,
            DynExpr::Leaf(info) => info.value(),
            DynExpr::Unary { val, .. } => *val,
            DynExpr::Binary { val, .. } => *val,
        }
    }

    fn push_ids(&self, set: &mut IdSet, nonlinear: bool) {
        match self {
            DynExpr::Scalar(_) => {}
            DynExpr::Leaf(info) => {
                set.insert(info);
                if nonlinear {
                    info.is_nl.set(true);
                }
            }
            DynExpr::Unary { arg, .. } => arg.push_ids(set, nonlinear),
            DynExpr::Binary { l, r, .. } => {
                l.push_ids(set, nonlinear);
                r.push_ids(set, nonlinear);
            }
        }
    }

    fn push_ids_raw(&self, set: &mut Vec<u32>) {
        match self {
            DynExpr::Scalar(_) => {}
            DynExpr::Leaf(info) => push_unique_id(set, info.id()),
            DynExpr::Unary { arg, .. } => arg.push_ids_raw(set),
            DynExpr::Binary { l, r, .. } => {
                l.push_ids_raw(set);
                r.push_ids_raw(set);
            }
        }
    }

    fn is_nonlinear(&self) -> bool {
        match self {
            DynExpr::Scalar(_) | DynExpr::Leaf(_) => false,
            DynExpr::Unary { op, arg, .. } => op.nonlinear() || arg.is_nonlinear(),
            DynExpr::Binary { op, l, r, .. } => {
                op.nonlinear() || l.is_nonlinear() || r.is_nonlinear()
            }
        }
    }

    fn is_non_function(&self) -> bool {
        match self {
            DynExpr::Unary { op, .. } => op.non_function(),
            DynExpr::Binary { op, .. } => op.non_function(),
            _ => false,
        }
    }

    fn make_nl_interactions(&self, nonlinear: bool) {
        match self {
            DynExpr::Scalar(_) => {}
            DynExpr::Leaf(info) => {
                if nonlinear {
                    info.has_nl_interaction.set(true);
                }
            }
            DynExpr::Unary { op, arg, .. } => {
                arg.make_nl_interactions(nonlinear || op.nonlinear())
            }
            DynExpr::Binary { op, l, r, .. } => {
                let nl = nonlinear || op.nonlinear();
                l.make_nl_interactions(nl);
                r.make_nl_interactions(nl);
            }
        }
    }

    fn push_nl_interactions(&self, set: &mut IdSet) {
        match self {
            DynExpr::Scalar(_) => {}
            DynExpr::Leaf(info) => {
                if info.has_nl_interaction.get() {
                    set.insert(info);
                }
            }
            DynExpr::Unary { arg, .. } => arg.push_nl_interactions(set),
            DynExpr::Binary { l, r, .. } => {
                l.push_nl_interactions(set);
                r.push_nl_interactions(set);
            }
        }
    }

    fn d(&self, a: u32) -> f64 {
        match self {
            DynExpr::Scalar(_) => 0.0,
            DynExpr::Leaf(info) => {
                if info.id() == a {
                    1.0
                } else {
                    0.0
                }
            }
            DynExpr::Unary { op, val, arg } => op.d1(arg.value(), *val) * arg.d(a),
            DynExpr::Binary { op, l, r, .. } => {
                let (lv, rv) = (l.value(), r.value());
                op.d_l(lv, rv) * l.d(a) + op.d_r(lv, rv) * r.d(a)
            }
        }
    }

    fn d2(&self, a: u32, b: u32) -> f64 {
        match self {
            DynExpr::Scalar(_) | DynExpr::Leaf(_) => 0.0,
            DynExpr::Unary { op, val, arg } => {
                let x = arg.value();
                op.d2(x, *val) * arg.d(a) * arg.d(b) + op.d1(x, *val) * arg.d2(a, b)
            }
            DynExpr::Binary { op, l, r, .. } => {
                let (lv, rv) = (l.value(), r.value());
                let (la, lb) = (l.d(a), l.d(b));
                let (ra, rb) = (r.d(a), r.d(b));
                op.d_ll(lv, rv) * la * lb
                    + op.d_lr(lv, rv) * (la * rb + lb * ra)
                    + op.d_rr(lv, rv) * ra * rb
                    + op.d_l(lv, rv) * l.d2(a, b)
                    + op.d_r(lv, rv) * r.d2(a, b)
            }
        }
    }

    fn d3(&self, a: u32, b: u32, c: u32) -> f64 {
        match self {
            DynExpr::Scalar(_) | DynExpr::Leaf(_) => 0.0,
            DynExpr::Unary { op, val, arg } => {
                let x = arg.value();
                let (ga, gb, gc) = (arg.d(a), arg.d(b), arg.d(c));
                let (gab, gac, gbc) = (arg.d2(a, b), arg.d2(a, c), arg.d2(b, c));
                op.d3(x, *val) * ga * gb * gc
                    + op.d2(x, *val) * (gab * gc + gac * gb + gbc * ga)
                    + op.d1(x, *val) * arg.d3(a, b, c)
            }
            DynExpr::Binary { op, l, r, .. } => {
                let (lv, rv) = (l.value(), r.value());
                let (la, lb, lc) = (l.d(a), l.d(b), l.d(c));
                let (ra, rb, rc) = (r.d(a), r.d(b), r.d(c));
                let (lab, lac, lbc) = (l.d2(a, b), l.d2(a, c), l.d2(b, c));
                let (rab, rac, rbc) = (r.d2(a, b), r.d2(a, c), r.d2(b, c));
                op.d_lll(lv, rv) * la * lb * lc
                    + op.d_llr(lv, rv) * (la * lb * rc + la * rb * lc + ra * lb * lc)
                    + op.d_lrr(lv, rv) * (la * rb * rc + ra * lb * rc + ra * rb * lc)
                    + op.d_rrr(lv, rv) * ra * rb * rc
                    + op.d_ll(lv, rv) * (lab * lc + lac * lb + lbc * la)
                    + op.d_lr(lv, rv)
                        * (lab * rc + lac * rb + lbc * ra + rab * lc + rac * lb + rbc * la)
                    + op.d_rr(lv, rv) * (rab * rc + rac * rb + rbc * ra)
                    + op.d_l(lv, rv) * l.d3(a, b, c)
                    + op.d_r(lv, rv) * r.d3(a, b, c)
            }
        }
    }

    fn dynamic_clone(&self) -> DynExpr {
        self.clone()
    }
}

impl crate::expr::IntoExpr for DynExpr {
    type Output = DynExpr;
    fn into_expr(self) -> DynExpr {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::binary::pow;
    use crate::expr::unary::sin;
    use crate::variable::Variable;

    #[test]
    fn clone_matches_typed_tree() {
        let x = Variable::new(1.2);
        let y = Variable::new(0.4);
        let e = pow(&x, 2.0) * sin(&y) + &x / &y;
        let dy = e.dynamic_clone();
        assert!((dy.value() - e.value()).abs() < 1e-15);
        for id in [x.id(), y.id()] {
            assert!((dy.d(id) - e.d(id)).abs() < 1e-12);
        }
        assert!((dy.d2(x.id(), y.id()) - e.d2(x.id(), y.id())).abs() < 1e-12);
        assert!(
            (dy.d3(x.id(), x.id(), y.id()) - e.d3(x.id(), x.id(), y.id())).abs() < 1e-12
        );
    }

    #[test]
    fn leaf_reads_current_value() {
        let x = Variable::new(2.0);
        let dy = x.dynamic_clone();
        x.set_value(5.0);
        assert_eq!(dy.value(), 5.0);
    }

    #[test]
    fn raw_id_collection() {
        let x = Variable::new(1.0);
        let y = Variable::new(2.0);
        let e = &x * &y + &x;
        let dy = e.dynamic_clone();
        let mut raw = Vec::new();
        dy.push_ids_raw(&mut raw);
        assert_eq!(raw, vec![x.id(), y.id()]);
    }
}
