//! One tape record per recorded assignment.

use std::fmt;
use std::rc::Rc;

use crate::expr::dynamic::DynExpr;
use crate::expr::Expression;
use crate::graph::idset::IdSet;
use crate::graph::info::VariableInfo;

/// The dependent leaf, the ordered independent leaves, and the local partials
/// the recording mode captured. Under the dynamic trace mode the partial
/// arrays stay empty and `exp` answers on demand.
pub struct StackEntry {
    pub w: Rc<VariableInfo>,
    pub ids: IdSet,
    /// ∂w/∂xᵢ.
    pub first: Vec<f64>,
    /// ∂²w/∂xᵢ² (diagonal recording modes).
    pub second: Vec<f64>,
    /// ∂³w/∂xᵢ³ (diagonal recording modes).
    pub third: Vec<f64>,
    /// Local Hessian, row-major n×n. Lower triangle only under the
    /// gradient-and-Hessian mode; readers canonicalize.
    pub second_mixed: Vec<f64>,
    /// Local third tensor, row-major n×n×n, symmetric.
    pub third_mixed: Vec<f64>,
    pub exp: Option<DynExpr>,
}

impl StackEntry {
    pub(crate) fn new(w: Rc<VariableInfo>, ids: IdSet) -> Self {
        StackEntry {
            w,
            ids,
            first: Vec::new(),
            second: Vec::new(),
            third: Vec::new(),
            second_mixed: Vec::new(),
            third_mixed: Vec::new(),
            exp: None,
        }
    }

    /// Number of independents.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// ∂w/∂xᵢ, from the recorded array or the dynamic clone.
    pub fn first_at(&self, i: usize) -> f64 {
        match &self.exp {
            Some(exp) => exp.d(self.ids.get(i).id()),
            None => self.first[i],
        }
    }

    /// ∂²w/∂xᵢ∂xⱼ. Array reads go through the canonical (max, min) cell so
    /// lower-triangle-only storage resolves too.
    pub fn second_at(&self, i: usize, j: usize) -> f64 {
        match &self.exp {
            Some(exp) => exp.d2(self.ids.get(i).id(), self.ids.get(j).id()),
            None => {
                let n = self.ids.len();
                let (hi, lo) = if i >= j { (i, j) } else { (j, i) };
                self.second_mixed[hi * n + lo]
            }
        }
    }

    /// ∂³w/∂xᵢ∂xⱼ∂xₖ.
    pub fn third_at(&self, i: usize, j: usize, k: usize) -> f64 {
        match &self.exp {
            Some(exp) => exp.d3(
                self.ids.get(i).id(),
                self.ids.get(j).id(),
                self.ids.get(k).id(),
            ),
            None => {
                let n = self.ids.len();
                self.third_mixed[(i * n + j) * n + k]
            }
        }
    }

    /// True when the entry can answer second-order queries.
    pub(crate) fn has_second(&self) -> bool {
        self.is_empty() || self.exp.is_some() || !self.second_mixed.is_empty()
    }

    /// True when the entry can answer third-order queries.
    pub(crate) fn has_third(&self) -> bool {
        self.is_empty() || self.exp.is_some() || !self.third_mixed.is_empty()
    }

    /// Any nonzero local curvature (drives sweep pruning).
    pub(crate) fn has_local_second(&self) -> bool {
        match &self.exp {
            Some(_) => !self.is_empty(),
            None => self.second_mixed.iter().any(|&v| v != 0.0),
        }
    }

    pub(crate) fn has_local_third(&self) -> bool {
        match &self.exp {
            Some(_) => !self.is_empty(),
            None => self.third_mixed.iter().any(|&v| v != 0.0),
        }
    }
}

impl fmt::Debug for StackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<u32> = self.ids.iter().map(|i| i.id()).collect();
        f.debug_struct("StackEntry")
            .field("w", &self.w.id())
            .field("ids", &ids)
            .field("first", &self.first)
            .field("dynamic", &self.exp.is_some())
            .finish()
    }
}
