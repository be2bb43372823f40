//! Leaf records shared between variables and tape entries.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::graph::idset::IdSet;

/// Sentinel for "never appeared in a nonlinear context".
pub const PUSH_START_NONE: usize = usize::MAX;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Mint the next process-wide leaf identifier.
#[inline]
pub(crate) fn next_id() -> u32 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Restart identifier generation at `epoch`.
///
/// Ids already handed out stay valid; calling this while infos from the old
/// epoch are still on a tape risks collisions, so it belongs at the same
/// boundary as a tape reset.
pub fn set_id_epoch(epoch: u32) {
    NEXT_ID.store(epoch, Ordering::Relaxed);
}

/// One differentiable leaf: the unique id, the primal value and the adjoint
/// accumulated by the reverse sweeps, plus the bookkeeping the higher-order
/// sweeps use to prune work.
///
/// Infos are shared by `Rc`; the strong count is the number of live
/// `Variable` handles plus the tape entries referencing the info.
pub struct VariableInfo {
    id: u32,
    pub(crate) vvalue: Cell<f64>,
    pub(crate) dvalue: Cell<f64>,
    pub(crate) is_dependent: Cell<bool>,
    pub(crate) is_nl: Cell<bool>,
    pub(crate) has_nl_interaction: Cell<bool>,
    pub(crate) dependence_level: Cell<u32>,
    pub(crate) push_start: Cell<usize>,
    pub(crate) dependencies: RefCell<IdSet>,
    pub(crate) name: RefCell<Option<String>>,
}

impl VariableInfo {
    pub fn new(value: f64) -> Rc<Self> {
        Rc::new(VariableInfo {
            id: next_id(),
            vvalue: Cell::new(value),
            dvalue: Cell::new(0.0),
            is_dependent: Cell::new(false),
            is_nl: Cell::new(false),
            has_nl_interaction: Cell::new(false),
            dependence_level: Cell::new(0),
            push_start: Cell::new(PUSH_START_NONE),
            dependencies: RefCell::new(IdSet::new()),
            name: RefCell::new(None),
        })
    }

    pub fn named(value: f64, name: &str) -> Rc<Self> {
        let info = Self::new(value);
        *info.name.borrow_mut() = Some(name.to_string());
        info
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.vvalue.get()
    }

    #[inline]
    pub fn adjoint(&self) -> f64 {
        self.dvalue.get()
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }

    /// Clear the per-sweep state, keeping id and value.
    pub fn reset_adjoint(&self) {
        self.dvalue.set(0.0);
    }
}

impl fmt::Debug for VariableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariableInfo(id={}, value={}, adjoint={})",
            self.id,
            self.vvalue.get(),
            self.dvalue.get()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = VariableInfo::new(1.0);
        let b = VariableInfo::new(2.0);
        assert!(b.id() > a.id());
    }

    #[test]
    fn named_info_keeps_label() {
        let a = VariableInfo::named(0.5, "alpha");
        assert_eq!(a.name().as_deref(), Some("alpha"));
        assert_eq!(a.value(), 0.5);
    }

    #[test]
    fn adjoint_reset() {
        let a = VariableInfo::new(1.0);
        a.dvalue.set(3.0);
        a.reset_adjoint();
        assert_eq!(a.adjoint(), 0.0);
    }
}
