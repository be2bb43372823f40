//! Insertion-ordered, deduplicating collections of leaf references.

use std::rc::Rc;

use crate::graph::info::VariableInfo;

/// Set of leaf infos in first-insertion order. Sweep iteration order over an
/// entry's independents is exactly this order.
#[derive(Default, Clone)]
pub struct IdSet {
    items: Vec<Rc<VariableInfo>>,
}

impl IdSet {
    pub fn new() -> Self {
        IdSet { items: Vec::new() }
    }

    /// Insert `info` unless an info with the same id is already present.
    /// Returns true when the set grew.
    pub fn insert(&mut self, info: &Rc<VariableInfo>) -> bool {
        if self.contains(info.id()) {
            return false;
        }
        self.items.push(Rc::clone(info));
        true
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.items.iter().any(|i| i.id() == id)
    }

    pub fn position(&self, id: u32) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Rc<VariableInfo> {
        &self.items[index]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rc<VariableInfo>> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Numeric-id variant used when the caller does not need the info objects.
pub fn push_unique_id(set: &mut Vec<u32>, id: u32) {
    if !set.contains(&id) {
        set.push(id);
    }
}
