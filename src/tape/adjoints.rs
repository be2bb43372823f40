//! Dense symmetric stores the higher-order sweeps accumulate into.
//!
//! Both stores cover the id range the tape observed while recording; cells
//! are addressed by raw leaf id and packed so only the canonical ordering is
//! kept (lower triangle for the matrix, i ≤ j ≤ k for the tensor).

/// Packed index of the unordered pair (hi ≥ lo).
#[inline]
pub(crate) fn pair_index(hi: usize, lo: usize) -> usize {
    hi * (hi + 1) / 2 + lo
}

/// Symmetric matrix over `[offset, offset + dim)`, lower triangle packed.
#[derive(Default)]
pub(crate) struct AdjointMatrix {
    offset: u32,
    dim: usize,
    data: Vec<f64>,
}

impl AdjointMatrix {
    /// Re-dimension and zero.
    pub fn reset(&mut self, offset: u32, dim: usize) {
        self.offset = offset;
        self.dim = dim;
        self.data.clear();
        self.data.resize(dim * (dim + 1) / 2, 0.0);
    }

    #[inline]
    fn local(&self, id: u32) -> Option<usize> {
        if id < self.offset {
            return None;
        }
        let u = (id - self.offset) as usize;
        (u < self.dim).then_some(u)
    }

    #[inline]
    fn cell(&self, i: u32, j: u32) -> Option<usize> {
        let (a, b) = (self.local(i)?, self.local(j)?);
        let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
        Some(pair_index(hi, lo))
    }

    pub fn get(&self, i: u32, j: u32) -> f64 {
        self.cell(i, j).map_or(0.0, |c| self.data[c])
    }

    pub fn add(&mut self, i: u32, j: u32, v: f64) {
        if let Some(c) = self.cell(i, j) {
            self.data[c] += v;
        }
    }

    /// Dense copy of row `a` (all columns, by local index).
    pub fn snapshot_row(&self, a: u32) -> Vec<f64> {
        match self.local(a) {
            Some(ai) => (0..self.dim)
                .map(|u| {
                    let (hi, lo) = if ai >= u { (ai, u) } else { (u, ai) };
                    self.data[pair_index(hi, lo)]
                })
                .collect(),
            None => vec![0.0; self.dim],
        }
    }

    /// Zero every cell in row/column `a`.
    pub fn clear_row(&mut self, a: u32) {
        if let Some(ai) = self.local(a) {
            for u in 0..self.dim {
                let (hi, lo) = if ai >= u { (ai, u) } else { (u, ai) };
                self.data[pair_index(hi, lo)] = 0.0;
            }
        }
    }
}

/// Symmetric three-index tensor over the same id range, canonical i ≤ j ≤ k
/// packed; any index order resolves on read.
#[derive(Default)]
pub(crate) struct AdjointTensor {
    offset: u32,
    dim: usize,
    data: Vec<f64>,
}

#[inline]
fn triple_index(hi: usize, mid: usize, lo: usize) -> usize {
    hi * (hi + 1) * (hi + 2) / 6 + mid * (mid + 1) / 2 + lo
}

fn sort3(a: usize, b: usize, c: usize) -> (usize, usize, usize) {
    let (mut hi, mut mid, mut lo) = (a, b, c);
    if hi < mid {
        std::mem::swap(&mut hi, &mut mid);
    }
    if mid < lo {
        std::mem::swap(&mut mid, &mut lo);
    }
    if hi < mid {
        std::mem::swap(&mut hi, &mut mid);
    }
    (hi, mid, lo)
}

impl AdjointTensor {
    pub fn reset(&mut self, offset: u32, dim: usize) {
        self.offset = offset;
        self.dim = dim;
        self.data.clear();
        self.data.resize(dim * (dim + 1) * (dim + 2) / 6, 0.0);
    }

    #[inline]
    fn local(&self, id: u32) -> Option<usize> {
        if id < self.offset {
            return None;
        }
        let u = (id - self.offset) as usize;
        (u < self.dim).then_some(u)
    }

    fn cell(&self, i: u32, j: u32, k: u32) -> Option<usize> {
        let (a, b, c) = (self.local(i)?, self.local(j)?, self.local(k)?);
        let (hi, mid, lo) = sort3(a, b, c);
        Some(triple_index(hi, mid, lo))
    }

    pub fn get(&self, i: u32, j: u32, k: u32) -> f64 {
        self.cell(i, j, k).map_or(0.0, |c| self.data[c])
    }

    pub fn add(&mut self, i: u32, j: u32, k: u32, v: f64) {
        if let Some(c) = self.cell(i, j, k) {
            self.data[c] += v;
        }
    }

    /// Packed-pair copy of the slice `T(a, ·, ·)`; index with
    /// [`pair_index`] over local indices.
    pub fn snapshot_slice(&self, a: u32) -> Vec<f64> {
        let n = self.dim * (self.dim + 1) / 2;
        match self.local(a) {
            Some(ai) => {
                let mut out = vec![0.0; n];
                for u in 0..self.dim {
                    for v in 0..=u {
                        let (hi, mid, lo) = sort3(ai, u, v);
                        out[pair_index(u, v)] = self.data[triple_index(hi, mid, lo)];
                    }
                }
                out
            }
            None => vec![0.0; n],
        }
    }

    /// Zero every cell with one or more indices equal to `a`.
    pub fn clear_about(&mut self, a: u32) {
        if let Some(ai) = self.local(a) {
            for u in 0..self.dim {
                for v in 0..=u {
                    let (hi, mid, lo) = sort3(ai, u, v);
                    self.data[triple_index(hi, mid, lo)] = 0.0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_is_symmetric() {
        let mut m = AdjointMatrix::default();
        m.reset(10, 4);
        m.add(11, 13, 2.5);
        assert_eq!(m.get(13, 11), 2.5);
        assert_eq!(m.get(11, 13), 2.5);
        assert_eq!(m.get(10, 10), 0.0);
        // out of range reads are zero, writes ignored
        m.add(9, 11, 1.0);
        assert_eq!(m.get(9, 11), 0.0);
    }

    #[test]
    fn matrix_row_clear() {
        let mut m = AdjointMatrix::default();
        m.reset(0, 3);
        m.add(0, 1, 1.0);
        m.add(1, 2, 3.0);
        m.add(1, 1, 4.0);
        let row = m.snapshot_row(1);
        assert_eq!(row, vec![1.0, 4.0, 3.0]);
        m.clear_row(1);
        assert_eq!(m.get(0, 1), 0.0);
        assert_eq!(m.get(1, 1), 0.0);
        assert_eq!(m.get(1, 2), 0.0);
    }

    #[test]
    fn tensor_any_index_order() {
        let mut t = AdjointTensor::default();
        t.reset(0, 4);
        t.add(0, 2, 3, 1.5);
        for (i, j, k) in [(3, 2, 0), (2, 0, 3), (0, 3, 2)] {
            assert_eq!(t.get(i, j, k), 1.5);
        }
    }

    #[test]
    fn tensor_slice_and_clear() {
        let mut t = AdjointTensor::default();
        t.reset(0, 3);
        t.add(1, 0, 2, 2.0);
        t.add(1, 1, 1, 5.0);
        t.add(0, 0, 2, 7.0);
        let s = t.snapshot_slice(1);
        assert_eq!(s[pair_index(2, 0)], 2.0);
        assert_eq!(s[pair_index(1, 1)], 5.0);
        assert_eq!(s[pair_index(2, 2)], 0.0);
        t.clear_about(1);
        assert_eq!(t.get(1, 0, 2), 0.0);
        assert_eq!(t.get(1, 1, 1), 0.0);
        assert_eq!(t.get(0, 0, 2), 7.0);
    }
}
