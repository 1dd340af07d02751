//! Result finalization: suppress numerical noise below a magnitude cutoff,
//! then convert the dense result back to sparse for downstream storage.

use ndarray::Array2;
use sprs::{CsMat, TriMat};

/// Zero every entry with `|v| < cutoff`. Entries at or above the cutoff are
/// untouched, so applying this twice is a no-op.
pub fn threshold_in_place(dense: &mut Array2<f32>, cutoff: f32) {
    dense.mapv_inplace(|v| if v.abs() < cutoff { 0.0 } else { v });
}

/// Dense → CSR, keeping exact non-zeros only.
pub fn sparsify(dense: &Array2<f32>) -> CsMat<f32> {
    let mut tri = TriMat::new(dense.dim());
    for ((r, c), &v) in dense.indexed_iter() {
        if v != 0.0 {
            tri.add_triplet(r, c, v);
        }
    }
    tri.to_csr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn values_below_cutoff_become_exact_zero() {
        let mut dense = array![[0.009f32, 0.01], [-0.0099, -0.5]];
        threshold_in_place(&mut dense, 0.01);
        assert_eq!(dense, array![[0.0, 0.01], [0.0, -0.5]]);
    }

    #[test]
    fn thresholding_is_idempotent() {
        let mut once = array![[0.005f32, 1.0, -0.002], [0.3, -0.0001, 0.011]];
        threshold_in_place(&mut once, 0.01);
        let mut twice = once.clone();
        threshold_in_place(&mut twice, 0.01);
        assert_eq!(once, twice);
    }

    #[test]
    fn sparsify_keeps_pattern_and_values() {
        let dense = array![[0.0f32, 2.5], [1.5, 0.0]];
        let sparse = sparsify(&dense);
        assert_eq!(sparse.nnz(), 2);
        assert_eq!(sparse.get(0, 1), Some(&2.5));
        assert_eq!(sparse.get(1, 0), Some(&1.5));
        assert_eq!(sparse.get(0, 0), None);
    }
}
