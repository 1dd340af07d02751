//! Operator exponentiation: `T_pow = T^steps` by repeated sparse-sparse
//! multiplication, cast to f32 after the final product to halve memory.
//!
//! Each intermediate product replaces the previous one, so peak memory is
//! bounded by the sparsity growth of a single product rather than a history
//! of powers. Dense exponentiation is deliberately avoided.

use sprs::{CsMat, TriMat};
use tracing::debug;

use crate::error::{MagicError, Result};

/// Raise the diffusion operator to `steps` and demote to f32.
pub fn exponentiate(t: &CsMat<f64>, steps: usize) -> Result<CsMat<f32>> {
    if steps < 1 {
        return Err(MagicError::InvalidArgument(format!(
            "propagation_steps must be >= 1, got {steps}"
        )));
    }
    if t.rows() != t.cols() {
        return Err(MagicError::InvalidArgument(format!(
            "diffusion operator must be square, got {}x{}",
            t.rows(),
            t.cols()
        )));
    }

    let base = t.to_csr();
    let mut cur = base.clone();
    for step in 1..steps {
        // Previous power is dropped by the reassignment.
        cur = &cur * &base;
        debug!(step = step + 1, total = steps, nnz = cur.nnz(), "diffusion step");
    }
    Ok(demote(&cur))
}

/// f64 → f32, preserving the sparsity pattern.
pub fn demote(m: &CsMat<f64>) -> CsMat<f32> {
    let mut tri = TriMat::with_capacity((m.rows(), m.cols()), m.nnz());
    for (&v, (r, c)) in m.iter() {
        tri.add_triplet(r, c, v as f32);
    }
    tri.to_csr()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_operator() -> CsMat<f64> {
        let mut tri = TriMat::new((3, 3));
        tri.add_triplet(0, 0, 0.5);
        tri.add_triplet(0, 1, 0.5);
        tri.add_triplet(1, 1, 1.0);
        tri.add_triplet(2, 0, 0.25);
        tri.add_triplet(2, 2, 0.75);
        tri.to_csr()
    }

    #[test]
    fn steps_one_is_identity_power() {
        let t = small_operator();
        assert_eq!(exponentiate(&t, 1).unwrap(), demote(&t));
    }

    #[test]
    fn matches_explicit_repeated_multiply() {
        let t = small_operator();
        let expected = demote(&(&(&t * &t) * &t));
        assert_eq!(exponentiate(&t, 3).unwrap(), expected);
    }

    #[test]
    fn zero_steps_rejected() {
        let t = small_operator();
        assert!(matches!(
            exponentiate(&t, 0),
            Err(MagicError::InvalidArgument(_))
        ));
    }

    #[test]
    fn non_square_rejected() {
        let mut tri = TriMat::new((2, 3));
        tri.add_triplet(0, 0, 1.0);
        let t = tri.to_csr();
        assert!(matches!(
            exponentiate(&t, 2),
            Err(MagicError::InvalidArgument(_))
        ));
    }
}
