//! lib.rs – public API & orchestration layer
//! ==========================================
//! Out-of-core MAGIC diffusion imputation for sparse matrices.
//!
//! Computes **T^steps · X** where:
//! * `T` – observations × observations sparse diffusion operator
//! * `X` – observations × features sparse feature matrix
//!
//! The dense product is too large to hold alongside its inputs, so the
//! pipeline stages it through an ephemeral workspace: `X` is persisted in
//! column chunks, a dense memory-mapped output buffer is pre-allocated at
//! the final shape, and a worker pool fills disjoint column ranges of that
//! buffer in parallel. The completed buffer is read back once, thresholded
//! to suppress float noise, and re-sparsified.
//!
//! Entry point: [`run_magic_imputation`].

use std::collections::HashMap;
use std::path::PathBuf;

use sprs::{CsMat, TriMat};
use tracing::info;

// ---- project modules ----------------------------------------------------
pub mod buffer;
pub mod chunk;
pub mod error;
pub mod finalize;
pub mod operator;
pub mod pool;
pub mod workspace;

pub use error::{MagicError, Result};
use workspace::Workspace;

//=========================================================================//
//  Input / output containers                                              //
//=========================================================================//

/// Precomputed diffusion bundle: when supplied it takes precedence over the
/// `similarity_key` lookup on an annotated input.
#[derive(Debug, Clone)]
pub struct DiffusionResult {
    /// Observation × observation transition operator.
    pub transitions: CsMat<f64>,
}

/// Structured input container: a primary matrix plus named auxiliary
/// matrices, all over the same observations (rows).
#[derive(Debug, Clone)]
pub struct AnnotatedMatrix {
    /// Primary feature matrix (observations × features).
    pub primary: CsMat<f64>,
    /// Alternate feature sources, selectable via `source_field`.
    pub layers: HashMap<String, CsMat<f64>>,
    /// Observation × observation graphs; the diffusion operator is looked
    /// up here under `similarity_key` when no explicit bundle is given.
    pub pairwise: HashMap<String, CsMat<f64>>,
    /// Imputation results, keyed by `destination_field`.
    pub imputed: HashMap<String, CsMat<f32>>,
}

impl AnnotatedMatrix {
    pub fn new(primary: CsMat<f64>) -> Self {
        AnnotatedMatrix {
            primary,
            layers: HashMap::new(),
            pairwise: HashMap::new(),
            imputed: HashMap::new(),
        }
    }
}

/// Labeled table: a sparse value matrix plus row/column labels.
#[derive(Debug, Clone)]
pub struct LabeledMatrix<N> {
    pub values: CsMat<N>,
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
}

/// The three input shapes the pipeline accepts.
pub enum MagicInput<'a> {
    /// Result is stored back into the container under `destination_field`.
    Annotated(&'a mut AnnotatedMatrix),
    /// Result is returned as a new labeled table with the same labels.
    Labeled(&'a LabeledMatrix<f64>),
    /// Result is returned as a raw sparse matrix.
    Raw(&'a CsMat<f64>),
}

/// Output shape, mirroring the input shape.
#[derive(Debug)]
pub enum MagicOutput {
    /// Stored into the annotated input; nothing to return.
    Stored,
    Labeled(LabeledMatrix<f32>),
    Raw(CsMat<f32>),
}

//=========================================================================//
//  Parameters                                                             //
//=========================================================================//

#[derive(Debug, Clone)]
pub struct MagicParams {
    /// Propagation depth: number of diffusion hops.
    pub propagation_steps: usize,
    /// Column width of each persisted chunk.
    pub chunk_size: usize,
    /// Field name under which the operator is found on an annotated input.
    pub similarity_key: String,
    /// Alternate layer to read features from instead of the primary matrix.
    pub source_field: Option<String>,
    /// Field name under which the result is stored on an annotated input.
    pub destination_field: String,
    /// Worker pool size; 0 uses all available execution units.
    pub worker_count: usize,
    /// Magnitude cutoff below which finalized entries are zeroed.
    pub noise_threshold: f32,
    /// Prefix of the ephemeral workspace directory.
    pub workspace_prefix: String,
    /// Parent of the workspace; defaults to the system temp directory.
    pub workspace_parent: Option<PathBuf>,
    /// Emit per-stage progress events.
    pub verbose: bool,
}

impl Default for MagicParams {
    fn default() -> Self {
        MagicParams {
            propagation_steps: 3,
            chunk_size: 100,
            similarity_key: "DM_Similarity".into(),
            source_field: None,
            destination_field: "MAGIC_imputed_data".into(),
            worker_count: 0,
            noise_threshold: 0.01,
            workspace_prefix: "magic_memmap_".into(),
            workspace_parent: None,
            verbose: false,
        }
    }
}

//=========================================================================//
//  Orchestration                                                          //
//=========================================================================//

/// Run the full imputation pipeline.
///
/// All argument validation happens before the workspace is created, so an
/// `InvalidArgument` never leaves disk side effects. Every later failure
/// aborts the pipeline and propagates; the workspace is removed on every
/// exit path (removal failure degrades to a logged warning).
pub fn run_magic_imputation(
    data: MagicInput<'_>,
    dm_res: Option<&DiffusionResult>,
    params: &MagicParams,
) -> Result<MagicOutput> {
    let (t_pow, x) = {
        let (t, x) = resolve_inputs(&data, dm_res, params)?;
        validate_shapes(t, x, params)?;
        if params.verbose {
            info!(
                steps = params.propagation_steps,
                nnz = t.nnz(),
                "exponentiating diffusion operator"
            );
        }
        let t_pow = operator::exponentiate(t, params.propagation_steps)?;
        (t_pow, canonical_features(x))
    };

    let (rows, cols) = (x.rows(), x.cols());
    let workspace_parent = params
        .workspace_parent
        .clone()
        .unwrap_or_else(std::env::temp_dir);

    let sparse = {
        let ws = Workspace::acquire(&params.workspace_prefix, &workspace_parent)?;

        if params.verbose {
            info!(
                rows,
                cols,
                chunk_size = params.chunk_size,
                "writing sparse chunks"
            );
        }
        let chunks = chunk::persist_chunks(&x, params.chunk_size, ws.path())?;
        drop(x);

        let out_path = buffer::allocate(ws.path(), rows, cols)?;
        if params.verbose {
            info!(
                chunks = chunks.len(),
                workers = params.worker_count,
                "starting parallel dot products"
            );
        }
        pool::run(&t_pow, &chunks, &out_path, rows, cols, params.worker_count)?;
        drop(t_pow);

        if params.verbose {
            info!("dot products finished, loading result");
        }
        let mut dense = buffer::load_dense(&out_path, rows, cols)?;
        finalize::threshold_in_place(&mut dense, params.noise_threshold);
        finalize::sparsify(&dense)
        // `ws` drops here: chunk files and the output buffer are removed
        // before the result leaves this scope.
    };

    Ok(match data {
        MagicInput::Annotated(container) => {
            container
                .imputed
                .insert(params.destination_field.clone(), sparse);
            MagicOutput::Stored
        }
        MagicInput::Labeled(table) => MagicOutput::Labeled(LabeledMatrix {
            values: sparse,
            row_labels: table.row_labels.clone(),
            col_labels: table.col_labels.clone(),
        }),
        MagicInput::Raw(_) => MagicOutput::Raw(sparse),
    })
}

/// Locate the operator and feature matrix on the input, without copying.
fn resolve_inputs<'a>(
    data: &'a MagicInput<'_>,
    dm_res: Option<&'a DiffusionResult>,
    params: &MagicParams,
) -> Result<(&'a CsMat<f64>, &'a CsMat<f64>)> {
    let explicit = dm_res.map(|d| &d.transitions);
    match data {
        MagicInput::Annotated(container) => {
            let x = match &params.source_field {
                Some(field) => container.layers.get(field).ok_or_else(|| {
                    MagicError::InvalidArgument(format!(
                        "source_field '{field}' not found in layers"
                    ))
                })?,
                None => &container.primary,
            };
            let t = match explicit {
                Some(t) => t,
                None => container
                    .pairwise
                    .get(&params.similarity_key)
                    .ok_or_else(|| {
                        MagicError::InvalidArgument(format!(
                            "similarity key '{}' not found and no diffusion result given",
                            params.similarity_key
                        ))
                    })?,
            };
            Ok((t, x))
        }
        MagicInput::Labeled(table) => {
            let t = explicit.ok_or_else(|| {
                MagicError::InvalidArgument(
                    "a diffusion result is required for labeled input".into(),
                )
            })?;
            if table.row_labels.len() != table.values.rows()
                || table.col_labels.len() != table.values.cols()
            {
                return Err(MagicError::InvalidArgument(format!(
                    "labels ({} rows, {} cols) do not match the value matrix ({}x{})",
                    table.row_labels.len(),
                    table.col_labels.len(),
                    table.values.rows(),
                    table.values.cols()
                )));
            }
            Ok((t, &table.values))
        }
        MagicInput::Raw(x) => {
            let t = explicit.ok_or_else(|| {
                MagicError::InvalidArgument(
                    "a diffusion result is required for raw matrix input".into(),
                )
            })?;
            Ok((t, x))
        }
    }
}

fn validate_shapes(t: &CsMat<f64>, x: &CsMat<f64>, params: &MagicParams) -> Result<()> {
    if t.rows() != t.cols() {
        return Err(MagicError::InvalidArgument(format!(
            "diffusion operator must be square, got {}x{}",
            t.rows(),
            t.cols()
        )));
    }
    if t.rows() != x.rows() {
        return Err(MagicError::InvalidArgument(format!(
            "operator dimension {} does not match feature matrix rows {}",
            t.rows(),
            x.rows()
        )));
    }
    if x.rows() == 0 || x.cols() == 0 {
        return Err(MagicError::InvalidArgument(format!(
            "feature matrix must be non-empty, got {}x{}",
            x.rows(),
            x.cols()
        )));
    }
    if params.chunk_size < 1 {
        return Err(MagicError::InvalidArgument(
            "chunk_size must be >= 1".into(),
        ));
    }
    if params.propagation_steps < 1 {
        return Err(MagicError::InvalidArgument(
            "propagation_steps must be >= 1".into(),
        ));
    }
    Ok(())
}

/// Canonical chunkable form: f32, column-major storage. The caller's matrix
/// is never mutated.
fn canonical_features(x: &CsMat<f64>) -> CsMat<f32> {
    let mut tri = TriMat::with_capacity((x.rows(), x.cols()), x.nnz());
    for (&v, (r, c)) in x.iter() {
        tri.add_triplet(r, c, v as f32);
    }
    tri.to_csc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eye(n: usize) -> CsMat<f64> {
        CsMat::eye(n)
    }

    fn ones(rows: usize, cols: usize) -> CsMat<f64> {
        let mut tri = TriMat::new((rows, cols));
        for r in 0..rows {
            for c in 0..cols {
                tri.add_triplet(r, c, 1.0);
            }
        }
        tri.to_csr()
    }

    #[test]
    fn missing_similarity_key_is_invalid_argument() {
        let mut container = AnnotatedMatrix::new(ones(3, 2));
        let err = run_magic_imputation(
            MagicInput::Annotated(&mut container),
            None,
            &MagicParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MagicError::InvalidArgument(_)));
    }

    #[test]
    fn missing_source_field_is_invalid_argument() {
        let mut container = AnnotatedMatrix::new(ones(3, 2));
        container.pairwise.insert("DM_Similarity".into(), eye(3));
        let params = MagicParams {
            source_field: Some("denoised".into()),
            ..Default::default()
        };
        let err = run_magic_imputation(MagicInput::Annotated(&mut container), None, &params)
            .unwrap_err();
        assert!(matches!(err, MagicError::InvalidArgument(_)));
    }

    #[test]
    fn raw_input_requires_diffusion_result() {
        let x = ones(3, 2);
        let err = run_magic_imputation(MagicInput::Raw(&x), None, &MagicParams::default())
            .unwrap_err();
        assert!(matches!(err, MagicError::InvalidArgument(_)));
    }

    #[test]
    fn mismatched_label_lengths_rejected() {
        let table = LabeledMatrix {
            values: ones(3, 2),
            row_labels: vec!["a".into(), "b".into()],
            col_labels: vec!["g1".into(), "g2".into()],
        };
        let dm = DiffusionResult {
            transitions: eye(3),
        };
        let err = run_magic_imputation(
            MagicInput::Labeled(&table),
            Some(&dm),
            &MagicParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MagicError::InvalidArgument(_)));
    }

    #[test]
    fn output_is_debug_printable() {
        // `unwrap_err()` on a pipeline Result needs this impl.
        let repr = format!("{:?}", MagicOutput::Stored);
        assert!(repr.contains("Stored"));
    }

    #[test]
    fn canonical_features_preserves_values() {
        let x = ones(2, 2);
        let x32 = canonical_features(&x);
        assert!(x32.is_csc());
        assert_eq!(x32.nnz(), 4);
        assert_eq!(x32.get(1, 1), Some(&1.0f32));
    }
}
