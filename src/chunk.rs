//! Column-chunk partitioning and on-disk persistence of the feature matrix.
//!
//! The feature matrix is held in CSC so a chunk is a contiguous run of outer
//! (column) vectors. Each chunk lands in its own self-describing file inside
//! the workspace, named `chunk_{index}.bin`.
//!
//! The partition is the correctness-critical invariant of the whole design:
//! workers later write into the shared output buffer with no locking, relying
//! entirely on these column ranges being disjoint and exhaustive. The ranges
//! are computed once here and proven valid by [`validate_partition`] before
//! any worker is dispatched.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::error::{MagicError, Result};

/// One unit of work: a persisted column slice `[start, end)` of the feature
/// matrix.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub path: PathBuf,
    pub start: usize,
    pub end: usize,
}

impl ChunkDescriptor {
    pub fn width(&self) -> usize {
        self.end - self.start
    }
}

/// Serialized chunk payload: a CSC matrix spelled out field by field so the
/// file is self-describing independent of sprs internals.
#[derive(Serialize, Deserialize)]
struct ChunkFile {
    rows: u64,
    cols: u64,
    indptr: Vec<u64>,
    indices: Vec<u64>,
    data: Vec<f32>,
}

/// Contiguous, exhaustive column ranges over `[0, total_cols)`. The last
/// range is narrower when `chunk_size` does not divide `total_cols`.
pub fn partition(total_cols: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    (0..total_cols)
        .step_by(chunk_size.max(1))
        .map(|start| (start, (start + chunk_size).min(total_cols)))
        .collect()
}

/// Proof that descriptors cover `[0, total_cols)` exactly once, in order.
pub fn validate_partition(chunks: &[ChunkDescriptor], total_cols: usize) -> Result<()> {
    let mut expected_start = 0;
    for c in chunks {
        if c.start != expected_start || c.end <= c.start {
            return Err(MagicError::InvalidArgument(format!(
                "chunk {} range [{}, {}) breaks the partition at column {}",
                c.index, c.start, c.end, expected_start
            )));
        }
        expected_start = c.end;
    }
    if expected_start != total_cols {
        return Err(MagicError::InvalidArgument(format!(
            "chunk partition covers [0, {expected_start}) but the matrix has {total_cols} columns"
        )));
    }
    Ok(())
}

/// Slice columns `[start, end)` of a CSC matrix into an owned sub-matrix.
fn slice_columns(x: &CsMat<f32>, start: usize, end: usize) -> CsMat<f32> {
    let width = end - start;
    let mut indptr = Vec::with_capacity(width + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for col in x.outer_iterator().skip(start).take(width) {
        indices.extend_from_slice(col.indices());
        data.extend_from_slice(col.data());
        indptr.push(indices.len());
    }
    CsMat::new_csc((x.rows(), width), indptr, indices, data)
}

/// Split `x` (CSC) into column chunks and persist each to `dir`.
pub fn persist_chunks(
    x: &CsMat<f32>,
    chunk_size: usize,
    dir: &Path,
) -> Result<Vec<ChunkDescriptor>> {
    debug_assert!(x.is_csc());
    let mut chunks = Vec::new();
    for (index, (start, end)) in partition(x.cols(), chunk_size).into_iter().enumerate() {
        let path = dir.join(format!("chunk_{index}.bin"));
        let sub = slice_columns(x, start, end);
        write_chunk(&path, &sub)?;
        chunks.push(ChunkDescriptor {
            index,
            path,
            start,
            end,
        });
    }
    Ok(chunks)
}

fn write_chunk(path: &Path, sub: &CsMat<f32>) -> Result<()> {
    let mut indptr = Vec::with_capacity(sub.cols() + 1);
    indptr.push(0u64);
    let mut indices = Vec::with_capacity(sub.nnz());
    let mut data = Vec::with_capacity(sub.nnz());
    for col in sub.outer_iterator() {
        indices.extend(col.indices().iter().map(|&i| i as u64));
        data.extend_from_slice(col.data());
        indptr.push(indices.len() as u64);
    }
    let record = ChunkFile {
        rows: sub.rows() as u64,
        cols: sub.cols() as u64,
        indptr,
        indices,
        data,
    };

    let stage = || format!("chunk serialization to {}", path.display());
    let file = File::create(path).map_err(|e| MagicError::io(stage(), e))?;
    bincode::serialize_into(BufWriter::new(file), &record)
        .map_err(|e| MagicError::codec(stage(), e))
}

/// Deserialize one chunk file back into a CSC sub-matrix.
pub fn read_chunk(path: &Path) -> Result<CsMat<f32>> {
    let stage = || format!("chunk deserialization from {}", path.display());
    let file = File::open(path).map_err(|e| MagicError::io(stage(), e))?;
    let record: ChunkFile = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| MagicError::codec(stage(), e))?;

    let indptr: Vec<usize> = record.indptr.iter().map(|&i| i as usize).collect();
    let indices: Vec<usize> = record.indices.iter().map(|&i| i as usize).collect();
    Ok(CsMat::new_csc(
        (record.rows as usize, record.cols as usize),
        indptr,
        indices,
        record.data,
    ))
}
