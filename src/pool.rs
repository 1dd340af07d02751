//! Parallel dot-product worker pool.
//!
//! Each chunk is an independent task: load the persisted column slice,
//! compute `T_pow · chunk`, densify, and write the block into the chunk's
//! reserved column range of the shared output buffer. Chunks never share
//! bytes in the buffer, so the pool runs without locks; the partition is
//! re-validated here before dispatch because a bad partition corrupts data
//! silently instead of crashing.
//!
//! Any single worker failure aborts the whole invocation. Rayon's
//! `try_for_each` stops handing out new tasks once a worker returns an
//! error, and `pool::run` only returns after every in-flight task has
//! finished, so the caller observes a full-barrier join either way.

use std::io;
use std::path::Path;

use rayon::prelude::*;
use sprs::CsMat;
use tracing::debug;

use crate::buffer::OutputWriter;
use crate::chunk::{self, ChunkDescriptor};
use crate::error::{MagicError, Result};

/// Run all chunk tasks to completion. `worker_count == 0` means one worker
/// per available execution unit.
pub fn run(
    t_pow: &CsMat<f32>,
    chunks: &[ChunkDescriptor],
    out_path: &Path,
    rows: usize,
    total_cols: usize,
    worker_count: usize,
) -> Result<()> {
    chunk::validate_partition(chunks, total_cols)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_count)
        .build()
        .map_err(|e| {
            MagicError::io(
                "worker pool construction",
                io::Error::new(io::ErrorKind::Other, e),
            )
        })?;

    pool.install(|| {
        chunks.par_iter().try_for_each(|c| {
            process_chunk(t_pow, c, out_path, rows, total_cols).map_err(|e| {
                MagicError::Compute {
                    chunk: c.index,
                    start: c.start,
                    end: c.end,
                    source: Box::new(e),
                }
            })
        })
    })
}

fn process_chunk(
    t_pow: &CsMat<f32>,
    c: &ChunkDescriptor,
    out_path: &Path,
    rows: usize,
    total_cols: usize,
) -> Result<()> {
    let sub = chunk::read_chunk(&c.path)?.to_csr();
    if sub.rows() != t_pow.cols() {
        return Err(MagicError::InvalidArgument(format!(
            "chunk has {} rows but the operator is {}x{}",
            sub.rows(),
            t_pow.rows(),
            t_pow.cols()
        )));
    }

    let dense = {
        let product = t_pow * &sub;
        product.to_dense()
    };
    drop(sub);
    debug_assert_eq!(dense.dim(), (rows, c.width()));

    // Each worker maps the buffer independently; ranges are disjoint.
    let mut writer = OutputWriter::open(out_path, rows, total_cols)?;
    writer.write_block(c.start, &dense)?;
    writer.flush()?;
    debug!(chunk = c.index, start = c.start, end = c.end, "chunk written");
    Ok(())
}
