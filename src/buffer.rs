//! Shared on-disk output buffer: one dense row-major f32 array of the final
//! shape, sized before any worker starts.
//!
//! Each worker opens its own `MmapMut` over the file and writes only the
//! byte ranges belonging to its column slice, so concurrent writers never
//! touch the same bytes and no locking is needed. Mappings are page-aligned,
//! which keeps the u8 → f32 reinterpretation sound.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use ndarray::Array2;

use crate::error::{MagicError, Result};

pub const OUTPUT_FILE: &str = "imputed_memmap.bin";

fn expected_len(rows: usize, cols: usize) -> u64 {
    (rows * cols * size_of::<f32>()) as u64
}

/// Pre-allocate the output file at its exact final size. Contents are
/// undefined until a worker writes them; every byte is covered by exactly
/// one chunk's range, so nothing undefined survives the pool.
pub fn allocate(dir: &Path, rows: usize, cols: usize) -> Result<PathBuf> {
    let path = dir.join(OUTPUT_FILE);
    let stage = || format!("output buffer allocation at {}", path.display());
    let file = File::create(&path).map_err(|e| MagicError::io(stage(), e))?;
    file.set_len(expected_len(rows, cols))
        .map_err(|e| MagicError::io(stage(), e))?;
    Ok(path)
}

/// A per-worker writable view of the shared output buffer.
pub struct OutputWriter {
    mmap: MmapMut,
    rows: usize,
    total_cols: usize,
}

impl OutputWriter {
    pub fn open(path: &Path, rows: usize, total_cols: usize) -> Result<Self> {
        let stage = || format!("output buffer mapping at {}", path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| MagicError::io(stage(), e))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| MagicError::io(stage(), e))?;
        if mmap.len() as u64 != expected_len(rows, total_cols) {
            return Err(MagicError::io(
                stage(),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "buffer is {} bytes, expected {} for a {rows}x{total_cols} f32 array",
                        mmap.len(),
                        expected_len(rows, total_cols)
                    ),
                ),
            ));
        }
        Ok(OutputWriter {
            mmap,
            rows,
            total_cols,
        })
    }

    /// Write a dense `(rows, width)` block into columns `[start, start+width)`
    /// of every row.
    pub fn write_block(&mut self, start: usize, block: &Array2<f32>) -> Result<()> {
        let (rows, width) = block.dim();
        let end = start + width;
        let src = block.as_slice().ok_or_else(|| {
            MagicError::InvalidArgument("dense block is not in row-major layout".into())
        })?;
        if end > self.total_cols || rows != self.rows {
            return Err(MagicError::InvalidArgument(format!(
                "block of shape {rows}x{width} at column {start} does not fit a {}x{} buffer",
                self.rows, self.total_cols
            )));
        }

        let floats: &mut [f32] = bytemuck::cast_slice_mut(&mut self.mmap[..]);
        for row in 0..rows {
            let dst = row * self.total_cols;
            floats[dst + start..dst + end].copy_from_slice(&src[row * width..(row + 1) * width]);
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| MagicError::io("output buffer flush", e))
    }
}

/// Read the completed buffer back as one dense array. This is the only point
/// where the full dense result is materialized in memory.
pub fn load_dense(path: &Path, rows: usize, cols: usize) -> Result<Array2<f32>> {
    let stage = || format!("output buffer read-back from {}", path.display());
    let file = File::open(path).map_err(|e| MagicError::io(stage(), e))?;
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MagicError::io(stage(), e))?;
    if mmap.len() as u64 != expected_len(rows, cols) {
        return Err(MagicError::io(
            stage(),
            io::Error::new(io::ErrorKind::InvalidData, "buffer size/shape mismatch"),
        ));
    }
    let floats: &[f32] = bytemuck::cast_slice(&mmap[..]);
    Array2::from_shape_vec((rows, cols), floats.to_vec()).map_err(|e| {
        MagicError::io(
            stage(),
            io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn allocate_sizes_file_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = allocate(dir.path(), 3, 5).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * 5 * 4);
    }

    #[test]
    fn blocks_land_in_their_column_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = allocate(dir.path(), 2, 5).unwrap();

        let left = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let right = array![[7.0f32, 8.0], [9.0, 10.0]];
        {
            let mut w = OutputWriter::open(&path, 2, 5).unwrap();
            w.write_block(0, &left).unwrap();
            w.flush().unwrap();
        }
        {
            let mut w = OutputWriter::open(&path, 2, 5).unwrap();
            w.write_block(3, &right).unwrap();
            w.flush().unwrap();
        }

        let dense = load_dense(&path, 2, 5).unwrap();
        assert_eq!(
            dense,
            array![[1.0, 2.0, 3.0, 7.0, 8.0], [4.0, 5.0, 6.0, 9.0, 10.0]]
        );
    }

    #[test]
    fn out_of_range_block_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = allocate(dir.path(), 2, 3).unwrap();
        let mut w = OutputWriter::open(&path, 2, 3).unwrap();
        let block = array![[1.0f32, 2.0], [3.0, 4.0]];
        assert!(w.write_block(2, &block).is_err());
    }
}
