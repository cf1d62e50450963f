//! Chunk address space of a regularly chunked array
//!
//! Pure computation, no I/O. Given an array shape and a chunk shape this module
//! enumerates the chunk coordinates of the grid and maps each coordinate to the
//! per-dimension element range it covers.
//!
//! Enumeration is lazy: [`ChunkCoordinates`] decodes coordinates from a linear
//! index on demand, so a sampler can pick a handful of chunks out of a grid with
//! billions of cells without materializing the Cartesian product.
//!
//! ```rust
//! use chunkscan::address_space::ChunkAddressSpace;
//!
//! let space = ChunkAddressSpace::new(&[100, 95], &[10, 10]).unwrap();
//! assert_eq!(space.grid_shape(), &[10, 10]);
//! assert_eq!(space.len(), 100);
//!
//! let last = space.coordinate_at(99).unwrap();
//! assert_eq!(space.to_slice(&last).unwrap(), vec![90..100, 90..95]);
//! ```

use crate::error::ScanError;
use crate::identifiers::ChunkCoordinate;
use crate::Result;
use std::ops::Range;

/// Per-dimension half-open element range
pub type Region = Vec<Range<u64>>;

/// The chunk grid of one array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAddressSpace {
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    grid_shape: Vec<u64>,
    total: u64,
}

impl ChunkAddressSpace {
    /// Build the address space for `shape` split into `chunk_shape` chunks
    ///
    /// Fails with a metadata error when a chunk dimension is zero or the chunk
    /// count overflows, and with a dimensionality error when the ranks differ.
    pub fn new(shape: &[u64], chunk_shape: &[u64]) -> Result<Self> {
        if chunk_shape.len() != shape.len() {
            if chunk_shape.is_empty() {
                return Err(ScanError::metadata(format!(
                    "chunk shape is empty for an array of rank {}",
                    shape.len()
                )));
            }
            return Err(ScanError::IncompatibleDimensionality {
                expected: shape.len(),
                actual: chunk_shape.len(),
            });
        }

        if let Some(dim) = chunk_shape.iter().position(|&c| c == 0) {
            return Err(ScanError::metadata(format!("chunk shape has zero length in dimension {}", dim)));
        }

        let grid_shape: Vec<u64> = shape
            .iter()
            .zip(chunk_shape)
            .map(|(&size, &chunk)| size.div_ceil(chunk))
            .collect();

        let total = grid_shape
            .iter()
            .try_fold(1u64, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| ScanError::metadata(format!("chunk grid {:?} has too many chunks to address", grid_shape)))?;

        Ok(Self {
            shape: shape.to_vec(),
            chunk_shape: chunk_shape.to_vec(),
            grid_shape,
            total,
        })
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn chunk_shape(&self) -> &[u64] {
        &self.chunk_shape
    }

    /// Number of chunks along each dimension
    pub fn grid_shape(&self) -> &[u64] {
        &self.grid_shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of chunks in the grid
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Lazy, restartable sequence of every coordinate in row-major order
    pub fn coordinates(&self) -> ChunkCoordinates {
        ChunkCoordinates {
            grid_shape: self.grid_shape.clone(),
            next: 0,
            end: self.total,
        }
    }

    /// Coordinate at `index` in row-major order, if the grid has that many chunks
    pub fn coordinate_at(&self, index: u64) -> Option<ChunkCoordinate> {
        if index >= self.total {
            return None;
        }
        Some(decode_linear(&self.grid_shape, index))
    }

    /// Element range covered by `coord`, clamped to the array bounds
    pub fn to_slice(&self, coord: &ChunkCoordinate) -> Result<Region> {
        if coord.rank() != self.rank() {
            return Err(ScanError::IncompatibleDimensionality {
                expected: self.rank(),
                actual: coord.rank(),
            });
        }

        coord
            .indices()
            .iter()
            .enumerate()
            .map(|(dim, &index)| {
                if index >= self.grid_shape[dim] {
                    return Err(ScanError::metadata(format!(
                        "chunk index {} out of range for dimension {} with {} chunks",
                        index, dim, self.grid_shape[dim]
                    )));
                }
                let start = index * self.chunk_shape[dim];
                let end = (start + self.chunk_shape[dim]).min(self.shape[dim]);
                Ok(start..end)
            })
            .collect()
    }
}

/// Enumerate every chunk coordinate of `shape` split by `chunk_shape`
pub fn enumerate(shape: &[u64], chunk_shape: &[u64]) -> Result<ChunkCoordinates> {
    Ok(ChunkAddressSpace::new(shape, chunk_shape)?.coordinates())
}

/// Element range of `coord` in an array of `shape` split by `chunk_shape`
pub fn to_slice(coord: &ChunkCoordinate, shape: &[u64], chunk_shape: &[u64]) -> Result<Region> {
    ChunkAddressSpace::new(shape, chunk_shape)?.to_slice(coord)
}

fn decode_linear(grid_shape: &[u64], mut index: u64) -> ChunkCoordinate {
    let mut indices = vec![0u64; grid_shape.len()];
    for (slot, &extent) in indices.iter_mut().zip(grid_shape).rev() {
        *slot = index % extent;
        index /= extent;
    }
    ChunkCoordinate::new(indices)
}

/// Lazy iterator over the coordinates of a chunk grid
///
/// Cloning yields an independent iterator positioned at the same place, which
/// is how callers restart an enumeration.
#[derive(Debug, Clone)]
pub struct ChunkCoordinates {
    grid_shape: Vec<u64>,
    next: u64,
    end: u64,
}

impl ChunkCoordinates {
    /// Number of coordinates not yet yielded
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }
}

impl Iterator for ChunkCoordinates {
    type Item = ChunkCoordinate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let coord = decode_linear(&self.grid_shape, self.next);
        self.next += 1;
        Some(coord)
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.next = self.next.saturating_add(n as u64).min(self.end);
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.remaining()) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}
