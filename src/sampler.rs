//! Chunk selection: exhaustive or bounded sampling
//!
//! Sampling always keeps the first and the last chunk of the grid. Boundary
//! chunks carry partial extents and sit next to header and footer regions, so
//! they are the likeliest to expose read and decode bugs. The interior is
//! filled with distinct random picks up to the budget. Sampling is advisory:
//! it bounds the read volume, it does not promise to find every bad chunk.

use crate::address_space::{ChunkAddressSpace, ChunkCoordinates, Region};
use crate::identifiers::ChunkCoordinate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Default number of chunks read per array in sampled mode
pub const DEFAULT_SAMPLE_BUDGET: usize = 10;

/// Default per-dimension extent of a minimal probe read
pub const DEFAULT_PROBE_EXTENT: u64 = 10;

/// How many chunks of an array get read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SamplingMode {
    /// Read every chunk
    Exhaustive,
    /// Read at most `budget` chunks, always including the first and the last
    Sampled { budget: usize },
}

impl Default for SamplingMode {
    fn default() -> Self {
        Self::Sampled {
            budget: DEFAULT_SAMPLE_BUDGET,
        }
    }
}

/// Picks the chunks a scan will read
#[derive(Debug, Clone, Default)]
pub struct ChunkSampler {
    mode: SamplingMode,
    seed: Option<u64>,
}

impl ChunkSampler {
    pub fn new(mode: SamplingMode) -> Self {
        Self { mode, seed: None }
    }

    /// Make sampled selections reproducible
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Select chunks from a lazy coordinate sequence
    ///
    /// Only the selected coordinates are decoded; the full product is never
    /// materialized.
    pub fn select(&self, coords: ChunkCoordinates) -> Vec<ChunkCoordinate> {
        let total = coords.remaining();
        let at = |index: u64| {
            let mut cursor = coords.clone();
            cursor.nth(index as usize)
        };
        match self.mode {
            SamplingMode::Exhaustive => coords.clone().collect(),
            SamplingMode::Sampled { budget } => self.sample_indices(total, budget).into_iter().filter_map(at).collect(),
        }
    }

    /// Select chunks from an address space
    pub fn select_from_space(&self, space: &ChunkAddressSpace) -> Vec<ChunkCoordinate> {
        match self.mode {
            SamplingMode::Exhaustive => space.coordinates().collect(),
            SamplingMode::Sampled { budget } => self
                .sample_indices(space.len(), budget)
                .into_iter()
                .filter_map(|index| space.coordinate_at(index))
                .collect(),
        }
    }

    /// Select from an explicit coordinate list, keeping its first and last entries
    pub fn select_slice(&self, coords: &[ChunkCoordinate]) -> Vec<ChunkCoordinate> {
        match self.mode {
            SamplingMode::Exhaustive => coords.to_vec(),
            SamplingMode::Sampled { budget } => self
                .sample_indices(coords.len() as u64, budget)
                .into_iter()
                .map(|index| coords[index as usize].clone())
                .collect(),
        }
    }

    /// Ascending linear indices into a sequence of `total` coordinates
    fn sample_indices(&self, total: u64, budget: usize) -> Vec<u64> {
        if total <= budget as u64 {
            return (0..total).collect();
        }
        match budget {
            0 => return Vec::new(),
            1 => return vec![0],
            _ => {}
        }

        let interior = usize::try_from(total - 2).unwrap_or(usize::MAX);
        let amount = (budget - 2).min(interior);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut picked: Vec<u64> = rand::seq::index::sample(&mut rng, interior, amount)
            .into_iter()
            .map(|i| i as u64 + 1)
            .collect();
        picked.sort_unstable();

        let mut indices = Vec::with_capacity(amount + 2);
        indices.push(0);
        indices.extend(picked);
        indices.push(total - 1);
        indices
    }
}

/// Region read when an array exposes no chunk grid
///
/// Covers the first `min(extent, dim)` elements of the first two dimensions and
/// the first element of every further dimension. Counts as one checked chunk.
pub fn unchunked_probe_region(shape: &[u64], extent: u64) -> Region {
    shape
        .iter()
        .enumerate()
        .map(|(dim, &size)| {
            let take = if dim < 2 { extent } else { 1 };
            0..size.min(take)
        })
        .collect()
}
