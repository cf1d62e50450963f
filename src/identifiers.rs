//! Identifier types for chunkscan
//!
//! [`ChunkCoordinate`] names one chunk of a chunked array; [`TaskId`] names one
//! (dataset, environment) validation job; [`RunId`] tags one scheduler submission.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Position of one chunk in a chunk grid, one index per array dimension
///
/// Ordering is lexicographic over the indices, so the first chunk of a grid is
/// the minimum and the last chunk is the maximum. The empty coordinate is used
/// when a failure happens before any chunk could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkCoordinate(Vec<u64>);

impl ChunkCoordinate {
    pub fn new(indices: Vec<u64>) -> Self {
        Self(indices)
    }

    /// Coordinate with no indices
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// The all-zero coordinate of the given rank
    pub fn origin(rank: usize) -> Self {
        Self(vec![0; rank])
    }

    pub fn indices(&self) -> &[u64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u64>> for ChunkCoordinate {
    fn from(indices: Vec<u64>) -> Self {
        Self(indices)
    }
}

impl<const N: usize> From<[u64; N]> for ChunkCoordinate {
    fn from(indices: [u64; N]) -> Self {
        Self(indices.to_vec())
    }
}

impl Display for ChunkCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", index)?;
        }
        write!(f, ")")
    }
}

/// Identity of one validation task: a dataset probed under one environment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub dataset: String,
    pub environment: String,
}

impl TaskId {
    pub fn new(dataset: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            environment: environment.into(),
        }
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.dataset, self.environment)
    }
}

/// Identifier of one scheduler submission, attached to its log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
