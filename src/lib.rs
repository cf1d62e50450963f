//! chunkscan - chunk-level integrity scanning for chunked array containers
//!
//! chunkscan detects unreadable and corrupt chunks in the arrays that back a
//! hierarchical scientific-data container. It enumerates the chunk grid of every
//! array, reads either every chunk or a bounded sample that always includes the
//! first and the last, and classifies each failed read. Results roll up per
//! element and per container.
//!
//! On top of the scanner sits a validation harness: a set of (dataset,
//! environment) tasks runs on a bounded pool of workers with a per-task
//! timeout, and every task yields exactly one outcome no matter how it ends.

pub mod address_space;
pub mod config;
pub mod container_scanner;
pub mod error;
pub mod identifiers;
pub mod integrity;
pub mod provision;
pub mod report;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod structures;
pub mod task;

#[cfg(test)]
pub mod test_utils;

pub use address_space::{ChunkAddressSpace, ChunkCoordinates, Region};
pub use config::{Catalog, DatasetSpec, EnvironmentSpec, HarnessConfig, ScanConfig, SchedulerConfig};
pub use container_scanner::ContainerScanner;
pub use error::{ScanError, StoreError};
pub use identifiers::{ChunkCoordinate, RunId, TaskId};
pub use integrity::{classify_failure, isolate, ChunkReader, ElementScanner, ReadFailure, ScanStats};
pub use provision::{CommandProvisioner, EnvironmentProvisioner, NoopProvisioner, ProvisionCache};
pub use report::OutcomeFormat;
pub use sampler::{ChunkSampler, SamplingMode};
pub use scheduler::{SchedulerStats, TaskScheduler};
pub use store::{
    ArraySource, ArrayStore, Container, ContainerLoader, ElementHandle, GeometrySource, MatrixSource, PyramidLevel,
    RasterData, TabularSource,
};
pub use structures::{ChunkError, ChunkErrorKind, ContainerResult, ElementGroup, ElementKind, ElementResult};
pub use task::{
    CommandProbe, ExtractedSummary, OutcomeErrorKind, ProbeFailure, ProbeReport, ProbeSuccess, ScanProbe, TaskState,
    ValidationOutcome, ValidationProbe, ValidationTask,
};

/// Type alias for Results using ScanError
pub type Result<T> = std::result::Result<T, ScanError>;
