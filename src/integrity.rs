//! Chunk-level integrity scanning of single elements
//!
//! This module reads chunks of array-backed elements and probes the other
//! element kinds cheaply, turning every failure into a [`ChunkError`] on the
//! element's [`ElementResult`]. Nothing read here propagates as `Err`: one bad
//! chunk never aborts the reads of its siblings.
//!
//! # Key Components
//!
//! - [`ChunkReader`]: attempts one isolated read of a chunk or probe region
//! - [`ElementScanner`]: dispatches on the element handle to the matching strategy
//! - [`classify_failure`]: maps a store failure to a [`ChunkErrorKind`]
//!
//! # Usage Examples
//!
//! ```rust
//! use chunkscan::config::ScanConfig;
//! use chunkscan::error::StoreError;
//! use chunkscan::integrity::ElementScanner;
//! use chunkscan::address_space::Region;
//! use chunkscan::store::{ArraySource, ArrayStore, ElementHandle, RasterData};
//! use chunkscan::structures::ElementGroup;
//! use std::sync::Arc;
//!
//! struct Zeros;
//!
//! impl ArrayStore for Zeros {
//!     fn shape(&self) -> Result<Vec<u64>, StoreError> { Ok(vec![100, 100]) }
//!     fn chunk_shape(&self) -> Option<Vec<u64>> { Some(vec![10, 10]) }
//!     fn read_region(&self, _region: &Region) -> Result<(), StoreError> { Ok(()) }
//! }
//!
//! let scanner = ElementScanner::new(ScanConfig::default()).unwrap();
//! let handle = ElementHandle::Raster(RasterData::Single(ArraySource::Chunked(Arc::new(Zeros))));
//! let result = scanner.scan_element(ElementGroup::Images, "image", &handle);
//! assert!(result.is_valid());
//! assert_eq!(result.chunks_checked(), 10);
//! ```

use crate::address_space::ChunkAddressSpace;
use crate::config::ScanConfig;
use crate::error::{panic_message, StoreError};
use crate::identifiers::ChunkCoordinate;
use crate::sampler::{unchunked_probe_region, ChunkSampler};
use crate::store::{
    ArraySource, ArrayStore, ElementHandle, GeometrySource, MatrixSource, PyramidLevel, RasterData, TabularSource,
};
use crate::structures::{ChunkError, ChunkErrorKind, ElementGroup, ElementKind, ElementResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Message fragments that mark an untyped read failure as a codec failure
const DECOMPRESSION_MARKERS: [&str; 2] = ["blosc", "decompression"];

/// Classify a failed read
///
/// Typed failures are taken at face value. Untyped I/O failures are matched
/// case-insensitively against known codec markers; this only works as well as
/// the wrapped store's messages do, so stores should prefer reporting
/// [`StoreError::Decompression`] directly.
pub fn classify_failure(error: &StoreError) -> ChunkErrorKind {
    match error {
        StoreError::Decompression(_) => ChunkErrorKind::DecompressionError,
        StoreError::Metadata(_) => ChunkErrorKind::MetadataError,
        StoreError::Io(message) => {
            let lowered = message.to_lowercase();
            if DECOMPRESSION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
                ChunkErrorKind::DecompressionError
            } else {
                ChunkErrorKind::GenericReadError
            }
        }
        StoreError::Missing(_) => ChunkErrorKind::GenericReadError,
    }
}

/// Why an isolated store call did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    /// The store reported a failure
    Store(StoreError),
    /// The store panicked; carries the panic message
    Panicked(String),
}

impl ReadFailure {
    pub fn kind(&self) -> ChunkErrorKind {
        match self {
            Self::Store(error) => classify_failure(error),
            Self::Panicked(_) => ChunkErrorKind::GenericReadError,
        }
    }

    /// Short name of the failure class, used in structural error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Store(error) => error.type_name(),
            Self::Panicked(_) => "Panic",
        }
    }

    /// The failure message without its class
    pub fn message(&self) -> &str {
        match self {
            Self::Store(error) => error.message(),
            Self::Panicked(message) => message,
        }
    }
}

impl Display for ReadFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(error) => write!(f, "{}", error),
            Self::Panicked(message) => write!(f, "store panicked: {}", message),
        }
    }
}

/// Run one store call, confining a panic to that call
///
/// Decoders may panic on corrupt input. A panic becomes a
/// [`ReadFailure::Panicked`] of this call alone, so sibling reads go on.
pub fn isolate<T>(call: impl FnOnce() -> Result<T, StoreError>) -> Result<T, ReadFailure> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(outcome) => outcome.map_err(ReadFailure::Store),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "store panicked during read");
            Err(ReadFailure::Panicked(message))
        }
    }
}

/// Isolated reads against one array store
pub struct ChunkReader<'a> {
    store: &'a dyn ArrayStore,
    source_path: &'a str,
}

impl<'a> ChunkReader<'a> {
    pub fn new(store: &'a dyn ArrayStore, source_path: &'a str) -> Self {
        Self { store, source_path }
    }

    /// Read the chunk at `coord` of `space`
    pub fn read_chunk(&self, space: &ChunkAddressSpace, coord: &ChunkCoordinate) -> Result<(), ChunkError> {
        let region = space.to_slice(coord).map_err(|e| {
            ChunkError::new(
                coord.clone(),
                ChunkErrorKind::MetadataError,
                e.to_string(),
                Some(self.source_path.to_string()),
            )
        })?;
        isolate(|| self.store.read_region(&region)).map_err(|e| self.chunk_error(coord.clone(), &e))
    }

    /// Read the minimal probe region of an array with the given shape
    pub fn read_probe(&self, shape: &[u64], extent: u64) -> Result<(), ChunkError> {
        let region = unchunked_probe_region(shape, extent);
        isolate(|| self.store.read_region(&region))
            .map_err(|e| self.chunk_error(ChunkCoordinate::origin(shape.len()), &e))
    }

    fn chunk_error(&self, coordinate: ChunkCoordinate, failure: &ReadFailure) -> ChunkError {
        ChunkError::new(
            coordinate,
            failure.kind(),
            failure.to_string(),
            Some(self.source_path.to_string()),
        )
    }
}

/// Counters accumulated across scans
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub elements_scanned: u64,
    pub chunks_checked: u64,
    pub chunk_errors: u64,
    pub warnings: u64,
}

/// Scans single elements according to a [`ScanConfig`]
pub struct ElementScanner {
    config: ScanConfig,
    sampler: ChunkSampler,
    stats: Mutex<ScanStats>,
}

impl ElementScanner {
    /// Create a scanner, rejecting an invalid configuration
    ///
    /// A sampled budget below 2 could not keep both boundary chunks, and a
    /// zero chunk cap would read nothing, so both are refused here.
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    pub fn with_default_config() -> Self {
        Self::from_valid(ScanConfig::default())
    }

    fn from_valid(config: ScanConfig) -> Self {
        let sampler = config.sampler();
        Self {
            config,
            sampler,
            stats: Mutex::new(ScanStats::default()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Snapshot of the counters so far
    pub fn stats(&self) -> ScanStats {
        self.stats.lock().clone()
    }

    /// Scan one loaded element of `group`
    pub fn scan_element(&self, group: ElementGroup, name: &str, handle: &ElementHandle) -> ElementResult {
        let result = match (group, handle) {
            (ElementGroup::Images | ElementGroup::Labels, ElementHandle::Raster(RasterData::Single(source))) => {
                let mut result = ElementResult::new(group.default_kind(), name);
                self.scan_source(source, name, &mut result);
                result
            }
            (ElementGroup::Images | ElementGroup::Labels, ElementHandle::Raster(RasterData::Multiscale(levels))) => {
                self.scan_pyramid(name, levels)
            }
            (ElementGroup::Points, ElementHandle::Tabular(table)) => self.probe_table(name, table.as_ref()),
            (ElementGroup::Shapes, ElementHandle::Geometry(geometry)) => self.probe_geometry(name, geometry.as_ref()),
            (ElementGroup::Tables, ElementHandle::Matrix(matrix)) => self.probe_matrix(name, matrix.as_ref()),
            (group, handle) => {
                let mut result = ElementResult::new(group.default_kind(), name);
                self.warn(
                    &mut result,
                    format!("{} element exposes a {}, cannot determine its structure", group, handle.describe()),
                );
                result
            }
        };

        let mut stats = self.stats.lock();
        stats.elements_scanned += 1;
        stats.chunks_checked += result.chunks_checked() as u64;
        stats.chunk_errors += result.errors().len() as u64;
        result
    }

    fn scan_pyramid(&self, name: &str, levels: &[PyramidLevel]) -> ElementResult {
        let mut result = ElementResult::new(ElementKind::MultiscalePyramid, name);
        if levels.is_empty() {
            self.warn(&mut result, "multiscale pyramid has no resolution levels");
            return result;
        }

        for level in levels {
            let level_path = format!("{}/{}", name, level.name);
            self.scan_source(&level.source, &level_path, &mut result);
        }
        result
    }

    fn scan_source(&self, source: &ArraySource, source_path: &str, result: &mut ElementResult) {
        match source {
            ArraySource::Chunked(store) => self.scan_chunked(store.as_ref(), source_path, result),
            ArraySource::Virtual(store) => match isolate(|| store.shape()) {
                Ok(shape) => self.probe_array(store.as_ref(), &shape, source_path, result),
                Err(e) => self.warn(result, format!("could not determine shape of '{}': {}", source_path, e)),
            },
        }
    }

    fn scan_chunked(&self, store: &dyn ArrayStore, source_path: &str, result: &mut ElementResult) {
        let (shape, chunk_shape) = match isolate(|| Ok((store.shape()?, store.chunk_shape()))) {
            Ok(layout) => layout,
            Err(e) => {
                self.record(result, metadata_error(source_path, format!("cannot read shape: {}", e)));
                return;
            }
        };

        let Some(chunk_shape) = chunk_shape else {
            self.probe_array(store, &shape, source_path, result);
            return;
        };

        let space = match ChunkAddressSpace::new(&shape, &chunk_shape) {
            Ok(space) => space,
            Err(e) => {
                self.record(result, metadata_error(source_path, e.to_string()));
                return;
            }
        };

        let mut selected = self.sampler.select_from_space(&space);
        if let Some(cap) = self.config.max_chunks {
            selected.truncate(cap);
        }
        debug!(
            source_path,
            total_chunks = space.len(),
            selected = selected.len(),
            "scanning chunked array"
        );

        let reader = ChunkReader::new(store, source_path);
        for coord in &selected {
            match reader.read_chunk(&space, coord) {
                Ok(()) => result.record_success(),
                Err(error) => self.record(result, error),
            }
        }
    }

    fn probe_array(&self, store: &dyn ArrayStore, shape: &[u64], source_path: &str, result: &mut ElementResult) {
        match ChunkReader::new(store, source_path).read_probe(shape, self.config.probe_extent) {
            Ok(()) => result.record_success(),
            Err(error) => self.record(result, error),
        }
    }

    fn probe_table(&self, name: &str, table: &dyn TabularSource) -> ElementResult {
        let mut result = ElementResult::new(ElementKind::PointCloud, name);
        let outcome = isolate(|| table.head(self.config.probe_rows));
        self.settle_probe(&mut result, name, outcome);
        result
    }

    fn probe_geometry(&self, name: &str, geometry: &dyn GeometrySource) -> ElementResult {
        let mut result = ElementResult::new(ElementKind::GeometryCollection, name);
        let outcome =
            isolate(|| geometry.len()).map(|count| debug!(element = name, count, "geometry collection probed"));
        self.settle_probe(&mut result, name, outcome);
        result
    }

    fn probe_matrix(&self, name: &str, matrix: &dyn MatrixSource) -> ElementResult {
        let mut result = ElementResult::new(ElementKind::AnnotatedMatrix, name);
        let outcome = isolate(|| {
            let (rows, columns) = matrix.shape()?;
            debug!(element = name, rows, columns, "annotated matrix shape");
            matrix.touch_matrix()
        });
        self.settle_probe(&mut result, name, outcome);
        result
    }

    /// Turn the outcome of a one-unit probe into the result
    ///
    /// A missing accessor means the structure could not be determined, which
    /// is a warning rather than a read failure.
    fn settle_probe(&self, result: &mut ElementResult, name: &str, outcome: Result<(), ReadFailure>) {
        match outcome {
            Ok(()) => result.record_success(),
            Err(ReadFailure::Store(StoreError::Missing(message))) => self.warn(result, message),
            Err(failure) => self.record(
                result,
                ChunkError::new(
                    ChunkCoordinate::empty(),
                    failure.kind(),
                    failure.to_string(),
                    Some(name.to_string()),
                ),
            ),
        }
    }

    fn record(&self, result: &mut ElementResult, error: ChunkError) {
        debug!(
            element = result.element_name(),
            coordinate = %error.coordinate,
            kind = %error.kind,
            message = %error.message,
            "chunk read failed"
        );
        result.record_failure(error);
    }

    fn warn(&self, result: &mut ElementResult, warning: impl Into<String>) {
        let warning = warning.into();
        warn!(element = result.element_name(), %warning, "element structure not determined");
        self.stats.lock().warnings += 1;
        result.add_warning(warning);
    }
}

fn metadata_error(source_path: &str, message: String) -> ChunkError {
    ChunkError::new(
        ChunkCoordinate::empty(),
        ChunkErrorKind::MetadataError,
        message,
        Some(source_path.to_string()),
    )
}
