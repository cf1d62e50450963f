//! Test utilities for chunkscan testing
//!
//! In-memory stores and containers with injectable failures, plus a RAII
//! temporary directory for tests that touch the filesystem.

use crate::address_space::Region;
use crate::error::StoreError;
use crate::identifiers::ChunkCoordinate;
use crate::store::{
    ArrayStore, Container, ContainerLoader, ElementHandle, GeometrySource, MatrixSource, TabularSource,
};
use crate::structures::ElementGroup;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// RAII-based test environment for isolated testing
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub test_name: String,
}

impl TestEnvironment {
    pub fn new(test_name: &str) -> Self {
        let temp_dir =
            TempDir::new().unwrap_or_else(|e| panic!("Failed to create temp dir for test {}: {}", test_name, e));

        Self {
            temp_dir,
            test_name: test_name.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Array held in memory that fails on chosen chunks
#[derive(Default)]
pub struct MemoryArray {
    shape: Vec<u64>,
    chunk_shape: Option<Vec<u64>>,
    failing_chunks: HashMap<ChunkCoordinate, StoreError>,
    panicking_chunks: HashSet<ChunkCoordinate>,
    fail_all: Option<StoreError>,
    shape_error: Option<StoreError>,
    reads: AtomicUsize,
    regions: Mutex<Vec<Region>>,
}

impl MemoryArray {
    pub fn chunked(shape: &[u64], chunk_shape: &[u64]) -> Self {
        Self {
            shape: shape.to_vec(),
            chunk_shape: Some(chunk_shape.to_vec()),
            ..Self::default()
        }
    }

    pub fn unchunked(shape: &[u64]) -> Self {
        Self {
            shape: shape.to_vec(),
            ..Self::default()
        }
    }

    pub fn fail_chunk(mut self, coord: impl Into<ChunkCoordinate>, error: StoreError) -> Self {
        self.failing_chunks.insert(coord.into(), error);
        self
    }

    /// Make the read of `coord` panic instead of returning an error
    pub fn panic_chunk(mut self, coord: impl Into<ChunkCoordinate>) -> Self {
        self.panicking_chunks.insert(coord.into());
        self
    }

    pub fn fail_all(mut self, error: StoreError) -> Self {
        self.fail_all = Some(error);
        self
    }

    pub fn fail_shape(mut self, error: StoreError) -> Self {
        self.shape_error = Some(error);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn regions(&self) -> Vec<Region> {
        self.regions.lock().clone()
    }

    fn chunk_of(&self, region: &Region) -> Option<ChunkCoordinate> {
        let chunk_shape = self.chunk_shape.as_ref()?;
        let indices = region
            .iter()
            .zip(chunk_shape)
            .map(|(range, &chunk)| range.start / chunk.max(1))
            .collect();
        Some(ChunkCoordinate::new(indices))
    }
}

impl ArrayStore for MemoryArray {
    fn shape(&self) -> Result<Vec<u64>, StoreError> {
        match &self.shape_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.shape.clone()),
        }
    }

    fn chunk_shape(&self) -> Option<Vec<u64>> {
        self.chunk_shape.clone()
    }

    fn read_region(&self, region: &Region) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.regions.lock().push(region.clone());

        if let Some(error) = &self.fail_all {
            return Err(error.clone());
        }
        let coord = self.chunk_of(region);
        if let Some(coord) = coord.as_ref().filter(|c| self.panicking_chunks.contains(*c)) {
            panic!("codec bug while decoding chunk {}", coord);
        }
        match coord.and_then(|coord| self.failing_chunks.get(&coord)) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Table probe that records the requested prefix sizes
#[derive(Default)]
pub struct MemoryTable {
    error: Option<StoreError>,
    requested: Mutex<Vec<usize>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, error: StoreError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn requested_rows(&self) -> Vec<usize> {
        self.requested.lock().clone()
    }
}

impl TabularSource for MemoryTable {
    fn head(&self, rows: usize) -> Result<(), StoreError> {
        self.requested.lock().push(rows);
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

pub struct MemoryGeometry {
    count: usize,
    error: Option<StoreError>,
}

impl MemoryGeometry {
    pub fn new(count: usize) -> Self {
        Self { count, error: None }
    }

    pub fn fail(mut self, error: StoreError) -> Self {
        self.error = Some(error);
        self
    }
}

impl GeometrySource for MemoryGeometry {
    fn len(&self) -> Result<usize, StoreError> {
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.count),
        }
    }
}

pub struct MemoryMatrix {
    shape: (u64, u64),
    shape_error: Option<StoreError>,
    matrix_error: Option<StoreError>,
}

impl MemoryMatrix {
    pub fn new(rows: u64, columns: u64) -> Self {
        Self {
            shape: (rows, columns),
            shape_error: None,
            matrix_error: None,
        }
    }

    pub fn fail_shape(mut self, error: StoreError) -> Self {
        self.shape_error = Some(error);
        self
    }

    pub fn fail_matrix(mut self, error: StoreError) -> Self {
        self.matrix_error = Some(error);
        self
    }
}

impl MatrixSource for MemoryMatrix {
    fn shape(&self) -> Result<(u64, u64), StoreError> {
        match &self.shape_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.shape),
        }
    }

    fn touch_matrix(&self) -> Result<(), StoreError> {
        match &self.matrix_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Container assembled element by element
#[derive(Default)]
pub struct MemoryContainer {
    elements: Vec<(ElementGroup, String, Result<ElementHandle, StoreError>)>,
    listing_errors: HashMap<ElementGroup, StoreError>,
    coordinate_systems: Vec<String>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(mut self, group: ElementGroup, name: &str, handle: ElementHandle) -> Self {
        self.elements.push((group, name.to_string(), Ok(handle)));
        self
    }

    /// An element that is listed but fails to load
    pub fn broken_element(mut self, group: ElementGroup, name: &str, error: StoreError) -> Self {
        self.elements.push((group, name.to_string(), Err(error)));
        self
    }

    /// A group that exists but cannot be listed
    pub fn broken_group(mut self, group: ElementGroup, error: StoreError) -> Self {
        self.listing_errors.insert(group, error);
        self
    }

    pub fn coordinate_system(mut self, name: &str) -> Self {
        self.coordinate_systems.push(name.to_string());
        self
    }
}

impl Container for MemoryContainer {
    fn has_group(&self, group: ElementGroup) -> bool {
        self.listing_errors.contains_key(&group) || self.elements.iter().any(|(g, _, _)| *g == group)
    }

    fn element_names(&self, group: ElementGroup) -> Result<Vec<String>, StoreError> {
        if let Some(error) = self.listing_errors.get(&group) {
            return Err(error.clone());
        }
        Ok(self
            .elements
            .iter()
            .filter(|(g, _, _)| *g == group)
            .map(|(_, name, _)| name.clone())
            .collect())
    }

    fn load_element(&self, group: ElementGroup, name: &str) -> Result<ElementHandle, StoreError> {
        self.elements
            .iter()
            .find(|(g, n, _)| *g == group && n == name)
            .map(|(_, _, handle)| handle.clone())
            .unwrap_or_else(|| Err(StoreError::missing(format!("no element '{}' in {}", name, group))))
    }

    fn coordinate_systems(&self) -> Vec<String> {
        self.coordinate_systems.clone()
    }
}

/// Loader resolving locations from a fixed map
#[derive(Default)]
pub struct MemoryLoader {
    containers: HashMap<String, Arc<dyn Container>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(mut self, location: &str, container: impl Container + 'static) -> Self {
        self.containers.insert(location.to_string(), Arc::new(container));
        self
    }
}

impl ContainerLoader for MemoryLoader {
    fn load(&self, location: &str) -> Result<Arc<dyn Container>, StoreError> {
        self.containers
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::io(format!("No such file or directory: '{}'", location)))
    }
}
