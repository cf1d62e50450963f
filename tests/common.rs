//! Common test utilities for integration tests
//!
//! This module provides shared in-memory stores and containers for
//! integration tests that cannot access the main crate's test_utils module.

#![allow(dead_code)]

use chunkscan::{
    ArraySource, ArrayStore, ChunkCoordinate, Container, ContainerLoader, DatasetSpec, ElementGroup, ElementHandle,
    EnvironmentSpec, GeometrySource, MatrixSource, RasterData, Region, StoreError, TabularSource, ValidationTask,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Test constants for consistent configuration across integration tests
pub mod test_constants {
    pub const ENVIRONMENT: &str = "0.6.1";
    pub const ENVIRONMENT_DIR: &str = "envs/v0.6.1";
}

/// Chunked array that records every region it is asked for
pub struct RecordingArray {
    shape: Vec<u64>,
    chunk_shape: Option<Vec<u64>>,
    failure: Option<StoreError>,
    panic_at: Option<ChunkCoordinate>,
    reads: AtomicUsize,
    regions: Mutex<Vec<Region>>,
}

impl RecordingArray {
    pub fn new(shape: &[u64], chunk_shape: &[u64]) -> Self {
        Self {
            shape: shape.to_vec(),
            chunk_shape: Some(chunk_shape.to_vec()),
            failure: None,
            panic_at: None,
            reads: AtomicUsize::new(0),
            regions: Mutex::new(Vec::new()),
        }
    }

    pub fn unchunked(shape: &[u64]) -> Self {
        Self {
            chunk_shape: None,
            ..Self::new(shape, &[])
        }
    }

    /// Every read fails with `error`
    pub fn failing(mut self, error: StoreError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Reading the chunk at `coord` panics
    pub fn panicking_at(mut self, coord: impl Into<ChunkCoordinate>) -> Self {
        self.panic_at = Some(coord.into());
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Chunk coordinates of the regions read so far
    pub fn chunks_read(&self) -> Vec<ChunkCoordinate> {
        self.regions
            .lock()
            .unwrap()
            .iter()
            .map(|region| self.chunk_of(region))
            .collect()
    }

    fn chunk_of(&self, region: &Region) -> ChunkCoordinate {
        let chunk_shape = self.chunk_shape.clone().unwrap_or_default();
        ChunkCoordinate::new(
            region
                .iter()
                .zip(&chunk_shape)
                .map(|(range, &chunk)| range.start / chunk)
                .collect(),
        )
    }
}

impl ArrayStore for RecordingArray {
    fn shape(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.shape.clone())
    }

    fn chunk_shape(&self) -> Option<Vec<u64>> {
        self.chunk_shape.clone()
    }

    fn read_region(&self, region: &Region) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.regions.lock().unwrap().push(region.clone());
        if self.panic_at.as_ref() == Some(&self.chunk_of(region)) {
            panic!("decoder overflow in chunk {}", self.chunk_of(region));
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Non-array probe that succeeds or fails with a fixed error
pub struct Probe(pub Option<StoreError>);

impl Probe {
    fn outcome(&self) -> Result<(), StoreError> {
        match &self.0 {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl TabularSource for Probe {
    fn head(&self, _rows: usize) -> Result<(), StoreError> {
        self.outcome()
    }
}

impl GeometrySource for Probe {
    fn len(&self) -> Result<usize, StoreError> {
        self.outcome().map(|()| 3)
    }
}

impl MatrixSource for Probe {
    fn shape(&self) -> Result<(u64, u64), StoreError> {
        Ok((3, 2))
    }

    fn touch_matrix(&self) -> Result<(), StoreError> {
        self.outcome()
    }
}

pub fn chunked(array: Arc<RecordingArray>) -> ElementHandle {
    ElementHandle::Raster(RasterData::Single(ArraySource::Chunked(array)))
}

/// A container with one element of every group, every read succeeding
pub fn healthy_container() -> TestContainer {
    TestContainer::default()
        .with(ElementGroup::Images, "image", chunked(Arc::new(RecordingArray::new(&[64, 64], &[16, 16]))))
        .with(ElementGroup::Labels, "cells", chunked(Arc::new(RecordingArray::new(&[64, 64], &[32, 32]))))
        .with(ElementGroup::Points, "transcripts", ElementHandle::Tabular(Arc::new(Probe(None))))
        .with(ElementGroup::Shapes, "boundaries", ElementHandle::Geometry(Arc::new(Probe(None))))
        .with(ElementGroup::Tables, "table", ElementHandle::Matrix(Arc::new(Probe(None))))
}

#[derive(Default)]
pub struct TestContainer {
    elements: Vec<(ElementGroup, String, ElementHandle)>,
}

impl TestContainer {
    pub fn with(mut self, group: ElementGroup, name: &str, handle: ElementHandle) -> Self {
        self.elements.push((group, name.to_string(), handle));
        self
    }
}

impl Container for TestContainer {
    fn has_group(&self, group: ElementGroup) -> bool {
        self.elements.iter().any(|(g, _, _)| *g == group)
    }

    fn element_names(&self, group: ElementGroup) -> Result<Vec<String>, StoreError> {
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
            .ok_or_else(|| StoreError::missing(name.to_string()))
    }

    fn coordinate_systems(&self) -> Vec<String> {
        vec!["global".to_string()]
    }
}

#[derive(Default)]
pub struct TestLoader {
    containers: HashMap<String, Arc<dyn Container>>,
}

impl TestLoader {
    pub fn with(mut self, location: &str, container: impl Container + 'static) -> Self {
        self.containers.insert(location.to_string(), Arc::new(container));
        self
    }
}

impl ContainerLoader for TestLoader {
    fn load(&self, location: &str) -> Result<Arc<dyn Container>, StoreError> {
        self.containers
            .get(location)
            .cloned()
            .ok_or_else(|| StoreError::io(format!("cannot open '{}'", location)))
    }
}

/// One task per dataset name, all under the same environment
pub fn tasks_for(names: &[&str]) -> Vec<ValidationTask> {
    let environment = EnvironmentSpec::new(test_constants::ENVIRONMENT, test_constants::ENVIRONMENT_DIR);
    names
        .iter()
        .map(|name| ValidationTask::new(&DatasetSpec::new(*name, format!("{}.zarr", name)), &environment))
        .collect()
}
