//! Capability interfaces the scanners consume
//!
//! The on-disk or remote format, its codecs and its metadata schema stay
//! outside this crate. A wrapped store only has to answer the questions below.
//! Element handles are an explicit tagged union: the container says which kind
//! of element it hands out, the scanner never probes for accessors at runtime.

use crate::address_space::Region;
use crate::error::StoreError;
use crate::structures::ElementGroup;
use std::fmt;
use std::sync::Arc;

/// A chunked (or unchunked) n-dimensional array
pub trait ArrayStore: Send + Sync {
    /// Number of elements along each dimension
    fn shape(&self) -> Result<Vec<u64>, StoreError>;

    /// Chunk extent along each dimension, `None` when the store is not chunked
    fn chunk_shape(&self) -> Option<Vec<u64>>;

    /// Materialize the elements in `region`, forcing any lazy computation
    fn read_region(&self, region: &Region) -> Result<(), StoreError>;
}

/// How an array-like value is backed
#[derive(Clone)]
pub enum ArraySource {
    /// The underlying chunked store is reachable; every chunk is addressable
    Chunked(Arc<dyn ArrayStore>),
    /// A wrapped or virtual array; only minimal materializing reads are possible
    Virtual(Arc<dyn ArrayStore>),
}

impl ArraySource {
    pub fn store(&self) -> &Arc<dyn ArrayStore> {
        match self {
            Self::Chunked(store) | Self::Virtual(store) => store,
        }
    }
}

impl fmt::Debug for ArraySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunked(_) => f.write_str("ArraySource::Chunked"),
            Self::Virtual(_) => f.write_str("ArraySource::Virtual"),
        }
    }
}

/// One named resolution level of a multiscale pyramid
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub name: String,
    pub source: ArraySource,
}

impl PyramidLevel {
    pub fn new(name: impl Into<String>, source: ArraySource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

/// Pixel data behind an image or label element
#[derive(Debug, Clone)]
pub enum RasterData {
    /// A single resolution array
    Single(ArraySource),
    /// Resolution levels, finest first
    Multiscale(Vec<PyramidLevel>),
}

/// A record-batch-like table, e.g. a point cloud
pub trait TabularSource: Send + Sync {
    /// Materialize the first `rows` rows, forcing lazy evaluation
    fn head(&self, rows: usize) -> Result<(), StoreError>;
}

/// A collection of geometries
pub trait GeometrySource: Send + Sync {
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// An annotated matrix: a primary data matrix plus labelled axes
pub trait MatrixSource: Send + Sync {
    /// Declared (rows, columns)
    fn shape(&self) -> Result<(u64, u64), StoreError>;

    /// Touch the primary data matrix accessor
    fn touch_matrix(&self) -> Result<(), StoreError>;
}

/// A loaded element, tagged by what it exposes
#[derive(Clone)]
pub enum ElementHandle {
    Raster(RasterData),
    Tabular(Arc<dyn TabularSource>),
    Geometry(Arc<dyn GeometrySource>),
    Matrix(Arc<dyn MatrixSource>),
}

impl ElementHandle {
    /// Short description used in warnings
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Raster(RasterData::Single(_)) => "single-resolution raster",
            Self::Raster(RasterData::Multiscale(_)) => "multiscale raster",
            Self::Tabular(_) => "table",
            Self::Geometry(_) => "geometry collection",
            Self::Matrix(_) => "annotated matrix",
        }
    }
}

impl fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementHandle({})", self.describe())
    }
}

/// A hierarchical container of named elements grouped by kind
pub trait Container: Send + Sync {
    /// Whether the container exposes elements of `group` at all
    fn has_group(&self, group: ElementGroup) -> bool;

    /// Names of the elements in `group`, each listed once
    fn element_names(&self, group: ElementGroup) -> Result<Vec<String>, StoreError>;

    /// Load one named element
    fn load_element(&self, group: ElementGroup, name: &str) -> Result<ElementHandle, StoreError>;

    /// Names of the coordinate systems the container declares
    fn coordinate_systems(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Opens containers from a location
pub trait ContainerLoader: Send + Sync {
    fn load(&self, location: &str) -> Result<Arc<dyn Container>, StoreError>;
}
