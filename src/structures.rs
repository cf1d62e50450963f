//! Result records produced by the scanners
//!
//! Results nest per chunk ([`ChunkError`]), per element ([`ElementResult`]) and
//! per container ([`ContainerResult`]). Validity is always derived from the
//! recorded failures and is never stored independently; the serialized form
//! carries `is_valid` for readers, and parsing recomputes it.

use crate::identifiers::ChunkCoordinate;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Classification of one failed chunk read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkErrorKind {
    /// Bytes could not be read
    GenericReadError,
    /// Bytes were read but failed to decode
    DecompressionError,
    /// Shape or chunk-grid description is missing or inconsistent
    MetadataError,
}

impl ChunkErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenericReadError => "GenericReadError",
            Self::DecompressionError => "DecompressionError",
            Self::MetadataError => "MetadataError",
        }
    }
}

impl Display for ChunkErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed read of one chunk or probe unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkError {
    /// Empty when the failure precedes coordinate resolution
    pub coordinate: ChunkCoordinate,
    pub kind: ChunkErrorKind,
    pub message: String,
    pub source_path: Option<String>,
}

impl ChunkError {
    pub fn new(
        coordinate: ChunkCoordinate,
        kind: ChunkErrorKind,
        message: impl Into<String>,
        source_path: Option<String>,
    ) -> Self {
        Self {
            coordinate,
            kind,
            message: message.into(),
            source_path,
        }
    }
}

/// Element groups a container exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementGroup {
    Images,
    Labels,
    Points,
    Shapes,
    Tables,
}

impl ElementGroup {
    /// Every group, in scan order
    pub const ALL: [ElementGroup; 5] = [Self::Images, Self::Labels, Self::Points, Self::Shapes, Self::Tables];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Labels => "labels",
            Self::Points => "points",
            Self::Shapes => "shapes",
            Self::Tables => "tables",
        }
    }

    /// Result kind reported for elements of this group with a single array
    pub fn default_kind(self) -> ElementKind {
        match self {
            Self::Images => ElementKind::Array,
            Self::Labels => ElementKind::Labels,
            Self::Points => ElementKind::PointCloud,
            Self::Shapes => ElementKind::GeometryCollection,
            Self::Tables => ElementKind::AnnotatedMatrix,
        }
    }
}

impl Display for ElementGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|group| group.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown element group '{}', expected one of: images, labels, points, shapes, tables", s))
    }
}

/// Kind of a scanned element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Array,
    Labels,
    MultiscalePyramid,
    PointCloud,
    GeometryCollection,
    AnnotatedMatrix,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Labels => "labels",
            Self::MultiscalePyramid => "multiscale_pyramid",
            Self::PointCloud => "point_cloud",
            Self::GeometryCollection => "geometry_collection",
            Self::AnnotatedMatrix => "annotated_matrix",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Array => "Array",
            Self::Labels => "Labels",
            Self::MultiscalePyramid => "Multiscale pyramid",
            Self::PointCloud => "Point cloud",
            Self::GeometryCollection => "Geometry collection",
            Self::AnnotatedMatrix => "Annotated matrix",
        }
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of scanning one element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ElementRecord", from = "ElementRecord")]
pub struct ElementResult {
    element_kind: ElementKind,
    element_name: String,
    chunks_checked: usize,
    errors: Vec<ChunkError>,
    warning: Option<String>,
}

impl ElementResult {
    pub(crate) fn new(element_kind: ElementKind, element_name: impl Into<String>) -> Self {
        Self {
            element_kind,
            element_name: element_name.into(),
            chunks_checked: 0,
            errors: Vec::new(),
            warning: None,
        }
    }

    /// Assemble a result from recorded parts
    ///
    /// Every error stands for an attempted read, so `chunks_checked` is raised
    /// to at least the number of errors.
    pub fn from_parts(
        element_kind: ElementKind,
        element_name: impl Into<String>,
        chunks_checked: usize,
        errors: Vec<ChunkError>,
        warning: Option<String>,
    ) -> Self {
        Self {
            element_kind,
            element_name: element_name.into(),
            chunks_checked: chunks_checked.max(errors.len()),
            errors,
            warning,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.chunks_checked += 1;
    }

    pub(crate) fn record_failure(&mut self, error: ChunkError) {
        self.chunks_checked += 1;
        self.errors.push(error);
    }

    pub(crate) fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        self.warning = Some(match self.warning.take() {
            Some(existing) => format!("{}; {}", existing, warning),
            None => warning,
        });
    }

    pub fn element_kind(&self) -> ElementKind {
        self.element_kind
    }

    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    pub fn chunks_checked(&self) -> usize {
        self.chunks_checked
    }

    pub fn errors(&self) -> &[ChunkError] {
        &self.errors
    }

    pub fn warning(&self) -> Option<&str> {
        self.warning.as_deref()
    }

    /// Valid when nothing failed and the structure could be introspected
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.warning.is_none()
    }
}

impl Display for ElementResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let status = if self.is_valid() { "✓" } else { "✗" };
        write!(f, "{} {}: '{}'", status, self.element_kind.title(), self.element_name)?;
        if self.chunks_checked > 0 {
            write!(f, " ({} chunks checked)", self.chunks_checked)?;
        }
        if let Some(warning) = &self.warning {
            write!(f, " - Warning: {}", warning)?;
        }
        for error in &self.errors {
            write!(f, "\n  - Error at chunk {}: {}", error.coordinate, error.kind)?;
            if let Some(path) = &error.source_path {
                write!(f, " [{}]", path)?;
            }
        }
        Ok(())
    }
}

/// Serialized shape of [`ElementResult`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ElementRecord {
    element_kind: ElementKind,
    element_name: String,
    #[serde(default)]
    is_valid: bool,
    chunks_checked: usize,
    #[serde(default)]
    errors: Vec<ChunkError>,
    #[serde(default)]
    warning: Option<String>,
}

impl From<ElementResult> for ElementRecord {
    fn from(result: ElementResult) -> Self {
        Self {
            is_valid: result.is_valid(),
            element_kind: result.element_kind,
            element_name: result.element_name,
            chunks_checked: result.chunks_checked,
            errors: result.errors,
            warning: result.warning,
        }
    }
}

impl From<ElementRecord> for ElementResult {
    fn from(record: ElementRecord) -> Self {
        Self::from_parts(
            record.element_kind,
            record.element_name,
            record.chunks_checked,
            record.errors,
            record.warning,
        )
    }
}

/// Outcome of scanning one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ContainerRecord", from = "ContainerRecord")]
pub struct ContainerResult {
    source_path: Option<String>,
    elements: Vec<ElementResult>,
    structural_errors: Vec<String>,
}

impl ContainerResult {
    pub fn new(source_path: Option<String>) -> Self {
        Self {
            source_path,
            elements: Vec::new(),
            structural_errors: Vec::new(),
        }
    }

    pub fn from_parts(source_path: Option<String>, elements: Vec<ElementResult>, structural_errors: Vec<String>) -> Self {
        Self {
            source_path,
            elements,
            structural_errors,
        }
    }

    /// A container that could not be loaded at all
    pub fn load_failure(source_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_path: Some(source_path.into()),
            elements: Vec::new(),
            structural_errors: vec![message.into()],
        }
    }

    pub(crate) fn push_element(&mut self, element: ElementResult) {
        self.elements.push(element);
    }

    pub(crate) fn push_structural_error(&mut self, message: impl Into<String>) {
        self.structural_errors.push(message.into());
    }

    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    pub fn elements(&self) -> &[ElementResult] {
        &self.elements
    }

    pub fn structural_errors(&self) -> &[String] {
        &self.structural_errors
    }

    pub fn is_valid(&self) -> bool {
        self.structural_errors.is_empty() && self.elements.iter().all(ElementResult::is_valid)
    }

    pub fn invalid_elements(&self) -> impl Iterator<Item = &ElementResult> {
        self.elements.iter().filter(|e| !e.is_valid())
    }

    pub fn total_chunks_checked(&self) -> usize {
        self.elements.iter().map(ElementResult::chunks_checked).sum()
    }
}

impl Display for ContainerResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.source_path {
            Some(path) => writeln!(f, "Checking container: {}", path)?,
            None => writeln!(f, "Checking container")?,
        }
        for element in &self.elements {
            writeln!(f, "  {}", element)?;
        }
        if !self.structural_errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Errors encountered:")?;
            for error in &self.structural_errors {
                writeln!(f, "  - {}", error)?;
            }
        }
        writeln!(f)?;
        write!(
            f,
            "Summary: {} error(s) found in {} element(s)",
            self.invalid_elements().count(),
            self.elements.len()
        )
    }
}

/// Serialized shape of [`ContainerResult`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerRecord {
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    is_valid: bool,
    #[serde(default)]
    elements: Vec<ElementResult>,
    #[serde(default)]
    structural_errors: Vec<String>,
}

impl From<ContainerResult> for ContainerRecord {
    fn from(result: ContainerResult) -> Self {
        Self {
            is_valid: result.is_valid(),
            source_path: result.source_path,
            elements: result.elements,
            structural_errors: result.structural_errors,
        }
    }
}

impl From<ContainerRecord> for ContainerResult {
    fn from(record: ContainerRecord) -> Self {
        Self::from_parts(record.source_path, record.elements, record.structural_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_error(coord: [u64; 2]) -> ChunkError {
        ChunkError::new(
            ChunkCoordinate::from(coord),
            ChunkErrorKind::GenericReadError,
            "short read",
            Some("image".to_string()),
        )
    }

    #[test]
    fn test_validity_is_derived_from_errors_and_warning() {
        let mut result = ElementResult::new(ElementKind::Array, "image");
        result.record_success();
        assert!(result.is_valid());

        result.record_failure(read_error([0, 1]));
        assert!(!result.is_valid());
        assert_eq!(result.chunks_checked(), 2);

        let mut warned = ElementResult::new(ElementKind::PointCloud, "points");
        warned.add_warning("no table accessor");
        assert!(!warned.is_valid());
        assert_eq!(warned.errors().len(), 0);
    }

    #[test]
    fn test_warnings_accumulate() {
        let mut result = ElementResult::new(ElementKind::MultiscalePyramid, "image");
        result.add_warning("scale0: no shape");
        result.add_warning("scale1: no shape");
        assert_eq!(result.warning(), Some("scale0: no shape; scale1: no shape"));
    }

    #[test]
    fn test_from_parts_keeps_checked_at_least_errors() {
        let result = ElementResult::from_parts(
            ElementKind::Array,
            "image",
            0,
            vec![read_error([0, 0]), read_error([0, 1])],
            None,
        );
        assert_eq!(result.chunks_checked(), 2);
    }

    #[test]
    fn test_element_group_parsing() {
        assert_eq!("Images".parse::<ElementGroup>().unwrap(), ElementGroup::Images);
        assert_eq!(" tables ".parse::<ElementGroup>().unwrap(), ElementGroup::Tables);
        assert!("volumes".parse::<ElementGroup>().is_err());
    }

    #[test]
    fn test_container_validity() {
        let mut container = ContainerResult::new(Some("/data/sample.zarr".to_string()));
        let mut ok = ElementResult::new(ElementKind::Array, "image");
        ok.record_success();
        container.push_element(ok);
        assert!(container.is_valid());

        container.push_structural_error("Error checking labels 'cells': IOError: gone");
        assert!(!container.is_valid());
    }

    #[test]
    fn test_load_failure_has_no_elements() {
        let container = ContainerResult::load_failure("/missing.zarr", "Failed to load container: IOError: not found");
        assert!(!container.is_valid());
        assert!(container.elements().is_empty());
        assert_eq!(container.structural_errors().len(), 1);
    }

    #[test]
    fn test_element_record_carries_is_valid() {
        let mut result = ElementResult::new(ElementKind::Labels, "cells");
        result.record_failure(read_error([1, 1]));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["is_valid"], serde_json::json!(false));
        assert_eq!(value["element_kind"], serde_json::json!("labels"));
        assert_eq!(value["errors"][0]["kind"], serde_json::json!("GenericReadError"));
        assert_eq!(value["errors"][0]["coordinate"], serde_json::json!([1, 1]));
    }

    #[test]
    fn test_parsing_recomputes_validity() {
        let json = r#"{
            "element_kind": "array",
            "element_name": "image",
            "is_valid": true,
            "chunks_checked": 3,
            "errors": [{"coordinate": [0], "kind": "DecompressionError", "message": "blosc", "source_path": null}],
            "warning": null
        }"#;
        let parsed: ElementResult = serde_json::from_str(json).unwrap();
        assert!(!parsed.is_valid());
        assert_eq!(parsed.chunks_checked(), 3);
    }

    #[test]
    fn test_container_display() {
        let mut container = ContainerResult::new(Some("sample.zarr".to_string()));
        let mut bad = ElementResult::new(ElementKind::Array, "image");
        bad.record_success();
        bad.record_failure(read_error([0, 1]));
        container.push_element(bad);

        let text = container.to_string();
        assert!(text.starts_with("Checking container: sample.zarr"));
        assert!(text.contains("✗ Array: 'image' (2 chunks checked)"));
        assert!(text.contains("Error at chunk (0, 1): GenericReadError [image]"));
        assert!(text.ends_with("Summary: 1 error(s) found in 1 element(s)"));
    }
}
