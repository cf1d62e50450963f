//! Container-level scanning
//!
//! [`ContainerScanner`] walks the element groups of a container and hands every
//! element to the [`ElementScanner`]. Failures while listing a group or loading
//! one element become structural errors on the [`ContainerResult`]; the walk
//! carries on with the next element.

use crate::config::ScanConfig;
use crate::integrity::{isolate, ElementScanner, ScanStats};
use crate::store::{Container, ContainerLoader};
use crate::structures::{ContainerResult, ElementGroup};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub struct ContainerScanner {
    elements: ElementScanner,
}

impl ContainerScanner {
    /// Create a scanner, rejecting an invalid configuration
    pub fn new(config: ScanConfig) -> crate::Result<Self> {
        Ok(Self {
            elements: ElementScanner::new(config)?,
        })
    }

    pub fn with_default_config() -> Self {
        Self {
            elements: ElementScanner::with_default_config(),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        self.elements.config()
    }

    pub fn stats(&self) -> ScanStats {
        self.elements.stats()
    }

    /// Scan an already loaded container
    ///
    /// `groups` restricts the scan; `None` scans all five groups.
    pub fn scan(&self, container: &dyn Container, groups: Option<&[ElementGroup]>) -> ContainerResult {
        self.scan_into(ContainerResult::new(None), container, groups)
    }

    /// Scan an already loaded container, recording where it came from
    pub fn scan_at(
        &self,
        container: &dyn Container,
        source_path: &str,
        groups: Option<&[ElementGroup]>,
    ) -> ContainerResult {
        self.scan_into(ContainerResult::new(Some(source_path.to_string())), container, groups)
    }

    /// Load the container at `location` and scan it
    ///
    /// A load failure yields an invalid result with a single structural error
    /// and no elements.
    pub fn scan_location(
        &self,
        loader: &dyn ContainerLoader,
        location: &str,
        groups: Option<&[ElementGroup]>,
    ) -> ContainerResult {
        match isolate(|| loader.load(location)) {
            Ok(container) => self.scan_at(container.as_ref(), location, groups),
            Err(e) => {
                warn!(location, error = %e, "failed to load container");
                ContainerResult::load_failure(
                    location,
                    format!("Failed to load container: {}: {}", e.type_name(), e.message()),
                )
            }
        }
    }

    fn scan_into(
        &self,
        mut result: ContainerResult,
        container: &dyn Container,
        groups: Option<&[ElementGroup]>,
    ) -> ContainerResult {
        let groups = groups.unwrap_or(&ElementGroup::ALL);
        let mut visited_groups: Vec<ElementGroup> = Vec::with_capacity(groups.len());

        for &group in groups {
            if visited_groups.contains(&group) {
                continue;
            }
            visited_groups.push(group);

            if !isolate(|| Ok(container.has_group(group))).unwrap_or(false) {
                debug!(%group, "container has no elements of this group");
                continue;
            }

            let names = match isolate(|| container.element_names(group)) {
                Ok(names) => names,
                Err(e) => {
                    let message = format!("Error checking {}: {}: {}", group, e.type_name(), e.message());
                    warn!(%group, %message, "structural error");
                    result.push_structural_error(message);
                    continue;
                }
            };

            let mut visited_names = HashSet::with_capacity(names.len());
            for name in names {
                if !visited_names.insert(name.clone()) {
                    debug!(%group, element = %name, "element listed more than once");
                    continue;
                }
                match isolate(|| container.load_element(group, &name)) {
                    Ok(handle) => result.push_element(self.elements.scan_element(group, &name, &handle)),
                    Err(e) => {
                        let message =
                            format!("Error checking {} '{}': {}: {}", group, name, e.type_name(), e.message());
                        warn!(%group, element = %name, %message, "structural error");
                        result.push_structural_error(message);
                    }
                }
            }
        }

        info!(
            source_path = result.source_path().unwrap_or("<container>"),
            elements = result.elements().len(),
            chunks_checked = result.total_chunks_checked(),
            valid = result.is_valid(),
            "container scanned"
        );
        result
    }
}
