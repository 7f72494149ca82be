//! Tool infrastructure - catalog, dependency graph, DDR declarations.
//!
//! Descriptors are declared once at startup and never mutated. The
//! registry pairs the catalog with its validated dependency graph so the
//! planner can never see one without the other.

pub mod catalog;
pub mod ddr;
pub mod graph;

pub use catalog::{
    DerivationContext, DeriveFn, ParamDef, ParamDerivation, ParamType, ToolCatalog,
    ToolDescriptor,
};
pub use graph::DependencyGraph;

use crate::types::Result;

/// Validated catalog and dependency graph.
#[derive(Debug)]
pub struct ToolRegistry {
    catalog: ToolCatalog,
    graph: DependencyGraph,
}

impl ToolRegistry {
    /// Build the graph for `catalog`, failing on configuration errors or cycles.
    pub fn new(catalog: ToolCatalog) -> Result<Self> {
        let graph = DependencyGraph::from_catalog(&catalog)?;
        Ok(Self { catalog, graph })
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn descriptor(&self, tool: &str) -> Result<&ToolDescriptor> {
        self.catalog.require(tool)
    }
}
