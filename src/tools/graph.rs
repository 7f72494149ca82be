//! Static dependency DAG over declared tools.
//!
//! Edges point from a tool to each of its direct prerequisites. The graph is
//! validated once at construction: every referenced dependency must be
//! declared and no cycle may exist.

use super::catalog::{ToolCatalog, ToolDescriptor};
use crate::types::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Tool → prerequisites, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    declared: Vec<String>,
    edges: HashMap<String, Vec<String>>,
    reverse: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate the graph for every tool in a catalog.
    ///
    /// Also checks that each derivation reads from a transitive prerequisite,
    /// so its source always runs earlier in a plan.
    pub fn from_catalog(catalog: &ToolCatalog) -> Result<Self> {
        let mut graph = Self::new();
        for descriptor in catalog.descriptors() {
            graph.add_tool(descriptor)?;
        }
        let graph = graph.build()?;

        for descriptor in catalog.descriptors() {
            let upstream = graph.all_dependencies(&descriptor.name)?;
            for derivation in &descriptor.derivations {
                if !upstream.contains(&derivation.source) {
                    return Err(Error::configuration(format!(
                        "Tool '{}' derives '{}' from '{}', which is not one of its prerequisites",
                        descriptor.name, derivation.param, derivation.source
                    )));
                }
            }
        }
        Ok(graph)
    }

    /// Add a node during construction.
    pub fn add_tool(&mut self, descriptor: &ToolDescriptor) -> Result<()> {
        if self.edges.contains_key(&descriptor.name) {
            return Err(Error::configuration(format!(
                "Tool '{}' declared twice",
                descriptor.name
            )));
        }
        for dep in &descriptor.dependencies {
            self.reverse
                .entry(dep.clone())
                .or_default()
                .push(descriptor.name.clone());
        }
        self.declared.push(descriptor.name.clone());
        self.edges
            .insert(descriptor.name.clone(), descriptor.dependencies.clone());
        Ok(())
    }

    /// Finish construction: reject undeclared dependencies and cycles.
    pub fn build(self) -> Result<Self> {
        for name in &self.declared {
            for dep in &self.edges[name] {
                if !self.edges.contains_key(dep) {
                    return Err(Error::configuration(format!(
                        "Tool '{}' depends on undeclared tool '{}'",
                        name, dep
                    )));
                }
            }
        }

        let mut visited = HashSet::new();
        let mut sink = Vec::new();
        for name in &self.declared {
            self.visit(name, &mut Vec::new(), &mut visited, &mut sink)?;
        }
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.edges.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Direct prerequisites of `name`.
    pub fn dependencies_of(&self, name: &str) -> Result<&[String]> {
        self.edges
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    /// Tools that list `name` as a direct prerequisite, in declaration order.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.reverse.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every transitive prerequisite of `name`, in topological order.
    pub fn all_dependencies(&self, name: &str) -> Result<Vec<String>> {
        let mut order = self.topological_order(name)?;
        order.pop();
        Ok(order)
    }

    /// Transitive prerequisites of `name` followed by `name` itself.
    ///
    /// Each tool appears once and precedes every tool that depends on it.
    /// Siblings keep declaration order.
    pub fn topological_order(&self, name: &str) -> Result<Vec<String>> {
        if !self.contains(name) {
            return Err(Error::UnknownTool(name.to_string()));
        }
        let mut order = Vec::new();
        self.visit(name, &mut Vec::new(), &mut HashSet::new(), &mut order)?;
        Ok(order)
    }

    /// Post-order DFS. `path` is the visiting stack used for cycle detection.
    fn visit(
        &self,
        node: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(node) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Err(Error::CycleDetected { cycle });
        }

        let deps = self.edges.get(node).ok_or_else(|| {
            Error::configuration(format!("Undeclared tool '{}' in dependency graph", node))
        })?;

        path.push(node.to_string());
        for dep in deps {
            self.visit(dep, path, visited, out)?;
        }
        path.pop();

        visited.insert(node.to_string());
        out.push(node.to_string());
        Ok(())
    }
}
