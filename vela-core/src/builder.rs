//! Builder - Flag-conditional topology construction
//!
//! A catalog lists every node the system can provision. A build evaluates
//! each entry's inclusion predicate once against an immutable flag set and
//! wires the surviving nodes into a graph, substituting fallback edges
//! where a dependency was excluded. The same flags always produce a
//! structurally identical topology.

use std::collections::{HashMap, HashSet};

use crate::graph::{Graph, GraphError};
use crate::resolver::AttributeResolver;
use crate::resource::{ResourceNode, Value};
use crate::template::{TemplateError, TemplateMaterializer};

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    #[error("node '{node}' depends on excluded node '{excluded}' and no included fallback edge is defined")]
    MissingFallbackEdge { node: String, excluded: String },

    #[error("duplicate catalog entry: {0}")]
    DuplicateEntry(String),

    #[error("node '{node}' depends on '{target}', which is not in the catalog")]
    UnknownDependency { node: String, target: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Configuration read once per build. Flags never change while a topology
/// is being constructed, and readers state their own default rather than
/// inheriting truthiness rules.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    bools: HashMap<String, bool>,
    values: HashMap<String, String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bool(mut self, name: impl Into<String>, value: bool) -> Self {
        self.bools.insert(name.into(), value);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.bools.get(name).copied().unwrap_or(default)
    }

    pub fn value_or(&self, name: &str, default: &str) -> String {
        self.values
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// A dependency edge with an optional fallback used when the primary
/// target is excluded by flags
#[derive(Debug, Clone)]
pub struct DependsOn {
    pub on: String,
    pub fallback: Option<String>,
}

type IncludeFn = Box<dyn Fn(&FlagSet) -> bool>;
type DefineFn = Box<dyn Fn(&FlagSet) -> ResourceNode>;

/// One candidate node in the catalog. The definition closure produces the
/// node for the active flags; name and predecessors are owned by the
/// catalog so the builder controls the wiring.
pub struct CatalogEntry {
    name: String,
    include: IncludeFn,
    depends_on: Vec<DependsOn>,
    define: DefineFn,
}

impl CatalogEntry {
    /// Entry included in every build
    pub fn new(
        name: impl Into<String>,
        define: impl Fn(&FlagSet) -> ResourceNode + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            include: Box::new(|_| true),
            depends_on: Vec::new(),
            define: Box::new(define),
        }
    }

    /// Make inclusion conditional on the flags
    pub fn included_when(mut self, predicate: impl Fn(&FlagSet) -> bool + 'static) -> Self {
        self.include = Box::new(predicate);
        self
    }

    pub fn depends_on(mut self, target: impl Into<String>) -> Self {
        self.depends_on.push(DependsOn {
            on: target.into(),
            fallback: None,
        });
        self
    }

    /// Depend on `target` when it is included, on `fallback` otherwise
    pub fn depends_on_with_fallback(
        mut self,
        target: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        self.depends_on.push(DependsOn {
            on: target.into(),
            fallback: Some(fallback.into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything one provisioning run needs, produced by a build and
/// discarded afterwards
#[derive(Debug, Default)]
pub struct Topology {
    pub graph: Graph,
    pub resolver: AttributeResolver,
    pub templates: TemplateMaterializer,
}

#[derive(Default)]
pub struct ConditionalTopologyBuilder {
    entries: Vec<CatalogEntry>,
}

impl ConditionalTopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: CatalogEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Build the topology permitted by `flags`. Omitted nodes take every
    /// edge touching them; dependents fall back to their declared fallback
    /// edge or the build fails.
    pub fn build(&self, flags: &FlagSet) -> Result<Topology, BuildError> {
        let mut names: HashSet<&str> = HashSet::new();
        for entry in &self.entries {
            if !names.insert(entry.name.as_str()) {
                return Err(BuildError::DuplicateEntry(entry.name.clone()));
            }
        }

        let included: HashSet<&str> = self
            .entries
            .iter()
            .filter(|e| (e.include)(flags))
            .map(|e| e.name.as_str())
            .collect();

        let mut topology = Topology::default();

        for entry in &self.entries {
            if !included.contains(entry.name.as_str()) {
                continue;
            }

            let mut predecessors: Vec<String> = Vec::new();
            for dep in &entry.depends_on {
                if !names.contains(dep.on.as_str()) {
                    return Err(BuildError::UnknownDependency {
                        node: entry.name.clone(),
                        target: dep.on.clone(),
                    });
                }
                let target = if included.contains(dep.on.as_str()) {
                    dep.on.clone()
                } else {
                    match &dep.fallback {
                        Some(fallback) if included.contains(fallback.as_str()) => fallback.clone(),
                        _ => {
                            return Err(BuildError::MissingFallbackEdge {
                                node: entry.name.clone(),
                                excluded: dep.on.clone(),
                            });
                        }
                    }
                };
                if !predecessors.contains(&target) {
                    predecessors.push(target);
                }
            }

            let mut node = (entry.define)(flags);
            node.name = entry.name.clone();
            node.predecessors = predecessors;

            // Reference attributes stay inputs; only concrete values are
            // readable through the resolver.
            for (attr, value) in &node.attributes {
                if !matches!(value, Value::Ref(_, _)) {
                    topology
                        .resolver
                        .declare(&node.name, attr, Some(value.clone()));
                }
            }
            for deferred in &node.deferred {
                topology.resolver.declare(&node.name, deferred, None);
            }
            if let Some(bootstrap) = &node.bootstrap {
                topology.templates.register(
                    &node.name,
                    bootstrap.text.clone(),
                    bootstrap.bindings.clone(),
                )?;
            }

            topology.graph.add_node(node)?;
        }

        Ok(topology)
    }
}
