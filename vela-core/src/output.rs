//! Output - Project resolved attributes into a result table
//!
//! Runs last: the projection refuses to read from a graph that is not
//! fully finalized, so a partially provisioned run can never leak half a
//! result table.

use crate::graph::Graph;
use crate::resolver::{AttributeResolver, ResolveError};
use crate::resource::PlaceholderBinding;
use crate::template;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProjectionError {
    #[error("graph is not fully finalized: '{0}' is still pending")]
    NotFinalized(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Where an output value comes from
#[derive(Debug, Clone)]
pub enum OutputSource {
    /// A single resolved attribute
    Attribute { node: String, attribute: String },
    /// A format string with placeholder tokens bound to resolved
    /// attributes (composed connection commands, URLs)
    Composed {
        format: String,
        bindings: Vec<PlaceholderBinding>,
    },
}

#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    pub source: OutputSource,
}

impl OutputSpec {
    pub fn attribute(
        name: impl Into<String>,
        node: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: OutputSource::Attribute {
                node: node.into(),
                attribute: attribute.into(),
            },
        }
    }

    pub fn composed(
        name: impl Into<String>,
        format: impl Into<String>,
        bindings: Vec<PlaceholderBinding>,
    ) -> Self {
        Self {
            name: name.into(),
            source: OutputSource::Composed {
                format: format.into(),
                bindings,
            },
        }
    }
}

/// Project the ordered output table from resolved attributes
pub fn project(
    graph: &Graph,
    resolver: &AttributeResolver,
    specs: &[OutputSpec],
) -> Result<Vec<(String, String)>, ProjectionError> {
    if let Some(name) = graph.first_unfinalized() {
        return Err(ProjectionError::NotFinalized(name.to_string()));
    }

    let mut outputs = Vec::with_capacity(specs.len());
    for spec in specs {
        let value = match &spec.source {
            OutputSource::Attribute { node, attribute } => {
                resolver.read(node, attribute)?.to_string()
            }
            OutputSource::Composed { format, bindings } => {
                let mut values: Vec<(String, String)> = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    let value = resolver.read(&binding.node, &binding.attribute)?;
                    values.push((binding.token.clone(), value.to_string()));
                }
                template::substitute(format, &values)
            }
        };
        outputs.push((spec.name.clone(), value));
    }

    Ok(outputs)
}
