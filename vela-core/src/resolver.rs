//! Resolver - Write-once storage for resource attributes
//!
//! Declared attributes resolve at registration; deferred attributes are
//! resolved exactly once, when the owning node is provisioned. Readers see
//! the resolved value or an error, never a stale copy. Callers are expected
//! to read a deferred attribute only after the graph reports its owner
//! finalized.

use std::collections::HashMap;

use crate::resource::Value;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("attribute {node}.{attribute} is already resolved")]
    DoubleResolution { node: String, attribute: String },

    #[error("attribute {node}.{attribute} is not yet resolved")]
    NotYetResolved { node: String, attribute: String },

    #[error("unknown attribute: {node}.{attribute}")]
    UnknownAttribute { node: String, attribute: String },
}

/// Resolution state of a single attribute
#[derive(Debug, Clone)]
enum Cell {
    Unresolved,
    Resolved(Value),
}

#[derive(Debug, Clone, Default)]
pub struct AttributeResolver {
    cells: HashMap<(String, String), Cell>,
}

impl AttributeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attribute. A supplied value resolves it immediately
    /// (an identifier chosen at declaration time); `None` registers a
    /// deferred attribute. Re-declaring an existing attribute is a no-op.
    pub fn declare(&mut self, node: &str, name: &str, value: Option<Value>) {
        let cell = match value {
            Some(v) => Cell::Resolved(v),
            None => Cell::Unresolved,
        };
        self.cells
            .entry((node.to_string(), name.to_string()))
            .or_insert(cell);
    }

    /// Resolve a deferred attribute. A provisioned resource's computed
    /// properties never change, so a second call fails regardless of
    /// whether the value differs.
    pub fn resolve(&mut self, node: &str, name: &str, value: Value) -> Result<(), ResolveError> {
        let cell = self
            .cells
            .get_mut(&(node.to_string(), name.to_string()))
            .ok_or_else(|| ResolveError::UnknownAttribute {
                node: node.to_string(),
                attribute: name.to_string(),
            })?;
        match cell {
            Cell::Resolved(_) => Err(ResolveError::DoubleResolution {
                node: node.to_string(),
                attribute: name.to_string(),
            }),
            Cell::Unresolved => {
                *cell = Cell::Resolved(value);
                Ok(())
            }
        }
    }

    pub fn read(&self, node: &str, name: &str) -> Result<&Value, ResolveError> {
        match self.cells.get(&(node.to_string(), name.to_string())) {
            Some(Cell::Resolved(value)) => Ok(value),
            Some(Cell::Unresolved) => Err(ResolveError::NotYetResolved {
                node: node.to_string(),
                attribute: name.to_string(),
            }),
            None => Err(ResolveError::UnknownAttribute {
                node: node.to_string(),
                attribute: name.to_string(),
            }),
        }
    }

    pub fn is_resolved(&self, node: &str, name: &str) -> bool {
        matches!(
            self.cells.get(&(node.to_string(), name.to_string())),
            Some(Cell::Resolved(_))
        )
    }
}
