//! Resource - Node identity, kinds and attribute values

use std::collections::HashMap;

/// Kind of resource a node provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Network,
    SecurityRule,
    ComputeInstance,
    PeeringRoute,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeKind::Network => "network",
            NodeKind::SecurityRule => "security-rule",
            NodeKind::ComputeInstance => "compute-instance",
            NodeKind::PeeringRoute => "peering-route",
        };
        write!(f, "{}", s)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    /// Reference to another node's attribute (node_name, attribute_name).
    /// Readable only once the owning node is finalized.
    Ref(String, String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Ref(node, attribute) => write!(f, "{}.{}", node, attribute),
        }
    }
}

/// One placeholder in a template, bound to another node's attribute
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderBinding {
    /// Literal token as it appears in the template (e.g., `${database_private_ip}`)
    pub token: String,
    /// Node that owns the bound attribute
    pub node: String,
    /// Attribute name on the owning node
    pub attribute: String,
}

impl PlaceholderBinding {
    pub fn new(
        token: impl Into<String>,
        node: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            node: node.into(),
            attribute: attribute.into(),
        }
    }
}

/// Bootstrap script attached to a node, materialized just before the node
/// is provisioned
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapTemplate {
    /// Raw script text, treated as opaque apart from the bound tokens
    pub text: String,
    pub bindings: Vec<PlaceholderBinding>,
}

/// A resource to be provisioned, declared before anything exists
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Stable name, unique within a graph
    pub name: String,
    pub kind: NodeKind,
    /// Attributes known at construction time
    pub attributes: HashMap<String, Value>,
    /// Attribute names valued only after the backend creates the resource
    pub deferred: Vec<String>,
    /// Nodes that must be finalized before this one
    pub predecessors: Vec<String>,
    pub bootstrap: Option<BootstrapTemplate>,
}

impl ResourceNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            attributes: HashMap::new(),
            deferred: Vec::new(),
            predecessors: Vec::new(),
            bootstrap: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_deferred(mut self, name: impl Into<String>) -> Self {
        self.deferred.push(name.into());
        self
    }

    pub fn with_predecessor(mut self, name: impl Into<String>) -> Self {
        self.predecessors.push(name.into());
        self
    }

    pub fn with_bootstrap(mut self, text: impl Into<String>, bindings: Vec<PlaceholderBinding>) -> Self {
        self.bootstrap = Some(BootstrapTemplate {
            text: text.into(),
            bindings,
        });
        self
    }

    /// Nodes this node reads, through `Value::Ref` attributes or template
    /// bindings. Every one of them must appear in the predecessor list.
    pub fn referenced_nodes(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        for value in self.attributes.values() {
            if let Value::Ref(node, _) = value {
                if !refs.contains(&node.as_str()) {
                    refs.push(node);
                }
            }
        }
        if let Some(bootstrap) = &self.bootstrap {
            for binding in &bootstrap.bindings {
                if !refs.contains(&binding.node.as_str()) {
                    refs.push(&binding.node);
                }
            }
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_nodes_from_attributes_and_bindings() {
        let node = ResourceNode::new("webapp", NodeKind::ComputeInstance)
            .with_attribute(
                "security_group",
                Value::Ref("webapp-sg".to_string(), "security_group_id".to_string()),
            )
            .with_attribute("instance_type", Value::String("t3.micro".to_string()))
            .with_bootstrap(
                "DB=${db_ip}",
                vec![PlaceholderBinding::new("${db_ip}", "database", "private_ip")],
            );

        let refs = node.referenced_nodes();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&"webapp-sg"));
        assert!(refs.contains(&"database"));
    }

    #[test]
    fn value_display_is_raw() {
        assert_eq!(Value::String("10.0.1.5".to_string()).to_string(), "10.0.1.5");
        assert_eq!(Value::Int(22).to_string(), "22");
        assert_eq!(
            Value::Ref("database".to_string(), "private_ip".to_string()).to_string(),
            "database.private_ip"
        );
    }
}
