//! Graph - Dependency-ordered set of resource nodes
//!
//! An edge A -> B means A must be finalized before B. Nodes keep their
//! insertion order, which breaks ties in the topological order and makes
//! repeated builds reproducible.

use std::collections::{HashMap, HashSet};

use crate::resource::ResourceNode;

/// Lifecycle of a node within one provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Added to the graph, not yet scheduled
    Declared,
    /// Provisioning has started; every predecessor is finalized
    Pending,
    /// Provisioned; deferred attributes are readable
    Finalized,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    #[error("adding '{node}' would create a dependency cycle")]
    Cycle { node: String },

    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node '{node}' reads '{target}' but does not list it as a predecessor")]
    MissingPredecessor { node: String, target: String },

    #[error("cannot finalize '{node}': predecessor '{waiting_on}' is not finalized")]
    PrematureFinalize { node: String, waiting_on: String },

    #[error("node '{0}' is already finalized")]
    AlreadyFinalized(String),
}

/// Directed acyclic graph owning every resource node of one build
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: HashMap<String, ResourceNode>,
    /// Node names in insertion order
    order: Vec<String>,
    states: HashMap<String, NodeState>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Predecessors may name nodes that are not in the graph
    /// yet; those forward references are validated by `topological_order`.
    /// Fails atomically: a rejected node leaves the graph untouched.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.name) {
            return Err(GraphError::DuplicateNode(node.name));
        }

        // Every node read through a Ref attribute or a template binding
        // must also be a declared predecessor.
        for target in node.referenced_nodes() {
            if !node.predecessors.iter().any(|p| p == target) {
                return Err(GraphError::MissingPredecessor {
                    node: node.name.clone(),
                    target: target.to_string(),
                });
            }
        }

        let name = node.name.clone();
        self.order.push(name.clone());
        self.states.insert(name.clone(), NodeState::Declared);
        self.nodes.insert(name.clone(), node);

        // The graph was acyclic before this insert, so any new cycle must
        // pass through the new node: walk its predecessors transitively
        // and reject if the walk comes back. Covers self-edges.
        if self.reaches(&name, &name, &mut HashSet::new()) {
            self.nodes.remove(&name);
            self.states.remove(&name);
            self.order.pop();
            return Err(GraphError::Cycle { node: name });
        }

        Ok(())
    }

    /// True if following predecessor edges from `from` reaches `target`
    fn reaches(&self, from: &str, target: &str, seen: &mut HashSet<String>) -> bool {
        let Some(node) = self.nodes.get(from) else {
            return false;
        };
        for pred in &node.predecessors {
            if pred == target {
                return true;
            }
            if seen.insert(pred.clone()) && self.reaches(pred, target, seen) {
                return true;
            }
        }
        false
    }

    /// Node names such that every predecessor precedes its dependents.
    /// Ties among independent nodes are broken by insertion order, so the
    /// result is stable across calls and across identical builds.
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        // Dangling predecessors are an error, not a silent deadlock
        for name in &self.order {
            if let Some(node) = self.nodes.get(name) {
                for pred in &node.predecessors {
                    if !self.nodes.contains_key(pred) {
                        return Err(GraphError::UnknownNode(pred.clone()));
                    }
                }
            }
        }

        let mut done: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&String> = self.order.iter().collect();
        let mut out: Vec<String> = Vec::with_capacity(self.order.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().position(|name| {
                self.nodes
                    .get(*name)
                    .is_some_and(|n| n.predecessors.iter().all(|p| done.contains(p.as_str())))
            });
            let Some(idx) = ready else {
                return Err(GraphError::Cycle {
                    node: remaining[0].clone(),
                });
            };
            let name = remaining.remove(idx);
            done.insert(name.as_str());
            out.push(name.clone());
        }

        Ok(out)
    }

    /// Mark that provisioning of a node has started. Refused while any
    /// predecessor is not finalized, which is what keeps dependents of a
    /// failed node from being provisioned.
    pub fn begin(&mut self, name: &str) -> Result<(), GraphError> {
        self.check_predecessors_finalized(name)?;
        self.states.insert(name.to_string(), NodeState::Pending);
        Ok(())
    }

    /// Mark a node provisioned. From here on its deferred attributes are
    /// readable. A node with no predecessors finalizes immediately.
    pub fn finalize(&mut self, name: &str) -> Result<(), GraphError> {
        self.check_predecessors_finalized(name)?;
        self.states.insert(name.to_string(), NodeState::Finalized);
        Ok(())
    }

    fn check_predecessors_finalized(&self, name: &str) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(name)
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;
        if self.state(name) == Some(NodeState::Finalized) {
            return Err(GraphError::AlreadyFinalized(name.to_string()));
        }
        let waiting = node
            .predecessors
            .iter()
            .find(|p| !self.is_finalized(p))
            .cloned();
        if let Some(waiting_on) = waiting {
            return Err(GraphError::PrematureFinalize {
                node: name.to_string(),
                waiting_on,
            });
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    pub fn state(&self, name: &str) -> Option<NodeState> {
        self.states.get(name).copied()
    }

    pub fn is_finalized(&self, name: &str) -> bool {
        self.state(name) == Some(NodeState::Finalized)
    }

    /// First node (in insertion order) that is not finalized
    pub fn first_unfinalized(&self) -> Option<&str> {
        self.order
            .iter()
            .find(|n| !self.is_finalized(n))
            .map(|s| s.as_str())
    }

    /// Node names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{NodeKind, Value};

    fn node(name: &str, preds: &[&str]) -> ResourceNode {
        let mut n = ResourceNode::new(name, NodeKind::ComputeInstance);
        for p in preds {
            n = n.with_predecessor(*p);
        }
        n
    }

    #[test]
    fn cycle_detected_on_insert() {
        let mut graph = Graph::new();

        // a -> b -> c -> a, declared with a forward reference
        graph.add_node(node("a", &["c"])).unwrap();
        graph.add_node(node("b", &["a"])).unwrap();
        let err = graph.add_node(node("c", &["b"])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { node } if node == "c"));

        // the rejected node must not linger
        assert!(graph.node("c").is_none());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut graph = Graph::new();
        let err = graph.add_node(node("a", &["a"])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut graph = Graph::new();
        graph.add_node(node("a", &[])).unwrap();
        let err = graph.add_node(node("a", &[])).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode(_)));
    }

    #[test]
    fn unlisted_reference_rejected() {
        let mut graph = Graph::new();
        graph.add_node(node("database", &[])).unwrap();

        let webapp = ResourceNode::new("webapp", NodeKind::ComputeInstance).with_attribute(
            "db_host",
            Value::Ref("database".to_string(), "private_ip".to_string()),
        );
        let err = graph.add_node(webapp).unwrap_err();
        assert!(matches!(
            err,
            GraphError::MissingPredecessor { node, target } if node == "webapp" && target == "database"
        ));
    }

    #[test]
    fn topological_order_respects_edges_and_insertion() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.add_node(node("database", &["network"])).unwrap();
        graph.add_node(node("webapp", &["network", "database"])).unwrap();
        graph
            .add_node(node("bastion", &["webapp", "database"]))
            .unwrap();

        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["network", "database", "webapp", "bastion"]);
    }

    #[test]
    fn topological_order_is_stable() {
        let mut graph = Graph::new();
        graph.add_node(node("a", &[])).unwrap();
        graph.add_node(node("b", &[])).unwrap();
        graph.add_node(node("c", &["a"])).unwrap();
        graph.add_node(node("d", &["b", "a"])).unwrap();

        let first = graph.topological_order().unwrap();
        let second = graph.topological_order().unwrap();
        assert_eq!(first, second);
        // independent nodes keep insertion order
        assert_eq!(first, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn dangling_predecessor_fails_ordering() {
        let mut graph = Graph::new();
        graph.add_node(node("a", &["ghost"])).unwrap();
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode(n) if n == "ghost"));
    }

    #[test]
    fn finalize_in_dependency_order() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.add_node(node("database", &["network"])).unwrap();
        graph.add_node(node("webapp", &["network", "database"])).unwrap();
        graph
            .add_node(node("bastion", &["webapp", "database"]))
            .unwrap();

        for name in ["network", "database", "webapp", "bastion"] {
            graph.finalize(name).unwrap();
        }
        assert!(graph.first_unfinalized().is_none());
    }

    #[test]
    fn premature_finalize_names_the_missing_predecessor() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.add_node(node("database", &["network"])).unwrap();
        graph.add_node(node("webapp", &["network", "database"])).unwrap();
        graph
            .add_node(node("bastion", &["webapp", "database"]))
            .unwrap();

        graph.finalize("network").unwrap();
        // webapp before database must fail at the webapp step
        let err = graph.finalize("webapp").unwrap_err();
        assert!(matches!(
            err,
            GraphError::PrematureFinalize { node, waiting_on }
                if node == "webapp" && waiting_on == "database"
        ));
    }

    #[test]
    fn zero_predecessor_node_finalizes_immediately() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.finalize("network").unwrap();
        assert!(graph.is_finalized("network"));
    }

    #[test]
    fn finalize_is_not_repeatable() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.finalize("network").unwrap();
        let err = graph.finalize("network").unwrap_err();
        assert!(matches!(err, GraphError::AlreadyFinalized(_)));
    }

    #[test]
    fn begin_refuses_dependents_of_unfinished_nodes() {
        let mut graph = Graph::new();
        graph.add_node(node("network", &[])).unwrap();
        graph.add_node(node("webapp", &["network"])).unwrap();

        let err = graph.begin("webapp").unwrap_err();
        assert!(matches!(err, GraphError::PrematureFinalize { .. }));

        graph.finalize("network").unwrap();
        graph.begin("webapp").unwrap();
        assert_eq!(graph.state("webapp"), Some(NodeState::Pending));
    }
}
