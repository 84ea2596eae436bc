//! Apply - Drive a topology through a provider in dependency order
//!
//! Nodes are provisioned strictly in topological order. A node's deferred
//! attributes are written back through the resolver right before it is
//! finalized, which is what makes them readable by later nodes' inputs,
//! bootstrap scripts, and the output projection.

use std::collections::HashMap;

use crate::builder::Topology;
use crate::graph::GraphError;
use crate::provider::{Provider, ProviderError};
use crate::resolver::ResolveError;
use crate::resource::Value;
use crate::template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("backend did not report attribute '{attribute}' for node '{node}'")]
    MissingOutput { node: String, attribute: String },
}

/// Outcome of provisioning one node
#[derive(Debug)]
pub enum NodeOutcome {
    Created { identifier: String },
    Skipped { reason: String },
}

/// Result of one apply run
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<(String, Result<NodeOutcome, ApplyError>)>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }
}

/// Provisioner configuration
#[derive(Debug, Clone, Default)]
pub struct ProvisionConfig {
    /// If true, skip actual side effects
    pub dry_run: bool,
    /// Keep provisioning independent subtrees after a failure. Dependents
    /// of the failed node are still refused at the graph.
    pub continue_on_error: bool,
}

/// Drives a topology through a provider
pub struct Provisioner<P: Provider> {
    provider: P,
    config: ProvisionConfig,
}

impl<P: Provider> Provisioner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            config: ProvisionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProvisionConfig) -> Self {
        self.config = config;
        self
    }

    /// Provision every node in topological order. A structural error in
    /// the graph aborts before anything is created.
    pub async fn apply(&self, topology: &mut Topology) -> Result<ApplyReport, GraphError> {
        let order = topology.graph.topological_order()?;

        let mut report = ApplyReport::default();
        for name in order {
            let result = self.provision_node(&name, topology).await;

            match &result {
                Ok(_) => report.success_count += 1,
                Err(_) => {
                    report.failure_count += 1;
                    if !self.config.continue_on_error {
                        report.outcomes.push((name, result));
                        break;
                    }
                }
            }

            report.outcomes.push((name, result));
        }

        Ok(report)
    }

    async fn provision_node(
        &self,
        name: &str,
        topology: &mut Topology,
    ) -> Result<NodeOutcome, ApplyError> {
        if self.config.dry_run {
            return Ok(NodeOutcome::Skipped {
                reason: "dry-run mode".to_string(),
            });
        }

        // Refused while any predecessor is unfinalized; after a failure
        // upstream this is what keeps dependents from being provisioned.
        topology.graph.begin(name)?;

        let user_data = if topology.templates.contains(name) {
            Some(topology.templates.materialize(name, &topology.resolver)?)
        } else {
            None
        };

        let node = topology
            .graph
            .node(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNode(name.to_string()))?;

        let mut inputs: HashMap<String, Value> = HashMap::with_capacity(node.attributes.len() + 1);
        for (key, value) in &node.attributes {
            let concrete = match value {
                Value::Ref(owner, attribute) => topology.resolver.read(owner, attribute)?.clone(),
                other => other.clone(),
            };
            inputs.insert(key.clone(), concrete);
        }
        if let Some(script) = user_data {
            inputs.insert("user_data".to_string(), Value::String(script));
        }

        let created = self.provider.create(&node, &inputs).await?;

        for attribute in &node.deferred {
            let value = created
                .attributes
                .get(attribute)
                .cloned()
                .ok_or_else(|| ApplyError::MissingOutput {
                    node: name.to_string(),
                    attribute: attribute.clone(),
                })?;
            topology.resolver.resolve(name, attribute, value)?;
        }

        topology.graph.finalize(name)?;

        Ok(NodeOutcome::Created {
            identifier: created.identifier,
        })
    }
}
