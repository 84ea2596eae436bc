//! Provider - Trait abstracting the provisioning backend
//!
//! A backend receives a fully resolved input set for one node and returns
//! a handle: the backend identifier plus the attribute values that only
//! exist after creation. Transient backend failures (timeouts, throttling)
//! are the backend's own business; from this engine's point of view a
//! failed create simply means the node never finalizes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::resource::{ResourceNode, Value};

/// Error type for provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub node: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref node) = self.node {
            write!(f, "[{}] {}", node, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            node: None,
            cause: None,
        }
    }

    pub fn for_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle returned by the backend for a created resource
#[derive(Debug, Clone)]
pub struct Created {
    /// Backend identifier (e.g., "net-7f3a21")
    pub identifier: String,
    /// Attribute values available only after creation
    pub attributes: HashMap<String, Value>,
}

impl Created {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Main provider trait
///
/// Each provisioning backend implements this trait. `inputs` is the node's
/// declared attribute map with every reference replaced by its resolved
/// value and the materialized bootstrap script, if any, under `user_data`.
pub trait Provider: Send + Sync {
    /// Name of this provider (e.g., "local")
    fn name(&self) -> &'static str;

    /// Create the resource and report its post-creation attributes
    fn create(
        &self,
        node: &ResourceNode,
        inputs: &HashMap<String, Value>,
    ) -> BoxFuture<'_, ProviderResult<Created>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create(
        &self,
        node: &ResourceNode,
        inputs: &HashMap<String, Value>,
    ) -> BoxFuture<'_, ProviderResult<Created>> {
        (**self).create(node, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NodeKind;

    struct MockProvider;

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn create(
            &self,
            node: &ResourceNode,
            _inputs: &HashMap<String, Value>,
        ) -> BoxFuture<'_, ProviderResult<Created>> {
            let mut created = Created::new("mock-id-123");
            for deferred in &node.deferred {
                created = created.with_attribute(
                    deferred.clone(),
                    Value::String(format!("{}-value", deferred)),
                );
            }
            Box::pin(async move { Ok(created) })
        }
    }

    #[tokio::test]
    async fn mock_provider_reports_deferred_attributes() {
        let provider = MockProvider;
        let node = ResourceNode::new("database", NodeKind::ComputeInstance)
            .with_deferred("private_ip");

        let created = provider.create(&node, &HashMap::new()).await.unwrap();
        assert_eq!(created.identifier, "mock-id-123");
        assert_eq!(
            created.attributes.get("private_ip"),
            Some(&Value::String("private_ip-value".to_string()))
        );
    }

    #[test]
    fn provider_error_display_includes_node() {
        let err = ProviderError::new("address pool exhausted").for_node("webapp");
        assert_eq!(err.to_string(), "[webapp] address pool exhausted");
    }
}
