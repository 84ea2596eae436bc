//! Vela Local Provider
//!
//! An in-process backend that simulates provisioning: stable address
//! allocation per subnet, fabricated backend identifiers, no real side
//! effects. Stands in for a cloud API so a topology can be driven end to
//! end on a laptop.

use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use uuid::Uuid;

use vela_core::provider::{BoxFuture, Created, Provider, ProviderError, ProviderResult};
use vela_core::resource::{NodeKind, ResourceNode, Value};

/// First host octet handed out in any subnet; lower addresses are left for
/// gateways the way real networks reserve them
const FIRST_HOST: u8 = 10;

/// Public addresses come from the 203.0.113.0/24 documentation range
const PUBLIC_PREFIX: &str = "203.0.113";

#[derive(Debug, Default)]
struct Allocations {
    /// Subnet CIDR -> next host octet
    subnets: HashMap<String, u8>,
    next_public: u8,
}

/// Provisioning backend with no cloud behind it
pub struct LocalProvider {
    allocations: Mutex<Allocations>,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(Allocations {
                subnets: HashMap::new(),
                next_public: FIRST_HOST,
            }),
        }
    }

    fn next_private_ip(&self, subnet_cidr: &str) -> ProviderResult<String> {
        let base = parse_cidr_base(subnet_cidr)?;
        let mut allocations = self
            .allocations
            .lock()
            .map_err(|_| ProviderError::new("address allocation table poisoned"))?;
        let host = allocations
            .subnets
            .entry(subnet_cidr.to_string())
            .or_insert(FIRST_HOST);
        let ip = format!("{}.{}.{}.{}", base[0], base[1], base[2], *host);
        *host += 1;
        Ok(ip)
    }

    fn next_public_ip(&self) -> ProviderResult<String> {
        let mut allocations = self
            .allocations
            .lock()
            .map_err(|_| ProviderError::new("address allocation table poisoned"))?;
        let ip = format!("{}.{}", PUBLIC_PREFIX, allocations.next_public);
        allocations.next_public += 1;
        Ok(ip)
    }

    fn create_sync(
        &self,
        node: &ResourceNode,
        inputs: &HashMap<String, Value>,
    ) -> ProviderResult<Created> {
        let mut attributes: HashMap<String, Value> = HashMap::with_capacity(node.deferred.len());

        for attribute in &node.deferred {
            let value = match attribute.as_str() {
                "private_ip" => {
                    let cidr = inputs
                        .get("subnet_cidr")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            ProviderError::new("missing subnet_cidr for address allocation")
                                .for_node(&node.name)
                        })?;
                    Value::String(
                        self.next_private_ip(cidr)
                            .map_err(|e| e.for_node(&node.name))?,
                    )
                }
                "public_ip" => {
                    let placement = inputs.get("placement").and_then(Value::as_str);
                    if placement != Some("public") {
                        return Err(ProviderError::new(
                            "public address requested for a non-public placement",
                        )
                        .for_node(&node.name));
                    }
                    Value::String(self.next_public_ip().map_err(|e| e.for_node(&node.name))?)
                }
                other => Value::String(fabricate_id(id_prefix(other, node.kind))),
            };
            attributes.insert(attribute.clone(), value);
        }

        let identifier = canonical_identifier(node, &attributes)
            .unwrap_or_else(|| fabricate_id(kind_prefix(node.kind)));

        debug!(
            "created {} '{}' as {} ({} attributes)",
            node.kind,
            node.name,
            identifier,
            attributes.len()
        );

        Ok(Created {
            identifier,
            attributes,
        })
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create(
        &self,
        node: &ResourceNode,
        inputs: &HashMap<String, Value>,
    ) -> BoxFuture<'_, ProviderResult<Created>> {
        let result = self.create_sync(node, inputs);
        Box::pin(async move { result })
    }
}

/// Base octets of an x.x.x.x/n CIDR
fn parse_cidr_base(cidr: &str) -> ProviderResult<[u8; 4]> {
    let invalid = || ProviderError::new(format!("invalid CIDR: {}", cidr));

    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    if prefix > 32 {
        return Err(invalid());
    }

    let parts: Vec<&str> = address.split('.').collect();
    if parts.len() != 4 {
        return Err(invalid());
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        octets[i] = part.parse().map_err(|_| invalid())?;
    }
    Ok(octets)
}

fn fabricate_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &hex[..12])
}

/// Identifier prefix by attribute-name convention, falling back to the kind
fn id_prefix(attribute: &str, kind: NodeKind) -> &'static str {
    match attribute {
        "network_id" => "net",
        "security_group_id" => "sg",
        "rule_id" => "sgr",
        "peering_id" => "pcx",
        "route_id" => "rt",
        "instance_id" => "i",
        a if a.ends_with("route_table_id") => "rtb",
        _ => kind_prefix(kind),
    }
}

fn kind_prefix(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Network => "net",
        NodeKind::SecurityRule => "sgr",
        NodeKind::ComputeInstance => "i",
        NodeKind::PeeringRoute => "pcx",
    }
}

/// A node's backend identifier is its most specific fabricated id, when it
/// produced one
fn canonical_identifier(node: &ResourceNode, attributes: &HashMap<String, Value>) -> Option<String> {
    let candidates: &[&str] = match node.kind {
        NodeKind::Network => &["network_id"],
        NodeKind::SecurityRule => &["security_group_id", "rule_id"],
        NodeKind::ComputeInstance => &["instance_id"],
        NodeKind::PeeringRoute => &["peering_id", "route_id"],
    };
    candidates
        .iter()
        .find_map(|c| attributes.get(*c))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network_node() -> ResourceNode {
        ResourceNode::new("prod-network", NodeKind::Network)
            .with_attribute("cidr_block", Value::String("10.0.0.0/16".to_string()))
            .with_deferred("network_id")
            .with_deferred("public_route_table_id")
    }

    fn instance_inputs(subnet: &str, placement: &str) -> HashMap<String, Value> {
        let mut inputs = HashMap::new();
        inputs.insert(
            "subnet_cidr".to_string(),
            Value::String(subnet.to_string()),
        );
        inputs.insert(
            "placement".to_string(),
            Value::String(placement.to_string()),
        );
        inputs
    }

    #[tokio::test]
    async fn network_gets_prefixed_identifiers() {
        let provider = LocalProvider::new();
        let created = provider
            .create(&network_node(), &HashMap::new())
            .await
            .unwrap();

        assert!(created.identifier.starts_with("net-"));
        let rtb = created.attributes.get("public_route_table_id").unwrap();
        assert!(rtb.as_str().unwrap().starts_with("rtb-"));
    }

    #[tokio::test]
    async fn private_addresses_are_sequential_within_a_subnet() {
        let provider = LocalProvider::new();
        let node = ResourceNode::new("database", NodeKind::ComputeInstance)
            .with_deferred("private_ip");
        let inputs = instance_inputs("10.0.2.0/24", "private");

        let first = provider.create(&node, &inputs).await.unwrap();
        let second = provider.create(&node, &inputs).await.unwrap();

        assert_eq!(
            first.attributes.get("private_ip"),
            Some(&Value::String("10.0.2.10".to_string()))
        );
        assert_eq!(
            second.attributes.get("private_ip"),
            Some(&Value::String("10.0.2.11".to_string()))
        );
    }

    #[tokio::test]
    async fn subnets_allocate_independently() {
        let provider = LocalProvider::new();
        let node = ResourceNode::new("webapp", NodeKind::ComputeInstance)
            .with_deferred("private_ip");

        let prod = provider
            .create(&node, &instance_inputs("10.0.1.0/24", "public"))
            .await
            .unwrap();
        let bastion = provider
            .create(&node, &instance_inputs("192.168.1.0/24", "public"))
            .await
            .unwrap();

        assert_eq!(
            prod.attributes.get("private_ip"),
            Some(&Value::String("10.0.1.10".to_string()))
        );
        assert_eq!(
            bastion.attributes.get("private_ip"),
            Some(&Value::String("192.168.1.10".to_string()))
        );
    }

    #[tokio::test]
    async fn public_address_comes_from_the_documentation_range() {
        let provider = LocalProvider::new();
        let node = ResourceNode::new("webapp", NodeKind::ComputeInstance)
            .with_deferred("public_ip");

        let created = provider
            .create(&node, &instance_inputs("10.0.1.0/24", "public"))
            .await
            .unwrap();
        assert_eq!(
            created.attributes.get("public_ip"),
            Some(&Value::String("203.0.113.10".to_string()))
        );
    }

    #[tokio::test]
    async fn public_address_refused_for_private_placement() {
        let provider = LocalProvider::new();
        let node = ResourceNode::new("database", NodeKind::ComputeInstance)
            .with_deferred("public_ip");

        let err = provider
            .create(&node, &instance_inputs("10.0.2.0/24", "private"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("database"));
    }

    #[tokio::test]
    async fn missing_subnet_is_reported_with_the_node() {
        let provider = LocalProvider::new();
        let node = ResourceNode::new("database", NodeKind::ComputeInstance)
            .with_deferred("private_ip");

        let err = provider.create(&node, &HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("subnet_cidr"));
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn cidr_parsing_rejects_malformed_input() {
        assert!(parse_cidr_base("10.0.0.0/16").is_ok());
        assert!(parse_cidr_base("10.0.0.0").is_err());
        assert!(parse_cidr_base("10.0.0/16").is_err());
        assert!(parse_cidr_base("10.0.0.0/33").is_err());
    }
}
