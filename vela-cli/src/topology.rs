//! Topology - Catalog of the bastion/production stack
//!
//! Transcribes the two-network topology into catalog entries: networks,
//! the flag-gated peering subgraph, security perimeters, instances with
//! their bootstrap scripts, and the output table. All conditional logic
//! lives in the entries' predicates and definition closures; the engine
//! does the wiring.

use vela_core::builder::{CatalogEntry, ConditionalTopologyBuilder, FlagSet};
use vela_core::output::OutputSpec;
use vela_core::resource::{NodeKind, PlaceholderBinding, ResourceNode, Value};

use crate::StackArgs;

const PROD_CIDR: &str = "10.0.0.0/16";
const PROD_PUBLIC_SUBNET: &str = "10.0.1.0/24";
const PROD_PRIVATE_SUBNET: &str = "10.0.2.0/24";
const BASTION_CIDR: &str = "192.168.0.0/16";
const BASTION_PUBLIC_SUBNET: &str = "192.168.1.0/24";
const ANYWHERE: &str = "0.0.0.0/0";
const UBUNTU_IMAGE: &str = "ubuntu-jammy-22.04-amd64-server";

pub const DEFAULT_MY_IP: &str = "0.0.0.0/32";
pub const DEFAULT_KEY_NAME: &str = "vela-practice-key";
const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";

const DATABASE_USERDATA: &str = include_str!("../userdata/database.sh");
const WEBAPP_USERDATA: &str = include_str!("../userdata/webapp.sh");
const BASTION_USERDATA: &str = include_str!("../userdata/bastion.sh");

/// Flags for one build, read from the command line
pub fn flags(stack: &StackArgs) -> FlagSet {
    FlagSet::new()
        .with_bool("enable-peering", !stack.no_peering)
        .with_value("my-ip", &stack.my_ip)
        .with_value("webapp-instance-type", &stack.webapp_instance_type)
        .with_value("database-instance-type", &stack.database_instance_type)
        .with_value("bastion-instance-type", &stack.bastion_instance_type)
        .with_value("key-name", &stack.key_name)
}

fn peering_enabled(flags: &FlagSet) -> bool {
    flags.bool_or("enable-peering", true)
}

/// SSH reaches production hosts from the peered bastion network, or from
/// the operator's address when peering is disabled
fn ssh_source(flags: &FlagSet) -> Value {
    if peering_enabled(flags) {
        Value::String(BASTION_CIDR.to_string())
    } else {
        Value::String(flags.value_or("my-ip", DEFAULT_MY_IP))
    }
}

fn ingress_rule(name: &str, group: &str, port: i64) -> ResourceNode {
    ResourceNode::new(name, NodeKind::SecurityRule)
        .with_attribute(
            "security_group",
            Value::Ref(group.to_string(), "security_group_id".to_string()),
        )
        .with_attribute("protocol", Value::String("tcp".to_string()))
        .with_attribute("from_port", Value::Int(port))
        .with_attribute("to_port", Value::Int(port))
        .with_deferred("rule_id")
}

fn security_group(name: &str, network: &str, description: &str) -> ResourceNode {
    ResourceNode::new(name, NodeKind::SecurityRule)
        .with_attribute(
            "network",
            Value::Ref(network.to_string(), "network_id".to_string()),
        )
        .with_attribute("description", Value::String(description.to_string()))
        .with_attribute("allow_all_outbound", Value::Bool(true))
        .with_deferred("security_group_id")
}

struct InstanceParams<'a> {
    network: &'a str,
    security_group: &'a str,
    subnet_cidr: &'a str,
    placement: &'a str,
    instance_type_flag: &'a str,
    bootstrap: &'a str,
    bindings: Vec<PlaceholderBinding>,
}

/// Single construction path for all three instances; the differences are
/// carried by the parameter struct
fn instance(name: &str, flags: &FlagSet, params: InstanceParams<'_>) -> ResourceNode {
    let mut node = ResourceNode::new(name, NodeKind::ComputeInstance)
        .with_attribute(
            "network",
            Value::Ref(params.network.to_string(), "network_id".to_string()),
        )
        .with_attribute(
            "security_group",
            Value::Ref(
                params.security_group.to_string(),
                "security_group_id".to_string(),
            ),
        )
        .with_attribute("subnet_cidr", Value::String(params.subnet_cidr.to_string()))
        .with_attribute("placement", Value::String(params.placement.to_string()))
        .with_attribute(
            "instance_type",
            Value::String(flags.value_or(params.instance_type_flag, DEFAULT_INSTANCE_TYPE)),
        )
        .with_attribute(
            "key_name",
            Value::String(flags.value_or("key-name", DEFAULT_KEY_NAME)),
        )
        .with_attribute("image", Value::String(UBUNTU_IMAGE.to_string()))
        .with_attribute("volume_gb", Value::Int(8))
        .with_attribute("volume_encrypted", Value::Bool(true))
        .with_deferred("instance_id")
        .with_deferred("private_ip")
        .with_bootstrap(params.bootstrap, params.bindings);
    if params.placement == "public" {
        node = node.with_deferred("public_ip");
    }
    node
}

/// The full catalog. Entry order is the insertion order of every build,
/// which keeps plans reproducible.
pub fn catalog() -> ConditionalTopologyBuilder {
    ConditionalTopologyBuilder::new()
        // Networks
        .entry(CatalogEntry::new("prod-network", |_| {
            ResourceNode::new("prod-network", NodeKind::Network)
                .with_attribute("cidr_block", Value::String(PROD_CIDR.to_string()))
                .with_attribute(
                    "public_subnet_cidr",
                    Value::String(PROD_PUBLIC_SUBNET.to_string()),
                )
                .with_attribute(
                    "private_subnet_cidr",
                    Value::String(PROD_PRIVATE_SUBNET.to_string()),
                )
                .with_attribute("nat_gateways", Value::Int(1))
                .with_deferred("network_id")
                .with_deferred("public_route_table_id")
                .with_deferred("private_route_table_id")
        }))
        .entry(CatalogEntry::new("bastion-network", |_| {
            ResourceNode::new("bastion-network", NodeKind::Network)
                .with_attribute("cidr_block", Value::String(BASTION_CIDR.to_string()))
                .with_attribute(
                    "public_subnet_cidr",
                    Value::String(BASTION_PUBLIC_SUBNET.to_string()),
                )
                .with_attribute("nat_gateways", Value::Int(0))
                .with_deferred("network_id")
                .with_deferred("public_route_table_id")
        }))
        // Peering subgraph, dropped entirely when peering is disabled
        .entry(
            CatalogEntry::new("peering", |_| {
                ResourceNode::new("peering", NodeKind::PeeringRoute)
                    .with_attribute(
                        "requester",
                        Value::Ref("bastion-network".to_string(), "network_id".to_string()),
                    )
                    .with_attribute(
                        "accepter",
                        Value::Ref("prod-network".to_string(), "network_id".to_string()),
                    )
                    .with_deferred("peering_id")
            })
            .included_when(peering_enabled)
            .depends_on("bastion-network")
            .depends_on("prod-network"),
        )
        .entry(
            CatalogEntry::new("route-bastion-to-prod", |_| {
                ResourceNode::new("route-bastion-to-prod", NodeKind::PeeringRoute)
                    .with_attribute(
                        "route_table",
                        Value::Ref(
                            "bastion-network".to_string(),
                            "public_route_table_id".to_string(),
                        ),
                    )
                    .with_attribute(
                        "destination_cidr",
                        Value::Ref("prod-network".to_string(), "cidr_block".to_string()),
                    )
                    .with_attribute(
                        "connection",
                        Value::Ref("peering".to_string(), "peering_id".to_string()),
                    )
                    .with_deferred("route_id")
            })
            .included_when(peering_enabled)
            .depends_on("peering")
            .depends_on("bastion-network")
            .depends_on("prod-network"),
        )
        .entry(
            CatalogEntry::new("route-prod-public-to-bastion", |_| {
                ResourceNode::new("route-prod-public-to-bastion", NodeKind::PeeringRoute)
                    .with_attribute(
                        "route_table",
                        Value::Ref(
                            "prod-network".to_string(),
                            "public_route_table_id".to_string(),
                        ),
                    )
                    .with_attribute(
                        "destination_cidr",
                        Value::Ref("bastion-network".to_string(), "cidr_block".to_string()),
                    )
                    .with_attribute(
                        "connection",
                        Value::Ref("peering".to_string(), "peering_id".to_string()),
                    )
                    .with_deferred("route_id")
            })
            .included_when(peering_enabled)
            .depends_on("peering")
            .depends_on("prod-network")
            .depends_on("bastion-network"),
        )
        .entry(
            CatalogEntry::new("route-prod-private-to-bastion", |_| {
                ResourceNode::new("route-prod-private-to-bastion", NodeKind::PeeringRoute)
                    .with_attribute(
                        "route_table",
                        Value::Ref(
                            "prod-network".to_string(),
                            "private_route_table_id".to_string(),
                        ),
                    )
                    .with_attribute(
                        "destination_cidr",
                        Value::Ref("bastion-network".to_string(), "cidr_block".to_string()),
                    )
                    .with_attribute(
                        "connection",
                        Value::Ref("peering".to_string(), "peering_id".to_string()),
                    )
                    .with_deferred("route_id")
            })
            .included_when(peering_enabled)
            .depends_on("peering")
            .depends_on("prod-network")
            .depends_on("bastion-network"),
        )
        // Security groups
        .entry(
            CatalogEntry::new("bastion-sg", |_| {
                security_group(
                    "bastion-sg",
                    "bastion-network",
                    "Security group for bastion host",
                )
            })
            .depends_on("bastion-network"),
        )
        .entry(
            CatalogEntry::new("webapp-sg", |_| {
                security_group(
                    "webapp-sg",
                    "prod-network",
                    "Security group for web application server",
                )
            })
            .depends_on("prod-network"),
        )
        .entry(
            CatalogEntry::new("database-sg", |_| {
                security_group(
                    "database-sg",
                    "prod-network",
                    "Security group for database server",
                )
            })
            .depends_on("prod-network"),
        )
        // Ingress rules
        .entry(
            CatalogEntry::new("bastion-ssh-ingress", |f| {
                ingress_rule("bastion-ssh-ingress", "bastion-sg", 22).with_attribute(
                    "source_cidr",
                    Value::String(f.value_or("my-ip", DEFAULT_MY_IP)),
                )
            })
            .depends_on("bastion-sg"),
        )
        .entry(
            CatalogEntry::new("webapp-http-ingress", |_| {
                ingress_rule("webapp-http-ingress", "webapp-sg", 80)
                    .with_attribute("source_cidr", Value::String(ANYWHERE.to_string()))
            })
            .depends_on("webapp-sg"),
        )
        .entry(
            CatalogEntry::new("webapp-monitor-ingress", |_| {
                ingress_rule("webapp-monitor-ingress", "webapp-sg", 61208)
                    .with_attribute("source_cidr", Value::String(ANYWHERE.to_string()))
            })
            .depends_on("webapp-sg"),
        )
        .entry(
            CatalogEntry::new("webapp-ssh-ingress", |f| {
                ingress_rule("webapp-ssh-ingress", "webapp-sg", 22)
                    .with_attribute("source_cidr", ssh_source(f))
            })
            .depends_on("webapp-sg")
            .depends_on_with_fallback("peering", "bastion-network"),
        )
        .entry(
            CatalogEntry::new("database-mysql-ingress", |_| {
                ingress_rule("database-mysql-ingress", "database-sg", 3306).with_attribute(
                    "source_security_group",
                    Value::Ref("webapp-sg".to_string(), "security_group_id".to_string()),
                )
            })
            .depends_on("database-sg")
            .depends_on("webapp-sg"),
        )
        .entry(
            CatalogEntry::new("database-redis-ingress", |_| {
                ingress_rule("database-redis-ingress", "database-sg", 6379).with_attribute(
                    "source_security_group",
                    Value::Ref("webapp-sg".to_string(), "security_group_id".to_string()),
                )
            })
            .depends_on("database-sg")
            .depends_on("webapp-sg"),
        )
        .entry(
            CatalogEntry::new("database-ssh-ingress", |f| {
                ingress_rule("database-ssh-ingress", "database-sg", 22)
                    .with_attribute("source_cidr", ssh_source(f))
            })
            .depends_on("database-sg")
            .depends_on_with_fallback("peering", "bastion-network"),
        )
        // Instances
        .entry(
            CatalogEntry::new("database", |f| {
                instance(
                    "database",
                    f,
                    InstanceParams {
                        network: "prod-network",
                        security_group: "database-sg",
                        subnet_cidr: PROD_PRIVATE_SUBNET,
                        placement: "private",
                        instance_type_flag: "database-instance-type",
                        bootstrap: DATABASE_USERDATA,
                        bindings: vec![],
                    },
                )
            })
            .depends_on("prod-network")
            .depends_on("database-sg"),
        )
        .entry(
            CatalogEntry::new("webapp", |f| {
                instance(
                    "webapp",
                    f,
                    InstanceParams {
                        network: "prod-network",
                        security_group: "webapp-sg",
                        subnet_cidr: PROD_PUBLIC_SUBNET,
                        placement: "public",
                        instance_type_flag: "webapp-instance-type",
                        bootstrap: WEBAPP_USERDATA,
                        bindings: vec![PlaceholderBinding::new(
                            "${database_private_ip}",
                            "database",
                            "private_ip",
                        )],
                    },
                )
            })
            .depends_on("prod-network")
            .depends_on("webapp-sg")
            .depends_on("database"),
        )
        .entry(
            CatalogEntry::new("bastion", |f| {
                instance(
                    "bastion",
                    f,
                    InstanceParams {
                        network: "bastion-network",
                        security_group: "bastion-sg",
                        subnet_cidr: BASTION_PUBLIC_SUBNET,
                        placement: "public",
                        instance_type_flag: "bastion-instance-type",
                        bootstrap: BASTION_USERDATA,
                        bindings: vec![
                            PlaceholderBinding::new(
                                "${webapp_private_ip}",
                                "webapp",
                                "private_ip",
                            ),
                            PlaceholderBinding::new(
                                "${database_private_ip}",
                                "database",
                                "private_ip",
                            ),
                        ],
                    },
                )
            })
            .depends_on("bastion-network")
            .depends_on("bastion-sg")
            .depends_on("webapp")
            .depends_on("database"),
        )
}

/// The output table, in the order it is printed
pub fn outputs(key_name: &str) -> Vec<OutputSpec> {
    let key_path = format!("{}.pem", key_name);

    let bastion_ip = || PlaceholderBinding::new("${bastion_public_ip}", "bastion", "public_ip");

    vec![
        OutputSpec::attribute("webapp-public-ip", "webapp", "public_ip"),
        OutputSpec::attribute("webapp-private-ip", "webapp", "private_ip"),
        OutputSpec::attribute("database-private-ip", "database", "private_ip"),
        OutputSpec::attribute("bastion-public-ip", "bastion", "public_ip"),
        OutputSpec::composed(
            "bastion-ssh-command",
            format!("ssh -i {} ubuntu@${{bastion_public_ip}}", key_path),
            vec![bastion_ip()],
        ),
        OutputSpec::composed(
            "webapp-ssh-command",
            format!(
                "ssh -i {key} -o ProxyCommand=\"ssh -i {key} -W %h:%p ubuntu@${{bastion_public_ip}}\" ubuntu@${{webapp_private_ip}}",
                key = key_path
            ),
            vec![
                bastion_ip(),
                PlaceholderBinding::new("${webapp_private_ip}", "webapp", "private_ip"),
            ],
        ),
        OutputSpec::composed(
            "database-ssh-command",
            format!(
                "ssh -i {key} -o ProxyCommand=\"ssh -i {key} -W %h:%p ubuntu@${{bastion_public_ip}}\" ubuntu@${{database_private_ip}}",
                key = key_path
            ),
            vec![
                bastion_ip(),
                PlaceholderBinding::new("${database_private_ip}", "database", "private_ip"),
            ],
        ),
        OutputSpec::composed(
            "webapp-url",
            "http://${webapp_public_ip}",
            vec![PlaceholderBinding::new(
                "${webapp_public_ip}",
                "webapp",
                "public_ip",
            )],
        ),
        OutputSpec::composed(
            "monitor-url",
            "http://${webapp_public_ip}:61208",
            vec![PlaceholderBinding::new(
                "${webapp_public_ip}",
                "webapp",
                "public_ip",
            )],
        ),
    ]
}
