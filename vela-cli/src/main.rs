use clap::{Args, Parser, Subcommand};
use colored::Colorize;

use vela_core::apply::{NodeOutcome, ProvisionConfig, Provisioner};
use vela_core::output::project;
use vela_provider_local::LocalProvider;

mod topology;

#[derive(Parser)]
#[command(name = "vela")]
#[command(about = "Provision a bastion/production network topology in dependency order", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Configuration of one topology build
#[derive(Args, Clone, Debug)]
pub struct StackArgs {
    /// Operator address allowed to SSH in directly (CIDR)
    #[arg(long, default_value = topology::DEFAULT_MY_IP)]
    pub my_ip: String,

    /// Skip the peering subgraph; SSH ingress falls back to the operator
    /// address
    #[arg(long)]
    pub no_peering: bool,

    #[arg(long, default_value = "t3.micro")]
    pub webapp_instance_type: String,

    #[arg(long, default_value = "t3.micro")]
    pub database_instance_type: String,

    #[arg(long, default_value = "t3.micro")]
    pub bastion_instance_type: String,

    /// Name of the SSH key pair
    #[arg(long, default_value = topology::DEFAULT_KEY_NAME)]
    pub key_name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the creation order without provisioning anything
    Plan {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Provision the topology and print the output table
    Apply {
        #[command(flatten)]
        stack: StackArgs,

        /// Walk the plan without side effects
        #[arg(long)]
        dry_run: bool,

        /// Keep provisioning independent nodes after a failure
        #[arg(long)]
        keep_going: bool,

        /// Print outputs as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan { stack } => run_plan(&stack),
        Commands::Apply {
            stack,
            dry_run,
            keep_going,
            json,
        } => run_apply(&stack, dry_run, keep_going, json).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_plan(stack: &StackArgs) -> Result<(), Box<dyn std::error::Error>> {
    let flags = topology::flags(stack);
    let topo = topology::catalog().build(&flags)?;
    let order = topo.graph.topological_order()?;

    println!(
        "{}",
        format!("Plan: {} resources to create", order.len()).bold()
    );
    for name in &order {
        if let Some(node) = topo.graph.node(name) {
            println!(
                "  {} {} {}",
                "+".green(),
                name,
                format!("({})", node.kind).yellow()
            );
            if !node.predecessors.is_empty() {
                println!(
                    "      {} {}",
                    "after:".dimmed(),
                    node.predecessors.join(", ").dimmed()
                );
            }
        }
    }

    Ok(())
}

async fn run_apply(
    stack: &StackArgs,
    dry_run: bool,
    keep_going: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let flags = topology::flags(stack);
    let mut topo = topology::catalog().build(&flags)?;
    log::debug!(
        "topology built: {} nodes, peering {}",
        topo.graph.len(),
        if stack.no_peering { "disabled" } else { "enabled" }
    );

    let provisioner = Provisioner::new(LocalProvider::new()).with_config(ProvisionConfig {
        dry_run,
        continue_on_error: keep_going,
    });
    let report = provisioner.apply(&mut topo).await?;

    for (name, outcome) in &report.outcomes {
        match outcome {
            Ok(NodeOutcome::Created { identifier }) => {
                println!("  {} {} {}", "+".green(), name, format!("({})", identifier).dimmed());
            }
            Ok(NodeOutcome::Skipped { reason }) => {
                println!("  {} {} {}", "~".yellow(), name, format!("({})", reason).dimmed());
            }
            Err(e) => {
                println!("  {} {} {}", "x".red(), name, e);
            }
        }
    }

    if !report.is_success() {
        return Err(format!(
            "{} of {} resources failed to provision",
            report.failure_count,
            report.outcomes.len()
        )
        .into());
    }
    if dry_run {
        return Ok(());
    }

    let table = project(&topo.graph, &topo.resolver, &topology::outputs(&stack.key_name))?;
    if json {
        let map: serde_json::Map<String, serde_json::Value> = table
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.clone())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(map))?);
    } else {
        println!();
        println!("{}", "Outputs:".bold());
        for (name, value) in &table {
            println!("  {} = {}", name.cyan(), value);
        }
    }

    Ok(())
}
