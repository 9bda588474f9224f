use std::path::Path;
use std::sync::Arc;

use ipnet::Ipv4Net;
use serde_json::json;
use stackgrid_core::StackConfig;
use stackgrid_orchestrator::{ApplyReport, ApplySettings, Orchestrator, Plan, Stack, compose};
use tokio::sync::watch;
use tracing::info;

use super::open_provider;
use crate::{Format, StackArgs};

fn load(path: &Path) -> anyhow::Result<(StackConfig, Stack)> {
    let config = StackConfig::from_file(path)?;
    let stack = compose(&config)?;
    Ok((config, stack))
}

pub fn init(path: &Path, name: &str, address_block: Ipv4Net) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let config = StackConfig::scaffold(name, address_block);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}

pub fn validate(config_path: &Path, format: Format) -> anyhow::Result<()> {
    let (_, stack) = load(config_path)?;
    let order = stack.graph.topological_order()?;

    match format {
        Format::Json => {
            let mut units = Vec::with_capacity(order.len());
            for unit in &order {
                units.push(json!({
                    "name": unit.name(),
                    "depends_on": stack.graph.dependencies(unit.name())?,
                    "resources": unit.resources().iter().map(|r| r.name()).collect::<Vec<_>>(),
                    "subnets": stack.networks.get(unit.name()).map(|a| a.subnets().to_vec()),
                }));
            }
            let scaling: Vec<_> = stack
                .scaling
                .iter()
                .map(|t| json!({ "pool": t.pool, "metric": t.metric.stream_key() }))
                .collect();
            let summary = json!({
                "stack": stack.name,
                "valid": true,
                "units": units,
                "security_edges": stack.policy.edges(),
                "scaling": scaling,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Format::Text => {
            println!(
                "✓ Stack {} is valid: {} units, {} resources",
                stack.name,
                stack.graph.len(),
                stack.resources().count()
            );
            for unit in &order {
                let deps = stack.graph.dependencies(unit.name())?;
                if deps.is_empty() {
                    println!("  {}", unit.name());
                } else {
                    println!("  {} (after {})", unit.name(), deps.join(", "));
                }
                if let Some(allocation) = stack.networks.get(unit.name()) {
                    for subnet in allocation.subnets() {
                        println!("      {:<18} zone {} {}", subnet.cidr.to_string(), subnet.zone, subnet.tier);
                    }
                }
                for resource in unit.resources() {
                    println!("    - {} [{}]", resource.name(), resource.kind());
                }
            }
            let edges = stack.policy.edges();
            if !edges.is_empty() {
                println!("Security edges:");
                for edge in edges {
                    println!("  {} -> {} {}/{}", edge.from, edge.to, edge.port, edge.protocol);
                }
            }
            for target in &stack.scaling {
                println!("Scaling {} on {}", target.pool, target.metric.stream_key());
            }
        }
    }
    Ok(())
}

pub async fn plan(args: &StackArgs, format: Format) -> anyhow::Result<()> {
    let (config, stack) = load(&args.config)?;
    let provider = open_provider(&args.data_dir)?;
    let orchestrator = Orchestrator::new(Arc::new(provider), ApplySettings::from(&config.orchestrator));
    let plan = orchestrator.plan(&stack.graph).await?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        Format::Text => print_plan(&plan),
    }
    Ok(())
}

fn print_plan(plan: &Plan) {
    for unit in &plan.units {
        println!("{} ({} changes)", unit.unit, unit.changes());
        for resource in &unit.resources {
            println!("  {:<10} {} [{}]", resource.action.to_string(), resource.name, resource.kind);
        }
    }
    if !plan.has_changes() {
        println!("No changes.");
    }
}

pub async fn apply(args: &StackArgs, prune: bool, format: Format) -> anyhow::Result<()> {
    let (config, stack) = load(&args.config)?;
    let provider = open_provider(&args.data_dir)?;
    let settings = ApplySettings::from(&config.orchestrator).with_prune(prune);
    let orchestrator = Orchestrator::new(Arc::new(provider), settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, cancelling apply");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = orchestrator.apply(&stack.graph, shutdown_rx).await?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_report(&report),
    }

    if !report.is_success() {
        let unsuccessful = report.units.iter().filter(|r| !r.outcome.is_success()).count();
        anyhow::bail!("{unsuccessful} of {} units did not succeed", report.units.len());
    }
    Ok(())
}

fn print_report(report: &ApplyReport) {
    for unit in &report.units {
        let mark = if unit.outcome.is_success() { "✓" } else { "✗" };
        println!("{mark} {:<20} {}", unit.unit, unit.outcome);
    }
}

/// Register the stack's imported resources as existing.
pub fn import(args: &StackArgs) -> anyhow::Result<()> {
    let (_, stack) = load(&args.config)?;
    let provider = open_provider(&args.data_dir)?;

    let mut registered = 0;
    for (unit, description) in stack.resources().filter(|(_, d)| d.is_imported()) {
        let id = provider.register_existing(unit, description.clone())?;
        println!("✓ Registered {} as {id}", description.name());
        registered += 1;
    }
    if registered == 0 {
        println!("No imported resources in {}", args.config.display());
    }
    Ok(())
}

pub fn status(data_dir: &Path) -> anyhow::Result<()> {
    let provider = open_provider(data_dir)?;
    let records = provider.store().list_resources()?;
    if records.is_empty() {
        println!("No resources.");
        return Ok(());
    }
    for record in records {
        let capacity = record
            .capacity
            .map(|c| format!(" capacity={c}"))
            .unwrap_or_default();
        println!("{:<28} {:<16} {}{capacity}", record.name, record.kind.to_string(), record.id);
    }
    Ok(())
}
