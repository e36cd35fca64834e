use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pimops_core::{GroupCreateRequest, ImportPlan, ImportResult};
use pimops_gateway::{BluestoneGateway, GatewayConfig, PimGateway};
use pimops_snapshot::DEFAULT_SNAPSHOT_PATH;
use pimops_sync::{extract_unique_groups, ImportExecutor, Planner};

#[derive(Debug, Parser)]
#[command(name = "pimops")]
#[command(about = "Export, diff, and import PIM attribute definitions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Export all remote attribute definitions to a snapshot file
    Export {
        #[arg(long, default_value = DEFAULT_SNAPSHOT_PATH)]
        snapshot: PathBuf,
    },
    /// Diff a snapshot against remote state and create what is missing.
    /// Never deletes anything remotely.
    Import {
        #[arg(long, default_value = DEFAULT_SNAPSHOT_PATH)]
        snapshot: PathBuf,
        /// Keep all remote attributes in the kept set, not only matched ones
        #[arg(long)]
        keep_all: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env();
    let gateway = BluestoneGateway::new(config).context("building remote gateway")?;

    match cli.command {
        Commands::Export { snapshot } => export(&gateway, &snapshot).await,
        Commands::Import {
            snapshot,
            keep_all,
            yes,
        } => import(&gateway, &snapshot, !keep_all, yes).await,
    }
}

async fn export(gateway: &dyn PimGateway, snapshot_path: &PathBuf) -> Result<()> {
    println!("Exporting attribute definitions...");
    let attributes = gateway
        .list_attributes()
        .await
        .context("listing remote attributes")?;
    println!("Exported {} attributes", attributes.len());

    for attr in attributes.iter().take(10) {
        println!("  - {} ({})", attr.name, attr.number);
    }
    if attributes.len() > 10 {
        println!("  ... and {} more", attributes.len() - 10);
    }

    pimops_snapshot::write_snapshot(snapshot_path, attributes)
        .with_context(|| format!("writing snapshot {}", snapshot_path.display()))?;
    println!("Saved snapshot to {}", snapshot_path.display());
    Ok(())
}

async fn import(
    gateway: &dyn PimGateway,
    snapshot_path: &PathBuf,
    keep_existing_only: bool,
    assume_yes: bool,
) -> Result<()> {
    if keep_existing_only {
        println!("Safe mode: only adds missing attributes, never deletes");
    }

    let snapshot = pimops_snapshot::read_snapshot(snapshot_path)
        .with_context(|| format!("reading snapshot {}", snapshot_path.display()))?;
    let exported = snapshot.attributes;

    let existing = gateway
        .list_attributes()
        .await
        .context("listing remote attributes")?;
    println!("{} exported, {} existing", exported.len(), existing.len());

    let plan = Planner::new(gateway)
        .plan(&exported, &existing, keep_existing_only)
        .await;
    print_preview(&plan, exported.len(), &extract_unique_groups(&exported));

    if plan.attributes_to_create.is_empty() && plan.groups_to_create.is_empty() {
        println!("\nNothing to do.");
        return Ok(());
    }

    if !assume_yes && !confirm("\nProceed with import?")? {
        println!("Cancelled");
        return Ok(());
    }

    println!("\nImporting...");
    let result = ImportExecutor::new(gateway).execute(&plan, &exported).await;
    print_result(&result);

    if !result.success {
        bail!("import failed with {} error(s)", result.errors.len());
    }
    Ok(())
}

fn print_preview(plan: &ImportPlan, exported_count: usize, unique_groups: &[GroupCreateRequest]) {
    let matched = exported_count - plan.attributes_to_create.len();

    println!("\nAttributes:");
    println!("  matched (preserved): {matched}");
    println!("  extra (preserved):   {}", plan.attributes_to_preserve.len());
    println!("  to create:           {}", plan.attributes_to_create.len());
    for request in plan.attributes_to_create.iter().take(5) {
        println!(
            "    - {} ({})",
            request.name,
            request.number.as_deref().unwrap_or("-")
        );
    }
    if plan.attributes_to_create.len() > 5 {
        println!("    ... and {} more", plan.attributes_to_create.len() - 5);
    }

    println!("\nGroups:");
    println!(
        "  existing:  {}",
        unique_groups.len() - plan.groups_to_create.len()
    );
    println!("  to create: {}", plan.groups_to_create.len());
    for group in &plan.groups_to_create {
        println!("    - {} ({})", group.name, group.number);
    }

    if !plan.fuzzy_matches.is_empty() {
        println!("\nFuzzy matches (review before trusting the diff):");
        for fuzzy in &plan.fuzzy_matches {
            println!(
                "  {} ({}) ~ {} ({}) matched by {:?}",
                fuzzy.exported_name,
                fuzzy.exported_number,
                fuzzy.existing_name,
                fuzzy.existing_number,
                fuzzy.matched_by
            );
        }
    }

    if !plan.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &plan.warnings {
            println!("  {}: {}", warning.attribute_number, warning.message);
        }
    }
}

fn print_result(result: &ImportResult) {
    println!("\nResults:");
    if result.success {
        println!("  success");
    } else {
        println!("  FAILED");
    }
    if !result.created_groups.is_empty() {
        println!("  groups resolved: {}", result.created_groups.len());
    }
    if !result.created_attributes.is_empty() {
        println!("  attributes created: {}", result.created_attributes.len());
        for created in &result.created_attributes {
            println!("    + {} -> {}", created.attribute_number, created.attribute_id);
        }
    }
    if !result.preserved_attributes.is_empty() {
        println!("  attributes preserved: {}", result.preserved_attributes.len());
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    for error in &result.errors {
        println!("  error: {error}");
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
