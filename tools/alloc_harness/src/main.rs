use std::{io, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use core_alloc::{config_path_from_env, table_digest, AllocationModel, AllocationReport};
use serde_json::{json, Value as JsonValue};

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a land-use allocation from a JSON config", long_about = None)]
struct Args {
    /// Allocation config (defaults to $LANDUSE_ALLOC_CONFIG_PATH)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output CSV path (defaults to stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the config's random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Do not apply the config's update block after allocating
    #[arg(long)]
    skip_update: bool,

    /// Print a JSON run summary to stderr
    #[arg(long)]
    report: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config_path = match args.config.clone().or_else(config_path_from_env) {
        Some(path) => path,
        None => anyhow::bail!("no config given: pass --config or set LANDUSE_ALLOC_CONFIG_PATH"),
    };

    let mut model = AllocationModel::load(&config_path)
        .with_context(|| format!("Failed to load allocation from {}", config_path.display()))?;
    if let Some(seed) = args.seed {
        model.config_mut().seed = seed;
    }

    let report = model.allocate().with_context(|| "Allocation failed")?;
    if !args.skip_update {
        model
            .update()
            .with_context(|| "Failed to apply update block")?;
    }

    let digest = table_digest(model.table());
    tracing::info!(
        target: "landuse_alloc::harness",
        digest = %format!("{digest:016x}"),
        seed = model.config().seed,
        "allocation.digest"
    );

    match &args.output {
        Some(path) => model
            .write_csv(path)
            .with_context(|| format!("Failed to write output to {}", path.display()))?,
        None => model
            .table()
            .write_csv(io::stdout().lock())
            .with_context(|| "Failed to write output to stdout")?,
    }

    if args.report {
        let summary = summarize(&report, model.config().seed, digest);
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn summarize(report: &AllocationReport, seed: u64, digest: u64) -> JsonValue {
    let land_uses: Vec<JsonValue> = report
        .land_uses
        .iter()
        .map(|outcome| {
            json!({
                "key": outcome.key,
                "name": outcome.name,
                "store_field": outcome.store_field,
                "requested": outcome.requested,
                "placed": outcome.placed,
                "unallocated": outcome.unallocated,
                "skipped": outcome.skipped,
            })
        })
        .collect();
    json!({
        "seed": seed,
        "digest": format!("{digest:016x}"),
        "steps": report.steps,
        "zero_draws": report.zero_draws,
        "uniform_fallbacks": report.uniform_fallbacks,
        "elapsed_ms": report.elapsed.as_millis() as u64,
        "land_uses": land_uses,
    })
}
