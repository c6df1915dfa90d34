//! Headless encounter balancer.
//!
//! Loads a scenario document, simulates its adventuring day and prints the
//! analysis, or proposes stat changes for one encounter:
//!
//! ```bash
//! cargo run -p dnd-balance -- --scenario day.json --iterations 5000 --seed 7
//! cargo run -p dnd-balance -- --scenario day.json --adjust 1 --target boss
//! cargo run -p dnd-balance -- --scenario day.json --seed 7 --run 12
//! ```

mod args;
mod report;

use dnd_sim::engine::Fidelity;
use dnd_sim::persist::save_result_json;
use dnd_sim::{
    run_batch_async, simulate_run, AutoAdjustRequest, AutoBalancer, CancellationToken,
    ScenarioDocument, SimConfig,
};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let options = match args::parse(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run with --help for usage.");
            std::process::exit(2);
        }
    };

    let document = ScenarioDocument::load_json(&options.scenario).await?;
    let mut request = document.to_request()?;
    if let Some(iterations) = options.iterations {
        request.iterations = iterations;
    }
    if options.seed.is_some() {
        request.seed = options.seed;
    }
    if options.max_k.is_some() {
        request.max_k = options.max_k;
    }
    let config = match &options.config {
        Some(path) => load_config(path).await?,
        None => SimConfig::default(),
    };

    if let Some(index) = options.adjust {
        let adjust = AutoAdjustRequest::from_request(&request, index, options.target)?;
        info!(encounter = %adjust.encounter.name, target = %adjust.target, "auto-adjusting");
        let result =
            tokio::task::spawn_blocking(move || AutoBalancer::new(config).adjust(&adjust)).await??;
        if options.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            report::print_adjustment(&result);
        }
        return Ok(());
    }

    if let Some(run_index) = options.run {
        if request.seed.is_none() {
            eprintln!("Warning: --run without --seed simulates a fresh random seed");
        }
        let outcome = tokio::task::spawn_blocking(move || {
            simulate_run(&request, &config, run_index, Fidelity::Full)
        })
        .await??;
        if options.json {
            println!("{}", serde_json::to_string_pretty(&outcome.record)?);
        } else {
            report::print_run(&outcome.record);
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            report::print_progress(&progress);
        }
    });
    let result = run_batch_async(request, config, cancel, Some(tx)).await;
    printer.await?;
    let result = result?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        report::print_report(&document.name, &result);
    }
    if let Some(out) = &options.out {
        save_result_json(&result, out).await?;
        info!(path = %out.display(), "result written");
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<SimConfig, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn print_help() {
    println!("dnd-balance - D&D 5e encounter balancer");
    println!();
    println!("USAGE:");
    println!("  dnd-balance --scenario <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help             Show this help message");
    println!("  --scenario <FILE>      Scenario document (party and adventuring day)");
    println!("  --iterations <N>       Runs to simulate (overrides the scenario)");
    println!("  --seed <S>             Base seed for reproducible batches");
    println!("  --max-k <K>            Cap on percentile timeline buckets");
    println!("  --config <FILE>        Engine configuration JSON");
    println!("  --adjust <INDEX>       Propose stat changes for the INDEX-th encounter");
    println!("  --target <TIER>        Target tier for --adjust (default: challenging)");
    println!("  --run <INDEX>          Re-run iteration INDEX of the batch on its own");
    println!("  --json                 Print the result bundle as JSON");
    println!("  --out <FILE>           Also write the result bundle to FILE");
    println!();
    println!("TIERS:");
    println!("  trivial, safe, challenging, boss, failed");
    println!();
    println!("Set RUST_LOG to control log output (default: info).");
}
