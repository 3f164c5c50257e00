use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use neuroclear::triage::{
    GeminiClient, MockInventory, Notice, ProcessRecord, ScanMode, TriageEngine, TriageError,
    load_config, load_config_from,
};

/// Classify running processes with Gemini and clean up the safe ones
#[derive(Parser, Debug)]
#[command(name = "neuroclear", version)]
struct Args {
    /// Use the deep reasoning model
    #[arg(long)]
    deep: bool,

    /// Seed for the mock inventory
    #[arg(long)]
    seed: Option<u64>,

    /// Config file (defaults to ~/.neuroclear.json)
    #[arg(long, env = "NEUROCLEAR_CONFIG")]
    config: Option<PathBuf>,

    /// Look up details for processes the scan did not describe
    #[arg(long)]
    expand: bool,

    /// Confirm the clean without asking
    #[arg(long)]
    yes: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("failed to load config")?;
    let config = Arc::new(config);

    let client = Arc::new(GeminiClient::new(&config));
    let mut inventory = match args.seed {
        Some(seed) => MockInventory::seeded(seed),
        None => MockInventory::new(),
    };
    let mut engine =
        TriageEngine::from_source(config.clone(), &mut inventory, client.clone(), client)?;

    // Each call may take the full request timeout
    let wait = Duration::from_secs(config.request_timeout_secs * 2 + 5);

    let mode = if args.deep {
        ScanMode::Deep
    } else {
        ScanMode::Quick
    };
    match engine.scan(mode) {
        Ok(()) => {}
        Err(TriageError::Configuration) => {
            eprintln!("{}", TriageError::Configuration);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    }
    if !engine.run_until_idle(wait) {
        log::warn!("Scan did not finish within {:?}", wait);
    }
    print_notices(engine.drain_notices());

    if args.expand {
        let undescribed: Vec<_> = engine
            .records()
            .iter()
            .filter(|r| r.description().is_none())
            .map(|r| r.id)
            .collect();
        for id in undescribed {
            engine.expand(id);
        }
        if !engine.run_until_idle(wait) {
            log::warn!("Some lookups did not finish within {:?}", wait);
        }
    }

    print_table(&engine, args.expand);

    let Some(request) = engine.initiate_clean() else {
        println!("\nNothing selected for cleaning.");
        return Ok(());
    };
    println!(
        "\n{} processes selected, {} MB total:",
        request.records.len(),
        request.total_memory_mb
    );
    for record in &request.records {
        println!("  {} ({} MB)", record.name, record.memory_mb);
    }

    if args.yes {
        engine.confirm_clean();
    } else {
        println!("Re-run with --yes to terminate them.");
        engine.cancel_clean();
    }
    print_notices(engine.drain_notices());

    let stats = engine.stats();
    println!(
        "Memory: {:.1} / {} GB ({:.0}%, {:?})",
        stats.used_memory_gb,
        stats.total_memory_gb,
        stats.used_percent,
        stats.pressure()
    );

    Ok(())
}

fn print_notices(notices: Vec<Notice>) {
    for notice in notices {
        println!("{}", notice);
    }
}

fn print_table(engine: &TriageEngine, with_details: bool) {
    println!(
        "\n{:<3} {:<28} {:>7} {:>8}  {:<10} {:<8} DESCRIPTION",
        "", "PROCESS", "PID", "MEMORY", "CATEGORY", "RISK"
    );
    for record in engine.records() {
        let mark = if engine.is_selected(record.id) { "[x]" } else { "[ ]" };
        println!("{} {}", mark, format_row(record));
        if with_details {
            if let Some(text) = record.enrichment.text() {
                for line in text.lines() {
                    println!("      {}", line);
                }
            }
        }
    }
}

fn format_row(record: &ProcessRecord) -> String {
    let (category, risk) = match &record.classification {
        Some(c) => (
            format!("{:?}", c.category),
            c.risk_level
                .map(|r| format!("{:?}", r))
                .unwrap_or_else(|| "Unknown".to_string()),
        ),
        None => ("-".to_string(), "-".to_string()),
    };
    format!(
        "{:<28} {:>7} {:>5} MB  {:<10} {:<8} {}",
        record.name,
        record.pid,
        record.memory_mb,
        category,
        risk,
        record.description().unwrap_or("")
    )
}
