//! `txrules [run|query] [config]`
//!
//! `run` reads one JSON transaction per line from stdin and writes each one
//! back with the stored rules applied. `query` reads a JSON array of
//! conditions and prints the filter that finds the matching transactions.
use std::io::{self, BufRead, Read, Write};

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use txrules::{
    ConditionDescriptor, EngineConfig, PersistenceMode, Record, RuleEngine, RuleError, RuleStore,
};

fn main() {
    if let Err(e) = run() {
        eprintln!("txrules: {e}");
        std::process::exit(1);
    }
}

fn run() -> txrules::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, config_path) = match args.first().map(String::as_str) {
        Some("run") | Some("query") => (args[0].as_str(), args.get(1).map(String::as_str)),
        other => ("run", other),
    };
    let config = EngineConfig::load(config_path)?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let engine = RuleEngine::new(&config);
    match command {
        "query" => query(&engine),
        _ => {
            let store = RuleStore::open(&PersistenceMode::from_location(&config.database))?;
            engine.load(&store.live_rows()?)?;
            apply(&engine)
        }
    }
}

fn apply(engine: &RuleEngine) -> txrules::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    let mut processed = 0usize;
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| RuleError::Invariant(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = match serde_json::from_str::<Record>(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed transaction");
                continue;
            }
        };
        let result = engine.run_rules(&record)?;
        writeln!(stdout, "{result}").map_err(|e| RuleError::Invariant(e.to_string()))?;
        processed += 1;
    }
    info!(processed, "transactions processed");
    Ok(())
}

fn query(engine: &RuleEngine) -> txrules::Result<()> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| RuleError::Invariant(e.to_string()))?;
    let conditions: Vec<ConditionDescriptor> = serde_json::from_str(&input)?;
    let translation = engine.translate(&conditions);
    let errors: Vec<String> = translation.errors.iter().map(|e| e.to_string()).collect();
    let output = json!({ "filter": translation.to_json(), "errors": errors });
    println!("{output}");
    Ok(())
}
