//! DANA — periodic Data ANAlysis daemon.

use std::sync::Arc;

use anyhow::Context;
use dana_core::{Error, RunConfig};
use dana_runtime::{Diagnostics, FanOut, Orchestrator, PidFileGuard, RunExit, Runner};
use dana_store::SqliteStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod series;

use series::SeriesPipeline;

const FAILURE_LIST_LIMIT: usize = 20;

fn print_help() {
    println!("DANA — periodic Data ANAlysis daemon");
    println!();
    println!("Usage: dana [options] [command]");
    println!();
    println!("Commands:");
    println!("  run (default)                    Run analysis cycles until stopped");
    println!("  once                             Run a single analysis cycle");
    println!("  ingest <name> <file>             Add an upload from a file");
    println!("  calibrate <name> <gain> <offset> Register an active calibration");
    println!("  reset [upload-id]                Clear processed markers");
    println!("  failures                         Show the most recent failures");
    println!("  stats                            Show repository statistics");
    println!("  help                             Show this help message");
    println!();
    println!("Options (env var in brackets):");
    println!("  --lock-file <path>   PID file of the running instance [DANA_LOCK_FILE]");
    println!("  --program <name>     Program identity for the lock [DANA_PROGRAM]");
    println!("  --interval <secs>    Sleep between cycles, >= 1 [DANA_INTERVAL_SECS]");
    println!("  --force [bool]       Reprocess already processed uploads [DANA_FORCE]");
    println!("  --tag <tag>          Diagnostics tag [DANA_TAG]");
    println!("  --data-dir <path>    Directory of dana.db [DANA_DATA_DIR]");
}

fn open_store(config: &RunConfig) -> anyhow::Result<Arc<SqliteStore>> {
    info!("Data directory: {}", config.data_dir.display());
    let store = SqliteStore::open(&config.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
    Ok(Arc::new(store))
}

fn build_runner(config: &RunConfig, store: Arc<SqliteStore>) -> Runner<FanOut<SeriesPipeline>> {
    let orchestrator = Orchestrator::new(
        FanOut(SeriesPipeline::new(store)),
        Diagnostics::new(&config.tag),
    );
    Runner::new(orchestrator, Arc::new(PidFileGuard::new()), config)
}

fn exit_code(exit: &RunExit) -> i32 {
    match exit {
        RunExit::LockUnavailable(_) => 1,
        RunExit::Stopped { .. } => 0,
    }
}

/// A single cycle also fails the process when the cycle itself failed.
fn once_exit_code(exit: &RunExit) -> i32 {
    match exit {
        RunExit::Stopped { failed_cycles, .. } if *failed_cycles > 0 => 2,
        other => exit_code(other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let mut config = RunConfig::from_env()?;
    let positional = config.apply_args(&args)?;
    let command = positional.first().map(String::as_str).unwrap_or("run");
    let rest = positional.get(1..).unwrap_or_default();

    match command {
        "run" => {
            let store = open_store(&config)?;
            let runner = build_runner(&config, store);

            let shutdown = runner.shutdown_handle();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => shutdown.trigger(),
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                }
            });

            let exit = runner.run().await;
            std::process::exit(exit_code(&exit));
        }
        "once" => {
            let store = open_store(&config)?;
            let exit = build_runner(&config, store).run_once().await;
            std::process::exit(once_exit_code(&exit));
        }
        "ingest" => {
            let [name, file] = rest else {
                eprintln!("Usage: dana ingest <name> <file>");
                std::process::exit(1);
            };
            let payload = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file))?;
            let store = open_store(&config)?;
            match store.ingest_upload(name, &payload) {
                Ok(id) => println!("Added upload #{} ({})", id, name),
                Err(Error::DuplicateContent(existing)) => {
                    eprintln!("Duplicate content: an upload with hash {} exists", existing);
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        "calibrate" => {
            let [name, gain, offset] = rest else {
                eprintln!("Usage: dana calibrate <name> <gain> <offset>");
                std::process::exit(1);
            };
            let gain: f64 = gain.parse().with_context(|| format!("invalid gain '{}'", gain))?;
            let offset: f64 = offset
                .parse()
                .with_context(|| format!("invalid offset '{}'", offset))?;
            let store = open_store(&config)?;
            let id = store.add_calibration(name, gain, offset)?;
            println!("Added calibration #{} ({}: {} * x + {})", id, name, gain, offset);
        }
        "reset" => {
            let id = match rest.first() {
                Some(id) => Some(
                    id.parse::<i64>()
                        .with_context(|| format!("invalid upload id '{}'", id))?,
                ),
                None => None,
            };
            let store = open_store(&config)?;
            let count = store.reset_processed(id)?;
            println!("Reset {} uploads", count);
        }
        "failures" => {
            let store = open_store(&config)?;
            for failure in store.list_failures(FAILURE_LIST_LIMIT)? {
                println!("{}", serde_json::to_string(&failure)?);
            }
        }
        "stats" => {
            let store = open_store(&config)?;
            println!("{}", serde_json::to_string_pretty(&store.get_stats()?)?);
        }
        "help" => print_help(),
        other => {
            eprintln!("Unknown command: {}. Use 'dana help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_exit_codes() {
        assert_eq!(exit_code(&RunExit::LockUnavailable("held".into())), 1);
        let stopped = RunExit::Stopped {
            cycles: 4,
            failed_cycles: 2,
        };
        assert_eq!(exit_code(&stopped), 0);
    }

    #[test]
    fn test_once_exit_codes() {
        let ok = RunExit::Stopped {
            cycles: 1,
            failed_cycles: 0,
        };
        let failed = RunExit::Stopped {
            cycles: 1,
            failed_cycles: 1,
        };
        assert_eq!(once_exit_code(&ok), 0);
        assert_eq!(once_exit_code(&failed), 2);
        assert_eq!(once_exit_code(&RunExit::LockUnavailable("held".into())), 1);
    }
}
