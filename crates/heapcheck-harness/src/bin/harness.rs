//! CLI entrypoint for the heapcheck scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use heapcheck_harness::{SCENARIOS, run_scenario};
use heapcheck_membrane::{DebugConfig, DiagnosticTarget};

/// Drive the heapcheck debugger through canned request programs.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Scenario harness for the heapcheck malloc debugger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available scenarios.
    List,
    /// Run one scenario on a fresh debugger.
    Run {
        /// Scenario name (see `harness list`).
        scenario: String,
        /// Print a JSON report instead of the text reports.
        #[arg(long)]
        json: bool,
        /// Skip the leak report.
        #[arg(long)]
        no_leaks: bool,
        /// Where MEMORY BUG lines go (`stderr`, `stdout`, or `silent`).
        /// Defaults to HEAPCHECK_DIAGNOSTICS.
        #[arg(long)]
        diagnostics: Option<String>,
        /// JSONL event log path. Defaults to HEAPCHECK_LOG.
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::List => {
            let width = SCENARIOS.iter().map(|s| s.name.len()).max().unwrap_or(0);
            for scenario in SCENARIOS {
                println!("{:<width$}  {}", scenario.name, scenario.summary);
            }
        }
        Command::Run {
            scenario,
            json,
            no_leaks,
            diagnostics,
            log,
        } => {
            let mut config = DebugConfig::from_env();
            if let Some(target) = diagnostics {
                config.diagnostics = DiagnosticTarget::from_str_loose(&target);
            }
            if log.is_some() {
                config.event_log = log;
            }

            let mut run = run_scenario(&scenario, &config)?;
            if json {
                if no_leaks {
                    run.report.leaks.clear();
                }
                println!("{}", run.report.to_json()?);
            } else {
                print!("{}", run.statistics_text);
                if !no_leaks {
                    print!("{}", run.leak_text);
                }
            }
        }
    }

    Ok(())
}
