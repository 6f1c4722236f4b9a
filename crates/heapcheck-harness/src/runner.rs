//! Runs one scenario on a fresh debugger.

use std::io;

use heapcheck_membrane::{CappedAllocator, DebugConfig, LibcAllocator, MemoryDebugger};
use thiserror::Error;

use crate::report::{LeakRecord, ScenarioReport};
use crate::scenarios::{self, HEAP_CAP};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown scenario `{0}` (try `harness list`)")]
    UnknownScenario(String),
    #[error("failed to render report: {0}")]
    Render(#[from] io::Error),
}

/// Everything a scenario produced, captured before its debugger is dropped.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub report: ScenarioReport,
    pub statistics_text: String,
    pub leak_text: String,
}

/// Execute `name` against a new capped debugger configured by `config`.
pub fn run_scenario(name: &str, config: &DebugConfig) -> Result<ScenarioRun, HarnessError> {
    let scenario =
        scenarios::find(name).ok_or_else(|| HarnessError::UnknownScenario(name.to_owned()))?;
    let dbg = MemoryDebugger::with_config(CappedAllocator::new(LibcAllocator, HEAP_CAP), config);

    scenario.run(&dbg);

    let mut statistics_text = Vec::new();
    dbg.write_statistics(&mut statistics_text)?;
    let mut leak_text = Vec::new();
    dbg.write_leak_report(&mut leak_text)?;

    let report = ScenarioReport {
        scenario: scenario.name,
        statistics: dbg.statistics(),
        bugs: dbg.bug_tally(),
        leaks: dbg.live_blocks().iter().map(LeakRecord::from).collect(),
    };
    Ok(ScenarioRun {
        report,
        statistics_text: String::from_utf8_lossy(&statistics_text).into_owned(),
        leak_text: String::from_utf8_lossy(&leak_text).into_owned(),
    })
}
