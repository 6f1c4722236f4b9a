//! Scenario harness for the heapcheck membrane.
//!
//! This crate provides:
//! - Scenarios: small request programs that exercise one behavior each
//! - Runner: executes a scenario on a fresh debugger and collects results
//! - Report: text and JSON renderings of a run

pub mod report;
pub mod runner;
pub mod scenarios;

pub use report::{LeakRecord, ScenarioReport};
pub use runner::{HarnessError, ScenarioRun, run_scenario};
pub use scenarios::{HarnessDebugger, SCENARIOS, Scenario};
