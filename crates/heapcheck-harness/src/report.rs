//! Scenario results.

use heapcheck_membrane::registry::LiveBlock;
use heapcheck_membrane::{BugTallySnapshot, StatisticsSnapshot};
use serde::Serialize;

/// One block still live when the scenario finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakRecord {
    pub file: &'static str,
    pub line: u32,
    pub ptr: String,
    pub size: usize,
}

impl From<&LiveBlock> for LeakRecord {
    fn from(block: &LiveBlock) -> Self {
        Self {
            file: block.site.file,
            line: block.site.line,
            ptr: format!("{:#x}", block.ptr),
            size: block.size,
        }
    }
}

/// Machine-readable outcome of a scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub statistics: StatisticsSnapshot,
    pub bugs: BugTallySnapshot,
    pub leaks: Vec<LeakRecord>,
}

impl ScenarioReport {
    #[must_use]
    pub fn leaked_bytes(&self) -> usize {
        self.leaks.iter().map(|l| l.size).sum()
    }

    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
