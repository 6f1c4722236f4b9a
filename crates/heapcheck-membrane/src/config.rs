//! Runtime configuration.
//!
//! Read from the environment:
//! - `HEAPCHECK_DIAGNOSTICS`: where `MEMORY BUG` lines go.
//!   `stderr` (default), `stdout`, or `silent`.
//! - `HEAPCHECK_LOG`: path of a JSONL event log. Unset means no log.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Destination for diagnostic lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticTarget {
    #[default]
    Stderr,
    Stdout,
    /// Bugs are still tallied and logged, just not printed.
    Silent,
}

impl DiagnosticTarget {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// `Stderr`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" | "out" => Self::Stdout,
            "silent" | "off" | "none" | "quiet" => Self::Silent,
            _ => Self::Stderr,
        }
    }
}

/// Configuration for one debugger.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DebugConfig {
    pub diagnostics: DiagnosticTarget,
    pub event_log: Option<PathBuf>,
}

impl DebugConfig {
    /// Configuration that prints nothing and logs nothing.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            diagnostics: DiagnosticTarget::Silent,
            event_log: None,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            diagnostics: lookup("HEAPCHECK_DIAGNOSTICS")
                .map(|v| DiagnosticTarget::from_str_loose(&v))
                .unwrap_or_default(),
            event_log: lookup("HEAPCHECK_LOG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}

static GLOBAL_CONFIG: OnceLock<DebugConfig> = OnceLock::new();

/// Process configuration (reads the environment on first call, caches
/// thereafter).
#[must_use]
pub fn global_config() -> &'static DebugConfig {
    GLOBAL_CONFIG.get_or_init(DebugConfig::from_env)
}
