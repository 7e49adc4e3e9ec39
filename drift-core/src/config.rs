use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for change consolidation and publication.
///
/// All fields carry defaults so deployments can override a single knob
/// without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Quiet period (ms) without new changes before a buffer may be
    /// published, once it has been held for `default_delay_time_ms`.
    pub consolidation_time_ms: u64,
    /// Upper bound (ms) a buffer is held regardless of ongoing activity.
    pub max_delay_time_ms: u64,
    /// Minimum hold time (ms) before the quiet-period rule applies.
    pub default_delay_time_ms: u64,
    /// Pause (ms) between the end of one sweep and the start of the next.
    pub sweep_interval_ms: u64,
    /// Upper bound (ms) for a single ancestor-path lookup; on expiry the
    /// change is buffered without ancestors.
    pub path_resolve_timeout_ms: u64,
    /// Buffering tasks allowed in flight on the runtime. Beyond this the
    /// ingesting caller runs the task itself.
    pub max_in_flight_tasks: usize,
    /// File names whose changes never produce events.
    pub file_names: FileNameRules,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            consolidation_time_ms: 1_000,
            max_delay_time_ms: 10_000,
            default_delay_time_ms: 2_500,
            sweep_interval_ms: 2_500,
            path_resolve_timeout_ms: 2_000,
            max_in_flight_tasks: 1_024,
            file_names: FileNameRules::default(),
        }
    }
}

impl ConsolidationConfig {
    pub fn consolidation_time(&self) -> Duration {
        Duration::from_millis(self.consolidation_time_ms)
    }

    pub fn max_delay_time(&self) -> Duration {
        Duration::from_millis(self.max_delay_time_ms)
    }

    pub fn default_delay_time(&self) -> Duration {
        Duration::from_millis(self.default_delay_time_ms)
    }

    /// Never zero; a zero interval would spin the sweeper.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn path_resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.path_resolve_timeout_ms.max(1))
    }
}

/// Names, prefixes and suffixes (case-insensitive) of files whose changes are
/// ignored, on top of the always-invalid names.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileNameRules {
    pub ignored_names: Vec<String>,
    pub ignored_prefixes: Vec<String>,
    pub ignored_suffixes: Vec<String>,
}

impl Default for FileNameRules {
    fn default() -> Self {
        Self {
            ignored_names: [
                ".DS_Store",
                "Thumbs.db",
                "desktop.ini",
                ".msngr_hstr_data",
                ".drive-meta",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            ignored_prefixes: vec!["._".to_string(), "~$".to_string()],
            ignored_suffixes: vec![".tmp".to_string()],
        }
    }
}
