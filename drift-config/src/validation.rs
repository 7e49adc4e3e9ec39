use std::fmt;

use drift_core::ConsolidationConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    #[error("ignored file {kind} list contains an empty entry")]
    EmptyFileNameRule { kind: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject settings the pipeline cannot run with and flag the ones that
/// silently disable part of the readiness policy.
pub fn apply_guard_rails(config: &ConsolidationConfig) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.max_delay_time_ms == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "max_delay_time_ms",
        });
    }
    if config.max_in_flight_tasks == 0 {
        return Err(ConfigGuardRailError::ZeroValue {
            field: "max_in_flight_tasks",
        });
    }

    let rules = &config.file_names;
    for (kind, values) in [
        ("name", &rules.ignored_names),
        ("prefix", &rules.ignored_prefixes),
        ("suffix", &rules.ignored_suffixes),
    ] {
        if values.iter().any(|value| value.trim().is_empty()) {
            return Err(ConfigGuardRailError::EmptyFileNameRule { kind });
        }
    }

    if config.default_delay_time_ms >= config.max_delay_time_ms {
        warnings.push_with_hint(
            format!(
                "default_delay_time_ms ({}) is not below max_delay_time_ms ({}); buffers are only published at the maximum delay",
                config.default_delay_time_ms, config.max_delay_time_ms
            ),
            "Lower default_delay_time_ms or raise max_delay_time_ms",
        );
    } else if config.consolidation_time_ms >= config.max_delay_time_ms {
        warnings.push_with_hint(
            format!(
                "consolidation_time_ms ({}) is not below max_delay_time_ms ({}); the quiet period never ends a burst early",
                config.consolidation_time_ms, config.max_delay_time_ms
            ),
            "Lower consolidation_time_ms",
        );
    }

    if config.sweep_interval_ms == 0 {
        warnings.push("sweep_interval_ms is 0; clamped to 1ms");
    } else if config.sweep_interval_ms > config.max_delay_time_ms {
        warnings.push_with_hint(
            format!(
                "sweep_interval_ms ({}) exceeds max_delay_time_ms ({}); events may be held longer than the maximum delay",
                config.sweep_interval_ms, config.max_delay_time_ms
            ),
            "Sweep at least as often as the maximum delay",
        );
    }

    if config.path_resolve_timeout_ms == 0 {
        warnings.push("path_resolve_timeout_ms is 0; clamped to 1ms, most ancestor lookups will time out");
    }

    Ok(warnings)
}
