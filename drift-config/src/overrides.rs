//! `DRIFT_*` environment overrides for individual tunables.
//!
//! Durations use `humantime` syntax (`750ms`, `2s`, `1m 30s`).

use std::time::Duration;

use anyhow::{Context, anyhow};
use drift_core::ConsolidationConfig;
use tracing::debug;

/// One override that was applied, for reporting at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    pub variable: &'static str,
    pub value: String,
}

type DurationField = fn(&mut ConsolidationConfig) -> &mut u64;

const DURATION_OVERRIDES: &[(&str, DurationField)] = &[
    ("DRIFT_CONSOLIDATION_TIME", |c| &mut c.consolidation_time_ms),
    ("DRIFT_MAX_DELAY_TIME", |c| &mut c.max_delay_time_ms),
    ("DRIFT_DEFAULT_DELAY_TIME", |c| &mut c.default_delay_time_ms),
    ("DRIFT_SWEEP_INTERVAL", |c| &mut c.sweep_interval_ms),
    ("DRIFT_PATH_RESOLVE_TIMEOUT", |c| &mut c.path_resolve_timeout_ms),
];

const MAX_IN_FLIGHT: &str = "DRIFT_MAX_IN_FLIGHT_TASKS";

pub fn parse_duration_ms(raw: &str) -> anyhow::Result<u64> {
    let duration: Duration = humantime::parse_duration(raw.trim())
        .map_err(|err| anyhow!("invalid duration {raw:?}: {err}"))?;
    u64::try_from(duration.as_millis()).map_err(|_| anyhow!("duration {raw:?} is too large"))
}

/// Apply every override present in `lookup` to `config`.
pub fn apply<F>(config: &mut ConsolidationConfig, lookup: &F) -> anyhow::Result<Vec<EnvOverride>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();

    for &(variable, field) in DURATION_OVERRIDES {
        let Some(raw) = lookup(variable).filter(|raw| !raw.trim().is_empty()) else {
            continue;
        };
        let millis = parse_duration_ms(&raw).with_context(|| format!("failed to apply {variable}"))?;
        *field(config) = millis;
        debug!(variable, millis, "applied config override");
        applied.push(EnvOverride {
            variable,
            value: raw,
        });
    }

    if let Some(raw) = lookup(MAX_IN_FLIGHT).filter(|raw| !raw.trim().is_empty()) {
        config.max_in_flight_tasks = raw
            .trim()
            .parse()
            .with_context(|| format!("failed to apply {MAX_IN_FLIGHT}: {raw:?} is not a count"))?;
        applied.push(EnvOverride {
            variable: MAX_IN_FLIGHT,
            value: raw,
        });
    }

    Ok(applied)
}
