use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use drift_core::ConsolidationConfig;
use serde::{Deserialize, Serialize};

use crate::overrides::{self, EnvOverride};
use crate::validation::{self, ConfigWarnings};

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DriftConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Everything `driftd` reads from configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Buffer thresholds, sweep cadence and file-name rules.
    pub consolidation: ConsolidationConfig,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

/// A validated configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: DriftConfig,
    pub source: DriftConfigSource,
    pub overrides: Vec<EnvOverride>,
    pub warnings: ConfigWarnings,
}

impl ConfigLoad {
    /// Replace the sweep interval (e.g. from the command line) and re-run the
    /// guard rails so the warnings describe the effective configuration.
    pub fn with_sweep_interval(mut self, interval: Duration) -> anyhow::Result<Self> {
        self.config.consolidation.sweep_interval_ms =
            u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.warnings = validation::apply_guard_rails(&self.config.consolidation)?;
        Ok(self)
    }
}

const CANDIDATES: &[&str] = &["drift.toml", "drift.json", "config/drift.toml"];

impl DriftConfig {
    /// Load from the process environment and the working directory, apply
    /// `DRIFT_*` overrides and run the guard rails.
    pub fn load() -> anyhow::Result<ConfigLoad> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// Same as [`DriftConfig::load`] with an explicit variable lookup and
    /// directory to search for default files.
    pub fn load_with<F>(lookup: F, search_dir: &Path) -> anyhow::Result<ConfigLoad>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (mut config, source) = Self::load_source(&lookup, search_dir)?;
        let applied = overrides::apply(&mut config.consolidation, &lookup)?;
        let warnings = validation::apply_guard_rails(&config.consolidation)?;
        Ok(ConfigLoad {
            config,
            source,
            overrides: applied,
            warnings,
        })
    }

    /// Evaluation order:
    /// 1) `$DRIFT_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$DRIFT_CONFIG_JSON` (inline JSON),
    /// 3) the first default file present in `search_dir`,
    /// 4) defaults.
    pub fn load_source<F>(lookup: &F, search_dir: &Path) -> anyhow::Result<(Self, DriftConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path_str) = lookup("DRIFT_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, DriftConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup("DRIFT_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw).context("failed to parse DRIFT_CONFIG_JSON")?;
            return Ok((parsed, DriftConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(search_dir) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, DriftConfigSource::File(path)));
        }

        Ok((Self::default(), DriftConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read drift config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid drift config {}", path.display())),
            Some("toml") | Some("tml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid drift config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse drift config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid drift config json: {err}"))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to render drift config as TOML")
    }

    fn find_default_file(search_dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| search_dir.join(candidate))
            .find(|path| path.is_file())
    }
}
