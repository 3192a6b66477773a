use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::file::{CoreSettings, LogLevel, LoggingSettings, StampedeConfig};
use crate::error::ConfigError;

/// Sections of the end-of-run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Stages,
    Actions,
    Checks,
    Metrics,
}

impl SummaryKind {
    pub const ALL: [SummaryKind; 4] = [
        SummaryKind::Stages,
        SummaryKind::Actions,
        SummaryKind::Checks,
        SummaryKind::Metrics,
    ];
}

impl fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryKind::Stages => "stages",
            SummaryKind::Actions => "actions",
            SummaryKind::Checks => "checks",
            SummaryKind::Metrics => "metrics",
        })
    }
}

impl FromStr for SummaryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SummaryKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "summaries".to_string(),
                message: format!("unknown summary '{}'", s.trim()),
            })
    }
}

/// Which summary sections to print. Defaults to stages and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySelection {
    shown: BTreeSet<SummaryKind>,
}

impl Default for SummarySelection {
    fn default() -> Self {
        Self {
            shown: BTreeSet::from([SummaryKind::Stages, SummaryKind::Metrics]),
        }
    }
}

impl SummarySelection {
    pub fn none() -> Self {
        Self {
            shown: BTreeSet::new(),
        }
    }

    /// Applies `--show-summaries` then `--hide-summaries`, both comma separated.
    pub fn with_flags(mut self, show: &[String], hide: &[String]) -> Result<Self, ConfigError> {
        for kind in parse_list(show)? {
            self.shown.insert(kind);
        }
        for kind in parse_list(hide)? {
            self.shown.remove(&kind);
        }
        Ok(self)
    }

    pub fn shows(&self, kind: SummaryKind) -> bool {
        self.shown.contains(&kind)
    }

    pub fn shown(&self) -> impl Iterator<Item = SummaryKind> + '_ {
        self.shown.iter().copied()
    }
}

fn parse_list(raw: &[String]) -> Result<Vec<SummaryKind>, ConfigError> {
    let mut kinds = Vec::new();
    for item in raw.iter().flat_map(|s| s.split(',')) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item.eq_ignore_ascii_case("all") {
            kinds.extend(SummaryKind::ALL);
        } else {
            kinds.push(item.parse()?);
        }
    }
    Ok(kinds)
}

/// Command-line values that take precedence over `stampede.toml`.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub cpus: Option<usize>,
    pub skip: Option<String>,
    pub log_level: Option<LogLevel>,
    pub logfiles_directory: Option<PathBuf>,
    pub bypass_connection_validation: bool,
    pub connection_validation_retries: Option<u32>,
    pub show_summaries: Vec<String>,
    pub hide_summaries: Vec<String>,
    pub enable_latest: bool,
}

/// Effective settings for one `run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub pool_size: usize,
    pub skip: Vec<String>,
    pub core: CoreSettings,
    pub logging: LoggingSettings,
    pub summaries: SummarySelection,
    pub enable_latest: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            skip: Vec::new(),
            core: CoreSettings::default(),
            logging: LoggingSettings::default(),
            summaries: SummarySelection::default(),
            enable_latest: false,
        }
    }
}

pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl RunSettings {
    pub fn resolve(config: &StampedeConfig, overrides: RunOverrides) -> Result<Self, ConfigError> {
        let pool_size = match overrides.cpus {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    field: "cpus".to_string(),
                    message: "must be at least 1".to_string(),
                })
            }
            Some(cpus) => cpus,
            None => default_pool_size(),
        };

        let skip = overrides
            .skip
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut core = config.core.clone();
        if overrides.bypass_connection_validation {
            core.bypass_connection_validation = true;
        }
        if let Some(retries) = overrides.connection_validation_retries {
            core.connection_validation_retries = retries;
        }

        let mut logging = config.logging.clone();
        if let Some(level) = overrides.log_level {
            logging.log_level = level;
        }
        if let Some(dir) = overrides.logfiles_directory {
            logging.logfiles_directory = dir;
        }

        let summaries = SummarySelection::default()
            .with_flags(&overrides.show_summaries, &overrides.hide_summaries)?;

        Ok(Self {
            pool_size,
            skip,
            core,
            logging,
            summaries,
            enable_latest: overrides.enable_latest,
        })
    }
}
