use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration::{serde_duration, serde_option_duration};
use crate::error::ConfigError;

/// Choice function a persona uses to fill free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonaType {
    #[default]
    Default,
    Sequence,
    Weighted,
    ApproximateDistribution,
}

impl fmt::Display for PersonaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PersonaType::Default => "default",
            PersonaType::Sequence => "sequence",
            PersonaType::Weighted => "weighted",
            PersonaType::ApproximateDistribution => "approximate-distribution",
        })
    }
}

impl FromStr for PersonaType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "default" | "batched" => Ok(PersonaType::Default),
            "sequence" | "sorted" => Ok(PersonaType::Sequence),
            "weighted" => Ok(PersonaType::Weighted),
            "approximate-distribution" | "approx-dist" => Ok(PersonaType::ApproximateDistribution),
            other => Err(ConfigError::InvalidValue {
                field: "persona".to_string(),
                message: format!("unknown persona type '{other}'"),
            }),
        }
    }
}

/// Load shape of an Execute stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    #[serde(rename = "type")]
    pub persona_type: PersonaType,
    pub batch_size: usize,
    #[serde(with = "serde_duration")]
    pub batch_interval: Duration,
    #[serde(with = "serde_duration")]
    pub total_time: Duration,
    #[serde(with = "serde_duration")]
    pub graceful_stop: Duration,
    /// Target requests per second for the approximate-distribution persona.
    pub target_rps: Option<f64>,
    #[serde(with = "serde_option_duration")]
    pub warmup: Option<Duration>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            persona_type: PersonaType::Default,
            batch_size: 1_000,
            batch_interval: Duration::from_secs(1),
            total_time: Duration::from_secs(60),
            graceful_stop: Duration::from_secs(1),
            target_rps: None,
            warmup: None,
        }
    }
}

impl PersonaConfig {
    pub fn new(batch_size: usize, total_time: Duration) -> Self {
        Self {
            batch_size,
            total_time,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, persona_type: PersonaType) -> Self {
        self.persona_type = persona_type;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    pub fn with_target_rps(mut self, rps: f64) -> Self {
        self.target_rps = Some(rps);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.persona_type == PersonaType::ApproximateDistribution
            && !self.target_rps.is_some_and(|rps| rps > 0.0)
        {
            return Err(ConfigError::InvalidValue {
                field: "target_rps".to_string(),
                message: "approximate-distribution personas need a positive target".to_string(),
            });
        }
        Ok(())
    }
}
