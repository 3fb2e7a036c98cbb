//! Configuration for chapterhouse

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::ranking::RankingPeriod;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chapterhouse")
}

/// One step of a recency weight schedule: `days` consecutive days,
/// counted back from the ranking date, each weighted by `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightStep {
    pub days: u32,
    pub weight: u32,
}

/// Step function of recency used to weight daily view totals.
///
/// Steps are ordered from the most recent day backwards and their weights
/// must never increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightSchedule {
    pub steps: Vec<WeightStep>,
}

impl WeightSchedule {
    pub fn new(steps: Vec<WeightStep>) -> Self {
        Self { steps }
    }

    /// Number of calendar days contributing to the score window
    pub fn window_days(&self) -> u32 {
        self.steps.iter().map(|s| s.days).sum()
    }

    /// Weight for a day `offset` days before the ranking date (0 = that day).
    /// Returns `None` once the offset falls outside the window.
    pub fn weight_for_offset(&self, offset: u32) -> Option<u32> {
        let mut start = 0u32;
        for step in &self.steps {
            if offset < start + step.days {
                return Some(step.weight);
            }
            start += step.days;
        }
        None
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(CoreError::Config("weight schedule has no steps".into()));
        }
        let mut previous = u32::MAX;
        for (i, step) in self.steps.iter().enumerate() {
            if step.days == 0 {
                return Err(CoreError::Config(format!("step[{}] covers zero days", i)));
            }
            if step.weight == 0 {
                return Err(CoreError::Config(format!("step[{}] has zero weight", i)));
            }
            if step.weight > previous {
                return Err(CoreError::Config(format!(
                    "step[{}] weight {} exceeds the more recent weight {}",
                    i, step.weight, previous
                )));
            }
            previous = step.weight;
        }
        Ok(())
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// SQLite file name inside `storage_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Broadcast capacity for the event bus
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default = "default_daily_weights")]
    pub daily_weights: WeightSchedule,

    #[serde(default = "default_weekly_weights")]
    pub weekly_weights: WeightSchedule,

    #[serde(default = "default_monthly_weights")]
    pub monthly_weights: WeightSchedule,
}

fn default_database_file() -> String {
    "chapterhouse.db".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_daily_weights() -> WeightSchedule {
    WeightSchedule::new(vec![
        WeightStep { days: 1, weight: 3 },
        WeightStep { days: 1, weight: 2 },
    ])
}

fn default_weekly_weights() -> WeightSchedule {
    WeightSchedule::new(vec![
        WeightStep { days: 1, weight: 3 },
        WeightStep { days: 1, weight: 2 },
        WeightStep { days: 5, weight: 1 },
    ])
}

fn default_monthly_weights() -> WeightSchedule {
    WeightSchedule::new(vec![
        WeightStep { days: 7, weight: 3 },
        WeightStep { days: 7, weight: 2 },
        WeightStep { days: 16, weight: 1 },
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_file: default_database_file(),
            event_capacity: default_event_capacity(),
            daily_weights: default_daily_weights(),
            weekly_weights: default_weekly_weights(),
            monthly_weights: default_monthly_weights(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for period in RankingPeriod::ALL {
            self.schedule(period).validate().map_err(|e| match e {
                CoreError::Config(msg) => CoreError::Config(format!("{} weights: {}", period, msg)),
                other => other,
            })?;
        }
        Ok(())
    }

    /// Weight schedule for a ranking period
    pub fn schedule(&self, period: RankingPeriod) -> &WeightSchedule {
        match period {
            RankingPeriod::Daily => &self.daily_weights,
            RankingPeriod::Weekly => &self.weekly_weights,
            RankingPeriod::Monthly => &self.monthly_weights,
        }
    }

    /// Get database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file)
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
