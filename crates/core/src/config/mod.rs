use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{extract::MAX_CLUSTERS, Result, SpotihueError};

/// Longest sleep or backoff accepted from configuration.
pub const MAX_INTERVAL_SECS: f64 = 24.0 * 60.0 * 60.0;
/// Longest lock lifetime accepted from configuration.
pub const MAX_LOCK_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub extraction: ExtractionConfig,
    pub lock: LockConfig,
    pub setup: SetupConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing keys fall back to defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make every sync tick fail.
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.extraction.validate()?;
        self.lock.validate()?;
        self.setup.validate()
    }
}

/// Cadence of the synchronization loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lower bound of the jittered sleep between ticks.
    pub poll_interval_min_secs: f64,
    /// Upper bound of the jittered sleep between ticks.
    pub poll_interval_max_secs: f64,
    /// Fixed wait before polling again when nothing is playing.
    pub no_track_backoff_secs: f64,
    /// Consecutive fixture failures tolerated before the loop gives up.
    pub max_fixture_failures: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_min_secs: 2.0,
            poll_interval_max_secs: 4.0,
            no_track_backoff_secs: 5.0,
            max_fixture_failures: 5,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval_min(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_min_secs)
    }

    pub fn poll_interval_max(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_max_secs)
    }

    pub fn no_track_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.no_track_backoff_secs)
    }

    fn validate(&self) -> Result<()> {
        check_seconds("sync.poll_interval_min_secs", self.poll_interval_min_secs)?;
        check_seconds("sync.poll_interval_max_secs", self.poll_interval_max_secs)?;
        check_seconds("sync.no_track_backoff_secs", self.no_track_backoff_secs)?;
        if self.poll_interval_min_secs > self.poll_interval_max_secs {
            return Err(SpotihueError::Config(format!(
                "poll interval band is inverted ({} > {})",
                self.poll_interval_min_secs, self.poll_interval_max_secs
            )));
        }
        if self.max_fixture_failures == 0 {
            return Err(SpotihueError::Config(
                "sync.max_fixture_failures must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parameters of the artwork color extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Size of the downscaled artwork, as a percentage of the original.
    pub resize_percentage: f64,
    /// Number of dominant colors to derive.
    pub clusters: usize,
    /// Independent k-means restarts; the lowest inertia run wins.
    pub restarts: usize,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            resize_percentage: 60.0,
            clusters: 3,
            restarts: 10,
            max_iterations: 300,
            seed: 1259,
        }
    }
}

impl ExtractionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.resize_percentage > 0.0 && self.resize_percentage < 100.0) {
            return Err(SpotihueError::Config(format!(
                "extraction.resize_percentage must be within (0, 100), got {}",
                self.resize_percentage
            )));
        }
        if self.clusters == 0 || self.clusters > MAX_CLUSTERS {
            return Err(SpotihueError::Config(format!(
                "extraction.clusters must be between 1 and {MAX_CLUSTERS}, got {}",
                self.clusters
            )));
        }
        if self.restarts == 0 || self.max_iterations == 0 {
            return Err(SpotihueError::Config(
                "extraction.restarts and extraction.max_iterations must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Singleton lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Age after which a lock record is stale even if never released.
    pub max_duration_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 60 * 5,
        }
    }
}

impl LockConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_duration_secs == 0 || self.max_duration_secs > MAX_LOCK_DURATION_SECS {
            return Err(SpotihueError::Config(format!(
                "lock.max_duration_secs must be between 1 and {MAX_LOCK_DURATION_SECS}, got {}",
                self.max_duration_secs
            )));
        }
        Ok(())
    }
}

/// Bridge pairing retries. Pairing only succeeds shortly after the bridge's
/// link button was pressed, so it is attempted a few times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    pub attempts: u32,
    pub backoff_secs: f64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_secs: 5.0,
        }
    }
}

impl SetupConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_secs)
    }

    fn validate(&self) -> Result<()> {
        check_seconds("setup.backoff_secs", self.backoff_secs)?;
        if self.attempts == 0 {
            return Err(SpotihueError::Config(
                "setup.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn check_seconds(name: &str, value: f64) -> Result<()> {
    if (0.0..=MAX_INTERVAL_SECS).contains(&value) {
        Ok(())
    } else {
        Err(SpotihueError::Config(format!(
            "{name} must be between 0 and {MAX_INTERVAL_SECS} seconds, got {value}"
        )))
    }
}
