//! Typed configuration.
//!
//! Defaults, then an optional TOML file, then environment variables.
//! Loads once at startup and fails fast on anything malformed. The database
//! URL is wrapped in `secrecy::SecretString` so it never lands in logs.

pub mod secrets;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::queue::StaleThresholds;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub queue: QueueConfig,
    /// Per-event-type handler commands, keyed by event type.
    pub handlers: HashMap<String, HandlerSpec>,
}

impl Config {
    /// Load configuration from the process environment, optionally layered
    /// over a TOML file.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::from_lookup(file, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with an explicit variable source.
    pub fn from_lookup(file: Option<&Path>, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let file = match file {
            Some(path) => ConfigFile::read(path)?,
            None => ConfigFile::default(),
        };

        let mut queue = QueueConfig::default();
        queue.apply_file(&file.queue)?;
        queue.apply_vars(&var)?;
        queue.validate()?;

        let database_url = var("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: var("OTEL_ENDPOINT"),
            log_level: var("LOG_LEVEL")
                .map(|level| level.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
            queue,
            handlers: file.handlers,
        })
    }
}

/// Timing and sizing of the worker pool and stale guard.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Number of concurrent worker tasks.
    pub workers: usize,
    /// Sleep between claims when the queue is empty.
    pub poll_sleep: Duration,
    /// Minimum gap between "no events" log lines, per worker.
    pub idle_log_interval: Duration,
    /// Pause after a failed cycle before claiming again.
    pub failure_cooldown: Duration,
    /// Period of the stale guard.
    pub guard_interval: Duration,
    /// Claim age after which an unfinished event is released.
    pub release_after: Duration,
    /// Claim age after which the row is deleted.
    pub retain_for: Duration,
    /// How long shutdown waits for the guard before detaching it.
    pub guard_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_sleep: Duration::from_millis(250),
            idle_log_interval: Duration::from_secs(10),
            failure_cooldown: Duration::from_secs(1),
            guard_interval: Duration::from_secs(60),
            release_after: Duration::from_secs(120),
            retain_for: Duration::from_secs(180),
            guard_grace: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    pub fn thresholds(&self) -> Result<StaleThresholds> {
        StaleThresholds::new(self.release_after, self.retain_for)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        self.thresholds().map(|_| ())
    }

    /// Overlay values from the `[queue]` table of a config file.
    pub fn apply_file(&mut self, file: &QueueFile) -> Result<()> {
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        let durations = [
            ("poll_sleep_s", file.poll_sleep_s, &mut self.poll_sleep),
            ("idle_log_interval_s", file.idle_log_interval_s, &mut self.idle_log_interval),
            ("failure_cooldown_s", file.failure_cooldown_s, &mut self.failure_cooldown),
            ("guard_interval_s", file.guard_interval_s, &mut self.guard_interval),
            ("release_after_s", file.release_after_s, &mut self.release_after),
            ("retain_for_s", file.retain_for_s, &mut self.retain_for),
            ("guard_grace_s", file.guard_grace_s, &mut self.guard_grace),
        ];
        for (name, value, slot) in durations {
            if let Some(secs) = value {
                *slot = seconds(name, secs)?;
            }
        }
        Ok(())
    }

    /// Overlay values from environment-style variables.
    pub fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = var("WORKERS") {
            self.workers = raw
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("WORKERS={raw}: {e}")))?;
        }
        let durations = [
            ("POLL_SLEEP_S", &mut self.poll_sleep),
            ("NO_EVENT_LOG_EVERY_S", &mut self.idle_log_interval),
            ("FAILURE_COOLDOWN_S", &mut self.failure_cooldown),
            ("GUARD_INTERVAL_S", &mut self.guard_interval),
            ("RELEASE_AFTER_S", &mut self.release_after),
            ("RETAIN_FOR_S", &mut self.retain_for),
            ("GUARD_GRACE_S", &mut self.guard_grace),
        ];
        for (name, slot) in durations {
            if let Some(raw) = var(name) {
                let secs: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| Error::Config(format!("{name}={raw}: {e}")))?;
                *slot = seconds(name, secs)?;
            }
        }
        Ok(())
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| Error::Config(format!("{name}={secs}: {e}")))
}

/// Top-level TOML layout.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub queue: QueueFile,
    #[serde(default)]
    pub handlers: HashMap<String, HandlerSpec>,
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// `[queue]` table. Durations are seconds and may be fractional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueFile {
    pub workers: Option<usize>,
    pub poll_sleep_s: Option<f64>,
    pub idle_log_interval_s: Option<f64>,
    pub failure_cooldown_s: Option<f64>,
    pub guard_interval_s: Option<f64>,
    pub release_after_s: Option<f64>,
    pub retain_for_s: Option<f64>,
    pub guard_grace_s: Option<f64>,
}

/// `[handlers.<event_type>]` entry: an executable to run per event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerSpec {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}
