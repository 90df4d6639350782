//! dynoscale.toml configuration parser.
//!
//! ```toml
//! [store]
//! backend = "redis"
//! url = "redis://localhost:6379"
//!
//! [defaults]
//! throttle = "10s"
//! quiet_buffer = "10s"
//! on_failure = "zero"
//!
//! [poll]
//! update_after = "1s"
//! shutdown_before = "10s"
//!
//! [[process]]
//! app_name = "my-app"
//! name = "worker"
//! queues = ["default", "mailers"]
//! active_dynos = 1
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dynoscale_state::{RedbStateStore, RedisStateStore, SharedStateStore};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::poll_interval::PollDelays;
use crate::process::{
    DEFAULT_ACTIVE_DYNOS, DEFAULT_QUIET_BUFFER, DEFAULT_THROTTLE_WINDOW, FailureFallback,
    ProcessSettings,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessConfig>,
}

/// Where shared process records live.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Redis { url: String },
    Redb { path: PathBuf },
    #[default]
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub throttle: Option<String>,
    pub quiet_buffer: Option<String>,
    pub on_failure: Option<FailureFallback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollConfig {
    pub update_before: Option<String>,
    pub update_after: Option<String>,
    pub shutdown_before: Option<String>,
    pub shutdown_after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub app_name: String,
    pub name: String,
    #[serde(default)]
    pub queues: Vec<String>,
    pub active_dynos: Option<u32>,
    pub throttle: Option<String>,
    pub quiet_buffer: Option<String>,
    pub on_failure: Option<FailureFallback>,
}

impl AutoscaleConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AutoscaleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve every `[[process]]` entry against `[defaults]`.
    ///
    /// Fails on unparsable durations, a zero `active_dynos`, duplicate
    /// process names, or a queue claimed by more than one process.
    pub fn process_settings(&self) -> AutoscaleResult<Vec<ProcessSettings>> {
        let default_throttle =
            duration_or(self.defaults.throttle.as_deref(), DEFAULT_THROTTLE_WINDOW)?;
        let default_quiet =
            duration_or(self.defaults.quiet_buffer.as_deref(), DEFAULT_QUIET_BUFFER)?;
        let default_failure = self.defaults.on_failure.unwrap_or_default();

        let mut claimed: HashMap<&str, &str> = HashMap::new();
        let mut seen = HashSet::new();
        let mut settings = Vec::with_capacity(self.processes.len());

        for entry in &self.processes {
            if entry.name.trim().is_empty() || entry.app_name.trim().is_empty() {
                return Err(AutoscaleError::Config(
                    "process entries need both app_name and name".into(),
                ));
            }
            if !seen.insert((entry.app_name.as_str(), entry.name.as_str())) {
                return Err(AutoscaleError::Config(format!(
                    "process {}/{} is declared twice",
                    entry.app_name, entry.name
                )));
            }
            for queue in &entry.queues {
                if let Some(owner) = claimed.insert(queue.as_str(), entry.name.as_str()) {
                    return Err(AutoscaleError::Config(format!(
                        "queue {queue} is claimed by both {owner} and {}",
                        entry.name
                    )));
                }
            }

            let active_dynos = entry.active_dynos.unwrap_or(DEFAULT_ACTIVE_DYNOS);
            if active_dynos == 0 {
                return Err(AutoscaleError::Config(format!(
                    "process {} needs active_dynos of at least 1",
                    entry.name
                )));
            }

            settings.push(ProcessSettings {
                app_name: entry.app_name.clone(),
                name: entry.name.clone(),
                queues: entry.queues.clone(),
                active_dynos,
                throttle_window: duration_or(entry.throttle.as_deref(), default_throttle)?,
                quiet_buffer: duration_or(entry.quiet_buffer.as_deref(), default_quiet)?,
                on_failure: entry.on_failure.unwrap_or(default_failure),
            });
        }

        Ok(settings)
    }

    /// Delays for the update and shutdown coordinators, in that order.
    pub fn poll_delays(&self) -> AutoscaleResult<(PollDelays, PollDelays)> {
        let update = PollDelays::new(
            duration_or(self.poll.update_before.as_deref(), Duration::ZERO)?,
            duration_or(self.poll.update_after.as_deref(), Duration::from_secs(1))?,
        );
        let shutdown = PollDelays::new(
            duration_or(self.poll.shutdown_before.as_deref(), Duration::from_secs(10))?,
            duration_or(self.poll.shutdown_after.as_deref(), Duration::ZERO)?,
        );
        Ok((update, shutdown))
    }
}

impl StoreConfig {
    /// Open the configured backend.
    pub async fn open(&self) -> AutoscaleResult<Arc<dyn SharedStateStore>> {
        let store: Arc<dyn SharedStateStore> = match self {
            StoreConfig::Redis { url } => Arc::new(RedisStateStore::connect(url).await?),
            StoreConfig::Redb { path } => Arc::new(RedbStateStore::open(path)?),
            StoreConfig::Memory => Arc::new(RedbStateStore::open_in_memory()?),
        };
        Ok(store)
    }
}

fn duration_or(value: Option<&str>, default: Duration) -> AutoscaleResult<Duration> {
    value.map_or(Ok(default), parse_duration)
}

/// Parse a duration string like "500ms", "10s", "2m". A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> AutoscaleResult<Duration> {
    let s = s.trim();
    let invalid = || AutoscaleError::Config(format!("invalid duration: {s:?}"));

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}
