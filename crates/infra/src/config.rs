//! Daemon configuration: a TOML file plus `HGCS_`-prefixed environment overrides.
//!
//! ```toml
//! [master]
//! log_file = "/var/log/hgcs/hgcs.log"
//! log_level = "INFO"
//!
//! [queue]
//! schedd = "schedd.example.org"
//!
//! [agents.XJobCleaner]
//! enable = true
//! sleep_period = 60
//! grace_period = 86400
//! ```
//!
//! Environment keys nest with `__`, e.g. `HGCS_AGENTS__XJOBCLEANER__GRACE_PERIOD=3600`.
//! Agent section names are matched case-insensitively.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use thiserror::Error;

use hgcs_observability::{LogFormat, LogLevel, LogOptions};

use crate::retry::{OnExhaust, RetryPolicy};

pub const ENV_PREFIX: &str = "HGCS_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),

    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("unknown agent section [agents.{0}]")]
    UnknownAgent(String),

    #[error("[agents.{agent}]: unknown key {key:?}")]
    UnknownKey { agent: String, key: String },

    #[error("[agents.{agent}]: missing required key {key:?}")]
    MissingKey { agent: String, key: &'static str },

    #[error("[agents.{agent}]: {key} must be greater than zero")]
    ZeroPeriod { agent: String, key: &'static str },

    #[error("[agents.{agent}]: invalid {key}: {reason}")]
    InvalidValue {
        agent: String,
        key: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterConfig {
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl MasterConfig {
    /// Logging options; `foreground` forces stderr.
    pub fn log_options(&self, foreground: bool) -> LogOptions {
        LogOptions {
            level: self.log_level,
            format: self.log_format,
            file: if foreground {
                None
            } else {
                self.log_file.clone()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Schedd to talk to; the local one when unset.
    pub schedd: Option<String>,
    /// Directory holding the `condor_*` tools; `PATH` lookup when unset.
    pub bin_dir: Option<PathBuf>,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Seconds between connection attempts.
    #[serde(default = "default_connect_delay")]
    pub connect_delay: u64,
}

const fn default_connect_attempts() -> u32 {
    999
}

const fn default_connect_delay() -> u64 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            schedd: None,
            bin_dir: None,
            connect_attempts: default_connect_attempts(),
            connect_delay: default_connect_delay(),
        }
    }
}

impl QueueConfig {
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.connect_attempts,
            Duration::from_secs(self.connect_delay),
            OnExhaust::AbortAgent,
        )
    }
}

/// One `[agents.<Name>]` table. Which keys are meaningful depends on the agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSection {
    pub enable: Option<bool>,
    pub sleep_period: Option<u64>,
    pub flush_period: Option<u64>,
    pub retrieve_mode: Option<String>,
    pub limit: Option<usize>,
    pub delay_time: Option<u64>,
    pub grace_period: Option<u64>,
    #[serde(flatten)]
    pub other: BTreeMap<String, figment::value::Value>,
}

impl AgentSection {
    pub fn enabled(&self) -> bool {
        self.enable.unwrap_or(false)
    }

    /// Names of every key set in this section.
    pub fn keys(&self) -> Vec<&str> {
        let known = [
            ("enable", self.enable.is_some()),
            ("sleep_period", self.sleep_period.is_some()),
            ("flush_period", self.flush_period.is_some()),
            ("retrieve_mode", self.retrieve_mode.is_some()),
            ("limit", self.limit.is_some()),
            ("delay_time", self.delay_time.is_some()),
            ("grace_period", self.grace_period.is_some()),
        ];
        known
            .into_iter()
            .filter_map(|(key, set)| set.then_some(key))
            .chain(self.other.keys().map(String::as_str))
            .collect()
    }

    /// Overlay `other` on top of `self`.
    fn merge(self, other: AgentSection) -> AgentSection {
        let mut rest = self.other;
        rest.extend(other.other);
        AgentSection {
            enable: other.enable.or(self.enable),
            sleep_period: other.sleep_period.or(self.sleep_period),
            flush_period: other.flush_period.or(self.flush_period),
            retrieve_mode: other.retrieve_mode.or(self.retrieve_mode),
            limit: other.limit.or(self.limit),
            delay_time: other.delay_time.or(self.delay_time),
            grace_period: other.grace_period.or(self.grace_period),
            other: rest,
        }
    }
}

impl Config {
    /// Load `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let mut config: Self = figment.extract().map_err(Box::new)?;
        config.fold_agent_names();
        Ok(config)
    }

    /// Merge sections whose names differ only in case.
    ///
    /// Environment keys arrive lowercased; the all-lowercase spelling sorts
    /// last among its case variants, so environment values win.
    fn fold_agent_names(&mut self) {
        let mut folded: BTreeMap<String, AgentSection> = BTreeMap::new();
        for (name, section) in std::mem::take(&mut self.agents) {
            match folded
                .keys()
                .find(|existing| existing.eq_ignore_ascii_case(&name))
                .cloned()
            {
                Some(existing) => {
                    if let Some(base) = folded.remove(&existing) {
                        folded.insert(existing, base.merge(section));
                    }
                }
                None => {
                    folded.insert(name, section);
                }
            }
        }
        self.agents = folded;
    }
}
