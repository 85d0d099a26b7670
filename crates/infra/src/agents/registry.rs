//! Static table of the agents this daemon knows how to run.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use hgcs_core::Clock;

use crate::config::{AgentSection, Config, ConfigError};
use crate::queue::SharedQueue;
use crate::retry::RetryPolicy;

use super::{
    Agent, AgentHandle, AgentRunner, CleanupDelayer, LogRetriever, RemovalLock, RetrieveMode,
    SdfFetcher, XJobCleaner, cleanup_delayer, log_retriever, sdf_fetcher, xjob_cleaner,
};

const DEFAULT_FLUSH_PERIOD: u64 = 86_400;
const DEFAULT_DELAY_TIME: u64 = 7_200;
const DEFAULT_GRACE_PERIOD: u64 = 86_400;
const DEFAULT_SDF_LIMIT: usize = 6_000;

/// Shared collaborators handed to every agent constructor.
#[derive(Clone)]
pub struct AgentDeps {
    pub clock: Arc<dyn Clock>,
    pub removal_lock: RemovalLock,
}

impl AgentDeps {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            removal_lock: RemovalLock::new(),
        }
    }
}

type BuildFn = fn(&str, &AgentSection, &AgentDeps) -> Result<Box<dyn Agent>, ConfigError>;

/// How to validate and construct one agent from its config section.
pub struct AgentSpec {
    pub name: &'static str,
    pub accepts: &'static [&'static str],
    pub requires: &'static [&'static str],
    pub build: BuildFn,
}

impl core::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("accepts", &self.accepts)
            .field("requires", &self.requires)
            .finish()
    }
}

/// Agents in start order.
pub static REGISTRY: [AgentSpec; 4] = [
    AgentSpec {
        name: log_retriever::NAME,
        accepts: &["enable", "sleep_period", "flush_period", "retrieve_mode", "limit"],
        requires: &["sleep_period"],
        build: build_log_retriever,
    },
    AgentSpec {
        name: cleanup_delayer::NAME,
        accepts: &["enable", "sleep_period", "delay_time", "limit"],
        requires: &["sleep_period"],
        build: build_cleanup_delayer,
    },
    AgentSpec {
        name: sdf_fetcher::NAME,
        accepts: &["enable", "sleep_period", "flush_period", "limit"],
        requires: &["sleep_period"],
        build: build_sdf_fetcher,
    },
    AgentSpec {
        name: xjob_cleaner::NAME,
        accepts: &["enable", "sleep_period", "grace_period"],
        requires: &["sleep_period"],
        build: build_xjob_cleaner,
    },
];

pub fn lookup(name: &str) -> Option<&'static AgentSpec> {
    REGISTRY.iter().find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// An agent ready to be handed to a runner.
pub struct ConfiguredAgent {
    pub agent: Box<dyn Agent>,
    pub sleep_period: Duration,
}

impl core::fmt::Debug for ConfiguredAgent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfiguredAgent")
            .field("agent", &self.agent.name())
            .field("sleep_period", &self.sleep_period)
            .finish()
    }
}

fn seconds(agent: &str, key: &'static str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::ZeroPeriod {
            agent: agent.to_string(),
            key,
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn retrieve_mode(agent: &str, section: &AgentSection) -> Result<RetrieveMode, ConfigError> {
    match section.retrieve_mode.as_deref() {
        None => Ok(RetrieveMode::default()),
        Some(raw) => raw.parse().map_err(|reason| ConfigError::InvalidValue {
            agent: agent.to_string(),
            key: "retrieve_mode",
            reason,
        }),
    }
}

fn validate(spec: &AgentSpec, name: &str, section: &AgentSection) -> Result<(), ConfigError> {
    if let Some(key) = section.keys().into_iter().find(|k| !spec.accepts.contains(k)) {
        return Err(ConfigError::UnknownKey {
            agent: name.to_string(),
            key: key.to_string(),
        });
    }
    // Disabled sections are checked for stray keys but may be incomplete.
    if section.enabled() {
        let present = section.keys();
        if let Some(key) = spec.requires.iter().copied().find(|k| !present.contains(k)) {
            return Err(ConfigError::MissingKey {
                agent: name.to_string(),
                key,
            });
        }
    }
    seconds(name, "sleep_period", section.sleep_period, 1)?;
    seconds(name, "flush_period", section.flush_period, 1)?;
    retrieve_mode(name, section)?;
    Ok(())
}

fn build_log_retriever(
    name: &str,
    section: &AgentSection,
    deps: &AgentDeps,
) -> Result<Box<dyn Agent>, ConfigError> {
    Ok(Box::new(LogRetriever::new(
        retrieve_mode(name, section)?,
        seconds(name, "flush_period", section.flush_period, DEFAULT_FLUSH_PERIOD)?,
        section.limit,
        deps.clock.clone(),
    )))
}

fn build_cleanup_delayer(
    _name: &str,
    section: &AgentSection,
    _deps: &AgentDeps,
) -> Result<Box<dyn Agent>, ConfigError> {
    Ok(Box::new(CleanupDelayer::new(
        Duration::from_secs(section.delay_time.unwrap_or(DEFAULT_DELAY_TIME)),
        section.limit,
    )))
}

fn build_sdf_fetcher(
    name: &str,
    section: &AgentSection,
    deps: &AgentDeps,
) -> Result<Box<dyn Agent>, ConfigError> {
    Ok(Box::new(SdfFetcher::new(
        seconds(name, "flush_period", section.flush_period, DEFAULT_FLUSH_PERIOD)?,
        Some(section.limit.unwrap_or(DEFAULT_SDF_LIMIT)),
        deps.clock.clone(),
    )))
}

fn build_xjob_cleaner(
    _name: &str,
    section: &AgentSection,
    deps: &AgentDeps,
) -> Result<Box<dyn Agent>, ConfigError> {
    Ok(Box::new(XJobCleaner::new(
        Duration::from_secs(section.grace_period.unwrap_or(DEFAULT_GRACE_PERIOD)),
        deps.removal_lock.clone(),
    )))
}

/// Validate every agent section, then build the enabled agents in registry order.
///
/// Nothing is built unless the whole configuration is valid.
pub fn build_agents(config: &Config, deps: &AgentDeps) -> Result<Vec<ConfiguredAgent>, ConfigError> {
    for (name, section) in &config.agents {
        let spec = lookup(name).ok_or_else(|| ConfigError::UnknownAgent(name.clone()))?;
        validate(spec, name, section)?;
    }

    let mut agents = Vec::new();
    for spec in &REGISTRY {
        let Some((name, section)) = config
            .agents
            .iter()
            .find(|(name, _)| spec.name.eq_ignore_ascii_case(name))
        else {
            continue;
        };
        if !section.enabled() {
            info!(agent = spec.name, "disabled");
            continue;
        }
        agents.push(ConfiguredAgent {
            agent: (spec.build)(name, section, deps)?,
            sleep_period: seconds(name, "sleep_period", section.sleep_period, 1)?,
        });
    }
    Ok(agents)
}

/// Start each agent on its own thread.
pub fn spawn_agents(
    agents: Vec<ConfiguredAgent>,
    queue: &Arc<SharedQueue>,
    connect_policy: &RetryPolicy,
) -> Vec<AgentHandle> {
    agents
        .into_iter()
        .map(|configured| {
            let name = configured.agent.name();
            info!(agent = name, sleep_secs = configured.sleep_period.as_secs(), "starting agent thread");
            AgentRunner::new(configured.agent, Arc::clone(queue), configured.sleep_period)
                .with_connect_policy(connect_policy.clone())
                .spawn()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hgcs_core::ManualClock;

    fn section(enable: bool) -> AgentSection {
        AgentSection {
            enable: Some(enable),
            sleep_period: Some(60),
            ..AgentSection::default()
        }
    }

    fn config(sections: Vec<(&str, AgentSection)>) -> Config {
        Config {
            agents: sections
                .into_iter()
                .map(|(name, s)| (name.to_string(), s))
                .collect(),
            ..Config::default()
        }
    }

    fn deps() -> AgentDeps {
        AgentDeps::new(Arc::new(ManualClock::at_unix(0)))
    }

    fn build(config: &Config) -> Result<Vec<&'static str>, ConfigError> {
        Ok(build_agents(config, &deps())?
            .iter()
            .map(|a| a.agent.name())
            .collect())
    }

    #[test]
    fn enabled_agents_start_in_registry_order() {
        let config = config(vec![
            ("XJobCleaner", section(true)),
            ("SDFFetcher", section(false)),
            ("LogRetriever", section(true)),
        ]);
        assert_eq!(build(&config).unwrap(), vec!["LogRetriever", "XJobCleaner"]);
    }

    #[test]
    fn unknown_section_is_rejected() {
        let config = config(vec![("JobEater", section(true))]);
        assert!(matches!(build(&config), Err(ConfigError::UnknownAgent(n)) if n == "JobEater"));
    }

    #[test]
    fn key_of_another_agent_is_rejected_even_when_disabled() {
        let mut s = section(false);
        s.grace_period = Some(10);
        let config = config(vec![("CleanupDelayer", s)]);
        assert!(matches!(
            build(&config),
            Err(ConfigError::UnknownKey { key, .. }) if key == "grace_period"
        ));
    }

    #[test]
    fn missing_sleep_period_is_rejected_for_enabled_agent() {
        let s = AgentSection {
            enable: Some(true),
            ..AgentSection::default()
        };
        let config = config(vec![("XJobCleaner", s)]);
        assert!(matches!(
            build(&config),
            Err(ConfigError::MissingKey { key: "sleep_period", .. })
        ));
    }

    #[test]
    fn disabled_section_may_omit_sleep_period() {
        let s = AgentSection {
            enable: Some(false),
            ..AgentSection::default()
        };
        let config = config(vec![("XJobCleaner", s)]);
        assert!(build(&config).unwrap().is_empty());
    }

    #[test]
    fn zero_periods_are_rejected() {
        let mut s = section(true);
        s.sleep_period = Some(0);
        assert!(matches!(
            build(&config(vec![("SDFFetcher", s)])),
            Err(ConfigError::ZeroPeriod { key: "sleep_period", .. })
        ));

        let mut s = section(true);
        s.flush_period = Some(0);
        assert!(matches!(
            build(&config(vec![("LogRetriever", s)])),
            Err(ConfigError::ZeroPeriod { key: "flush_period", .. })
        ));
    }

    #[test]
    fn bad_retrieve_mode_is_rejected() {
        let mut s = section(true);
        s.retrieve_mode = Some("teleport".to_string());
        assert!(matches!(
            build(&config(vec![("LogRetriever", s)])),
            Err(ConfigError::InvalidValue { key: "retrieve_mode", .. })
        ));
    }

    #[test]
    fn names_match_case_insensitively() {
        let config = config(vec![("sdffetcher", section(true))]);
        assert_eq!(build(&config).unwrap(), vec!["SDFFetcher"]);
    }

    #[test]
    fn sleep_period_is_carried_to_runner() {
        let mut s = section(true);
        s.sleep_period = Some(300);
        let agents = build_agents(&config(vec![("CleanupDelayer", s)]), &deps()).unwrap();
        assert_eq!(agents[0].sleep_period, Duration::from_secs(300));
    }
}
