//! The `hgcs` daemon: runs the configured agents against an HTCondor schedd
//! until the process is terminated.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use hgcs_core::SystemClock;
use hgcs_infra::agents::{AgentDeps, AgentExit, AgentHandle, build_agents, spawn_agents};
use hgcs_infra::config::Config;
use hgcs_infra::queue::{CondorCliClient, CondorCliConnector, SharedQueue};

/// Keep an HTCondor job queue tidy: retrieve job logs, delay or purge finished jobs.
#[derive(Parser, Debug, Clone)]
#[command(name = "hgcs", version, long_about = None)]
pub struct Args {
    /// Configuration file (TOML).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: PathBuf,

    /// Log to stderr even if a log file is configured.
    #[arg(short = 'F', long = "foreground-log")]
    pub foreground_log: bool,
}

/// How the agent threads ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervision {
    pub started: usize,
    pub dead: usize,
}

impl Supervision {
    pub fn exit_code(self) -> ExitCode {
        if self.started > 0 && self.dead == self.started {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}

pub fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    hgcs_observability::init(&config.master.log_options(args.foreground_log))
        .context("setting up logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "This is HGCS");

    let agents = build_agents(&config, &AgentDeps::new(Arc::new(SystemClock)))
        .context("invalid agent configuration")?;
    if agents.is_empty() {
        warn!("no agent enabled; nothing to do");
        return Ok(ExitCode::SUCCESS);
    }

    let client = CondorCliClient::new(config.queue.bin_dir.clone(), config.queue.schedd.clone());
    let queue = SharedQueue::arc(Arc::new(CondorCliConnector::new(client)));
    let handles = spawn_agents(agents, &queue, &config.queue.connect_policy());

    Ok(supervise(handles).exit_code())
}

/// Wait for every agent thread to end.
pub fn supervise(handles: Vec<AgentHandle>) -> Supervision {
    let started = handles.len();
    let mut dead = 0;
    for handle in handles {
        let agent = handle.name();
        match handle.join() {
            Ok(AgentExit::Shutdown) => info!(agent, "agent stopped"),
            Ok(AgentExit::ConnectionLost) => {
                dead += 1;
                error!(agent, "agent died: job queue unreachable");
            }
            Err(_) => {
                dead += 1;
                error!(agent, "agent thread panicked");
            }
        }
    }
    if dead == started {
        error!(agents = started, "all agents died");
    }
    Supervision { started, dead }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use hgcs_core::{ManualClock, QueueError};
    use hgcs_infra::agents::{AgentRunner, CleanupDelayer};
    use hgcs_infra::queue::{InMemoryConnector, InMemoryQueue, Operation};
    use hgcs_infra::retry::{OnExhaust, RetryPolicy};

    #[test]
    fn parses_short_and_long_flags() {
        let args = Args::try_parse_from(["hgcs", "-c", "/etc/hgcs.toml", "-F"]).unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/hgcs.toml"));
        assert!(args.foreground_log);

        let args = Args::try_parse_from(["hgcs", "--config", "x.toml"]).unwrap();
        assert!(!args.foreground_log);
    }

    #[test]
    fn config_flag_is_required() {
        assert!(Args::try_parse_from(["hgcs"]).is_err());
    }

    #[test]
    fn nothing_enabled_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hgcs.toml");
        std::fs::write(
            &path,
            "[agents.XJobCleaner]\nenable = false\nsleep_period = 60\n",
        )
        .unwrap();
        let args = Args {
            config: path,
            foreground_log: true,
        };
        assert!(run(&args).is_ok());
    }

    #[test]
    fn invalid_agent_section_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hgcs.toml");
        std::fs::write(&path, "[agents.Reaper]\nenable = true\nsleep_period = 60\n").unwrap();
        let args = Args {
            config: path,
            foreground_log: true,
        };
        let err = run(&args).unwrap_err();
        assert!(format!("{err:#}").contains("Reaper"));
    }

    #[test]
    fn all_agents_dead_is_a_failure() {
        let queue = InMemoryQueue::arc(Arc::new(ManualClock::at_unix(0)));
        queue.fail_always(Operation::Connect, QueueError::connection("refused"));
        let shared = SharedQueue::arc(Arc::new(InMemoryConnector::new(queue)));

        let handle = AgentRunner::new(
            Box::new(CleanupDelayer::new(Duration::from_secs(60), None)),
            shared,
            Duration::from_secs(60),
        )
        .with_connect_policy(RetryPolicy::fixed(2, Duration::ZERO, OnExhaust::AbortAgent))
        .spawn();

        let summary = supervise(vec![handle]);
        assert_eq!(summary, Supervision { started: 1, dead: 1 });
    }
}
