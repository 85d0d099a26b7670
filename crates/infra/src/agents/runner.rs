//! The per-agent loop: acquire queue, run one cycle, sleep, repeat.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::queue::SharedQueue;
use crate::retry::{RetryExecutor, RetryPolicy};

use super::{Agent, CycleError, CycleReport};

/// Result of one [`AgentRunner::run_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Something failed; the next cycle starts over.
    Abandoned,
    /// The queue could not be acquired within the connection retry profile.
    Dead,
}

/// Why an agent thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    ConnectionLost,
    Shutdown,
}

/// Handle to a running agent thread.
#[derive(Debug)]
pub struct AgentHandle {
    name: &'static str,
    shutdown: mpsc::Sender<()>,
    join: thread::JoinHandle<AgentExit>,
}

impl AgentHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the agent to stop on its own.
    pub fn join(self) -> thread::Result<AgentExit> {
        self.join.join()
    }

    /// Ask the agent to stop after its current cycle and wait for it.
    pub fn shutdown(self) -> thread::Result<AgentExit> {
        let _ = self.shutdown.send(());
        self.join.join()
    }
}

pub struct AgentRunner {
    agent: Box<dyn Agent>,
    queue: Arc<SharedQueue>,
    sleep_period: Duration,
    connect: RetryExecutor,
}

impl core::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("agent", &self.agent.name())
            .field("sleep_period", &self.sleep_period)
            .finish()
    }
}

impl AgentRunner {
    pub fn new(agent: Box<dyn Agent>, queue: Arc<SharedQueue>, sleep_period: Duration) -> Self {
        let name = agent.name();
        Self {
            agent,
            queue,
            sleep_period,
            connect: RetryExecutor::new(name, RetryPolicy::connection()),
        }
    }

    pub fn with_connect_policy(mut self, policy: RetryPolicy) -> Self {
        self.connect = RetryExecutor::new(self.agent.name(), policy);
        self
    }

    pub fn name(&self) -> &'static str {
        self.agent.name()
    }

    pub fn run_once(&mut self) -> CycleOutcome {
        let name = self.agent.name();
        info!(agent = name, "run starts");

        let client = match self.connect.run("acquire", |_| self.queue.acquire()) {
            Ok(client) => client,
            Err(err) if err.is_fatal_to_agent() => {
                error!(agent = name, error = %err, "cannot reach job queue; agent is dead");
                return CycleOutcome::Dead;
            }
            Err(err) => {
                warn!(agent = name, error = %CycleError::Connection(err), "cycle abandoned");
                return CycleOutcome::Abandoned;
            }
        };

        match self.agent.run_cycle(client.as_ref()) {
            Ok(report) => {
                info!(
                    agent = name,
                    candidates = report.candidates,
                    skipped = report.skipped,
                    handled = report.handled,
                    failed = report.failed,
                    written_back = report.written_back,
                    write_back_failed = report.write_back_failed,
                    "run ends"
                );
                if report.connection_lost {
                    self.queue.invalidate();
                }
                CycleOutcome::Completed(report)
            }
            Err(err) => {
                if err.is_connection() {
                    self.queue.invalidate();
                }
                error!(agent = name, error = %err, "cycle abandoned");
                CycleOutcome::Abandoned
            }
        }
    }

    /// Start the loop on a thread named after the agent.
    pub fn spawn(self) -> AgentHandle {
        let name = self.agent.name();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run_loop(shutdown_rx))
            .expect("failed to spawn agent thread");

        AgentHandle {
            name,
            shutdown: shutdown_tx,
            join,
        }
    }

    fn run_loop(mut self, shutdown_rx: mpsc::Receiver<()>) -> AgentExit {
        let name = self.agent.name();
        let mut shutdown_rx = Some(shutdown_rx);
        loop {
            if let CycleOutcome::Dead = self.run_once() {
                return AgentExit::ConnectionLost;
            }

            debug!(agent = name, secs = self.sleep_period.as_secs(), "sleeping");
            match shutdown_rx.as_ref().map(|rx| rx.recv_timeout(self.sleep_period)) {
                Some(Ok(())) => {
                    info!(agent = name, "shutting down");
                    return AgentExit::Shutdown;
                }
                Some(Err(RecvTimeoutError::Timeout)) => {}
                // Handle dropped: nobody can stop us any more, keep the cadence.
                Some(Err(RecvTimeoutError::Disconnected)) => {
                    shutdown_rx = None;
                    thread::sleep(self.sleep_period);
                }
                None => thread::sleep(self.sleep_period),
            }
        }
    }
}
