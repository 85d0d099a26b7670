//! Queue client backed by the HTCondor command-line tools.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use tracing::debug;

use hgcs_core::{ClassAd, Expr, JobId, QueueError, QueueResult};

use super::r#trait::{ActionSummary, JobAction, JobIter, QueueClient, QueueConnector, jobs_from_ads};

/// Job ids per `condor_qedit` / `condor_transfer_data` invocation.
const IDS_PER_CALL: usize = 500;

/// Talks to a schedd through `condor_q`, `condor_qedit`, `condor_rm` and
/// `condor_transfer_data`.
#[derive(Debug, Clone, Default)]
pub struct CondorCliClient {
    bin_dir: Option<PathBuf>,
    schedd: Option<String>,
}

impl CondorCliClient {
    pub fn new(bin_dir: Option<PathBuf>, schedd: Option<String>) -> Self {
        Self { bin_dir, schedd }
    }

    fn command(&self, tool: &str) -> Command {
        let program = match &self.bin_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        };
        let mut cmd = Command::new(program);
        if let Some(name) = &self.schedd {
            cmd.arg("-name").arg(name);
        }
        cmd
    }

    /// Run a tool and return its stdout; `kind` classifies a non-zero exit.
    fn run(&self, mut cmd: Command, kind: fn(String) -> QueueError) -> QueueResult<String> {
        let tool = cmd.get_program().to_string_lossy().into_owned();
        debug!(command = ?cmd, "invoking queue tool");
        let output = cmd
            .output()
            .map_err(|e| QueueError::connection(format!("cannot run {tool}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let msg = format!("{tool} exited with {}: {stderr}", output.status);
            if stderr.to_ascii_lowercase().contains("parse error") {
                return Err(QueueError::malformed(msg));
            }
            return Err(kind(msg));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `condor_q -json` output: a JSON array of objects, or nothing at all
/// when no job matched.
pub(crate) fn parse_listing(stdout: &str) -> QueueResult<Vec<ClassAd>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let objects: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(stdout)
        .map_err(|e| QueueError::query(format!("unreadable job listing: {e}")))?;
    Ok(objects.iter().map(ClassAd::from_json).collect())
}

impl QueueClient for CondorCliClient {
    fn query(
        &self,
        constraint: &Expr,
        projection: &[&str],
        limit: Option<usize>,
    ) -> QueueResult<JobIter<'_>> {
        let mut cmd = self.command("condor_q");
        cmd.arg("-allusers")
            .arg("-json")
            .arg("-constraint")
            .arg(constraint.to_string());
        if !projection.is_empty() {
            cmd.arg("-attributes").arg(projection.join(","));
        }
        if let Some(limit) = limit {
            cmd.arg("-limit").arg(limit.to_string());
        }
        let stdout = self.run(cmd, QueueError::Query)?;
        let ads = parse_listing(&stdout)?;
        Ok(jobs_from_ads(ads.into_iter().map(Ok)))
    }

    fn edit(&self, ids: &[JobId], attr: &str, value: &Expr) -> QueueResult<()> {
        for chunk in ids.chunks(IDS_PER_CALL) {
            let mut cmd = self.command("condor_qedit");
            cmd.args(chunk.iter().map(JobId::to_string))
                .arg(attr)
                .arg(value.to_string());
            self.run(cmd, QueueError::Edit)?;
        }
        Ok(())
    }

    fn act(&self, action: JobAction, constraint: &Expr) -> QueueResult<ActionSummary> {
        let mut cmd = match action {
            JobAction::RemoveX => {
                let mut cmd = self.command("condor_rm");
                cmd.arg("-forcex");
                cmd
            }
        };
        cmd.arg("-constraint").arg(constraint.to_string());
        let stdout = self.run(cmd, QueueError::Action)?;
        Ok(ActionSummary {
            affected: None,
            detail: stdout.trim().to_string(),
        })
    }

    fn transfer_output(&self, ids: &[JobId]) -> QueueResult<()> {
        for chunk in ids.chunks(IDS_PER_CALL) {
            let mut cmd = self.command("condor_transfer_data");
            cmd.args(chunk.iter().map(JobId::to_string));
            self.run(cmd, QueueError::Transfer)?;
        }
        Ok(())
    }
}

/// Connects by checking that the schedd answers a cheap `condor_q -totals`.
#[derive(Debug, Clone, Default)]
pub struct CondorCliConnector {
    client: CondorCliClient,
}

impl CondorCliConnector {
    pub fn new(client: CondorCliClient) -> Self {
        Self { client }
    }
}

impl QueueConnector for CondorCliConnector {
    fn connect(&self) -> QueueResult<Arc<dyn QueueClient>> {
        let mut probe = self.client.command("condor_q");
        probe.arg("-totals");
        self.client
            .run(probe, QueueError::Connection)
            .map_err(|e| match e {
                QueueError::Connection(_) => e,
                other => QueueError::connection(other.to_string()),
            })?;
        Ok(Arc::new(self.client.clone()))
    }
}
