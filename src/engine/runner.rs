//! Scraper attempt execution.
//!
//! One attempt is one isolated child process bound to a wall-clock timeout.
//! The lifecycle is explicit: spawned, running, then exactly one of exited,
//! timed out or canceled, with a single termination path (SIGTERM, grace,
//! forced kill) so the child is always reaped.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::storage::types::TargetConfig;

pub struct AttemptSpec {
    pub job_id: String,
    pub execution_id: String,
    pub target: TargetConfig,
    pub scrape_type: String,
    pub scrape_subtype: Option<String>,
    pub credential_ref: String,
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success {
        records: Vec<serde_json::Value>,
        count: i64,
    },
    Failure {
        message: String,
    },
    TimedOut,
    Canceled,
}

/// Seam between the engine and the actual scraping process, so the dispatch
/// and retry machinery can be exercised without spawning anything.
#[async_trait]
pub trait TargetRunner: Send + Sync {
    async fn run(&self, spec: &AttemptSpec) -> Result<AttemptOutcome>;
}

/// Production runner: launches the configured scraper script per attempt.
pub struct ProcessRunner {
    command: String,
    script: String,
}

impl ProcessRunner {
    pub fn new(command: &str, script: &str) -> Self {
        Self {
            command: command.to_string(),
            script: script.to_string(),
        }
    }
}

enum Fate {
    Exited(std::process::ExitStatus),
    TimedOut,
    Canceled,
}

#[async_trait]
impl TargetRunner for ProcessRunner {
    async fn run(&self, spec: &AttemptSpec) -> Result<AttemptOutcome> {
        if spec.cancel.is_cancelled() {
            return Ok(AttemptOutcome::Canceled);
        }

        let mut cmd = Command::new(&self.command);
        cmd.arg(&self.script)
            .arg("--tribunal")
            .arg(&spec.target.code)
            .arg("--grau")
            .arg(spec.target.degree.to_string())
            .arg("--type")
            .arg(&spec.scrape_type);
        if let Some(subtype) = &spec.scrape_subtype {
            cmd.arg("--subtype").arg(subtype);
        }
        cmd.env("JUSCRON_CREDENTIAL_REF", &spec.credential_ref)
            .env("JUSCRON_JOB_ID", &spec.job_id)
            .env("JUSCRON_EXECUTION_ID", &spec.execution_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        debug!(
            "Spawned scraper for {}:{} (execution {})",
            spec.target.code, spec.target.degree, spec.execution_id
        );

        // Drain pipes concurrently so a chatty scraper never deadlocks on a
        // full pipe while we wait for it.
        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let fate = tokio::select! {
            status = child.wait() => Fate::Exited(status?),
            _ = tokio::time::sleep(spec.timeout) => Fate::TimedOut,
            _ = spec.cancel.cancelled() => Fate::Canceled,
        };

        if !matches!(fate, Fate::Exited(_)) {
            terminate(&mut child, spec.kill_grace).await;
        }

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).to_string();

        match fate {
            Fate::TimedOut => Ok(AttemptOutcome::TimedOut),
            Fate::Canceled => Ok(AttemptOutcome::Canceled),
            Fate::Exited(status) if status.success() => match parse_output(&stdout) {
                Some((records, count)) => Ok(AttemptOutcome::Success { records, count }),
                None => Ok(AttemptOutcome::Failure {
                    message: format!(
                        "Scraper exited cleanly but produced unparseable output: {}",
                        tail(&stdout, 400)
                    ),
                }),
            },
            Fate::Exited(status) => {
                let detail = if stderr.trim().is_empty() {
                    tail(&stdout, 400)
                } else {
                    tail(&stderr, 400)
                };
                Ok(AttemptOutcome::Failure {
                    message: format!("Scraper exited with {}: {}", status, detail),
                })
            }
        }
    }
}

fn drain(
    pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
) -> tokio::task::JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Graceful stop: SIGTERM, then a forced kill once the grace expires. Always
/// reaps the child.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        // kill() waits, so the child is reaped on this path too.
        let _ = child.kill().await;
    }
}

/// Scrapers emit a JSON object `{"records": [...], "count": n}` (or a bare
/// array) on stdout.
fn parse_output(stdout: &str) -> Option<(Vec<serde_json::Value>, i64)> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).ok()?;
    match value {
        serde_json::Value::Array(records) => {
            let count = records.len() as i64;
            Some((records, count))
        }
        serde_json::Value::Object(mut map) => {
            let records = match map.remove("records") {
                Some(serde_json::Value::Array(records)) => records,
                _ => return None,
            };
            let count = map
                .get("count")
                .and_then(|c| c.as_i64())
                .unwrap_or(records.len() as i64);
            Some((records, count))
        }
        _ => None,
    }
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        trimmed.to_string()
    } else {
        let start = trimmed.len() - max;
        // Snap to a char boundary.
        let start = (start..trimmed.len())
            .find(|i| trimmed.is_char_boundary(*i))
            .unwrap_or(start);
        format!("...{}", &trimmed[start..])
    }
}
