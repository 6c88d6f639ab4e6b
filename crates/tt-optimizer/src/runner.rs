//! Execution of the external build, run and analysis steps.
//!
//! Each call drives a `tokio::process` child on a current-thread runtime, so
//! callers stay blocking while timeouts can abandon the pipes and kill the
//! whole process group.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// An external command as written in the harness config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the process group after this many seconds. No limit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured output of one child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// `None` when the process could not be spawned, was killed by a signal
    /// or timed out.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr, or the reason nothing was captured.
    pub output: String,
    pub timed_out: bool,
}

impl ProcessResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn not_started(command: &CommandSpec, err: io::Error) -> Self {
        warn!("Could not start `{}`: {}", command.display(), err);
        Self {
            exit_code: None,
            output: format!("failed to start `{}`: {err}", command.display()),
            timed_out: false,
        }
    }

    fn finished(command: &CommandSpec, output: io::Result<Output>) -> Self {
        match output {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Self {
                    exit_code: output.status.code(),
                    output: text,
                    timed_out: false,
                }
            }
            Err(err) => Self {
                exit_code: None,
                output: format!("failed waiting for `{}`: {err}", command.display()),
                timed_out: false,
            },
        }
    }
}

/// Run `command` in `working_dir` with `extra_args` appended and wait for it.
///
/// Never returns an error: spawn failures and timeouts come back as failed
/// results. Must not be called from inside an async runtime.
pub fn execute(command: &CommandSpec, working_dir: &Path, extra_args: &[&OsStr]) -> ProcessResult {
    debug!("Running `{}` in {}", command.display(), working_dir.display());

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => return ProcessResult::not_started(command, err),
    };
    runtime.block_on(execute_async(command, working_dir, extra_args))
}

async fn execute_async(
    command: &CommandSpec,
    working_dir: &Path,
    extra_args: &[&OsStr],
) -> ProcessResult {
    let mut std_command = std::process::Command::new(&command.program);
    std_command
        .args(&command.args)
        .args(extra_args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_command.process_group(0);
    }
    let mut process = Command::from(std_command);
    process.kill_on_drop(true);

    let child = match process.spawn() {
        Ok(child) => child,
        Err(err) => return ProcessResult::not_started(command, err),
    };
    let pid = child.id();

    let Some(limit) = command.timeout_secs.map(Duration::from_secs) else {
        return ProcessResult::finished(command, child.wait_with_output().await);
    };

    match timeout(limit, child.wait_with_output()).await {
        Ok(output) => ProcessResult::finished(command, output),
        Err(_) => {
            warn!(
                "`{}` exceeded {}s and was killed",
                command.display(),
                limit.as_secs()
            );
            if let Some(pid) = pid {
                kill_group(pid).await;
            }
            ProcessResult {
                exit_code: None,
                output: format!(
                    "`{}` timed out after {}s",
                    command.display(),
                    limit.as_secs()
                ),
                timed_out: true,
            }
        }
    }
}

/// SIGKILL every process in the group led by `pid`. The direct child is
/// also killed on drop; this reaches whatever it forked.
#[cfg(unix)]
async fn kill_group(pid: u32) {
    let status = Command::new("kill")
        .arg("-s")
        .arg("KILL")
        .arg("--")
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(err) = status {
        debug!("Could not signal process group {}: {}", pid, err);
    }
}

#[cfg(not(unix))]
async fn kill_group(_pid: u32) {}

/// The build and run steps of a trial.
pub trait TrialExecutor {
    fn build(&mut self) -> ProcessResult;
    fn run(&mut self) -> ProcessResult;
}

/// Runs the configured build and run commands in one fixed working directory.
#[derive(Debug, Clone)]
pub struct TrialRunner {
    working_dir: PathBuf,
    build: CommandSpec,
    run: CommandSpec,
}

impl TrialRunner {
    pub fn new(working_dir: impl Into<PathBuf>, build: CommandSpec, run: CommandSpec) -> Self {
        Self {
            working_dir: working_dir.into(),
            build,
            run,
        }
    }
}

impl TrialExecutor for TrialRunner {
    fn build(&mut self) -> ProcessResult {
        execute(&self.build, &self.working_dir, &[])
    }

    fn run(&mut self) -> ProcessResult {
        execute(&self.run, &self.working_dir, &[])
    }
}
