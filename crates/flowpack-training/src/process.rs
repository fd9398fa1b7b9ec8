//! External command execution.

use crate::error::{TrainingError, TrainingResult};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// A command line to run, kept as data so it can be inspected before execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), ..Self::default() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Prefix this command with a wrapper, e.g. `conda run -n env`.
    #[must_use]
    pub fn wrapped_in(self, wrapper: Self) -> Self {
        let mut args = wrapper.args;
        args.push(self.program);
        args.extend(self.args);
        Self { program: wrapper.program, args, cwd: self.cwd, env: self.env }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> TrainingError {
        if e.kind() == std::io::ErrorKind::NotFound {
            TrainingError::Environment(format!("{} not found on PATH", self.program))
        } else {
            TrainingError::Environment(format!("failed to start `{self}`: {e}"))
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// Interleaved stdout and stderr lines, stdout first.
    pub lines: Vec<String>,
}

impl ProcessOutput {
    pub fn ensure_success(self, spec: &CommandSpec) -> TrainingResult<Self> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(TrainingError::Runner(format!("`{spec}` exited with {}", self.status)))
        }
    }
}

async fn forward_lines<R>(reader: R, stream: &'static str) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        info!(target: "flowpack::subprocess", stream, "{line}");
        collected.push(line);
    }
    Ok(collected)
}

/// Run to completion, forwarding every output line to the log as it arrives.
pub async fn run_streaming(spec: &CommandSpec) -> TrainingResult<ProcessOutput> {
    info!(command = %spec, cwd = ?spec.cwd, "Running command");

    let mut child = spec
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TrainingError::Runner("child stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TrainingError::Runner("child stderr was not captured".to_string()))?;

    let (out, err) = tokio::join!(forward_lines(stdout, "stdout"), forward_lines(stderr, "stderr"));
    let status = child.wait().await?;

    let mut lines = out?;
    lines.extend(err?);
    debug!(command = %spec, %status, lines = lines.len(), "Command finished");
    Ok(ProcessOutput { status, lines })
}

/// Run to completion and capture stdout and stderr without logging them.
pub async fn run_captured(spec: &CommandSpec) -> TrainingResult<ProcessOutput> {
    debug!(command = %spec, "Running command");
    let output = spec.command().output().await.map_err(|e| spec.spawn_error(e))?;

    let mut lines: Vec<String> =
        String::from_utf8_lossy(&output.stdout).lines().map(str::to_string).collect();
    lines.extend(String::from_utf8_lossy(&output.stderr).lines().map(str::to_string));
    Ok(ProcessOutput { status: output.status, lines })
}
