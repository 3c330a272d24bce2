//! Execution layer for the `llm` collaborator: run allowlisted subcommands only.
//! No shell is used; arguments are passed as a list to avoid injection.
//!
//! Two modes: [`CommandRunner::run`] waits for completion and returns stdout,
//! [`CommandRunner::stream`] relays stdout chunk by chunk as it is produced.

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Read size for relayed stdout chunks.
const CHUNK_SIZE: usize = 4096;

/// Ordered text increments from a running process. Dropping it kills the process.
pub type TextStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("subcommand not allowlisted: {0}")]
    NotAllowed(String),
    #[error("failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("exit {status}: {message}")]
    Failed { status: String, message: String },
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// The collaborator's own error text (stderr) when it ran and failed; otherwise the error display.
    pub fn detail(&self) -> String {
        match self {
            ExecError::Failed { message, .. } => message.trim().to_string(),
            other => other.to_string(),
        }
    }
}

/// Captured result of a completed process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one binary, restricted to an allowlist of first arguments (subcommands).
/// Usage text is fetched through [`CommandRunner::help`], which accepts bare words only.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    binary: PathBuf,
    allowed: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            allowed: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Allow the given subcommands (e.g. "prompt", "logs").
    pub fn allow(mut self, subcommands: &[&str]) -> Self {
        self.allowed
            .extend(subcommands.iter().map(|s| s.to_string()));
        self
    }

    /// Extra environment for every invocation.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn check_allowed(&self, sub: &str) -> Result<(), ExecError> {
        if self.allowed.iter().any(|s| s == sub) {
            Ok(())
        } else {
            Err(ExecError::NotAllowed(sub.to_string()))
        }
    }

    fn command(&self, args: &[String]) -> Result<Command, ExecError> {
        self.check_allowed(args.first().map(String::as_str).unwrap_or(""))?;
        Ok(self.build(args))
    }

    fn build(&self, args: &[String]) -> Command {
        log::debug!("exec: {} {:?}", self.binary.display(), args);
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ExecError {
        ExecError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        }
    }

    /// Run to completion regardless of exit status.
    pub async fn output(&self, args: &[String]) -> Result<CommandOutput, ExecError> {
        let output = self
            .command(args)?
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Usage text for a command path (`[]` for the top level, `["logs", "list"]`, ...).
    ///
    /// Every word must be a plain command name so nothing can consume the trailing
    /// `--help` as an option value, and a non-empty path must start with an allowlisted subcommand.
    pub async fn help(&self, path: &[String]) -> Result<CommandOutput, ExecError> {
        if let Some(word) = path
            .iter()
            .find(|w| w.is_empty() || w.starts_with('-'))
        {
            return Err(ExecError::InvalidArgs(format!("not a command name: {:?}", word)));
        }
        if let Some(sub) = path.first() {
            self.check_allowed(sub)?;
        }
        let mut argv = path.to_vec();
        argv.push("--help".to_string());
        let output = self
            .build(&argv)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run to completion. Returns stdout; on failure stderr (and any stdout) is included in the error.
    pub async fn run(&self, args: &[String]) -> Result<String, ExecError> {
        let output = self
            .command(args)?
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        log::warn!("exec failed: {} {:?}: {}", self.binary.display(), args, stderr.trim());
        Err(ExecError::Failed {
            status: output.status.to_string(),
            message: failure_message(stdout, &stderr),
        })
    }

    /// Spawn and relay stdout incrementally. `input`, when given, is written to stdin followed by a newline.
    ///
    /// Resolves once the first chunk is available or the process has exited, so a process that fails
    /// before printing anything is reported as `Err(ExecError::Failed)`. A failure after output has
    /// started is appended to the stream as `\nError: <stderr>`.
    pub async fn stream(
        &self,
        args: &[String],
        input: Option<String>,
    ) -> Result<TextStream, ExecError> {
        let mut cmd = self.command(args)?;
        if input.is_some() {
            cmd.stdin(Stdio::piped());
        }
        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            tokio::spawn(async move {
                let mut payload = text.into_bytes();
                payload.push(b'\n');
                if let Err(e) = stdin.write_all(&payload).await {
                    log::debug!("exec: writing stdin failed: {}", e);
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::InvalidArgs("stdout not captured".to_string()))?;

        let mut relay = Relay {
            child,
            stdout,
            stderr_task,
        };
        let first = match relay.next_chunk().await? {
            Some(chunk) => chunk,
            None => {
                let (status, stderr) = relay.finish().await?;
                if status.success() {
                    return Ok(Box::pin(stream::empty::<Bytes>()));
                }
                log::warn!("exec failed before output: {} {:?}: {}", self.binary.display(), args, stderr.trim());
                return Err(ExecError::Failed {
                    status: status.to_string(),
                    message: stderr,
                });
            }
        };

        let rest = stream::unfold(Some(relay), |relay| async move {
            let mut relay = relay?;
            match relay.next_chunk().await {
                Ok(Some(chunk)) => Some((chunk, Some(relay))),
                Ok(None) => match relay.finish().await {
                    Ok((status, _)) if status.success() => None,
                    Ok((_, stderr)) => Some((Bytes::from(format!("\nError: {}", stderr)), None)),
                    Err(e) => Some((Bytes::from(format!("\nError: {}", e)), None)),
                },
                Err(e) => {
                    log::warn!("exec: reading stdout failed: {}", e);
                    Some((Bytes::from(format!("\nError: {}", e)), None))
                }
            }
        });
        Ok(Box::pin(stream::once(async move { first }).chain(rest)))
    }
}

/// A spawned process whose stdout is being relayed.
struct Relay {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
}

impl Relay {
    async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = self.stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }

    async fn finish(mut self) -> std::io::Result<(std::process::ExitStatus, String)> {
        let status = self.child.wait().await?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        Ok((status, stderr))
    }
}

fn failure_message(stdout: String, stderr: &str) -> String {
    let mut msg = stdout;
    if !stderr.is_empty() {
        if !msg.is_empty() {
            msg.push('\n');
        }
        msg.push_str(stderr);
    }
    msg
}

/// Build the runner for the `llm` CLI: models, templates, tools, prompt, chat, logs only.
pub fn llm_runner(binary: impl Into<PathBuf>) -> CommandRunner {
    CommandRunner::new(binary).allow(&["models", "templates", "tools", "prompt", "chat", "logs"])
}

/// Split a raw argument string the way a POSIX shell would tokenize it (quotes and backslashes),
/// without any expansion. Unbalanced quotes are an error.
pub fn split_args(raw: &str) -> Result<Vec<String>, ExecError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(ExecError::InvalidArgs("unterminated single quote".to_string())),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(ExecError::InvalidArgs("unterminated double quote".to_string())),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(ExecError::InvalidArgs("unterminated double quote".to_string())),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err(ExecError::InvalidArgs("trailing backslash".to_string())),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
