//! Subprocess execution - runs step commands and launches detached services

use crate::core::step::write_command_line;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Error types for process operations
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// A fully resolved command: rendered, with directory and environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Overrides on top of the inherited environment
    pub env: HashMap<String, String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_command_line(f, &self.program, &self.args)
    }
}

impl Invocation {
    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives output lines as a command produces them
pub trait OutputSink: Send + Sync {
    fn on_line(&self, stream: OutputStream, line: &str);
}

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub success: bool,
    /// Stdout and stderr lines in arrival order
    pub output: String,
}

/// Exit information for a service that stopped on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceExit {
    pub code: Option<i32>,
}

/// A launched long-running process
#[async_trait]
pub trait ServiceHandle: Send {
    /// OS process ID, if known
    fn pid(&self) -> Option<u32>;

    /// `Some` once the process has exited by itself
    fn exited(&mut self) -> Option<ServiceExit>;

    /// Terminate the process and wait for it
    async fn stop(&mut self) -> Result<(), ProcessError>;
}

/// Trait for process launching - allows for different implementations
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run a command to completion, streaming its lines to `sink`
    async fn run(
        &self,
        invocation: &Invocation,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError>;

    /// Start a process without waiting for it
    async fn spawn_service(
        &self,
        invocation: &Invocation,
    ) -> Result<Box<dyn ServiceHandle>, ProcessError>;
}

/// Launcher backed by real OS processes
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    /// How long `stop` waits for a killed service to be reaped
    stop_grace: Duration,
    /// How long to keep reading output after a command has exited
    output_drain: Duration,
}

impl Default for SubprocessLauncher {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(5),
            output_drain: Duration::from_millis(250),
        }
    }
}

impl SubprocessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

fn push_line(output: &mut String, sink: Option<&dyn OutputSink>, stream: OutputStream, line: &str) {
    if let Some(sink) = sink {
        sink.on_line(stream, line);
    }
    output.push_str(line);
    output.push('\n');
}

#[async_trait]
impl ProcessLauncher for SubprocessLauncher {
    async fn run(
        &self,
        invocation: &Invocation,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, ProcessError> {
        debug!("Spawning {} in {}", invocation, invocation.working_dir.display());

        let mut child = invocation.command().spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx.clone())));
        }
        drop(tx);

        let mut output = String::new();

        // The exit status ends the command, not EOF: a background descendant
        // may keep the pipes open long after the process itself is gone
        let status = loop {
            tokio::select! {
                biased;
                Some((stream, line)) = rx.recv() => push_line(&mut output, sink, stream, &line),
                status = child.wait() => {
                    break status.map_err(|source| ProcessError::Io {
                        program: invocation.program.clone(),
                        source,
                    })?;
                }
            }
        };

        let deadline = Instant::now() + self.output_drain;
        while let Ok(Some((stream, line))) = timeout_at(deadline, rx.recv()).await {
            push_line(&mut output, sink, stream, &line);
        }
        for reader in readers {
            reader.abort();
        }

        debug!("{} exited with {:?}", invocation.program, status.code());

        Ok(CommandOutput {
            code: status.code(),
            success: status.success(),
            output,
        })
    }

    async fn spawn_service(
        &self,
        invocation: &Invocation,
    ) -> Result<Box<dyn ServiceHandle>, ProcessError> {
        debug!("Launching service {} in {}", invocation, invocation.working_dir.display());

        let mut child = invocation.command().spawn().map_err(|source| ProcessError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        // Drain the pipes so a chatty service never blocks on a full buffer
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputStream::Stderr, tx));
        }
        let program = invocation.program.clone();
        tokio::spawn(async move {
            while let Some((_, line)) = rx.recv().await {
                debug!(target: "service", "[{}] {}", program, line);
            }
        });

        Ok(Box::new(ChildService {
            child,
            program: invocation.program.clone(),
            stop_grace: self.stop_grace,
        }))
    }
}

/// A service running as a child process; killed when dropped
struct ChildService {
    child: Child,
    program: String,
    stop_grace: Duration,
}

#[async_trait]
impl ServiceHandle for ChildService {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn exited(&mut self) -> Option<ServiceExit> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(ServiceExit { code: status.code() }),
            Ok(None) => None,
            Err(e) => {
                warn!("Could not poll {}: {}", self.program, e);
                None
            }
        }
    }

    async fn stop(&mut self) -> Result<(), ProcessError> {
        if self.exited().is_some() {
            return Ok(());
        }

        debug!("Stopping service {} (pid {:?})", self.program, self.child.id());
        self.child.start_kill().map_err(|source| ProcessError::Io {
            program: self.program.clone(),
            source,
        })?;

        match tokio::time::timeout(self.stop_grace, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(source)) => Err(ProcessError::Io {
                program: self.program.clone(),
                source,
            }),
            Err(_) => {
                warn!(
                    "{} did not exit within {}s of being killed",
                    self.program,
                    self.stop_grace.as_secs()
                );
                Ok(())
            }
        }
    }
}
