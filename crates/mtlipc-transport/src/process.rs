use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::pipes::{PipeWriter, ProcessOutput};

/// How to start the remote controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory. Inherited when unset.
    pub current_dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Forward the remote's stderr to ours instead of discarding it.
    pub inherit_stderr: bool,
}

impl ProcessConfig {
    /// Create a configuration for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The program and its arguments as a single display string.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            inherit_stderr: true,
        }
    }
}

/// Sole owner of the remote controller process and its input pipe.
///
/// No other component signals the process or touches its stdin directly;
/// stdout is handed out once at spawn time as a [`ProcessOutput`].
pub struct ProcessSupervisor {
    label: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    exit_status: Mutex<Option<ExitStatus>>,
    stdin: tokio::sync::Mutex<Option<PipeWriter>>,
}

impl ProcessSupervisor {
    /// Spawn the remote controller with piped stdin/stdout.
    ///
    /// Must be called from within a tokio runtime. A spawn failure is fatal
    /// for the session and is never retried.
    pub fn spawn(config: &ProcessConfig) -> Result<(Self, ProcessOutput)> {
        let program = config.program.display().to_string();

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if config.inherit_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("child stdin was not captured"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            program: program.clone(),
            source: std::io::Error::other("child stdout was not captured"),
        })?;

        let pid = child.id();
        info!(command = %config.command_line(), pid, "spawned remote controller");

        let supervisor = Self {
            label: program,
            pid,
            child: Mutex::new(Some(child)),
            exit_status: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(Some(Box::pin(stdin))),
        };
        Ok((supervisor, ProcessOutput::new(stdout)))
    }

    /// Build a supervisor over an existing input pipe, without a process.
    pub fn from_pipes(writer: impl AsyncWrite + Send + 'static) -> Self {
        Self {
            label: "<pipes>".to_string(),
            pid: None,
            child: Mutex::new(None),
            exit_status: Mutex::new(None),
            stdin: tokio::sync::Mutex::new(Some(Box::pin(writer))),
        }
    }

    /// OS process id, if a process was spawned.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Program name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write and flush bytes to the remote's stdin.
    ///
    /// Concurrent writers are serialized so frames never interleave.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(bytes).await.map_err(TransportError::Write)?;
        stdin.flush().await.map_err(TransportError::Write)?;
        trace!(len = bytes.len(), "wrote to remote stdin");
        Ok(())
    }

    /// Exit status of the remote, if it has exited.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        let mut stored = self
            .exit_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if stored.is_none() {
            let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = child.as_mut() {
                *stored = child.try_wait().ok().flatten();
            }
        }
        *stored
    }

    /// Forcibly end the remote and close its input.
    ///
    /// Idempotent: calling it again, or after the process exited on its own,
    /// is a no-op.
    pub async fn terminate(&self) -> Result<()> {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let killed = match child {
            Some(child) => self.kill(child).await,
            None => Ok(()),
        };

        // The process is gone, so a blocked writer has already been released.
        if self.stdin.lock().await.take().is_some() {
            debug!(remote = %self.label, "closed remote stdin");
        }

        killed
    }

    async fn kill(&self, mut child: Child) -> Result<()> {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "remote controller already exited");
                self.record_exit(status);
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => warn!(pid = self.pid, error = %err, "failed polling remote controller"),
        }

        match child.kill().await {
            Ok(()) => {
                info!(pid = self.pid, "terminated remote controller");
                if let Ok(Some(status)) = child.try_wait() {
                    self.record_exit(status);
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn record_exit(&self, status: ExitStatus) {
        *self
            .exit_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[test]
    fn command_line_joins_args() {
        let config = ProcessConfig::new("python").args(["-m", "mtldbg", "-i"]);
        assert_eq!(config.command_line(), "python -m mtldbg -i");
        assert!(config.inherit_stderr);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ProcessConfig =
            serde_json::from_str(r#"{"program":"python","args":["-m","mtldbg"]}"#).unwrap();
        assert_eq!(config.program, PathBuf::from("python"));
        assert_eq!(config.args, vec!["-m", "mtldbg"]);
        assert!(config.env.is_empty());
        assert!(config.current_dir.is_none());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let config = ProcessConfig::new("/definitely/not/a/real/mtldbg-binary");
        let err = ProcessSupervisor::spawn(&config).unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
        assert!(!err.is_disconnect());
    }

    #[tokio::test]
    async fn write_reaches_pipe_reader() {
        let (local, mut remote) = tokio::io::duplex(64);
        let supervisor = ProcessSupervisor::from_pipes(local);

        supervisor.write(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn write_after_terminate_fails() {
        let (local, _remote) = tokio::io::duplex(64);
        let supervisor = ProcessSupervisor::from_pipes(local);

        supervisor.terminate().await.unwrap();
        supervisor.terminate().await.unwrap();

        let err = supervisor.write(b"late").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn write_to_dropped_reader_is_write_failure() {
        let (local, remote) = tokio::io::duplex(64);
        let supervisor = ProcessSupervisor::from_pipes(local);
        drop(remote);

        let err = supervisor.write(b"nobody home").await.unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_running_process() {
        let config = ProcessConfig::new("sleep").args(["30"]);
        let (supervisor, _output) = ProcessSupervisor::spawn(&config).unwrap();
        assert!(supervisor.id().is_some());
        assert!(supervisor.exit_status().is_none());

        supervisor.terminate().await.unwrap();
        assert!(supervisor.exit_status().is_some());
        supervisor.terminate().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_of_spawned_process_is_readable() {
        let config = ProcessConfig::new("cat");
        let (supervisor, mut output) = ProcessSupervisor::spawn(&config).unwrap();

        supervisor.write(b"echoed").await.unwrap();
        let mut buf = [0u8; 6];
        output.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echoed");

        supervisor.terminate().await.unwrap();
    }
}
