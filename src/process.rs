//! Process management for hydra
//!
//! Spawning and signalling primitives used by the supervisor. Both sit behind
//! traits so the supervisor can be driven without touching real processes.

use crate::error::{HydraError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Signals the termination protocol sends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationSignal {
    /// Ask the process to exit (SIGTERM)
    Interrupt,
    /// Kill it outright (SIGKILL)
    Kill,
}

/// Sends signals to arbitrary pids
pub trait Signaller: Send + Sync {
    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<()>;
}

/// Signaller backed by `kill(2)`
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSignaller;

impl Signaller for SystemSignaller {
    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<()> {
        #[cfg(unix)]
        {
            use libc::{SIGKILL, SIGTERM, kill};

            let signo = match signal {
                TerminationSignal::Interrupt => SIGTERM,
                TerminationSignal::Kill => SIGKILL,
            };

            if unsafe { kill(pid as i32, signo) } != 0 {
                let errno = std::io::Error::last_os_error();
                return Err(HydraError::ProcessStop(format!(
                    "Failed to send {:?} to process {} (errno: {})",
                    signal, pid, errno
                )));
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            Err(HydraError::ProcessStop(format!(
                "Cannot send {:?} to process {} on this platform",
                signal, pid
            )))
        }
    }
}

/// Everything needed to launch one service
#[derive(Clone, Debug, PartialEq)]
pub struct SpawnRequest {
    pub shell: String,
    pub command: String,
    pub location: PathBuf,
    /// Complete environment of the new process
    pub env: HashMap<String, String>,
}

/// A byte stream produced by a running process
pub type OutputStream = Pin<Box<dyn AsyncRead + Send>>;

/// A live process owned by the supervisor
#[async_trait]
pub trait RunningProcess: Send {
    fn pid(&self) -> u32;

    /// Send the graceful signal and wait until the process has exited
    async fn interrupt_and_wait(&mut self) -> Result<()>;
}

/// A freshly spawned process with its stdout/stderr streams
pub struct SpawnedProcess {
    pub process: Box<dyn RunningProcess>,
    pub output: Vec<OutputStream>,
}

/// Creates processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess>;
}

/// Runs commands as `<shell> -c <command>`
#[derive(Clone, Copy, Debug, Default)]
pub struct ShellLauncher;

#[async_trait]
impl ProcessLauncher for ShellLauncher {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(&request.shell);
        cmd.arg("-c")
            .arg(&request.command)
            .env_clear()
            .envs(&request.env)
            .current_dir(&request.location)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| HydraError::ProcessStart(request.command.clone(), e.to_string()))?;

        let pid = child.id().ok_or_else(|| {
            HydraError::ProcessStart(request.command.clone(), "exited immediately".to_string())
        })?;

        let mut output: Vec<OutputStream> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            output.push(Box::pin(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            output.push(Box::pin(stderr));
        }

        Ok(SpawnedProcess {
            process: Box::new(ChildProcess { pid, child }),
            output,
        })
    }
}

/// A child spawned by [`ShellLauncher`]
pub struct ChildProcess {
    pid: u32,
    child: Child,
}

#[async_trait]
impl RunningProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn interrupt_and_wait(&mut self) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            // The child may exit between try_wait and the signal
            if let Err(e) = SystemSignaller.signal(self.pid, TerminationSignal::Interrupt) {
                if self.child.try_wait()?.is_none() {
                    return Err(e);
                }
            }
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()?;
        }

        self.child.wait().await?;
        Ok(())
    }
}
