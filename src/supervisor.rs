//! Process supervisor for hydra
//!
//! Starts services in their selected mode and stops them again, taking the
//! whole process tree down with them. Each service has its own slot guarded by
//! an async mutex, so operations on one service run one after another while
//! different services proceed concurrently.

use crate::config::Configuration;
use crate::constants::{DEFAULT_SHELL, GRACE_PERIOD, LOG_PREFIX};
use crate::dependency::DependencyResolver;
use crate::dotenv;
use crate::error::{HydraError, Result};
use crate::process::{
    OutputStream, ProcessLauncher, RunningProcess, ShellLauncher, Signaller, SpawnRequest,
    SystemSignaller, TerminationSignal,
};
use crate::process_tree::{
    ProcessRecord, ProcessTable, SystemProcessTable, descendants_of, is_same_process,
};
use crate::template::{TemplateResolver, value_to_env_string};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

/// Receives `(service, line)` for every line the supervisor produces
pub type LogHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

type HandlerCell = Arc<RwLock<Option<LogHandler>>>;

/// The live process of a running service
struct ProcessHandle {
    pid: u32,
    process: Box<dyn RunningProcess>,
}

type Slot = Arc<Mutex<Option<ProcessHandle>>>;

/// A fully resolved launch of one service
#[derive(Clone, Debug)]
pub struct LaunchPlan {
    /// Selected mode name
    pub mode: String,
    pub request: SpawnRequest,
    /// Variables resolved from `dependencies.env`
    pub injected: BTreeMap<String, String>,
    /// Entries for the `.env` file, when the mode asks for one
    pub dotenv: Option<BTreeMap<String, Value>>,
}

/// Owns the running process of every service in the topology
pub struct ProcessSupervisor {
    config: Arc<Configuration>,
    /// Base environment for templates and spawned processes
    env: HashMap<String, String>,
    launcher: Arc<dyn ProcessLauncher>,
    table: Arc<dyn ProcessTable>,
    signaller: Arc<dyn Signaller>,
    log_handler: HandlerCell,
    slots: HashMap<String, Slot>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    /// Supervisor over real processes, inheriting this process's environment
    pub fn new(config: Arc<Configuration>) -> Self {
        let env = dotenv::base_environment(None).unwrap_or_default();
        let slots = config
            .topology()
            .iter()
            .map(|s| (s.name.clone(), Slot::default()))
            .collect();

        Self {
            config,
            env,
            launcher: Arc::new(ShellLauncher),
            table: Arc::new(SystemProcessTable),
            signaller: Arc::new(SystemSignaller),
            log_handler: HandlerCell::default(),
            slots,
            grace_period: GRACE_PERIOD,
        }
    }

    /// Replace the base environment
    pub fn with_environment(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_signaller(mut self, signaller: Arc<dyn Signaller>) -> Self {
        self.signaller = signaller;
        self
    }

    /// Wait between graceful and forceful signals to descendants
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Install the log sink, replacing any previous one
    pub fn register_log_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let mut cell = self.log_handler.write().unwrap_or_else(|e| e.into_inner());
        *cell = Some(Arc::new(handler));
    }

    /// Start every service of the topology concurrently
    pub async fn start_all(&self) -> Vec<(String, Result<()>)> {
        let names = self.config.service_names();
        let outcomes = join_all(names.iter().map(|name| self.start(name))).await;
        report("start", names, outcomes)
    }

    /// Stop every service of the topology concurrently
    pub async fn stop_all(&self) -> Vec<(String, Result<()>)> {
        let names = self.config.service_names();
        let outcomes = join_all(names.iter().map(|name| self.stop(name))).await;
        report("stop", names, outcomes)
    }

    /// (Re)start a service in its selected mode
    ///
    /// Any previous process is terminated first. An "off" mode leaves the
    /// service stopped.
    pub async fn start(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        let mut handle = slot.lock().await;

        self.terminate(name, &mut handle).await;

        let Some(plan) = self.plan(name)? else {
            tracing::debug!("Service '{}' is off", name);
            return Ok(());
        };

        if let Some(entries) = &plan.dotenv {
            let path = dotenv::write(&plan.request.location, entries)?;
            tracing::debug!("Wrote {} for '{}'", path.display(), name);
        }

        tracing::debug!(
            "Starting '{}' in mode '{}': {}",
            name,
            plan.mode,
            plan.request.command
        );
        let spawned = self.launcher.spawn(plan.request).await?;

        let pid = spawned.process.pid();
        for stream in spawned.output {
            self.forward_output(name, stream);
        }

        *handle = Some(ProcessHandle {
            pid,
            process: spawned.process,
        });
        Ok(())
    }

    /// Resolve how a service would be launched in its selected mode
    ///
    /// `None` for an "off" mode. Nothing is written or spawned.
    pub fn plan(&self, name: &str) -> Result<Option<LaunchPlan>> {
        let mode = self.config.selected_mode(name)?;
        let Some(run) = mode.run.as_ref() else {
            return Ok(None);
        };

        let templates = TemplateResolver::new(&self.env);
        let dependencies = DependencyResolver::new(&self.config, templates);
        let deps = mode.dependencies.clone().unwrap_or_default();

        let injected: BTreeMap<String, String> = dependencies
            .resolve(deps.env.as_ref())?
            .into_iter()
            .map(|(key, value)| (key, value_to_env_string(&value)))
            .collect();
        let dotenv = match deps.dotenv.as_ref() {
            Some(refs) => Some(dependencies.resolve(Some(refs))?),
            None => None,
        };

        let command = templates.resolve_str(&run.command)?;
        let location = PathBuf::from(templates.resolve_str(&run.location)?);
        let shell = match &run.shell {
            Some(shell) => templates.resolve_str(shell)?,
            None => DEFAULT_SHELL.to_string(),
        };

        let mut env = self.env.clone();
        env.extend(injected.clone());

        Ok(Some(LaunchPlan {
            mode: mode.name.clone(),
            request: SpawnRequest {
                shell,
                command,
                location,
                env,
            },
            injected,
            dotenv,
        }))
    }

    /// Stop a service and reap its process tree; a no-op if it is not running
    pub async fn stop(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        let mut handle = slot.lock().await;
        self.terminate(name, &mut handle).await;
        Ok(())
    }

    /// Whether the service currently owns a process
    pub async fn is_running(&self, name: &str) -> bool {
        match self.slots.get(name) {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Running services with their primary pid, in topology order
    pub async fn running_services(&self) -> Vec<(String, u32)> {
        let mut running = Vec::new();
        for name in self.config.service_names() {
            if let Some(slot) = self.slots.get(&name) {
                if let Some(handle) = slot.lock().await.as_ref() {
                    running.push((name, handle.pid));
                }
            }
        }
        running
    }

    fn slot(&self, name: &str) -> Result<Slot> {
        self.slots
            .get(name)
            .cloned()
            .ok_or_else(|| HydraError::ServiceNotFound(name.to_string()))
    }

    /// Terminate the process in `slot` along with everything it spawned
    ///
    /// Best effort: failures are logged and never interrupt the protocol.
    async fn terminate(&self, name: &str, slot: &mut Option<ProcessHandle>) {
        let Some(mut handle) = slot.take() else {
            return;
        };

        self.status(name, "Terminating");

        // Capture the tree before signalling; the primary's children get
        // reparented as soon as it exits
        let tree = match self.table.snapshot(None).await {
            Ok(table) => descendants_of(handle.pid, &table),
            Err(e) => {
                tracing::warn!("Could not read process table for '{}': {}", name, e);
                Vec::new()
            }
        };

        if let Err(e) = handle.process.interrupt_and_wait().await {
            tracing::warn!("Failed to stop '{}' (PID {}): {}", name, handle.pid, e);
        }

        let reaps = tree
            .into_iter()
            .filter(|child| child.pid != handle.pid)
            .map(|child| self.reap(name, child));
        join_all(reaps).await;

        self.status(name, "Terminated");
    }

    /// Interrupt a leftover descendant, then kill it if it outlives the grace period
    async fn reap(&self, name: &str, child: ProcessRecord) {
        if !self.still_alive(&child).await {
            return;
        }

        if let Err(e) = self.signaller.signal(child.pid, TerminationSignal::Interrupt) {
            tracing::debug!("Interrupt of PID {} failed: {}", child.pid, e);
        }

        tokio::time::sleep(self.grace_period).await;

        if !self.still_alive(&child).await {
            return;
        }

        match self.signaller.signal(child.pid, TerminationSignal::Kill) {
            Ok(()) => self.status(
                name,
                &format!("Reaped rogue process: [{}] {}", child.pid, child.command),
            ),
            Err(e) => tracing::warn!(
                "Failed to kill leftover process {} of '{}': {}",
                child.pid,
                name,
                e
            ),
        }
    }

    /// Same pid and command line as when the tree was captured
    async fn still_alive(&self, record: &ProcessRecord) -> bool {
        match self.table.snapshot(Some(&[record.pid])).await {
            Ok(table) => is_same_process(record, &table),
            Err(e) => {
                tracing::debug!("Could not look up PID {}: {}", record.pid, e);
                false
            }
        }
    }

    fn forward_output(&self, name: &str, stream: OutputStream) {
        let handler = Arc::clone(&self.log_handler);
        let name = name.to_string();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        emit(&handler, &name, line.trim_end());
                    }
                    Err(e) => {
                        tracing::debug!("Output of '{}' closed: {}", name, e);
                        break;
                    }
                }
            }
        });
    }

    fn status(&self, name: &str, message: &str) {
        emit(&self.log_handler, name, &format!("{}{}", LOG_PREFIX, message));
    }
}

fn emit(handler: &HandlerCell, service: &str, line: &str) {
    let current = handler.read().unwrap_or_else(|e| e.into_inner()).clone();
    match current {
        Some(handler) => handler(service, line),
        None => tracing::info!(service = service, "{}", line),
    }
}

fn report(
    action: &str,
    names: Vec<String>,
    outcomes: Vec<Result<()>>,
) -> Vec<(String, Result<()>)> {
    names
        .into_iter()
        .zip(outcomes)
        .inspect(|(name, outcome)| {
            if let Err(e) = outcome {
                tracing::warn!("Failed to {} '{}': {}", action, name, e);
            }
        })
        .collect()
}
