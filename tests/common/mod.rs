//! Fake process world shared by the supervisor tests

#![allow(dead_code)]

use async_trait::async_trait;
use hydra::process::{
    OutputStream, ProcessLauncher, RunningProcess, Signaller, SpawnRequest, SpawnedProcess,
    TerminationSignal,
};
use hydra::process_tree::{ProcessRecord, ProcessTable};
use hydra::{Configuration, HydraError, ProcessSupervisor, Result, ServiceDefinition};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything observable that happened to the fake world
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Spawn(String),
    WaitPrimary(u32),
    Signal(u32, TerminationSignal),
}

#[derive(Default)]
pub struct World {
    next_pid: Mutex<u32>,
    alive: Mutex<Vec<ProcessRecord>>,
    /// Ignore the graceful signal
    stubborn: Mutex<HashSet<u32>>,
    /// Records that take over a pid once the primary exits
    reused: Mutex<Vec<ProcessRecord>>,
    /// Fail spawning of these commands
    failing: Mutex<HashSet<String>>,
    /// Output each command writes, keyed by command
    output: Mutex<HashMap<String, String>>,
    pub events: Mutex<Vec<Event>>,
    pub requests: Mutex<Vec<SpawnRequest>>,
}

impl World {
    pub fn new() -> Arc<Self> {
        let world = Self::default();
        *world.next_pid.lock().unwrap() = 1000;
        Arc::new(world)
    }

    pub fn add_process(&self, pid: u32, parent_pid: u32, command: &str) {
        self.alive.lock().unwrap().push(ProcessRecord {
            pid,
            parent_pid,
            command: command.to_string(),
        });
    }

    pub fn make_stubborn(&self, pid: u32) {
        self.stubborn.lock().unwrap().insert(pid);
    }

    pub fn reuse_pid_after_primary_exit(&self, pid: u32, command: &str) {
        self.reused.lock().unwrap().push(ProcessRecord {
            pid,
            parent_pid: 1,
            command: command.to_string(),
        });
    }

    pub fn fail_spawn(&self, command: &str) {
        self.failing.lock().unwrap().insert(command.to_string());
    }

    pub fn set_output(&self, command: &str, output: &str) {
        self.output
            .lock()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().iter().any(|r| r.pid == pid)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<(u32, TerminationSignal)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Signal(pid, signal) => Some((pid, signal)),
                _ => None,
            })
            .collect()
    }

    pub fn spawn_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> SpawnRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn remove(&self, pid: u32) {
        self.alive.lock().unwrap().retain(|r| r.pid != pid);
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct FakeTable(pub Arc<World>);

#[async_trait]
impl ProcessTable for FakeTable {
    async fn snapshot(&self, filter: Option<&[u32]>) -> Result<Vec<ProcessRecord>> {
        let alive = self.0.alive.lock().unwrap().clone();
        Ok(match filter {
            Some(pids) => alive.into_iter().filter(|r| pids.contains(&r.pid)).collect(),
            None => alive,
        })
    }
}

pub struct FakeSignaller(pub Arc<World>);

impl Signaller for FakeSignaller {
    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<()> {
        let world = &self.0;
        world.record(Event::Signal(pid, signal));

        if !world.is_alive(pid) {
            return Err(HydraError::ProcessStop(format!("no process {}", pid)));
        }
        let stubborn = world.stubborn.lock().unwrap().contains(&pid);
        if signal == TerminationSignal::Kill || !stubborn {
            world.remove(pid);
        }
        Ok(())
    }
}

pub struct FakeLauncher(pub Arc<World>);

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, request: SpawnRequest) -> Result<SpawnedProcess> {
        let world = &self.0;
        if world.failing.lock().unwrap().contains(&request.command) {
            return Err(HydraError::ProcessStart(
                request.command.clone(),
                "No such file or directory".to_string(),
            ));
        }

        let pid = {
            let mut next = world.next_pid.lock().unwrap();
            *next += 1;
            *next
        };
        world.add_process(pid, 1, &format!("{} -c {}", request.shell, request.command));
        world.record(Event::Spawn(request.command.clone()));

        let text = world
            .output
            .lock()
            .unwrap()
            .get(&request.command)
            .cloned()
            .unwrap_or_default();
        world.requests.lock().unwrap().push(request);

        let output: Vec<OutputStream> = vec![Box::pin(Cursor::new(text.into_bytes()))];
        Ok(SpawnedProcess {
            process: Box::new(FakeProcess {
                pid,
                world: Arc::clone(world),
            }),
            output,
        })
    }
}

pub struct FakeProcess {
    pid: u32,
    world: Arc<World>,
}

#[async_trait]
impl RunningProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn interrupt_and_wait(&mut self) -> Result<()> {
        self.world.record(Event::WaitPrimary(self.pid));
        self.world.remove(self.pid);

        let reused: Vec<ProcessRecord> = self.world.reused.lock().unwrap().drain(..).collect();
        for record in reused {
            self.world.remove(record.pid);
            self.world.alive.lock().unwrap().push(record);
        }
        Ok(())
    }
}

/// Collected `(service, line)` pairs
pub type Lines = Arc<Mutex<Vec<(String, String)>>>;

pub fn topology(json: serde_json::Value) -> Arc<Configuration> {
    let services: Vec<ServiceDefinition> = serde_json::from_value(json).unwrap();
    Arc::new(Configuration::from_topology(services).unwrap())
}

pub fn supervisor(
    config: Arc<Configuration>,
    world: &Arc<World>,
    env: &[(&str, &str)],
) -> (ProcessSupervisor, Lines) {
    let env = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let supervisor = ProcessSupervisor::new(config)
        .with_environment(env)
        .with_launcher(Arc::new(FakeLauncher(Arc::clone(world))))
        .with_process_table(Arc::new(FakeTable(Arc::clone(world))))
        .with_signaller(Arc::new(FakeSignaller(Arc::clone(world))))
        .with_grace_period(Duration::from_millis(20));

    let lines = Lines::default();
    let sink = Arc::clone(&lines);
    supervisor.register_log_handler(move |service, line| {
        sink.lock()
            .unwrap()
            .push((service.to_string(), line.to_string()));
    });

    (supervisor, lines)
}

pub fn lines_of(lines: &Lines, service: &str) -> Vec<String> {
    lines
        .lock()
        .unwrap()
        .iter()
        .filter(|(s, _)| s == service)
        .map(|(_, l)| l.clone())
        .collect()
}

/// Poll until `condition` holds or a second has passed
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
