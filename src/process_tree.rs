//! Process table inspection
//!
//! Snapshots the OS process table and walks parent/child links so that a
//! service's whole process tree can be captured before it is terminated.

use crate::error::{HydraError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// One row of a process table snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: u32,
    pub command: String,
}

/// Source of process table snapshots
#[async_trait]
pub trait ProcessTable: Send + Sync {
    /// All processes, or only those whose pid is in `filter`
    async fn snapshot(&self, filter: Option<&[u32]>) -> Result<Vec<ProcessRecord>>;
}

/// The host's process table
///
/// - **Linux**: reads `/proc/{pid}/stat` and `/proc/{pid}/cmdline`
/// - **Other unix**: runs `ps -A -o pid=,ppid=,command=`
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProcessTable;

#[async_trait]
impl ProcessTable for SystemProcessTable {
    async fn snapshot(&self, filter: Option<&[u32]>) -> Result<Vec<ProcessRecord>> {
        #[cfg(target_os = "linux")]
        let records = read_procfs(filter).await?;

        #[cfg(not(target_os = "linux"))]
        let records = read_ps().await?;

        Ok(match filter {
            Some(pids) => records
                .into_iter()
                .filter(|r| pids.contains(&r.pid))
                .collect(),
            None => records,
        })
    }
}

#[cfg(target_os = "linux")]
async fn read_procfs(filter: Option<&[u32]>) -> Result<Vec<ProcessRecord>> {
    let pids: Vec<u32> = match filter {
        Some(pids) => pids.to_vec(),
        None => {
            let mut pids = Vec::new();
            let mut entries = tokio::fs::read_dir("/proc")
                .await
                .map_err(|e| HydraError::ProcessTable(format!("could not list /proc: {}", e)))?;
            while let Some(entry) = entries.next_entry().await? {
                if let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                    pids.push(pid);
                }
            }
            pids
        }
    };

    let mut records = Vec::with_capacity(pids.len());
    for pid in pids {
        // Processes exit between listing and reading; skip them
        let Ok(stat) = tokio::fs::read_to_string(format!("/proc/{}/stat", pid)).await else {
            continue;
        };
        let cmdline = tokio::fs::read(format!("/proc/{}/cmdline", pid))
            .await
            .unwrap_or_default();

        if let Some(record) = proc_record(pid, &stat, &cmdline) {
            records.push(record);
        }
    }

    Ok(records)
}

/// Build a record from the contents of `/proc/{pid}/stat` and `cmdline`
///
/// Zombies are left out: they have already exited and only wait for their
/// parent to reap them, so there is nothing left to signal.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn proc_record(pid: u32, stat: &str, cmdline: &[u8]) -> Option<ProcessRecord> {
    let (comm, state, parent_pid) = parse_stat(stat)?;
    if state == 'Z' {
        return None;
    }

    Some(ProcessRecord {
        pid,
        parent_pid,
        command: command_line(cmdline).unwrap_or(comm),
    })
}

/// Extract `(comm, state, ppid)` from a `/proc/{pid}/stat` line
///
/// The command name sits in parentheses and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat(stat: &str) -> Option<(String, char, u32)> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?.to_string();

    let mut fields = stat.get(close + 1..)?.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let parent_pid = fields.next()?.parse().ok()?;

    Some((comm, state, parent_pid))
}

/// Join a NUL-separated cmdline; kernel threads have none
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn command_line(raw: &[u8]) -> Option<String> {
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect();

    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}

#[cfg(not(target_os = "linux"))]
async fn read_ps() -> Result<Vec<ProcessRecord>> {
    let output = tokio::process::Command::new("ps")
        .args(["-A", "-o", "pid=,ppid=,command="])
        .output()
        .await
        .map_err(|e| HydraError::ProcessTable(format!("could not run ps: {}", e)))?;

    if !output.status.success() {
        return Err(HydraError::ProcessTable(format!(
            "ps exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `pid ppid command...` lines, skipping anything malformed
#[cfg_attr(target_os = "linux", allow(dead_code))]
fn parse_ps_output(output: &str) -> Vec<ProcessRecord> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let rest = rest.trim_start();
            let (parent_pid, command) = match rest.split_once(char::is_whitespace) {
                Some((ppid, command)) => (ppid, command.trim()),
                None => (rest, ""),
            };

            Some(ProcessRecord {
                pid: pid.parse().ok()?,
                parent_pid: parent_pid.parse().ok()?,
                command: command.to_string(),
            })
        })
        .collect()
}

/// `root` and every process transitively descended from it
///
/// Nodes come out in discovery order, each parent before its subtree. An empty
/// result means `root` is no longer in the table.
pub fn descendants_of(root: u32, table: &[ProcessRecord]) -> Vec<ProcessRecord> {
    let Some(root) = table.iter().find(|r| r.pid == root) else {
        return Vec::new();
    };

    let mut children: HashMap<u32, Vec<&ProcessRecord>> = HashMap::new();
    for record in table {
        // pid 0 parents itself on some systems
        if record.pid != record.parent_pid {
            children.entry(record.parent_pid).or_default().push(record);
        }
    }

    let mut seen = HashSet::new();
    let mut tree = Vec::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if !seen.insert(node.pid) {
            continue;
        }
        tree.push(node.clone());

        if let Some(kids) = children.get(&node.pid) {
            stack.extend(kids.iter().rev());
        }
    }

    tree
}

/// Whether `record` is still present in `table` with the same command line
pub fn is_same_process(record: &ProcessRecord, table: &[ProcessRecord]) -> bool {
    table
        .iter()
        .any(|r| r.pid == record.pid && r.command == record.command)
}
