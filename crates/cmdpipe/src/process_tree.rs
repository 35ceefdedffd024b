//! Process tree management utilities.
//!
//! Provides best-effort discovery and forced termination of a process's
//! descendants. Discovery walks parent links in a `sysinfo` process snapshot,
//! so it only sees descendants that have not been re-parented yet.

use std::collections::{HashMap, VecDeque};
use std::io;

use sysinfo::{Pid, System};
use tokio::process::Child;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// List every live descendant of `pid`, parents before children
pub fn descendants(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes();

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (child_pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*child_pid);
        }
    }

    let root = Pid::from_u32(pid);
    let mut found = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(next) = queue.pop_front() {
        for child in children.get(&next).into_iter().flatten() {
            if *child != root && !found.contains(&child.as_u32()) {
                found.push(child.as_u32());
                queue.push_back(*child);
            }
        }
    }
    found
}

/// Force-kill every descendant of `pid`, ignoring individual failures
pub fn kill_descendants(pid: u32) -> usize {
    let targets = descendants(pid);
    let mut killed = 0;
    for target in &targets {
        match kill_pid(*target) {
            Ok(()) => {
                trace!(pid = %pid, descendant = %target, "Killed descendant process");
                killed += 1;
            }
            Err(e) => {
                debug!(pid = %pid, descendant = %target, error = %e, "Failed to kill descendant process");
            }
        }
    }
    if !targets.is_empty() {
        debug!(pid = %pid, found = targets.len(), killed, "Descendant processes killed");
    }
    killed
}

/// Forcibly terminate a child process, and optionally its descendants first
///
/// Never fails: errors are logged, the caller waits for the exit afterwards.
/// The descendant sweep scans the whole process table on the calling thread,
/// so async code uses [`kill_tree_blocking_sweep`] instead.
pub(crate) fn kill_tree(child: &mut Child, pid: Option<u32>, with_descendants: bool) {
    if with_descendants {
        match pid {
            Some(pid) => {
                kill_descendants(pid);
            }
            None => debug!("Process ID unavailable, skipping descendant kill"),
        }
    }
    kill_process(child, pid);
}

/// [`kill_tree`] with the descendant sweep moved onto the blocking pool of `runtime`
pub(crate) async fn kill_tree_blocking_sweep(
    child: &mut Child,
    pid: Option<u32>,
    with_descendants: bool,
    runtime: &Handle,
) {
    if with_descendants {
        match pid {
            Some(pid) => {
                if let Err(e) = runtime.spawn_blocking(move || kill_descendants(pid)).await {
                    warn!(pid = %pid, error = %e, "Descendant sweep did not complete");
                }
            }
            None => debug!("Process ID unavailable, skipping descendant kill"),
        }
    }
    kill_process(child, pid);
}

fn kill_process(child: &mut Child, pid: Option<u32>) {
    match child.start_kill() {
        Ok(()) => debug!(pid = ?pid, "Sent kill to process"),
        // Already exited and reaped.
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
            trace!(pid = ?pid, "Process already exited")
        }
        Err(e) => warn!(pid = ?pid, error = %e, "Failed to kill process"),
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as UnixPid;

    let raw = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    match kill(UnixPid::from_raw(raw), Signal::SIGKILL) {
        // Exited between the snapshot and the kill.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) -> io::Result<()> {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    if !system.refresh_process(target) {
        return Ok(());
    }
    match system.process(target) {
        Some(process) if !process.kill() => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("failed to kill pid {pid}"),
        )),
        _ => Ok(()),
    }
}
