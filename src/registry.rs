// SPDX-License-Identifier: MIT
//! Process registry — the sole owner of live task slots.
//!
//! One slot per [`TaskIdentity`]. Slots are created on successful spawn and
//! removed only on confirmed exit; an aborted task sits in `Terminating`
//! until the monitor observes the OS exit. The supervisor serializes every
//! read-modify-write on the registry behind a single mutex, so there is no
//! window where a slot looks free while its process is still alive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::identity::TaskIdentity;

/// Lifecycle state of one registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Process is live and unmolested.
    Running,
    /// Abort has been issued; waiting for the OS to confirm exit.
    Terminating,
}

/// One live child process tracked by the supervisor.
///
/// Mutated only by the supervisor. Callers observe slots through
/// [`TaskSnapshot`]s, never directly.
#[derive(Debug)]
pub struct ManagedProcess {
    pub(crate) identity: TaskIdentity,
    pub(crate) pid: u32,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) state: SlotState,
    /// Fired by `abort`; the monitor task holding the `Child` listens and
    /// performs the actual kill.
    pub(crate) abort_signal: Arc<Notify>,
}

impl ManagedProcess {
    pub(crate) fn new(identity: TaskIdentity, pid: u32) -> Self {
        Self {
            identity,
            pid,
            started_at: Utc::now(),
            state: SlotState::Running,
            abort_signal: Arc::new(Notify::new()),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            identity: self.identity.clone(),
            pid: self.pid,
            state: self.state,
            started_at: self.started_at,
            alive: is_process_alive(self.pid),
        }
    }
}

/// Read-only view of a slot, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub identity: TaskIdentity,
    pub pid: u32,
    pub state: SlotState,
    pub started_at: DateTime<Utc>,
    /// Liveness probe result at snapshot time (always true on non-Unix).
    pub alive: bool,
}

/// Mapping from task identity to live process slot.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    slots: HashMap<TaskIdentity, ManagedProcess>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &TaskIdentity) -> bool {
        self.slots.contains_key(identity)
    }

    pub fn get(&self, identity: &TaskIdentity) -> Option<&ManagedProcess> {
        self.slots.get(identity)
    }

    pub(crate) fn get_mut(&mut self, identity: &TaskIdentity) -> Option<&mut ManagedProcess> {
        self.slots.get_mut(identity)
    }

    pub(crate) fn insert(&mut self, process: ManagedProcess) {
        self.slots.insert(process.identity.clone(), process);
    }

    /// Remove a slot, but only if it still belongs to the given pid.
    ///
    /// The pid guard keeps a monitor for an old lifetime from vacating a
    /// slot that has since been re-used by a replacement process.
    pub(crate) fn remove_if_pid(&mut self, identity: &TaskIdentity, pid: u32) -> bool {
        match self.slots.get(identity) {
            Some(p) if p.pid == pid => {
                self.slots.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.slots.values().map(ManagedProcess::snapshot).collect()
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // POSIX: kill(pid, 0) returns 0 if the process exists and we have
    // permission to signal it.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // Non-Unix platform — assume alive (conservative)
    true
}
