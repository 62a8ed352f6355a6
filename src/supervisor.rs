// SPDX-License-Identifier: MIT
//! Task supervisor — mediates between task-lifecycle requests and the OS
//! process API.
//!
//! `start` resolves the descriptor, spawns `sh -c <command>` in the
//! project's working directory, registers the slot, and wires three
//! asynchronous channels: stdout chunks, stderr chunks, and exit. `abort`
//! is the single cancellation primitive; the watchdog drives the same
//! slot-termination transition. Registry slots are vacated only on confirmed OS
//! exit — an aborted task sits in `Terminating` until its monitor observes
//! the exit, so a slot never looks free while the process is still alive.

use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::descriptor::{ProjectPaths, TaskLookup};
use crate::error::SupervisorError;
use crate::events::{EventBus, ExitReason, OutputStream, TaskEvent};
use crate::identity::TaskIdentity;
use crate::registry::{ManagedProcess, ProcessRegistry, SlotState, TaskSnapshot};

/// What `start` does when the identity's slot is already occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Fail with `TaskAlreadyRunning`. The safe default.
    #[default]
    Reject,
    /// Abort the incumbent, wait for its confirmed exit (bounded by the
    /// watchdog duration), then spawn.
    Replace,
}

/// Owns the process registry and every per-task monitor, reader, and
/// watchdog. One instance per embedding application; all state is
/// constructor-scoped, never ambient.
pub struct TaskSupervisor {
    config: SupervisorConfig,
    lookup: Arc<dyn TaskLookup>,
    paths: Arc<dyn ProjectPaths>,
    bus: EventBus,
    registry: Mutex<ProcessRegistry>,
}

impl TaskSupervisor {
    /// Build a supervisor with its own event bus sized from config.
    pub fn new(
        config: SupervisorConfig,
        lookup: Arc<dyn TaskLookup>,
        paths: Arc<dyn ProjectPaths>,
    ) -> Arc<Self> {
        let bus = EventBus::new(config.events.channel_capacity);
        Self::with_bus(config, lookup, paths, bus)
    }

    /// Build a supervisor emitting onto an externally owned bus, for
    /// applications that funnel all state changes through one channel.
    pub fn with_bus(
        config: SupervisorConfig,
        lookup: Arc<dyn TaskLookup>,
        paths: Arc<dyn ProjectPaths>,
        bus: EventBus,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            lookup,
            paths,
            bus,
            registry: Mutex::new(ProcessRegistry::new()),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    // ─── start ───────────────────────────────────────────────────────────────

    /// Launch the task for `identity`.
    ///
    /// Synchronous failures (`InvalidIdentity`, `TaskNotFound`,
    /// `TaskAlreadyRunning`, `TaskStillTerminating`) are caller errors and
    /// come back as `Err`. An OS-level spawn failure is not an `Err`: it is
    /// emitted as a `TaskExited { reason: SpawnFailed }` event and the
    /// registry is left untouched. On success the call returns immediately;
    /// output and exit are delivered as events.
    pub async fn start(
        self: &Arc<Self>,
        identity: TaskIdentity,
        mode: StartMode,
    ) -> Result<(), SupervisorError> {
        identity.validate()?;

        let descriptor = self
            .lookup
            .lookup(&identity)
            .await
            .ok_or_else(|| SupervisorError::TaskNotFound(identity.clone()))?;

        let occupied = self.registry.lock().await.contains(&identity);
        if occupied {
            match mode {
                StartMode::Reject => {
                    return Err(SupervisorError::TaskAlreadyRunning(identity));
                }
                StartMode::Replace => {
                    info!(identity = %identity, "replacing running task");
                    // Subscribe before aborting so the exit event cannot slip
                    // past between the abort and the wait.
                    let rx = self.bus.subscribe();
                    self.abort(&identity).await?;
                    let grace = self.config.watchdog.timeout();
                    if !self.wait_vacant(&identity, rx, grace).await {
                        return Err(SupervisorError::TaskStillTerminating(identity));
                    }
                }
            }
        }

        // Hold the registry lock across check-then-spawn-then-insert so two
        // concurrent starts for the same identity cannot both pass the
        // vacancy check.
        let mut registry = self.registry.lock().await;
        if registry.contains(&identity) {
            return Err(SupervisorError::TaskAlreadyRunning(identity));
        }

        let cwd = self.paths.resolve(&identity.project_id);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&descriptor.command)
            .current_dir(&cwd)
            .env("PORT", self.config.runtime.port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                drop(registry);
                warn!(identity = %identity, cwd = %cwd.display(), error = %e, "spawn failed");
                self.bus.emit(TaskEvent::TaskExited {
                    identity,
                    reason: ExitReason::SpawnFailed {
                        error: e.to_string(),
                    },
                });
                return Ok(());
            }
        };

        let buf_size = self.config.output.read_buffer_bytes.max(1);
        let stdout_reader = child.stdout.take().map(|stream| {
            spawn_stream_reader(
                self.bus.clone(),
                identity.clone(),
                OutputStream::Stdout,
                stream,
                buf_size,
            )
        });
        let stderr_reader = child.stderr.take().map(|stream| {
            spawn_stream_reader(
                self.bus.clone(),
                identity.clone(),
                OutputStream::Stderr,
                stream,
                buf_size,
            )
        });

        // No id means the child was already reaped. Treat it as exited
        // instead of registering an unkillable pid-0 slot: drain, emit the
        // terminal event, and never touch the registry.
        let Some(pid) = child.id() else {
            drop(registry);
            debug!(identity = %identity, "child exited before registration");
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let reason = reason_from(child.wait().await);
                if let Some(handle) = stdout_reader {
                    let _ = handle.await;
                }
                if let Some(handle) = stderr_reader {
                    let _ = handle.await;
                }
                supervisor.bus.emit(TaskEvent::TaskExited { identity, reason });
            });
            return Ok(());
        };

        let process = ManagedProcess::new(identity.clone(), pid);
        let abort_signal = process.abort_signal.clone();
        registry.insert(process);
        drop(registry);

        info!(identity = %identity, pid, cwd = %cwd.display(), command = %descriptor.command, "task started");

        let supervisor = Arc::clone(self);
        let monitor_identity = identity.clone();
        tokio::spawn(async move {
            supervisor
                .monitor(
                    monitor_identity,
                    pid,
                    child,
                    abort_signal,
                    stdout_reader,
                    stderr_reader,
                )
                .await;
        });

        let supervisor = Arc::clone(self);
        let watchdog_timeout = self.config.watchdog.timeout();
        tokio::spawn(async move {
            tokio::time::sleep(watchdog_timeout).await;
            supervisor.watchdog_expired(identity, pid).await;
        });

        Ok(())
    }

    // ─── abort ───────────────────────────────────────────────────────────────

    /// Request termination of the task for `identity`.
    ///
    /// Idempotent: unknown, already-finished, and already-terminating tasks
    /// are silent no-ops. Best-effort: returns as soon as the kill is
    /// signalled — the `TaskExited` event is the authoritative completion
    /// signal, and the slot stays `Terminating` until then.
    pub async fn abort(&self, identity: &TaskIdentity) -> Result<(), SupervisorError> {
        identity.validate()?;
        let mut registry = self.registry.lock().await;
        match registry.get_mut(identity) {
            None => {
                debug!(identity = %identity, "abort for untracked task — no-op");
            }
            Some(process) if process.state == SlotState::Terminating => {
                debug!(identity = %identity, pid = process.pid, "abort while already terminating — no-op");
            }
            Some(process) => Self::terminate_slot(process),
        }
        Ok(())
    }

    // ─── introspection ───────────────────────────────────────────────────────

    /// Snapshot of the slot for `identity`, if one is live.
    pub async fn running(&self, identity: &TaskIdentity) -> Option<TaskSnapshot> {
        self.registry
            .lock()
            .await
            .get(identity)
            .map(ManagedProcess::snapshot)
    }

    /// Snapshots of every live slot.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        self.registry.lock().await.snapshots()
    }

    pub async fn task_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    // ─── internals ───────────────────────────────────────────────────────────

    /// Wait until the slot for `identity` is vacant, re-checking on every
    /// bus event. Returns false if `grace` elapses first.
    async fn wait_vacant(
        &self,
        identity: &TaskIdentity,
        mut rx: broadcast::Receiver<TaskEvent>,
        grace: std::time::Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if !self.registry.lock().await.contains(identity) {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                // Any event (or a lagged receiver) — re-check the registry.
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    // Cannot happen while self.bus holds a sender.
                    return !self.registry.lock().await.contains(identity);
                }
                Err(_) => return false,
            }
        }
    }

    /// Per-process monitor. Owns the `Child`: waits for natural exit or an
    /// abort signal (in which case it kills and then waits), drains both
    /// readers, vacates the slot, and emits the terminal event — in that
    /// order, so `TaskExited` is always the last event of the lifetime and
    /// observers see an already-vacant registry.
    async fn monitor(
        &self,
        identity: TaskIdentity,
        pid: u32,
        mut child: Child,
        abort_signal: Arc<Notify>,
        stdout_reader: Option<JoinHandle<()>>,
        stderr_reader: Option<JoinHandle<()>>,
    ) {
        let natural_exit = tokio::select! {
            status = child.wait() => Some(status),
            _ = abort_signal.notified() => None,
        };
        let reason = match natural_exit {
            Some(status) => reason_from(status),
            None => {
                if let Err(e) = child.start_kill() {
                    // Lost the race against a natural exit — harmless.
                    debug!(identity = %identity, pid, error = %e, "kill after exit");
                }
                reason_from(child.wait().await)
            }
        };

        if let Some(handle) = stdout_reader {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.await;
        }

        if !self.registry.lock().await.remove_if_pid(&identity, pid) {
            warn!(identity = %identity, pid, "slot already vacated before monitor cleanup");
        }
        info!(identity = %identity, pid, ?reason, "task exited");
        self.bus.emit(TaskEvent::TaskExited { identity, reason });
    }

    /// Watchdog expiry. A stale timer (task already exited, or the slot was
    /// re-used by a replacement with a different pid) does nothing. For a
    /// live slot, the Running check, the `WatchdogFired` emit, and the
    /// `Terminating` transition all happen inside one registry critical
    /// section — the monitor cannot vacate the slot and emit the terminal
    /// event until this section ends, so `WatchdogFired` never trails
    /// `TaskExited`. The termination itself is the same slot transition a
    /// manual abort makes.
    async fn watchdog_expired(&self, identity: TaskIdentity, pid: u32) {
        let mut registry = self.registry.lock().await;
        let Some(process) = registry.get_mut(&identity) else {
            return;
        };
        if process.pid != pid || process.state != SlotState::Running {
            return;
        }
        warn!(
            identity = %identity,
            pid,
            timeout_ms = self.config.watchdog.timeout_ms,
            "watchdog expired — aborting task"
        );
        self.bus.emit(TaskEvent::WatchdogFired {
            identity: identity.clone(),
        });
        Self::terminate_slot(process);
    }

    /// The one termination path, shared by `abort` and the watchdog: flip
    /// the slot to `Terminating` and wake the monitor, which kills the
    /// child and vacates the slot on confirmed exit.
    fn terminate_slot(process: &mut ManagedProcess) {
        process.state = SlotState::Terminating;
        process.abort_signal.notify_one();
        info!(identity = %process.identity, pid = process.pid, "abort issued");
    }
}

/// Read one child stream to EOF, emitting one `TaskOutput` event per read.
/// Chunk boundaries are whatever the OS pipe delivered, capped at the
/// configured buffer size.
fn spawn_stream_reader<R>(
    bus: EventBus,
    identity: TaskIdentity,
    stream: OutputStream,
    mut reader: R,
    buf_size: usize,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; buf_size];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    bus.emit(TaskEvent::TaskOutput {
                        identity: identity.clone(),
                        chunk,
                        stream,
                    });
                }
            }
        }
    })
}

fn reason_from(status: std::io::Result<std::process::ExitStatus>) -> ExitReason {
    match status {
        Ok(status) => match status.code() {
            Some(code) => ExitReason::Exited { code },
            None => ExitReason::Killed,
        },
        Err(e) => {
            warn!(error = %e, "wait on child failed");
            ExitReason::Killed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ProjectDirLayout, TaskDescriptor, TaskIndex};

    fn supervisor_with(index: TaskIndex, root: &std::path::Path) -> Arc<TaskSupervisor> {
        TaskSupervisor::new(
            SupervisorConfig::default(),
            Arc::new(index),
            Arc::new(ProjectDirLayout::new(root)),
        )
    }

    #[tokio::test]
    async fn test_start_unknown_task_is_synchronous_error() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(TaskIndex::new(), dir.path());
        let identity = TaskIdentity::new("p1", "missing");

        let err = supervisor
            .start(identity, StartMode::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::TaskNotFound(_)));
        assert_eq!(supervisor.task_count().await, 0, "no registry mutation");
    }

    #[tokio::test]
    async fn test_start_invalid_identity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(TaskIndex::new(), dir.path());

        let err = supervisor
            .start(TaskIdentity::new("", "start"), StartMode::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidIdentity(_)));
    }

    #[tokio::test]
    async fn test_abort_unknown_identity_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(TaskIndex::new(), dir.path());
        let mut rx = supervisor.subscribe();

        supervisor
            .abort(&TaskIdentity::new("p1", "never-started"))
            .await
            .unwrap();

        // No event of any kind was produced.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_event_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let index = TaskIndex::new();
        let identity = TaskIdentity::new("ghost-project", "start");
        index
            .register(
                identity.clone(),
                TaskDescriptor {
                    name: "start".to_string(),
                    label: "Start".to_string(),
                    command: "true".to_string(),
                },
            )
            .await;
        // Project directory deliberately absent — spawn must fail at the OS.
        let supervisor = supervisor_with(index, dir.path());
        let mut rx = supervisor.subscribe();

        supervisor
            .start(identity.clone(), StartMode::Reject)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event {
            TaskEvent::TaskExited {
                identity: id,
                reason: ExitReason::SpawnFailed { .. },
            } => assert_eq!(id, identity),
            other => panic!("expected SpawnFailed exit event, got {other:?}"),
        }
        assert_eq!(supervisor.task_count().await, 0);
    }
}
