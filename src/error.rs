use crate::identity::TaskIdentity;

/// Errors surfaced synchronously by supervisor entry points.
///
/// These all indicate caller errors (bad identity, unknown task, occupied
/// slot). Process-runtime failures — spawn errors, crashes, nonzero exits —
/// are never errors: they arrive as [`TaskEvent`](crate::events::TaskEvent)s.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("invalid task identity: {0}")]
    InvalidIdentity(String),

    #[error("no task descriptor registered for {0}")]
    TaskNotFound(TaskIdentity),

    #[error("task {0} is already running")]
    TaskAlreadyRunning(TaskIdentity),

    #[error("task {0} is still terminating — replacement timed out waiting for the old process to exit")]
    TaskStillTerminating(TaskIdentity),
}
