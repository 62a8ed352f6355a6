//! taskd — a process task supervisor.
//!
//! Launches, tracks, times out, and terminates named child tasks keyed by
//! (project, task) identity, relaying their output to an event-driven
//! state store. The embedding application supplies task lookup, a project
//! directory layout, and consumes [`events::TaskEvent`]s from the bus.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod identity;
pub mod registry;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use descriptor::{ProjectDirLayout, ProjectPaths, TaskDescriptor, TaskIndex, TaskLookup};
pub use error::SupervisorError;
pub use events::{EventBus, ExitReason, OutputStream, TaskEvent};
pub use identity::TaskIdentity;
pub use registry::{SlotState, TaskSnapshot};
pub use supervisor::{StartMode, TaskSupervisor};
