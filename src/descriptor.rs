//! Task descriptors and the collaborator seams the supervisor consumes:
//! task lookup and working-directory resolution. The surrounding
//! application owns both; in-memory defaults are provided for embedding
//! and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::identity::TaskIdentity;

/// Metadata for one runnable task, resolved from a [`TaskIdentity`].
///
/// `command` is a shell command line, run via `sh -c` in the project's
/// working directory (e.g. `npm run start`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Machine name — matches `TaskIdentity::task_name`.
    pub name: String,
    /// Human-facing label for display surfaces.
    pub label: String,
    /// Shell command executed for this task.
    pub command: String,
}

/// Resolves a [`TaskIdentity`] to its descriptor.
///
/// A `None` answer is a hard error for `start` — a task must exist before
/// it can be spawned.
#[async_trait]
pub trait TaskLookup: Send + Sync {
    async fn lookup(&self, identity: &TaskIdentity) -> Option<TaskDescriptor>;
}

/// Resolves a project id to the working directory its tasks run in.
pub trait ProjectPaths: Send + Sync {
    fn resolve(&self, project_id: &str) -> PathBuf;
}

/// Flat `root/<project_id>` directory layout.
pub struct ProjectDirLayout {
    root: PathBuf,
}

impl ProjectDirLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ProjectPaths for ProjectDirLayout {
    fn resolve(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }
}

/// In-memory task index implementing [`TaskLookup`].
#[derive(Default)]
pub struct TaskIndex {
    tasks: RwLock<HashMap<TaskIdentity, TaskDescriptor>>,
}

impl TaskIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) a descriptor for an identity.
    pub async fn register(&self, identity: TaskIdentity, descriptor: TaskDescriptor) {
        self.tasks.write().await.insert(identity, descriptor);
    }

    /// Remove a descriptor. Returns it if present.
    pub async fn deregister(&self, identity: &TaskIdentity) -> Option<TaskDescriptor> {
        self.tasks.write().await.remove(identity)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskLookup for TaskIndex {
    async fn lookup(&self, identity: &TaskIdentity) -> Option<TaskDescriptor> {
        self.tasks.read().await.get(identity).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_dir_layout() {
        let layout = ProjectDirLayout::new("/srv/projects");
        assert_eq!(layout.resolve("p1"), PathBuf::from("/srv/projects/p1"));
    }

    #[tokio::test]
    async fn test_task_index_round_trip() {
        let index = TaskIndex::new();
        let id = TaskIdentity::new("p1", "start");
        let desc = TaskDescriptor {
            name: "start".to_string(),
            label: "Start dev server".to_string(),
            command: "npm run start".to_string(),
        };
        assert!(index.lookup(&id).await.is_none());
        assert!(index.is_empty().await);

        index.register(id.clone(), desc.clone()).await;
        assert_eq!(index.len().await, 1);
        assert_eq!(index.lookup(&id).await, Some(desc));

        index.deregister(&id).await;
        assert!(index.lookup(&id).await.is_none());
        assert!(index.is_empty().await);
    }
}
