//! Task identity — the composite (project, task) key every supervisor
//! operation is addressed by.

use serde::{Deserialize, Serialize};

use crate::error::SupervisorError;

/// Composite key identifying one runnable task inside one project.
///
/// Used directly as the registry key. The struct itself is the uniqueness
/// guarantee — no string concatenation is involved, so identities like
/// `("a-b", "c")` and `("a", "b-c")` can never collide. The `Display` form
/// (`project-task`) exists for logs and error messages only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub project_id: String,
    pub task_name: String,
}

impl TaskIdentity {
    pub fn new(project_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            task_name: task_name.into(),
        }
    }

    /// Reject identities the supervisor cannot safely act on.
    ///
    /// `project_id` becomes a working-directory path component, so path
    /// separators and NUL are forbidden. Empty fields are a caller
    /// programming error.
    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.project_id.trim().is_empty() {
            return Err(SupervisorError::InvalidIdentity(
                "project_id is empty".to_string(),
            ));
        }
        if self.task_name.trim().is_empty() {
            return Err(SupervisorError::InvalidIdentity(
                "task_name is empty".to_string(),
            ));
        }
        for (field, value) in [
            ("project_id", &self.project_id),
            ("task_name", &self.task_name),
        ] {
            if value.contains('\0') {
                return Err(SupervisorError::InvalidIdentity(format!(
                    "{field} contains NUL"
                )));
            }
        }
        if self.project_id.contains('/') || self.project_id.contains('\\') {
            return Err(SupervisorError::InvalidIdentity(
                "project_id contains a path separator".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.project_id, self.task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identity() {
        assert!(TaskIdentity::new("p1", "start").validate().is_ok());
        // Dashes are ordinary characters — the struct key keeps these distinct.
        assert!(TaskIdentity::new("my-app", "build-prod").validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        assert!(TaskIdentity::new("", "start").validate().is_err());
        assert!(TaskIdentity::new("p1", "").validate().is_err());
        assert!(TaskIdentity::new("   ", "start").validate().is_err());
    }

    #[test]
    fn test_path_separator_rejected() {
        assert!(TaskIdentity::new("../escape", "start").validate().is_err());
        assert!(TaskIdentity::new("a\\b", "start").validate().is_err());
        // task_name never becomes a path — slashes are allowed there.
        assert!(TaskIdentity::new("p1", "lint/fix").validate().is_ok());
    }

    #[test]
    fn test_no_display_collision_between_distinct_keys() {
        let a = TaskIdentity::new("a-b", "c");
        let b = TaskIdentity::new("a", "b-c");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b, "display form may collide, the key must not");
    }
}
