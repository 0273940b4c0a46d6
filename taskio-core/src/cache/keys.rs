//! Cache key scheme shared with the collaborator CRUD services.
//!
//! One key family per entity class. Every service that mutates an entity
//! clears the families its write touches (see `invalidation`), so the key
//! format here is a cross-service contract: change it in lockstep with the
//! services or invalidation silently stops matching.
//!
//! An optional prefix namespaces all families for multi-environment
//! isolation; it is empty by default so keys match the collaborators' scheme.

use crate::config::Config;
use crate::models::{EpicId, ProjectId, SprintId};

/// Builder for the entity cache key families.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    /// Create a new `CacheKeys` with the given prefix ("" for none).
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Create `CacheKeys` from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.redis.key_prefix.clone())
    }

    fn scoped(&self, key: String) -> String {
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    /// Single project projection
    ///
    /// Type: String + TTL (3600s)
    /// Value: JSON project projection
    #[must_use]
    pub fn project(&self, project_id: &ProjectId) -> String {
        self.scoped(format!("project:{project_id}"))
    }

    /// Project membership list with roles
    ///
    /// Type: String + TTL (300s)
    /// Value: JSON array of membership entries
    #[must_use]
    pub fn project_users(&self, project_id: &ProjectId) -> String {
        self.scoped(format!("project_users:{project_id}"))
    }

    /// All tasks of a project
    ///
    /// Type: String + TTL (3600s)
    /// Value: JSON array of task projections
    #[must_use]
    pub fn project_tasks(&self, project_id: &ProjectId) -> String {
        self.scoped(format!("project_tasks:{project_id}"))
    }

    /// Tasks belonging to a sprint
    ///
    /// Type: String + TTL (3600s)
    /// Value: JSON array of task projections
    #[must_use]
    pub fn sprint_tasks(&self, sprint_id: &SprintId) -> String {
        self.scoped(format!("sprint_tasks:{sprint_id}"))
    }

    /// Tasks belonging to an epic
    ///
    /// Type: String + TTL (3600s)
    /// Value: JSON array of task projections
    #[must_use]
    pub fn epic_tasks(&self, epic_id: &EpicId) -> String {
        self.scoped(format!("epic_tasks:{epic_id}"))
    }

    /// All sprints of a project
    ///
    /// Type: String + TTL (1800s)
    /// Value: JSON array of sprint projections
    #[must_use]
    pub fn project_sprints(&self, project_id: &ProjectId) -> String {
        self.scoped(format!("project_sprints:{project_id}"))
    }

    /// All epics of a project
    ///
    /// Type: String + TTL (1800s)
    /// Value: JSON array of epic projections
    #[must_use]
    pub fn project_epics(&self, project_id: &ProjectId) -> String {
        self.scoped(format!("project_epics:{project_id}"))
    }

    /// Every project-scoped key family, for project deletion.
    ///
    /// Sprint- and epic-scoped task keys of the deleted project are not
    /// enumerable from the id alone; those expire through their TTL.
    #[must_use]
    pub fn all_for_project(&self, project_id: &ProjectId) -> Vec<String> {
        vec![
            self.project(project_id),
            self.project_users(project_id),
            self.project_tasks(project_id),
            self.project_sprints(project_id),
            self.project_epics(project_id),
        ]
    }

    /// Key family name for metric labels: the segment before the first `:`
    /// once the configured prefix is stripped.
    #[must_use]
    pub fn family_of<'a>(&self, key: &'a str) -> &'a str {
        let unprefixed = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(key)
        };
        unprefixed.split(':').next().unwrap_or(unprefixed)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("")
    }
}
