//! Cache invalidation policy.
//!
//! A static table mapping each mutating operation to the cache keys it must
//! clear. The owning service applies its row synchronously, before the write
//! is reported successful, so a reader can never observe a committed write
//! alongside a cache entry predating it. Clearing is idempotent (deleting an
//! absent key is a no-op) and a failed clear only leaves an entry until its
//! TTL backstop, so no distributed coordination is needed.

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKeys, EntityCache};
use crate::metrics;
use crate::models::{EpicId, ProjectId, SprintId};

/// A mutating operation on a tracked entity, as seen by the cache layer.
///
/// Variants carry exactly the ids whose key families the operation touches.
/// Serialized (tagged by `op`) for audit logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EntityMutation {
    /// Clears the project projection; the next read recomputes it.
    ProjectUpdated { project_id: ProjectId },
    /// Clears the membership list. The per-user projects list is never
    /// cached, so membership changes have nothing else to clear.
    ProjectUsersUpdated { project_id: ProjectId },
    /// Clears every project-scoped key family.
    ProjectDeleted { project_id: ProjectId },
    /// Clears the sprint collection and the (possibly pre-warmed) task list
    /// of the new sprint.
    SprintCreated {
        project_id: ProjectId,
        sprint_id: SprintId,
    },
    SprintUpdated {
        project_id: ProjectId,
        sprint_id: SprintId,
    },
    /// Deleting a sprint unlinks its tasks, so the project task list is
    /// cleared as well.
    SprintDeleted {
        project_id: ProjectId,
        sprint_id: SprintId,
    },
    EpicCreated {
        project_id: ProjectId,
        epic_id: EpicId,
    },
    EpicUpdated {
        project_id: ProjectId,
        epic_id: EpicId,
    },
    /// Deleting an epic unlinks its tasks, so the project task list is
    /// cleared as well.
    EpicDeleted {
        project_id: ProjectId,
        epic_id: EpicId,
    },
    TaskCreated {
        project_id: ProjectId,
        sprint_id: Option<SprintId>,
        epic_id: Option<EpicId>,
    },
    /// Carries both the old and the new sprint/epic association: a task
    /// moved between sprints must invalidate the source and the destination
    /// collection keys.
    TaskUpdated {
        project_id: ProjectId,
        old_sprint_id: Option<SprintId>,
        new_sprint_id: Option<SprintId>,
        old_epic_id: Option<EpicId>,
        new_epic_id: Option<EpicId>,
    },
    TaskDeleted {
        project_id: ProjectId,
        sprint_id: Option<SprintId>,
        epic_id: Option<EpicId>,
    },
}

impl EntityMutation {
    /// Operation name for logs and metric labels.
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ProjectUpdated { .. } => "project_updated",
            Self::ProjectUsersUpdated { .. } => "project_users_updated",
            Self::ProjectDeleted { .. } => "project_deleted",
            Self::SprintCreated { .. } => "sprint_created",
            Self::SprintUpdated { .. } => "sprint_updated",
            Self::SprintDeleted { .. } => "sprint_deleted",
            Self::EpicCreated { .. } => "epic_created",
            Self::EpicUpdated { .. } => "epic_updated",
            Self::EpicDeleted { .. } => "epic_deleted",
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskDeleted { .. } => "task_deleted",
        }
    }

    /// The cache keys this operation must clear, deduplicated.
    #[must_use]
    pub fn keys(&self, keys: &CacheKeys) -> Vec<String> {
        let mut targets = match self {
            Self::ProjectUpdated { project_id } => vec![keys.project(project_id)],
            Self::ProjectUsersUpdated { project_id } => vec![keys.project_users(project_id)],
            Self::ProjectDeleted { project_id } => keys.all_for_project(project_id),
            Self::SprintCreated {
                project_id,
                sprint_id,
            }
            | Self::SprintUpdated {
                project_id,
                sprint_id,
            } => vec![keys.project_sprints(project_id), keys.sprint_tasks(sprint_id)],
            Self::SprintDeleted {
                project_id,
                sprint_id,
            } => vec![
                keys.project_sprints(project_id),
                keys.sprint_tasks(sprint_id),
                keys.project_tasks(project_id),
            ],
            Self::EpicCreated {
                project_id,
                epic_id,
            }
            | Self::EpicUpdated {
                project_id,
                epic_id,
            } => vec![keys.project_epics(project_id), keys.epic_tasks(epic_id)],
            Self::EpicDeleted {
                project_id,
                epic_id,
            } => vec![
                keys.project_epics(project_id),
                keys.epic_tasks(epic_id),
                keys.project_tasks(project_id),
            ],
            Self::TaskCreated {
                project_id,
                sprint_id,
                epic_id,
            }
            | Self::TaskDeleted {
                project_id,
                sprint_id,
                epic_id,
            } => {
                let mut targets = vec![keys.project_tasks(project_id)];
                if let Some(sprint_id) = sprint_id {
                    targets.push(keys.sprint_tasks(sprint_id));
                }
                if let Some(epic_id) = epic_id {
                    targets.push(keys.epic_tasks(epic_id));
                }
                targets
            }
            Self::TaskUpdated {
                project_id,
                old_sprint_id,
                new_sprint_id,
                old_epic_id,
                new_epic_id,
            } => {
                let mut targets = vec![keys.project_tasks(project_id)];
                for sprint_id in [old_sprint_id, new_sprint_id].into_iter().flatten() {
                    targets.push(keys.sprint_tasks(sprint_id));
                }
                for epic_id in [old_epic_id, new_epic_id].into_iter().flatten() {
                    targets.push(keys.epic_tasks(epic_id));
                }
                targets
            }
        };

        targets.sort();
        targets.dedup();
        targets
    }
}

/// Executes the invalidation table against the entity cache.
///
/// `apply` never fails: a cache outage degrades to log-and-proceed and the
/// stale entries expire through their family TTL.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    cache: EntityCache,
    keys: CacheKeys,
}

impl CacheInvalidator {
    pub fn new(cache: EntityCache, keys: CacheKeys) -> Self {
        Self { cache, keys }
    }

    /// Clear every key in the mutation's table row. Call before reporting
    /// the mutation successful.
    pub async fn apply(&self, mutation: &EntityMutation) {
        let targets = mutation.keys(&self.keys);

        metrics::cache::INVALIDATIONS
            .with_label_values(&[mutation.operation()])
            .inc_by(targets.len() as f64);
        tracing::debug!(
            op = mutation.operation(),
            keys = ?targets,
            "Clearing cache keys for mutation"
        );

        self.cache.invalidate(&targets).await;
    }
}
