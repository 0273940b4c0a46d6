use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::id::{EpicId, ProjectId, SprintId, TaskId, UserId};

/// Role a member holds inside a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum MemberRole {
    #[default]
    Observer,
    Assignee,
    Manager,
    Owner,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Assignee => "assignee",
            Self::Manager => "manager",
            Self::Owner => "owner",
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner)
    }
}

/// Project projection, cached under `project:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub img_url: Option<String>,
    /// Project type name (e.g. "kanban", "scrum")
    #[serde(rename = "type")]
    pub project_type: String,
}

/// One entry of a project's membership list, cached under
/// `project_users:{project_id}` and returned by membership lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMember {
    pub user_id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub img_url: Option<String>,
    pub role: MemberRole,
}

impl ProjectMember {
    /// Minimal entry carrying only identity and role, for callers that do
    /// not have the profile fields at hand.
    #[must_use]
    pub fn with_role(user_id: UserId, role: MemberRole) -> Self {
        Self {
            user_id,
            email: None,
            name: None,
            surname: None,
            img_url: None,
            role,
        }
    }
}

/// Sprint projection, cached in collections under `project_sprints:{project_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: SprintId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_started: bool,
}

/// Epic projection, cached in collections under `project_epics:{project_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: EpicId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub priority: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Task projection, cached in collections under `project_tasks:{project_id}`,
/// `sprint_tasks:{sprint_id}` and `epic_tasks:{epic_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    /// Task type name (e.g. "task", "bug")
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub assigned_to: Option<UserId>,
    pub epic_id: Option<EpicId>,
    pub sprint_id: Option<SprintId>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}
