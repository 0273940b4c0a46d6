//! Event model for the live-update push path.
//!
//! Events travel to clients as flat JSON: the type tag and optional
//! `project_id` at the top level, everything else merged in via the payload
//! map (`{"type": "task_updated", "project_id": "...", "task": {...}}`).
//! The same shape rides the broker stream wrapped in a [`PushMessage`]
//! envelope that carries the precomputed audience.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use taskio_core::models::{ProjectId, UserId};
use taskio_core::{Error, Result};

/// Event type names emitted by the collaborator façades.
pub mod types {
    pub const PROJECT_CREATED: &str = "project_created";
    pub const PROJECT_UPDATED: &str = "project_updated";
    pub const PROJECT_IMAGE_UPDATED: &str = "project_image_updated";
    pub const PROJECT_DELETED: &str = "project_deleted";
    pub const PROJECT_USER_ADDED: &str = "project_user_added";
    pub const PROJECT_USER_REMOVED: &str = "project_user_removed";
    pub const SPRINT_CREATED: &str = "sprint_created";
    pub const SPRINT_UPDATED: &str = "sprint_updated";
    pub const SPRINT_DELETED: &str = "sprint_deleted";
    pub const EPIC_CREATED: &str = "epic_created";
    pub const EPIC_UPDATED: &str = "epic_updated";
    pub const EPIC_DELETED: &str = "epic_deleted";
    pub const TASK_CREATED: &str = "task_created";
    pub const TASK_UPDATED: &str = "task_updated";
    pub const TASK_DELETED: &str = "task_deleted";
}

/// Entity types that can ride an event payload under a kind-tagged key.
///
/// The envelope carries `project_id` at the top level, so the nested
/// projection must not repeat it; [`Event::entity`] strips it.
pub trait EventPayload: Serialize {
    /// JSON key the entity nests under (`"sprint"`, `"epic"`, `"task"`).
    const PAYLOAD_KEY: &'static str;

    fn project_id(&self) -> &ProjectId;
}

impl EventPayload for taskio_core::models::Sprint {
    const PAYLOAD_KEY: &'static str = "sprint";

    fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

impl EventPayload for taskio_core::models::Epic {
    const PAYLOAD_KEY: &'static str = "epic";

    fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

impl EventPayload for taskio_core::models::Task {
    const PAYLOAD_KEY: &'static str = "task";

    fn project_id(&self) -> &ProjectId {
        &self.project_id
    }
}

/// A single live-update event, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,

    /// Remaining payload fields, flattened into the top-level JSON object.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        project_id: Option<ProjectId>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            project_id,
            payload,
        }
    }

    /// Event scoped to a project, with caller-shaped payload fields.
    pub fn for_project(
        event_type: impl Into<String>,
        project_id: ProjectId,
        payload: Map<String, Value>,
    ) -> Self {
        Self::new(event_type, Some(project_id), payload)
    }

    /// Entity create/update/delete event: nests the entity's public fields
    /// under its kind key (`{"type":"sprint_created","project_id":P,
    /// "sprint":{...}}`).
    pub fn entity<T: EventPayload>(event_type: impl Into<String>, entity: &T) -> Result<Self> {
        let mut fields = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::Internal(format!(
                    "entity payload serialized to non-object JSON: {other}"
                )))
            }
        };
        // The envelope carries project_id at the top level already.
        fields.remove("project_id");

        let mut payload = Map::new();
        payload.insert(T::PAYLOAD_KEY.to_string(), Value::Object(fields));

        Ok(Self {
            event_type: event_type.into(),
            project_id: Some(entity.project_id().clone()),
            payload,
        })
    }

    /// `project_user_added` event, addressed to the added user.
    pub fn member_added(project_id: &ProjectId, user_id: &UserId) -> Self {
        Self::membership(types::PROJECT_USER_ADDED, project_id, user_id)
    }

    /// `project_user_removed` event, addressed to the removed user.
    pub fn member_removed(project_id: &ProjectId, user_id: &UserId) -> Self {
        Self::membership(types::PROJECT_USER_REMOVED, project_id, user_id)
    }

    fn membership(event_type: &str, project_id: &ProjectId, user_id: &UserId) -> Self {
        let mut payload = Map::new();
        payload.insert(
            "user_id".to_string(),
            Value::String(user_id.as_str().to_string()),
        );
        Self::for_project(event_type, project_id.clone(), payload)
    }

    /// Serialize to the flat JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Broker envelope: an event plus its precomputed audience.
///
/// Published by the instance that resolved the audience; the consuming
/// instance pushes to whichever of those users are connected to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub users: Vec<UserId>,
    pub event: Event,
}

impl PushMessage {
    pub fn new(users: Vec<UserId>, event: Event) -> Self {
        Self { users, event }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::Deserialization {
            context: format!("push message: {e}"),
        })
    }
}
